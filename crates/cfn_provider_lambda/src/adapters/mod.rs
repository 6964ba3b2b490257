pub mod invoke;
pub mod transport;
pub mod waiter;
