pub mod framework;
pub mod reporter;
