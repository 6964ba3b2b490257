//! AWS-oriented adapters and handlers for the custom resource provider.
//!
//! This crate owns runtime integration details (Lambda entrypoints, callback
//! delivery, user-function invocation and waiter dispatch) and exposes a
//! single runtime module boundary for the contract primitives.

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod logging;
pub mod runtime;
