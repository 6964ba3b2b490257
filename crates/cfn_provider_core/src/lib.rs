//! Shared custom resource provider primitives.
//!
//! This crate owns the wire contract exchanged with CloudFormation, the
//! sentinel markers that carry state between invocations, payload redaction
//! and the merge rules applied to user-function results. It intentionally
//! excludes AWS SDK, HTTP and Lambda runtime concerns.

pub mod contract;
pub mod error;
pub mod redaction;
pub mod retry;
pub mod user_function;
