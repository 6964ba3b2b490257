pub use cfn_provider_core::{contract, error, redaction, retry, user_function};
