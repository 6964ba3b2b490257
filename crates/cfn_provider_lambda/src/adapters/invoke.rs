use async_trait::async_trait;
use thiserror::Error;

/// Raw result of a synchronous user-function invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationResponse {
    pub payload: Vec<u8>,
    /// Set when the function itself raised, e.g. `Unhandled`.
    pub function_error: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct InvokeError(pub String);

#[async_trait]
pub trait UserFunctionInvoker: Send + Sync {
    async fn invoke(
        &self,
        function_arn: &str,
        payload: &[u8],
    ) -> Result<InvocationResponse, InvokeError>;
}
