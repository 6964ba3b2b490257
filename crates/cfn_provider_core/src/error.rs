use thiserror::Error;

/// Event-shape violations detected while merging or decoding provider data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContractError {
    #[error(
        "DELETE: cannot change the physical resource ID from \"{from}\" to \"{to}\" during deletion"
    )]
    PhysicalIdChangedOnDelete { from: String, to: String },

    #[error("\"Data\" is not allowed if \"IsComplete\" is \"False\"")]
    DataWhileIncomplete,

    #[error("return values from user-handlers must be JSON objects. got: \"{0}\"")]
    InvalidUserPayload(String),

    #[error("malformed timeout event: {0}")]
    MalformedTimeoutEvent(String),
}

/// Signal that the work is still in progress and the waiter should invoke
/// the handler again later. The payload is handed back verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{payload}")]
pub struct RetryRequest {
    pub payload: String,
}

impl RetryRequest {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Outcome of an inner handler that did not succeed.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("retry requested")]
    Retry(RetryRequest),

    /// `message` is the compact form; `detail` adds causes and any trace.
    #[error("{message}")]
    Failure { message: String, detail: String },
}

impl HandlerError {
    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Failure {
            detail: message.clone(),
            message,
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry(_))
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(error: anyhow::Error) -> Self {
        Self::Failure {
            message: error.to_string(),
            detail: format!("{error:?}"),
        }
    }
}

impl From<ContractError> for HandlerError {
    fn from(error: ContractError) -> Self {
        anyhow::Error::new(error).into()
    }
}

impl From<RetryRequest> for HandlerError {
    fn from(request: RetryRequest) -> Self {
        Self::Retry(request)
    }
}
