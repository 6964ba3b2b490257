use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct WaiterError(pub String);

/// Starts the external state machine that polls the is-complete entrypoint.
#[async_trait]
pub trait WaiterLauncher: Send + Sync {
    async fn start_execution(
        &self,
        state_machine_arn: &str,
        name: &str,
        input: &str,
    ) -> Result<(), WaiterError>;
}
