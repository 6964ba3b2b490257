//! Provider framework entrypoints.
//!
//! `on_event` forwards a CloudFormation request to the user's on-event
//! function and either completes it right away or hands it to the waiter.
//! `is_complete` is polled by the waiter until the user's is-complete
//! function says the resource is ready, and `on_timeout` reports the failure
//! when the waiter gives up.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::adapters::invoke::UserFunctionInvoker;
use crate::adapters::transport::ResponseTransport;
use crate::adapters::waiter::WaiterLauncher;
use crate::config::{ConfigError, FrameworkConfig, USER_IS_COMPLETE_FUNCTION_ARN_ENV};
use crate::handlers::reporter::{CompletionReporter, GuardError, ReporterError, ResourceHandler};
use crate::runtime::contract::{
    CompletionStatus, ProvisioningEvent, RequestType, ResponseOptions,
};
use crate::runtime::error::{ContractError, HandlerError, RetryRequest};
use crate::runtime::user_function::{
    create_response_event, decode_is_complete_result, decode_on_event_result, event_from_timeout,
    merge_is_complete, parse_json_payload, user_function_failure, IsCompleteOutcome,
};

const COMPONENT: &str = "provider_framework";
pub const TIMEOUT_REASON: &str = "Operation timed out";

#[derive(Debug, Error)]
pub enum TimeoutError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error(transparent)]
    Report(#[from] ReporterError),
}

pub struct ProviderFramework<'a, T> {
    reporter: &'a CompletionReporter<T>,
    invoker: &'a dyn UserFunctionInvoker,
    waiter: &'a dyn WaiterLauncher,
    config: &'a FrameworkConfig,
}

impl<'a, T: ResponseTransport> ProviderFramework<'a, T> {
    pub fn new(
        reporter: &'a CompletionReporter<T>,
        invoker: &'a dyn UserFunctionInvoker,
        waiter: &'a dyn WaiterLauncher,
        config: &'a FrameworkConfig,
    ) -> Self {
        Self {
            reporter,
            invoker,
            waiter,
            config,
        }
    }

    pub async fn on_event(&self, mut event: ProvisioningEvent) -> Result<(), GuardError> {
        tracing::info!(
            component = COMPONENT,
            event = "on_event",
            request = %to_log_json(&event.sanitized()),
            "onEvent handler invoked"
        );
        self.reporter
            .run_guarded(&mut event, &OnEventStep { framework: self })
            .await
    }

    pub async fn is_complete(&self, mut event: ProvisioningEvent) -> Result<(), GuardError> {
        tracing::info!(
            component = COMPONENT,
            event = "is_complete",
            request = %to_log_json(&event.sanitized()),
            "isComplete handler invoked"
        );
        self.reporter
            .run_guarded(&mut event, &IsCompleteStep { framework: self })
            .await
    }

    pub async fn on_timeout(&self, timeout_event: &Value) -> Result<(), TimeoutError> {
        tracing::info!(
            component = COMPONENT,
            event = "on_timeout",
            timeout_event = %timeout_event,
            "timeout handler invoked"
        );
        let event = event_from_timeout(timeout_event)?;
        self.reporter
            .submit(
                CompletionStatus::Failed,
                &event,
                &ResponseOptions::with_reason(TIMEOUT_REASON),
            )
            .await?;
        Ok(())
    }

    /// Invokes a user function with the sanitized event and returns its JSON
    /// response. A function error becomes a handler failure.
    async fn invoke_user_function(
        &self,
        function_arn: &str,
        event: &ProvisioningEvent,
    ) -> Result<Value, HandlerError> {
        let payload = serde_json::to_vec(&event.sanitized()).map_err(failure)?;
        let response = self
            .invoker
            .invoke(function_arn, &payload)
            .await
            .map_err(failure)?;
        let body = parse_json_payload(&response.payload)?;

        if let Some(function_error) = response.function_error {
            tracing::warn!(
                component = COMPONENT,
                event = "user_function_error",
                function_arn,
                function_error = %function_error,
                "user function threw an error"
            );
            return Err(user_function_failure(function_arn, &body));
        }

        tracing::info!(
            component = COMPONENT,
            event = "user_function_returned",
            function_arn,
            response = %body,
            "user function returned"
        );
        Ok(body)
    }
}

struct OnEventStep<'f, 'a, T> {
    framework: &'f ProviderFramework<'a, T>,
}

#[async_trait]
impl<'f, 'a, T: ResponseTransport> ResourceHandler for OnEventStep<'f, 'a, T> {
    async fn handle(&self, event: &ProvisioningEvent) -> Result<(), HandlerError> {
        let framework = self.framework;
        let function_arn = framework.config.on_event_function().map_err(failure)?;

        let result = framework.invoke_user_function(function_arn, event).await?;
        let response = create_response_event(event, decode_on_event_result(result)?)?;

        if event.request_type == RequestType::Update
            && response.physical_resource_id() != event.physical_resource_id()
        {
            tracing::info!(
                component = COMPONENT,
                event = "physical_id_replaced",
                from = event.physical_resource_id().unwrap_or_default(),
                to = response.physical_resource_id().unwrap_or_default(),
                "UPDATE: changing physical resource ID"
            );
        }

        if framework.config.is_complete_function().is_none() {
            return framework
                .reporter
                .submit(
                    CompletionStatus::Success,
                    &response,
                    &ResponseOptions::with_no_echo(response.no_echo),
                )
                .await
                .map_err(failure);
        }

        let state_machine_arn = framework.config.waiter_state_machine().map_err(failure)?;
        let input = serde_json::to_string(&response).map_err(failure)?;
        tracing::info!(
            component = COMPONENT,
            event = "waiter_started",
            state_machine_arn,
            execution_name = %response.request_id,
            "starting waiter"
        );
        framework
            .waiter
            .start_execution(state_machine_arn, &response.request_id, &input)
            .await
            .map_err(failure)
    }
}

struct IsCompleteStep<'f, 'a, T> {
    framework: &'f ProviderFramework<'a, T>,
}

#[async_trait]
impl<'f, 'a, T: ResponseTransport> ResourceHandler for IsCompleteStep<'f, 'a, T> {
    async fn handle(&self, event: &ProvisioningEvent) -> Result<(), HandlerError> {
        let framework = self.framework;
        let function_arn = framework
            .config
            .is_complete_function()
            .ok_or(ConfigError::Missing(USER_IS_COMPLETE_FUNCTION_ARN_ENV))
            .map_err(failure)?;

        let result = framework.invoke_user_function(function_arn, event).await?;
        match merge_is_complete(event, decode_is_complete_result(result)?)? {
            // The waiter hands this payload to on_timeout once it gives up,
            // so it must be the whole event including the callback URL.
            IsCompleteOutcome::Pending => {
                let payload = serde_json::to_string(event).map_err(failure)?;
                Err(RetryRequest::new(payload).into())
            }
            IsCompleteOutcome::Complete(complete) => framework
                .reporter
                .submit(
                    CompletionStatus::Success,
                    &complete,
                    &ResponseOptions::with_no_echo(event.no_echo),
                )
                .await
                .map_err(failure),
        }
    }
}

fn failure<E>(error: E) -> HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    anyhow::Error::new(error).into()
}

fn to_log_json(event: &ProvisioningEvent) -> String {
    serde_json::to_string(event).unwrap_or_default()
}
