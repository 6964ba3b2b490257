use async_trait::async_trait;
use aws_sdk_lambda::types::InvocationType;
use cfn_provider_lambda::adapters::invoke::{InvocationResponse, InvokeError, UserFunctionInvoker};
use cfn_provider_lambda::adapters::transport::ReqwestTransport;
use cfn_provider_lambda::adapters::waiter::{WaiterError, WaiterLauncher};
use cfn_provider_lambda::config::{Entrypoint, FrameworkConfig, ReporterConfig};
use cfn_provider_lambda::handlers::framework::ProviderFramework;
use cfn_provider_lambda::handlers::reporter::{CompletionReporter, GuardError};
use cfn_provider_lambda::logging::init_tracing;
use cfn_provider_lambda::runtime::contract::ProvisioningEvent;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;

struct AwsLambdaInvoker {
    lambda_client: aws_sdk_lambda::Client,
}

#[async_trait]
impl UserFunctionInvoker for AwsLambdaInvoker {
    async fn invoke(
        &self,
        function_arn: &str,
        payload: &[u8],
    ) -> Result<InvocationResponse, InvokeError> {
        let output = self
            .lambda_client
            .invoke()
            .function_name(function_arn)
            .invocation_type(InvocationType::RequestResponse)
            .set_payload(Some(payload.to_vec().into()))
            .send()
            .await
            .map_err(|error| InvokeError(format!("failed to invoke user function: {error}")))?;

        Ok(InvocationResponse {
            payload: output
                .payload()
                .map(|blob| blob.as_ref().to_vec())
                .unwrap_or_default(),
            function_error: output.function_error().map(str::to_string),
        })
    }
}

struct StepFunctionsWaiter {
    sfn_client: aws_sdk_sfn::Client,
}

#[async_trait]
impl WaiterLauncher for StepFunctionsWaiter {
    async fn start_execution(
        &self,
        state_machine_arn: &str,
        name: &str,
        input: &str,
    ) -> Result<(), WaiterError> {
        self.sfn_client
            .start_execution()
            .state_machine_arn(state_machine_arn)
            .name(name)
            .input(input)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| WaiterError(format!("failed to start waiter execution: {error}")))
    }
}

struct RuntimeDependencies {
    entrypoint: Entrypoint,
    config: FrameworkConfig,
    reporter: CompletionReporter<ReqwestTransport>,
    invoker: AwsLambdaInvoker,
    waiter: StepFunctionsWaiter,
}

impl RuntimeDependencies {
    fn framework(&self) -> ProviderFramework<'_, ReqwestTransport> {
        ProviderFramework::new(&self.reporter, &self.invoker, &self.waiter, &self.config)
    }
}

async fn handle_request(
    deps: &RuntimeDependencies,
    event: LambdaEvent<Value>,
) -> Result<Value, Error> {
    let framework = deps.framework();
    match deps.entrypoint {
        Entrypoint::OnEvent => {
            let event = parse_event(event.payload)?;
            framework.on_event(event).await.map_err(guard_error)?;
        }
        Entrypoint::IsComplete => {
            let event = parse_event(event.payload)?;
            framework.is_complete(event).await.map_err(guard_error)?;
        }
        Entrypoint::OnTimeout => {
            framework.on_timeout(&event.payload).await?;
        }
    }
    Ok(Value::Null)
}

fn parse_event(payload: Value) -> Result<ProvisioningEvent, Error> {
    serde_json::from_value(payload)
        .map_err(|error| Error::from(format!("invalid custom resource event: {error}")))
}

/// A retry leaves the invocation with the retry payload as its error message,
/// which is what the waiter replays.
fn guard_error(error: GuardError) -> Error {
    match error {
        GuardError::Retry(request) => Error::from(request),
        GuardError::Report(error) => Error::from(error),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let deps = RuntimeDependencies {
        entrypoint: Entrypoint::from_env()?,
        config: FrameworkConfig::from_env(),
        reporter: CompletionReporter::new(ReqwestTransport::new()?, ReporterConfig::from_env()?),
        invoker: AwsLambdaInvoker {
            lambda_client: aws_sdk_lambda::Client::new(&aws_config),
        },
        waiter: StepFunctionsWaiter {
            sfn_client: aws_sdk_sfn::Client::new(&aws_config),
        },
    };

    let deps = &deps;
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        handle_request(deps, event).await
    }))
    .await
}
