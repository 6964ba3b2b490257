//! Completion reporting for custom resource events.
//!
//! [`CompletionReporter::submit`] delivers a SUCCESS/FAILED status to the
//! pre-signed callback URL. [`CompletionReporter::run_guarded`] wraps the
//! provisioning logic so that failures are always reported, retry requests
//! reach the waiter untouched, and a DELETE following a failed CREATE is
//! acknowledged without running anything.

use async_trait::async_trait;
use thiserror::Error;

use crate::adapters::transport::{CallbackRequest, ResponseTransport, TransportError};
use crate::config::ReporterConfig;
use crate::runtime::contract::{
    build_status_payload, CompletionStatus, ProvisioningEvent, RequestType, ResponseOptions,
    CREATE_FAILED_PHYSICAL_ID_MARKER,
};
use crate::runtime::error::{HandlerError, RetryRequest};
use crate::runtime::redaction::{logging_safe_url, redact_data_from_payload};

const COMPONENT: &str = "completion_reporter";

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("invalid callback URL: {0}")]
    InvalidUrl(String),
    #[error("failed to serialize status payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("failed to deliver response after {attempts} attempt(s): {source}")]
    Delivery {
        attempts: u32,
        #[source]
        source: TransportError,
    },
}

#[derive(Debug, Error)]
pub enum GuardError {
    /// The handler asked to be invoked again; nothing was reported.
    #[error("retry requested: {0}")]
    Retry(RetryRequest),
    #[error(transparent)]
    Report(#[from] ReporterError),
}

/// Provisioning logic run under [`CompletionReporter::run_guarded`].
///
/// On success the handler reports completion itself, since only it knows the
/// result data.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn handle(&self, event: &ProvisioningEvent) -> Result<(), HandlerError>;
}

pub struct CompletionReporter<T> {
    transport: T,
    config: ReporterConfig,
}

impl<T: ResponseTransport> CompletionReporter<T> {
    pub fn new(transport: T, config: ReporterConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn submit(
        &self,
        status: CompletionStatus,
        event: &ProvisioningEvent,
        options: &ResponseOptions,
    ) -> Result<(), ReporterError> {
        let payload = build_status_payload(status, event, options);
        let safe_url = logging_safe_url(&event.response_url)
            .map_err(|error| ReporterError::InvalidUrl(error.to_string()))?;

        let logged_payload = if options.suppresses_echo() {
            redact_data_from_payload(&payload)
        } else {
            payload.clone()
        };
        let logged_payload = serde_json::to_string(&logged_payload)?;
        tracing::info!(
            component = COMPONENT,
            event = "submit_response",
            url = %safe_url,
            payload = %logged_payload,
            "submit response to cloudformation"
        );

        let request = CallbackRequest {
            url: event.response_url.clone(),
            body: serde_json::to_string(&payload)?,
        };
        self.deliver_with_retries(&request).await
    }

    pub async fn run_guarded<H>(
        &self,
        event: &mut ProvisioningEvent,
        handler: &H,
    ) -> Result<(), GuardError>
    where
        H: ResourceHandler + ?Sized,
    {
        if event.is_delete_after_failed_create() {
            tracing::info!(
                component = COMPONENT,
                event = "ignored_delete",
                request_id = %event.request_id,
                "ignoring DELETE event caused by a failed CREATE event"
            );
            self.submit(CompletionStatus::Success, event, &ResponseOptions::default())
                .await?;
            return Ok(());
        }

        let (message, detail) = match handler.handle(event).await {
            Ok(()) => return Ok(()),
            Err(HandlerError::Retry(request)) => {
                tracing::info!(
                    component = COMPONENT,
                    event = "retry_requested",
                    request_id = %event.request_id,
                    "retry requested by handler"
                );
                return Err(GuardError::Retry(request));
            }
            Err(HandlerError::Failure { message, detail }) => (message, detail),
        };

        if event.physical_resource_id().is_none() {
            if event.request_type == RequestType::Create {
                tracing::info!(
                    component = COMPONENT,
                    event = "create_failed",
                    request_id = %event.request_id,
                    "CREATE failed, responding with a marker physical resource id so that the subsequent DELETE will be ignored"
                );
                event.physical_resource_id = Some(CREATE_FAILED_PHYSICAL_ID_MARKER.to_string());
            } else {
                // Only a CREATE can legitimately lack an id. Reporting still
                // goes ahead with the missing-id marker.
                tracing::warn!(
                    component = COMPONENT,
                    event = "malformed_event",
                    request = %serde_json::to_string(&event.sanitized()).unwrap_or_default(),
                    "malformed event, \"PhysicalResourceId\" is required"
                );
            }
        }

        tracing::error!(
            component = COMPONENT,
            event = "handler_failed",
            request_id = %event.request_id,
            error = %message,
            "handler failed"
        );
        let reason = if self.config.include_stack_traces {
            detail
        } else {
            message
        };
        self.submit(
            CompletionStatus::Failed,
            event,
            &ResponseOptions::with_reason(reason),
        )
        .await?;
        Ok(())
    }

    async fn deliver_with_retries(&self, request: &CallbackRequest) -> Result<(), ReporterError> {
        let policy = self.config.retry;
        let mut attempt = 1;
        loop {
            let error = match self.transport.put(request).await {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };

            let Some(delay) = policy.delay_after_attempt(attempt) else {
                tracing::error!(
                    component = COMPONENT,
                    event = "delivery_failed",
                    attempts = attempt,
                    error = %error,
                    "giving up on callback delivery"
                );
                return Err(ReporterError::Delivery {
                    attempts: attempt,
                    source: error,
                });
            };

            tracing::warn!(
                component = COMPONENT,
                event = "delivery_retry",
                attempt,
                delay = ?delay,
                error = %error,
                "callback delivery failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::{json, Map, Value};
    use tokio::time::Instant;

    use super::*;
    use crate::runtime::contract::MISSING_PHYSICAL_ID_MARKER;

    /// Records every PUT and fails the first `failures` of them.
    pub(crate) struct ScriptedTransport {
        failures: usize,
        attempts: Mutex<Vec<(CallbackRequest, Instant)>>,
    }

    impl ScriptedTransport {
        pub(crate) fn succeeding() -> Self {
            Self::failing_first(0)
        }

        pub(crate) fn failing_first(failures: usize) -> Self {
            Self {
                failures,
                attempts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn requests(&self) -> Vec<CallbackRequest> {
            self.attempts
                .lock()
                .expect("poisoned mutex")
                .iter()
                .map(|(request, _)| request.clone())
                .collect()
        }

        pub(crate) fn payloads(&self) -> Vec<Value> {
            self.requests()
                .iter()
                .map(|request| serde_json::from_str(&request.body).expect("body should parse"))
                .collect()
        }

        fn instants(&self) -> Vec<Instant> {
            self.attempts
                .lock()
                .expect("poisoned mutex")
                .iter()
                .map(|(_, at)| *at)
                .collect()
        }
    }

    #[async_trait]
    impl ResponseTransport for ScriptedTransport {
        async fn put(&self, request: &CallbackRequest) -> Result<(), TransportError> {
            let mut attempts = self.attempts.lock().expect("poisoned mutex");
            attempts.push((request.clone(), Instant::now()));
            if attempts.len() <= self.failures {
                return Err(TransportError::Status(503));
            }
            Ok(())
        }
    }

    struct StubHandler {
        calls: AtomicUsize,
        outcome: fn() -> Result<(), HandlerError>,
    }

    impl StubHandler {
        fn new(outcome: fn() -> Result<(), HandlerError>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                outcome,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ResourceHandler for StubHandler {
        async fn handle(&self, _event: &ProvisioningEvent) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn failing() -> Result<(), HandlerError> {
        Err(HandlerError::Failure {
            message: "boom".to_string(),
            detail: "boom\n    at provision (handler.rs:10)".to_string(),
        })
    }

    pub(crate) fn event(request_type: &str, physical_id: Option<&str>) -> ProvisioningEvent {
        let mut raw = json!({
            "RequestType": request_type,
            "ResponseURL": "http://x/y?t=1",
            "StackId": "s",
            "RequestId": "r",
            "LogicalResourceId": "L",
            "ResourceProperties": {}
        });
        if let Some(id) = physical_id {
            raw["PhysicalResourceId"] = json!(id);
        }
        serde_json::from_value(raw).expect("event should parse")
    }

    fn reporter(transport: ScriptedTransport) -> CompletionReporter<ScriptedTransport> {
        CompletionReporter::new(transport, ReporterConfig::default())
    }

    /// JSON log lines written by a test-scoped subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn lines(&self) -> Vec<Value> {
            let bytes = self.0.lock().expect("poisoned mutex");
            String::from_utf8_lossy(&bytes)
                .lines()
                .map(|line| serde_json::from_str(line).expect("log line should be json"))
                .collect()
        }

        fn raw(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().expect("poisoned mutex")).into_owned()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("poisoned mutex").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn submit_puts_failed_payload_to_callback_url() {
        let reporter = reporter(ScriptedTransport::succeeding());

        reporter
            .submit(
                CompletionStatus::Failed,
                &event("Create", None),
                &ResponseOptions::with_reason("boom"),
            )
            .await
            .expect("submit should pass");

        let requests = reporter.transport().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "http://x/y?t=1");
        assert_eq!(
            reporter.transport().payloads()[0],
            json!({
                "Status": "FAILED",
                "Reason": "boom",
                "StackId": "s",
                "RequestId": "r",
                "PhysicalResourceId": MISSING_PHYSICAL_ID_MARKER,
                "LogicalResourceId": "L"
            })
        );
    }

    #[tokio::test]
    async fn submit_keeps_real_data_on_the_wire_when_echo_is_suppressed() {
        let reporter = reporter(ScriptedTransport::succeeding());
        let mut event = event("Create", Some("key-1"));
        event.data = Some(Map::from_iter([("Secret".to_string(), json!("s3cr3t"))]));

        reporter
            .submit(
                CompletionStatus::Success,
                &event,
                &ResponseOptions::with_no_echo(Some(true)),
            )
            .await
            .expect("submit should pass");

        let payload = &reporter.transport().payloads()[0];
        assert_eq!(payload["NoEcho"], json!(true));
        assert_eq!(payload["Data"]["Secret"], json!("s3cr3t"));
    }

    #[tokio::test]
    async fn submit_logs_masked_url_and_redacted_data() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let reporter = reporter(ScriptedTransport::succeeding());
        let mut event = event("Create", Some("key-1"));
        event.data = Some(Map::from_iter([("Secret".to_string(), json!("s3cr3t"))]));
        reporter
            .submit(
                CompletionStatus::Success,
                &event,
                &ResponseOptions::with_no_echo(Some(true)),
            )
            .await
            .expect("submit should pass");

        let lines = logs.lines();
        let submitted: Vec<&Value> = lines
            .iter()
            .filter(|line| line["fields"]["event"] == json!("submit_response"))
            .collect();
        assert_eq!(submitted.len(), 1);
        let fields = &submitted[0]["fields"];
        assert_eq!(fields["url"], json!("http://x/y?***"));
        let logged: Value = serde_json::from_str(
            fields["payload"]
                .as_str()
                .expect("payload should be logged as a string"),
        )
        .expect("logged payload should be json");
        assert_eq!(logged["Data"], json!({"Secret": "*****"}));
        assert_eq!(logged["NoEcho"], json!(true));
        assert!(!logs.raw().contains("s3cr3t"));
        assert!(!logs.raw().contains("t=1"));
    }

    #[tokio::test]
    async fn submit_rejects_unparseable_callback_url() {
        let reporter = reporter(ScriptedTransport::succeeding());
        let mut event = event("Create", None);
        event.response_url = "not a url".to_string();

        let error = reporter
            .submit(CompletionStatus::Success, &event, &ResponseOptions::default())
            .await
            .expect_err("submit should fail");

        assert!(matches!(error, ReporterError::InvalidUrl(_)));
        assert!(reporter.transport().requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn submit_retries_until_fifth_attempt_succeeds() {
        let reporter = reporter(ScriptedTransport::failing_first(4));

        reporter
            .submit(
                CompletionStatus::Success,
                &event("Create", Some("p")),
                &ResponseOptions::default(),
            )
            .await
            .expect("fifth attempt should succeed");

        let instants = reporter.transport().instants();
        assert_eq!(instants.len(), 5);
        for pair in instants.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(1_000), "gap was {gap:?}");
            assert!(gap < Duration::from_millis(1_100), "gap was {gap:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submit_propagates_transport_error_after_five_attempts() {
        let reporter = reporter(ScriptedTransport::failing_first(usize::MAX));

        let error = reporter
            .submit(
                CompletionStatus::Success,
                &event("Create", Some("p")),
                &ResponseOptions::default(),
            )
            .await
            .expect_err("delivery should fail");

        assert!(matches!(
            error,
            ReporterError::Delivery {
                attempts: 5,
                source: TransportError::Status(503)
            }
        ));
        assert_eq!(reporter.transport().requests().len(), 5);
    }

    #[tokio::test]
    async fn guarded_skips_delete_after_failed_create() {
        let reporter = reporter(ScriptedTransport::succeeding());
        let handler = StubHandler::new(failing);
        let mut event = event("Delete", Some(CREATE_FAILED_PHYSICAL_ID_MARKER));

        reporter
            .run_guarded(&mut event, &handler)
            .await
            .expect("guarded run should pass");

        assert_eq!(handler.calls(), 0);
        let payloads = reporter.transport().payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["Status"], json!("SUCCESS"));
        assert_eq!(
            payloads[0]["PhysicalResourceId"],
            json!(CREATE_FAILED_PHYSICAL_ID_MARKER)
        );
    }

    #[tokio::test]
    async fn guarded_marks_failed_create_for_the_following_delete() {
        let reporter = reporter(ScriptedTransport::succeeding());
        let handler = StubHandler::new(failing);
        let mut event = event("Create", None);

        reporter
            .run_guarded(&mut event, &handler)
            .await
            .expect("failure should be reported");

        assert_eq!(handler.calls(), 1);
        assert_eq!(
            event.physical_resource_id.as_deref(),
            Some(CREATE_FAILED_PHYSICAL_ID_MARKER)
        );
        let payloads = reporter.transport().payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["Status"], json!("FAILED"));
        assert_eq!(
            payloads[0]["Reason"],
            json!("boom\n    at provision (handler.rs:10)")
        );
        assert_eq!(
            payloads[0]["PhysicalResourceId"],
            json!(CREATE_FAILED_PHYSICAL_ID_MARKER)
        );

        // The marked event, replayed as a DELETE, is absorbed.
        event.request_type = RequestType::Delete;
        reporter
            .run_guarded(&mut event, &handler)
            .await
            .expect("delete should be acknowledged");
        assert_eq!(handler.calls(), 1);
        assert_eq!(reporter.transport().payloads()[1]["Status"], json!("SUCCESS"));
    }

    #[tokio::test]
    async fn guarded_uses_compact_reason_when_stack_traces_are_disabled() {
        let reporter = CompletionReporter::new(
            ScriptedTransport::succeeding(),
            ReporterConfig {
                include_stack_traces: false,
                ..ReporterConfig::default()
            },
        );
        let handler = StubHandler::new(failing);

        reporter
            .run_guarded(&mut event("Create", None), &handler)
            .await
            .expect("failure should be reported");

        assert_eq!(reporter.transport().payloads()[0]["Reason"], json!("boom"));
    }

    #[tokio::test]
    async fn guarded_propagates_retry_without_reporting() {
        let reporter = reporter(ScriptedTransport::succeeding());
        let handler = StubHandler::new(|| Err(RetryRequest::new("{\"RequestId\":\"r\"}").into()));
        let mut event = event("Create", None);

        let error = reporter
            .run_guarded(&mut event, &handler)
            .await
            .expect_err("retry should propagate");

        let GuardError::Retry(request) = error else {
            panic!("expected retry");
        };
        assert_eq!(request.payload, "{\"RequestId\":\"r\"}");
        assert!(reporter.transport().requests().is_empty());
        assert_eq!(event.physical_resource_id, None);
    }

    #[tokio::test]
    async fn guarded_leaves_reporting_to_a_successful_handler() {
        let reporter = reporter(ScriptedTransport::succeeding());
        let handler = StubHandler::new(|| Ok(()));

        reporter
            .run_guarded(&mut event("Update", Some("p")), &handler)
            .await
            .expect("guarded run should pass");

        assert_eq!(handler.calls(), 1);
        assert!(reporter.transport().requests().is_empty());
    }

    #[tokio::test]
    async fn guarded_keeps_known_physical_id_on_failure() {
        let reporter = reporter(ScriptedTransport::succeeding());
        let handler = StubHandler::new(failing);
        let mut event = event("Update", Some("queue-1"));

        reporter
            .run_guarded(&mut event, &handler)
            .await
            .expect("failure should be reported");

        assert_eq!(event.physical_resource_id.as_deref(), Some("queue-1"));
        assert_eq!(
            reporter.transport().payloads()[0]["PhysicalResourceId"],
            json!("queue-1")
        );
    }

    // A non-CREATE event without a physical id is only logged as malformed;
    // the FAILED report still goes out with the missing-id marker and the
    // create-failed marker is not assigned.
    #[tokio::test]
    async fn guarded_reports_malformed_update_with_missing_marker() {
        let reporter = reporter(ScriptedTransport::succeeding());
        let handler = StubHandler::new(failing);
        let mut event = event("Update", None);

        reporter
            .run_guarded(&mut event, &handler)
            .await
            .expect("failure should be reported");

        assert_eq!(event.physical_resource_id, None);
        let payloads = reporter.transport().payloads();
        assert_eq!(payloads[0]["Status"], json!("FAILED"));
        assert_eq!(
            payloads[0]["PhysicalResourceId"],
            json!(MISSING_PHYSICAL_ID_MARKER)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn guarded_surfaces_delivery_failure_of_the_failed_report() {
        let reporter = reporter(ScriptedTransport::failing_first(usize::MAX));
        let handler = StubHandler::new(failing);

        let error = reporter
            .run_guarded(&mut event("Create", None), &handler)
            .await
            .expect_err("delivery should fail");

        assert!(matches!(
            error,
            GuardError::Report(ReporterError::Delivery { attempts: 5, .. })
        ));
    }
}
