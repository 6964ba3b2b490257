//! Decoding of user-function responses and the rules for folding them back
//! into the provisioning event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::{ProvisioningEvent, RequestType, ResultData};
use crate::error::{ContractError, HandlerError};

/// Response of the user's on-event function. A null response is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct OnEventResult {
    #[serde(default)]
    pub physical_resource_id: Option<String>,
    #[serde(default)]
    pub data: Option<ResultData>,
    #[serde(default)]
    pub no_echo: Option<bool>,
}

/// Response of the user's is-complete function.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct IsCompleteResult {
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub data: Option<ResultData>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IsCompleteOutcome {
    Pending,
    Complete(ProvisioningEvent),
}

/// Parses a raw invocation payload. An empty payload reads as `{}`.
pub fn parse_json_payload(payload: &[u8]) -> Result<Value, ContractError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(payload)
        .map_err(|_| ContractError::InvalidUserPayload(String::from_utf8_lossy(payload).into()))
}

pub fn decode_on_event_result(payload: Value) -> Result<OnEventResult, ContractError> {
    serde_json::from_value::<Option<OnEventResult>>(payload.clone())
        .map(Option::unwrap_or_default)
        .map_err(|_| ContractError::InvalidUserPayload(payload.to_string()))
}

pub fn decode_is_complete_result(payload: Value) -> Result<IsCompleteResult, ContractError> {
    serde_json::from_value::<Option<IsCompleteResult>>(payload.clone())
        .map(Option::unwrap_or_default)
        .map_err(|_| ContractError::InvalidUserPayload(payload.to_string()))
}

/// Physical id to use when the user function did not return one.
pub fn default_physical_resource_id(event: &ProvisioningEvent) -> Option<String> {
    match event.request_type {
        RequestType::Create => Some(event.request_id.clone()),
        RequestType::Update | RequestType::Delete => {
            event.physical_resource_id().map(str::to_string)
        }
    }
}

/// Folds an on-event result into the request. Result fields win; a DELETE
/// must keep its physical id.
pub fn create_response_event(
    request: &ProvisioningEvent,
    result: OnEventResult,
) -> Result<ProvisioningEvent, ContractError> {
    let returned_id = result
        .physical_resource_id
        .filter(|value| !value.is_empty());
    let physical_resource_id = returned_id
        .clone()
        .or_else(|| default_physical_resource_id(request));

    if request.request_type == RequestType::Delete
        && physical_resource_id.as_deref() != request.physical_resource_id()
    {
        return Err(ContractError::PhysicalIdChangedOnDelete {
            from: request.physical_resource_id().unwrap_or_default().to_string(),
            to: returned_id.unwrap_or_default(),
        });
    }

    let mut response = request.clone();
    response.physical_resource_id = physical_resource_id;
    if let Some(data) = result.data {
        response.data = Some(data);
    }
    if let Some(no_echo) = result.no_echo {
        response.no_echo = Some(no_echo);
    }
    Ok(response)
}

/// Decides whether the waiter is done. Completion merges result data over
/// the data already on the event.
pub fn merge_is_complete(
    event: &ProvisioningEvent,
    result: IsCompleteResult,
) -> Result<IsCompleteOutcome, ContractError> {
    if !result.is_complete {
        if result.data.as_ref().is_some_and(|data| !data.is_empty()) {
            return Err(ContractError::DataWhileIncomplete);
        }
        return Ok(IsCompleteOutcome::Pending);
    }

    let mut merged = event.data.clone().unwrap_or_default();
    merged.extend(result.data.unwrap_or_default());

    let mut complete = event.clone();
    complete.data = Some(merged);
    Ok(IsCompleteOutcome::Complete(complete))
}

/// Builds the failure reported when a user function raised an error.
///
/// The message points at the function's log group. When the function
/// returned a trace, the detail carries it after the message.
pub fn user_function_failure(function_arn: &str, payload: &Value) -> HandlerError {
    let error_message = payload
        .get("errorMessage")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .unwrap_or("error");
    let function_name = function_arn.rsplit(':').next().unwrap_or(function_arn);
    let message = format!("{error_message}\n\nLogs: /aws/lambda/{function_name}\n");

    let detail = match payload.get("trace").and_then(Value::as_array) {
        Some(trace) => std::iter::once(message.clone())
            .chain(
                trace
                    .iter()
                    .skip(1)
                    .map(|line| line.as_str().map_or_else(|| line.to_string(), str::to_string)),
            )
            .collect::<Vec<_>>()
            .join("\n"),
        None => message.clone(),
    };

    HandlerError::Failure { message, detail }
}

/// Recovers the waiter input from a Step Functions timeout event, whose
/// `Cause` holds the serialized error of the last is-complete attempt.
pub fn event_from_timeout(timeout_event: &Value) -> Result<ProvisioningEvent, ContractError> {
    let cause = timeout_event
        .get("Cause")
        .and_then(Value::as_str)
        .ok_or_else(|| ContractError::MalformedTimeoutEvent("missing \"Cause\"".to_string()))?;
    let cause: Value = serde_json::from_str(cause)
        .map_err(|error| ContractError::MalformedTimeoutEvent(format!("invalid cause: {error}")))?;
    let error_message = cause
        .get("errorMessage")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ContractError::MalformedTimeoutEvent("missing \"errorMessage\"".to_string())
        })?;
    serde_json::from_str(error_message).map_err(|error| {
        ContractError::MalformedTimeoutEvent(format!("invalid event in errorMessage: {error}"))
    })
}
