use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Physical id reported for a CREATE that failed before a resource existed.
/// A later DELETE carrying this id is acknowledged without running handlers.
pub const CREATE_FAILED_PHYSICAL_ID_MARKER: &str =
    "AWSCDK::CustomResourceProviderFramework::CREATE_FAILED";

/// Physical id reported when an event reached completion without one.
pub const MISSING_PHYSICAL_ID_MARKER: &str =
    "AWSCDK::CustomResourceProviderFramework::MISSING_PHYSICAL_ID";

/// Placeholder that replaces the pre-signed callback URL wherever an event is
/// logged or forwarded to user code.
pub const SANITIZED_RESPONSE_URL: &str = "...";

pub type ResultData = Map<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One CloudFormation custom resource request.
///
/// Fields the runtime does not interpret are kept in `extra` so the event can
/// be handed to the waiter and read back without losing anything.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ProvisioningEvent {
    pub request_type: RequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token: Option<String>,
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    pub stack_id: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty_object")]
    pub resource_properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResultData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_echo: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProvisioningEvent {
    /// The physical id, treating an empty string the same as an absent one.
    pub fn physical_resource_id(&self) -> Option<&str> {
        self.physical_resource_id
            .as_deref()
            .filter(|value| !value.is_empty())
    }

    pub fn is_delete_after_failed_create(&self) -> bool {
        self.request_type == RequestType::Delete
            && self.physical_resource_id() == Some(CREATE_FAILED_PHYSICAL_ID_MARKER)
    }

    /// Copy of the event that is safe to log or pass to user functions.
    pub fn sanitized(&self) -> Self {
        Self {
            response_url: SANITIZED_RESPONSE_URL.to_string(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CompletionStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
}

impl CompletionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseOptions {
    pub reason: Option<String>,
    pub no_echo: Option<bool>,
}

impl ResponseOptions {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            no_echo: None,
        }
    }

    pub fn with_no_echo(no_echo: Option<bool>) -> Self {
        Self {
            reason: None,
            no_echo,
        }
    }

    pub fn suppresses_echo(&self) -> bool {
        self.no_echo.unwrap_or(false)
    }
}

/// Body PUT to the pre-signed callback URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct StatusPayload {
    pub status: CompletionStatus,
    pub reason: String,
    pub stack_id: String,
    pub request_id: String,
    pub physical_resource_id: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_echo: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ResultData>,
}

pub fn build_status_payload(
    status: CompletionStatus,
    event: &ProvisioningEvent,
    options: &ResponseOptions,
) -> StatusPayload {
    let reason = options
        .reason
        .as_deref()
        .filter(|value| !value.is_empty())
        .unwrap_or(status.as_str())
        .to_string();

    StatusPayload {
        status,
        reason,
        stack_id: event.stack_id.clone(),
        request_id: event.request_id.clone(),
        physical_resource_id: event
            .physical_resource_id()
            .unwrap_or(MISSING_PHYSICAL_ID_MARKER)
            .to_string(),
        logical_resource_id: event.logical_resource_id.clone(),
        no_echo: options.no_echo,
        data: event.data.clone(),
    }
}

fn null_as_empty_object<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Map<String, Value>>::deserialize(deserializer).map(Option::unwrap_or_default)
}
