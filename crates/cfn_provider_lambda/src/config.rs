//! Environment-driven configuration, read once at cold start.

use std::str::FromStr;

use thiserror::Error;

use crate::runtime::retry::RetryPolicy;

pub const PROVIDER_ENTRYPOINT_ENV: &str = "PROVIDER_ENTRYPOINT";
pub const INCLUDE_STACK_TRACES_ENV: &str = "INCLUDE_STACK_TRACES";
pub const USER_ON_EVENT_FUNCTION_ARN_ENV: &str = "USER_ON_EVENT_FUNCTION_ARN";
pub const USER_IS_COMPLETE_FUNCTION_ARN_ENV: &str = "USER_IS_COMPLETE_FUNCTION_ARN";
pub const WAITER_STATE_MACHINE_ARN_ENV: &str = "WAITER_STATE_MACHINE_ARN";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be configured")]
    Missing(&'static str),
    #[error("{key} has unsupported value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Settings of the completion reporter.
///
/// `include_stack_traces` selects whether FAILED reasons carry the full
/// failure detail or only the compact message. Set it before reporting
/// starts; it is not meant to change while invocations are in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReporterConfig {
    pub include_stack_traces: bool,
    pub retry: RetryPolicy,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            include_stack_traces: true,
            retry: RetryPolicy::default(),
        }
    }
}

impl ReporterConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let include_stack_traces = match non_empty(lookup(INCLUDE_STACK_TRACES_ENV)) {
            Some(value) => parse_flag(INCLUDE_STACK_TRACES_ENV, &value)?,
            None => true,
        };
        Ok(Self {
            include_stack_traces,
            ..Self::default()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameworkConfig {
    pub on_event_function_arn: Option<String>,
    pub is_complete_function_arn: Option<String>,
    pub waiter_state_machine_arn: Option<String>,
}

impl FrameworkConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            on_event_function_arn: non_empty(lookup(USER_ON_EVENT_FUNCTION_ARN_ENV)),
            is_complete_function_arn: non_empty(lookup(USER_IS_COMPLETE_FUNCTION_ARN_ENV)),
            waiter_state_machine_arn: non_empty(lookup(WAITER_STATE_MACHINE_ARN_ENV)),
        }
    }

    pub fn on_event_function(&self) -> Result<&str, ConfigError> {
        self.on_event_function_arn
            .as_deref()
            .ok_or(ConfigError::Missing(USER_ON_EVENT_FUNCTION_ARN_ENV))
    }

    /// `None` means the provider is synchronous and completes in on-event.
    pub fn is_complete_function(&self) -> Option<&str> {
        self.is_complete_function_arn.as_deref()
    }

    pub fn waiter_state_machine(&self) -> Result<&str, ConfigError> {
        self.waiter_state_machine_arn
            .as_deref()
            .ok_or(ConfigError::Missing(WAITER_STATE_MACHINE_ARN_ENV))
    }
}

/// Which framework handler a Lambda function built from this binary serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entrypoint {
    OnEvent,
    IsComplete,
    OnTimeout,
}

impl Entrypoint {
    pub fn from_env() -> Result<Self, ConfigError> {
        let value = non_empty(std::env::var(PROVIDER_ENTRYPOINT_ENV).ok())
            .ok_or(ConfigError::Missing(PROVIDER_ENTRYPOINT_ENV))?;
        value.parse()
    }
}

impl FromStr for Entrypoint {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "on_event" | "onEvent" => Ok(Self::OnEvent),
            "is_complete" | "isComplete" => Ok(Self::IsComplete),
            "on_timeout" | "onTimeout" => Ok(Self::OnTimeout),
            other => Err(ConfigError::Invalid {
                key: PROVIDER_ENTRYPOINT_ENV,
                value: other.to_string(),
            }),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}
