use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub const FINAL_ANSWER: &str = "final_answer";

/// A failed tool call. `status` carries an HTTP-style code when the failure
/// came from a remote service.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
    pub status: Option<u16>,
}

impl ToolError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn invalid_arguments(tool: &str, reason: impl std::fmt::Display) -> Self {
        Self::new(format!("invalid arguments for {}: {}", tool, reason))
    }

    /// How the failure is reported back to the model and the caller.
    pub fn report(&self) -> String {
        match self.status {
            Some(status) => format!("{} (status {})", self.message, status),
            None => self.message.clone(),
        }
    }
}

/// A capability an agent may invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the `arguments` object.
    fn parameters(&self) -> Value;
    async fn call(&self, arguments: Value) -> Result<String, ToolError>;
}

/// Reads a required string argument.
pub fn required_str<'a>(
    tool: &str,
    arguments: &'a Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ToolError::invalid_arguments(tool, format!("'{}' must be a non-empty string", key))
        })
}
