use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("inference backend not reachable: {0}")]
    Unreachable(String),

    #[error("inference request timed out: {0}")]
    Timeout(String),

    #[error("inference backend returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("inference request failed: {0}")]
    Request(String),

    #[error("invalid inference response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    fn classify(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ModelError::Timeout(err.to_string())
        } else if err.is_connect() {
            ModelError::Unreachable(err.to_string())
        } else {
            ModelError::Request(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError>;
}

/// OpenAI-compatible chat-completions client (Hugging Face router by default).
pub struct InferenceClient {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl InferenceClient {
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelError::Request(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
            api_key,
        })
    }
}

#[async_trait]
impl ChatModel for InferenceClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.2,
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(ModelError::classify)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        payload
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
            .ok_or_else(|| {
                ModelError::InvalidResponse(format!(
                    "response did not include assistant content: {}",
                    payload
                ))
            })
    }
}
