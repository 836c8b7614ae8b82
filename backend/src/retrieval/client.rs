use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use super::ScoredDocument;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Vector Database not reachable: {0}")]
    Unreachable(String),

    #[error("Vector Database request timed out: {0}")]
    Timeout(String),

    #[error("HTTP Error {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Request failed: {0}")]
    Request(String),
}

impl RetrievalError {
    pub fn status(&self) -> u16 {
        match self {
            RetrievalError::Unreachable(_) => 503,
            RetrievalError::Timeout(_) => 504,
            RetrievalError::Upstream { status, .. } => *status,
            RetrievalError::Request(_) => 500,
        }
    }

    /// The text an agent should see for this failure.
    pub fn user_message(&self) -> String {
        match self {
            RetrievalError::Unreachable(_) => "Vector DB is currently unavailable".to_string(),
            RetrievalError::Timeout(_) => "Vector DB request timed out".to_string(),
            RetrievalError::Upstream { body, .. } => format!("Error in DB Response:\n{}", body),
            RetrievalError::Request(message) => message.clone(),
        }
    }

    fn classify(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RetrievalError::Timeout(err.to_string())
        } else if err.is_connect() {
            RetrievalError::Unreachable(err.to_string())
        } else {
            RetrievalError::Request(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DocumentQuery {
    pub query: String,
    pub n_documents: usize,
    pub distance_threshold: f32,
}

/// Anything that can answer a document query. Injected into the RAG agent's tool.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn get_documents(
        &self,
        request: &DocumentQuery,
    ) -> Result<Vec<ScoredDocument>, RetrievalError>;
}

/// HTTP client for the retrieval service's `/get_documents` endpoint.
#[derive(Clone)]
pub struct RetrievalClient {
    client: reqwest::Client,
    endpoint: String,
}

impl RetrievalClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RetrievalError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl DocumentSource for RetrievalClient {
    async fn get_documents(
        &self,
        request: &DocumentQuery,
    ) -> Result<Vec<ScoredDocument>, RetrievalError> {
        debug!("Requesting documents for query '{}'", request.query);

        let result = async {
            let resp = self
                .client
                .post(&self.endpoint)
                .json(request)
                .send()
                .await
                .map_err(RetrievalError::classify)?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(RetrievalError::Upstream {
                    status: status.as_u16(),
                    body,
                });
            }

            resp.json::<Vec<ScoredDocument>>()
                .await
                .map_err(RetrievalError::classify)
        }
        .await;

        if let Err(e) = &result {
            error!("❗ {}", e);
        }
        result
    }
}
