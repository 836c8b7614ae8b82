use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const VECTOR_DIM: usize = 256;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding service unreachable: {0}")]
    Unreachable(String),

    #[error("embedding service returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Hashed bag-of-words embedding. Deterministic and offline.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn embed_text(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; VECTOR_DIM];

        for token in text
            .split(|ch: char| !ch.is_alphanumeric() && ch != '_')
            .filter(|token| token.len() >= 3)
        {
            let token = token.to_lowercase();
            let digest = Sha256::digest(token.as_bytes());
            let idx = u16::from_le_bytes([digest[0], digest[1]]) as usize % VECTOR_DIM;
            let sign = if digest[2] % 2 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| Self::embed_text(text)).collect())
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for an external `/embed` service.
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
}

impl HttpEmbedder {
    pub fn new(base_url: &str) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EmbeddingError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}/embed", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "texts": texts }))
            .send()
            .await
            .map_err(|e| EmbeddingError::Unreachable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbeddingError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        if parsed.embeddings.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}
