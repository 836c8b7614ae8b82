use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agents::tool::{Tool, ToolError};
use crate::retrieval::{DocumentQuery, DocumentSource};

pub const DEFAULT_N_DOCUMENTS: usize = 2;
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 1.0;

#[derive(Debug, Deserialize)]
struct DocumentArguments {
    query: String,
    #[serde(default = "default_n_documents")]
    n_documents: usize,
    #[serde(default = "default_distance_threshold")]
    distance_threshold: f32,
}

fn default_n_documents() -> usize {
    DEFAULT_N_DOCUMENTS
}

fn default_distance_threshold() -> f32 {
    DEFAULT_DISTANCE_THRESHOLD
}

/// Queries the retrieval service for documents close to a query.
pub struct DocumentRequestTool {
    source: Arc<dyn DocumentSource>,
}

impl DocumentRequestTool {
    pub fn new(source: Arc<dyn DocumentSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Tool for DocumentRequestTool {
    fn name(&self) -> &str {
        "document_request"
    }

    fn description(&self) -> &str {
        "Queries a vector database for entries relevant to the query. Returns a list of \
         documents with their distance to the query; the higher the distance, the less relevant \
         the document. A distance_threshold around 0.8 to 0.9 is a good start. If nothing comes \
         back, raise the threshold or rephrase the query with synonyms of its key words."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The query for the database" },
                "n_documents": {
                    "type": "integer",
                    "description": "Number of documents to request, at least 1",
                    "default": DEFAULT_N_DOCUMENTS
                },
                "distance_threshold": {
                    "type": "number",
                    "description": "Maximum distance to the query",
                    "default": DEFAULT_DISTANCE_THRESHOLD
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let args: DocumentArguments = serde_json::from_value(arguments)
            .map_err(|e| ToolError::invalid_arguments(self.name(), e))?;
        if args.query.trim().is_empty() {
            return Err(ToolError::invalid_arguments(self.name(), "'query' must not be empty"));
        }

        let request = DocumentQuery {
            query: args.query,
            n_documents: args.n_documents,
            distance_threshold: args.distance_threshold,
        };
        let documents = self
            .source
            .get_documents(&request)
            .await
            .map_err(|e| ToolError::with_status(e.user_message(), e.status()))?;

        if documents.is_empty() {
            return Ok(format!(
                "No documents closer than {} to the query. Raise the threshold or rephrase the query.",
                request.distance_threshold
            ));
        }
        serde_json::to_string_pretty(&documents).map_err(|e| ToolError::new(e.to_string()))
    }
}
