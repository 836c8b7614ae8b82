use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use tracing::{error, info, warn};
use warp::{Rejection, Reply};

use super::{parse_body, serve_scoped};
use crate::error::ApiError;
use crate::logging::RequestId;
use crate::metrics;
use crate::retrieval::{self, CollectionError, ScoredDocument, VectorCollection};

/// Shared state of the retrieval service.
pub struct RagContext {
    pub collection: Arc<dyn VectorCollection>,
    pub default_n_results: usize,
    pub default_distance_threshold: f32,
}

#[derive(Debug, Deserialize)]
pub struct DocumentRequest {
    pub query: String,
    #[serde(default, alias = "n_results")]
    pub n_documents: Option<i64>,
    #[serde(default)]
    pub distance_threshold: Option<f32>,
}

pub async fn handle_get_documents(
    body: Bytes,
    ctx: Arc<RagContext>,
    request_id: RequestId,
) -> Result<impl Reply, Rejection> {
    Ok(serve_scoped(request_id, "POST", "/get_documents", respond(body, &ctx)).await)
}

async fn respond(body: Bytes, ctx: &RagContext) -> warp::reply::Response {
    let request: DocumentRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(err) => {
            warn!("❗ {}", err);
            return err.into_response();
        }
    };
    info!("Received query: {}", request.query);

    match find_documents(request, ctx).await {
        Ok(documents) => {
            info!("Returning {} documents", documents.len());
            if documents.is_empty() {
                metrics::DOCUMENTS_RETURNED
                    .with_label_values(&["empty"])
                    .inc();
            } else {
                metrics::DOCUMENTS_RETURNED
                    .with_label_values(&["returned"])
                    .inc_by(documents.len() as u64);
            }
            warp::reply::json(&documents).into_response()
        }
        Err(err) => {
            error!("❗ Error in DB query: {}", err);
            ApiError::from(err).into_response()
        }
    }
}

async fn find_documents(
    request: DocumentRequest,
    ctx: &RagContext,
) -> Result<Vec<ScoredDocument>, CollectionError> {
    let n_results = match request.n_documents {
        None => ctx.default_n_results,
        Some(n) if n >= 1 => n as usize,
        Some(n) => {
            return Err(CollectionError::InvalidQuery(format!(
                "n_results must be at least 1, got {}",
                n
            )))
        }
    };
    let distance_threshold = request
        .distance_threshold
        .unwrap_or(ctx.default_distance_threshold);

    retrieval::get_documents(
        ctx.collection.as_ref(),
        &request.query,
        n_results,
        distance_threshold,
    )
    .await
}
