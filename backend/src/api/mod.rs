use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use tracing::info;
use warp::{Filter, Rejection, Reply};

use crate::error::{handle_rejection, ApiError};
use crate::logging::RequestId;
use crate::metrics;
use crate::middleware::{cors, tag_response, with_request_id};

mod agent;
mod rag;

pub use agent::{AgentContext, AgentRequest};
pub use rag::{DocumentRequest, RagContext};

const MAX_BODY_BYTES: u64 = 64 * 1024;

pub fn health() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({ "status": "healthy" })))
}

/// Routes of the retrieval service.
pub fn rag_routes(
    ctx: Arc<RagContext>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let get_documents = warp::path("get_documents")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_context(ctx))
        .and(with_request_id())
        .and_then(rag::handle_get_documents);

    health()
        .or(get_documents)
        .or(metrics::route())
        .recover(handle_rejection)
        .with(cors())
}

/// Routes of the agent service.
pub fn agent_routes(
    ctx: Arc<AgentContext>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let query_agent = warp::path("query_agent")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_context(ctx))
        .and(with_request_id())
        .and_then(agent::handle_query_agent);

    health()
        .or(query_agent)
        .or(metrics::route())
        .recover(handle_rejection)
        .with(cors())
}

/// Runs a handler inside the request's correlation scope. The access line is
/// logged there too, so it carries the id the client gets back.
async fn serve_scoped<F>(
    request_id: RequestId,
    method: &str,
    path: &str,
    handler: F,
) -> warp::reply::Response
where
    F: Future<Output = warp::reply::Response>,
{
    let started = Instant::now();
    let response = request_id
        .scope(async {
            let response = handler.await;
            info!(
                "{} {} {} {}ms",
                method,
                path,
                response.status().as_u16(),
                started.elapsed().as_millis()
            );
            response
        })
        .await;
    metrics::record_request(path, response.status());
    tag_response(response, &request_id)
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Request body deserialize error: {}", e)))
}

fn with_context<T: Send + Sync>(
    ctx: Arc<T>,
) -> impl Filter<Extract = (Arc<T>,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}
