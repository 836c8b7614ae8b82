use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, error, info};
use warp::http::StatusCode;
use warp::{Rejection, Reply};

use super::{parse_body, serve_scoped};
use crate::agents::{AgentAnswer, AgentRegistry};
use crate::error::ApiError;
use crate::logging::RequestId;

/// Shared state of the agent service.
pub struct AgentContext {
    pub registry: AgentRegistry,
    pub min_query_words: usize,
}

#[derive(Debug, Deserialize)]
pub struct AgentRequest {
    pub query: String,
    #[serde(default)]
    pub full_result: bool,
}

pub async fn handle_query_agent(
    body: Bytes,
    ctx: Arc<AgentContext>,
    request_id: RequestId,
) -> Result<impl Reply, Rejection> {
    Ok(serve_scoped(request_id, "POST", "/query_agent", respond(body, &ctx)).await)
}

fn validate(query: &str, min_words: usize) -> Result<(), ApiError> {
    if query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }
    let words = query.split_whitespace().count();
    if words < min_words {
        return Err(ApiError::BadRequest(format!(
            "query must have at least {} words, got {}",
            min_words, words
        )));
    }
    Ok(())
}

async fn respond(body: Bytes, ctx: &AgentContext) -> warp::reply::Response {
    let request = parse_body::<AgentRequest>(&body)
        .and_then(|request| validate(&request.query, ctx.min_query_words).map(|_| request));
    let request = match request {
        Ok(request) => request,
        Err(err) => {
            info!("Rejected query: {}", err);
            return err.into_response();
        }
    };
    debug!("Received request: {:?}", request);

    match ctx.registry.run(&request.query, request.full_result).await {
        Ok(AgentAnswer::Text(answer)) => {
            info!("Answered query with {} characters", answer.len());
            warp::reply::with_status(answer, StatusCode::OK).into_response()
        }
        Ok(AgentAnswer::Full(result)) => {
            info!("Answered query in {} steps", result.steps.len());
            warp::reply::json(&result).into_response()
        }
        Err(err) => {
            error!("❗ Agent run failed: {}", err);
            ApiError::from(err).into_response()
        }
    }
}
