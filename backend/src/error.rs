use thiserror::Error;
use tracing::warn;
use warp::http::StatusCode;
use warp::{reject::Reject, Rejection, Reply};

use crate::agents::{ModelError, RegistryError};
use crate::logging::RequestId;
use crate::middleware::tag_response;
use crate::retrieval::CollectionError;

#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Timeout(String),

    #[error("Upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Error {0} in DB")]
    InvalidQuery(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl Reject for ApiError {}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ApiError::InvalidQuery(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            ApiError::Unavailable(_) => "Service unavailable",
            ApiError::Timeout(_) => "Upstream request timed out",
            ApiError::Upstream { .. } => "Upstream error",
            ApiError::InvalidQuery(_) => "Unprocessable query",
            ApiError::BadRequest(_) => "Bad request",
            ApiError::NotFound(_) => "Not found",
            ApiError::MethodNotAllowed => "Method not allowed",
            ApiError::InternalError(_) => "Internal server error",
        }
    }

    pub fn into_response(self) -> warp::reply::Response {
        let json = warp::reply::json(&serde_json::json!({
            "error": self.message(),
            "details": self.to_string(),
        }));
        warp::reply::with_status(json, self.status()).into_response()
    }
}

impl From<CollectionError> for ApiError {
    fn from(err: CollectionError) -> Self {
        match err {
            CollectionError::InvalidQuery(message) => ApiError::InvalidQuery(message),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Unreachable(_) => {
                ApiError::Unavailable("Inference backend is currently unavailable".to_string())
            }
            ModelError::Timeout(_) => {
                ApiError::Timeout("Inference backend request timed out".to_string())
            }
            ModelError::Http { status, body } => ApiError::Upstream { status, body },
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Agent(crate::agents::AgentError::Model(model)) => model.into(),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

/// Renders requests no route accepted. They get their own correlation id,
/// like any handled request.
pub async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Rejection> {
    let api_err = if let Some(api_err) = err.find::<ApiError>() {
        api_err.clone()
    } else if let Some(body_err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        ApiError::BadRequest(body_err.to_string())
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        ApiError::BadRequest("request body is too large".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        ApiError::MethodNotAllowed
    } else if err.is_not_found() {
        ApiError::NotFound("no route for this path".to_string())
    } else {
        ApiError::InternalError(format!("{:?}", err))
    };

    let request_id = RequestId::generate();
    let status = api_err.status();
    request_id
        .scope(async { warn!("Rejected request with {}: {}", status, api_err) })
        .await;
    Ok(tag_response(api_err.into_response(), &request_id))
}
