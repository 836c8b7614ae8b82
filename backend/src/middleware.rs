use std::convert::Infallible;

use warp::Filter;

use crate::logging::RequestId;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

pub fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_headers(vec![
            "User-Agent",
            "Origin",
            "Access-Control-Request-Method",
            "Access-Control-Request-Headers",
            "Content-Type",
            "Accept",
            "Content-Length",
        ])
        .allow_methods(vec!["POST", "GET", "OPTIONS"])
        .expose_headers(vec![REQUEST_ID_HEADER])
}

/// Hands every request a fresh correlation id.
pub fn with_request_id() -> impl Filter<Extract = (RequestId,), Error = Infallible> + Clone {
    warp::any().map(RequestId::generate)
}

pub fn tag_response(
    mut response: warp::reply::Response,
    request_id: &RequestId,
) -> warp::reply::Response {
    if let Ok(value) = warp::http::HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
