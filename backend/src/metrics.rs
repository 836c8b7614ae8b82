use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "http_requests_total",
        "Handled HTTP requests by endpoint and status",
        &["endpoint", "status"]
    )
    .expect("http_requests_total is registered once")
});

pub static DOCUMENTS_RETURNED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "documents_returned_total",
        "Documents returned after distance filtering, by outcome",
        &["outcome"]
    )
    .expect("documents_returned_total is registered once")
});

pub static TOOL_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "agent_tool_failures_total",
        "Failed tool or sub-agent calls by tool name",
        &["tool"]
    )
    .expect("agent_tool_failures_total is registered once")
});

pub fn record_request(endpoint: &str, status: StatusCode) {
    HTTP_REQUESTS
        .with_label_values(&[endpoint, status.as_str()])
        .inc();
}

pub fn route() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(render)
}

fn render() -> warp::reply::Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            warp::reply::with_header(buffer, "Content-Type", encoder.format_type()).into_response()
        }
        Err(e) => warp::reply::with_status(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exposes_recorded_counters() {
        record_request("/health", StatusCode::OK);
        let res = warp::test::request()
            .method("GET")
            .path("/metrics")
            .reply(&route())
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body = String::from_utf8(res.body().to_vec()).unwrap();
        assert!(body.contains("http_requests_total"));
    }
}
