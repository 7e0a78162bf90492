//! Request-ID propagation and structured access logging (`spec.md` §6,
//! grounded in the original service's logging middleware): reads
//! `X-Request-ID` or mints one, logs method/path/status/duration once the
//! response is ready, and echoes the header back.

use std::time::Instant;

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use std::net::SocketAddr;
use tracing::Instrument;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn middleware(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into());

    let start = Instant::now();
    let span = tracing::info_span!("request", request_id = %request_id, %method, %path);

    let mut response = async move {
        let response = next.run(request).await;
        let elapsed = start.elapsed();
        let status = response.status().as_u16();
        tracing::info!(status, duration_ms = elapsed.as_secs_f64() * 1000.0, client_ip, "request completed");

        let method_label = method.to_string();
        metrics::counter!(
            "http_requests_total",
            "method" => method_label.clone(),
            "endpoint" => path.clone(),
            "status" => status.to_string(),
        )
        .increment(1);
        metrics::histogram!(
            "http_request_duration_seconds",
            "method" => method_label,
            "endpoint" => path,
        )
        .record(elapsed.as_secs_f64());

        response
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    response
}
