pub mod cancel;
pub mod download;
pub mod health;
pub mod status;
pub mod upload;

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Assembles the full router: the 5 `spec.md` §6 endpoints under `/api/v1`,
/// `/health` and `/metrics` at the root, and the ambient middleware stack
/// (CORS, `X-Content-Type-Options`/`X-Frame-Options`/`Referrer-Policy`,
/// tracing, request-id) wrapping all of it.
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/upload", post(upload::upload))
        .route("/status/{id}", get(status::status))
        .route("/download/{id}", get(download::download))
        .route("/cancel/{id}", post(cancel::cancel))
        .layer(axum::middleware::from_fn_with_state(state.clone(), crate::auth::require_api_key));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .layer(cors_layer(&state.config.cors_origins))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(axum::middleware::from_fn(crate::request_id::middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Ancillary (`spec.md` §1): origins come straight from config, no policy
/// beyond "reflect the configured allow-list, or `*`".
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([HeaderName::from_static("content-type"), HeaderName::from_static("x-api-key")]);

    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(AllowOrigin::any())
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}
