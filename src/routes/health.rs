use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    pending_jobs: usize,
    active_jobs: usize,
}

/// `GET /health` (`spec.md` §6): liveness plus a cheap snapshot of the
/// registry's queue depth.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        pending_jobs: state.registry.pending_count(),
        active_jobs: state.registry.active_count(),
    })
}

/// `GET /metrics` (`SPEC_FULL.md` §6): ancillary Prometheus exposition,
/// a thin wrapper over the installed recorder.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
