use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use crate::error::AppError;
use crate::models::StatusResponse;
use crate::state::AppState;

/// `GET /api/v1/status/{id}` (`spec.md` §6).
pub async fn status(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<StatusResponse>, AppError> {
    let job = state.registry.get(&id).ok_or(AppError::JobNotFound)?;
    Ok(Json(StatusResponse::from(&job)))
}
