use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;

use crate::error::AppError;
use crate::models::{CancelResponse, JobState};
use crate::registry::CancelOutcome;
use crate::state::AppState;

/// `POST /api/v1/cancel/{id}` (`spec.md` §6, §4.2): a `pending` job is
/// cancelled immediately; a `processing` job is flagged and the worker
/// observes it at its next checkpoint; a terminal job is rejected with 409.
pub async fn cancel(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Json<CancelResponse>, AppError> {
    let outcome = state.registry.request_cancel(&id)?;

    let status = match outcome {
        CancelOutcome::CancelledImmediately => {
            metrics::gauge!("processing_jobs_pending").decrement(1.0);
            tracing::info!(job_id = %id, "job cancelled before pickup");
            JobState::Cancelled
        }
        CancelOutcome::MarkedForCancellation => {
            tracing::info!(job_id = %id, "cancellation requested for running job");
            JobState::Cancelling
        }
        CancelOutcome::NotCancellable(state) => return Err(AppError::NotCancellable(state)),
    };

    Ok(Json(CancelResponse { job_id: id, status }))
}
