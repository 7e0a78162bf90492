use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;

use crate::error::AppError;
use crate::models::{Priority, UploadResponse};
use crate::state::AppState;
use crate::store::{CapturedUpload, FileStore};

/// `POST /api/v1/upload` (`spec.md` §6): streams the file field straight to
/// disk as soon as it is encountered (multipart fields can only be read in
/// the order the client sent them), then validates the accumulated form
/// once every field has been seen, cleaning up the partial upload on any
/// failure discovered afterward. Every outcome is recorded on
/// `uploads_total{status=...}`, and every validation failure additionally on
/// `upload_validation_failures_total{reason=...}` (`SPEC_FULL.md` §4.1,
/// mirroring `app/metrics.py`'s `MetricsTracker`).
pub async fn upload(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut captured_path: Option<PathBuf> = None;
    let result = run_upload(&state, multipart, &mut captured_path).await;

    match &result {
        Ok(_) => {
            metrics::counter!("uploads_total", "status" => "accepted").increment(1);
        }
        Err(err) => {
            if let Some(path) = captured_path {
                state.file_store.delete(&path).await;
            }
            metrics::counter!("uploads_total", "status" => "rejected").increment(1);
            metrics::counter!("upload_validation_failures_total", "reason" => failure_reason(err)).increment(1);
        }
    }

    result
}

/// Maps an `AppError` to the label recorded on `upload_validation_failures_total`.
fn failure_reason(err: &AppError) -> &'static str {
    match err {
        AppError::InvalidFilename(_) => "invalid_filename",
        AppError::InvalidExtension(_) => "invalid_extension",
        AppError::EmptyFile => "empty_file",
        AppError::NotGcode => "not_gcode",
        AppError::ParameterOutOfRange(_) => "parameter_out_of_range",
        AppError::FileTooLarge(_) => "file_too_large",
        _ => "other",
    }
}

/// Parses and validates the multipart form, capturing the upload along the
/// way. `captured_path` is set as soon as a file has actually landed on disk
/// so the caller can clean it up regardless of which later check fails.
async fn run_upload(
    state: &AppState,
    mut multipart: Multipart,
    captured_path: &mut Option<PathBuf>,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut original_filename: Option<String> = None;
    let mut captured: Option<CapturedUpload> = None;
    let mut start_at_layer = state.config.default_start_at_layer;
    let mut extrusion_multiplier = state.config.default_extrusion_multiplier;
    let mut priority: u8 = 1;
    let id = uuid::Uuid::new_v4().to_string();

    while let Some(field) = multipart.next_field().await.map_err(|e| anyhow::anyhow!(e))? {
        match field.name().unwrap_or_default() {
            "file" => {
                let name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::InvalidFilename("No filename provided".into()))?;
                let sanitized = FileStore::sanitize(&name)?;
                state.file_store.validate_extension(&sanitized)?;
                let result = state.file_store.capture_upload(&id, &sanitized, field).await?;
                *captured_path = Some(result.path.clone());
                captured = Some(result);
                original_filename = Some(name);
            }
            "start_at_layer" => {
                let text = field.text().await.map_err(|e| anyhow::anyhow!(e))?;
                start_at_layer = text
                    .parse()
                    .map_err(|_| AppError::ParameterOutOfRange("start_at_layer must be a non-negative integer".into()))?;
            }
            "extrusion_multiplier" => {
                let text = field.text().await.map_err(|e| anyhow::anyhow!(e))?;
                extrusion_multiplier = text
                    .parse()
                    .map_err(|_| AppError::ParameterOutOfRange("extrusion_multiplier must be a number".into()))?;
            }
            "priority" => {
                let text = field.text().await.map_err(|e| anyhow::anyhow!(e))?;
                priority = text
                    .parse()
                    .map_err(|_| AppError::ParameterOutOfRange("priority must be an integer".into()))?;
            }
            _ => {}
        }
    }

    let original_filename = original_filename.ok_or_else(|| AppError::InvalidFilename("No file field provided".into()))?;
    let captured = captured.ok_or_else(|| AppError::InvalidFilename("No file field provided".into()))?;

    validate_form(state, extrusion_multiplier, priority)?;
    FileStore::sniff_gcode(&captured.head_chunk)?;

    let sanitized = FileStore::sanitize(&original_filename)?;
    let output_path = state.file_store.output_path(&id, &sanitized);

    let job = state.registry.register_with_id(
        id,
        original_filename.clone(),
        start_at_layer,
        extrusion_multiplier,
        priority,
        captured.path,
        output_path,
    );

    metrics::gauge!("processing_jobs_pending").increment(1.0);
    tracing::info!(job_id = %job.id, filename = %original_filename, size = captured.size, "upload accepted");

    state.worker_pool.submit(job.id.clone());

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            job_id: job.id,
            filename: original_filename,
            file_size: captured.size,
            created_at: job.created_at,
            status: job.state,
            message: "File uploaded successfully and queued for processing".into(),
        }),
    ))
}

fn validate_form(state: &AppState, extrusion_multiplier: f64, priority: u8) -> Result<(), AppError> {
    if extrusion_multiplier < state.config.min_extrusion_multiplier
        || extrusion_multiplier > state.config.max_extrusion_multiplier
    {
        return Err(AppError::ParameterOutOfRange(format!(
            "extrusion_multiplier must be between {} and {}",
            state.config.min_extrusion_multiplier, state.config.max_extrusion_multiplier
        )));
    }
    if !Priority::in_range(priority) {
        return Err(AppError::ParameterOutOfRange("priority must be between 0 and 2".into()));
    }
    Ok(())
}
