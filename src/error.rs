use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::models::JobState;

/// RFC-7807-style Problem Details body. Every non-2xx response from this
/// service conforms to this shape.
#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl ProblemDetails {
    fn new(status: StatusCode, title: &str, detail: impl Into<String>) -> Self {
        Self {
            type_: "about:blank".into(),
            title: title.into(),
            status: status.as_u16(),
            detail: detail.into(),
            instance: None,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    InvalidFilename(String),
    #[error("{0}")]
    InvalidExtension(String),
    #[error("File is empty")]
    EmptyFile,
    #[error("File doesn't appear to contain valid G-code. Expected G-code commands and coordinates.")]
    NotGcode,
    #[error("{0}")]
    ParameterOutOfRange(String),
    #[error("{0}")]
    FileTooLarge(String),
    #[error("Job not found")]
    JobNotFound,
    #[error("Processed file not found")]
    OutputMissing,
    #[error("Job status is {0}, not ready for download")]
    JobNotReady(JobState),
    #[error("Job is already in a terminal state ({0}) and cannot be cancelled")]
    NotCancellable(JobState),
    #[error("Unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl AppError {
    fn problem(&self) -> (StatusCode, ProblemDetails) {
        match self {
            AppError::InvalidFilename(m) => (
                StatusCode::BAD_REQUEST,
                ProblemDetails::new(StatusCode::BAD_REQUEST, "Invalid filename", m.clone()),
            ),
            AppError::InvalidExtension(m) => (
                StatusCode::BAD_REQUEST,
                ProblemDetails::new(StatusCode::BAD_REQUEST, "Invalid file extension", m.clone()),
            ),
            AppError::EmptyFile => (
                StatusCode::BAD_REQUEST,
                ProblemDetails::new(StatusCode::BAD_REQUEST, "Empty file", self.to_string()),
            ),
            AppError::NotGcode => (
                StatusCode::BAD_REQUEST,
                ProblemDetails::new(StatusCode::BAD_REQUEST, "Invalid G-code content", self.to_string()),
            ),
            AppError::ParameterOutOfRange(m) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ProblemDetails::new(StatusCode::UNPROCESSABLE_ENTITY, "Invalid parameter value", m.clone()),
            ),
            AppError::FileTooLarge(m) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ProblemDetails::new(StatusCode::PAYLOAD_TOO_LARGE, "File too large", m.clone()),
            ),
            AppError::JobNotFound => (
                StatusCode::NOT_FOUND,
                ProblemDetails::new(StatusCode::NOT_FOUND, "Job not found", self.to_string()),
            ),
            AppError::OutputMissing => (
                StatusCode::NOT_FOUND,
                ProblemDetails::new(StatusCode::NOT_FOUND, "Output file not found", self.to_string()),
            ),
            AppError::JobNotReady(_) => (
                StatusCode::CONFLICT,
                ProblemDetails::new(StatusCode::CONFLICT, "Job not ready for download", self.to_string()),
            ),
            AppError::NotCancellable(_) => (
                StatusCode::CONFLICT,
                ProblemDetails::new(StatusCode::CONFLICT, "Job not cancellable", self.to_string()),
            ),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ProblemDetails::new(StatusCode::UNAUTHORIZED, "Unauthorized", self.to_string()),
            ),
            AppError::Upstream(e) => {
                tracing::error!(error = %format!("{e:#}"), "unhandled error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ProblemDetails::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error",
                        "an unexpected error occurred",
                    ),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.problem();
        if status.is_client_error() {
            tracing::warn!(status = status.as_u16(), title = %body.title, detail = %body.detail, "request rejected");
        }
        (status, Json(body)).into_response()
    }
}
