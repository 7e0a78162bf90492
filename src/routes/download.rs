use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures_util::Stream;
use tokio_util::io::ReaderStream;

use crate::error::AppError;
use crate::models::JobState;
use crate::state::AppState;
use crate::store::FileStore;

/// `GET /api/v1/download/{id}` (`spec.md` §6): streams the processed file
/// once the job is `completed`; 409 while it's still in flight, 404 if the
/// job or its output file is missing. After the response body has been
/// fully streamed (or the connection drops mid-stream), the upload file is
/// deleted best-effort (`spec.md` §4.6, §5) — deletion is idempotent, so a
/// race with the sweeper's own pass over the same file is harmless.
pub async fn download(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<Response, AppError> {
    let result = run_download(&state, &id).await;

    metrics::counter!("downloads_total", "status" => match &result {
        Ok(_) => "success",
        Err(AppError::JobNotReady(_)) => "failed_not_ready",
        Err(_) => "failed_not_found",
    })
    .increment(1);

    result
}

async fn run_download(state: &AppState, id: &str) -> Result<Response, AppError> {
    let job = state.registry.get(id).ok_or(AppError::JobNotFound)?;
    if job.state != JobState::Completed {
        return Err(AppError::JobNotReady(job.state));
    }

    let file = tokio::fs::File::open(&job.output_path).await.map_err(|_| AppError::OutputMissing)?;
    let stream = CleanupOnComplete::new(ReaderStream::new(file), state.file_store.clone(), job.upload_path.clone());
    let body = axum::body::Body::from_stream(stream);

    let download_name = download_filename(&job.original_filename);
    let response = (
        [
            (header::CONTENT_TYPE, "text/plain".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{download_name}\"")),
        ],
        body,
    )
        .into_response();

    tracing::info!(job_id = %id, path = %job.output_path.display(), "download served");
    Ok(response)
}

fn download_filename(original_filename: &str) -> String {
    let path = std::path::Path::new(original_filename);
    let ext = path.extension().map(|e| e.to_string_lossy().to_string()).unwrap_or_default();
    let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
    if ext.is_empty() {
        format!("{stem}_processed")
    } else {
        format!("{stem}_processed.{ext}")
    }
}

/// Wraps a body stream so that, once it yields its last item (or is dropped
/// before doing so, e.g. the client disconnects mid-download), the upload
/// file behind it is deleted exactly once.
struct CleanupOnComplete<S> {
    inner: S,
    file_store: FileStore,
    upload_path: Option<PathBuf>,
}

impl<S> CleanupOnComplete<S> {
    fn new(inner: S, file_store: FileStore, upload_path: PathBuf) -> Self {
        Self { inner, file_store, upload_path: Some(upload_path) }
    }

    fn cleanup(&mut self) {
        if let Some(path) = self.upload_path.take() {
            let file_store = self.file_store.clone();
            tokio::spawn(async move { file_store.delete(&path).await });
        }
    }
}

impl<S: Stream + Unpin> Stream for CleanupOnComplete<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_next(cx);
        if let Poll::Ready(None) = poll {
            this.cleanup();
        }
        poll
    }
}

impl<S> Drop for CleanupOnComplete<S> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
