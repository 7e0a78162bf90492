use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Semaphore;

use crate::models::{Job, JobState};
use crate::registry::JobRegistry;
use crate::store::FileStore;
use crate::worker::processor::BrickLayersProcessor;

/// How often the streaming loop checks `cancel_requested` (`spec.md` §4.4).
const CANCEL_CHECK_INTERVAL: u64 = 1000;

/// Bounded worker pool: at most `max_concurrent_jobs` job bodies run at once,
/// the rest wait on the semaphore in FIFO order (`spec.md` §4.4, §5).
/// `priority` is carried on the `Job` record but does not reorder this queue
/// (`spec.md` §9 design notes) — an explicit, recorded choice, not an
/// oversight.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

struct Inner {
    semaphore: Semaphore,
    registry: JobRegistry,
    file_store: FileStore,
    processing_timeout: Duration,
}

enum ProcessingOutcome {
    Completed { output_size: u64, size_delta_percent: f64 },
    Cancelled { phase: &'static str },
}

impl WorkerPool {
    pub fn new(
        registry: JobRegistry,
        file_store: FileStore,
        max_concurrent_jobs: usize,
        processing_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                semaphore: Semaphore::new(max_concurrent_jobs),
                registry,
                file_store,
                processing_timeout,
            }),
        }
    }

    /// Hands the job off to the pool and returns immediately; the caller
    /// (the upload handler) never waits on a worker slot.
    pub fn submit(&self, job_id: String) {
        let pool = self.clone();
        tokio::spawn(async move { pool.run(job_id).await });
    }

    async fn run(&self, job_id: String) {
        let permit = match self.inner.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        match tokio::time::timeout(self.inner.processing_timeout, self.execute(&job_id)).await {
            Ok(()) => {}
            Err(_elapsed) => self.handle_timeout(&job_id),
        }

        drop(permit);
    }

    /// A deadline expiring only retires the job's *state*; it does not kill
    /// whatever I/O the dropped future was suspended on mid-`.await`
    /// (`spec.md` §9: "the job's state must reach a terminal value on time,
    /// not that its OS-level work stops instantly").
    fn handle_timeout(&self, job_id: &str) {
        let timeout_secs = self.inner.processing_timeout.as_secs();
        let transitioned = self.inner.registry.transition(job_id, JobState::Timeout, |job| {
            job.error_message = Some(format!("Processing timed out after {timeout_secs} seconds"));
        });

        match transitioned {
            Ok(_) => {
                metrics::counter!("processing_jobs_total", "status" => "timeout").increment(1);
                metrics::gauge!("processing_jobs_active").decrement(1.0);
                tracing::error!(job_id, timeout_secs, "job timed out");
            }
            Err(_) => {
                // The job already reached a terminal state (or `cancelling`) by
                // the time the deadline fired; nothing left to record.
            }
        }
    }

    /// Runs one job end to end: pick up, process, record the terminal state.
    /// Never returns an error — every failure mode resolves into the job's
    /// own `failed`/`cancelled` state rather than propagating.
    async fn execute(&self, job_id: &str) {
        let job = match self.inner.registry.transition(job_id, JobState::Processing, |_| {}) {
            Ok(_) => match self.inner.registry.get(job_id) {
                Some(job) => job,
                None => return,
            },
            // Already left `pending` — e.g. cancelled before a worker picked it up.
            Err(_) => return,
        };

        metrics::gauge!("processing_jobs_active").increment(1.0);
        metrics::gauge!("processing_jobs_pending").decrement(1.0);
        let start = Instant::now();
        tracing::info!(
            job_id = %job.id,
            filename = %job.original_filename,
            start_at_layer = job.start_at_layer,
            extrusion_multiplier = job.extrusion_multiplier,
            "processing started"
        );

        let outcome = self.run_processing(&job).await;
        self.finish(&job, outcome, start);

        metrics::gauge!("processing_jobs_active").decrement(1.0);
    }

    fn finish(&self, job: &Job, outcome: Result<ProcessingOutcome, anyhow::Error>, start: Instant) {
        match outcome {
            Ok(ProcessingOutcome::Completed { output_size, size_delta_percent }) => {
                let _ = self.inner.registry.transition(&job.id, JobState::Completed, |j| {
                    j.output_size = Some(output_size);
                    j.size_delta_percent = Some(size_delta_percent);
                });
                metrics::counter!("processing_jobs_total", "status" => "completed").increment(1);
                metrics::histogram!("processing_output_size_bytes").record(output_size as f64);
                tracing::info!(job_id = %job.id, output_size, size_delta_percent, "processing completed");
            }
            Ok(ProcessingOutcome::Cancelled { phase }) => {
                let _ = self.inner.registry.transition(&job.id, JobState::Cancelled, |j| {
                    j.error_message = Some("Cancelled by user".into());
                });
                metrics::counter!("processing_jobs_total", "status" => "cancelled").increment(1);
                tracing::info!(job_id = %job.id, phase, "processing cancelled");
            }
            Err(e) => {
                let _ = self.inner.registry.transition(&job.id, JobState::Failed, |j| {
                    j.error_message = Some(e.to_string());
                });
                metrics::counter!("processing_jobs_total", "status" => "failed").increment(1);
                tracing::error!(job_id = %job.id, error = %e, "processing failed");
            }
        }
        metrics::histogram!("processing_duration_seconds").record(start.elapsed().as_secs_f64());
    }

    /// Streams `job.upload_path` through [`BrickLayersProcessor`] into
    /// `job.output_path`, checking `cancel_requested` every
    /// [`CANCEL_CHECK_INTERVAL`] emitted lines and once more after the
    /// stream drains (`spec.md` §4.4).
    async fn run_processing(&self, job: &Job) -> Result<ProcessingOutcome, anyhow::Error> {
        let processor = BrickLayersProcessor::new(job.extrusion_multiplier, job.start_at_layer, 0);

        let input_file = tokio::fs::File::open(&job.upload_path).await?;
        let input_size = input_file.metadata().await.map(|m| m.len()).unwrap_or(0);
        metrics::histogram!("processing_input_size_bytes").record(input_size as f64);

        let mut reader = BufReader::new(input_file);
        let mut output_file = tokio::fs::File::create(&job.output_path).await?;

        let mut layer: u32 = 0;
        let mut lines_emitted: u64 = 0;
        let mut raw = Vec::new();
        let mut cancelled_at: Option<&'static str> = None;

        loop {
            raw.clear();
            let read = reader.read_until(b'\n', &mut raw).await?;
            if read == 0 {
                break;
            }

            // Invalid UTF-8 is replaced rather than treated as a read error
            // (`spec.md` §4.4).
            let line = String::from_utf8_lossy(&raw);
            let out_line = processor.step(&line, &mut layer);
            output_file.write_all(out_line.as_bytes()).await?;
            lines_emitted += 1;

            if lines_emitted % CANCEL_CHECK_INTERVAL == 0 && self.inner.registry.is_cancel_requested(&job.id) {
                cancelled_at = Some("streaming");
                break;
            }
        }

        if cancelled_at.is_none() {
            output_file.flush().await?;
            if self.inner.registry.is_cancel_requested(&job.id) {
                cancelled_at = Some("final checkpoint");
            }
        }

        drop(output_file);
        drop(reader);

        if let Some(phase) = cancelled_at {
            self.inner.file_store.delete(&job.output_path).await;
            return Ok(ProcessingOutcome::Cancelled { phase });
        }

        let output_size = tokio::fs::metadata(&job.output_path).await?.len();
        let size_delta_percent = if input_size > 0 {
            ((output_size as f64 - input_size as f64) / input_size as f64) * 100.0
        } else {
            0.0
        };

        Ok(ProcessingOutcome::Completed { output_size, size_delta_percent })
    }
}
