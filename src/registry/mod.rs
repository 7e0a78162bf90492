use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Job, JobState};

/// Result of a cancellation request against the registry (`spec.md` §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was `pending` and moved straight to `cancelled`.
    CancelledImmediately,
    /// The job was `processing` (or already `cancelling`) and was flagged;
    /// the worker will observe it at the next checkpoint.
    MarkedForCancellation,
    /// The job is already in a terminal state.
    NotCancellable(JobState),
}

/// The single authoritative, in-memory table of jobs. Non-durable: all data
/// is lost on restart (`spec.md` §4.2, §9).
#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self { jobs: Arc::new(DashMap::new()) }
    }

    /// Inserts a new job in state `pending` under a fresh id and returns a
    /// clone of it.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &self,
        original_filename: String,
        start_at_layer: u32,
        extrusion_multiplier: f64,
        priority: u8,
        upload_path: PathBuf,
        output_path: PathBuf,
    ) -> Job {
        self.register_with_id(
            Uuid::new_v4().to_string(),
            original_filename,
            start_at_layer,
            extrusion_multiplier,
            priority,
            upload_path,
            output_path,
        )
    }

    /// Like [`JobRegistry::register`] but with a caller-supplied id. The
    /// upload handler needs the id before registering, since it is embedded
    /// in the upload/output file names it asks the file store to write to.
    #[allow(clippy::too_many_arguments)]
    pub fn register_with_id(
        &self,
        id: String,
        original_filename: String,
        start_at_layer: u32,
        extrusion_multiplier: f64,
        priority: u8,
        upload_path: PathBuf,
        output_path: PathBuf,
    ) -> Job {
        let job = Job::new(
            id.clone(),
            original_filename,
            start_at_layer,
            extrusion_multiplier,
            priority,
            upload_path,
            output_path,
        );
        self.jobs.insert(id, job.clone());
        job
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).map(|entry| entry.clone())
    }

    /// Atomically validates `from -> to` against the state machine, applies
    /// `apply_fields`, and bumps `updated_at`. Returns the prior state.
    /// Rejects illegal transitions without mutating the job.
    pub fn transition<F>(&self, id: &str, to: JobState, apply_fields: F) -> Result<JobState, AppError>
    where
        F: FnOnce(&mut Job),
    {
        let mut entry = self.jobs.get_mut(id).ok_or(AppError::JobNotFound)?;
        let from = entry.state;
        if !from.can_transition_to(to) {
            return Err(anyhow::anyhow!("illegal job transition {from} -> {to}").into());
        }
        entry.state = to;
        apply_fields(&mut entry);
        entry.updated_at = Utc::now();
        Ok(from)
    }

    /// Sets `cancel_requested` (monotonically) and, depending on the job's
    /// current state, either cancels it immediately, flags it for the
    /// worker to observe, or reports it is not cancellable.
    pub fn request_cancel(&self, id: &str) -> Result<CancelOutcome, AppError> {
        let mut entry = self.jobs.get_mut(id).ok_or(AppError::JobNotFound)?;
        entry.cancel_requested = true;

        match entry.state {
            JobState::Pending => {
                entry.state = JobState::Cancelled;
                entry.error_message = Some("Cancelled by user".into());
                entry.updated_at = Utc::now();
                Ok(CancelOutcome::CancelledImmediately)
            }
            JobState::Processing => {
                entry.state = JobState::Cancelling;
                entry.updated_at = Utc::now();
                Ok(CancelOutcome::MarkedForCancellation)
            }
            JobState::Cancelling => Ok(CancelOutcome::MarkedForCancellation),
            other => Ok(CancelOutcome::NotCancellable(other)),
        }
    }

    /// Checks the cancellation flag without taking a full job snapshot.
    pub fn is_cancel_requested(&self, id: &str) -> bool {
        self.jobs.get(id).map(|e| e.cancel_requested).unwrap_or(false)
    }

    pub fn pending_count(&self) -> usize {
        self.jobs.iter().filter(|e| e.state == JobState::Pending).count()
    }

    pub fn active_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|e| matches!(e.state, JobState::Processing | JobState::Cancelling))
            .count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn registered(registry: &JobRegistry) -> Job {
        registry.register(
            "benchy.gcode".into(),
            3,
            1.05,
            1,
            PathBuf::from("/tmp/up"),
            PathBuf::from("/tmp/out"),
        )
    }

    #[test]
    fn register_then_get_finds_job_in_pending() {
        let registry = JobRegistry::new();
        let job = registered(&registry);
        let found = registry.get(&job.id).unwrap();
        assert_eq!(found.state, JobState::Pending);
        assert!(found.created_at <= found.updated_at);
    }

    #[test]
    fn transition_rejects_illegal_edges_without_mutating() {
        let registry = JobRegistry::new();
        let job = registered(&registry);
        let before = registry.get(&job.id).unwrap();

        let err = registry.transition(&job.id, JobState::Completed, |_| {});
        assert!(err.is_err());

        let after = registry.get(&job.id).unwrap();
        assert_eq!(after.state, before.state);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[test]
    fn transition_applies_fields_and_bumps_updated_at() {
        let registry = JobRegistry::new();
        let job = registered(&registry);

        registry.transition(&job.id, JobState::Processing, |_| {}).unwrap();
        let prev = registry
            .transition(&job.id, JobState::Failed, |j| j.error_message = Some("boom".into()))
            .unwrap();

        assert_eq!(prev, JobState::Processing);
        let after = registry.get(&job.id).unwrap();
        assert_eq!(after.state, JobState::Failed);
        assert_eq!(after.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn request_cancel_from_pending_is_immediate() {
        let registry = JobRegistry::new();
        let job = registered(&registry);
        let outcome = registry.request_cancel(&job.id).unwrap();
        assert_eq!(outcome, CancelOutcome::CancelledImmediately);
        let after = registry.get(&job.id).unwrap();
        assert_eq!(after.state, JobState::Cancelled);
        assert!(after.cancel_requested);
    }

    #[test]
    fn request_cancel_from_processing_marks_cancelling() {
        let registry = JobRegistry::new();
        let job = registered(&registry);
        registry.transition(&job.id, JobState::Processing, |_| {}).unwrap();

        let outcome = registry.request_cancel(&job.id).unwrap();
        assert_eq!(outcome, CancelOutcome::MarkedForCancellation);
        assert_eq!(registry.get(&job.id).unwrap().state, JobState::Cancelling);
    }

    #[test]
    fn request_cancel_on_terminal_job_is_rejected() {
        let registry = JobRegistry::new();
        let job = registered(&registry);
        registry.transition(&job.id, JobState::Processing, |_| {}).unwrap();
        registry.transition(&job.id, JobState::Completed, |_| {}).unwrap();

        let outcome = registry.request_cancel(&job.id).unwrap();
        assert_eq!(outcome, CancelOutcome::NotCancellable(JobState::Completed));
    }

    #[test]
    fn cancel_requested_is_monotonic() {
        let registry = JobRegistry::new();
        let job = registered(&registry);
        registry.transition(&job.id, JobState::Processing, |_| {}).unwrap();
        registry.request_cancel(&job.id).unwrap();
        // A second cancel call must not un-flag it, and must not error.
        registry.request_cancel(&job.id).unwrap();
        assert!(registry.get(&job.id).unwrap().cancel_requested);
    }

    #[test]
    fn unknown_job_id_is_not_found() {
        let registry = JobRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(matches!(registry.request_cancel("nope"), Err(AppError::JobNotFound)));
    }
}
