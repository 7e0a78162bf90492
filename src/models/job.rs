use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One upload-to-download unit of work together with its own state and files.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub original_filename: String,
    pub start_at_layer: u32,
    pub extrusion_multiplier: f64,
    pub priority: u8,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip)]
    pub upload_path: PathBuf,
    #[serde(skip)]
    pub output_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_delta_percent: Option<f64>,
    #[serde(skip)]
    pub cancel_requested: bool,
}

impl Job {
    pub fn new(
        id: String,
        original_filename: String,
        start_at_layer: u32,
        extrusion_multiplier: f64,
        priority: u8,
        upload_path: PathBuf,
        output_path: PathBuf,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            original_filename,
            start_at_layer,
            extrusion_multiplier,
            priority,
            state: JobState::Pending,
            created_at: now,
            updated_at: now,
            error_message: None,
            upload_path,
            output_path,
            output_size: None,
            size_delta_percent: None,
            cancel_requested: false,
        }
    }
}

/// The lifecycle states a [`Job`] can occupy. Terminal states never transition
/// out (`completed`, `failed`, `cancelled`, `timeout`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Processing,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled | JobState::Timeout
        )
    }

    /// Whether `self -> to` is a legal edge in the state machine (`spec.md` §4.3).
    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Cancelling)
                | (Processing, Failed)
                | (Processing, Timeout)
                | (Cancelling, Cancelled)
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Cancelling => "cancelling",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
            JobState::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// Placeholder kept for call sites that want the `0/1/2` vocabulary spelled
/// out; `Job::priority` itself stores the raw `u8` so the registry never has
/// to reject a value the request binding layer already validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
}

impl Priority {
    pub fn in_range(value: u8) -> bool {
        value <= Priority::High as u8
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub job_id: String,
    pub filename: String,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub status: JobState,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub job_id: String,
    pub filename: String,
    pub status: JobState,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_delta_percent: Option<f64>,
}

impl From<&Job> for StatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            filename: job.original_filename.clone(),
            status: job.state,
            priority: job.priority,
            created_at: job.created_at,
            updated_at: job.updated_at,
            error: job.error_message.clone(),
            output_size: job.output_size,
            size_delta_percent: job.size_delta_percent,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub status: JobState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions_match_state_machine_table() {
        use JobState::*;
        let legal = [
            (Pending, Processing),
            (Pending, Cancelled),
            (Processing, Completed),
            (Processing, Cancelling),
            (Processing, Failed),
            (Processing, Timeout),
            (Cancelling, Cancelled),
        ];
        for from in [Pending, Processing, Cancelling, Completed, Failed, Cancelled, Timeout] {
            for to in [Pending, Processing, Cancelling, Completed, Failed, Cancelled, Timeout] {
                let expect_legal = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expect_legal,
                    "transition {from:?} -> {to:?} disagrees with table"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        for terminal in [JobState::Completed, JobState::Failed, JobState::Cancelled, JobState::Timeout] {
            for to in [
                JobState::Pending,
                JobState::Processing,
                JobState::Cancelling,
                JobState::Completed,
                JobState::Failed,
                JobState::Cancelled,
                JobState::Timeout,
            ] {
                assert!(!terminal.can_transition_to(to));
            }
        }
    }

    #[test]
    fn priority_range_check() {
        assert!(Priority::in_range(0));
        assert!(Priority::in_range(2));
        assert!(!Priority::in_range(3));
    }
}
