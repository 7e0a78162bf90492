pub mod job;

pub use job::{CancelResponse, Job, JobState, Priority, StatusResponse, UploadResponse};
