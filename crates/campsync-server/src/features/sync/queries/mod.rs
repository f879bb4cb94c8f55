//! Sync queries

pub mod job_status;
pub mod queue;
pub mod running_jobs;

pub use job_status::{GetJobStatusError, GetJobStatusQuery, JobStatusResponse};
pub use queue::{GetQueuePositionQuery, ListQueueQuery, QueuePositionResponse, QueueResponse};
pub use running_jobs::{ListRunningJobsQuery, RunningJobsResponse};
