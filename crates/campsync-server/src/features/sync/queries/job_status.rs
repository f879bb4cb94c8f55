//! Get job status query
//!
//! Running, pending or last-completed status of one registered job.

use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::sync::{JobStatus, SyncScheduler, SyncStats};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetJobStatusQuery {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub name: String,
    /// Absent when the job has not run since startup
    pub status: Option<JobStatus>,
    /// Counters the job reports for its last run
    pub statistics: Option<SyncStats>,
}

#[derive(Debug, thiserror::Error)]
pub enum GetJobStatusError {
    #[error("Unknown job: {0}")]
    NotFound(String),
}

impl Request<Result<JobStatusResponse, GetJobStatusError>> for GetJobStatusQuery {}

pub fn handle(scheduler: &SyncScheduler, query: GetJobStatusQuery) -> Result<JobStatusResponse, GetJobStatusError> {
    if !scheduler.is_registered(&query.name) {
        return Err(GetJobStatusError::NotFound(query.name));
    }

    Ok(JobStatusResponse {
        status: scheduler.status(&query.name),
        statistics: scheduler.statistics(&query.name),
        name: query.name,
    })
}
