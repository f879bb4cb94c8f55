//! List running jobs query

use mediator::Request;
use serde::{Deserialize, Serialize};

use crate::sync::status::ActiveSequence;
use crate::sync::{JobStatus, SyncScheduler};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRunningJobsQuery;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningJobsResponse {
    pub jobs: Vec<JobStatus>,
    pub sequence: Option<ActiveSequence>,
}

impl Request<RunningJobsResponse> for ListRunningJobsQuery {}

pub fn handle(scheduler: &SyncScheduler, _query: ListRunningJobsQuery) -> RunningJobsResponse {
    // A job can finish between the two reads; its name is then dropped.
    let jobs = scheduler
        .running_jobs()
        .iter()
        .filter_map(|name| scheduler.status(name))
        .filter(JobStatus::is_running)
        .collect();

    RunningJobsResponse {
        jobs,
        sequence: scheduler.active_sequence(),
    }
}
