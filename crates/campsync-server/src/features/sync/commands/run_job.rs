//! Run job command
//!
//! Publishes a running status, then claims the job name and starts it in the
//! background. The worker adopts the published status. Only one request can
//! claim a name, so a concurrent duplicate gets `AlreadyRunning`.

use mediator::Request;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::sync::{JobStatus, SchedulerError, SyncScheduler};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJobCommand {
    #[serde(default)]
    pub name: String,
    /// Execution budget; raised to the configured floor when shorter
    #[serde(default)]
    pub budget_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJobResponse {
    pub status: JobStatus,
    pub budget_secs: u64,
}

impl Request<Result<RunJobResponse, SchedulerError>> for RunJobCommand {}

#[tracing::instrument(skip(scheduler))]
pub fn handle(scheduler: &SyncScheduler, command: RunJobCommand) -> Result<RunJobResponse, SchedulerError> {
    scheduler.mark_running(&command.name)?;
    let budget = command.budget_secs.map(Duration::from_secs);
    let status = scheduler.start_job(&command.name, budget)?;

    Ok(RunJobResponse {
        status,
        budget_secs: scheduler.config().effective_budget(budget).as_secs(),
    })
}
