//! Queue commands

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sync::{Enqueued, SchedulerError, SyncScheduler, SCOPE_ALL};

fn default_scope() -> String {
    SCOPE_ALL.to_string()
}

fn default_requester() -> String {
    "api".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueSyncCommand {
    pub year: i32,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub include_expensive: bool,
    #[serde(default = "default_requester")]
    pub requested_by: String,
}

impl Request<Result<Enqueued, SchedulerError>> for EnqueueSyncCommand {}

#[tracing::instrument(skip(scheduler))]
pub fn handle_enqueue(scheduler: &SyncScheduler, command: EnqueueSyncCommand) -> Result<Enqueued, SchedulerError> {
    scheduler.enqueue(
        command.year,
        &command.scope,
        command.include_expensive,
        &command.requested_by,
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelQueuedCommand {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelQueuedResponse {
    pub id: Uuid,
    pub cancelled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CancelQueuedError {
    #[error("Sync request {0} is not queued")]
    NotQueued(Uuid),
}

impl Request<Result<CancelQueuedResponse, CancelQueuedError>> for CancelQueuedCommand {}

#[tracing::instrument(skip(scheduler))]
pub fn handle_cancel(
    scheduler: &SyncScheduler,
    command: CancelQueuedCommand,
) -> Result<CancelQueuedResponse, CancelQueuedError> {
    if scheduler.cancel_queued(command.id) {
        Ok(CancelQueuedResponse {
            id: command.id,
            cancelled: true,
        })
    } else {
        Err(CancelQueuedError::NotQueued(command.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_defaults() {
        let command: EnqueueSyncCommand = serde_json::from_str(r#"{"year": 2024}"#).unwrap();
        assert_eq!(command.scope, "all");
        assert!(!command.include_expensive);
        assert_eq!(command.requested_by, "api");
    }
}
