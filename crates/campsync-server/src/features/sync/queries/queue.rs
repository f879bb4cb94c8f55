//! Sync queue queries

use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sync::{QueuedSync, SyncScheduler};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQueueQuery;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueResponse {
    pub entries: Vec<QueuedSync>,
    pub total: usize,
}

impl Request<QueueResponse> for ListQueueQuery {}

pub fn handle_list(scheduler: &SyncScheduler, _query: ListQueueQuery) -> QueueResponse {
    let entries = scheduler.queued();
    QueueResponse {
        total: entries.len(),
        entries,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetQueuePositionQuery {
    pub id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePositionResponse {
    pub id: Uuid,
    /// 1-based; 0 when the request is no longer waiting
    pub position: usize,
    pub queued: bool,
}

impl Request<QueuePositionResponse> for GetQueuePositionQuery {}

pub fn handle_position(scheduler: &SyncScheduler, query: GetQueuePositionQuery) -> QueuePositionResponse {
    let position = scheduler.queue_position(query.id);
    QueuePositionResponse {
        id: query.id,
        position,
        queued: position > 0,
    }
}
