//! Unified sync queue
//!
//! FIFO of externally requested sync runs. A request is identified by
//! (year, scope, include_expensive); enqueuing an identical request returns
//! the entry already waiting instead of adding a second one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Scope value meaning "every job of the sequence"
pub const SCOPE_ALL: &str = "all";

/// Default queue capacity
pub const DEFAULT_CAPACITY: usize = 50;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Sync queue is full ({capacity} requests)")]
    Full { capacity: usize },

    #[error("Invalid year: {0}")]
    InvalidYear(i32),

    #[error("Invalid scope: {0:?}")]
    InvalidScope(String),
}

/// A waiting sync request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedSync {
    pub id: Uuid,
    pub year: i32,
    /// `all` or a job name
    pub scope: String,
    pub include_expensive: bool,
    pub requested_by: String,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedSync {
    fn same_request(&self, year: i32, scope: &str, include_expensive: bool) -> bool {
        self.year == year && self.scope == scope && self.include_expensive == include_expensive
    }

    pub fn is_full_sync(&self) -> bool {
        self.scope == SCOPE_ALL
    }
}

/// Result of an enqueue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enqueued {
    pub entry: QueuedSync,
    /// 1-based position at the time of the call
    pub position: usize,
    /// True when an identical request was already waiting
    pub deduplicated: bool,
}

#[derive(Debug)]
pub struct SyncQueue {
    entries: VecDeque<QueuedSync>,
    capacity: usize,
}

impl Default for SyncQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl SyncQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn enqueue(
        &mut self,
        year: i32,
        scope: &str,
        include_expensive: bool,
        requested_by: &str,
    ) -> Result<Enqueued, QueueError> {
        if !(1000..=9999).contains(&year) {
            return Err(QueueError::InvalidYear(year));
        }
        let scope = scope.trim();
        if scope.is_empty() {
            return Err(QueueError::InvalidScope(scope.to_string()));
        }

        if let Some(index) = self
            .entries
            .iter()
            .position(|e| e.same_request(year, scope, include_expensive))
        {
            return Ok(Enqueued {
                entry: self.entries[index].clone(),
                position: index + 1,
                deduplicated: true,
            });
        }

        if self.entries.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }

        let entry = QueuedSync {
            id: Uuid::new_v4(),
            year,
            scope: scope.to_string(),
            include_expensive,
            requested_by: requested_by.to_string(),
            enqueued_at: Utc::now(),
        };
        self.entries.push_back(entry.clone());
        Ok(Enqueued {
            entry,
            position: self.entries.len(),
            deduplicated: false,
        })
    }

    pub fn dequeue(&mut self) -> Option<QueuedSync> {
        self.entries.pop_front()
    }

    /// Remove a waiting request. False when it is not queued.
    pub fn cancel(&mut self, id: Uuid) -> bool {
        match self.entries.iter().position(|e| e.id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            },
            None => false,
        }
    }

    /// 1-based position of `id`, or 0 when absent
    pub fn position(&self, id: Uuid) -> usize {
        self.entries
            .iter()
            .position(|e| e.id == id)
            .map_or(0, |index| index + 1)
    }

    /// Copy of the waiting requests in order
    pub fn list(&self) -> Vec<QueuedSync> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_on_full_request_key() {
        let mut queue = SyncQueue::new(10);
        let first = queue.enqueue(2025, "all", false, "u1").unwrap();
        let second = queue.enqueue(2025, "all", false, "u2").unwrap();

        assert_eq!(first.entry.id, second.entry.id);
        assert!(second.deduplicated);
        assert_eq!(second.entry.requested_by, "u1");
        assert_eq!(queue.len(), 1);

        let third = queue.enqueue(2025, "all", true, "u3").unwrap();
        assert_ne!(third.entry.id, first.entry.id);
        assert_eq!(third.position, 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_fifo_cancel_and_positions() {
        let mut queue = SyncQueue::new(10);
        let a = queue.enqueue(2023, "all", false, "ops").unwrap().entry;
        let b = queue.enqueue(2024, "all", false, "ops").unwrap().entry;
        let c = queue.enqueue(2025, "sessions", false, "ops").unwrap().entry;

        assert_eq!(queue.position(c.id), 3);
        assert!(queue.cancel(b.id));
        assert!(!queue.cancel(b.id));
        assert_eq!(queue.position(b.id), 0);
        assert_eq!(queue.position(c.id), 2);

        assert_eq!(queue.dequeue().unwrap().id, a.id);
        assert_eq!(queue.dequeue().unwrap().id, c.id);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_list_is_a_copy() {
        let mut queue = SyncQueue::new(10);
        queue.enqueue(2025, "all", false, "ops").unwrap();

        let mut listed = queue.list();
        listed.clear();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_capacity_and_validation() {
        let mut queue = SyncQueue::new(2);
        queue.enqueue(2024, "all", false, "ops").unwrap();
        queue.enqueue(2025, "all", false, "ops").unwrap();

        assert_eq!(
            queue.enqueue(2023, "all", false, "ops").unwrap_err(),
            QueueError::Full { capacity: 2 }
        );
        // A duplicate still resolves when full
        assert!(queue.enqueue(2025, "all", false, "ops").unwrap().deduplicated);

        assert_eq!(queue.enqueue(25, "all", false, "ops").unwrap_err(), QueueError::InvalidYear(25));
        assert!(matches!(
            queue.enqueue(2025, "  ", false, "ops"),
            Err(QueueError::InvalidScope(_))
        ));
    }
}
