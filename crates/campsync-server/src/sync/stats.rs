//! Per-run reconciliation counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::reconcile::ReconcileAction;

/// Counters from one job run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStats {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub deleted: u64,
    pub errors: u64,
    /// Duration in seconds
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Per-collection counters for jobs that fill more than one collection
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sub_stats: BTreeMap<String, SyncStats>,
}

impl SyncStats {
    /// Empty stats with the clock started
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Stop the clock
    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    pub fn record(&mut self, action: ReconcileAction) {
        match action {
            ReconcileAction::Created => self.created += 1,
            ReconcileAction::Updated => self.updated += 1,
            ReconcileAction::Skipped => self.skipped += 1,
            ReconcileAction::Failed => self.errors += 1,
        }
    }

    pub fn inc_deleted(&mut self) {
        self.deleted += 1;
    }

    pub fn inc_errors(&mut self) {
        self.errors += 1;
    }

    /// Records that went through reconciliation, including failures
    pub fn total(&self) -> u64 {
        self.created + self.updated + self.skipped + self.errors
    }

    /// Whether the run wrote anything
    pub fn has_changes(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }

    /// Add another run's counters to these. Timing is kept from `self`.
    pub fn absorb(&mut self, other: &SyncStats) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.deleted += other.deleted;
        self.errors += other.errors;
    }

    /// Attach counters for one collection and roll them into the totals.
    pub fn add_sub_stats(&mut self, collection: impl Into<String>, stats: SyncStats) {
        self.absorb(&stats);
        self.sub_stats.insert(collection.into(), stats);
    }
}

impl std::fmt::Display for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "created={} updated={} skipped={} deleted={} errors={} ({:.1}s)",
            self.created, self.updated, self.skipped, self.deleted, self.errors, self.duration_secs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_actions() {
        let mut stats = SyncStats::new();
        stats.record(ReconcileAction::Created);
        stats.record(ReconcileAction::Skipped);
        stats.record(ReconcileAction::Skipped);
        stats.record(ReconcileAction::Failed);
        stats.inc_deleted();

        assert_eq!(stats.created, 1);
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.total(), 4);
        assert!(stats.has_changes());
    }

    #[test]
    fn test_sub_stats_roll_up() {
        let mut categories = SyncStats::default();
        categories.created = 3;
        let mut methods = SyncStats::default();
        methods.updated = 2;
        methods.errors = 1;

        let mut stats = SyncStats::new();
        stats.add_sub_stats("financial_categories", categories);
        stats.add_sub_stats("payment_methods", methods);

        assert_eq!(stats.created, 3);
        assert_eq!(stats.updated, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.sub_stats.len(), 2);
        assert_eq!(stats.sub_stats["payment_methods"].updated, 2);
    }

    #[test]
    fn test_complete_sets_duration() {
        let mut stats = SyncStats::new();
        stats.complete();
        assert!(stats.completed_at.is_some());
        assert!(stats.duration_secs >= 0.0);
    }

    #[test]
    fn test_serialization_omits_empty_sub_stats() {
        let json = serde_json::to_value(SyncStats::default()).unwrap();
        assert!(json.get("sub_stats").is_none());
        assert_eq!(json["created"], 0);
    }
}
