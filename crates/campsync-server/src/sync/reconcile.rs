//! Reconciliation engine
//!
//! Turns a batch of freshly fetched records into create / update / no-op
//! writes against one collection, then removes records the batch no longer
//! mentions. One [`Reconciler`] covers one collection for one run:
//!
//! 1. [`Reconciler::preload`] snapshots existing records by [`CompositeKey`]
//! 2. [`Reconciler::reconcile_one`] per fetched record
//! 3. [`Reconciler::delete_orphans`] once the fetch is known to have succeeded
//!
//! Deleting is the only destructive step and is gated on [`FetchOutcome`]:
//! a failed or never-attempted fetch must not look like "everything was
//! deleted upstream".

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::diff::{changed_fields, fields_equal};
use super::identity::CompositeKey;
use super::stats::SyncStats;
use super::store::{normalize_scope, Fields, Filter, Record, RecordStore, StoreError, DEFAULT_PAGE_SIZE};

/// What happened to one fetched record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Created,
    Updated,
    Skipped,
    /// The write failed; counted as an error, the batch continues
    Failed,
}

/// Result of the fetch-from-source step of a run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FetchOutcome {
    #[default]
    NotAttempted,
    /// The source answered and had nothing
    SucceededEmpty,
    /// The source answered with this many records
    Succeeded(usize),
    Failed(String),
}

impl FetchOutcome {
    /// Outcome for a fetch that completed with `count` records.
    pub fn from_count(count: usize) -> Self {
        if count == 0 {
            Self::SucceededEmpty
        } else {
            Self::Succeeded(count)
        }
    }

    /// Fold the outcome of one more page into this one.
    ///
    /// Any failure sticks; otherwise counts add up.
    pub fn combine(self, next: FetchOutcome) -> FetchOutcome {
        match (self, next) {
            (failed @ Self::Failed(_), _) | (_, failed @ Self::Failed(_)) => failed,
            (Self::NotAttempted, other) | (other, Self::NotAttempted) => other,
            (a, b) => Self::from_count(a.count() + b.count()),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Self::Succeeded(n) => *n,
            _ => 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Whether orphan deletion may run after this fetch.
    ///
    /// An empty answer only counts when the entity is known to legitimately
    /// drop to zero rows.
    pub fn permits_purge(&self, allow_empty: bool) -> bool {
        match self {
            Self::Succeeded(_) => true,
            Self::SucceededEmpty => allow_empty,
            Self::NotAttempted | Self::Failed(_) => false,
        }
    }
}

impl std::fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAttempted => f.write_str("not attempted"),
            Self::SucceededEmpty => f.write_str("succeeded (empty)"),
            Self::Succeeded(n) => write!(f, "succeeded ({} records)", n),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Existing records of one collection keyed by identity
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    records: HashMap<CompositeKey, Record>,
}

impl Snapshot {
    pub fn get(&self, key: &CompositeKey) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &CompositeKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &CompositeKey> {
        self.records.keys()
    }

    /// Make a record created during this run visible to later steps.
    pub fn insert(&mut self, key: CompositeKey, record: Record) {
        self.records.insert(key, record);
    }
}

/// Reconciles fetched records into one collection
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    collection: String,
    page_size: usize,
    allow_empty_purge: bool,
    processed: HashSet<CompositeKey>,
    stats: SyncStats,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RecordStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
            page_size: DEFAULT_PAGE_SIZE,
            allow_empty_purge: false,
            processed: HashSet::new(),
            stats: SyncStats::new(),
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Let an empty but successful fetch purge the collection.
    pub fn allow_empty_purge(mut self, allow: bool) -> Self {
        self.allow_empty_purge = allow;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    pub fn was_processed(&self, key: &CompositeKey) -> bool {
        self.processed.contains(key)
    }

    /// Count an error that happened outside a write, e.g. an unkeyable record.
    pub fn record_error(&mut self) {
        self.stats.inc_errors();
    }

    /// Scan the collection under `filter` and key every record with `key_of`.
    ///
    /// Starts a new run. A store failure yields an empty snapshot: the run
    /// then creates everything it fetches, which costs duplicates at worst
    /// and never causes a wrong delete.
    pub async fn preload<F>(&mut self, filter: &Filter, key_of: F) -> Snapshot
    where
        F: Fn(&Fields) -> Option<CompositeKey>,
    {
        self.processed.clear();

        let records = match self.store.list_all(&self.collection, filter, self.page_size).await {
            Ok(records) => records,
            Err(e) => {
                warn!(
                    collection = %self.collection,
                    filter = %filter,
                    error = %e,
                    "Preload failed, continuing with empty snapshot"
                );
                return Snapshot::default();
            },
        };

        let mut snapshot = Snapshot::default();
        let mut unkeyed = 0usize;
        for record in records {
            match key_of(&record.fields) {
                Some(key) => {
                    if let Some(previous) = snapshot.records.insert(key.clone(), record) {
                        debug!(collection = %self.collection, key = %key, id = %previous.id, "Duplicate key in collection");
                    }
                },
                None => unkeyed += 1,
            }
        }

        if unkeyed > 0 {
            warn!(collection = %self.collection, count = unkeyed, "Records without a usable key ignored");
        }
        debug!(collection = %self.collection, records = snapshot.len(), "Snapshot loaded");
        snapshot
    }

    /// Create or update one fetched record.
    ///
    /// The key counts as processed before any write is attempted, so a failed
    /// write never turns a live record into an orphan.
    pub async fn reconcile_one(
        &mut self,
        key: CompositeKey,
        fields: Fields,
        snapshot: &mut Snapshot,
        compare_fields: Option<&[String]>,
    ) -> ReconcileAction {
        self.processed.insert(key.clone());
        let fields = normalize_scope(fields);

        let action = match snapshot.get(&key) {
            None => match self.store.create(&self.collection, fields).await {
                Ok(record) => {
                    snapshot.insert(key, record);
                    ReconcileAction::Created
                },
                Err(e) => {
                    warn!(collection = %self.collection, key = %key, error = %e, "Create failed");
                    ReconcileAction::Failed
                },
            },
            Some(existing) if fields_equal(&existing.fields, &fields, compare_fields) => {
                ReconcileAction::Skipped
            },
            Some(existing) => {
                debug!(
                    collection = %self.collection,
                    key = %key,
                    changed = ?changed_fields(&existing.fields, &fields, compare_fields),
                    "Updating record"
                );
                let id = existing.id.clone();
                let mut merged = existing.fields.clone();
                merged.extend(fields);

                match self.store.update(&self.collection, &id, merged).await {
                    Ok(record) => {
                        snapshot.insert(key, record);
                        ReconcileAction::Updated
                    },
                    Err(e) => {
                        warn!(collection = %self.collection, key = %key, error = %e, "Update failed");
                        ReconcileAction::Failed
                    },
                }
            },
        };

        self.stats.record(action);
        action
    }

    /// Delete records under `filter` whose key was not processed this run.
    ///
    /// Does nothing unless `outcome` shows the source really answered.
    /// Records whose key cannot be extracted are left alone. Clears the
    /// processed set afterwards and returns the number deleted.
    pub async fn delete_orphans<F>(
        &mut self,
        filter: &Filter,
        key_of: F,
        outcome: &FetchOutcome,
    ) -> Result<u64, StoreError>
    where
        F: Fn(&Fields) -> Option<CompositeKey>,
    {
        if !outcome.permits_purge(self.allow_empty_purge) {
            info!(
                collection = %self.collection,
                outcome = %outcome,
                "Skipping orphan deletion"
            );
            self.processed.clear();
            return Ok(0);
        }

        let records = self.store.list_all(&self.collection, filter, self.page_size).await?;
        let mut deleted = 0u64;

        for record in records {
            let Some(key) = key_of(&record.fields) else {
                continue;
            };
            if self.processed.contains(&key) {
                continue;
            }
            match self.store.delete(&self.collection, &record.id).await {
                Ok(()) => {
                    debug!(collection = %self.collection, key = %key, "Deleted orphan");
                    self.stats.inc_deleted();
                    deleted += 1;
                },
                Err(e) => {
                    warn!(collection = %self.collection, key = %key, error = %e, "Orphan delete failed");
                    self.stats.inc_errors();
                },
            }
        }

        if deleted > 0 {
            info!(collection = %self.collection, deleted, "Deleted orphaned records");
        }
        self.processed.clear();
        Ok(deleted)
    }

    /// Checkpoint the store and hand back the run's counters.
    pub async fn finish(mut self) -> SyncStats {
        if let Err(e) = self.store.checkpoint().await {
            warn!(collection = %self.collection, error = %e, "Checkpoint failed");
            self.stats.inc_errors();
        }
        self.stats.complete();
        self.stats
    }
}

/// Read an integer id field, accepting numeric strings.
pub fn id_field(fields: &Fields, name: &str) -> Option<i64> {
    match fields.get(name)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
