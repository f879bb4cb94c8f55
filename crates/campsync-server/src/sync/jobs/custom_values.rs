//! Per-entity custom field values
//!
//! The source only exposes custom values one parent at a time, so a run costs
//! one remote call per locally stored parent. These jobs live in the
//! expensive phase and never run as part of the daily sequence.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::sync::identity::{KeySpec, SCOPE_FIELD};
use crate::sync::job::{check_cancelled, JobError, SyncJob};
use crate::sync::reconcile::{id_field, FetchOutcome, Reconciler};
use crate::sync::source::SourceClient;
use crate::sync::stats::SyncStats;
use crate::sync::store::{Fields, Filter, RecordStore, DEFAULT_PAGE_SIZE};

/// Which parent collection feeds which custom value collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomValuesTarget {
    /// Local collection holding the parents, e.g. `persons`
    pub parent_collection: String,
    /// Source path for one parent's values, e.g. `persons/custom_values`
    pub source_entity: String,
    /// Collection the values are written to
    pub collection: String,
    /// Field on each value row that names its parent, e.g. `person_id`
    pub parent_field: String,
}

impl CustomValuesTarget {
    pub fn new(parent_collection: &str, source_entity: &str, collection: &str, parent_field: &str) -> Self {
        Self {
            parent_collection: parent_collection.to_string(),
            source_entity: source_entity.to_string(),
            collection: collection.to_string(),
            parent_field: parent_field.to_string(),
        }
    }

    fn key(&self) -> KeySpec {
        KeySpec::scoped(&[self.parent_field.as_str(), "field_id"])
    }
}

pub struct CustomValuesJob {
    name: String,
    target: CustomValuesTarget,
    source: Arc<dyn SourceClient>,
    store: Arc<dyn RecordStore>,
    last_stats: Mutex<SyncStats>,
}

impl CustomValuesJob {
    pub fn new(
        name: impl Into<String>,
        target: CustomValuesTarget,
        source: Arc<dyn SourceClient>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            name: name.into(),
            target,
            source,
            store,
            last_stats: Mutex::new(SyncStats::default()),
        }
    }

    /// Parent ids stored locally for `year`, deduplicated, in stored order.
    async fn parent_ids(&self, year: i32) -> Result<Vec<i64>, JobError> {
        let parents = self
            .store
            .list_all(&self.target.parent_collection, &Filter::year(year), DEFAULT_PAGE_SIZE)
            .await
            .map_err(|e| {
                warn!(job = %self.name, collection = %self.target.parent_collection, error = %e, "Cannot read parents");
                JobError::MissingUpstream(self.target.parent_collection.clone())
            })?;

        let mut ids: Vec<i64> = parents.iter().filter_map(|p| id_field(&p.fields, "id")).collect();
        let mut seen = std::collections::HashSet::new();
        ids.retain(|id| seen.insert(*id));
        Ok(ids)
    }

    async fn sync(&self, year: i32, cancel: &CancellationToken, reconciler: &mut Reconciler) -> Result<FetchOutcome, JobError> {
        let parents = self.parent_ids(year).await?;
        let key = self.target.key();
        let filter = Filter::year(year);
        let mut snapshot = reconciler.preload(&filter, |f: &Fields| key.extract(f)).await;
        let mut outcome = FetchOutcome::NotAttempted;

        info!(job = %self.name, parents = parents.len(), year, "Fetching custom values");

        for parent_id in parents {
            check_cancelled(cancel)?;

            let rows = match self.source.fetch_related(&self.target.source_entity, parent_id).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(job = %self.name, parent_id, error = %e, "Custom values fetch failed");
                    reconciler.record_error();
                    outcome = outcome.combine(FetchOutcome::Failed(e.to_string()));
                    continue;
                },
            };
            outcome = outcome.combine(FetchOutcome::from_count(rows.len()));

            for mut row in rows {
                row.insert(self.target.parent_field.clone(), Value::from(parent_id));
                row.insert(SCOPE_FIELD.to_string(), Value::from(year));
                let Some(k) = key.extract(&row) else {
                    reconciler.record_error();
                    continue;
                };
                reconciler.reconcile_one(k, row, &mut snapshot, None).await;
            }
        }

        Ok(outcome)
    }
}

#[async_trait]
impl SyncJob for CustomValuesJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), JobError> {
        let year = self.source.current_year();
        let key = self.target.key();
        let mut reconciler = Reconciler::new(self.store.clone(), self.target.collection.clone());

        let result = self.sync(year, &cancel, &mut reconciler).await;
        if let Ok(outcome) = &result {
            if let Err(e) = reconciler
                .delete_orphans(&Filter::year(year), |f: &Fields| key.extract(f), outcome)
                .await
            {
                warn!(job = %self.name, error = %e, "Orphan scan failed");
                reconciler.record_error();
            }
        }

        let stats = reconciler.finish().await;
        info!(job = %self.name, year, %stats, "Custom values synced");
        *self.last_stats.lock().unwrap_or_else(|p| p.into_inner()) = stats;
        result.map(|_| ())
    }

    fn statistics(&self) -> SyncStats {
        self.last_stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn for_year(&self, year: i32) -> Option<Arc<dyn SyncJob>> {
        Some(Arc::new(Self::new(
            self.name.clone(),
            self.target.clone(),
            self.source.with_year(year),
            self.store.clone(),
        )))
    }
}
