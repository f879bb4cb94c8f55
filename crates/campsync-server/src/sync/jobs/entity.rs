//! Generic source-to-collection sync job

use std::fmt;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use async_trait::async_trait;

use super::mapper::{FieldMapper, Passthrough};
use crate::sync::identity::KeySpec;
use crate::sync::job::{check_cancelled, JobError, SyncJob};
use crate::sync::reconcile::{FetchOutcome, Reconciler, Snapshot};
use crate::sync::source::SourceClient;
use crate::sync::stats::SyncStats;
use crate::sync::store::{Fields, Filter, RecordStore, DEFAULT_PAGE_SIZE};

/// How one source entity type lands in one local collection
#[derive(Clone)]
pub struct EntityDefinition {
    /// Entity path on the source API
    pub source_entity: String,
    /// Target collection
    pub collection: String,
    pub key: KeySpec,
    /// Fields that decide update vs. no-op; all incoming fields when `None`
    pub compare_fields: Option<Vec<String>>,
    /// Let a successful empty fetch delete every record in scope
    pub allow_empty_purge: bool,
    pub mapper: Arc<dyn FieldMapper>,
}

impl EntityDefinition {
    /// Year-scoped entity keyed by `key_fields`
    pub fn scoped(source_entity: &str, collection: &str, key_fields: &[&str]) -> Self {
        Self::with_key(source_entity, collection, KeySpec::scoped(key_fields))
    }

    /// Year-independent entity keyed by `key_fields`
    pub fn global(source_entity: &str, collection: &str, key_fields: &[&str]) -> Self {
        Self::with_key(source_entity, collection, KeySpec::global(key_fields))
    }

    fn with_key(source_entity: &str, collection: &str, key: KeySpec) -> Self {
        Self {
            source_entity: source_entity.to_string(),
            collection: collection.to_string(),
            key,
            compare_fields: None,
            allow_empty_purge: false,
            mapper: Arc::new(Passthrough),
        }
    }

    pub fn compare_fields(mut self, fields: &[&str]) -> Self {
        self.compare_fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn allow_empty_purge(mut self) -> Self {
        self.allow_empty_purge = true;
        self
    }

    pub fn mapper(mut self, mapper: impl FieldMapper + 'static) -> Self {
        self.mapper = Arc::new(mapper);
        self
    }

    fn filter(&self, year: i32) -> Filter {
        if self.key.scoped {
            Filter::year(year)
        } else {
            Filter::all()
        }
    }
}

impl fmt::Debug for EntityDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDefinition")
            .field("source_entity", &self.source_entity)
            .field("collection", &self.collection)
            .field("key", &self.key)
            .field("compare_fields", &self.compare_fields)
            .field("allow_empty_purge", &self.allow_empty_purge)
            .finish_non_exhaustive()
    }
}

/// Pages one or more source entities into their collections
pub struct EntitySyncJob {
    name: String,
    definitions: Vec<EntityDefinition>,
    source: Arc<dyn SourceClient>,
    store: Arc<dyn RecordStore>,
    page_size: usize,
    last_stats: Mutex<SyncStats>,
}

impl EntitySyncJob {
    pub fn new(
        name: impl Into<String>,
        definitions: Vec<EntityDefinition>,
        source: Arc<dyn SourceClient>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            name: name.into(),
            definitions,
            source,
            store,
            page_size: DEFAULT_PAGE_SIZE,
            last_stats: Mutex::new(SyncStats::default()),
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn definitions(&self) -> &[EntityDefinition] {
        &self.definitions
    }

    fn set_stats(&self, stats: SyncStats) {
        *self.last_stats.lock().unwrap_or_else(|p| p.into_inner()) = stats;
    }

    /// Fetch every page of one entity and reconcile it.
    ///
    /// Returns how the fetch went. Stops at the first failed page.
    async fn fetch_and_reconcile(
        &self,
        definition: &EntityDefinition,
        year: i32,
        reconciler: &mut Reconciler,
        snapshot: &mut Snapshot,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, JobError> {
        let scope = definition.key.scoped.then_some(year);
        let compare = definition.compare_fields.as_deref();
        let mut outcome = FetchOutcome::NotAttempted;
        let mut page = 1u32;

        loop {
            check_cancelled(cancel)?;

            let rows = match self
                .source
                .fetch_page(&definition.source_entity, page, self.page_size)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(
                        job = %self.name,
                        entity = %definition.source_entity,
                        page,
                        error = %e,
                        "Fetch failed"
                    );
                    return Err(e.into());
                },
            };

            let fetched = rows.len();
            outcome = outcome.combine(FetchOutcome::from_count(fetched));
            debug!(job = %self.name, entity = %definition.source_entity, page, fetched, "Fetched page");

            for raw in rows {
                check_cancelled(cancel)?;

                let mapped = match definition.mapper.map(raw, scope) {
                    Ok(mapped) => mapped,
                    Err(e) => {
                        warn!(job = %self.name, collection = %definition.collection, error = %e, "Skipping unmappable record");
                        reconciler.record_error();
                        continue;
                    },
                };
                let Some(key) = definition.key.extract(&mapped) else {
                    warn!(job = %self.name, collection = %definition.collection, "Skipping record without usable key");
                    reconciler.record_error();
                    continue;
                };
                reconciler.reconcile_one(key, mapped, snapshot, compare).await;
            }

            if fetched < self.page_size {
                break;
            }
            page += 1;
        }

        Ok(outcome)
    }

    async fn sync_entity(
        &self,
        definition: &EntityDefinition,
        year: i32,
        cancel: &CancellationToken,
    ) -> (SyncStats, Result<(), JobError>) {
        let filter = definition.filter(year);
        let key_of = |fields: &Fields| definition.key.extract(fields);

        let mut reconciler = Reconciler::new(self.store.clone(), definition.collection.clone())
            .page_size(self.page_size)
            .allow_empty_purge(definition.allow_empty_purge);
        let mut snapshot = reconciler.preload(&filter, key_of).await;

        let result = self
            .fetch_and_reconcile(definition, year, &mut reconciler, &mut snapshot, cancel)
            .await;

        if let Ok(outcome) = &result {
            if let Err(e) = reconciler.delete_orphans(&filter, key_of, outcome).await {
                warn!(job = %self.name, collection = %definition.collection, error = %e, "Orphan scan failed");
                reconciler.record_error();
            }
        }

        let stats = reconciler.finish().await;
        (stats, result.map(|_| ()))
    }
}

#[async_trait]
impl SyncJob for EntitySyncJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), JobError> {
        let year = self.source.current_year();
        let mut totals = SyncStats::new();
        let mut result = Ok(());

        for definition in &self.definitions {
            if let Err(e) = check_cancelled(&cancel) {
                result = Err(e);
                break;
            }

            let (stats, outcome) = self.sync_entity(definition, year, &cancel).await;
            info!(job = %self.name, collection = %definition.collection, year, %stats, "Collection synced");
            if self.definitions.len() > 1 {
                totals.add_sub_stats(definition.collection.clone(), stats);
            } else {
                totals.absorb(&stats);
            }

            if let Err(e) = outcome {
                result = Err(e);
                break;
            }
        }

        totals.complete();
        self.set_stats(totals);
        result
    }

    fn statistics(&self) -> SyncStats {
        self.last_stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn for_year(&self, year: i32) -> Option<Arc<dyn SyncJob>> {
        if !self.definitions.iter().any(|d| d.key.scoped) {
            return None;
        }
        Some(Arc::new(Self {
            name: self.name.clone(),
            definitions: self.definitions.clone(),
            source: self.source.with_year(year),
            store: self.store.clone(),
            page_size: self.page_size,
            last_stats: Mutex::new(SyncStats::default()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::source::SourceError;
    use crate::sync::store::MemoryStore;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    /// Source serving fixed rows per entity; `None` means the entity errors
    struct StaticSource {
        year: i32,
        rows: HashMap<String, Option<Vec<Fields>>>,
    }

    #[async_trait]
    impl SourceClient for StaticSource {
        fn current_year(&self) -> i32 {
            self.year
        }

        fn with_year(&self, year: i32) -> Arc<dyn SourceClient> {
            Arc::new(StaticSource {
                year,
                rows: self.rows.clone(),
            })
        }

        async fn fetch_page(&self, entity: &str, page: u32, page_size: usize) -> Result<Vec<Fields>, SourceError> {
            match self.rows.get(entity) {
                Some(Some(rows)) => Ok(rows
                    .iter()
                    .skip((page as usize - 1) * page_size)
                    .take(page_size)
                    .cloned()
                    .collect()),
                Some(None) => Err(SourceError::Unavailable(entity.to_string())),
                None => Ok(Vec::new()),
            }
        }

        async fn fetch_related(&self, _entity: &str, _parent_id: i64) -> Result<Vec<Fields>, SourceError> {
            Ok(Vec::new())
        }
    }

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap_or_default()
    }

    fn source(rows: Vec<(&str, Option<Vec<Fields>>)>) -> Arc<StaticSource> {
        Arc::new(StaticSource {
            year: 2025,
            rows: rows.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        })
    }

    #[tokio::test]
    async fn test_pages_through_source_and_stamps_year() {
        let rows = (1..=7).map(|i| fields(json!({"id": i, "name": format!("Bunk {i}")}))).collect();
        let store = Arc::new(MemoryStore::new());
        let job = EntitySyncJob::new(
            "bunks",
            vec![EntityDefinition::scoped("bunks", "bunks", &["id"])],
            source(vec![("bunks", Some(rows))]),
            store.clone(),
        )
        .page_size(3);

        job.run(CancellationToken::new()).await.unwrap();
        assert_eq!(store.count("bunks"), 7);
        assert!(store.records("bunks").iter().all(|r| r.fields["year"] == json!(2025)));
        assert_eq!(job.statistics().created, 7);

        job.run(CancellationToken::new()).await.unwrap();
        assert_eq!(job.statistics().skipped, 7);
    }

    #[tokio::test]
    async fn test_source_outage_fails_job_and_keeps_records() {
        let store = Arc::new(MemoryStore::new());
        store.seed("sessions", [fields(json!({"id": 1, "year": 2025}))]);
        let job = EntitySyncJob::new(
            "sessions",
            vec![EntityDefinition::scoped("sessions", "sessions", &["id"])],
            source(vec![("sessions", None)]),
            store.clone(),
        );

        let err = job.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, JobError::Source(_)));
        assert_eq!(store.count("sessions"), 1);
    }

    #[tokio::test]
    async fn test_multiple_definitions_report_sub_stats() {
        let store = Arc::new(MemoryStore::new());
        let job = EntitySyncJob::new(
            "financial_lookups",
            vec![
                EntityDefinition::global("financial_categories", "financial_categories", &["id"]),
                EntityDefinition::global("payment_methods", "payment_methods", &["id"]),
            ],
            source(vec![
                ("financial_categories", Some(vec![fields(json!({"id": 1})), fields(json!({"id": 2}))])),
                ("payment_methods", Some(vec![fields(json!({"id": 9}))])),
            ]),
            store.clone(),
        );

        job.run(CancellationToken::new()).await.unwrap();
        let stats = job.statistics();
        assert_eq!(stats.created, 3);
        assert_eq!(stats.sub_stats["financial_categories"].created, 2);
        assert_eq!(stats.sub_stats["payment_methods"].created, 1);
        assert!(store.records("payment_methods")[0].fields.get("year").is_none());
        assert!(job.for_year(2020).is_none());
    }

    #[tokio::test]
    async fn test_unkeyable_records_count_as_errors() {
        let store = Arc::new(MemoryStore::new());
        let job = EntitySyncJob::new(
            "persons",
            vec![EntityDefinition::scoped("persons", "persons", &["id"])],
            source(vec![("persons", Some(vec![fields(json!({"id": 1})), fields(json!({"name": "no id"}))]))]),
            store.clone(),
        );

        job.run(CancellationToken::new()).await.unwrap();
        let stats = job.statistics();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let store = Arc::new(MemoryStore::new());
        let job = EntitySyncJob::new(
            "sessions",
            vec![EntityDefinition::scoped("sessions", "sessions", &["id"])],
            source(vec![("sessions", Some(vec![fields(json!({"id": 1}))]))]),
            store.clone(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(job.run(cancel).await.unwrap_err().is_cancelled());
        assert_eq!(store.count("sessions"), 0);
    }

    #[tokio::test]
    async fn test_for_year_pins_source() {
        let store = Arc::new(MemoryStore::new());
        let job = EntitySyncJob::new(
            "sessions",
            vec![EntityDefinition::scoped("sessions", "sessions", &["id"])],
            source(vec![("sessions", Some(vec![fields(json!({"id": 1}))]))]),
            store.clone(),
        );
        let historical = job.for_year(2019).unwrap();
        historical.run(CancellationToken::new()).await.unwrap();

        assert_eq!(store.records("sessions")[0].fields["year"], json!(2019));
        assert_eq!(job.statistics().created, 0);
    }
}
