//! Derived per-camper history rows
//!
//! Built purely from local data: one `camper_history` row per person
//! attending in the run year, with their sessions that year and how many
//! distinct years they have attended up to and including it.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::sync::identity::{scope_from_value, KeySpec, SCOPE_FIELD};
use crate::sync::job::{check_cancelled, JobError, SyncJob};
use crate::sync::reconcile::{id_field, FetchOutcome, Reconciler};
use crate::sync::stats::SyncStats;
use crate::sync::store::{Fields, Filter, Record, RecordStore, DEFAULT_PAGE_SIZE};

pub const CAMPER_HISTORY: &str = "camper_history";
const ATTENDEES: &str = "attendees";
const PERSONS: &str = "persons";

/// Fields compared on update
const COMPARED: [&str; 5] = ["first_name", "last_name", "session_ids", "sessions_count", "years_at_camp"];

pub struct CamperHistoryJob {
    year: i32,
    store: Arc<dyn RecordStore>,
    last_stats: Mutex<SyncStats>,
}

#[derive(Debug, Default)]
struct Attendance {
    sessions: BTreeSet<i64>,
    years: BTreeSet<i32>,
}

impl CamperHistoryJob {
    pub fn new(year: i32, store: Arc<dyn RecordStore>) -> Self {
        Self {
            year,
            store,
            last_stats: Mutex::new(SyncStats::default()),
        }
    }

    async fn read(&self, collection: &str, filter: &Filter) -> Result<Vec<Record>, JobError> {
        self.store
            .list_all(collection, filter, DEFAULT_PAGE_SIZE)
            .await
            .map_err(|e| {
                warn!(job = CAMPER_HISTORY, collection, error = %e, "Upstream read failed");
                JobError::MissingUpstream(collection.to_string())
            })
    }

    /// Rows to store, keyed by person id
    async fn derive(&self) -> Result<BTreeMap<i64, Fields>, JobError> {
        let attendees = self.read(ATTENDEES, &Filter::all()).await?;
        let persons = self.read(PERSONS, &Filter::year(self.year)).await?;

        let mut attendance: HashMap<i64, Attendance> = HashMap::new();
        for row in &attendees {
            let (Some(person_id), Some(year)) = (
                id_field(&row.fields, "person_id"),
                row.get(SCOPE_FIELD).and_then(scope_from_value),
            ) else {
                continue;
            };
            if year > self.year {
                continue;
            }
            let entry = attendance.entry(person_id).or_default();
            entry.years.insert(year);
            if year == self.year {
                if let Some(session_id) = id_field(&row.fields, "session_id") {
                    entry.sessions.insert(session_id);
                }
            }
        }

        let names: HashMap<i64, &Record> = persons
            .iter()
            .filter_map(|p| id_field(&p.fields, "id").map(|id| (id, p)))
            .collect();

        let mut rows = BTreeMap::new();
        for (person_id, seen) in attendance {
            if seen.sessions.is_empty() {
                continue;
            }
            let person = names.get(&person_id);
            let name = |field: &str| {
                person
                    .and_then(|p| p.get(field))
                    .cloned()
                    .unwrap_or(Value::Null)
            };

            let mut fields = Fields::new();
            fields.insert("person_id".into(), Value::from(person_id));
            fields.insert(SCOPE_FIELD.into(), Value::from(self.year));
            fields.insert("first_name".into(), name("first_name"));
            fields.insert("last_name".into(), name("last_name"));
            fields.insert(
                "session_ids".into(),
                Value::Array(seen.sessions.iter().map(|s| Value::from(*s)).collect()),
            );
            fields.insert("sessions_count".into(), Value::from(seen.sessions.len()));
            fields.insert("years_at_camp".into(), Value::from(seen.years.len()));
            rows.insert(person_id, fields);
        }
        Ok(rows)
    }

    async fn sync(&self, cancel: &CancellationToken, reconciler: &mut Reconciler) -> Result<FetchOutcome, JobError> {
        let rows = self.derive().await?;
        let key = KeySpec::scoped(&["person_id"]);
        let compare: Vec<String> = COMPARED.iter().map(|f| f.to_string()).collect();
        let mut snapshot = reconciler
            .preload(&Filter::year(self.year), |f: &Fields| key.extract(f))
            .await;

        let outcome = FetchOutcome::from_count(rows.len());
        for fields in rows.into_values() {
            check_cancelled(cancel)?;
            let Some(k) = key.extract(&fields) else {
                reconciler.record_error();
                continue;
            };
            reconciler.reconcile_one(k, fields, &mut snapshot, Some(&compare)).await;
        }
        Ok(outcome)
    }
}

#[async_trait]
impl SyncJob for CamperHistoryJob {
    fn name(&self) -> &str {
        CAMPER_HISTORY
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), JobError> {
        let key = KeySpec::scoped(&["person_id"]);
        let mut reconciler = Reconciler::new(self.store.clone(), CAMPER_HISTORY);

        let result = self.sync(&cancel, &mut reconciler).await;
        if let Ok(outcome) = &result {
            if let Err(e) = reconciler
                .delete_orphans(&Filter::year(self.year), |f: &Fields| key.extract(f), outcome)
                .await
            {
                warn!(job = CAMPER_HISTORY, error = %e, "Orphan scan failed");
                reconciler.record_error();
            }
        }

        let stats = reconciler.finish().await;
        info!(job = CAMPER_HISTORY, year = self.year, %stats, "Camper history rebuilt");
        *self.last_stats.lock().unwrap_or_else(|p| p.into_inner()) = stats;
        result.map(|_| ())
    }

    fn statistics(&self) -> SyncStats {
        self.last_stats.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn for_year(&self, year: i32) -> Option<Arc<dyn SyncJob>> {
        Some(Arc::new(Self::new(year, self.store.clone())))
    }
}
