//! Common test utilities for campsync integration tests
//!
//! - Scripted [`SyncJob`] fakes that record start/finish events
//! - An in-memory [`SourceClient`] serving fixed pages per entity
//! - A PostgreSQL testcontainer with migrations applied
//!
//! Not every test binary uses every helper.
#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio_util::sync::CancellationToken;
use tracing::info;

use campsync_server::sync::job::{JobError, SyncJob};
use campsync_server::sync::source::{SourceClient, SourceError};
use campsync_server::sync::store::{Fields, MemoryStore};
use campsync_server::sync::{Catalog, JobRegistry, SyncConfig, SyncScheduler, SyncStats};

// ============================================================================
// Tracing
// ============================================================================

pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,campsync_server=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

// ============================================================================
// Scripted jobs
// ============================================================================

/// Shared, ordered log of `start:<name>` / `end:<name>` events
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Job names in start order
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("start:").map(str::to_string))
            .collect()
    }

    pub fn index_of(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

#[derive(Clone, Debug)]
pub enum Behavior {
    Succeed,
    SleepThenSucceed(Duration),
    Fail(String),
    Panic(String),
    /// Runs until its cancellation token fires
    WaitForCancel,
}

pub struct ScriptedJob {
    name: String,
    behavior: Behavior,
    events: EventLog,
    runs: Arc<AtomicUsize>,
    /// Year this instance is pinned to, when it supports historical runs
    year: Option<i32>,
    year_scoped: bool,
}

impl ScriptedJob {
    pub fn new(name: &str, behavior: Behavior, events: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            events: events.clone(),
            runs: Arc::new(AtomicUsize::new(0)),
            year: None,
            year_scoped: true,
        }
    }

    /// A job with no pinned form; historical runs skip it.
    pub fn global(mut self) -> Self {
        self.year_scoped = false;
        self
    }

    pub fn runs(&self) -> Arc<AtomicUsize> {
        self.runs.clone()
    }

    fn label(&self) -> String {
        match self.year {
            Some(year) => format!("{}@{}", self.name, year),
            None => self.name.clone(),
        }
    }
}

#[async_trait]
impl SyncJob for ScriptedJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, cancel: CancellationToken) -> Result<(), JobError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.events.push(format!("start:{}", self.label()));
        let result = match &self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::SleepThenSucceed(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(*duration) => Ok(()),
                    _ = cancel.cancelled() => Err(JobError::Cancelled),
                }
            },
            Behavior::Fail(message) => Err(JobError::Other(message.clone())),
            Behavior::Panic(message) => panic!("{}", message),
            Behavior::WaitForCancel => {
                cancel.cancelled().await;
                Err(JobError::Cancelled)
            },
        };
        self.events.push(format!("end:{}", self.label()));
        result
    }

    fn statistics(&self) -> SyncStats {
        SyncStats {
            created: self.runs.load(Ordering::SeqCst) as u64,
            ..Default::default()
        }
    }

    fn for_year(&self, year: i32) -> Option<Arc<dyn SyncJob>> {
        if !self.year_scoped {
            return None;
        }
        Some(Arc::new(ScriptedJob {
            name: self.name.clone(),
            behavior: self.behavior.clone(),
            events: self.events.clone(),
            runs: self.runs.clone(),
            year: Some(year),
            year_scoped: true,
        }))
    }
}

/// Settings that keep scheduler tests fast
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        current_year: 2025,
        job_pacing_ms: 0,
        poll_interval_ms: 5,
        min_job_budget_secs: 0,
        job_budget_secs: 30,
        ..Default::default()
    }
}

pub fn scheduler_with(jobs: Vec<ScriptedJob>, catalog: Catalog, store: Arc<MemoryStore>) -> SyncScheduler {
    scheduler_with_config(jobs, catalog, store, fast_config())
}

pub fn scheduler_with_config(
    jobs: Vec<ScriptedJob>,
    catalog: Catalog,
    store: Arc<MemoryStore>,
    config: SyncConfig,
) -> SyncScheduler {
    let mut registry = JobRegistry::new();
    for job in jobs {
        registry.register(Arc::new(job));
    }
    SyncScheduler::new(registry, catalog, store, config)
}

// ============================================================================
// Fake source
// ============================================================================

/// Serves fixed records per entity, paged on request
#[derive(Clone, Default)]
pub struct FakeSource {
    year: i32,
    entities: Arc<Mutex<HashMap<String, Vec<Fields>>>>,
    related: Arc<Mutex<HashMap<(String, i64), Vec<Fields>>>>,
    failing: Arc<Mutex<Vec<String>>>,
}

impl FakeSource {
    pub fn new(year: i32) -> Self {
        Self {
            year,
            ..Default::default()
        }
    }

    pub fn set(&self, entity: &str, rows: Vec<Value>) {
        self.entities
            .lock()
            .unwrap()
            .insert(entity.to_string(), rows.into_iter().map(fields).collect());
    }

    pub fn set_related(&self, entity: &str, parent_id: i64, rows: Vec<Value>) {
        self.related
            .lock()
            .unwrap()
            .insert((entity.to_string(), parent_id), rows.into_iter().map(fields).collect());
    }

    pub fn fail(&self, entity: &str) {
        self.failing.lock().unwrap().push(entity.to_string());
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    fn current_year(&self) -> i32 {
        self.year
    }

    fn with_year(&self, year: i32) -> Arc<dyn SourceClient> {
        Arc::new(Self {
            year,
            ..self.clone()
        })
    }

    async fn fetch_page(&self, entity: &str, page: u32, page_size: usize) -> Result<Vec<Fields>, SourceError> {
        if self.failing.lock().unwrap().iter().any(|e| e == entity) {
            return Err(SourceError::Unavailable(format!("{} is down", entity)));
        }
        let rows = self.entities.lock().unwrap().get(entity).cloned().unwrap_or_default();
        let start = (page as usize).saturating_sub(1) * page_size;
        Ok(rows.into_iter().skip(start).take(page_size).collect())
    }

    async fn fetch_related(&self, entity: &str, parent_id: i64) -> Result<Vec<Fields>, SourceError> {
        if self.failing.lock().unwrap().iter().any(|e| e == entity) {
            return Err(SourceError::Unavailable(format!("{} is down", entity)));
        }
        Ok(self
            .related
            .lock()
            .unwrap()
            .get(&(entity.to_string(), parent_id))
            .cloned()
            .unwrap_or_default())
    }
}

pub fn object(pairs: &[(&str, Value)]) -> Fields {
    let mut map = Map::new();
    for (key, value) in pairs {
        map.insert(key.to_string(), value.clone());
    }
    map
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL test container with the sync schema applied
///
/// The container stops when this value is dropped.
pub struct TestPostgres {
    #[allow(dead_code)]
    container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self { container, pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
