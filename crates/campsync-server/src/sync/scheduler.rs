//! Sync scheduler
//!
//! Owns the registry, status tracker and queue behind one reader/writer lock
//! and drives named sequences through them.
//!
//! # Execution model
//!
//! - Each job runs on its own task, launched fire-and-forget. The
//!   coordinator polls for completion instead of awaiting the job.
//! - A job gets a child of the shutdown token, cancelled when its execution
//!   budget runs out. Budgets below the configured floor are raised to it.
//! - A panic inside a job surfaces as a [`tokio::task::JoinError`] and is
//!   recorded as `failed`; it never reaches the coordinator.
//! - A name is never running twice at once. The expensive group is the only
//!   step that runs several jobs together, and those write disjoint
//!   collections.
//!
//! The lock is a `std::sync::RwLock` and is never held across an `.await`.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::catalog::{Catalog, PlanStep, SequencePlan};
use super::config::SyncConfig;
use super::job::{JobError, SyncJob};
use super::queue::{Enqueued, QueueError, QueuedSync, SyncQueue, SCOPE_ALL};
use super::registry::JobRegistry;
use super::stats::SyncStats;
use super::status::{ActiveSequence, Completion, JobState, JobStatus, StatusTracker};
use super::store::RecordStore;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Job {0} is already running")]
    AlreadyRunning(String),

    #[error("Sequence {0} is already active")]
    SequenceActive(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Outcome of one sequence run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceReport {
    pub name: String,
    /// Camp year the jobs were pinned to, for historical runs
    pub year: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Final status of every job that ran, in start order
    pub jobs: Vec<JobStatus>,
    /// Jobs in the plan that could not be started
    pub skipped: Vec<String>,
}

impl SequenceReport {
    fn new(name: &str, year: Option<i32>) -> Self {
        Self {
            name: name.to_string(),
            year,
            started_at: Utc::now(),
            finished_at: None,
            jobs: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn count(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|j| j.state == state).count()
    }

    pub fn is_success(&self) -> bool {
        self.skipped.is_empty() && self.jobs.iter().all(|j| j.state == JobState::Success)
    }
}

#[derive(Debug)]
struct SchedulerState {
    registry: JobRegistry,
    tracker: StatusTracker,
    queue: SyncQueue,
    /// Names whose worker task is in flight
    active: HashSet<String>,
}

struct Inner {
    state: RwLock<SchedulerState>,
    catalog: Catalog,
    store: Arc<dyn RecordStore>,
    config: SyncConfig,
    queue_ready: Notify,
    shutdown: CancellationToken,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, SchedulerState> {
        // Every mutation under the lock is a single map or queue operation,
        // so a poisoned lock still guards consistent data.
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SchedulerState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }
}

/// Clears the active sequence and restores swapped jobs when dropped.
struct SequenceGuard {
    inner: Arc<Inner>,
    restore: Vec<Arc<dyn SyncJob>>,
}

impl Drop for SequenceGuard {
    fn drop(&mut self) {
        let mut state = self.inner.write();
        state.tracker.end_sequence();
        for original in self.restore.drain(..) {
            state.registry.register(original);
        }
    }
}

/// Coordinates sync jobs and sequences
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    pub fn new(
        registry: JobRegistry,
        catalog: Catalog,
        store: Arc<dyn RecordStore>,
        config: SyncConfig,
    ) -> Self {
        let state = SchedulerState {
            registry,
            tracker: StatusTracker::new(),
            queue: SyncQueue::new(config.queue_capacity),
            active: HashSet::new(),
        };
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(state),
                catalog,
                store,
                config,
                queue_ready: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    // ------------------------------------------------------------------
    // Status surface
    // ------------------------------------------------------------------

    pub fn status(&self, name: &str) -> Option<JobStatus> {
        self.inner.read().tracker.status(name)
    }

    pub fn running_jobs(&self) -> Vec<String> {
        self.inner.read().tracker.running_names()
    }

    pub fn active_sequence(&self) -> Option<ActiveSequence> {
        self.inner.read().tracker.sequence()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.read().registry.contains(name)
    }

    pub fn job_names(&self) -> Vec<String> {
        self.inner.read().registry.names()
    }

    /// Last-run counters reported by the job itself
    pub fn statistics(&self, name: &str) -> Option<SyncStats> {
        let job = self.inner.read().registry.get(name)?;
        Some(job.statistics())
    }

    /// Replace or add a job at runtime.
    pub fn register(&self, job: Arc<dyn SyncJob>) {
        self.inner.write().registry.register(job);
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Queue a sync request. `scope` is `all` or a registered job name.
    pub fn enqueue(
        &self,
        year: i32,
        scope: &str,
        include_expensive: bool,
        requested_by: &str,
    ) -> Result<Enqueued, SchedulerError> {
        let enqueued = {
            let mut state = self.inner.write();
            let scope = scope.trim();
            if scope != SCOPE_ALL && !state.registry.contains(scope) {
                return Err(QueueError::InvalidScope(scope.to_string()).into());
            }
            state.queue.enqueue(year, scope, include_expensive, requested_by)?
        };

        if enqueued.deduplicated {
            debug!(id = %enqueued.entry.id, "Sync request already queued");
        } else {
            info!(
                id = %enqueued.entry.id,
                year,
                scope = %enqueued.entry.scope,
                include_expensive,
                requested_by,
                position = enqueued.position,
                "Sync request queued"
            );
            self.inner.queue_ready.notify_one();
        }
        Ok(enqueued)
    }

    pub fn queued(&self) -> Vec<QueuedSync> {
        self.inner.read().queue.list()
    }

    pub fn queue_position(&self, id: Uuid) -> usize {
        self.inner.read().queue.position(id)
    }

    pub fn cancel_queued(&self, id: Uuid) -> bool {
        let cancelled = self.inner.write().queue.cancel(id);
        if cancelled {
            info!(id = %id, "Sync request cancelled");
        }
        cancelled
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Publish a running status for `name` before its worker starts.
    ///
    /// The worker launched later adopts this status, so observers never see
    /// a gap between the request and the run.
    pub fn mark_running(&self, name: &str) -> Result<JobStatus, SchedulerError> {
        let mut state = self.inner.write();
        if !state.registry.contains(name) {
            return Err(SchedulerError::UnknownJob(name.to_string()));
        }
        if state.active.contains(name) {
            return Err(SchedulerError::AlreadyRunning(name.to_string()));
        }
        Ok(state.tracker.mark_running(name))
    }

    /// Start `name` on its own task and return its running status.
    fn launch(&self, name: &str, budget: Option<Duration>) -> Result<JobStatus, SchedulerError> {
        let (job, status) = {
            let mut state = self.inner.write();
            let job = state
                .registry
                .get(name)
                .ok_or_else(|| SchedulerError::UnknownJob(name.to_string()))?;
            if !state.active.insert(name.to_string()) {
                return Err(SchedulerError::AlreadyRunning(name.to_string()));
            }
            let status = state.tracker.mark_running(name);
            (job, status)
        };

        let budget = self.inner.config.effective_budget(budget);
        info!(job = %name, run_id = %status.run_id, budget_secs = budget.as_secs(), "Job started");
        tokio::spawn(supervise(
            self.inner.clone(),
            job,
            name.to_string(),
            status.run_id,
            budget,
        ));
        Ok(status)
    }

    /// Claim `name` and start it in the background without waiting.
    ///
    /// Adopts a status published by [`SyncScheduler::mark_running`]. Fails
    /// with `AlreadyRunning` when another run has already claimed the name.
    pub fn start_job(&self, name: &str, budget: Option<Duration>) -> Result<JobStatus, SchedulerError> {
        self.launch(name, budget)
    }

    /// Run one job outside any sequence and wait for it.
    pub async fn run_job(&self, name: &str, budget: Option<Duration>) -> Result<JobStatus, SchedulerError> {
        let status = self.launch(name, budget)?;
        Ok(self.wait_for(name, status.run_id).await.unwrap_or(status))
    }

    /// Poll until the run of `name` has completed.
    async fn wait_for(&self, name: &str, run_id: Uuid) -> Option<JobStatus> {
        loop {
            {
                let state = self.inner.read();
                if !state.active.contains(name) {
                    let completed = state.tracker.completed(name);
                    if completed.as_ref().is_some_and(|c| c.run_id != run_id) {
                        warn!(job = %name, run_id = %run_id, "Completion was superseded by a later run");
                    }
                    return completed;
                }
            }
            tokio::time::sleep(self.inner.config.poll_interval()).await;
        }
    }

    async fn wait_idle(&self, name: &str) {
        while self.inner.read().active.contains(name) {
            tokio::time::sleep(self.inner.config.poll_interval()).await;
        }
    }

    /// Run one step job, waiting out an in-flight run of the same name first.
    async fn run_step(&self, name: &str) -> Option<JobStatus> {
        for attempt in 0..2 {
            match self.launch(name, None) {
                Ok(status) => return self.wait_for(name, status.run_id).await,
                Err(SchedulerError::AlreadyRunning(_)) if attempt == 0 => {
                    info!(job = %name, "Waiting for in-flight run to finish");
                    self.wait_idle(name).await;
                },
                Err(e) => {
                    warn!(job = %name, error = %e, "Skipping job");
                    return None;
                },
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Sequences
    // ------------------------------------------------------------------

    /// Source and transform jobs for the current year. Runs the weekly
    /// definitions first when the bootstrap canary collection is empty.
    pub async fn run_daily(&self) -> Result<SequenceReport, SchedulerError> {
        let mut plan = self.inner.catalog.daily_plan();
        if self.needs_bootstrap().await {
            plan = self.inner.catalog.weekly_plan().then(plan);
            plan.name = "daily".to_string();
        }
        self.execute(plan, None).await
    }

    pub async fn run_weekly(&self) -> Result<SequenceReport, SchedulerError> {
        self.execute(self.inner.catalog.weekly_plan(), None).await
    }

    /// Both expensive jobs, in parallel.
    pub async fn run_custom_values(&self) -> Result<SequenceReport, SchedulerError> {
        self.execute(self.inner.catalog.custom_values_plan(), None).await
    }

    /// The daily plan pinned to a past year, optionally with the expensive group.
    pub async fn run_historical(
        &self,
        year: i32,
        include_expensive: bool,
    ) -> Result<SequenceReport, SchedulerError> {
        let plan = self
            .inner
            .catalog
            .full_plan(&format!("historical_{}", year), include_expensive);
        self.execute(plan, Some(year)).await
    }

    /// Historical for a past year; otherwise daily (with bootstrap check),
    /// plus the expensive group when asked.
    pub async fn run_full_sync(
        &self,
        year: i32,
        include_expensive: bool,
    ) -> Result<SequenceReport, SchedulerError> {
        if year != self.inner.config.current_year {
            return self.run_historical(year, include_expensive).await;
        }

        let mut plan = self.inner.catalog.full_plan("full_sync", include_expensive);
        if self.needs_bootstrap().await {
            plan = self.inner.catalog.weekly_plan().then(plan);
            plan.name = "full_sync".to_string();
        }
        self.execute(plan, None).await
    }

    async fn needs_bootstrap(&self) -> bool {
        let canary = &self.inner.config.bootstrap_canary;
        match self.inner.store.has_any(canary).await {
            Ok(true) => false,
            Ok(false) => {
                info!(collection = %canary, "Bootstrap canary is empty, running weekly jobs first");
                true
            },
            Err(e) => {
                warn!(collection = %canary, error = %e, "Bootstrap check failed, assuming populated");
                false
            },
        }
    }

    /// Mark the sequence active and, for a pinned year, swap in year-pinned
    /// job instances. Jobs without a pinned form are dropped from the plan.
    fn begin_sequence(
        &self,
        plan: SequencePlan,
        year: Option<i32>,
    ) -> Result<(SequenceGuard, SequencePlan), SchedulerError> {
        let mut state = self.inner.write();
        if let Some(active) = state.tracker.sequence() {
            return Err(SchedulerError::SequenceActive(active.name));
        }

        let mut plan = plan.retain_registered(&state.registry);
        let mut restore = Vec::new();

        if let Some(year) = year {
            let mut unpinned = HashSet::new();
            for name in plan.job_names() {
                let Some(job) = state.registry.get(&name) else {
                    continue;
                };
                match job.for_year(year) {
                    Some(pinned) => {
                        if let Some(original) = state.registry.register(pinned) {
                            restore.push(original);
                        }
                    },
                    None => {
                        warn!(job = %name, year, "Job is not year-scoped, skipping in historical run");
                        unpinned.insert(name);
                    },
                }
            }
            plan = plan.retain_jobs(|name| !unpinned.contains(name));
        }

        state.tracker.begin_sequence(&plan.name, plan.job_names());
        let guard = SequenceGuard {
            inner: self.inner.clone(),
            restore,
        };
        Ok((guard, plan))
    }

    async fn execute(&self, plan: SequencePlan, year: Option<i32>) -> Result<SequenceReport, SchedulerError> {
        let (guard, plan) = self.begin_sequence(plan, year)?;
        let mut report = SequenceReport::new(&plan.name, year);
        let pacing = self.inner.config.job_pacing();
        let shutdown = self.inner.shutdown.clone();

        info!(sequence = %plan.name, year = ?year, steps = plan.steps.len(), "Sequence started");

        for (index, step) in plan.steps.iter().enumerate() {
            if shutdown.is_cancelled() {
                warn!(sequence = %plan.name, "Shutdown requested, stopping sequence");
                report.skipped.extend(
                    plan.steps[index..]
                        .iter()
                        .flat_map(PlanStep::job_names),
                );
                break;
            }

            match step {
                PlanStep::Job(name) => match self.run_step(name).await {
                    Some(status) => report.jobs.push(status),
                    None => report.skipped.push(name.clone()),
                },
                PlanStep::Parallel(names) => {
                    let results = join_all(names.iter().map(|name| self.run_step(name))).await;
                    for (name, result) in names.iter().zip(results) {
                        match result {
                            Some(status) => report.jobs.push(status),
                            None => report.skipped.push(name.clone()),
                        }
                    }
                },
            }

            if index + 1 < plan.steps.len() && !pacing.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(pacing) => {},
                    _ = shutdown.cancelled() => {},
                }
            }
        }

        drop(guard);
        report.finished_at = Some(Utc::now());
        info!(
            sequence = %report.name,
            succeeded = report.count(JobState::Success),
            failed = report.count(JobState::Failed),
            cancelled = report.count(JobState::Cancelled),
            skipped = report.skipped.len(),
            "Sequence finished"
        );
        Ok(report)
    }

    /// Run queued requests one at a time until the queue is empty.
    ///
    /// Returns how many requests were taken off the queue.
    pub async fn process_queue(&self) -> usize {
        let mut processed = 0;
        loop {
            if self.inner.shutdown.is_cancelled() {
                break;
            }
            if self.active_sequence().is_some() {
                debug!("Sequence active, leaving queue for later");
                break;
            }

            let next = self.inner.write().queue.dequeue();
            let Some(request) = next else {
                break;
            };

            info!(id = %request.id, year = request.year, scope = %request.scope, "Processing queued sync");
            processed += 1;
            match self.run_request(&request).await {
                Ok(report) => {
                    info!(id = %request.id, sequence = %report.name, success = report.is_success(), "Queued sync finished")
                },
                Err(e) => warn!(id = %request.id, error = %e, "Queued sync failed to start"),
            }
        }
        processed
    }

    async fn run_request(&self, request: &QueuedSync) -> Result<SequenceReport, SchedulerError> {
        if request.is_full_sync() {
            return self.run_full_sync(request.year, request.include_expensive).await;
        }

        let plan = SequencePlan {
            name: format!("on_demand_{}", request.scope),
            steps: vec![PlanStep::Job(request.scope.clone())],
        };
        let pinned = (request.year != self.inner.config.current_year).then_some(request.year);
        self.execute(plan, pinned).await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Spawn the coordination loop until [`SyncScheduler::shutdown`].
    ///
    /// Queued requests are always drained. The daily and weekly cadences run
    /// only when [`SyncConfig::enabled`] is set.
    pub fn start(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move { scheduler.coordinate().await })
    }

    async fn coordinate(&self) {
        let config = &self.inner.config;
        let shutdown = self.inner.shutdown.clone();

        let mut daily = tokio::time::interval(config.daily_interval());
        daily.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut weekly = tokio::time::interval_at(
            Instant::now() + config.weekly_interval(),
            config.weekly_interval(),
        );
        weekly.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The queue always drains; only the timed cadence follows `enabled`.
        let cadence = config.enabled;
        info!(
            cadence,
            daily_secs = config.daily_interval_secs,
            weekly_secs = config.weekly_interval_secs,
            year = config.current_year,
            "Sync scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = daily.tick(), if cadence => log_result("daily", self.run_daily().await),
                _ = weekly.tick(), if cadence => log_result("weekly", self.run_weekly().await),
                _ = self.inner.queue_ready.notified() => {
                    self.process_queue().await;
                },
            }
        }

        info!("Sync scheduler stopped");
    }

    /// Stop the coordination loop and cancel running jobs.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }
}

fn log_result(sequence: &str, result: Result<SequenceReport, SchedulerError>) {
    if let Err(e) = result {
        warn!(sequence, error = %e, "Sequence did not run");
    }
}

/// Run one job to completion and record how it ended.
async fn supervise(inner: Arc<Inner>, job: Arc<dyn SyncJob>, name: String, run_id: Uuid, budget: Duration) {
    let cancel = inner.shutdown.child_token();

    let deadline = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(budget) => {
                    cancel.cancel();
                    true
                },
                _ = cancel.cancelled() => false,
            }
        })
    };

    let worker = {
        let job = job.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { job.run(cancel).await })
    };

    let joined = worker.await;
    let shutting_down = inner.shutdown.is_cancelled();
    cancel.cancel();
    let budget_exceeded = deadline.await.unwrap_or(false);

    let (state, error) = match joined {
        Ok(Ok(())) => (JobState::Success, None),
        Ok(Err(JobError::Cancelled)) => {
            let reason = if budget_exceeded {
                format!("execution budget of {}s exceeded", budget.as_secs())
            } else if shutting_down {
                "cancelled by shutdown".to_string()
            } else {
                "cancelled".to_string()
            };
            (JobState::Cancelled, Some(reason))
        },
        Ok(Err(e)) => (JobState::Failed, Some(e.to_string())),
        Err(e) if e.is_panic() => (
            JobState::Failed,
            Some(format!("job panicked: {}", panic_message(e.into_panic()))),
        ),
        Err(e) => (JobState::Cancelled, Some(e.to_string())),
    };

    let stats = std::panic::catch_unwind(AssertUnwindSafe(|| job.statistics())).unwrap_or_default();

    match state {
        JobState::Success => info!(job = %name, run_id = %run_id, %stats, "Job completed"),
        JobState::Cancelled => warn!(job = %name, run_id = %run_id, reason = ?error, "Job cancelled"),
        _ => error!(job = %name, run_id = %run_id, error = ?error, "Job failed"),
    }

    let mut guard = inner.write();
    guard.tracker.finish(&name, run_id, Completion { state, error, stats });
    guard.active.remove(&name);
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
