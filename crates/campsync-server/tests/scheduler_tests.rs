//! Scheduler integration tests
//!
//! Drive sequences over scripted jobs and check ordering, status reporting,
//! fault isolation, budgets, the historical swap and queue draining.

mod common;

use common::{
    fast_config, init_test_tracing, scheduler_with, scheduler_with_config, Behavior, EventLog, ScriptedJob,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use campsync_server::sync::catalog::{Cadence, JobSpec};
use campsync_server::sync::store::MemoryStore;
use campsync_server::sync::{Catalog, JobState, Phase, SchedulerError, SyncConfig, SyncScheduler};

fn catalog(specs: &[(&str, Phase, Cadence)]) -> Catalog {
    specs
        .iter()
        .fold(Catalog::empty(), |c, (name, phase, cadence)| c.with(JobSpec::new(name, *phase, *cadence)))
}

/// Store with the bootstrap canary populated
fn bootstrapped_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed("divisions", [common::fields(json!({"id": 1, "name": "Boys"}))]);
    store
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_daily_runs_phases_in_order() {
    init_test_tracing();
    let events = EventLog::default();
    let scheduler = scheduler_with(
        vec![
            ScriptedJob::new("camper_history", Behavior::Succeed, &events),
            ScriptedJob::new("attendees", Behavior::Succeed, &events),
            ScriptedJob::new("sessions", Behavior::Succeed, &events),
            ScriptedJob::new("person_custom_values", Behavior::Succeed, &events),
        ],
        catalog(&[
            ("camper_history", Phase::Transform, Cadence::Daily),
            ("attendees", Phase::Source, Cadence::Daily),
            ("sessions", Phase::Source, Cadence::Daily),
            ("person_custom_values", Phase::Expensive, Cadence::OnDemand),
        ]),
        bootstrapped_store(),
    );

    let report = scheduler.run_daily().await.unwrap();

    assert!(report.is_success());
    assert_eq!(
        events.events(),
        vec![
            "start:sessions",
            "end:sessions",
            "start:attendees",
            "end:attendees",
            "start:camper_history",
            "end:camper_history",
        ]
    );
    assert!(scheduler.active_sequence().is_none());
}

#[tokio::test]
async fn test_failed_and_panicking_jobs_do_not_stop_sequence() {
    init_test_tracing();
    let events = EventLog::default();
    let scheduler = scheduler_with(
        vec![
            ScriptedJob::new("sessions", Behavior::Fail("upstream said no".into()), &events),
            ScriptedJob::new("attendees", Behavior::Panic("boom".into()), &events),
            ScriptedJob::new("persons", Behavior::Succeed, &events),
        ],
        catalog(&[
            ("sessions", Phase::Source, Cadence::Daily),
            ("attendees", Phase::Source, Cadence::Daily),
            ("persons", Phase::Source, Cadence::Daily),
        ]),
        bootstrapped_store(),
    );

    let report = scheduler.run_daily().await.unwrap();

    assert_eq!(report.count(JobState::Failed), 2);
    assert_eq!(report.count(JobState::Success), 1);
    assert_eq!(events.started(), vec!["sessions", "attendees", "persons"]);

    let failed = scheduler.status("sessions").unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert!(failed.error.unwrap().contains("upstream said no"));

    let panicked = scheduler.status("attendees").unwrap();
    assert_eq!(panicked.state, JobState::Failed);
    assert!(panicked.error.unwrap().contains("job panicked: boom"));
    assert!(panicked.finished_at.is_some());

    assert_eq!(scheduler.status("persons").unwrap().state, JobState::Success);
    assert!(scheduler.running_jobs().is_empty());
}

#[tokio::test]
async fn test_budget_cancels_job() {
    init_test_tracing();
    let events = EventLog::default();
    let scheduler = scheduler_with(
        vec![ScriptedJob::new("bunks", Behavior::WaitForCancel, &events)],
        Catalog::empty(),
        bootstrapped_store(),
    );

    let status = scheduler
        .run_job("bunks", Some(Duration::from_millis(50)))
        .await
        .unwrap();

    assert_eq!(status.state, JobState::Cancelled);
    assert!(status.error.unwrap().contains("budget"));
    assert_eq!(events.events(), vec!["start:bunks", "end:bunks"]);
}

#[tokio::test]
async fn test_short_budget_is_raised_to_floor() {
    init_test_tracing();
    let events = EventLog::default();
    let mut registry = campsync_server::sync::JobRegistry::new();
    registry.register(Arc::new(ScriptedJob::new(
        "staff",
        Behavior::SleepThenSucceed(Duration::from_millis(200)),
        &events,
    )));
    let config = campsync_server::sync::SyncConfig {
        min_job_budget_secs: 60,
        ..fast_config()
    };
    let scheduler = SyncScheduler::new(registry, Catalog::empty(), bootstrapped_store(), config);

    // 10ms asked, 60s granted
    let status = scheduler
        .run_job("staff", Some(Duration::from_millis(10)))
        .await
        .unwrap();
    assert_eq!(status.state, JobState::Success);
}

#[tokio::test]
async fn test_pending_status_and_single_active_sequence() {
    init_test_tracing();
    let events = EventLog::default();
    let scheduler = scheduler_with(
        vec![
            ScriptedJob::new("sessions", Behavior::SleepThenSucceed(Duration::from_millis(300)), &events),
            ScriptedJob::new("attendees", Behavior::Succeed, &events),
        ],
        catalog(&[
            ("sessions", Phase::Source, Cadence::Daily),
            ("attendees", Phase::Source, Cadence::Daily),
        ]),
        bootstrapped_store(),
    );

    let runner = scheduler.clone();
    let handle = tokio::spawn(async move { runner.run_daily().await });

    wait_until("sessions to start", || {
        scheduler.status("sessions").is_some_and(|s| s.state == JobState::Running)
    })
    .await;

    assert_eq!(scheduler.status("attendees").unwrap().state, JobState::Pending);
    assert_eq!(scheduler.active_sequence().unwrap().name, "daily");
    assert!(matches!(
        scheduler.run_weekly().await,
        Err(SchedulerError::SequenceActive(name)) if name == "daily"
    ));

    let report = handle.await.unwrap().unwrap();
    assert!(report.is_success());
    assert_eq!(scheduler.status("attendees").unwrap().state, JobState::Success);
    assert!(scheduler.active_sequence().is_none());
}

#[tokio::test]
async fn test_bootstrap_runs_weekly_jobs_first() {
    init_test_tracing();
    let events = EventLog::default();
    let store = Arc::new(MemoryStore::new());
    let scheduler = scheduler_with(
        vec![
            ScriptedJob::new("divisions", Behavior::Succeed, &events),
            ScriptedJob::new("sessions", Behavior::Succeed, &events),
        ],
        catalog(&[
            ("divisions", Phase::Source, Cadence::Weekly),
            ("sessions", Phase::Source, Cadence::Daily),
        ]),
        store.clone(),
    );

    let report = scheduler.run_daily().await.unwrap();
    assert_eq!(report.name, "daily");
    assert_eq!(events.started(), vec!["divisions", "sessions"]);

    // Once the canary collection has rows the weekly jobs stay out of daily
    store.seed("divisions", [common::fields(json!({"id": 1}))]);
    scheduler.run_daily().await.unwrap();
    assert_eq!(events.started(), vec!["divisions", "sessions", "sessions"]);
}

#[tokio::test]
async fn test_historical_pins_year_and_restores_jobs() {
    init_test_tracing();
    let events = EventLog::default();
    let scheduler = scheduler_with(
        vec![
            ScriptedJob::new("sessions", Behavior::Succeed, &events),
            ScriptedJob::new("staff", Behavior::Succeed, &events).global(),
            ScriptedJob::new("person_custom_values", Behavior::Succeed, &events),
        ],
        catalog(&[
            ("sessions", Phase::Source, Cadence::Daily),
            ("staff", Phase::Source, Cadence::Daily),
            ("person_custom_values", Phase::Expensive, Cadence::OnDemand),
        ]),
        bootstrapped_store(),
    );

    let report = scheduler.run_historical(2023, true).await.unwrap();

    assert_eq!(report.name, "historical_2023");
    assert_eq!(report.year, Some(2023));
    assert_eq!(events.started(), vec!["sessions@2023", "person_custom_values@2023"]);

    // The current-year instances are back in the registry
    scheduler.run_job("sessions", None).await.unwrap();
    assert_eq!(events.started().last().map(String::as_str), Some("sessions"));
}

#[tokio::test]
async fn test_full_sync_routes_by_year() {
    init_test_tracing();
    let events = EventLog::default();
    let scheduler = scheduler_with(
        vec![
            ScriptedJob::new("sessions", Behavior::Succeed, &events),
            ScriptedJob::new("camper_history", Behavior::Succeed, &events),
            ScriptedJob::new("person_custom_values", Behavior::Succeed, &events),
        ],
        catalog(&[
            ("sessions", Phase::Source, Cadence::Daily),
            ("camper_history", Phase::Transform, Cadence::Daily),
            ("person_custom_values", Phase::Expensive, Cadence::OnDemand),
        ]),
        bootstrapped_store(),
    );

    let current = scheduler.run_full_sync(2025, true).await.unwrap();
    assert_eq!(current.name, "full_sync");
    assert_eq!(
        events.started(),
        vec!["sessions", "person_custom_values", "camper_history"]
    );

    let past = scheduler.run_full_sync(2022, false).await.unwrap();
    assert_eq!(past.name, "historical_2022");
    assert_eq!(&events.started()[3..], ["sessions@2022", "camper_history@2022"]);
}

#[tokio::test]
async fn test_custom_values_run_in_parallel() {
    init_test_tracing();
    let events = EventLog::default();
    let scheduler = scheduler_with(
        vec![
            ScriptedJob::new(
                "person_custom_values",
                Behavior::SleepThenSucceed(Duration::from_millis(100)),
                &events,
            ),
            ScriptedJob::new(
                "household_custom_values",
                Behavior::SleepThenSucceed(Duration::from_millis(100)),
                &events,
            ),
        ],
        catalog(&[
            ("person_custom_values", Phase::Expensive, Cadence::OnDemand),
            ("household_custom_values", Phase::Expensive, Cadence::OnDemand),
        ]),
        bootstrapped_store(),
    );

    let report = scheduler.run_custom_values().await.unwrap();

    assert_eq!(report.count(JobState::Success), 2);
    let first_end = events
        .events()
        .iter()
        .position(|e| e.starts_with("end:"))
        .unwrap();
    let last_start = events
        .events()
        .iter()
        .rposition(|e| e.starts_with("start:"))
        .unwrap();
    assert!(last_start < first_end, "both jobs should start before either ends");
}

#[tokio::test]
async fn test_queue_dedup_and_drain() {
    init_test_tracing();
    let events = EventLog::default();
    let job = ScriptedJob::new("sessions", Behavior::Succeed, &events);
    let runs = job.runs();
    let scheduler = scheduler_with(
        vec![job],
        catalog(&[("sessions", Phase::Source, Cadence::Daily)]),
        bootstrapped_store(),
    );

    let first = scheduler.enqueue(2023, "all", false, "alice").unwrap();
    let again = scheduler.enqueue(2023, "all", false, "bob").unwrap();
    assert_eq!(first.entry.id, again.entry.id);
    assert!(again.deduplicated);

    let single = scheduler.enqueue(2025, "sessions", false, "alice").unwrap();
    assert_eq!(single.position, 2);
    assert_eq!(scheduler.queue_position(single.entry.id), 2);

    assert!(matches!(
        scheduler.enqueue(2025, "nope", false, "alice"),
        Err(SchedulerError::Queue(_))
    ));

    assert_eq!(scheduler.process_queue().await, 2);
    assert!(scheduler.queued().is_empty());
    assert_eq!(events.started(), vec!["sessions@2023", "sessions"]);
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_coordinator_drains_queue_and_stops() {
    init_test_tracing();
    let events = EventLog::default();
    let scheduler = scheduler_with_config(
        vec![ScriptedJob::new("sessions", Behavior::Succeed, &events)],
        catalog(&[("sessions", Phase::Source, Cadence::Daily)]),
        bootstrapped_store(),
        SyncConfig {
            enabled: true,
            ..fast_config()
        },
    );

    let handle = scheduler.start();
    scheduler.enqueue(2021, "all", false, "ops").unwrap();

    wait_until("queued sync to run", || {
        events.started().iter().any(|e| e == "sessions@2021")
    })
    .await;
    // The immediate daily tick ran as well
    wait_until("daily run", || events.started().iter().any(|e| e == "sessions")).await;

    scheduler.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_queue_drains_with_cadence_disabled() {
    init_test_tracing();
    let events = EventLog::default();
    let scheduler = scheduler_with(
        vec![ScriptedJob::new("sessions", Behavior::Succeed, &events)],
        catalog(&[("sessions", Phase::Source, Cadence::Daily)]),
        bootstrapped_store(),
    );
    assert!(!scheduler.config().enabled);

    let handle = scheduler.start();
    scheduler.enqueue(2021, "all", false, "ops").unwrap();

    wait_until("queued sync to run", || {
        events.started().iter().any(|e| e == "sessions@2021")
    })
    .await;
    wait_until("queue to empty", || scheduler.queued().is_empty()).await;

    // No timed cadence fired
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!events.started().iter().any(|e| e == "sessions"));

    scheduler.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
