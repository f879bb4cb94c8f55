//! PostgreSQL record store tests
//!
//! These tests require Docker to be running. Run with:
//!
//! ```bash
//! cargo test --test pg_store_tests -- --ignored --nocapture
//! ```

mod common;

use common::{fields, init_test_tracing, TestPostgres};
use serde_json::json;
use std::sync::Arc;

use campsync_server::sync::reconcile::{FetchOutcome, Reconciler};
use campsync_server::sync::store::{ListQuery, PgRecordStore, RecordStore};
use campsync_server::sync::{Filter, KeySpec, StoreError};

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_crud_and_year_filter() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL container");
    let store = PgRecordStore::new(pg.pool().clone());

    assert!(!store.has_any("sessions").await.unwrap());

    let a = store
        .create("sessions", fields(json!({"id": 10, "year": 2025, "name": "A"})))
        .await
        .unwrap();
    store
        .create("sessions", fields(json!({"id": 10, "year": 2024, "name": "A"})))
        .await
        .unwrap();
    store
        .create("bunks", fields(json!({"id": 10, "year": 2025})))
        .await
        .unwrap();

    let current = store
        .list("sessions", &ListQuery::new(Filter::year(2025)))
        .await
        .unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(current[0].id, a.id);

    let updated = store
        .update("sessions", &a.id, fields(json!({"id": 10, "year": 2025, "name": "B"})))
        .await
        .unwrap();
    assert_eq!(updated.get("name"), Some(&json!("B")));

    store.delete("sessions", &a.id).await.unwrap();
    assert!(matches!(
        store.delete("sessions", &a.id).await,
        Err(StoreError::NotFound { .. })
    ));

    let all = store.list_all("sessions", &Filter::all(), 1).await.unwrap();
    assert_eq!(all.len(), 1);
    store.checkpoint().await.unwrap();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_reconciler_against_postgres() {
    init_test_tracing();
    let pg = TestPostgres::start().await.expect("Failed to start PostgreSQL container");
    let store: Arc<dyn RecordStore> = Arc::new(PgRecordStore::new(pg.pool().clone()));
    let key = KeySpec::scoped(&["id"]);

    store
        .create("persons", fields(json!({"id": 1, "year": 2025, "name": "Ada"})))
        .await
        .unwrap();
    store
        .create("persons", fields(json!({"id": 9, "year": 2025, "name": "Gone"})))
        .await
        .unwrap();

    let mut reconciler = Reconciler::new(store.clone(), "persons");
    let mut snapshot = reconciler
        .preload(&Filter::year(2025), |f| key.extract(f))
        .await;
    assert_eq!(snapshot.len(), 2);

    let incoming = [
        fields(json!({"id": 1, "year": 2025, "name": "Ada"})),
        fields(json!({"id": 2, "year": 2025, "name": "Ben"})),
    ];
    for row in incoming {
        let k = key.extract(&row).unwrap();
        reconciler.reconcile_one(k, row, &mut snapshot, None).await;
    }
    let deleted = reconciler
        .delete_orphans(&Filter::year(2025), |f| key.extract(f), &FetchOutcome::Succeeded(2))
        .await
        .unwrap();
    let stats = reconciler.finish().await;

    assert_eq!(deleted, 1);
    assert_eq!((stats.created, stats.skipped, stats.deleted), (1, 1, 1));
    assert_eq!(store.list_all("persons", &Filter::all(), 100).await.unwrap().len(), 2);
}
