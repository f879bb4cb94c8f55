//! In-process record store

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use uuid::Uuid;

use super::{normalize_scope, Fields, ListQuery, Record, RecordStore, SortOrder, StoreError};

#[derive(Debug, Default)]
struct Collection {
    /// Records in insertion order
    records: Vec<Record>,
}

/// Record store held entirely in memory
///
/// Data is lost on drop; checkpoints only bump a counter.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
    checkpoints: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert records directly, bypassing the sync engine.
    pub fn seed(&self, collection: &str, rows: impl IntoIterator<Item = Fields>) -> Vec<Record> {
        let mut guard = self.lock();
        let target = guard.entry(collection.to_string()).or_default();
        rows.into_iter()
            .map(|fields| {
                let record = Record {
                    id: Uuid::new_v4().to_string(),
                    fields: normalize_scope(fields),
                };
                target.records.push(record.clone());
                record
            })
            .collect()
    }

    /// Snapshot of every record in a collection.
    pub fn records(&self, collection: &str) -> Vec<Record> {
        self.lock()
            .get(collection)
            .map(|c| c.records.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.lock().get(collection).map_or(0, |c| c.records.len())
    }

    pub fn checkpoints(&self) -> u64 {
        self.checkpoints.load(AtomicOrdering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Collection>> {
        // A panic while holding the lock cannot leave a half-written record:
        // every mutation is a single push, assignment or removal.
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn compare_field(a: &Record, b: &Record, field: &str) -> Ordering {
    let key = |r: &Record| r.fields.get(field).cloned().unwrap_or(Value::Null);
    match (key(a), key(b)) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<Vec<Record>, StoreError> {
        let guard = self.lock();
        let Some(target) = guard.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<&Record> = target
            .records
            .iter()
            .filter(|r| query.filter.matches(&r.fields))
            .collect();

        match &query.sort {
            SortOrder::Created => {},
            SortOrder::Ascending(field) => matching.sort_by(|a, b| compare_field(a, b, field)),
            SortOrder::Descending(field) => matching.sort_by(|a, b| compare_field(b, a, field)),
        }

        Ok(matching
            .into_iter()
            .skip(query.offset)
            .take(query.page_size)
            .cloned()
            .collect())
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<Record, StoreError> {
        let record = Record {
            id: Uuid::new_v4().to_string(),
            fields: normalize_scope(fields),
        };
        self.lock()
            .entry(collection.to_string())
            .or_default()
            .records
            .push(record.clone());
        Ok(record)
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<Record, StoreError> {
        let mut guard = self.lock();
        let existing = guard
            .get_mut(collection)
            .and_then(|c| c.records.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        existing.fields = normalize_scope(fields);
        Ok(existing.clone())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut guard = self.lock();
        let target = guard.get_mut(collection).ok_or_else(|| StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        })?;
        let before = target.records.len();
        target.records.retain(|r| r.id != id);
        if target.records.len() == before {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn checkpoint(&self) -> Result<(), StoreError> {
        self.checkpoints.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::store::Filter;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_paged_reads_cover_collection() {
        let store = MemoryStore::new();
        store.seed(
            "sessions",
            (0..7).map(|i| fields(json!({"id": i, "year": 2025}))),
        );
        store.seed("sessions", [fields(json!({"id": 99, "year": 2024}))]);

        let all = store.list_all("sessions", &Filter::year(2025), 3).await.unwrap();
        assert_eq!(all.len(), 7);

        let page = store
            .list("sessions", &ListQuery::new(Filter::all()).page_size(3).offset(6))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn test_sorted_reads() {
        let store = MemoryStore::new();
        store.seed(
            "bunks",
            [3, 1, 2].into_iter().map(|i| fields(json!({"id": i}))),
        );
        let query = ListQuery::new(Filter::all()).sort(SortOrder::Descending("id".into()));
        let ids: Vec<_> = store
            .list("bunks", &query)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.fields["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(3), json!(2), json!(1)]);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_record() {
        let store = MemoryStore::new();
        let err = store.update("persons", "nope", Fields::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        let created = store.create("persons", fields(json!({"id": 1}))).await.unwrap();
        store.delete("persons", &created.id).await.unwrap();
        assert!(store.delete("persons", &created.id).await.is_err());
        assert!(!store.has_any("persons").await.unwrap());
    }
}
