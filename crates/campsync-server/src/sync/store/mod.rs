//! Local datastore collaborator
//!
//! The reconciliation engine only needs filtered paged reads, single-record
//! writes and a durability checkpoint. [`RecordStore`] is that contract;
//! [`MemoryStore`] backs tests and the `--memory` dev mode, [`PgRecordStore`]
//! keeps every collection in one JSONB table.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgRecordStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::diff::values_equal;
use super::identity::{scope_from_value, SCOPE_FIELD};

/// Flat field map of one record
pub type Fields = Map<String, Value>;

/// Default page size for full collection scans
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// A stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub fields: Fields,
}

impl Record {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Conjunction of field equalities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    equals: Fields,
}

impl Filter {
    /// Matches every record
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.insert(field.into(), value.into());
        self
    }

    /// Records of one camp year
    pub fn year(year: i32) -> Self {
        Self::all().eq(crate::sync::identity::SCOPE_FIELD, year)
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }

    pub fn conditions(&self) -> &Fields {
        &self.equals
    }

    /// The scope field matches on its year value, the way keys read it.
    pub fn matches(&self, fields: &Fields) -> bool {
        self.equals.iter().all(|(name, expected)| {
            fields.get(name).is_some_and(|actual| {
                if name == SCOPE_FIELD {
                    if let (Some(a), Some(b)) = (scope_from_value(actual), scope_from_value(expected)) {
                        return a == b;
                    }
                }
                values_equal(actual, expected)
            })
        })
    }
}

/// Store the scope field as a plain integer when it reads as a year.
///
/// Keeps containment filters and key extraction in agreement.
pub fn normalize_scope(mut fields: Fields) -> Fields {
    if let Some(year) = fields.get(SCOPE_FIELD).and_then(scope_from_value) {
        fields.insert(SCOPE_FIELD.to_string(), Value::from(year));
    }
    fields
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.equals.is_empty() {
            return f.write_str("*");
        }
        let parts: Vec<String> = self
            .equals
            .iter()
            .map(|(k, v)| format!("{} = {}", k, v))
            .collect();
        f.write_str(&parts.join(" && "))
    }
}

/// Sort order for paged reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Insertion order (stable across pages)
    #[default]
    Created,
    Ascending(String),
    Descending(String),
}

/// One paged read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    pub filter: Filter,
    pub sort: SortOrder,
    pub page_size: usize,
    pub offset: usize,
}

impl ListQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: SortOrder::Created,
            page_size: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Datastore unavailable: {0}")]
    Unavailable(String),

    #[error("Record {id} not found in {collection}")]
    NotFound { collection: String, id: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Local datastore operations used by the sync engine
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read one page of `collection`.
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<Vec<Record>, StoreError>;

    /// Insert a record and return it with its assigned id.
    async fn create(&self, collection: &str, fields: Fields) -> Result<Record, StoreError>;

    /// Replace the fields of an existing record.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<Record, StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Force written data to durable storage.
    async fn checkpoint(&self) -> Result<(), StoreError>;

    /// Read every page of `collection` matching `filter`.
    async fn list_all(
        &self,
        collection: &str,
        filter: &Filter,
        page_size: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let mut records = Vec::new();
        let mut query = ListQuery::new(filter.clone()).page_size(page_size);
        loop {
            let page = self.list(collection, &query).await?;
            let fetched = page.len();
            records.extend(page);
            if fetched < query.page_size {
                break;
            }
            query.offset += fetched;
        }
        Ok(records)
    }

    /// Whether `collection` holds at least one record.
    async fn has_any(&self, collection: &str) -> Result<bool, StoreError> {
        let page = self
            .list(collection, &ListQuery::new(Filter::all()).page_size(1))
            .await?;
        Ok(!page.is_empty())
    }
}
