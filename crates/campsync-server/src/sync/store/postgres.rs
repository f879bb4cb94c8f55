//! PostgreSQL record store
//!
//! Every collection lives in the `sync_records` table as JSONB documents.
//! Equality filters are pushed down as a containment test (`data @> $filter`),
//! which the GIN index on `data` serves directly.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use super::{normalize_scope, Fields, ListQuery, Record, RecordStore, SortOrder, StoreError};

/// Record store backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_id(collection: &str, id: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(id).map_err(|_| StoreError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    })
}

fn into_record(id: Uuid, data: Value) -> Record {
    Record {
        id: id.to_string(),
        fields: match data {
            Value::Object(map) => map,
            _ => Fields::new(),
        },
    }
}

fn order_clause(sort: &SortOrder) -> &'static str {
    match sort {
        SortOrder::Created => "ORDER BY seq",
        SortOrder::Ascending(_) => "ORDER BY data -> $5 ASC NULLS FIRST, seq",
        SortOrder::Descending(_) => "ORDER BY data -> $5 DESC NULLS LAST, seq",
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[tracing::instrument(skip(self, query), fields(filter = %query.filter))]
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<Vec<Record>, StoreError> {
        let sort_field = match &query.sort {
            SortOrder::Created => String::new(),
            SortOrder::Ascending(field) | SortOrder::Descending(field) => field.clone(),
        };

        let sql = format!(
            r#"
            SELECT id, data
            FROM sync_records
            WHERE collection = $1 AND data @> $2
            {}
            LIMIT $3 OFFSET $4
            "#,
            order_clause(&query.sort)
        );

        let mut statement = sqlx::query_as::<_, (Uuid, Value)>(&sql)
            .bind(collection)
            .bind(Value::Object(query.filter.conditions().clone()))
            .bind(query.page_size as i64)
            .bind(query.offset as i64);
        if !matches!(query.sort, SortOrder::Created) {
            statement = statement.bind(sort_field);
        }

        let rows = statement.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id, data)| into_record(id, data)).collect())
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<Record, StoreError> {
        let id = Uuid::new_v4();
        let data = Value::Object(normalize_scope(fields));

        sqlx::query(
            r#"
            INSERT INTO sync_records (id, collection, data)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(id)
        .bind(collection)
        .bind(&data)
        .execute(&self.pool)
        .await?;

        Ok(into_record(id, data))
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<Record, StoreError> {
        let uuid = parse_id(collection, id)?;
        let data = Value::Object(normalize_scope(fields));

        let result = sqlx::query(
            r#"
            UPDATE sync_records
            SET data = $3, updated_at = NOW()
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(uuid)
        .bind(&data)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        Ok(into_record(uuid, data))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let uuid = parse_id(collection, id)?;

        let result = sqlx::query("DELETE FROM sync_records WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(uuid)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Each statement above commits on its own, so there is nothing left to
    /// flush; the round trip confirms the pool is still healthy after a batch.
    async fn checkpoint(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_clause_uses_sort_parameter() {
        assert_eq!(order_clause(&SortOrder::Created), "ORDER BY seq");
        assert!(order_clause(&SortOrder::Ascending("name".into())).contains("$5 ASC"));
        assert!(order_clause(&SortOrder::Descending("name".into())).contains("$5 DESC"));
    }

    #[test]
    fn test_invalid_id_is_not_found() {
        assert!(matches!(
            parse_id("sessions", "not-a-uuid"),
            Err(StoreError::NotFound { .. })
        ));
    }
}
