//! External source collaborator
//!
//! The CRM-style API is reached only through [`SourceClient`]. Jobs ask it for
//! raw field maps per entity type; the client owns the notion of "current
//! year" and can be cloned pinned to another year for historical runs.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::store::Fields;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Source returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Unexpected response shape from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// Access to the external system of record
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Camp year this client reads
    fn current_year(&self) -> i32;

    /// A client identical to this one but pinned to `year`.
    fn with_year(&self, year: i32) -> Arc<dyn SourceClient>;

    /// One page (1-based) of records for an entity type.
    ///
    /// A page shorter than `page_size` is the last one.
    async fn fetch_page(
        &self,
        entity: &str,
        page: u32,
        page_size: usize,
    ) -> Result<Vec<Fields>, SourceError>;

    /// Records that hang off one parent entity, e.g. the custom field values
    /// of a single person. Costs one remote call per parent.
    async fn fetch_related(&self, entity: &str, parent_id: i64) -> Result<Vec<Fields>, SourceError>;
}

/// JSON-over-HTTP source client
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    year: i32,
}

impl HttpSource {
    pub fn new(base_url: impl Into<String>, year: i32, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("campsync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            year,
        })
    }

    async fn get_records(&self, url: String, query: &[(&str, String)]) -> Result<Vec<Fields>, SourceError> {
        debug!(url = %url, "Fetching from source");
        let response = self.client.get(&url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body: Value = response.json().await?;
        extract_records(body).map_err(|reason| SourceError::Decode { url, reason })
    }
}

/// Accept either a bare JSON array or an envelope with a `results` array.
///
/// A non-object item rejects the whole page. Dropping it would shorten the
/// page and end paging early, turning later records into orphans.
fn extract_records(body: Value) -> Result<Vec<Fields>, String> {
    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut envelope) => match envelope.remove("results") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => return Err(format!("`results` is not an array: {}", other)),
        },
        other => return Err(format!("expected array or object, got {}", other)),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(fields) => Ok(fields),
            other => {
                warn!(index, item = %other, "Non-object record from source");
                Err(format!("item {} is not an object: {}", index, other))
            },
        })
        .collect()
}

#[async_trait]
impl SourceClient for HttpSource {
    fn current_year(&self) -> i32 {
        self.year
    }

    fn with_year(&self, year: i32) -> Arc<dyn SourceClient> {
        Arc::new(Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            year,
        })
    }

    async fn fetch_page(
        &self,
        entity: &str,
        page: u32,
        page_size: usize,
    ) -> Result<Vec<Fields>, SourceError> {
        let url = format!("{}/{}", self.base_url, entity);
        self.get_records(
            url,
            &[
                ("year", self.year.to_string()),
                ("page", page.to_string()),
                ("pageSize", page_size.to_string()),
            ],
        )
        .await
    }

    async fn fetch_related(&self, entity: &str, parent_id: i64) -> Result<Vec<Fields>, SourceError> {
        let url = format!("{}/{}/{}", self.base_url, entity, parent_id);
        self.get_records(url, &[("year", self.year.to_string())]).await
    }
}
