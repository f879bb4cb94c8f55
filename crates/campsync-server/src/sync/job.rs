//! Job contract shared by every sync job

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::source::SourceError;
use super::stats::SyncStats;
use super::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Cooperative stop; not a failure
    #[error("Job cancelled")]
    Cancelled,

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Datastore error: {0}")]
    Store(#[from] StoreError),

    #[error("Required upstream collection {0} is unavailable")]
    MissingUpstream(String),

    #[error("{0}")]
    Other(String),
}

impl JobError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
    }
}

/// A named, independently runnable reconciliation job
///
/// `run` must check `cancel` between pages and records and return
/// [`JobError::Cancelled`] promptly once it fires. Whatever was written
/// before that stays valid.
#[async_trait]
pub trait SyncJob: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, cancel: CancellationToken) -> Result<(), JobError>;

    /// Counters of the most recent run
    fn statistics(&self) -> SyncStats;

    /// An instance of this job pinned to another camp year, for jobs whose
    /// data is year-scoped. Global jobs keep the default.
    fn for_year(&self, _year: i32) -> Option<Arc<dyn SyncJob>> {
        None
    }
}

/// Return [`JobError::Cancelled`] if `cancel` has fired.
pub fn check_cancelled(cancel: &CancellationToken) -> Result<(), JobError> {
    if cancel.is_cancelled() {
        Err(JobError::Cancelled)
    } else {
        Ok(())
    }
}
