//! Campsync Server Library
//!
//! Keeps a local record store synchronized with an upstream camp management
//! system.
//!
//! # Overview
//!
//! - **Sync engine** ([`sync`]): composite keys, field diffing and per-collection
//!   reconciliation with guarded orphan deletion
//! - **Scheduler** ([`sync::scheduler`]): daily, weekly, on-demand and historical
//!   sequences with execution budgets and a deduplicating request queue
//! - **HTTP surface** ([`features`]): job status, on-demand runs and queue
//!   management under `/api/v1/sync`
//! - **Configuration** ([`config`]): environment-based settings
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use campsync_server::config::Config;
//! use campsync_server::sync::{build_registry, store::memory::MemoryStore, Catalog, HttpSource, SyncScheduler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let store = Arc::new(MemoryStore::new());
//!     let source = Arc::new(HttpSource::new(
//!         config.sync.source_base_url.clone(),
//!         config.sync.current_year,
//!         config.sync.source_timeout(),
//!     )?);
//!     let registry = build_registry(&config.sync, source, store.clone());
//!     let scheduler = SyncScheduler::new(registry, Catalog::default(), store, config.sync);
//!     let report = scheduler.run_daily().await?;
//!     println!("{} jobs", report.jobs.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod features;
pub mod middleware;
pub mod sync;

// Re-export commonly used types
pub use error::AppError;
