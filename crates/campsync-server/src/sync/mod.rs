//! Camp data synchronization
//!
//! Mirrors collections from the upstream camp management API into the local
//! record store and keeps them reconciled.
//!
//! # Layers
//!
//! - [`identity`] and [`diff`]: composite record keys and field comparison
//! - [`store`] and [`source`]: the two ends of every sync
//! - [`reconcile`]: create, update, skip and orphan deletion for one collection
//! - [`jobs`]: concrete sync jobs built on the reconciler
//! - [`scheduler`]: sequences, cadences, budgets and the request queue

pub mod catalog;
pub mod config;
pub mod diff;
pub mod identity;
pub mod job;
pub mod jobs;
pub mod queue;
pub mod reconcile;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod stats;
pub mod status;
pub mod store;

pub use catalog::{build_registry, Catalog, Phase, PlanStep, SequencePlan};
pub use config::SyncConfig;
pub use identity::{CompositeKey, KeySpec};
pub use job::{JobError, SyncJob};
pub use queue::{Enqueued, QueueError, QueuedSync, SyncQueue, SCOPE_ALL};
pub use reconcile::{FetchOutcome, Reconciler};
pub use registry::JobRegistry;
pub use scheduler::{SchedulerError, SequenceReport, SyncScheduler};
pub use source::{HttpSource, SourceClient, SourceError};
pub use stats::SyncStats;
pub use status::{JobState, JobStatus};
pub use store::{Filter, Record, RecordStore, StoreError};
