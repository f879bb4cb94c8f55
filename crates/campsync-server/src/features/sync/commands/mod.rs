//! Sync commands

pub mod enqueue;
pub mod run_job;

pub use enqueue::{CancelQueuedCommand, CancelQueuedError, CancelQueuedResponse, EnqueueSyncCommand};
pub use run_job::{RunJobCommand, RunJobResponse};
