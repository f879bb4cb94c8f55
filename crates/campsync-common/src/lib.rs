//! Campsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the campsync workspace members:
//!
//! - **Error Handling**: [`CampsyncError`] and the environment parsing helper used by
//!   every configuration loader
//! - **Logging**: tracing subscriber setup driven by `LOG_*` variables

pub mod error;
pub mod logging;

pub use error::{env_or, CampsyncError, Result};
