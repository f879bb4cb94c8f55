//! Sync feature module
//!
//! Job status, on-demand runs and the sync request queue.

pub mod commands;
pub mod queries;
pub mod routes;

pub use routes::sync_routes;
