//! Feature modules implementing the campsync API
//!
//! Each feature is a vertical slice with its own commands, queries and routes.
//! Commands and queries carry `mediator::Request` markers so handlers can be
//! dispatched through a mediator as well as called directly.
//!
//! # Features
//!
//! - **sync**: job status, on-demand runs and the sync request queue

pub mod shared;
pub mod sync;

use axum::{http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::sync::SyncScheduler;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub scheduler: SyncScheduler,
}

/// Creates the API router with all feature routes mounted
///
/// - `/health` - Liveness
/// - `/sync` - Sync jobs and queue
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .route("/health", get(health_check))
        .nest("/sync", sync::sync_routes().with_state(state.scheduler))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}
