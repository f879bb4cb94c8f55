//! Sync API routes
//!
//! Operator surface over the running scheduler.
//!
//! # Route Structure
//!
//! - `GET /api/v1/sync/jobs/running` - Running jobs and the active sequence
//! - `GET /api/v1/sync/jobs/:name/status` - Status of one job
//! - `POST /api/v1/sync/jobs/:name/run` - Start a job now
//! - `GET /api/v1/sync/queue` - Waiting sync requests
//! - `POST /api/v1/sync/queue` - Queue a sync request
//! - `GET /api/v1/sync/queue/:id/position` - Position of a queued request
//! - `DELETE /api/v1/sync/queue/:id` - Cancel a queued request

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use super::{
    commands::{self, CancelQueuedCommand, EnqueueSyncCommand, RunJobCommand},
    queries::{self, GetJobStatusQuery, GetQueuePositionQuery, ListQueueQuery, ListRunningJobsQuery},
};
use crate::error::AppError;
use crate::features::shared::ApiResponse;
use crate::sync::SyncScheduler;

pub fn sync_routes() -> Router<SyncScheduler> {
    Router::new()
        .route("/jobs/running", get(list_running_jobs))
        .route("/jobs/:name/status", get(get_job_status))
        .route("/jobs/:name/run", post(run_job))
        .route("/queue", get(list_queue).post(enqueue_sync))
        .route("/queue/:id/position", get(get_queue_position))
        .route("/queue/:id", delete(cancel_queued))
}

// ============================================================================
// Query Handlers
// ============================================================================

async fn list_running_jobs(State(scheduler): State<SyncScheduler>) -> Response {
    let response = queries::running_jobs::handle(&scheduler, ListRunningJobsQuery);
    Json(ApiResponse::success(response)).into_response()
}

async fn get_job_status(
    State(scheduler): State<SyncScheduler>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let response = queries::job_status::handle(&scheduler, GetJobStatusQuery { name })
        .map_err(|e| AppError::NotFound(e.to_string()))?;
    Ok(Json(ApiResponse::success(response)).into_response())
}

async fn list_queue(State(scheduler): State<SyncScheduler>) -> Response {
    let response = queries::queue::handle_list(&scheduler, ListQueueQuery);
    Json(ApiResponse::success(response)).into_response()
}

async fn get_queue_position(State(scheduler): State<SyncScheduler>, Path(id): Path<Uuid>) -> Response {
    let response = queries::queue::handle_position(&scheduler, GetQueuePositionQuery { id });
    Json(ApiResponse::success(response)).into_response()
}

// ============================================================================
// Command Handlers
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct RunJobParams {
    budget_secs: Option<u64>,
}

/// `202 Accepted` with the running status; `409` when already running.
#[tracing::instrument(skip(scheduler, params), fields(job = %name))]
async fn run_job(
    State(scheduler): State<SyncScheduler>,
    Path(name): Path<String>,
    Query(params): Query<RunJobParams>,
) -> Result<Response, AppError> {
    let command = RunJobCommand {
        name,
        budget_secs: params.budget_secs,
    };
    let response = commands::run_job::handle(&scheduler, command)?;

    tracing::info!(run_id = %response.status.run_id, "Job run requested via API");
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(response))).into_response())
}

/// `201 Created` for a new entry, `200 OK` when an identical request was waiting.
#[tracing::instrument(skip(scheduler, command), fields(year = command.year, scope = %command.scope))]
async fn enqueue_sync(
    State(scheduler): State<SyncScheduler>,
    Json(command): Json<EnqueueSyncCommand>,
) -> Result<Response, AppError> {
    let enqueued = commands::enqueue::handle_enqueue(&scheduler, command)?;
    let status = if enqueued.deduplicated {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ApiResponse::success(enqueued))).into_response())
}

async fn cancel_queued(
    State(scheduler): State<SyncScheduler>,
    Path(id): Path<Uuid>,
) -> Result<Response, AppError> {
    let response = commands::enqueue::handle_cancel(&scheduler, CancelQueuedCommand { id })
        .map_err(|e| AppError::NotFound(e.to_string()))?;
    Ok(Json(ApiResponse::success(response)).into_response())
}
