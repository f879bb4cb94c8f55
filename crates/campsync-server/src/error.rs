//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::sync::{QueueError, SchedulerError, StoreError};

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::UnknownJob(name) => AppError::NotFound(format!("Unknown job: {}", name)),
            SchedulerError::AlreadyRunning(_) | SchedulerError::SequenceActive(_) => {
                AppError::Conflict(err.to_string())
            },
            SchedulerError::Queue(QueueError::Full { .. }) => AppError::Unavailable(err.to_string()),
            SchedulerError::Queue(e) => AppError::BadRequest(e.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => AppError::NotFound(err.to_string()),
            StoreError::Unavailable(_) => AppError::Unavailable(err.to_string()),
            StoreError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                AppError::Internal("A database error occurred".to_string())
            },
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::NotFound(ref message) => (StatusCode::NOT_FOUND, message.clone()),
            AppError::BadRequest(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Conflict(ref message) => (StatusCode::CONFLICT, message.clone()),
            AppError::Unavailable(ref message) => (StatusCode::SERVICE_UNAVAILABLE, message.clone()),
            AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            },
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_errors_map_to_status() {
        let cases = [
            (SchedulerError::UnknownJob("x".into()), StatusCode::NOT_FOUND),
            (SchedulerError::AlreadyRunning("x".into()), StatusCode::CONFLICT),
            (SchedulerError::SequenceActive("daily".into()), StatusCode::CONFLICT),
            (
                SchedulerError::Queue(QueueError::Full { capacity: 1 }),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (SchedulerError::Queue(QueueError::InvalidYear(3)), StatusCode::BAD_REQUEST),
        ];

        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_store_errors_map_to_status() {
        let missing = StoreError::NotFound {
            collection: "sessions".into(),
            id: "x".into(),
        };
        assert_eq!(AppError::from(missing).into_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::from(StoreError::Unavailable("down".into())).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
