//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tripflow_common::EventError;

use crate::dispatch::queue::QueueClosed;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    InvalidEvent(#[from] EventError),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Dispatch queue is closed")]
    QueueClosed(#[from] QueueClosed),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InvalidEvent(ref e) => (StatusCode::BAD_REQUEST, e.to_string()),
            AppError::Unauthorized(ref message) => (StatusCode::UNAUTHORIZED, message.clone()),
            AppError::BadRequest(ref message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::QueueClosed(ref e) => {
                tracing::error!("Cannot accept event: {}", e);
                (StatusCode::SERVICE_UNAVAILABLE, "Dispatcher is shutting down".to_string())
            },
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
