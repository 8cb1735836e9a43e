//! API response types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::dispatch::worker::{WorkerState, WorkerStatus};

/// Body returned when an event has been queued
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AcceptedResponse {
    pub status: String,
    /// Events waiting for launch, this one included
    pub queued: usize,
    pub bucket: String,
    pub key: String,
}

impl AcceptedResponse {
    pub fn new(queued: usize, bucket: String, key: String) -> Self {
        Self {
            status: "accepted".to_string(),
            queued,
            bucket,
            key,
        }
    }
}

impl IntoResponse for AcceptedResponse {
    fn into_response(self) -> Response {
        (StatusCode::ACCEPTED, Json(self)).into_response()
    }
}

/// Liveness body for `GET /healthz`
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub queue: usize,
    pub worker: WorkerState,
    pub launched: u64,
    pub failed: u64,
}

impl HealthResponse {
    pub fn new(queue: usize, status: &WorkerStatus) -> Self {
        Self {
            ok: true,
            queue,
            worker: status.state,
            launched: status.launched,
            failed: status.failed,
        }
    }
}

impl IntoResponse for HealthResponse {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}
