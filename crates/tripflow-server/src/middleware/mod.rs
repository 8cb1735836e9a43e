//! Middleware for the dispatcher
//!
//! This module provides middleware for:
//! - Request logging with tracing
//! - Shared-secret webhook authentication

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::api::AppState;
use crate::error::AppError;

/// Header carrying the shared secret
pub const WEBHOOK_TOKEN_HEADER: &str = "x-webhook-token";

/// Create tracing/logging layer
pub fn tracing_layer(
) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
{
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(tower_http::LatencyUnit::Micros),
        )
}

/// Reject requests whose `x-webhook-token` does not match the configured secret
pub async fn require_webhook_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !token_matches(request.headers(), &state.config.webhook.token) {
        tracing::warn!(uri = %request.uri(), "Rejected request with missing or invalid webhook token");
        return Err(AppError::Unauthorized("invalid webhook token".to_string()));
    }

    Ok(next.run(request).await)
}

/// Tokens are compared as SHA-256 digests
fn token_matches(headers: &HeaderMap, expected: &str) -> bool {
    let Some(provided) = headers.get(WEBHOOK_TOKEN_HEADER) else {
        return false;
    };

    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}
