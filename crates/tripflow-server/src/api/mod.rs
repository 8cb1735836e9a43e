pub mod response;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{body::Bytes, extract::State, routing::{get, post}, Router};
use tripflow_common::IngestionEvent;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::AppError;
use crate::middleware;
use response::{AcceptedResponse, HealthResponse};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub config: Arc<Config>,
}

/// Bind and serve until `shutdown` resolves
pub async fn serve<F>(state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    )
    .parse()?;

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    let intake = Router::new()
        .route("/ingest-event", post(ingest_event))
        .route("/eventbridge", post(ingest_event))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::require_webhook_token,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(intake)
        .layer(middleware::tracing_layer())
        .with_state(state)
}

async fn ingest_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<AcceptedResponse, AppError> {
    let event = IngestionEvent::from_slice(&body)?;
    let queued = state.dispatcher.submit(event.clone())?;

    tracing::info!(bucket = %event.bucket, key = %event.key, queued, "Event accepted");

    Ok(AcceptedResponse::new(queued, event.bucket, event.key))
}

async fn healthz(State(state): State<AppState>) -> HealthResponse {
    HealthResponse::new(
        state.dispatcher.queue_depth(),
        &state.dispatcher.worker_status(),
    )
}
