//! Tripflow Server Library
//!
//! HTTP front door of the trip ingestion pipeline.
//!
//! # Overview
//!
//! The server accepts upload notifications and turns each one into exactly one
//! external ingestion job:
//!
//! - **Intake**: `POST /ingest-event` (and the `POST /eventbridge` alias),
//!   authenticated with the `x-webhook-token` header
//! - **Dispatch**: an in-memory FIFO drained by a single worker, so jobs run
//!   strictly one after another in arrival order
//! - **Health**: `GET /healthz` reports queue depth and worker state
//!
//! # Architecture
//!
//! ```text
//! HTTP handler ──normalize──> Dispatcher::submit ──> DispatchQueue
//!                                                        │
//!                                   DispatchWorker <─────┘
//!                                        │
//!                                   JobLauncher::launch ──> tripflow-ingest run --input s3://…
//! ```
//!
//! Accepted events that have not been launched yet live only in memory and
//! are lost if the process exits.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tripflow_server::{api, config::Config, dispatch::{launcher::ProcessLauncher, Dispatcher}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(Config::load()?);
//!     let (dispatcher, _worker) = Dispatcher::start(config.job.clone(), Arc::new(ProcessLauncher));
//!     let state = api::AppState { dispatcher, config };
//!     api::serve(state, std::future::pending()).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod middleware;

// Re-export commonly used types
pub use error::AppError;
