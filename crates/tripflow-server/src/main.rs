//! Tripflow Server - Main entry point

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn};
use tripflow_common::logging::{init_logging, LogConfig};

use tripflow_server::{
    api::{self, AppState},
    config::Config,
    dispatch::{launcher::ProcessLauncher, Dispatcher},
};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("tripflow-server".to_string())
        .filter_directives("tripflow_server=debug,tower_http=debug,job_output=info".to_string())
        .build()
        .with_env_overrides()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting Tripflow Server");

    let config = Arc::new(Config::load()?);
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );
    info!(
        binary = %config.job.binary,
        master = %config.job.master,
        driver_memory = %config.job.driver_memory,
        entry = %config.job.entry,
        "Job launch configured"
    );

    let (dispatcher, worker) = Dispatcher::start(config.job.clone(), Arc::new(ProcessLauncher));

    let state = AppState {
        dispatcher: dispatcher.clone(),
        config: config.clone(),
    };

    api::serve(state, shutdown_signal()).await?;

    let timeout_secs = config.server.shutdown_timeout_secs;
    if dispatcher.worker_status().current.is_some() {
        info!("Waiting up to {} seconds for the running job to finish", timeout_secs);
        if !dispatcher.wait_for_idle(Duration::from_secs(timeout_secs)).await {
            warn!(timeout_secs, "Running job did not finish before the shutdown timeout");
        }
    }

    let pending = dispatcher.queue_depth();
    let status = dispatcher.worker_status();
    if pending > 0 || status.current.is_some() {
        warn!(
            pending,
            current = ?status.current,
            "Shutting down with unlaunched events; they will not be retried"
        );
    }
    worker.abort();

    info!(
        launched = status.launched,
        failed = status.failed,
        "Server shut down gracefully"
    );

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
