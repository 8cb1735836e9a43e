//! Tripflow Ingest - landing and micro-batch ingestion tool

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tokio::signal;
use tracing::{info, warn};
use tripflow_common::logging::{init_logging, LogConfig, LogLevel};
use tripflow_ingest::{
    config::{redact_url, IngestSettings},
    lander::FileLander,
    object_store::{ObjectStore, S3ObjectStore},
    stream::{
        CycleOutcome, DirectorySource, FileReader, InputFile, Location, PgTripSink, Query,
        StreamProcessor,
    },
};

#[derive(Parser, Debug)]
#[command(name = "tripflow-ingest")]
#[command(author, version, about = "Trip record landing and ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Settings file (JSON or TOML)
    #[arg(short, long, global = true, env = "TRIPFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine master URL (recorded only)
    #[arg(long, global = true)]
    master: Option<String>,

    /// Driver memory (recorded only)
    #[arg(long, global = true)]
    driver_memory: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Land the objects named by an upload notification
    Land {
        /// Notification JSON file, or `-` for stdin
        #[arg(short, long)]
        event: String,
    },

    /// Continuously ingest files landed under the input path
    Stream,

    /// Ingest a single file and exit
    Run {
        /// `s3://bucket/key`, `s3a://bucket/key` or a local path
        #[arg(short, long)]
        input: String,
    },

    /// Apply sink migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tripflow-ingest")
        .build()
        .with_env_overrides()?;

    let _log_guard = init_logging(&log_config)?;

    let settings = IngestSettings::load(cli.config.as_deref())
        .context("Failed to load ingest settings")?
        .with_resources(cli.master, cli.driver_memory);

    info!(
        master = ?settings.resources.master,
        driver_memory = ?settings.resources.driver_memory,
        executor_memory = ?settings.resources.executor_memory,
        executor_cores = ?settings.resources.executor_cores,
        shuffle_partitions = ?settings.resources.shuffle_partitions,
        "Engine resources"
    );

    match cli.command {
        Command::Land { event } => land(&settings, &event).await,
        Command::Stream => stream(&settings).await,
        Command::Run { input } => run(&settings, &input).await,
        Command::Migrate => {
            let sink = PgTripSink::connect(&settings.sink).await?;
            sink.migrate().await?;
            Ok(())
        }
    }
}

async fn land(settings: &IngestSettings, event: &str) -> Result<()> {
    let raw = if event == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin().read_to_end(&mut buf).await?;
        buf
    } else {
        tokio::fs::read(event)
            .await
            .with_context(|| format!("Failed to read notification {}", event))?
    };

    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(&settings.object_store).await);
    let lander = FileLander::new(store, settings.lander.clone());

    let report = lander.handle_payload(&raw).await;
    if report.failed > 0 {
        warn!(
            failed = report.failed,
            landed = report.landed,
            "Some objects failed to land"
        );
    }
    Ok(())
}

async fn connect_sink(settings: &IngestSettings) -> Result<Arc<PgTripSink>> {
    info!(url = %redact_url(&settings.sink.url), "Connecting to sink");
    let sink = PgTripSink::connect(&settings.sink).await?;
    if settings.sink.run_migrations {
        sink.migrate().await?;
    }
    Ok(Arc::new(sink))
}

async fn stream(settings: &IngestSettings) -> Result<()> {
    let sink = connect_sink(settings).await?;
    let reader = FileReader::new(None, settings.stream.has_header);
    let mut processor = StreamProcessor::open(Query::Watch, &settings.stream, sink, reader).await?;

    let source = DirectorySource::new(
        settings.stream.input_path.clone(),
        settings.stream.file_extensions.clone(),
        settings.lander.temp_suffix.clone(),
    );

    processor.run_watch(&source, shutdown_signal()).await?;
    Ok(())
}

async fn run(settings: &IngestSettings, input: &str) -> Result<()> {
    let file = InputFile::from_argument(input, &settings.stream.input_path)?;

    let store = match &file.location {
        Location::Object { .. } => {
            let s3: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(&settings.object_store).await);
            Some(s3)
        }
        Location::Local { .. } => None,
    };

    let sink = connect_sink(settings).await?;
    let reader = FileReader::new(store, settings.stream.has_header);
    let mut processor = StreamProcessor::open(Query::Dispatch, &settings.stream, sink, reader).await?;

    match processor.run_single(file).await? {
        CycleOutcome::Written { batch_id, summary } => info!(
            batch_id,
            rows_written = summary.rows_written,
            files_skipped = summary.files_skipped,
            "Run complete"
        ),
        CycleOutcome::Empty { batch_id } => info!(batch_id, "Run complete, input had no rows"),
        CycleOutcome::AlreadyCommitted { source_file } => {
            warn!(source_file = %source_file, "Run skipped, input already ingested")
        }
        CycleOutcome::Idle => {}
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
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
            info!("Received Ctrl+C, finishing the current batch");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing the current batch");
        },
    }
}
