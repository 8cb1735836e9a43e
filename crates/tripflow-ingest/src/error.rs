//! Ingestion error types
//!
//! Every failure is classified by kind so callers can tell a bad input apart
//! from an infrastructure problem that an external supervisor may retry.

use std::path::PathBuf;

use thiserror::Error;
use tripflow_common::EventError;

pub type Result<T> = std::result::Result<T, IngestError>;

/// Object store access failures
#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("object s3://{bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("request for s3://{bucket}/{key} failed: {message}")]
    Request {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("stream for s3://{bucket}/{key} broke after {bytes} bytes: {message}")]
    Stream {
        bucket: String,
        key: String,
        bytes: u64,
        message: String,
    },

    #[error("writing object bytes failed: {0}")]
    Write(#[from] std::io::Error),
}

/// Pipeline error, one variant per failure kind
#[derive(Error, Debug)]
pub enum IngestError {
    /// Input that can never succeed as given
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] EventError),

    /// Download or rename into the landing area failed
    #[error("Landing {bucket}/{key} failed: {source}")]
    Landing {
        bucket: String,
        key: String,
        #[source]
        source: Box<IngestError>,
    },

    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    /// Reading input files failed
    #[error("Source error at {path}: {message}")]
    Source { path: PathBuf, message: String },

    #[error("Checkpoint error at {path}: {message}")]
    Checkpoint { path: PathBuf, message: String },

    /// Writing to the relational sink failed
    #[error("Sink error: {0}")]
    Sink(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn source_at(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Source {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn checkpoint(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Checkpoint {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether a supervisor restarting the run could reasonably succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            IngestError::Sink(e) => sink_error_is_transient(e),
            IngestError::ObjectStore(_) | IngestError::Io(_) => true,
            IngestError::Landing { source, .. } => source.is_retryable(),
            IngestError::Validation(_)
            | IngestError::InvalidEvent(_)
            | IngestError::Source { .. }
            | IngestError::Checkpoint { .. }
            | IngestError::Migration(_)
            | IngestError::Config(_) => false,
        }
    }
}

/// Whether a sink failure comes from the connection or server rather than the data
fn sink_error_is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().is_some_and(|code| sqlstate_is_transient(&code)),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        _ => false,
    }
}

/// SQLSTATE classes worth retrying: 08 connection exception, 40 transaction
/// rollback, 53 insufficient resources, 57 operator intervention, 58 system error
fn sqlstate_is_transient(code: &str) -> bool {
    matches!(code.get(..2), Some("08" | "40" | "53" | "57" | "58"))
}

impl From<::config::ConfigError> for IngestError {
    fn from(err: ::config::ConfigError) -> Self {
        IngestError::Config(err.to_string())
    }
}
