//! Error types for tripflow

use thiserror::Error;

use crate::event::EventError;

/// Result type alias for tripflow operations
pub type Result<T> = std::result::Result<T, TripflowError>;

/// Main error type shared by the tripflow crates
#[derive(Error, Debug)]
pub enum TripflowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] EventError),

    #[error("Configuration error: {0}")]
    Config(String),
}
