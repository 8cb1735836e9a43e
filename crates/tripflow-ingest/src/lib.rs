//! Tripflow Ingest Library
//!
//! The two halves of trip-record ingestion:
//!
//! - [`lander`]: copies uploaded objects onto the shared filesystem so that a
//!   file only ever appears complete
//! - [`stream`]: reads landed files in micro-batches, derives trip length and
//!   weekday, and appends the rows to Postgres with checkpointed progress
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tripflow_ingest::config::IngestSettings;
//! use tripflow_ingest::stream::{FileReader, InputFile, PgTripSink, Query, StreamProcessor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = IngestSettings::load(None)?;
//!     let sink = Arc::new(PgTripSink::connect(&settings.sink).await?);
//!     let reader = FileReader::new(None, settings.stream.has_header);
//!     let mut processor = StreamProcessor::open(Query::Dispatch, &settings.stream, sink, reader).await?;
//!
//!     let input = InputFile::from_argument("/mnt/efs/incoming/2024/01/rides.csv", &settings.stream.input_path)?;
//!     processor.run_single(input).await?;
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod lander;
pub mod object_store;
pub mod stream;

pub use error::{IngestError, ObjectStoreError, Result};
