//! Checkpointed micro-batch ingestion
//!
//! Landed CSV files are read in small increments, each row gets its derived
//! columns, and every increment is appended to the sink as one micro-batch.
//! Progress lives in a file-based checkpoint so a restart resumes where the
//! last committed batch ended.

pub mod checkpoint;
pub mod processor;
pub mod schema;
pub mod sink;
pub mod source;
pub mod transform;

pub use checkpoint::{CheckpointStore, CommitEntry, OffsetEntry, Recovery};
pub use processor::{CycleOutcome, Query, StreamProcessor};
pub use schema::TripRecord;
pub use sink::{AppendSummary, BatchFile, MicroBatch, PgTripSink, TripSink};
pub use source::{DirectorySource, FileReader, InputFile, Location};
pub use transform::{transform, TransformedTrip};
