//! Tripflow Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the tripflow workspace.
//!
//! # Overview
//!
//! - **Events**: `IngestionEvent` and normalization of upload notifications
//! - **Staging**: temp-name-then-rename file writes so readers never see partial files
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Error Handling**: common error and result types
//!
//! # Example
//!
//! ```no_run
//! use tripflow_common::event::IngestionEvent;
//!
//! fn accept(body: &[u8]) -> tripflow_common::Result<()> {
//!     let event = IngestionEvent::from_slice(body)?;
//!     println!("{}", event.object_uri("s3"));
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod event;
pub mod logging;
pub mod staging;

// Re-export commonly used types
pub use error::{Result, TripflowError};
pub use event::{EventError, IngestionEvent};
pub use staging::StagedFile;
