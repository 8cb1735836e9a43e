//! Micro-batch trigger loop
//!
//! Each cycle plans a batch (records its files in the offsets log), reads and
//! transforms the files, appends the rows to the sink and only then writes the
//! commit entry. A crash anywhere before the commit leaves the batch pending;
//! it is replayed with the same id on the next start, so rows may be appended
//! twice but never lost.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::checkpoint::{CheckpointStore, CommitEntry, OffsetEntry};
use super::sink::{AppendSummary, BatchFile, MicroBatch, TripSink};
use super::source::{DirectorySource, FileReader, InputFile};
use super::transform::transform;
use crate::config::StreamSettings;
use crate::error::Result;

/// Streaming query kind; each has its own checkpoint directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// Continuous directory watch
    Watch,
    /// One file per dispatched run
    Dispatch,
}

impl Query {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Query::Watch => "watch",
            Query::Dispatch => "dispatch",
        }
    }
}

/// What a trigger cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No new files; no batch id consumed
    Idle,
    /// Batch read zero rows and was committed without a sink write
    Empty { batch_id: i64 },
    Written { batch_id: i64, summary: AppendSummary },
    /// The requested file belongs to an earlier committed batch
    AlreadyCommitted { source_file: String },
}

pub struct StreamProcessor {
    query: Query,
    max_files_per_trigger: usize,
    trigger_interval: Duration,
    checkpoints: CheckpointStore,
    sink: Arc<dyn TripSink>,
    reader: FileReader,
    next_batch_id: i64,
    pending: Option<OffsetEntry>,
    committed: HashSet<String>,
}

impl StreamProcessor {
    /// Open the query's checkpoint and recover its progress
    pub async fn open(
        query: Query,
        settings: &StreamSettings,
        sink: Arc<dyn TripSink>,
        reader: FileReader,
    ) -> Result<Self> {
        let checkpoints = CheckpointStore::open(settings.checkpoint_dir.join(query.dir_name()))
            .await?
            .with_retention(settings.checkpoint_retained_batches);
        let recovery = checkpoints.recover().await?;

        Ok(Self {
            query,
            max_files_per_trigger: settings.max_files_per_trigger,
            trigger_interval: Duration::from_secs(settings.trigger_interval_secs),
            checkpoints,
            sink,
            reader,
            next_batch_id: recovery.next_batch_id,
            pending: recovery.pending,
            committed: recovery.committed_files,
        })
    }

    pub fn query(&self) -> Query {
        self.query
    }

    pub fn next_batch_id(&self) -> i64 {
        self.next_batch_id
    }

    /// Batch planned but not yet committed
    pub fn pending(&self) -> Option<&OffsetEntry> {
        self.pending.as_ref()
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// One trigger cycle against the watched directory.
    ///
    /// A pending batch is replayed before anything new is discovered.
    pub async fn run_cycle(&mut self, source: &DirectorySource) -> Result<CycleOutcome> {
        if let Some(entry) = self.pending.clone() {
            info!(batch_id = entry.batch_id, files = entry.files.len(), "Replaying uncommitted batch");
            return self.execute(entry).await;
        }

        let files = source.discover(&self.committed, self.max_files_per_trigger)?;
        if files.is_empty() {
            return Ok(CycleOutcome::Idle);
        }

        let entry = self.plan(files).await?;
        self.execute(entry).await
    }

    /// Trigger cycles every interval until `shutdown` resolves.
    ///
    /// The interval is measured from the start of each cycle. Shutdown is
    /// observed between cycles, so an in-flight batch always finishes. The
    /// first failing cycle ends the query with its error.
    pub async fn run_watch<F>(&mut self, source: &DirectorySource, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            query = ?self.query,
            input = %source.root().display(),
            interval_secs = self.trigger_interval.as_secs(),
            max_files = self.max_files_per_trigger,
            next_batch_id = self.next_batch_id,
            "Stream started"
        );

        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.trigger_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!(next_batch_id = self.next_batch_id, "Stream stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            self.run_cycle(source).await?;
        }
    }

    /// Process exactly one file as its own batch.
    ///
    /// A pending batch from an earlier run is replayed first. A file that an
    /// earlier batch of this query already committed is not read again.
    pub async fn run_single(&mut self, file: InputFile) -> Result<CycleOutcome> {
        if let Some(entry) = self.pending.clone() {
            info!(batch_id = entry.batch_id, "Replaying uncommitted batch before new input");
            self.execute(entry).await?;
        }

        if self.committed.contains(&file.source_file) {
            warn!(source_file = %file.source_file, "File was already processed by this query");
            return Ok(CycleOutcome::AlreadyCommitted {
                source_file: file.source_file,
            });
        }

        let entry = self.plan(vec![file]).await?;
        self.execute(entry).await
    }

    /// Assign the next id and persist the batch's files
    async fn plan(&mut self, files: Vec<InputFile>) -> Result<OffsetEntry> {
        let entry = OffsetEntry {
            batch_id: self.next_batch_id,
            files,
            planned_at: Utc::now(),
        };
        self.checkpoints.write_offsets(&entry).await?;
        self.next_batch_id += 1;
        self.pending = Some(entry.clone());
        Ok(entry)
    }

    async fn execute(&mut self, entry: OffsetEntry) -> Result<CycleOutcome> {
        let batch_id = entry.batch_id;
        let batch = self.read_batch(&entry).await?;

        let summary = if batch.is_empty() {
            info!(batch_id, "Empty batch, skipping write");
            None
        } else {
            match self.sink.append(&batch).await {
                Ok(summary) => Some(summary),
                Err(e) => {
                    error!(batch_id, error = %e, retryable = e.is_retryable(), "Failed to write batch");
                    return Err(e);
                }
            }
        };

        let written = summary.unwrap_or_default();
        self.checkpoints
            .commit(&CommitEntry {
                batch_id,
                rows_written: written.rows_written,
                files_skipped: written.files_skipped,
                committed_at: Utc::now(),
            })
            .await?;

        self.committed
            .extend(entry.files.into_iter().map(|f| f.source_file));
        self.pending = None;

        if let Err(e) = self.checkpoints.compact_if_due(batch_id, &self.committed).await {
            warn!(batch_id, error = %e, "Checkpoint compaction failed, keeping log entries");
        }

        Ok(match summary {
            None => CycleOutcome::Empty { batch_id },
            Some(summary) => CycleOutcome::Written { batch_id, summary },
        })
    }

    async fn read_batch(&self, entry: &OffsetEntry) -> Result<MicroBatch> {
        let mut files = Vec::with_capacity(entry.files.len());
        for file in &entry.files {
            let rows: Vec<_> = self
                .reader
                .read(file)
                .await?
                .into_iter()
                .map(transform)
                .collect();

            info!(
                batch_id = entry.batch_id,
                source_file = %file.source_file,
                rows = rows.len(),
                "Read input file"
            );

            files.push(BatchFile {
                source_file: file.source_file.clone(),
                rows,
            });
        }

        Ok(MicroBatch {
            id: entry.batch_id,
            files,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_use_separate_directories() {
        assert_eq!(Query::Watch.dir_name(), "watch");
        assert_eq!(Query::Dispatch.dir_name(), "dispatch");
        assert_ne!(Query::Watch.dir_name(), Query::Dispatch.dir_name());
    }
}
