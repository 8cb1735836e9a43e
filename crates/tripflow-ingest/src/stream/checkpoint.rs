//! File-based checkpoint store
//!
//! One directory per streaming query, laid out as a write-ahead log:
//!
//! ```text
//! <dir>/offsets/<batch_id>   files planned into the batch, written before reading
//! <dir>/commits/<batch_id>   written after the sink append succeeded
//! <dir>/snapshot             committed files of every batch folded out of the logs
//! ```
//!
//! A batch with an offsets entry but no commit entry was interrupted and is
//! replayed with the same id and the same files. Entries are JSON and are
//! written through a temporary name and a rename.
//!
//! Every `retained_batches` commits, entries older than the last
//! `retained_batches` batches are folded into the snapshot and deleted. The
//! snapshot is written before anything is deleted, and entries at or below
//! its `through_batch_id` are ignored on recovery.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};
use tripflow_common::staging;

use super::source::InputFile;
use crate::config::DEFAULT_CHECKPOINT_RETAINED_BATCHES;
use crate::error::{IngestError, Result};

const OFFSETS_DIR: &str = "offsets";
const COMMITS_DIR: &str = "commits";
const SNAPSHOT_FILE: &str = "snapshot";
const ENTRY_TEMP_SUFFIX: &str = ".tmp";

/// Planned content of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetEntry {
    pub batch_id: i64,
    pub files: Vec<InputFile>,
    pub planned_at: DateTime<Utc>,
}

/// Proof that a batch reached the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub batch_id: i64,
    pub rows_written: u64,
    /// Files the sink had already ingested and skipped
    pub files_skipped: usize,
    pub committed_at: DateTime<Utc>,
}

/// Compacted history of the logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Highest batch id whose log entries may have been deleted
    pub through_batch_id: i64,
    /// Sorted source files of every batch committed when the snapshot was taken
    pub committed_files: Vec<String>,
    pub compacted_at: DateTime<Utc>,
}

/// State rebuilt from disk on startup
#[derive(Debug, Clone, Default)]
pub struct Recovery {
    /// Id for the next newly planned batch
    pub next_batch_id: i64,
    /// Planned but uncommitted batch to replay first
    pub pending: Option<OffsetEntry>,
    /// Source files of every committed batch
    pub committed_files: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    retained_batches: usize,
}

impl CheckpointStore {
    /// Open (creating if needed) the checkpoint directory of one query
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        for sub in [OFFSETS_DIR, COMMITS_DIR] {
            let path = dir.join(sub);
            tokio::fs::create_dir_all(&path)
                .await
                .map_err(|e| IngestError::checkpoint(&path, e))?;
        }
        Ok(Self {
            dir,
            retained_batches: DEFAULT_CHECKPOINT_RETAINED_BATCHES,
        })
    }

    /// Keep `batches` log entries per log between compactions (at least 1)
    pub fn with_retention(mut self, batches: usize) -> Self {
        self.retained_batches = batches.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rebuild progress from the snapshot and the offsets and commits logs
    pub async fn recover(&self) -> Result<Recovery> {
        let snapshot = self.read_snapshot().await?;
        let through = snapshot.as_ref().map(|s| s.through_batch_id);

        let after_snapshot = |ids: BTreeSet<i64>| -> BTreeSet<i64> {
            match through {
                Some(through) => ids.into_iter().filter(|id| *id > through).collect(),
                None => ids,
            }
        };
        let offsets = after_snapshot(self.list_ids(OFFSETS_DIR).await?);
        let commits = after_snapshot(self.list_ids(COMMITS_DIR).await?);

        let mut committed_files: HashSet<String> = snapshot
            .map(|s| s.committed_files.into_iter().collect())
            .unwrap_or_default();
        for id in &commits {
            if !offsets.contains(id) {
                warn!(batch_id = id, "Commit entry without offsets entry");
                continue;
            }
            let entry: OffsetEntry = self.read_entry(OFFSETS_DIR, *id).await?;
            committed_files.extend(entry.files.into_iter().map(|f| f.source_file));
        }

        let latest_offset = offsets.iter().next_back().copied();
        let latest_commit = commits.iter().next_back().copied();

        for id in offsets.iter().filter(|id| !commits.contains(*id)) {
            if Some(*id) != latest_offset {
                warn!(batch_id = id, "Ignoring uncommitted batch that is not the latest");
            }
        }

        let pending = match latest_offset {
            Some(id) if !commits.contains(&id) => Some(self.read_entry(OFFSETS_DIR, id).await?),
            _ => None,
        };

        let next_batch_id = latest_offset
            .into_iter()
            .chain(latest_commit)
            .chain(through)
            .max()
            .map_or(0, |id| id + 1);

        let recovery = Recovery {
            next_batch_id,
            pending,
            committed_files,
        };

        info!(
            dir = %self.dir.display(),
            next_batch_id = recovery.next_batch_id,
            snapshot_through = through,
            pending = recovery.pending.as_ref().map(|p| p.batch_id),
            committed_files = recovery.committed_files.len(),
            "Checkpoint recovered"
        );

        Ok(recovery)
    }

    /// Record the files of a batch before any of them is read
    pub async fn write_offsets(&self, entry: &OffsetEntry) -> Result<()> {
        self.write_entry(OFFSETS_DIR, entry.batch_id, entry).await
    }

    /// Mark a batch as durably written to the sink
    pub async fn commit(&self, entry: &CommitEntry) -> Result<()> {
        let offsets = self.entry_path(OFFSETS_DIR, entry.batch_id);
        if !tokio::fs::try_exists(&offsets).await.unwrap_or(false) {
            return Err(IngestError::checkpoint(
                offsets,
                "cannot commit a batch that was never planned",
            ));
        }
        self.write_entry(COMMITS_DIR, entry.batch_id, entry).await
    }

    pub async fn read_commit(&self, batch_id: i64) -> Result<Option<CommitEntry>> {
        let path = self.entry_path(COMMITS_DIR, batch_id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        self.read_entry(COMMITS_DIR, batch_id).await.map(Some)
    }

    /// Compact after committing `batch_id` when a full retention window has passed.
    ///
    /// `committed_files` must hold the files of every committed batch.
    /// Returns the number of log entries deleted.
    pub async fn compact_if_due(
        &self,
        batch_id: i64,
        committed_files: &HashSet<String>,
    ) -> Result<usize> {
        let retained = i64::try_from(self.retained_batches).unwrap_or(i64::MAX);
        if batch_id < retained || batch_id % retained != 0 {
            return Ok(0);
        }
        self.compact(batch_id - retained, committed_files).await
    }

    /// Fold every batch up to and including `through` into the snapshot and
    /// delete their log entries
    pub async fn compact(&self, through: i64, committed_files: &HashSet<String>) -> Result<usize> {
        let mut files: Vec<String> = committed_files.iter().cloned().collect();
        files.sort();

        let snapshot = Snapshot {
            through_batch_id: through,
            committed_files: files,
            compacted_at: Utc::now(),
        };
        let path = self.dir.join(SNAPSHOT_FILE);
        let bytes = serde_json::to_vec_pretty(&snapshot).map_err(|e| IngestError::checkpoint(&path, e))?;
        staging::write_atomic(&path, &bytes, ENTRY_TEMP_SUFFIX)
            .await
            .map_err(|e| IngestError::checkpoint(&path, e))?;

        let mut deleted = 0;
        for sub in [COMMITS_DIR, OFFSETS_DIR] {
            for id in self.list_ids(sub).await?.range(..=through) {
                let path = self.entry_path(sub, *id);
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(|e| IngestError::checkpoint(&path, e))?;
                deleted += 1;
            }
        }

        debug!(
            through_batch_id = through,
            deleted,
            committed_files = snapshot.committed_files.len(),
            "Checkpoint compacted"
        );
        Ok(deleted)
    }

    pub async fn read_snapshot(&self) -> Result<Option<Snapshot>> {
        let path = self.dir.join(SNAPSHOT_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| IngestError::checkpoint(&path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(IngestError::checkpoint(&path, e)),
        }
    }

    fn entry_path(&self, sub: &str, batch_id: i64) -> PathBuf {
        self.dir.join(sub).join(batch_id.to_string())
    }

    async fn write_entry<T: Serialize>(&self, sub: &str, batch_id: i64, entry: &T) -> Result<()> {
        let path = self.entry_path(sub, batch_id);
        let bytes = serde_json::to_vec_pretty(entry).map_err(|e| IngestError::checkpoint(&path, e))?;
        staging::write_atomic(&path, &bytes, ENTRY_TEMP_SUFFIX)
            .await
            .map_err(|e| IngestError::checkpoint(&path, e))
    }

    async fn read_entry<T: DeserializeOwned>(&self, sub: &str, batch_id: i64) -> Result<T> {
        let path = self.entry_path(sub, batch_id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| IngestError::checkpoint(&path, e))?;
        serde_json::from_slice(&bytes).map_err(|e| IngestError::checkpoint(&path, e))
    }

    /// Batch ids present in a log; temporary and foreign files are ignored
    async fn list_ids(&self, sub: &str) -> Result<BTreeSet<i64>> {
        let dir = self.dir.join(sub);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| IngestError::checkpoint(&dir, e))?;

        let mut ids = BTreeSet::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| IngestError::checkpoint(&dir, e))?
        {
            if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse::<i64>().ok()) {
                if id >= 0 {
                    ids.insert(id);
                }
            }
        }
        Ok(ids)
    }
}
