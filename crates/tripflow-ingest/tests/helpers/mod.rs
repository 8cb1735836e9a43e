//! Test helpers for tripflow ingest integration tests
//!
//! This module provides:
//! - An in-memory `ObjectStore` that can fail part-way through a download
//! - An in-memory `TripSink` that records appended batches and can be told to fail
//! - CSV fixtures and settings rooted in a temporary directory

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use tripflow_ingest::{
    config::{LanderSettings, StreamSettings},
    error::{IngestError, ObjectStoreError},
    object_store::ObjectStore,
    stream::{AppendSummary, DirectorySource, FileReader, MicroBatch, Query, StreamProcessor, TripSink},
};

pub const HEADER: &str = "VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count,trip_distance,pickup_longitude,pickup_latitude,RateCodeID,store_and_fwd_flag,dropoff_longitude,dropoff_latitude,payment_type,fare_amount,extra,mta_tax,tip_amount,tolls_amount,improvement_surcharge,total_amount";

/// A trip row with the given pickup and dropoff timestamps
pub fn trip_line(vendor: i32, pickup: &str, dropoff: &str) -> String {
    format!(
        "{vendor},{pickup},{dropoff},1,2.5,-73.99,40.75,1,N,-73.97,40.76,1,12.5,0.5,0.5,2.0,0,0.3,15.8"
    )
}

/// CSV body with a header and `rows` trips on 2024-01-01 (a Monday)
pub fn trips_csv(rows: usize) -> String {
    let mut body = format!("{HEADER}\n");
    for i in 0..rows {
        body.push_str(&trip_line(
            (i % 2 + 1) as i32,
            "2024-01-01 08:00:00",
            "2024-01-01 08:15:00",
        ));
        body.push('\n');
    }
    body
}

// ============================================================================
// Object store
// ============================================================================

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    /// Objects that fail after this many bytes were written
    fail_after: Mutex<HashMap<(String, String), usize>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), body.into());
    }

    /// Make downloads of this object break after `bytes` bytes
    pub fn fail_after(&self, bucket: &str, key: &str, bytes: usize) {
        self.fail_after
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), bytes);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn copy_to(
        &self,
        bucket: &str,
        key: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ObjectStoreError> {
        let id = (bucket.to_string(), key.to_string());
        let body = self
            .objects
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        let fail_after = self.fail_after.lock().unwrap().get(&id).copied();

        match fail_after {
            Some(limit) if limit < body.len() => {
                writer.write_all(&body[..limit]).await?;
                writer.flush().await?;
                Err(ObjectStoreError::Stream {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    bytes: limit as u64,
                    message: "connection reset".to_string(),
                })
            }
            _ => {
                writer.write_all(&body).await?;
                writer.flush().await?;
                Ok(body.len() as u64)
            }
        }
    }
}

// ============================================================================
// Sink
// ============================================================================

/// Records appended batches; optionally dedups on source file like the Postgres sink
#[derive(Default)]
pub struct MemorySink {
    batches: Mutex<Vec<MicroBatch>>,
    claimed: Mutex<HashSet<String>>,
    dedup: bool,
    failing: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_dedup() -> Arc<Self> {
        Arc::new(Self {
            dedup: true,
            ..Self::default()
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<MicroBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn batch_ids(&self) -> Vec<i64> {
        self.batches().iter().map(|b| b.id).collect()
    }

    pub fn total_rows(&self) -> usize {
        self.batches().iter().map(|b| b.row_count()).sum()
    }
}

#[async_trait]
impl TripSink for MemorySink {
    async fn append(&self, batch: &MicroBatch) -> tripflow_ingest::Result<AppendSummary> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IngestError::Sink(sqlx::Error::PoolTimedOut));
        }

        let mut summary = AppendSummary::default();
        let mut kept = batch.clone();
        if self.dedup {
            let mut claimed = self.claimed.lock().unwrap();
            kept.files.retain(|file| claimed.insert(file.source_file.clone()));
            summary.files_skipped = batch.files.len() - kept.files.len();
        }

        summary.rows_written = kept.row_count() as u64;
        self.batches.lock().unwrap().push(kept);
        Ok(summary)
    }
}

// ============================================================================
// Settings and fixtures
// ============================================================================

/// Landing and stream directories inside one temporary directory
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn mount(&self) -> PathBuf {
        self.dir.path().join("efs")
    }

    pub fn input_root(&self) -> PathBuf {
        self.mount().join("incoming")
    }

    pub fn lander_settings(&self) -> LanderSettings {
        LanderSettings {
            mount: self.mount(),
            ..LanderSettings::default()
        }
    }

    pub fn stream_settings(&self, max_files_per_trigger: usize) -> StreamSettings {
        StreamSettings {
            input_path: self.input_root(),
            checkpoint_dir: self.dir.path().join("checkpoints"),
            trigger_interval_secs: 1,
            max_files_per_trigger,
            ..StreamSettings::default()
        }
    }

    pub fn source(&self) -> DirectorySource {
        DirectorySource::new(self.input_root(), vec!["csv".into()], ".part".into())
    }

    /// Write a complete file under the input root
    pub fn land(&self, relative: &str, body: &str) -> PathBuf {
        let path = self.input_root().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    /// Give `relative` a distinct modification time so discovery order is fixed
    pub fn set_mtime(&self, relative: &str, unix_secs: i64) {
        filetime::set_file_mtime(
            self.input_root().join(relative),
            filetime::FileTime::from_unix_time(unix_secs, 0),
        )
        .unwrap();
    }

    pub async fn processor(
        &self,
        query: Query,
        max_files_per_trigger: usize,
        sink: Arc<dyn TripSink>,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> StreamProcessor {
        StreamProcessor::open(
            query,
            &self.stream_settings(max_files_per_trigger),
            sink,
            FileReader::new(store, true),
        )
        .await
        .unwrap()
    }

    pub fn checkpoint_dir(&self, query: Query) -> PathBuf {
        self.dir.path().join("checkpoints").join(query.dir_name())
    }
}
