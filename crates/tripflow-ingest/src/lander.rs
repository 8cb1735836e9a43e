//! Atomic landing of uploaded objects
//!
//! An object `s3://<bucket>/<key>` is copied to `<mount>/<prefix>/<key>`. The
//! bytes are streamed into `<key>.part` first and renamed into place only after
//! the whole object arrived, so anything watching the landing area sees either
//! no file or the complete file.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use tripflow_common::{IngestionEvent, StagedFile};

use crate::config::LanderSettings;
use crate::error::{IngestError, Result};
use crate::object_store::ObjectStore;

/// Result of one landing attempt that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LandingOutcome {
    Landed { path: PathBuf, bytes: u64 },
    /// Key does not name an eligible record file
    Skipped,
}

/// Per-notification tally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LandingReport {
    pub landed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct FileLander {
    store: Arc<dyn ObjectStore>,
    settings: LanderSettings,
}

impl FileLander {
    pub fn new(store: Arc<dyn ObjectStore>, settings: LanderSettings) -> Self {
        Self { store, settings }
    }

    /// Whether the key's extension marks it as a record file
    pub fn is_eligible(&self, event: &IngestionEvent) -> bool {
        event.extension().is_some_and(|ext| {
            self.settings
                .file_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(&ext))
        })
    }

    /// Final path for `key`, refusing keys that would leave the landing root
    pub fn landing_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(IngestError::validation("object key is empty"));
        }

        let relative = Path::new(key);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(IngestError::validation(format!(
                        "object key '{}' escapes the landing directory",
                        key
                    )));
                }
            }
        }

        Ok(self.settings.landing_root().join(relative))
    }

    /// Land a single object. Failures carry the bucket and key.
    #[instrument(skip(self), fields(bucket = %event.bucket, key = %event.key))]
    pub async fn land(&self, event: &IngestionEvent) -> Result<LandingOutcome> {
        if !self.is_eligible(event) {
            info!("Skipping object that is not an eligible record file");
            return Ok(LandingOutcome::Skipped);
        }

        self.copy_atomically(event)
            .await
            .map_err(|source| IngestError::Landing {
                bucket: event.bucket.clone(),
                key: event.key.clone(),
                source: Box::new(source),
            })
    }

    async fn copy_atomically(&self, event: &IngestionEvent) -> Result<LandingOutcome> {
        let final_path = self.landing_path(&event.key)?;

        info!(
            "Copying {} -> {}",
            event.object_uri("s3"),
            final_path.display()
        );

        let mut staged = StagedFile::create(&final_path, &self.settings.temp_suffix).await?;

        let bytes = match self
            .store
            .copy_to(&event.bucket, &event.key, staged.file_mut())
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                staged.discard().await;
                return Err(e.into());
            }
        };

        let temp_path = staged.temp_path().to_path_buf();
        let path = match staged.commit().await {
            Ok(path) => path,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(e.into());
            }
        };

        info!(bytes, path = %path.display(), "Finished landing object");
        Ok(LandingOutcome::Landed { path, bytes })
    }

    /// Land a raw notification body.
    ///
    /// Never fails: a body that is not JSON is logged and yields an empty
    /// report.
    pub async fn handle_payload(&self, raw: &[u8]) -> LandingReport {
        match serde_json::from_slice::<Value>(raw) {
            Ok(payload) => self.handle_notification(&payload).await,
            Err(e) => {
                error!(error = %e, payload_bytes = raw.len(), "Notification is not valid JSON");
                LandingReport::default()
            }
        }
    }

    /// Land every record of a notification.
    ///
    /// Never fails: each failure is logged together with the payload and
    /// counted, and the other records are still attempted. A (bucket, key)
    /// repeated within one notification is landed once; repeats count as
    /// skipped.
    pub async fn handle_notification(&self, payload: &Value) -> LandingReport {
        let records = IngestionEvent::from_records(payload);
        let mut report = LandingReport::default();

        if records.is_empty() {
            info!(payload = %payload, "No records in event");
            return report;
        }

        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(records.len());
        for record in records {
            if let Ok(event) = &record {
                if !seen.insert((event.bucket.clone(), event.key.clone())) {
                    warn!(bucket = %event.bucket, key = %event.key, "Duplicate record in notification");
                    report.skipped += 1;
                    continue;
                }
            }
            unique.push(record);
        }

        let attempts = unique.into_iter().map(|record| async move {
            match record {
                Ok(event) => self.land(&event).await,
                Err(e) => Err(IngestError::from(e)),
            }
        });

        for result in join_all(attempts).await {
            match result {
                Ok(LandingOutcome::Landed { .. }) => report.landed += 1,
                Ok(LandingOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    error!(error = %e, payload = %payload, "Landing failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            landed = report.landed,
            skipped = report.skipped,
            failed = report.failed,
            "Notification processed"
        );

        report
    }
}
