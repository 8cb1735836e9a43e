//! Input discovery and reading
//!
//! Watch mode discovers landed files under the input directory. Dispatched
//! mode is handed a single file, either a local path or an object URI that is
//! read straight from the object store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::debug;
use tripflow_common::{staging, IngestionEvent};
use walkdir::WalkDir;

use super::schema::TripRecord;
use crate::error::{IngestError, Result};
use crate::object_store::ObjectStore;

/// Where an input file's bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Location {
    Local { path: PathBuf },
    Object { bucket: String, key: String },
}

/// One file planned into a micro-batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputFile {
    /// Provenance stamped on sink rows and used as the dedup key
    pub source_file: String,
    pub location: Location,
}

impl InputFile {
    /// Interpret a `--input` argument.
    ///
    /// `s3://` and `s3a://` URIs use the object key as `source_file`. Local
    /// paths under `input_root` use the relative path, other paths are kept
    /// as given.
    pub fn from_argument(input: &str, input_root: &Path) -> Result<Self> {
        if input.starts_with("s3://") || input.starts_with("s3a://") {
            let event = IngestionEvent::parse_object_uri(input).ok_or_else(|| {
                IngestError::validation(format!("'{}' is not a bucket/key object URI", input))
            })?;
            return Ok(Self {
                source_file: event.key.clone(),
                location: Location::Object {
                    bucket: event.bucket,
                    key: event.key,
                },
            });
        }

        if input.trim().is_empty() {
            return Err(IngestError::validation("input path is empty"));
        }

        let path = PathBuf::from(input);
        Ok(Self {
            source_file: relative_source_name(&path, input_root),
            location: Location::Local { path },
        })
    }

    pub fn local(path: PathBuf, input_root: &Path) -> Self {
        Self {
            source_file: relative_source_name(&path, input_root),
            location: Location::Local { path },
        }
    }
}

/// Path relative to `root` with `/` separators, or the full path outside it
fn relative_source_name(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

/// Lists complete, eligible files under the watched directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
    extensions: Vec<String>,
    temp_suffix: String,
}

impl DirectorySource {
    pub fn new(root: PathBuf, extensions: Vec<String>, temp_suffix: String) -> Self {
        Self {
            root,
            extensions,
            temp_suffix,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Up to `limit` files not in `seen`, oldest first (ties broken by name).
    ///
    /// Partial files, hidden files and files with other extensions are never
    /// returned. A missing root yields nothing.
    pub fn discover(&self, seen: &HashSet<String>, limit: usize) -> Result<Vec<InputFile>> {
        if !self.root.exists() {
            debug!(root = %self.root.display(), "Input directory does not exist yet");
            return Ok(Vec::new());
        }

        let mut candidates: Vec<(SystemTime, String, PathBuf)> = Vec::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

        for entry in walker {
            let entry = entry.map_err(|e| IngestError::source_at(&self.root, e))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !self.is_eligible(path) {
                continue;
            }

            let source_file = relative_source_name(path, &self.root);
            if seen.contains(&source_file) {
                continue;
            }

            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            candidates.push((modified, source_file, path.to_path_buf()));
        }

        candidates.sort();

        Ok(candidates
            .into_iter()
            .take(limit)
            .map(|(_, source_file, path)| InputFile {
                source_file,
                location: Location::Local { path },
            })
            .collect())
    }

    fn is_eligible(&self, path: &Path) -> bool {
        if staging::is_temporary(path, &self.temp_suffix) {
            return false;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)))
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str()
        .is_some_and(|n| n.starts_with('.') || n.starts_with('_'))
}

/// Reads and schema-parses input files
#[derive(Clone)]
pub struct FileReader {
    store: Option<Arc<dyn ObjectStore>>,
    has_header: bool,
}

impl FileReader {
    pub fn new(store: Option<Arc<dyn ObjectStore>>, has_header: bool) -> Self {
        Self { store, has_header }
    }

    /// All rows of `file`
    pub async fn read(&self, file: &InputFile) -> Result<Vec<TripRecord>> {
        let (bytes, origin) = match &file.location {
            Location::Local { path } => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| IngestError::source_at(path, e))?;
                (bytes, path.clone())
            }
            Location::Object { bucket, key } => {
                let store = self.store.as_ref().ok_or_else(|| {
                    IngestError::config("object store is not configured for object inputs")
                })?;
                let mut bytes = Vec::new();
                store.copy_to(bucket, key, &mut bytes).await?;
                (bytes, PathBuf::from(format!("s3://{}/{}", bucket, key)))
            }
        };

        parse_csv(&bytes, self.has_header).map_err(|e| IngestError::source_at(origin, e))
    }
}

/// Parse CSV bytes against the trip schema
pub fn parse_csv(bytes: &[u8], has_header: bool) -> std::result::Result<Vec<TripRecord>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        if record.iter().all(|field| field.iter().all(u8::is_ascii_whitespace)) {
            continue;
        }
        rows.push(TripRecord::from_byte_record(&record));
    }

    Ok(rows)
}
