//! Atomic file staging
//!
//! A staged file is written under a temporary sibling name
//! (`rides.csv` → `rides.csv.part`) and only becomes visible at its final
//! path through a single `rename`. Readers that skip the temporary suffix
//! therefore observe either nothing or the complete file.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

/// Suffix used for partial files unless configured otherwise
pub const DEFAULT_TEMP_SUFFIX: &str = ".part";

/// A file being written under its temporary name
#[derive(Debug)]
pub struct StagedFile {
    final_path: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl StagedFile {
    /// Create parent directories and open (truncating) the temporary file
    pub async fn create(final_path: impl Into<PathBuf>, temp_suffix: &str) -> io::Result<Self> {
        let final_path = final_path.into();
        let temp_path = temp_path_for(&final_path, temp_suffix)?;

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file = File::create(&temp_path).await?;

        Ok(Self {
            final_path,
            temp_path,
            file,
        })
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Writer for the temporary file
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Flush, fsync and rename into place. Returns the final path.
    pub async fn commit(mut self) -> io::Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);

        fs::rename(&self.temp_path, &self.final_path).await?;
        Ok(self.final_path)
    }

    /// Drop the partial file. The final path is left untouched.
    pub async fn discard(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.temp_path).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.temp_path.display(),
                    error = %e,
                    "Failed to remove partial file"
                );
            }
        }
    }
}

/// Temporary sibling path: the suffix is appended to the full file name
pub fn temp_path_for(final_path: &Path, temp_suffix: &str) -> io::Result<PathBuf> {
    let file_name = final_path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no file name: {}", final_path.display()),
        )
    })?;

    let mut temp_name = file_name.to_os_string();
    temp_name.push(temp_suffix);
    Ok(final_path.with_file_name(temp_name))
}

/// Whether `path` is a partial file that readers must ignore
pub fn is_temporary(path: &Path, temp_suffix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(temp_suffix))
}

/// Write `bytes` to `path` atomically
pub async fn write_atomic(path: &Path, bytes: &[u8], temp_suffix: &str) -> io::Result<()> {
    let mut staged = StagedFile::create(path, temp_suffix).await?;
    if let Err(e) = staged.file_mut().write_all(bytes).await {
        staged.discard().await;
        return Err(e);
    }
    staged.commit().await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_path_appends_suffix() {
        let temp = temp_path_for(Path::new("/mnt/efs/incoming/rides.csv"), ".part").unwrap();
        assert_eq!(temp, PathBuf::from("/mnt/efs/incoming/rides.csv.part"));
        assert!(temp_path_for(Path::new("/"), ".part").is_err());
    }

    #[test]
    fn test_is_temporary() {
        assert!(is_temporary(Path::new("a/rides.csv.part"), ".part"));
        assert!(!is_temporary(Path::new("a/rides.csv"), ".part"));
    }

    #[tokio::test]
    async fn test_final_path_appears_only_on_commit() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("2024/01/rides.csv");

        let mut staged = StagedFile::create(&target, ".part").await.unwrap();
        staged.file_mut().write_all(b"a,b\n1,2\n").await.unwrap();

        assert!(staged.temp_path().exists());
        assert!(!target.exists());

        let landed = staged.commit().await.unwrap();
        assert_eq!(landed, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"a,b\n1,2\n");
        assert!(!dir.path().join("2024/01/rides.csv.part").exists());
    }

    #[tokio::test]
    async fn test_discard_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("rides.csv");

        let mut staged = StagedFile::create(&target, ".part").await.unwrap();
        staged.file_mut().write_all(b"half").await.unwrap();
        let temp = staged.temp_path().to_path_buf();
        staged.discard().await;

        assert!(!temp.exists());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("commits").join("0");

        write_atomic(&target, b"{\"v\":1}", ".tmp").await.unwrap();
        write_atomic(&target, b"{\"v\":2}", ".tmp").await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"{\"v\":2}");
    }
}
