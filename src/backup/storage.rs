use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use super::{BackupError, Result, LEDGER_FILENAME};

/// Directory holding snapshot files and the ledger.
///
/// Resolved once when the subsystem starts; the directory never changes for
/// the life of the value.
#[derive(Debug, Clone)]
pub struct BackupStorage {
    directory: PathBuf,
}

impl BackupStorage {
    /// Create `primary`, or `fallback` when `primary` cannot be created.
    pub async fn resolve(primary: &Path, fallback: &Path) -> Result<Self> {
        match fs::create_dir_all(primary).await {
            Ok(()) => {
                info!("Using backup directory {}", primary.display());
                Ok(Self::at(primary))
            }
            Err(primary_err) => {
                warn!(
                    "Cannot create backup directory {} ({}), falling back to {}",
                    primary.display(),
                    primary_err,
                    fallback.display()
                );
                fs::create_dir_all(fallback)
                    .await
                    .map_err(|e| BackupError::Storage {
                        message: format!(
                            "Could not create backup directory ({}): {e}",
                            fallback.display()
                        ),
                    })?;
                Ok(Self::at(fallback))
            }
        }
    }

    /// Use `directory` as is, without touching the filesystem.
    pub fn at(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.directory.join(LEDGER_FILENAME)
    }

    /// Path of a snapshot file. Ledger filenames are plain names; anything
    /// that could escape the directory is refused.
    pub fn snapshot_path(&self, filename: &str) -> Result<PathBuf> {
        let plain = !filename.is_empty()
            && filename != "."
            && filename != ".."
            && !filename.contains(['/', '\\'])
            && filename != LEDGER_FILENAME;
        if !plain {
            return Err(BackupError::bad_request(format!(
                "Invalid backup filename: {filename}"
            )));
        }
        Ok(self.directory.join(filename))
    }

    /// Write a snapshot and return its size on disk.
    pub async fn write_snapshot(&self, filename: &str, contents: &str) -> Result<u64> {
        let path = self.snapshot_path(filename)?;
        // The directory may have been removed since startup.
        fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| BackupError::Storage {
                message: format!(
                    "Could not create backup directory ({}): {e}",
                    self.directory.display()
                ),
            })?;
        fs::write(&path, contents).await?;
        let size = fs::metadata(&path).await?.len();
        debug!("Wrote snapshot {} ({} bytes)", path.display(), size);
        Ok(size)
    }

    pub async fn read_snapshot(&self, filename: &str) -> Result<String> {
        let path = self.snapshot_path(filename)?;
        fs::read_to_string(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                BackupError::not_found(format!("Backup file {filename} is missing"))
            }
            _ => BackupError::Io(e),
        })
    }

    pub async fn remove_snapshot(&self, filename: &str) -> Result<()> {
        let path = self.snapshot_path(filename)?;
        fs::remove_file(&path).await?;
        debug!("Removed snapshot {}", path.display());
        Ok(())
    }
}
