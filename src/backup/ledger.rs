//! Flat-file index of every snapshot (`metadata.json`).
//!
//! Each mutation reads the whole file, changes it in memory and rewrites it.
//! Mutations from one process are serialized by an async mutex; two
//! processes sharing a directory can still overwrite each other's appends.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::serializer::to_pretty_json;
use super::{BackupError, BackupRecord, Result};

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records. A missing ledger is created empty; an unreadable one
    /// reads as empty so new backups can still be recorded.
    pub async fn read(&self) -> Result<Vec<BackupRecord>> {
        self.ensure_exists().await?;
        match fs::read_to_string(&self.path).await {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(records) => Ok(records),
                Err(e) => {
                    warn!("Ledger {} is unreadable, treating as empty: {}", self.path.display(), e);
                    Ok(Vec::new())
                }
            },
            Err(e) => {
                warn!("Could not read ledger {}: {}", self.path.display(), e);
                Ok(Vec::new())
            }
        }
    }

    /// Replace the whole ledger.
    pub async fn write(&self, records: &[BackupRecord]) -> Result<()> {
        self.ensure_directory().await?;
        let contents = to_pretty_json(records)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, contents).await?;
        fs::rename(&staging, &self.path).await?;
        debug!("Ledger rewritten with {} records", records.len());
        Ok(())
    }

    pub async fn find(&self, id: &str) -> Result<Option<BackupRecord>> {
        Ok(self.read().await?.into_iter().find(|r| r.id == id))
    }

    pub async fn append(&self, record: BackupRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read().await?;
        records.push(record);
        self.write(&records).await
    }

    /// Remove one record by id, returning it when present.
    pub async fn remove(&self, id: &str) -> Result<Option<BackupRecord>> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read().await?;
        let Some(index) = records.iter().position(|r| r.id == id) else {
            return Ok(None);
        };
        let removed = records.remove(index);
        self.write(&records).await?;
        Ok(Some(removed))
    }

    /// Keep only the records matching `keep`; the ledger is rewritten even
    /// when nothing is dropped. Returns the dropped records.
    pub async fn retain<F>(&self, keep: F) -> Result<Vec<BackupRecord>>
    where
        F: Fn(&BackupRecord) -> bool + Send,
    {
        let _guard = self.write_lock.lock().await;
        let (kept, dropped): (Vec<_>, Vec<_>) = self.read().await?.into_iter().partition(|r| keep(r));
        self.write(&kept).await?;
        Ok(dropped)
    }

    async fn ensure_directory(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BackupError::Storage {
                    message: format!("Could not create backup directory ({}): {e}", parent.display()),
                })?;
        }
        Ok(())
    }

    /// Create the ledger as `[]` unless it already exists. `create_new`
    /// never truncates, so a ledger another task has just written survives.
    async fn ensure_exists(&self) -> Result<()> {
        if fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(());
        }
        self.ensure_directory().await?;
        let storage_error = |e: std::io::Error| BackupError::Storage {
            message: format!("Could not write backup ledger ({}): {e}", self.path.display()),
        };
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(mut file) => {
                file.write_all(b"[]").await.map_err(storage_error)?;
                file.flush().await.map_err(storage_error)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(storage_error(e)),
        }
    }
}
