pub mod backup_manager;
pub mod ledger;
pub mod ordering;
pub mod payload;
pub mod repository;
pub mod restorer;
pub mod serializer;
pub mod sql;
pub mod storage;
pub mod tables;
pub mod writer;

pub use backup_manager::*;
pub use ledger::Ledger;
pub use ordering::{restore_order, RestorePlan};
pub use payload::{SystemSnapshot, TenantSnapshot, TenantSummary, UserSnapshot, UserSummary};
pub use repository::*;
pub use restorer::{RestoreReport, SnapshotRestorer};
pub use serializer::SnapshotRow;
pub use storage::BackupStorage;
pub use writer::SnapshotWriter;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Name of the ledger file inside the backup directory.
pub const LEDGER_FILENAME: &str = "metadata.json";

/// Upper bound accepted for `BackupConfig::retention_days` (about a century).
pub const MAX_RETENTION_DAYS: u32 = 36_500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory where snapshots and the ledger are stored
    pub backup_directory: PathBuf,

    /// Used for the life of the process when `backup_directory` cannot be created
    pub fallback_directory: PathBuf,

    /// Snapshots older than this are removed by the retention sweep
    pub retention_days: u32,

    /// Database schema whose base tables make up a system snapshot
    pub schema: String,

    /// Tables never captured by a system snapshot
    pub excluded_tables: Vec<String>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_directory: PathBuf::from("backups"),
            fallback_directory: std::env::temp_dir().join("tenant-backups"),
            retention_days: 30,
            schema: "public".to_string(),
            excluded_tables: vec!["migrations".to_string(), "typeorm_metadata".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    System,
    User,
    Tenant,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::System => "system",
            BackupType::User => "user",
            BackupType::Tenant => "tenant",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackupType {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(BackupType::System),
            "user" => Ok(BackupType::User),
            "tenant" => Ok(BackupType::Tenant),
            other => Err(BackupError::BadRequest {
                message: format!("Unknown backup type: {other}"),
            }),
        }
    }
}

/// One ledger entry. Written once when a snapshot completes, removed by
/// explicit deletion or the retention sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub backup_type: BackupType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    pub filename: String,
    #[serde(rename = "size", alias = "sizeBytes")]
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl BackupRecord {
    /// `{type}_[{entityId}_]{epochMillis}`
    pub fn make_id(backup_type: BackupType, entity_id: Option<&str>, at: DateTime<Utc>) -> String {
        match entity_id {
            Some(entity) => format!("{}_{}_{}", backup_type, entity, at.timestamp_millis()),
            None => format!("{}_{}", backup_type, at.timestamp_millis()),
        }
    }

    /// `{type}_[{entityId}_]{ISO timestamp with ':' and '.' as '-'}.json`
    pub fn make_filename(
        backup_type: BackupType,
        entity_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> String {
        let stamp = serializer::file_timestamp(at);
        match entity_id {
            Some(entity) => format!("{backup_type}_{entity}_{stamp}.json"),
            None => format!("{backup_type}_{stamp}.json"),
        }
    }

    pub fn belongs_to(&self, backup_type: BackupType, entity_id: &str) -> bool {
        self.backup_type == backup_type && self.entity_id.as_deref() == Some(entity_id)
    }
}

/// The three failure classes callers map onto their transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    BadRequest,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Backup storage error: {message}")]
    Storage { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackupError {
    pub fn not_found(message: impl Into<String>) -> Self {
        BackupError::NotFound {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        BackupError::BadRequest {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            BackupError::NotFound { .. } => ErrorCategory::NotFound,
            BackupError::BadRequest { .. } => ErrorCategory::BadRequest,
            BackupError::Storage { .. }
            | BackupError::Io(_)
            | BackupError::Database(_)
            | BackupError::Serialization(_) => ErrorCategory::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
