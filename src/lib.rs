pub mod backup;
pub mod config;
pub mod database;

pub use config::Config;
pub use database::create_pool;

// Re-export backup types
pub use backup::{
    BackupConfig, BackupError, BackupManager, BackupRecord, BackupServices, BackupStatistics,
    BackupType, CleanupReport, ErrorCategory, PostgresBackupRepository, RestoreReport,
};
