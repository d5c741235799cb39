use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use super::ledger::Ledger;
use super::repository::BackupServices;
use super::restorer::{RestoreReport, SnapshotRestorer};
use super::storage::BackupStorage;
use super::writer::SnapshotWriter;
use super::{BackupConfig, BackupError, BackupRecord, BackupType, Result};

/// Entry point of the backup subsystem: snapshot creation, restore and
/// lifecycle of the files in the backup directory.
#[derive(Debug)]
pub struct BackupManager {
    config: BackupConfig,
    storage: BackupStorage,
    ledger: Arc<Ledger>,
    writer: SnapshotWriter,
    restorer: SnapshotRestorer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    pub deleted: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatistics {
    pub total: usize,
    pub system_backups: usize,
    pub user_backups: usize,
    pub tenant_backups: usize,
    pub total_size: u64,
    #[serde(rename = "totalSizeMB")]
    pub total_size_mb: String,
    pub oldest_backup: Option<DateTime<Utc>>,
    pub newest_backup: Option<DateTime<Utc>>,
}

impl BackupManager {
    /// Resolve the backup directory and wire up the writer and restorer.
    pub async fn initialize(config: BackupConfig, services: BackupServices) -> Result<Self> {
        info!("Initializing backup manager");
        let storage =
            BackupStorage::resolve(&config.backup_directory, &config.fallback_directory).await?;
        Ok(Self::new(config, services, storage))
    }

    pub fn new(config: BackupConfig, services: BackupServices, storage: BackupStorage) -> Self {
        let ledger = Arc::new(Ledger::new(storage.ledger_path()));
        let writer = SnapshotWriter::new(
            services.clone(),
            storage.clone(),
            ledger.clone(),
            config.excluded_tables.clone(),
        );
        let restorer = SnapshotRestorer::new(services, storage.clone(), ledger.clone());
        Self {
            config,
            storage,
            ledger,
            writer,
            restorer,
        }
    }

    pub fn storage(&self) -> &BackupStorage {
        &self.storage
    }

    pub async fn create_system_backup(&self, description: Option<String>) -> Result<BackupRecord> {
        self.writer.create_system_backup(description).await
    }

    pub async fn create_user_backup(
        &self,
        user_id: &str,
        description: Option<String>,
    ) -> Result<BackupRecord> {
        self.writer.create_user_backup(user_id, description).await
    }

    pub async fn create_tenant_backup(
        &self,
        tenant_id: &str,
        description: Option<String>,
    ) -> Result<BackupRecord> {
        self.writer.create_tenant_backup(tenant_id, description).await
    }

    pub async fn restore_system_backup(&self, backup_id: &str) -> Result<RestoreReport> {
        self.restorer.restore_system_backup(backup_id).await
    }

    pub async fn restore_user_backup(&self, user_id: &str, backup_id: &str) -> Result<RestoreReport> {
        self.restorer.restore_user_backup(user_id, backup_id).await
    }

    pub async fn restore_tenant_backup(
        &self,
        tenant_id: &str,
        backup_id: &str,
    ) -> Result<RestoreReport> {
        self.restorer.restore_tenant_backup(tenant_id, backup_id).await
    }

    /// Ledger records, newest first, optionally of one type.
    pub async fn list_backups(&self, backup_type: Option<BackupType>) -> Result<Vec<BackupRecord>> {
        let mut records: Vec<BackupRecord> = self
            .ledger
            .read()
            .await?
            .into_iter()
            .filter(|r| backup_type.map_or(true, |t| r.backup_type == t))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    pub async fn list_user_backups(&self, user_id: &str) -> Result<Vec<BackupRecord>> {
        let mut records: Vec<BackupRecord> = self
            .ledger
            .read()
            .await?
            .into_iter()
            .filter(|r| r.belongs_to(BackupType::User, user_id))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Remove the snapshot file, then its ledger entry. A file that cannot
    /// be removed leaves the entry in place.
    pub async fn delete_backup(&self, backup_id: &str) -> Result<BackupRecord> {
        let record = self
            .ledger
            .find(backup_id)
            .await?
            .ok_or_else(|| BackupError::not_found(format!("Backup {backup_id} not found")))?;

        self.storage.remove_snapshot(&record.filename).await?;
        self.ledger.remove(backup_id).await?;

        info!("Deleted backup {} ({})", record.id, record.filename);
        Ok(record)
    }

    /// Drop every snapshot older than the retention window. Files that
    /// cannot be removed are logged and their records dropped anyway.
    pub async fn cleanup_old_backups(&self) -> Result<CleanupReport> {
        let days = self.config.retention_days;
        let cutoff = Duration::try_days(i64::from(days))
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .ok_or_else(|| {
                BackupError::bad_request(format!("Retention window of {days} days is out of range"))
            })?;
        self.cleanup_backups_before(cutoff).await
    }

    pub async fn cleanup_backups_before(&self, cutoff: DateTime<Utc>) -> Result<CleanupReport> {
        info!(
            "Starting backup cleanup with retention policy of {} days",
            self.config.retention_days
        );

        let expired = self.ledger.retain(|r| r.created_at >= cutoff).await?;
        for record in &expired {
            if let Err(e) = self.storage.remove_snapshot(&record.filename).await {
                error!("Failed to delete expired backup {}: {}", record.filename, e);
            }
        }

        let report = CleanupReport {
            deleted: expired.len(),
            message: format!("{} old backups removed", expired.len()),
        };
        info!("Cleanup completed: {} backups deleted", report.deleted);
        Ok(report)
    }

    pub async fn statistics(&self) -> Result<BackupStatistics> {
        let records = self.ledger.read().await?;
        let count = |t: BackupType| records.iter().filter(|r| r.backup_type == t).count();
        let total_size: u64 = records.iter().map(|r| r.size_bytes).sum();

        Ok(BackupStatistics {
            total: records.len(),
            system_backups: count(BackupType::System),
            user_backups: count(BackupType::User),
            tenant_backups: count(BackupType::Tenant),
            total_size,
            total_size_mb: format!("{:.2}", total_size as f64 / 1024.0 / 1024.0),
            oldest_backup: records.iter().map(|r| r.created_at).min(),
            newest_backup: records.iter().map(|r| r.created_at).max(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::repository::mock::RecordingDatabase;
    use tempfile::TempDir;

    fn record(id: &str, backup_type: BackupType, entity: Option<&str>, days_old: i64, size: u64) -> BackupRecord {
        BackupRecord {
            id: id.to_string(),
            backup_type,
            entity_id: entity.map(str::to_string),
            entity_name: None,
            filename: format!("{id}.json"),
            size_bytes: size,
            created_at: Utc::now() - Duration::days(days_old),
            description: None,
        }
    }

    async fn manager_with(dir: &TempDir, records: &[BackupRecord]) -> BackupManager {
        let config = BackupConfig {
            backup_directory: dir.path().to_path_buf(),
            ..BackupConfig::default()
        };
        let manager = BackupManager::initialize(config, RecordingDatabase::new().services("public"))
            .await
            .unwrap();
        for record in records {
            std::fs::write(dir.path().join(&record.filename), "{}").unwrap();
            manager.ledger.append(record.clone()).await.unwrap();
        }
        manager
    }

    #[tokio::test]
    async fn test_cleanup_honours_retention_window() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(
            &dir,
            &[
                record("old", BackupType::System, None, 40, 10),
                record("mid", BackupType::System, None, 20, 10),
                record("new", BackupType::User, Some("u1"), 5, 10),
            ],
        )
        .await;

        let report = manager.cleanup_old_backups().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert!(!dir.path().join("old.json").exists());
        assert!(dir.path().join("mid.json").exists());
        let remaining: Vec<String> = manager
            .list_backups(None)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(remaining, vec!["new", "mid"]);
    }

    #[tokio::test]
    async fn test_cleanup_drops_record_when_file_is_already_gone() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, &[record("old", BackupType::Tenant, Some("t1"), 45, 1)]).await;
        std::fs::remove_file(dir.path().join("old.json")).unwrap();

        let report = manager.cleanup_old_backups().await.unwrap();

        assert_eq!(report.deleted, 1);
        assert!(manager.list_backups(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_rejects_out_of_range_retention() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_with(&dir, &[record("old", BackupType::System, None, 40, 10)]).await;
        manager.config.retention_days = 100_000_000;

        let err = manager.cleanup_old_backups().await.unwrap_err();

        assert!(matches!(err, BackupError::BadRequest { .. }));
        assert_eq!(manager.list_backups(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_with_nothing_expired() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, &[record("a", BackupType::System, None, 1, 1)]).await;

        let report = manager.cleanup_old_backups().await.unwrap();

        assert_eq!(report.deleted, 0);
        assert_eq!(report.message, "0 old backups removed");
    }

    #[tokio::test]
    async fn test_listing_is_newest_first_and_filtered() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(
            &dir,
            &[
                record("s_old", BackupType::System, None, 3, 1),
                record("u1_a", BackupType::User, Some("u1"), 2, 1),
                record("u2_a", BackupType::User, Some("u2"), 1, 1),
                record("u1_b", BackupType::User, Some("u1"), 0, 1),
            ],
        )
        .await;

        let all: Vec<String> = manager.list_backups(None).await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(all, vec!["u1_b", "u2_a", "u1_a", "s_old"]);

        let users = manager.list_backups(Some(BackupType::User)).await.unwrap();
        assert_eq!(users.len(), 3);

        let mine: Vec<String> = manager
            .list_user_backups("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(mine, vec!["u1_b", "u1_a"]);
    }

    #[tokio::test]
    async fn test_delete_backup() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, &[record("a", BackupType::System, None, 1, 1)]).await;

        let err = manager.delete_backup("missing").await.unwrap_err();
        assert!(matches!(err, BackupError::NotFound { .. }));

        manager.delete_backup("a").await.unwrap();
        assert!(!dir.path().join("a.json").exists());
        assert!(manager.list_backups(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_keeps_record_when_file_removal_fails() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, &[record("a", BackupType::System, None, 1, 1)]).await;
        std::fs::remove_file(dir.path().join("a.json")).unwrap();

        assert!(manager.delete_backup("a").await.is_err());
        assert_eq!(manager.list_backups(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_statistics() {
        let dir = TempDir::new().unwrap();
        let oldest = record("s", BackupType::System, None, 10, 1024 * 1024);
        let newest = record("t", BackupType::Tenant, Some("t1"), 1, 512 * 1024);
        let manager = manager_with(
            &dir,
            &[oldest.clone(), record("u", BackupType::User, Some("u1"), 5, 0), newest.clone()],
        )
        .await;

        let stats = manager.statistics().await.unwrap();

        assert_eq!(stats.total, 3);
        assert_eq!((stats.system_backups, stats.user_backups, stats.tenant_backups), (1, 1, 1));
        assert_eq!(stats.total_size, 1024 * 1024 + 512 * 1024);
        assert_eq!(stats.total_size_mb, "1.50");
        assert_eq!(stats.oldest_backup, Some(oldest.created_at));
        assert_eq!(stats.newest_backup, Some(newest.created_at));

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["totalSizeMB"], "1.50");
        assert_eq!(json["systemBackups"], 1);
    }

    #[tokio::test]
    async fn test_statistics_on_empty_ledger() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, &[]).await;

        let stats = manager.statistics().await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.total_size_mb, "0.00");
        assert_eq!(stats.oldest_backup, None);
    }
}
