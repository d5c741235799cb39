use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::ledger::Ledger;
use super::payload::{SystemSnapshot, TenantSnapshot, UserSnapshot};
use super::repository::BackupServices;
use super::serializer::{to_pretty_json, SnapshotRow};
use super::storage::BackupStorage;
use super::tables::{TableSpec, TENANT_SNAPSHOT_TABLES, USER_SNAPSHOT_TABLES};
use super::{BackupError, BackupRecord, BackupType, Result};

/// Captures snapshots to disk and records them in the ledger.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    services: BackupServices,
    storage: BackupStorage,
    ledger: Arc<Ledger>,
    excluded_tables: Vec<String>,
}

impl SnapshotWriter {
    pub fn new(
        services: BackupServices,
        storage: BackupStorage,
        ledger: Arc<Ledger>,
        excluded_tables: Vec<String>,
    ) -> Self {
        Self {
            services,
            storage,
            ledger,
            excluded_tables,
        }
    }

    /// Dump every base table of the schema except the excluded ones.
    pub async fn create_system_backup(&self, description: Option<String>) -> Result<BackupRecord> {
        let started = Utc::now();
        info!("Starting system backup");

        let tables = self.services.introspector.list_base_tables().await?;
        let mut captured = BTreeMap::new();
        for table in tables {
            if self.excluded_tables.iter().any(|excluded| excluded == &table) {
                debug!("Skipping excluded table {}", table);
                continue;
            }
            let rows = self
                .services
                .database
                .fetch_rows(&self.services.sql.select_all_rows(&table))
                .await?;
            debug!("Captured {} rows from {}", rows.len(), table);
            captured.insert(table, rows);
        }

        let snapshot = SystemSnapshot::new(started, captured);
        let record = self
            .persist(
                BackupType::System,
                None,
                None,
                description.unwrap_or_else(|| "System-wide backup".to_string()),
                started,
                &to_pretty_json(&snapshot)?,
            )
            .await?;

        info!(
            "System backup {} completed: {} tables, {} rows, {} bytes",
            record.id,
            snapshot.tables.len(),
            snapshot.row_count(),
            record.size_bytes
        );
        Ok(record)
    }

    /// Capture the business data of the tenant a user belongs to.
    pub async fn create_user_backup(
        &self,
        user_id: &str,
        description: Option<String>,
    ) -> Result<BackupRecord> {
        let started = Utc::now();
        let user = self
            .services
            .entities
            .find_user(user_id)
            .await?
            .ok_or_else(|| BackupError::not_found(format!("User {user_id} not found")))?;
        let tenant_id = user
            .tenant()
            .ok_or_else(|| {
                BackupError::not_found(format!("User {user_id} is not associated with a tenant"))
            })?
            .to_string();

        info!("Starting user backup for {} (tenant {})", user_id, tenant_id);
        let collections = self.capture(USER_SNAPSHOT_TABLES, &tenant_id).await?;

        let description = description.unwrap_or_else(|| {
            format!("{} user data", user.email.as_deref().unwrap_or(user_id))
        });
        let entity_name = user.display_name();
        let snapshot = UserSnapshot { user, collections };

        let record = self
            .persist(
                BackupType::User,
                Some(user_id),
                entity_name,
                description,
                started,
                &to_pretty_json(&snapshot)?,
            )
            .await?;
        info!("User backup {} completed ({} bytes)", record.id, record.size_bytes);
        Ok(record)
    }

    pub async fn create_tenant_backup(
        &self,
        tenant_id: &str,
        description: Option<String>,
    ) -> Result<BackupRecord> {
        let started = Utc::now();
        let tenant = self
            .services
            .entities
            .find_tenant(tenant_id)
            .await?
            .ok_or_else(|| BackupError::not_found(format!("Tenant {tenant_id} not found")))?;

        info!("Starting tenant backup for {} ({})", tenant_id, tenant.name);
        let collections = self.capture(TENANT_SNAPSHOT_TABLES, tenant_id).await?;

        let description = description.unwrap_or_else(|| format!("{} tenant data", tenant.name));
        let entity_name = Some(tenant.name.clone());
        let snapshot = TenantSnapshot {
            tenant: Some(tenant),
            collections,
        };

        let record = self
            .persist(
                BackupType::Tenant,
                Some(tenant_id),
                entity_name,
                description,
                started,
                &to_pretty_json(&snapshot)?,
            )
            .await?;
        info!("Tenant backup {} completed ({} bytes)", record.id, record.size_bytes);
        Ok(record)
    }

    async fn capture(
        &self,
        tables: &[TableSpec],
        tenant_id: &str,
    ) -> Result<BTreeMap<String, Vec<SnapshotRow>>> {
        let mut collections = BTreeMap::new();
        for spec in tables {
            let rows = self
                .services
                .database
                .fetch_rows(&self.services.sql.select_tenant_rows(spec, tenant_id))
                .await?;
            debug!("Captured {} {} rows for tenant {}", rows.len(), spec.name, tenant_id);
            collections.insert(spec.name.to_string(), rows);
        }
        Ok(collections)
    }

    /// Write the payload, then record it. Nothing reaches the ledger when
    /// the write fails.
    async fn persist(
        &self,
        backup_type: BackupType,
        entity_id: Option<&str>,
        entity_name: Option<String>,
        description: String,
        created_at: DateTime<Utc>,
        contents: &str,
    ) -> Result<BackupRecord> {
        let filename = BackupRecord::make_filename(backup_type, entity_id, created_at);
        let size_bytes = self.storage.write_snapshot(&filename, contents).await?;

        let record = BackupRecord {
            id: BackupRecord::make_id(backup_type, entity_id, created_at),
            backup_type,
            entity_id: entity_id.map(str::to_string),
            entity_name,
            filename,
            size_bytes,
            created_at,
            description: Some(description),
        };
        self.ledger.append(record.clone()).await?;
        Ok(record)
    }
}
