//! Replays snapshots into the database.
//!
//! Each restore runs in a single transaction that commits only when every
//! statement succeeded. Any failure rolls the transaction back and the
//! original error is returned to the caller.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::ledger::Ledger;
use super::ordering::restore_order;
use super::payload::{parse_entity_snapshot, SystemSnapshot, TenantSnapshot, UserSnapshot};
use super::repository::{BackupServices, RestoreTransaction};
use super::serializer::{iso_timestamp, SnapshotRow};
use super::storage::BackupStorage;
use super::tables::{
    TableSpec, TENANT_DELETE_ORDER, TENANT_INSERT_ORDER, USER_DELETE_ORDER, USER_INSERT_ORDER,
};
use super::{BackupError, BackupRecord, BackupType, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreReport {
    pub message: String,
    pub tables: usize,
    pub rows: usize,
}

#[derive(Debug, Clone)]
pub struct SnapshotRestorer {
    services: BackupServices,
    storage: BackupStorage,
    ledger: Arc<Ledger>,
}

impl SnapshotRestorer {
    pub fn new(services: BackupServices, storage: BackupStorage, ledger: Arc<Ledger>) -> Self {
        Self {
            services,
            storage,
            ledger,
        }
    }

    /// Replace the contents of every captured table with the snapshot rows.
    pub async fn restore_system_backup(&self, backup_id: &str) -> Result<RestoreReport> {
        let record = self
            .lookup(backup_id, |r| r.backup_type == BackupType::System)
            .await?;
        ensure_json_snapshot(&record)?;

        let raw = self.storage.read_snapshot(&record.filename).await?;
        let snapshot = SystemSnapshot::parse(&raw)?;
        let captured = snapshot.table_names();

        let live: BTreeSet<String> = self
            .services
            .introspector
            .list_base_tables()
            .await?
            .into_iter()
            .collect();
        let missing: Vec<&str> = captured
            .iter()
            .filter(|table| !live.contains(*table))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(BackupError::bad_request(format!(
                "Backup references tables that do not exist in the database: {}",
                missing.join(", ")
            )));
        }

        let edges = self.services.introspector.list_foreign_keys().await?;
        let plan = restore_order(&captured, &edges);
        if plan.has_cycles() {
            warn!(
                "Foreign key cycle between {}; restoring them in name order",
                plan.unresolved.join(", ")
            );
        }
        debug!("Restore order: {}", plan.order.join(", "));

        info!(
            "Restoring system backup {} ({} tables)",
            record.id,
            captured.len()
        );
        let mut tx = self.services.database.begin().await?;
        let outcome = self
            .replay_system(tx.as_mut(), &snapshot, &plan.order)
            .await;
        let rows = finish(tx, outcome).await?;

        let taken_at = snapshot.created_at.unwrap_or(record.created_at);
        let report = RestoreReport {
            message: format!(
                "System backup from {} restored: {} tables, {} rows",
                iso_timestamp(taken_at),
                captured.len(),
                rows
            ),
            tables: captured.len(),
            rows,
        };
        info!("{}", report.message);
        Ok(report)
    }

    /// Replace the business data of the user's tenant.
    pub async fn restore_user_backup(&self, user_id: &str, backup_id: &str) -> Result<RestoreReport> {
        let record = self
            .lookup(backup_id, |r| r.belongs_to(BackupType::User, user_id))
            .await?;
        ensure_json_snapshot(&record)?;

        let raw = self.storage.read_snapshot(&record.filename).await?;
        let snapshot: UserSnapshot = parse_entity_snapshot(&raw)?;
        let tenant_id = snapshot
            .user
            .tenant()
            .ok_or_else(|| BackupError::not_found("Backup has no tenant information"))?
            .to_string();

        info!(
            "Restoring user backup {} into tenant {}",
            record.id, tenant_id
        );
        let mut tx = self.services.database.begin().await?;
        let outcome = self
            .replay_tenant_tables(
                tx.as_mut(),
                &tenant_id,
                USER_DELETE_ORDER,
                USER_INSERT_ORDER,
                |table| snapshot.rows(table),
            )
            .await;
        let rows = finish(tx, outcome).await?;

        let report = RestoreReport {
            message: format!(
                "User backup from {} restored: {} rows",
                iso_timestamp(record.created_at),
                rows
            ),
            tables: USER_INSERT_ORDER.len(),
            rows,
        };
        info!("{}", report.message);
        Ok(report)
    }

    /// Overwrite the tenant row and replace all of its data.
    pub async fn restore_tenant_backup(
        &self,
        tenant_id: &str,
        backup_id: &str,
    ) -> Result<RestoreReport> {
        let record = self
            .lookup(backup_id, |r| r.belongs_to(BackupType::Tenant, tenant_id))
            .await?;
        ensure_json_snapshot(&record)?;

        let raw = self.storage.read_snapshot(&record.filename).await?;
        let snapshot: TenantSnapshot = parse_entity_snapshot(&raw)?;
        let tenant_update = match &snapshot.tenant {
            Some(tenant) => {
                let mut value = serde_json::to_value(tenant)?;
                if let Value::Object(fields) = &mut value {
                    fields.insert("id".to_string(), Value::String(tenant_id.to_string()));
                }
                Some(self.services.sql.update_tenant(value))
            }
            None => {
                warn!("Tenant backup {} has no tenant row, keeping current tenant fields", record.id);
                None
            }
        };

        info!("Restoring tenant backup {} into tenant {}", record.id, tenant_id);
        let mut tx = self.services.database.begin().await?;
        let outcome = async {
            if let Some(update) = &tenant_update {
                tx.execute(update).await?;
            }
            self.replay_tenant_tables(
                tx.as_mut(),
                tenant_id,
                TENANT_DELETE_ORDER,
                TENANT_INSERT_ORDER,
                |table| snapshot.rows(table),
            )
            .await
        }
        .await;
        let rows = finish(tx, outcome).await?;

        let report = RestoreReport {
            message: format!(
                "Tenant backup from {} restored: {} rows",
                iso_timestamp(record.created_at),
                rows
            ),
            tables: TENANT_INSERT_ORDER.len(),
            rows,
        };
        info!("{}", report.message);
        Ok(report)
    }

    async fn lookup<F>(&self, backup_id: &str, matches: F) -> Result<BackupRecord>
    where
        F: Fn(&BackupRecord) -> bool,
    {
        self.ledger
            .find(backup_id)
            .await?
            .filter(|record| matches(record))
            .ok_or_else(|| BackupError::not_found(format!("Backup {backup_id} not found")))
    }

    async fn replay_system(
        &self,
        tx: &mut dyn RestoreTransaction,
        snapshot: &SystemSnapshot,
        order: &[String],
    ) -> Result<usize> {
        tx.execute(&self.services.sql.truncate(order)).await?;

        let mut inserted = 0;
        for table in order {
            let rows = snapshot.tables.get(table).map(Vec::as_slice).unwrap_or_default();
            for row in rows.iter().filter(|row| !row.is_empty()) {
                tx.execute(&self.services.sql.insert_row(table, row)).await?;
                inserted += 1;
            }
            debug!("Restored {} rows into {}", rows.len(), table);
        }
        Ok(inserted)
    }

    async fn replay_tenant_tables<'a, F>(
        &self,
        tx: &mut dyn RestoreTransaction,
        tenant_id: &str,
        delete_order: &[&str],
        insert_order: &[TableSpec],
        rows_for: F,
    ) -> Result<usize>
    where
        F: Fn(&str) -> &'a [SnapshotRow] + Send + Sync,
    {
        for table in delete_order {
            let deleted = tx
                .execute(&self.services.sql.delete_tenant_rows(table, tenant_id))
                .await?;
            debug!("Deleted {} rows from {} for tenant {}", deleted, table, tenant_id);
        }

        let mut inserted = 0;
        for spec in insert_order {
            let columns = spec.column_names();
            for row in rows_for(spec.name) {
                let statement =
                    self.services
                        .sql
                        .insert_columns(spec.name, &columns, spec.record_for(row, tenant_id));
                tx.execute(&statement).await?;
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

/// Snapshots taken by the previous SQL-dump tooling cannot be replayed here.
fn ensure_json_snapshot(record: &BackupRecord) -> Result<()> {
    if record.filename.ends_with(".json") {
        return Ok(());
    }
    Err(BackupError::bad_request(format!(
        "Backup {} ({}) is a legacy SQL dump; restore it manually with psql or pg_restore",
        record.id, record.filename
    )))
}

/// Commit on success. On failure roll back and hand the original error on.
async fn finish<T>(tx: Box<dyn RestoreTransaction>, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            error!("Restore failed, rolling back: {}", e);
            if let Err(rollback_err) = tx.rollback().await {
                error!("Rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}
