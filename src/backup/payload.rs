//! On-disk snapshot payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::serializer::{self, SnapshotRow};
use super::{BackupError, Result};

pub const SYSTEM_SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub tables: BTreeMap<String, Vec<SnapshotRow>>,
}

impl SystemSnapshot {
    pub fn new(created_at: DateTime<Utc>, tables: BTreeMap<String, Vec<SnapshotRow>>) -> Self {
        Self {
            version: SYSTEM_SNAPSHOT_VERSION,
            created_at: Some(created_at),
            tables,
        }
    }

    /// Parse a system snapshot file, refusing anything a restore cannot use.
    /// Table entries that are not arrays of objects restore as empty.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw).map_err(|e| {
            BackupError::bad_request(format!("Backup file is corrupt or not in the expected format: {e}"))
        })?;

        let tables = value
            .get("tables")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                BackupError::bad_request("Backup file is corrupt or not in the expected format")
            })?;

        if tables.is_empty() {
            return Err(BackupError::bad_request("Backup is empty (no table data)"));
        }

        let tables = tables
            .iter()
            .map(|(name, rows)| {
                let rows = serializer::rows_of(rows).into_iter().cloned().collect();
                (name.clone(), rows)
            })
            .collect();

        let version = match value.get("version") {
            None | Some(Value::Null) => SYSTEM_SNAPSHOT_VERSION,
            Some(raw) => raw
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    BackupError::bad_request(format!("Unsupported backup format version: {raw}"))
                })?,
        };

        Ok(Self {
            version,
            created_at: value
                .get("createdAt")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc)),
            tables,
        })
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl UserSummary {
    pub fn tenant(&self) -> Option<&str> {
        self.tenant_id.as_deref().filter(|t| !t.is_empty())
    }

    pub fn display_name(&self) -> Option<String> {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        (!name.is_empty()).then_some(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub subscription_plan: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub max_users: Option<i64>,
    #[serde(default)]
    pub stripe_customer_id: Option<String>,
    #[serde(default)]
    pub stripe_subscription_id: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserSnapshot {
    pub user: UserSummary,
    #[serde(flatten)]
    pub collections: BTreeMap<String, Vec<SnapshotRow>>,
}

impl UserSnapshot {
    pub fn rows(&self, table: &str) -> &[SnapshotRow] {
        self.collections.get(table).map(Vec::as_slice).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantSnapshot {
    #[serde(default)]
    pub tenant: Option<TenantSummary>,
    #[serde(flatten)]
    pub collections: BTreeMap<String, Vec<SnapshotRow>>,
}

impl TenantSnapshot {
    pub fn rows(&self, table: &str) -> &[SnapshotRow] {
        self.collections.get(table).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Parse a user or tenant snapshot; shape errors are the caller's fault.
pub fn parse_entity_snapshot<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        BackupError::bad_request(format!("Backup file is corrupt or not in the expected format: {e}"))
    })
}
