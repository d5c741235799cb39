use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::debug;

use super::payload::{TenantSummary, UserSummary};
use super::serializer::{into_snapshot_row, SnapshotRow};
use super::sql::{SqlBuilder, SqlParam, Statement};
use super::tables::{TENANTS_TABLE, USERS_TABLE};
use super::{BackupError, Result};

/// `from_table` holds a foreign key referencing `to_table`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForeignKeyEdge {
    pub from_table: String,
    pub to_table: String,
}

/// Live schema metadata needed to capture and order a system snapshot.
#[async_trait]
pub trait SchemaIntrospector: Send + Sync + std::fmt::Debug {
    /// Base tables of the schema, in name order.
    async fn list_base_tables(&self) -> Result<Vec<String>>;
    async fn list_foreign_keys(&self) -> Result<Vec<ForeignKeyEdge>>;
}

/// Lookup of the users and tenants a snapshot is taken for.
#[async_trait]
pub trait EntityDirectory: Send + Sync + std::fmt::Debug {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserSummary>>;
    async fn find_tenant(&self, tenant_id: &str) -> Result<Option<TenantSummary>>;
}

/// Row access used by the snapshot writer and restorer.
#[async_trait]
pub trait BackupDatabase: Send + Sync + std::fmt::Debug {
    /// Run a statement whose single column is a row rendered as JSON.
    async fn fetch_rows(&self, statement: &Statement) -> Result<Vec<SnapshotRow>>;
    async fn begin(&self) -> Result<Box<dyn RestoreTransaction>>;
}

/// One open transaction. Dropping it without commit rolls back.
#[async_trait]
pub trait RestoreTransaction: Send {
    async fn execute(&mut self, statement: &Statement) -> Result<u64>;
    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// The collaborators the writer and restorer run against.
#[derive(Debug, Clone)]
pub struct BackupServices {
    pub database: Arc<dyn BackupDatabase>,
    pub introspector: Arc<dyn SchemaIntrospector>,
    pub entities: Arc<dyn EntityDirectory>,
    pub sql: SqlBuilder,
}

impl BackupServices {
    pub fn postgres(db_pool: Arc<PgPool>, schema: &str) -> Self {
        let repository = Arc::new(PostgresBackupRepository::new(db_pool, schema));
        Self {
            database: repository.clone(),
            introspector: repository.clone(),
            entities: repository,
            sql: SqlBuilder::new(schema),
        }
    }
}

fn bind(statement: &Statement) -> Query<'_, Postgres, PgArguments> {
    statement
        .params
        .iter()
        .fold(sqlx::query(&statement.sql), |query, param| match param {
            SqlParam::Text(text) => query.bind(text.as_str()),
            SqlParam::Json(value) => query.bind(Json(value)),
        })
}

/// PostgreSQL implementation of the backup collaborators
#[derive(Debug)]
pub struct PostgresBackupRepository {
    db_pool: Arc<PgPool>,
    sql: SqlBuilder,
}

impl PostgresBackupRepository {
    pub fn new(db_pool: Arc<PgPool>, schema: &str) -> Self {
        Self {
            db_pool,
            sql: SqlBuilder::new(schema),
        }
    }

    async fn find_one(&self, table: &str, id: &str) -> Result<Option<Value>> {
        let rows = self.fetch_rows(&self.sql.select_by_id(table, id)).await?;
        Ok(rows.into_iter().next().map(Value::Object))
    }
}

#[async_trait]
impl SchemaIntrospector for PostgresBackupRepository {
    async fn list_base_tables(&self) -> Result<Vec<String>> {
        let statement = self.sql.list_base_tables();
        let rows = bind(&statement).fetch_all(self.db_pool.as_ref()).await?;
        let tables = rows
            .iter()
            .map(|row| row.try_get::<String, _>(0))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        debug!("Schema {} has {} base tables", self.sql.schema(), tables.len());
        Ok(tables)
    }

    async fn list_foreign_keys(&self) -> Result<Vec<ForeignKeyEdge>> {
        let statement = self.sql.list_foreign_keys();
        let rows = bind(&statement).fetch_all(self.db_pool.as_ref()).await?;
        rows.iter()
            .map(|row| -> Result<ForeignKeyEdge> {
                Ok(ForeignKeyEdge {
                    from_table: row.try_get("table_name")?,
                    to_table: row.try_get("referenced_table_name")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl EntityDirectory for PostgresBackupRepository {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserSummary>> {
        match self.find_one(USERS_TABLE, user_id).await? {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    async fn find_tenant(&self, tenant_id: &str) -> Result<Option<TenantSummary>> {
        match self.find_one(TENANTS_TABLE, tenant_id).await? {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl BackupDatabase for PostgresBackupRepository {
    async fn fetch_rows(&self, statement: &Statement) -> Result<Vec<SnapshotRow>> {
        let rows = bind(statement).fetch_all(self.db_pool.as_ref()).await?;
        rows.iter()
            .map(|row| -> Result<SnapshotRow> {
                let Json(value) = row.try_get::<Json<Value>, _>(0)?;
                Ok(into_snapshot_row(value))
            })
            .collect()
    }

    async fn begin(&self) -> Result<Box<dyn RestoreTransaction>> {
        let tx = self.db_pool.begin().await?;
        debug!("Restore transaction started");
        Ok(Box::new(PgRestoreTransaction { tx }))
    }
}

pub struct PgRestoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RestoreTransaction for PgRestoreTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        let result = bind(statement).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let PgRestoreTransaction { tx } = *self;
        tx.commit().await.map_err(BackupError::from)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let PgRestoreTransaction { tx } = *self;
        tx.rollback().await.map_err(BackupError::from)
    }
}
