use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::config::OperationalConfig;

/// Connect to PostgreSQL and check the connection before handing out the pool.
///
/// A restore holds one connection for its whole transaction, so the pool is
/// small and long-lived.
pub async fn create_pool(database_url: &str, operational: &OperationalConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(operational.max_db_connections)
        .acquire_timeout(Duration::from_secs(operational.acquire_timeout_seconds))
        .idle_timeout(Some(Duration::from_secs(300)))
        .max_lifetime(Some(Duration::from_secs(3600)))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    sqlx::query("SELECT 1").fetch_one(&pool).await?;

    info!(
        "Database pool ready with {} max connections",
        operational.max_db_connections
    );
    Ok(pool)
}
