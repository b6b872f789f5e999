//! # Database Migration Management
//!
//! Schema migrations are embedded in the binary from `migrations/` and applied
//! on startup when `database.auto_migrate` is enabled.

use crate::db_span;
use crate::errors::{EgressError, ErrorContext, Result};
use crate::storage::DbPool;
use serde::{Deserialize, Serialize};
use sqlx::migrate::Migrator;
use tracing::{error, info, warn, Instrument};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// An applied migration as recorded by sqlx
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MigrationInfo {
    pub version: i64,
    pub description: String,
    pub success: bool,
}

/// Apply all pending migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    let available = MIGRATOR.iter().count();
    let span = db_span!("run_migrations", available);

    async {
        info!(available, "Running database migrations");

        MIGRATOR.run(pool).await.map_err(|e| {
            error!(error = %e, "Database migration failed");
            EgressError::from(e)
        })?;

        info!("Database migrations completed");
        Ok::<(), EgressError>(())
    }
    .instrument(span)
    .await
}

/// Highest applied migration version, `None` on a fresh database
pub async fn get_migration_version(pool: &DbPool) -> Result<Option<i64>> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await
            .context("Reading migration version")?;
    Ok(version)
}

/// Every migration recorded in the database
pub async fn list_applied_migrations(pool: &DbPool) -> Result<Vec<MigrationInfo>> {
    sqlx::query_as::<_, MigrationInfo>(
        "SELECT version, description, success FROM _sqlx_migrations ORDER BY version",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| EgressError::database(e, "Failed to list applied migrations"))
}

/// Check that every embedded migration has been applied successfully
pub async fn validate_migrations(pool: &DbPool) -> Result<bool> {
    let applied = list_applied_migrations(pool).await?;
    let expected = MIGRATOR.iter().filter(|m| m.migration_type.is_up_migration()).count();
    let successful = applied.iter().filter(|m| m.success).count();

    if successful != expected {
        warn!(expected, applied = successful, "Database schema is not up to date");
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_helpers::memory_pool;

    #[tokio::test]
    async fn migrations_are_recorded() {
        let pool = memory_pool().await;
        assert!(validate_migrations(&pool).await.unwrap());
        assert_eq!(get_migration_version(&pool).await.unwrap(), Some(20251019000003));
        assert_eq!(list_applied_migrations(&pool).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rerunning_is_a_no_op() {
        let pool = memory_pool().await;
        run_migrations(&pool).await.unwrap();
        assert_eq!(list_applied_migrations(&pool).await.unwrap().len(), 3);
    }
}
