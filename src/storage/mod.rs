//! # Storage and Persistence
//!
//! SQLite connectivity, embedded migrations and the repositories backing the
//! connection registry. The credential vault shares the pool but lives in
//! [`crate::secrets`].

pub mod migrations;
pub mod pool;
pub mod repositories;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use crate::config::DatabaseConfig;

pub use migrations::{
    get_migration_version, list_applied_migrations, run_migrations, validate_migrations,
    MigrationInfo,
};
pub use pool::{create_pool, get_pool_stats, DbPool, PoolStats};
pub use repositories::{
    ClusterData, ClusterRepository, ConnectionRecord, ConnectionRegistry, SqlxConnectionRegistry,
};

use crate::errors::{EgressError, Result};

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| EgressError::Database {
        source: e,
        context: "Database connectivity check failed".to_string(),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_connection() {
        let pool = test_helpers::memory_pool().await;
        assert!(check_connection(&pool).await.is_ok());
    }
}
