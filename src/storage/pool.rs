//! # Database Connection Pool
//!
//! One SQLite database holds clusters, connection definitions and sealed
//! credentials.

use crate::config::DatabaseConfig;
use crate::errors::{EgressError, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::{str::FromStr, time::Duration};

/// Type alias for the database connection pool
pub type DbPool = Pool<Sqlite>;

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open the registry database and, when enabled, bring its schema up to date.
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    validate_config(config)?;

    let mut options = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout())
        .test_before_acquire(true);
    options = match config.idle_timeout() {
        Some(idle) => options.idle_timeout(idle),
        // An in-memory database disappears with its last connection.
        None => options.idle_timeout(None).max_lifetime(None),
    };

    let pool = options.connect_with(connect_options(config)?).await.map_err(|e| {
        tracing::error!(error = %e, url = %config.url, "Failed to open registry database");
        EgressError::database(e, format!("Failed to open database {}", config.url))
    })?;

    tracing::info!(
        url = %config.url,
        max_connections = config.max_connections,
        in_memory = config.is_in_memory(),
        "Registry database opened"
    );

    if config.auto_migrate {
        crate::storage::migrations::run_migrations(&pool).await?;
    }

    Ok(pool)
}

/// SQLite options: foreign keys on, bounded lock waits, WAL for file databases.
fn connect_options(config: &DatabaseConfig) -> Result<SqliteConnectOptions> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| EgressError::database(e, format!("Invalid SQLite URL {}", config.url)))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(SQLITE_BUSY_TIMEOUT);

    if config.is_in_memory() {
        Ok(options.journal_mode(SqliteJournalMode::Memory))
    } else {
        Ok(options.journal_mode(SqliteJournalMode::Wal))
    }
}

fn validate_config(config: &DatabaseConfig) -> Result<()> {
    let problem = if config.url.is_empty() {
        Some("database URL cannot be empty")
    } else if !config.is_sqlite() {
        Some("database URL must start with 'sqlite:'")
    } else if config.max_connections == 0 {
        Some("max_connections must be greater than 0")
    } else if config.min_connections > config.max_connections {
        Some("min_connections cannot be greater than max_connections")
    } else {
        None
    };

    match problem {
        Some(message) => Err(EgressError::validation(message)),
        None => Ok(()),
    }
}

/// Get pool statistics for monitoring
pub fn get_pool_stats(pool: &DbPool) -> PoolStats {
    PoolStats { size: pool.size(), idle: pool.num_idle() }
}

/// Pool statistics for monitoring
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Total connections in the pool
    pub size: u32,
    /// Number of idle connections
    pub idle: usize,
}

impl PoolStats {
    /// Get the number of active connections
    pub fn active(&self) -> u32 {
        self.size.saturating_sub(self.idle as u32)
    }

    /// Check if the pool is healthy (has available connections)
    pub fn is_healthy(&self) -> bool {
        self.size > 0
    }
}
