//! Test database utilities for in-library tests.
//!
//! Each call returns a fresh in-memory SQLite database with all migrations
//! applied, so tests are isolated without any external service.

use crate::config::DatabaseConfig;
use crate::storage::{create_pool, DbPool};

/// Fresh, migrated in-memory database.
pub async fn memory_pool() -> DbPool {
    create_pool(&DatabaseConfig::in_memory()).await.expect("in-memory pool should open")
}
