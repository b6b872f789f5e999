//! Cluster repository
//!
//! Clusters scope connection ids and names. A default cluster with id 1 is
//! seeded by the initial migration.

use crate::domain::ClusterId;
use crate::errors::{EgressError, Result};
use crate::storage::DbPool;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::instrument;

/// Database row structure for clusters
#[derive(Debug, Clone, FromRow)]
struct ClusterRow {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Cluster data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterData {
    pub id: ClusterId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl From<ClusterRow> for ClusterData {
    fn from(row: ClusterRow) -> Self {
        Self { id: ClusterId::new(row.id), name: row.name, created_at: row.created_at }
    }
}

/// Repository for cluster data access
#[derive(Debug, Clone)]
pub struct ClusterRepository {
    pool: DbPool,
}

impl ClusterRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Register a new cluster; names are unique
    #[instrument(skip(self), name = "db_create_cluster")]
    pub async fn create_cluster(&self, name: &str) -> Result<ClusterData> {
        if name.trim().is_empty() {
            return Err(EgressError::validation("Cluster name cannot be empty"));
        }

        let now = Utc::now();
        let row = sqlx::query_as::<_, ClusterRow>(
            "INSERT INTO clusters (name, created_at) VALUES (?1, ?2) \
             ON CONFLICT(name) DO NOTHING \
             RETURNING id, name, created_at",
        )
        .bind(name)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, cluster_name = %name, "Failed to create cluster");
            EgressError::Database {
                source: e,
                context: format!("Failed to create cluster '{}'", name),
            }
        })?;

        match row {
            Some(row) => {
                tracing::info!(cluster_id = row.id, cluster_name = %name, "Created new cluster");
                Ok(row.into())
            }
            None => Err(EgressError::duplicate_or_invalid(
                format!("cluster '{}' already exists", name),
                "cluster",
            )),
        }
    }

    /// Get cluster by ID
    #[instrument(skip(self), fields(cluster_id = %id), name = "db_get_cluster_by_id")]
    pub async fn get_by_id(&self, id: ClusterId) -> Result<ClusterData> {
        let row = sqlx::query_as::<_, ClusterRow>(
            "SELECT id, name, created_at FROM clusters WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EgressError::database(e, format!("Failed to get cluster with ID '{}'", id)))?;

        row.map(ClusterData::from).ok_or_else(|| EgressError::not_found("cluster", id))
    }

    /// List all clusters ordered by id
    #[instrument(skip(self), name = "db_list_clusters")]
    pub async fn list(&self) -> Result<Vec<ClusterData>> {
        let rows = sqlx::query_as::<_, ClusterRow>(
            "SELECT id, name, created_at FROM clusters ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EgressError::database(e, "Failed to list clusters"))?;

        Ok(rows.into_iter().map(ClusterData::from).collect())
    }
}
