//! Connection registry: durable store of outgoing connection definitions
//!
//! Each operation is a single statement, so it either fully applies or not at
//! all. The registry does not serialize multi-step mutations; that is the
//! coordinator's job.

use crate::config::NamePolicy;
use crate::domain::{
    ClusterId, ConnectionAttributes, ConnectionDefinition, ConnectionId, ConnectionKind,
    ConnectionPatch, NewConnection,
};
use crate::errors::{EgressError, Result};
use crate::storage::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use tracing::instrument;

const SELECT_COLUMNS: &str = "SELECT id, cluster_id, name, kind, host, port, is_active, dircache, \
     username, timeout, revision, created_at, updated_at FROM connections";

// Database row structure

#[derive(Debug, Clone, FromRow)]
struct ConnectionRow {
    pub id: i64,
    pub cluster_id: i64,
    pub name: String,
    pub kind: String,
    pub host: String,
    pub port: i64,
    pub is_active: bool,
    pub dircache: bool,
    pub username: String,
    pub timeout: i64,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A definition as the registry stores it. The credential version lives in
/// the vault and is attached with [`ConnectionRecord::into_definition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub cluster_id: ClusterId,
    pub attributes: ConnectionAttributes,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionRecord {
    pub fn into_definition(self, credential_version: u64) -> ConnectionDefinition {
        ConnectionDefinition {
            id: self.id,
            cluster_id: self.cluster_id,
            attributes: self.attributes,
            revision: self.revision,
            credential_version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl TryFrom<ConnectionRow> for ConnectionRecord {
    type Error = EgressError;

    fn try_from(row: ConnectionRow) -> Result<Self> {
        let kind = ConnectionKind::from_str(&row.kind).map_err(|e| {
            EgressError::internal(format!("Connection {} has invalid kind: {}", row.id, e))
        })?;
        let port = u16::try_from(row.port).map_err(|_| {
            EgressError::internal(format!("Connection {} has invalid port {}", row.id, row.port))
        })?;
        let timeout = u32::try_from(row.timeout).map_err(|_| {
            EgressError::internal(format!(
                "Connection {} has invalid timeout {}",
                row.id, row.timeout
            ))
        })?;

        Ok(ConnectionRecord {
            id: ConnectionId::new(row.id),
            cluster_id: ClusterId::new(row.cluster_id),
            attributes: ConnectionAttributes {
                name: row.name,
                kind,
                host: row.host,
                port,
                is_active: row.is_active,
                dircache: row.dircache,
                user: row.username,
                timeout,
            },
            revision: u64::try_from(row.revision).unwrap_or(0),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// Repository trait

#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Persist a new definition and return its freshly assigned id
    async fn create(&self, definition: NewConnection) -> Result<ConnectionId>;

    /// Read a definition, `NotFound` if absent
    async fn read(&self, id: ConnectionId) -> Result<ConnectionRecord>;

    /// Apply a patch and bump the revision
    async fn update(&self, id: ConnectionId, patch: &ConnectionPatch) -> Result<ConnectionRecord>;

    /// Hard-remove a definition, `NotFound` if absent
    async fn delete(&self, id: ConnectionId) -> Result<()>;

    /// All definitions of a cluster ordered by id
    async fn list(&self, cluster_id: ClusterId) -> Result<Vec<ConnectionRecord>>;

    /// Every stored id across all clusters
    async fn list_ids(&self) -> Result<Vec<ConnectionId>>;

    /// Whether a cluster with this id exists
    async fn cluster_exists(&self, cluster_id: ClusterId) -> Result<bool>;
}

/// SQLite implementation of [`ConnectionRegistry`]
#[derive(Debug, Clone)]
pub struct SqlxConnectionRegistry {
    pool: DbPool,
    name_policy: NamePolicy,
}

impl SqlxConnectionRegistry {
    pub fn new(pool: DbPool, name_policy: NamePolicy) -> Self {
        Self { pool, name_policy }
    }

    fn enforce_unique_names(&self) -> bool {
        self.name_policy == NamePolicy::UniquePerCluster
    }

    async fn exists(&self, id: ConnectionId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM connections WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EgressError::database(e, format!("Failed to look up connection {}", id)))?;
        Ok(found.is_some())
    }
}

#[async_trait]
impl ConnectionRegistry for SqlxConnectionRegistry {
    #[instrument(skip(self, definition), fields(cluster_id = %definition.cluster_id, name = %definition.attributes.name), name = "db_create_connection")]
    async fn create(&self, definition: NewConnection) -> Result<ConnectionId> {
        let now = Utc::now();
        let attrs = &definition.attributes;

        // Cluster existence and the name rule are checked in the same statement
        // as the insert so that two concurrent creates cannot both pass.
        let id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO connections \
                 (cluster_id, name, kind, host, port, is_active, dircache, username, timeout, revision, created_at, updated_at) \
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10, ?10 \
             WHERE EXISTS (SELECT 1 FROM clusters WHERE id = ?1) \
               AND (?11 = 0 OR NOT EXISTS (SELECT 1 FROM connections WHERE cluster_id = ?1 AND name = ?2)) \
             RETURNING id",
        )
        .bind(definition.cluster_id)
        .bind(&attrs.name)
        .bind(attrs.kind.as_str())
        .bind(&attrs.host)
        .bind(i64::from(attrs.port))
        .bind(attrs.is_active)
        .bind(attrs.dircache)
        .bind(&attrs.user)
        .bind(i64::from(attrs.timeout))
        .bind(now)
        .bind(self.enforce_unique_names())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, connection_name = %attrs.name, "Failed to create connection");
            EgressError::Database {
                source: e,
                context: format!("Failed to create connection '{}'", attrs.name),
            }
        })?;

        let Some(id) = id else {
            if !self.cluster_exists(definition.cluster_id).await? {
                return Err(EgressError::duplicate_or_invalid(
                    format!("cluster {} does not exist", definition.cluster_id),
                    "connection",
                ));
            }
            return Err(EgressError::duplicate_or_invalid(
                format!(
                    "name '{}' is already used in cluster {}",
                    attrs.name, definition.cluster_id
                ),
                "connection",
            ));
        };

        let id = ConnectionId::new(id);
        tracing::info!(
            connection_id = %id,
            cluster_id = %definition.cluster_id,
            connection_name = %attrs.name,
            kind = %attrs.kind,
            "Created new connection"
        );
        Ok(id)
    }

    #[instrument(skip(self), fields(connection_id = %id), name = "db_read_connection")]
    async fn read(&self, id: ConnectionId) -> Result<ConnectionRecord> {
        let row = sqlx::query_as::<_, ConnectionRow>(&format!("{} WHERE id = ?1", SELECT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, connection_id = %id, "Failed to read connection");
                EgressError::Database {
                    source: e,
                    context: format!("Failed to read connection {}", id),
                }
            })?;

        match row {
            Some(row) => ConnectionRecord::try_from(row),
            None => Err(EgressError::not_found("connection", id)),
        }
    }

    #[instrument(skip(self, patch), fields(connection_id = %id), name = "db_update_connection")]
    async fn update(&self, id: ConnectionId, patch: &ConnectionPatch) -> Result<ConnectionRecord> {
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE connections SET \
                 name = COALESCE(?2, name), \
                 host = COALESCE(?3, host), \
                 port = COALESCE(?4, port), \
                 is_active = COALESCE(?5, is_active), \
                 dircache = COALESCE(?6, dircache), \
                 username = COALESCE(?7, username), \
                 timeout = COALESCE(?8, timeout), \
                 revision = revision + 1, \
                 updated_at = ?9 \
             WHERE id = ?1 \
               AND (?10 = 0 OR ?2 IS NULL OR NOT EXISTS ( \
                   SELECT 1 FROM connections other \
                   WHERE other.cluster_id = connections.cluster_id \
                     AND other.name = ?2 AND other.id != connections.id))",
        )
        .bind(id)
        .bind(patch.name.as_deref())
        .bind(patch.host.as_deref())
        .bind(patch.port.map(i64::from))
        .bind(patch.is_active)
        .bind(patch.dircache)
        .bind(patch.user.as_deref())
        .bind(patch.timeout.map(i64::from))
        .bind(now)
        .bind(self.enforce_unique_names())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, connection_id = %id, "Failed to update connection");
            EgressError::Database {
                source: e,
                context: format!("Failed to update connection {}", id),
            }
        })?;

        if result.rows_affected() == 0 {
            if !self.exists(id).await? {
                return Err(EgressError::not_found("connection", id));
            }
            return Err(EgressError::duplicate_or_invalid(
                format!("name '{}' is already used in this cluster", patch.name.as_deref().unwrap_or("")),
                "connection",
            ));
        }

        tracing::info!(connection_id = %id, "Updated connection");
        self.read(id).await
    }

    #[instrument(skip(self), fields(connection_id = %id), name = "db_delete_connection")]
    async fn delete(&self, id: ConnectionId) -> Result<()> {
        let result = sqlx::query("DELETE FROM connections WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, connection_id = %id, "Failed to delete connection");
                EgressError::Database {
                    source: e,
                    context: format!("Failed to delete connection {}", id),
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(EgressError::not_found("connection", id));
        }

        tracing::info!(connection_id = %id, "Deleted connection");
        Ok(())
    }

    #[instrument(skip(self), fields(cluster_id = %cluster_id), name = "db_list_connections")]
    async fn list(&self, cluster_id: ClusterId) -> Result<Vec<ConnectionRecord>> {
        let rows = sqlx::query_as::<_, ConnectionRow>(&format!(
            "{} WHERE cluster_id = ?1 ORDER BY id",
            SELECT_COLUMNS
        ))
        .bind(cluster_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, cluster_id = %cluster_id, "Failed to list connections");
            EgressError::Database {
                source: e,
                context: format!("Failed to list connections of cluster {}", cluster_id),
            }
        })?;

        rows.into_iter().map(ConnectionRecord::try_from).collect()
    }

    #[instrument(skip(self), name = "db_list_connection_ids")]
    async fn list_ids(&self) -> Result<Vec<ConnectionId>> {
        sqlx::query_scalar::<_, ConnectionId>("SELECT id FROM connections ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| EgressError::database(e, "Failed to list connection ids"))
    }

    #[instrument(skip(self), fields(cluster_id = %cluster_id), name = "db_cluster_exists")]
    async fn cluster_exists(&self, cluster_id: ClusterId) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM clusters WHERE id = ?1")
            .bind(cluster_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                EgressError::database(e, format!("Failed to look up cluster {}", cluster_id))
            })?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_helpers::memory_pool;

    fn ftp(name: &str) -> NewConnection {
        NewConnection {
            cluster_id: ClusterId::DEFAULT,
            attributes: ConnectionAttributes {
                name: name.to_string(),
                kind: ConnectionKind::Ftp,
                host: "ftp.gnupg.dk".to_string(),
                port: 21,
                is_active: true,
                dircache: true,
                user: "anonymous".to_string(),
                timeout: 2000,
            },
        }
    }

    async fn registry(policy: NamePolicy) -> SqlxConnectionRegistry {
        SqlxConnectionRegistry::new(memory_pool().await, policy)
    }

    #[tokio::test]
    async fn create_then_read_returns_submitted_attributes() {
        let registry = registry(NamePolicy::UniquePerCluster).await;
        let submitted = ftp("gnupg");

        let id = registry.create(submitted.clone()).await.unwrap();
        let record = registry.read(id).await.unwrap();

        assert_eq!(record.attributes, submitted.attributes);
        assert_eq!(record.cluster_id, ClusterId::DEFAULT);
        assert_eq!(record.revision, 1);
    }

    #[tokio::test]
    async fn ids_are_unique_and_not_reused() {
        let registry = registry(NamePolicy::Unrestricted).await;
        let first = registry.create(ftp("a")).await.unwrap();
        registry.delete(first).await.unwrap();
        let second = registry.create(ftp("a")).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn unknown_cluster_is_rejected() {
        let registry = registry(NamePolicy::UniquePerCluster).await;
        let mut definition = ftp("orphan");
        definition.cluster_id = ClusterId::new(99);

        let err = registry.create(definition).await.unwrap_err();
        assert!(matches!(err, EgressError::DuplicateOrInvalid { .. }));
        assert!(err.to_string().contains("cluster 99"));
    }

    #[tokio::test]
    async fn name_policy_controls_duplicates() {
        let strict = registry(NamePolicy::UniquePerCluster).await;
        strict.create(ftp("same")).await.unwrap();
        let err = strict.create(ftp("same")).await.unwrap_err();
        assert!(matches!(err, EgressError::DuplicateOrInvalid { .. }));

        let relaxed = registry(NamePolicy::Unrestricted).await;
        relaxed.create(ftp("same")).await.unwrap();
        relaxed.create(ftp("same")).await.unwrap();
        assert_eq!(relaxed.list(ClusterId::DEFAULT).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn deleted_name_can_be_reused() {
        let registry = registry(NamePolicy::UniquePerCluster).await;
        let id = registry.create(ftp("recycled")).await.unwrap();
        registry.delete(id).await.unwrap();
        assert!(registry.create(ftp("recycled")).await.is_ok());
    }

    #[tokio::test]
    async fn update_bumps_revision_and_keeps_other_fields() {
        let registry = registry(NamePolicy::UniquePerCluster).await;
        let id = registry.create(ftp("edit-me")).await.unwrap();

        let patch = ConnectionPatch { port: Some(2121), ..Default::default() };
        let record = registry.update(id, &patch).await.unwrap();

        assert_eq!(record.revision, 2);
        assert_eq!(record.attributes.port, 2121);
        assert_eq!(record.attributes.host, "ftp.gnupg.dk");
    }

    #[tokio::test]
    async fn update_rename_clash_is_rejected() {
        let registry = registry(NamePolicy::UniquePerCluster).await;
        registry.create(ftp("taken")).await.unwrap();
        let id = registry.create(ftp("mine")).await.unwrap();

        let patch = ConnectionPatch { name: Some("taken".to_string()), ..Default::default() };
        let err = registry.update(id, &patch).await.unwrap_err();
        assert!(matches!(err, EgressError::DuplicateOrInvalid { .. }));
        assert_eq!(registry.read(id).await.unwrap().revision, 1);
    }

    #[tokio::test]
    async fn missing_ids_are_not_found() {
        let registry = registry(NamePolicy::UniquePerCluster).await;
        let id = ConnectionId::new(404);

        assert!(matches!(registry.read(id).await, Err(EgressError::NotFound { .. })));
        assert!(matches!(registry.delete(id).await, Err(EgressError::NotFound { .. })));
        let patch = ConnectionPatch { timeout: Some(5), ..Default::default() };
        assert!(matches!(registry.update(id, &patch).await, Err(EgressError::NotFound { .. })));
    }

    #[tokio::test]
    async fn second_delete_is_not_found() {
        let registry = registry(NamePolicy::UniquePerCluster).await;
        let id = registry.create(ftp("once")).await.unwrap();
        registry.delete(id).await.unwrap();
        assert!(matches!(registry.delete(id).await, Err(EgressError::NotFound { .. })));
        assert!(registry.list_ids().await.unwrap().is_empty());
    }
}
