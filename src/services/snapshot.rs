//! Consistent reads of definitions and their credentials
//!
//! Registry and vault are separate stores, so a definition and its secret are
//! only read together while the id's mutation lock is held. Any snapshot built
//! here pairs attributes, version and secret from one committed state.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::locks::{IdLockGuard, IdLocks};
use crate::cluster::SnapshotSource;
use crate::domain::{ClusterId, ConnectionDefinition, ConnectionId, DefinitionSnapshot};
use crate::errors::{EgressError, Result};
use crate::secrets::{CredentialVault, SecretString};
use crate::storage::{ConnectionRecord, ConnectionRegistry};

/// Registry and vault reader that honours the per-id lock table.
#[derive(Clone)]
pub struct SnapshotReader {
    registry: Arc<dyn ConnectionRegistry>,
    vault: Arc<dyn CredentialVault>,
    locks: Arc<IdLocks>,
}

impl std::fmt::Debug for SnapshotReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotReader").field("locks", &self.locks.len()).finish()
    }
}

impl SnapshotReader {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        vault: Arc<dyn CredentialVault>,
        locks: Arc<IdLocks>,
    ) -> Self {
        Self { registry, vault, locks }
    }

    pub fn registry(&self) -> &Arc<dyn ConnectionRegistry> {
        &self.registry
    }

    pub fn vault(&self) -> &Arc<dyn CredentialVault> {
        &self.vault
    }

    pub fn locks(&self) -> &Arc<IdLocks> {
        &self.locks
    }

    /// Current credential version and live secret of `id`. The caller holds
    /// the lock of the id.
    pub async fn credential(
        &self,
        _guard: &IdLockGuard,
        id: ConnectionId,
    ) -> Result<(u64, Option<SecretString>)> {
        match self.vault.reveal(id).await? {
            Some(live) => Ok((live.version, Some(live.secret))),
            None => Ok((self.vault.current_version(id).await?, None)),
        }
    }

    /// Attach the vault state to a record. The caller holds the lock of the id.
    pub async fn build(
        &self,
        guard: &IdLockGuard,
        record: ConnectionRecord,
    ) -> Result<Arc<DefinitionSnapshot>> {
        let (version, secret) = self.credential(guard, record.id).await?;
        Ok(DefinitionSnapshot::new(record.into_definition(version), secret))
    }

    /// Read one definition together with its credential version. The caller
    /// holds the lock of the id.
    pub async fn definition(
        &self,
        _guard: &IdLockGuard,
        id: ConnectionId,
    ) -> Result<ConnectionDefinition> {
        let record = self.registry.read(id).await?;
        let version = self.vault.current_version(id).await?;
        Ok(record.into_definition(version))
    }

    /// Lock `id` and read its definition
    #[instrument(skip(self), fields(connection_id = %id), name = "snapshot_read")]
    pub async fn read(&self, id: ConnectionId) -> Result<ConnectionDefinition> {
        let result = {
            let guard = self.locks.acquire(id).await?;
            self.definition(&guard, id).await
        };
        self.locks.forget_if_missing(id, &result);
        result
    }

    /// Every definition of one cluster, each read under its own lock.
    /// Ids deleted while the listing is assembled are left out.
    #[instrument(skip(self), fields(cluster_id = %cluster_id), name = "snapshot_list")]
    pub async fn list(&self, cluster_id: ClusterId) -> Result<Vec<ConnectionDefinition>> {
        if !self.registry.cluster_exists(cluster_id).await? {
            return Err(EgressError::not_found("cluster", cluster_id));
        }

        let records = self.registry.list(cluster_id).await?;
        let mut definitions = Vec::with_capacity(records.len());
        for record in records {
            match self.read(record.id).await {
                Ok(definition) => definitions.push(definition),
                Err(EgressError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(definitions)
    }
}

#[async_trait]
impl SnapshotSource for SnapshotReader {
    #[instrument(skip(self), name = "snapshot_all")]
    async fn snapshot_all(&self) -> Result<Vec<Arc<DefinitionSnapshot>>> {
        let ids = self.registry.list_ids().await?;
        let mut snapshots = Vec::with_capacity(ids.len());

        for id in ids {
            let guard = self.locks.acquire(id).await?;
            let record = match self.registry.read(id).await {
                Ok(record) => record,
                Err(EgressError::NotFound { .. }) => {
                    drop(guard);
                    self.locks.forget(id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            snapshots.push(self.build(&guard, record).await?);
        }

        debug!(definitions = snapshots.len(), "Built snapshot listing");
        Ok(snapshots)
    }
}
