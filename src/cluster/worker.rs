//! Worker nodes: the consumers of definition snapshots.
//!
//! A worker applies announcements atomically and idempotently. It replaces its
//! cached snapshot only with a strictly newer one and treats deletion as
//! final, so duplicate, reordered or replayed deliveries never move it back.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::types::{AckState, Announcement, AnnouncementKind, NodeId};
use crate::domain::{ConnectionId, DefinitionSnapshot};
use crate::errors::{EgressError, Result};

/// A node that caches definitions and opens outbound connections with them.
#[async_trait]
pub trait WorkerNode: Send + Sync {
    fn node_id(&self) -> &NodeId;

    /// Apply one announcement; returns what the node now holds for that id.
    async fn deliver(&self, announcement: &Announcement) -> Result<AckState>;

    /// Replace the cache with a full listing. Ids the node holds that are
    /// missing from the listing have been deleted and are dropped, together
    /// with earlier tombstones. Returns the state of every id still held.
    async fn resync(
        &self,
        snapshots: &[Arc<DefinitionSnapshot>],
    ) -> Result<Vec<(ConnectionId, AckState)>>;
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Live(Arc<DefinitionSnapshot>),
    Deleted,
}

impl CacheEntry {
    fn ack(&self) -> AckState {
        match self {
            CacheEntry::Live(snapshot) => AckState::Holding(snapshot.version()),
            CacheEntry::Deleted => AckState::Deleted,
        }
    }
}

/// In-process worker cache.
#[derive(Debug)]
pub struct LocalWorker {
    node_id: NodeId,
    cache: RwLock<HashMap<ConnectionId, CacheEntry>>,
}

impl LocalWorker {
    pub fn new(node_id: impl Into<NodeId>) -> Self {
        Self { node_id: node_id.into(), cache: RwLock::new(HashMap::new()) }
    }

    /// The snapshot this node would use for an outbound connection right now
    pub async fn snapshot(&self, id: ConnectionId) -> Option<Arc<DefinitionSnapshot>> {
        match self.cache.read().await.get(&id) {
            Some(CacheEntry::Live(snapshot)) => Some(snapshot.clone()),
            _ => None,
        }
    }

    pub async fn state(&self, id: ConnectionId) -> Option<AckState> {
        self.cache.read().await.get(&id).map(CacheEntry::ack)
    }

    pub async fn live_count(&self) -> usize {
        self.cache.read().await.values().filter(|e| matches!(e, CacheEntry::Live(_))).count()
    }

    fn apply(cache: &mut HashMap<ConnectionId, CacheEntry>, snapshot: &Arc<DefinitionSnapshot>) {
        let id = snapshot.id();
        let newer = match cache.get(&id) {
            None => true,
            Some(CacheEntry::Deleted) => false,
            Some(CacheEntry::Live(current)) => snapshot.version() > current.version(),
        };
        if newer {
            cache.insert(id, CacheEntry::Live(snapshot.clone()));
        }
    }
}

#[async_trait]
impl WorkerNode for LocalWorker {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    async fn deliver(&self, announcement: &Announcement) -> Result<AckState> {
        let mut cache = self.cache.write().await;
        let id = announcement.connection_id;

        match (announcement.kind, &announcement.snapshot) {
            (AnnouncementKind::Deleted, _) => {
                cache.insert(id, CacheEntry::Deleted);
            }
            (_, Some(snapshot)) => Self::apply(&mut cache, snapshot),
            (kind, None) => {
                return Err(EgressError::internal(format!(
                    "{} announcement for connection {} carries no snapshot",
                    kind, id
                )));
            }
        }

        let ack = cache.get(&id).map(CacheEntry::ack).unwrap_or(AckState::Deleted);
        tracing::debug!(node_id = %self.node_id, connection_id = %id, ack = ?ack, "Applied announcement");
        Ok(ack)
    }

    async fn resync(
        &self,
        snapshots: &[Arc<DefinitionSnapshot>],
    ) -> Result<Vec<(ConnectionId, AckState)>> {
        let mut cache = self.cache.write().await;
        let listed: HashSet<ConnectionId> = snapshots.iter().map(|s| s.id()).collect();

        for snapshot in snapshots {
            Self::apply(&mut cache, snapshot);
        }
        // Ids are never reused, so tombstones are not needed past a full listing.
        cache.retain(|id, entry| listed.contains(id) && matches!(entry, CacheEntry::Live(_)));

        tracing::debug!(node_id = %self.node_id, listed = listed.len(), "Resynchronised worker cache");
        Ok(cache.iter().map(|(id, entry)| (*id, entry.ack())).collect())
    }
}
