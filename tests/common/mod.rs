//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use egressplane::cluster::{
    AckState, Announcement, BroadcasterSettings, ClusterBroadcaster, LocalWorker, NodeId,
    RetryConfig, SnapshotSource, WorkerNode,
};
use egressplane::config::{AppConfig, DatabaseConfig, NamePolicy};
use egressplane::domain::{ConnectionId, DefinitionSnapshot};
use egressplane::errors::{EgressError, Result};
use egressplane::observability::MetricsRecorder;
use egressplane::secrets::{CredentialVault, SecretEncryption, SqlxCredentialVault};
use egressplane::services::{IdLocks, MutationCoordinator, SnapshotReader};
use egressplane::storage::{create_pool, DbPool, SqlxConnectionRegistry};
use egressplane::ControlPlane;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SETTLE: Duration = Duration::from_secs(5);

/// In-memory configuration with fast retries
pub fn test_config() -> AppConfig {
    let mut config = AppConfig { database: DatabaseConfig::in_memory(), ..Default::default() };
    config.coordinator.lock_timeout_ms = 2000;
    config.broadcast.max_attempts = 2;
    config.broadcast.initial_backoff_ms = 1;
    config.broadcast.max_backoff_ms = 5;
    config.broadcast.delivery_timeout_ms = 200;
    config.broadcast.settle_window_ms = 5000;
    config
}

pub async fn memory_pool() -> DbPool {
    create_pool(&DatabaseConfig::in_memory()).await.expect("in-memory pool should open")
}

/// A wired control plane with `workers` local worker nodes
pub async fn control_plane(workers: usize) -> (ControlPlane, Vec<Arc<LocalWorker>>) {
    let config = test_config();
    let mut plane = ControlPlane::build(&config, memory_pool().await, MetricsRecorder::new())
        .await
        .expect("control plane should build");
    let nodes = plane.spawn_local_workers(workers, &config);
    (plane, nodes)
}

pub fn fast_settings() -> BroadcasterSettings {
    BroadcasterSettings {
        retry: RetryConfig {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        },
        delivery_timeout: Duration::from_millis(200),
        channel_capacity: 64,
        heartbeat_ttl: Duration::from_secs(30),
    }
}

/// A coordinator over the given vault, sharing `pool` with the registry
pub fn coordinator_with_vault(pool: DbPool, vault: Arc<dyn CredentialVault>) -> MutationCoordinator {
    let reader = SnapshotReader::new(
        Arc::new(SqlxConnectionRegistry::new(pool, NamePolicy::UniquePerCluster)),
        vault,
        Arc::new(IdLocks::new(Duration::from_secs(2))),
    );
    let source: Arc<dyn SnapshotSource> = Arc::new(reader.clone());
    let broadcaster = ClusterBroadcaster::new(source, fast_settings(), MetricsRecorder::new());
    MutationCoordinator::new(reader, broadcaster, MetricsRecorder::new())
}

pub fn sqlx_vault(pool: DbPool) -> Arc<dyn CredentialVault> {
    Arc::new(SqlxCredentialVault::new(pool, SecretEncryption::ephemeral().expect("ephemeral key")))
}

/// The FTP definition used throughout the end-to-end scenario
pub fn gnupg_fields() -> Value {
    json!({
        "cluster_id": 1,
        "name": "gnupg",
        "is_active": true,
        "host": "ftp.gnupg.dk",
        "port": 21,
        "dircache": true,
        "user": "anonymous",
        "timeout": 2000
    })
}

pub fn named_fields(name: &str) -> Value {
    let mut fields = gnupg_fields();
    fields["name"] = json!(name);
    fields
}

pub fn rotation_fields(id: ConnectionId, password1: &str, password2: &str) -> Value {
    json!({"id": id.get(), "password1": password1, "password2": password2})
}

pub fn id_of(payload: &Option<Value>) -> ConnectionId {
    let id = payload.as_ref().and_then(|p| p["id"].as_i64()).expect("payload carries an id");
    ConnectionId::new(id)
}

/// A worker node whose deliveries fail while `failing` is set.
pub struct FlakyWorker {
    inner: LocalWorker,
    failing: AtomicBool,
    attempts: AtomicUsize,
}

impl FlakyWorker {
    pub fn new(node_id: &str) -> Self {
        Self {
            inner: LocalWorker::new(node_id),
            failing: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn cache(&self) -> &LocalWorker {
        &self.inner
    }
}

#[async_trait]
impl WorkerNode for FlakyWorker {
    fn node_id(&self) -> &NodeId {
        self.inner.node_id()
    }

    async fn deliver(&self, announcement: &Announcement) -> Result<AckState> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EgressError::propagation_degraded(
                self.inner.node_id().as_str(),
                "connection refused",
            ));
        }
        self.inner.deliver(announcement).await
    }

    async fn resync(
        &self,
        snapshots: &[Arc<DefinitionSnapshot>],
    ) -> Result<Vec<(ConnectionId, AckState)>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EgressError::propagation_degraded(
                self.inner.node_id().as_str(),
                "connection refused",
            ));
        }
        self.inner.resync(snapshots).await
    }
}
