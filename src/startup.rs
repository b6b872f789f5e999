//! Startup sequence for the egressplane control plane
//!
//! Wires the registry, the vault, the lock table, the broadcaster and the
//! coordinator together from an [`AppConfig`] and an open pool, and starts
//! the background membership tasks.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::ConnectionApi;
use crate::cluster::{BroadcasterSettings, ClusterBroadcaster, LocalWorker, SnapshotSource};
use crate::config::AppConfig;
use crate::errors::{EgressError, Result};
use crate::observability::{
    DatabaseHealthProvider, HealthChecker, MetricsRecorder, PropagationHealthProvider,
};
use crate::secrets::{SecretEncryption, SqlxCredentialVault};
use crate::services::{IdLocks, MutationCoordinator, SnapshotReader};
use crate::storage::{ClusterRepository, DbPool, SqlxConnectionRegistry};

/// A fully wired control plane.
pub struct ControlPlane {
    pub pool: DbPool,
    pub api: ConnectionApi,
    pub coordinator: MutationCoordinator,
    pub broadcaster: ClusterBroadcaster,
    pub clusters: ClusterRepository,
    pub health: HealthChecker,
    background: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("coordinator", &self.coordinator)
            .field("background_tasks", &self.background.len())
            .finish()
    }
}

impl ControlPlane {
    /// Assemble every component on top of `pool`.
    pub async fn build(config: &AppConfig, pool: DbPool, metrics: MetricsRecorder) -> Result<Self> {
        if config.encryption.master_key_base64.is_none() && !config.database.is_in_memory() {
            return Err(EgressError::config(
                "encryption.master_key_base64 is required for a persistent database",
            ));
        }
        let encryption = SecretEncryption::from_config(&config.encryption)?;

        let reader = SnapshotReader::new(
            Arc::new(SqlxConnectionRegistry::new(pool.clone(), config.registry.name_policy)),
            Arc::new(SqlxCredentialVault::new(pool.clone(), encryption)),
            Arc::new(IdLocks::new(config.coordinator.lock_timeout())),
        );

        let source: Arc<dyn SnapshotSource> = Arc::new(reader.clone());
        let broadcaster = ClusterBroadcaster::new(
            source,
            BroadcasterSettings::from_config(&config.broadcast, &config.membership),
            metrics.clone(),
        );
        let coordinator = MutationCoordinator::new(reader, broadcaster.clone(), metrics);

        let health = HealthChecker::new();
        health
            .register_provider("database", Arc::new(DatabaseHealthProvider::new(pool.clone())))
            .await;
        health
            .register_provider(
                "propagation",
                Arc::new(PropagationHealthProvider::new(broadcaster.membership().clone())),
            )
            .await;

        let background = vec![
            broadcaster.spawn_expiry_sweeper(config.membership.sweep_interval()),
            health.spawn_monitor(config.observability.health_check_interval()),
        ];

        info!(
            name_policy = ?config.registry.name_policy,
            lock_timeout_ms = config.coordinator.lock_timeout_ms,
            "Control plane ready"
        );

        Ok(Self {
            pool: pool.clone(),
            api: ConnectionApi::new(coordinator.clone()),
            coordinator,
            broadcaster,
            clusters: ClusterRepository::new(pool),
            health,
            background,
        })
    }

    /// Register `count` in-process worker nodes that heartbeat on their own.
    pub fn spawn_local_workers(&mut self, count: usize, config: &AppConfig) -> Vec<Arc<LocalWorker>> {
        let interval = (config.membership.heartbeat_ttl() / 3).max(std::time::Duration::from_millis(10));
        (1..=count)
            .map(|n| {
                let worker = Arc::new(LocalWorker::new(format!("local-{}", n)));
                let node_id = self.broadcaster.register_node(worker.clone());
                self.background.push(self.broadcaster.spawn_heartbeats(node_id, interval));
                worker
            })
            .collect()
    }

    /// Stop delivery and background tasks
    pub fn shutdown(&mut self) {
        for task in self.background.drain(..) {
            task.abort();
        }
        self.broadcaster.shutdown();
        info!("Control plane stopped");
    }
}

impl Drop for ControlPlane {
    fn drop(&mut self) {
        for task in &self.background {
            task.abort();
        }
    }
}
