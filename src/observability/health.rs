//! # Health Checking
//!
//! Provides health checking capabilities for the control plane components.

use crate::cluster::Membership;
use crate::errors::Result;
use crate::storage::{check_connection, get_pool_stats, DbPool};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Health status for a component
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HealthStatus {
    /// Component is healthy and operational
    Healthy,
    /// Component is degraded but still functional
    Degraded { message: String },
    /// Component is unhealthy and not functional
    Unhealthy { message: String },
}

impl HealthStatus {
    /// Check if the status is healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Check if the status is operational (healthy or degraded)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded { .. })
    }

    /// Get the status message
    pub fn message(&self) -> Option<&str> {
        match self {
            HealthStatus::Healthy => None,
            HealthStatus::Degraded { message } | HealthStatus::Unhealthy { message } => {
                Some(message)
            }
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Component name
    pub component: String,
    /// Health status
    pub status: HealthStatus,
    /// Last check timestamp
    pub last_check: chrono::DateTime<chrono::Utc>,
    /// Additional metadata
    pub metadata: HashMap<String, String>,
}

impl HealthCheck {
    /// Create a new health check result
    pub fn new(component: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            component: component.into(),
            status,
            last_check: chrono::Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Create a healthy health check
    pub fn healthy(component: impl Into<String>) -> Self {
        Self::new(component, HealthStatus::Healthy)
    }

    /// Create a degraded health check
    pub fn degraded<S: Into<String>>(component: impl Into<String>, message: S) -> Self {
        Self::new(component, HealthStatus::Degraded { message: message.into() })
    }

    /// Create an unhealthy health check
    pub fn unhealthy<S: Into<String>>(component: impl Into<String>, message: S) -> Self {
        Self::new(component, HealthStatus::Unhealthy { message: message.into() })
    }

    /// Add metadata to the health check
    pub fn with_metadata<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Component that provides health checking functionality
#[async_trait]
pub trait HealthProvider: Send + Sync {
    /// Perform a health check for this component
    async fn health_check(&self) -> Result<HealthCheck>;
}

/// Database reachability and pool usage
#[derive(Debug, Clone)]
pub struct DatabaseHealthProvider {
    pool: DbPool,
}

impl DatabaseHealthProvider {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthProvider for DatabaseHealthProvider {
    async fn health_check(&self) -> Result<HealthCheck> {
        let stats = get_pool_stats(&self.pool);
        let check = match check_connection(&self.pool).await {
            Ok(()) => HealthCheck::healthy("database"),
            Err(e) => HealthCheck::unhealthy("database", e.to_string()),
        };
        Ok(check
            .with_metadata("pool_size", stats.size.to_string())
            .with_metadata("pool_idle", stats.idle.to_string()))
    }
}

/// Degraded while any worker node is flagged unreachable
#[derive(Debug, Clone)]
pub struct PropagationHealthProvider {
    membership: Membership,
}

impl PropagationHealthProvider {
    pub fn new(membership: Membership) -> Self {
        Self { membership }
    }
}

#[async_trait]
impl HealthProvider for PropagationHealthProvider {
    async fn health_check(&self) -> Result<HealthCheck> {
        let unreachable = self.membership.unreachable_nodes();
        let check = if unreachable.is_empty() {
            HealthCheck::healthy("propagation")
        } else {
            let names: Vec<&str> = unreachable.iter().map(|n| n.as_str()).collect();
            HealthCheck::degraded(
                "propagation",
                format!("unreachable worker nodes: {}", names.join(", ")),
            )
        };
        Ok(check
            .with_metadata("nodes", self.membership.len().to_string())
            .with_metadata("unreachable", unreachable.len().to_string()))
    }
}

/// Central health checker that manages health checks for all components
#[derive(Clone)]
pub struct HealthChecker {
    /// Registered health providers
    providers: Arc<RwLock<HashMap<String, Arc<dyn HealthProvider>>>>,
    /// Cached health check results
    cache: Arc<RwLock<HashMap<String, HealthCheck>>>,
    /// Unique instance ID
    instance_id: String,
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker").field("instance_id", &self.instance_id).finish()
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    /// Create a new health checker
    pub fn new() -> Self {
        Self {
            providers: Arc::new(RwLock::new(HashMap::new())),
            cache: Arc::new(RwLock::new(HashMap::new())),
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Register a health provider
    pub async fn register_provider<S: Into<String>>(&self, name: S, provider: Arc<dyn HealthProvider>) {
        self.providers.write().await.insert(name.into(), provider);
    }

    /// Perform health checks for all registered providers
    pub async fn check_all(&self) -> HashMap<String, HealthCheck> {
        let providers: Vec<(String, Arc<dyn HealthProvider>)> = self
            .providers
            .read()
            .await
            .iter()
            .map(|(name, provider)| (name.clone(), provider.clone()))
            .collect();

        let checks = providers.into_iter().map(|(name, provider)| async move {
            let check = match provider.health_check().await {
                Ok(check) => check,
                Err(e) => HealthCheck::unhealthy(name.clone(), format!("Health check failed: {}", e)),
            };
            (name, check)
        });
        let results: HashMap<String, HealthCheck> = join_all(checks).await.into_iter().collect();

        self.cache.write().await.extend(results.clone());
        results
    }

    /// Most recent result per component without running new checks
    pub async fn cached(&self) -> HashMap<String, HealthCheck> {
        self.cache.read().await.clone()
    }

    /// Re-run every check on `interval`, logging components that are not healthy.
    pub fn spawn_monitor(&self, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let checker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for (component, check) in checker.check_all().await {
                    if let Some(message) = check.status.message() {
                        tracing::warn!(component = %component, detail = message, "Component is not healthy");
                    }
                }
            }
        })
    }

    /// Get the overall health status
    pub async fn overall_status(&self) -> HealthStatus {
        let checks = self.check_all().await;

        if checks.is_empty() {
            return HealthStatus::Degraded { message: "No health providers registered".to_string() };
        }

        let unhealthy_count =
            checks.values().filter(|c| matches!(c.status, HealthStatus::Unhealthy { .. })).count();
        let degraded_count =
            checks.values().filter(|c| matches!(c.status, HealthStatus::Degraded { .. })).count();

        if unhealthy_count > 0 {
            HealthStatus::Unhealthy {
                message: format!(
                    "{} unhealthy, {} degraded out of {} components",
                    unhealthy_count,
                    degraded_count,
                    checks.len()
                ),
            }
        } else if degraded_count > 0 {
            HealthStatus::Degraded {
                message: format!("{} degraded out of {} components", degraded_count, checks.len()),
            }
        } else {
            HealthStatus::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NodeId;
    use crate::storage::test_helpers::memory_pool;

    #[tokio::test]
    async fn empty_checker_is_degraded() {
        let checker = HealthChecker::new();
        assert!(matches!(checker.overall_status().await, HealthStatus::Degraded { .. }));
    }

    #[tokio::test]
    async fn database_provider_reports_healthy() {
        let checker = HealthChecker::new();
        checker
            .register_provider("database", Arc::new(DatabaseHealthProvider::new(memory_pool().await)))
            .await;
        assert!(checker.overall_status().await.is_healthy());
        assert!(checker.cached().await.contains_key("database"));
    }

    #[tokio::test]
    async fn unreachable_node_degrades_propagation() {
        let membership = Membership::new();
        let node = NodeId::from("node-2");
        membership.register(&node);

        let checker = HealthChecker::new();
        checker
            .register_provider("propagation", Arc::new(PropagationHealthProvider::new(membership.clone())))
            .await;
        assert!(checker.overall_status().await.is_healthy());

        membership.mark_unreachable(&node);
        let status = checker.overall_status().await;
        assert!(status.is_operational());
        assert!(status.message().unwrap_or_default().contains("1 degraded"));

        let checks = checker.check_all().await;
        assert!(checks["propagation"].status.message().unwrap_or_default().contains("node-2"));
    }

    #[tokio::test]
    async fn monitor_refreshes_the_cache() {
        let checker = HealthChecker::new();
        checker
            .register_provider("database", Arc::new(DatabaseHealthProvider::new(memory_pool().await)))
            .await;

        let monitor = checker.spawn_monitor(std::time::Duration::from_millis(10));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        monitor.abort();

        assert!(checker.cached().await["database"].status.is_healthy());
    }
}
