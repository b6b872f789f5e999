//! # Configuration Settings
//!
//! Defines the configuration structure for the egressplane control plane.

use crate::errors::{EgressError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

/// Prefix for environment overrides, e.g. `EGRESSPLANE__DATABASE__URL`
pub const ENV_PREFIX: &str = "EGRESSPLANE";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// Database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,

    /// Mutation coordinator configuration
    #[validate(nested)]
    pub coordinator: CoordinatorConfig,

    /// Cluster broadcast configuration
    #[validate(nested)]
    pub broadcast: BroadcastConfig,

    /// Worker node membership configuration
    #[validate(nested)]
    pub membership: MembershipConfig,

    /// Registry policies
    pub registry: RegistryConfig,

    /// Encryption at rest for credential material
    #[validate(nested)]
    pub encryption: EncryptionConfig,
}

impl AppConfig {
    /// Load defaults, then an optional config file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&AppConfig::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.exists() {
                return Err(EgressError::config(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(|e| {
            EgressError::validation(format!("Configuration validation failed: {}", e))
        })?;
        self.validate_custom()?;
        Ok(())
    }

    /// Cross-field rules the validator derive cannot express
    fn validate_custom(&self) -> Result<()> {
        if self.database.min_connections > self.database.max_connections {
            return Err(EgressError::validation(
                "min_connections cannot be greater than max_connections",
            ));
        }

        if !self.database.is_sqlite() {
            return Err(EgressError::validation("Database URL must start with 'sqlite:'"));
        }

        if self.broadcast.initial_backoff_ms > self.broadcast.max_backoff_ms {
            return Err(EgressError::validation(
                "broadcast.initial_backoff_ms cannot exceed broadcast.max_backoff_ms",
            ));
        }

        Ok(())
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(max = 50, message = "Min connections must be between 0 and 50"))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    /// Run embedded migrations when the pool is created
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/egressplane.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// In-memory database, used by tests and dry runs
    pub fn in_memory() -> Self {
        // A single connection keeps every query on the same in-memory database.
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            idle_timeout_seconds: 0,
            ..Default::default()
        }
    }

    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    /// Check if this is a SQLite configuration
    pub fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite:")
    }

    /// Whether the database disappears with the process
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Observability configuration for logging, metrics and health checks
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Prometheus exporter port (0 = no exporter)
    pub metrics_port: u16,

    /// Service name attached to startup logs
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level or full `EnvFilter` directive
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Health check interval in seconds
    #[validate(range(
        min = 1,
        max = 300,
        message = "Health check interval must be between 1 and 300 seconds"
    ))]
    pub health_check_interval_seconds: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            metrics_port: 9090,
            service_name: "egressplane".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
            health_check_interval_seconds: 30,
        }
    }
}

impl ObservabilityConfig {
    /// Get health check interval as Duration
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}

/// Mutation coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CoordinatorConfig {
    /// How long a mutation waits for the per-id lock before failing with `Busy`
    #[validate(range(
        min = 1,
        max = 60000,
        message = "Lock timeout must be between 1 and 60000 milliseconds"
    ))]
    pub lock_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { lock_timeout_ms: 5000 }
    }
}

impl CoordinatorConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Cluster broadcast configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BroadcastConfig {
    /// Fan-out buffer; a node that falls further behind is resynchronized
    #[validate(range(min = 1, max = 65536, message = "Channel capacity must be between 1 and 65536"))]
    pub channel_capacity: usize,

    /// Delivery attempts per notification and node before the node is marked unreachable
    #[validate(range(min = 1, max = 20, message = "Max attempts must be between 1 and 20"))]
    pub max_attempts: u32,

    /// Backoff before the first retry, in milliseconds
    pub initial_backoff_ms: u64,

    /// Cap for exponential backoff, in milliseconds
    pub max_backoff_ms: u64,

    /// Multiplier for exponential backoff
    #[validate(range(min = 1.0, max = 10.0, message = "Backoff multiplier must be between 1 and 10"))]
    pub backoff_multiplier: f64,

    /// Upper bound for a single delivery attempt, in milliseconds
    #[validate(range(min = 1, message = "Delivery timeout must be positive"))]
    pub delivery_timeout_ms: u64,

    /// Default settling window used by callers waiting for propagation
    #[validate(range(min = 1, message = "Settle window must be positive"))]
    pub settle_window_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            backoff_multiplier: 2.0,
            delivery_timeout_ms: 2000,
            settle_window_ms: 10000,
        }
    }
}

impl BroadcastConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn settle_window(&self) -> Duration {
        Duration::from_millis(self.settle_window_ms)
    }
}

/// Worker node membership configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MembershipConfig {
    /// A node that sends no heartbeat for this long is expired
    #[validate(range(min = 1, max = 3600, message = "Heartbeat TTL must be between 1 and 3600 seconds"))]
    pub heartbeat_ttl_seconds: u64,

    /// How often expired nodes are swept
    #[validate(range(min = 1, max = 3600, message = "Sweep interval must be between 1 and 3600 seconds"))]
    pub sweep_interval_seconds: u64,

    /// In-process worker caches started by the command line
    #[validate(range(max = 64, message = "At most 64 local workers"))]
    pub local_workers: usize,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self { heartbeat_ttl_seconds: 30, sweep_interval_seconds: 5, local_workers: 1 }
    }
}

impl MembershipConfig {
    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Name uniqueness policy inside a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NamePolicy {
    /// Names are unique per cluster; a deleted definition's name may be reused
    #[default]
    UniquePerCluster,
    /// Any number of definitions may share a name
    Unrestricted,
}

/// Registry policies
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryConfig {
    pub name_policy: NamePolicy,
}

/// Encryption at rest for credential material
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EncryptionConfig {
    /// Base64-encoded 32-byte key; an ephemeral key is generated when unset
    pub master_key_base64: Option<String>,

    /// Identifier stored with every sealed secret
    #[validate(length(min = 1, max = 64, message = "Key id must be 1-64 characters"))]
    pub key_id: String,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self { master_key_base64: None, key_id: "default".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.registry.name_policy, NamePolicy::UniquePerCluster);
    }

    #[test]
    fn rejects_inverted_pool_bounds() {
        let mut config = AppConfig::default();
        config.database.min_connections = 20;
        config.database.max_connections = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_sqlite_url() {
        let mut config = AppConfig::default();
        config.database.url = "postgresql://localhost/egress".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_backoff() {
        let mut config = AppConfig::default();
        config.broadcast.initial_backoff_ms = 10_000;
        config.broadcast.max_backoff_ms = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_lock_timeout() {
        let mut config = AppConfig::default();
        config.coordinator.lock_timeout_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, EgressError::Validation { .. }));
    }

    #[test]
    fn durations() {
        let config = AppConfig::default();
        assert_eq!(config.coordinator.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.broadcast.delivery_timeout(), Duration::from_secs(2));
        assert_eq!(config.database.idle_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.observability.metrics_bind_address().as_deref(), Some("0.0.0.0:9090"));
    }
}
