//! # Structured Logging
//!
//! Subscriber setup and span macros for the tracing ecosystem.
//!
//! `RUST_LOG` takes precedence over `observability.log_level` when set. With
//! `observability.json_logging` every event is emitted as one JSON object per
//! line, including the fields of the enclosing spans.

use crate::config::ObservabilityConfig;
use crate::errors::{EgressError, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Create a tracing span around a coordinated mutation.
///
/// ```rust,ignore
/// let span = mutation_span!("change_credential", connection_id);
/// ```
#[macro_export]
macro_rules! mutation_span {
    ($operation:expr) => {
        tracing::info_span!(
            "mutation",
            operation = %$operation,
            mutation_id = %uuid::Uuid::new_v4(),
            connection_id = tracing::field::Empty
        )
    };
    ($operation:expr, $connection_id:expr) => {
        tracing::info_span!(
            "mutation",
            operation = %$operation,
            mutation_id = %uuid::Uuid::new_v4(),
            connection_id = %$connection_id
        )
    };
    ($operation:expr, $connection_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "mutation",
            operation = %$operation,
            mutation_id = %uuid::Uuid::new_v4(),
            connection_id = %$connection_id,
            $($field)*
        )
    };
}

/// Create a tracing span for database operations.
#[macro_export]
macro_rules! db_span {
    ($operation:expr) => {
        tracing::debug_span!(
            "db_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "db_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for delivery to one worker node
#[macro_export]
macro_rules! broadcast_span {
    ($operation:expr, $node_id:expr) => {
        tracing::info_span!(
            "broadcast",
            operation = %$operation,
            node_id = %$node_id
        )
    };
    ($operation:expr, $node_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "broadcast",
            operation = %$operation,
            node_id = %$node_id,
            $($field)*
        )
    };
}

/// Install the global tracing subscriber. Events go to stderr.
///
/// Fails if a subscriber is already installed or the filter does not parse.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            EgressError::config(format!("Invalid log filter '{}': {}", config.log_level, e))
        })?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logging {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr).with_target(true)).try_init()
    };

    result.map_err(|e| {
        EgressError::config_with_source("Failed to install tracing subscriber", Box::new(e))
    })
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        service_name = %config.observability.service_name,
        database_url = %config.database.url,
        name_policy = ?config.registry.name_policy,
        lock_timeout_ms = config.coordinator.lock_timeout_ms,
        max_attempts = config.broadcast.max_attempts,
        delivery_timeout_ms = config.broadcast.delivery_timeout_ms,
        heartbeat_ttl_seconds = config.membership.heartbeat_ttl_seconds,
        metrics_enabled = %config.observability.enable_metrics,
        "Egressplane configuration"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_compile() {
        let _span = mutation_span!("create");
        let _span = mutation_span!("change_credential", 7);
        let _span = mutation_span!("delete", 7, cluster_id = 1);
        let _span = db_span!("run_migrations", available = 3);
        let _span = broadcast_span!("deliver", "node-1");
        let _span = broadcast_span!("deliver", "node-1", version = "r1c1");
    }

    #[test]
    fn test_log_config_info() {
        let config = crate::config::AppConfig::default();
        log_config_info(&config);
    }
}
