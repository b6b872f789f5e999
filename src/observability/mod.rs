//! # Observability Infrastructure
//!
//! Structured logging, metrics and health checking for the egressplane
//! control plane.

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{
    DatabaseHealthProvider, HealthCheck, HealthChecker, HealthProvider, HealthStatus,
    PropagationHealthProvider,
};
pub use logging::{init_logging, log_config_info};
pub use metrics::{init_metrics, MetricsRecorder};

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use ::tracing::info;

/// Initialize logging and, when enabled, the metrics exporter.
///
/// Returns the metrics recorder components should use.
pub async fn init_observability(config: &ObservabilityConfig) -> Result<MetricsRecorder> {
    init_logging(config)?;
    let recorder = init_metrics(config).await?.unwrap_or_default();

    info!(
        service_name = %config.service_name,
        log_level = %config.log_level,
        json_logging = config.json_logging,
        metrics_enabled = config.enable_metrics,
        "Observability initialized successfully"
    );

    Ok(recorder)
}
