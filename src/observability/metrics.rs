//! # Metrics Collection
//!
//! Counters, gauges and histograms for mutations and propagation, recorded
//! through the `metrics` facade. Without an installed exporter every call is a
//! no-op, so components record unconditionally.

use crate::config::ObservabilityConfig;
use crate::errors::{EgressError, Result};
use ::tracing::{info, warn};
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Metrics recorder that tracks application metrics
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Register metric descriptions with the installed recorder
    pub fn describe(&self) {
        describe_counter!("mutations_total", "Coordinated mutations by operation and outcome");
        describe_histogram!(
            "mutation_duration_seconds",
            Unit::Seconds,
            "Time from lock acquisition to commit or abort"
        );
        describe_histogram!(
            "mutation_lock_wait_seconds",
            Unit::Seconds,
            "Time spent waiting for the per-connection lock"
        );
        describe_counter!("mutation_lock_timeouts_total", "Mutations rejected as busy");
        describe_counter!("validation_failures_total", "Requests rejected by validation");
        describe_counter!("announcements_total", "Committed mutations handed to the broadcaster");
        describe_counter!("deliveries_total", "Delivery outcomes per worker node");
        describe_histogram!("delivery_attempts", "Attempts needed per delivered notification");
        describe_counter!("propagation_degraded_total", "Nodes that exhausted their retry budget");
        describe_counter!("resyncs_total", "Full snapshot resynchronisations per node");
        describe_gauge!("cluster_nodes", "Registered worker nodes by state");
    }

    /// Record the outcome of a coordinated mutation
    pub fn record_mutation(&self, operation: &str, success: bool, duration: f64) {
        let outcome = if success { "committed" } else { "aborted" };
        let labels = [("operation", operation.to_string()), ("outcome", outcome.to_string())];
        counter!("mutations_total", &labels).increment(1);

        let duration_labels = [("operation", operation.to_string())];
        histogram!("mutation_duration_seconds", &duration_labels).record(duration);
    }

    /// Record how long a mutation waited for its per-id lock
    pub fn record_lock_wait(&self, duration: f64) {
        histogram!("mutation_lock_wait_seconds").record(duration);
    }

    /// Record a mutation rejected because the per-id lock timed out
    pub fn record_lock_timeout(&self, operation: &str) {
        let labels = [("operation", operation.to_string())];
        counter!("mutation_lock_timeouts_total", &labels).increment(1);
    }

    /// Record a request rejected by validation
    pub fn record_validation_failure(&self, operation: &str, violations: usize) {
        let labels = [("operation", operation.to_string())];
        counter!("validation_failures_total", &labels).increment(1);
        histogram!("validation_violations", &labels).record(violations as f64);
    }

    /// Record an announcement handed to the broadcaster
    pub fn record_announcement(&self, kind: &str) {
        let labels = [("kind", kind.to_string())];
        counter!("announcements_total", &labels).increment(1);
    }

    /// Record the outcome of delivering one notification to one node
    pub fn record_delivery(&self, node_id: &str, success: bool, attempts: u32) {
        let status = if success { "acknowledged" } else { "exhausted" };
        let labels = [("node_id", node_id.to_string()), ("status", status.to_string())];
        counter!("deliveries_total", &labels).increment(1);
        histogram!("delivery_attempts").record(f64::from(attempts));
    }

    /// Record a node that exhausted its retry budget
    pub fn record_propagation_degraded(&self, node_id: &str) {
        let labels = [("node_id", node_id.to_string())];
        counter!("propagation_degraded_total", &labels).increment(1);
    }

    /// Record a full resynchronisation attempt
    pub fn record_resync(&self, node_id: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        let labels = [("node_id", node_id.to_string()), ("status", status.to_string())];
        counter!("resyncs_total", &labels).increment(1);
    }

    /// Update node gauges
    pub fn update_nodes(&self, ready: usize, unreachable: usize) {
        gauge!("cluster_nodes", "state" => "ready").set(ready as f64);
        gauge!("cluster_nodes", "state" => "unreachable").set(unreachable as f64);
    }
}

/// Install the Prometheus exporter when metrics are enabled
pub async fn init_metrics(config: &ObservabilityConfig) -> Result<Option<MetricsRecorder>> {
    if !config.enable_metrics {
        return Ok(None);
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(None);
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        EgressError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| {
            EgressError::config(format!("Failed to initialize metrics exporter: {}", e))
        })?;

    let recorder = MetricsRecorder::new();
    recorder.describe();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(Some(recorder))
}
