//! # Egressplane
//!
//! A registry of outgoing connection definitions with atomic credential
//! rotation and propagation to a cluster of worker nodes.
//!
//! ## Architecture
//!
//! ```text
//! API facade → Validation → Mutation Coordinator → Registry + Vault
//!                                   ↓
//!                          Cluster Broadcaster → Worker nodes
//! ```
//!
//! - **Validation**: typed requests built from flat JSON field sets, reporting every violation
//! - **Registry**: SQLite-backed definitions scoped by cluster
//! - **Vault**: encrypted, versioned credential material
//! - **Coordinator**: per-id serialized create, rotate, edit and delete
//! - **Broadcaster**: per-node ordered delivery with retry, resync and settling
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use egressplane::{AppConfig, ControlPlane, Result};
//! use egressplane::observability::MetricsRecorder;
//! use egressplane::storage::create_pool;
//! use serde_json::json;
//!
//! # async fn run() -> Result<()> {
//! let config = AppConfig::load(None)?;
//! let pool = create_pool(&config.database).await?;
//! let plane = ControlPlane::build(&config, pool, MetricsRecorder::new()).await?;
//! let response = plane.api.get(&json!({"id": 1})).await;
//! println!("{}", response.envelope.to_json());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod secrets;
pub mod services;
pub mod startup;
pub mod storage;
pub mod validation;

// Re-export commonly used types and traits
pub use api::{ConnectionApi, Envelope, Operation};
pub use config::AppConfig;
pub use errors::{EgressError, Result};
pub use startup::ControlPlane;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
