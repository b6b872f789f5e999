//! # Configuration Management
//!
//! Layered configuration for the egressplane control plane: built-in defaults,
//! an optional TOML file, then `EGRESSPLANE__SECTION__KEY` environment
//! overrides. Every section is validated with `validator` after loading.

pub mod settings;

pub use settings::{
    AppConfig, BroadcastConfig, CoordinatorConfig, DatabaseConfig, EncryptionConfig,
    MembershipConfig, NamePolicy, ObservabilityConfig, RegistryConfig, ENV_PREFIX,
};
