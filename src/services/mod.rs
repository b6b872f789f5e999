//! Business logic services
//!
//! The mutation protocol on top of the registry and the vault, separated from
//! request parsing and transport concerns.

pub mod coordinator;
pub mod locks;
pub mod snapshot;

pub use coordinator::{MutationCoordinator, MutationOutcome, MutationPhase};
pub use locks::{IdLockGuard, IdLocks};
pub use snapshot::SnapshotReader;
