//! Domain layer
//!
//! Plain types for outgoing connection definitions, independent of storage
//! and transport.
//!
//! - `id`: integer identifiers with the NewType pattern
//! - `connection`: definitions, patches, snapshot versions and worker snapshots

pub mod connection;
pub mod id;

pub use connection::{
    ConnectionAttributes, ConnectionDefinition, ConnectionKind, ConnectionPatch,
    DefinitionSnapshot, NewConnection, SnapshotVersion,
};
pub use id::{ClusterId, ConnectionId};
