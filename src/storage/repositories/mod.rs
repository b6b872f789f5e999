//! Repository modules for data access
//!
//! Each repository handles the persistence of one resource type.

pub mod cluster;
pub mod connection;

pub use cluster::{ClusterData, ClusterRepository};
pub use connection::{ConnectionRecord, ConnectionRegistry, SqlxConnectionRegistry};
