//! # Cluster Propagation
//!
//! Moves committed mutations from the coordinator to every worker node.
//!
//! - `types`: announcements, acknowledgement state, retry policy, settle reports
//! - `membership`: node registration, heartbeats and expiry
//! - `worker`: the [`WorkerNode`] contract and the in-process [`LocalWorker`]
//! - `broadcaster`: per-node delivery with retry, resync and settling

pub mod broadcaster;
pub mod membership;
pub mod types;
pub mod worker;

pub use broadcaster::{BroadcasterSettings, ClusterBroadcaster, SnapshotSource};
pub use membership::{Heartbeat, Membership, NodeState, NodeStatus};
pub use types::{
    AckState, Announcement, AnnouncementKind, NodeId, RetryConfig, SettleReport, SettleTarget,
};
pub use worker::{LocalWorker, WorkerNode};
