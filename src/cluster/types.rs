//! Messages and policies shared by the broadcaster and worker nodes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BroadcastConfig;
use crate::domain::{ConnectionId, DefinitionSnapshot, SnapshotVersion};

/// Identifier a worker node registers under
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What a committed mutation did to a definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnouncementKind {
    Created,
    Updated,
    Deleted,
}

impl AnnouncementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnouncementKind::Created => "created",
            AnnouncementKind::Updated => "updated",
            AnnouncementKind::Deleted => "deleted",
        }
    }
}

impl fmt::Display for AnnouncementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed mutation on its way to the worker nodes.
///
/// Created and updated announcements carry the complete snapshot, so a worker
/// never has to read the registry and the vault separately.
#[derive(Debug, Clone)]
pub struct Announcement {
    pub sequence: u64,
    pub connection_id: ConnectionId,
    pub version: SnapshotVersion,
    pub kind: AnnouncementKind,
    pub snapshot: Option<Arc<DefinitionSnapshot>>,
}

impl Announcement {
    pub fn upsert(kind: AnnouncementKind, snapshot: Arc<DefinitionSnapshot>) -> Self {
        Self {
            sequence: 0,
            connection_id: snapshot.id(),
            version: snapshot.version(),
            kind,
            snapshot: Some(snapshot),
        }
    }

    pub fn deleted(connection_id: ConnectionId, version: SnapshotVersion) -> Self {
        Self { sequence: 0, connection_id, version, kind: AnnouncementKind::Deleted, snapshot: None }
    }
}

/// What a caller waits for after a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "version")]
pub enum SettleTarget {
    /// Every node holds this version or a later one
    Version(SnapshotVersion),
    /// Every node has dropped the definition
    Deleted,
}

/// What a node has acknowledged for one connection id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "version")]
pub enum AckState {
    Holding(SnapshotVersion),
    Deleted,
}

impl AckState {
    /// Acknowledgements only move forward; deletion is final.
    pub fn merge(self, newer: AckState) -> AckState {
        match (self, newer) {
            (AckState::Deleted, _) | (_, AckState::Deleted) => AckState::Deleted,
            (AckState::Holding(a), AckState::Holding(b)) => AckState::Holding(a.max(b)),
        }
    }

    pub fn satisfies(&self, target: SettleTarget) -> bool {
        match (self, target) {
            (AckState::Deleted, _) => true,
            (AckState::Holding(held), SettleTarget::Version(wanted)) => *held >= wanted,
            (AckState::Holding(_), SettleTarget::Deleted) => false,
        }
    }
}

/// Result of waiting for a mutation to reach the worker nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleReport {
    pub connection_id: ConnectionId,
    pub target: SettleTarget,
    pub settled: bool,
    pub acknowledged: Vec<NodeId>,
    pub lagging: Vec<NodeId>,
}

/// Exponential backoff for delivery retries
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate the backoff before retry number `attempt` (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(32) as i32);
        let millis = (self.initial_backoff.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_backoff)
    }
}

impl From<&BroadcastConfig> for RetryConfig {
    fn from(config: &BroadcastConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.backoff_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.backoff_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.backoff_for_attempt(2), Duration::from_millis(400));
        assert_eq!(retry.backoff_for_attempt(3), Duration::from_millis(500));
        assert_eq!(retry.backoff_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn acks_never_move_backwards() {
        let older = AckState::Holding(SnapshotVersion::new(1, 1));
        let newer = AckState::Holding(SnapshotVersion::new(1, 2));
        assert_eq!(newer.merge(older), newer);
        assert_eq!(older.merge(newer), newer);
        assert_eq!(AckState::Deleted.merge(newer), AckState::Deleted);
    }

    #[test]
    fn settle_targets() {
        let held = AckState::Holding(SnapshotVersion::new(2, 1));
        assert!(held.satisfies(SettleTarget::Version(SnapshotVersion::new(1, 5))));
        assert!(!held.satisfies(SettleTarget::Version(SnapshotVersion::new(2, 2))));
        assert!(!held.satisfies(SettleTarget::Deleted));
        assert!(AckState::Deleted.satisfies(SettleTarget::Version(SnapshotVersion::new(9, 9))));
    }

    #[test]
    fn retry_from_config() {
        let retry = RetryConfig::from(&BroadcastConfig::default());
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_backoff, Duration::from_millis(100));
    }
}
