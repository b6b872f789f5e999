//! Worker node membership
//!
//! Nodes register when ready, heartbeat while alive and leave on disconnect.
//! A node silent for longer than the heartbeat TTL is expired. Nodes that ran
//! out of delivery retries are kept but flagged unreachable until they are
//! resynchronised.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::types::NodeId;

/// Reachability of a registered node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Ready,
    Unreachable,
}

#[derive(Debug, Clone)]
struct NodeEntry {
    state: NodeState,
    last_heartbeat: Instant,
    registered_at: DateTime<Utc>,
}

/// Point-in-time view of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub state: NodeState,
    pub registered_at: DateTime<Utc>,
}

/// Outcome of a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heartbeat {
    Unknown,
    Alive,
    /// The node was unreachable and needs a resync before it is current again
    Returned,
}

/// Registry of worker nodes, cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Membership {
    nodes: Arc<DashMap<NodeId, NodeEntry>>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or re-register a node as ready. Returns true if it was already known.
    pub fn register(&self, node_id: &NodeId) -> bool {
        let entry = NodeEntry {
            state: NodeState::Ready,
            last_heartbeat: Instant::now(),
            registered_at: Utc::now(),
        };
        self.nodes.insert(node_id.clone(), entry).is_some()
    }

    pub fn heartbeat(&self, node_id: &NodeId) -> Heartbeat {
        match self.nodes.get_mut(node_id) {
            Some(mut entry) => {
                entry.last_heartbeat = Instant::now();
                if entry.state == NodeState::Unreachable {
                    Heartbeat::Returned
                } else {
                    Heartbeat::Alive
                }
            }
            None => Heartbeat::Unknown,
        }
    }

    pub fn mark_unreachable(&self, node_id: &NodeId) {
        if let Some(mut entry) = self.nodes.get_mut(node_id) {
            entry.state = NodeState::Unreachable;
        }
    }

    pub fn mark_ready(&self, node_id: &NodeId) {
        if let Some(mut entry) = self.nodes.get_mut(node_id) {
            entry.state = NodeState::Ready;
        }
    }

    /// Remove a node. Returns false if it was not registered.
    pub fn leave(&self, node_id: &NodeId) -> bool {
        self.nodes.remove(node_id).is_some()
    }

    /// Remove and return every node silent for longer than `ttl`.
    pub fn expire(&self, ttl: Duration) -> Vec<NodeId> {
        let now = Instant::now();
        let expired: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|entry| now.duration_since(entry.last_heartbeat) > ttl)
            .map(|entry| entry.key().clone())
            .collect();

        for node_id in &expired {
            self.nodes.remove(node_id);
        }
        expired
    }

    pub fn state(&self, node_id: &NodeId) -> Option<NodeState> {
        self.nodes.get(node_id).map(|entry| entry.state)
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains_key(node_id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn unreachable_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|entry| entry.state == NodeState::Unreachable)
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn statuses(&self) -> Vec<NodeStatus> {
        let mut statuses: Vec<NodeStatus> = self
            .nodes
            .iter()
            .map(|entry| NodeStatus {
                node_id: entry.key().clone(),
                state: entry.state,
                registered_at: entry.registered_at,
            })
            .collect();
        statuses.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        statuses
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_heartbeat_leave() {
        let membership = Membership::new();
        let node = NodeId::from("node-1");

        assert!(!membership.register(&node));
        assert!(membership.register(&node));
        assert_eq!(membership.heartbeat(&node), Heartbeat::Alive);
        assert!(membership.leave(&node));
        assert_eq!(membership.heartbeat(&node), Heartbeat::Unknown);
        assert!(!membership.leave(&node));
    }

    #[test]
    fn unreachable_node_returns_on_heartbeat() {
        let membership = Membership::new();
        let node = NodeId::from("node-1");
        membership.register(&node);

        membership.mark_unreachable(&node);
        assert_eq!(membership.unreachable_nodes(), vec![node.clone()]);
        assert_eq!(membership.heartbeat(&node), Heartbeat::Returned);

        membership.mark_ready(&node);
        assert!(membership.unreachable_nodes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_nodes_expire() {
        let membership = Membership::new();
        let quiet = NodeId::from("quiet");
        let chatty = NodeId::from("chatty");
        membership.register(&quiet);
        membership.register(&chatty);

        tokio::time::advance(Duration::from_secs(20)).await;
        membership.heartbeat(&chatty);
        tokio::time::advance(Duration::from_secs(15)).await;

        assert_eq!(membership.expire(Duration::from_secs(30)), vec![quiet]);
        assert_eq!(membership.node_ids(), vec![chatty]);
    }
}
