//! Cluster broadcaster
//!
//! Committed mutations are published on a bounded fan-out channel. Every
//! registered node has its own delivery task, so nodes progress independently
//! while each node sees announcements in commit order. A delivery attempt is
//! bounded by a timeout and retried with exponential backoff; a node that
//! exhausts the budget is flagged unreachable and reported as degraded. The
//! mutation that produced the announcement stays committed regardless.
//!
//! A node is brought back to the current state with a full snapshot listing
//! when it registers, when it falls behind the channel, when it returns from
//! being unreachable, and on the next announcement after a failed delivery.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use super::membership::{Heartbeat, Membership, NodeState};
use super::types::{AckState, Announcement, NodeId, RetryConfig, SettleReport, SettleTarget};
use super::worker::WorkerNode;
use crate::broadcast_span;
use crate::config::{BroadcastConfig, MembershipConfig};
use crate::domain::{ConnectionId, DefinitionSnapshot};
use crate::errors::{EgressError, Result};
use crate::observability::MetricsRecorder;

/// Consistent listing of every live definition, used for resynchronisation.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot_all(&self) -> Result<Vec<Arc<DefinitionSnapshot>>>;
}

/// Tunables for delivery and membership
#[derive(Debug, Clone)]
pub struct BroadcasterSettings {
    pub retry: RetryConfig,
    pub delivery_timeout: Duration,
    pub channel_capacity: usize,
    pub heartbeat_ttl: Duration,
}

impl BroadcasterSettings {
    pub fn from_config(broadcast: &BroadcastConfig, membership: &MembershipConfig) -> Self {
        Self {
            retry: RetryConfig::from(broadcast),
            delivery_timeout: broadcast.delivery_timeout(),
            channel_capacity: broadcast.channel_capacity.max(1),
            heartbeat_ttl: membership.heartbeat_ttl(),
        }
    }
}

impl Default for BroadcasterSettings {
    fn default() -> Self {
        Self::from_config(&BroadcastConfig::default(), &MembershipConfig::default())
    }
}

/// Latest acknowledged state per node and connection id.
///
/// Only held versions are kept. A node that has processed every announcement
/// up to some sequence and holds no entry for an id does not hold that id.
#[derive(Debug, Default)]
struct AckLedger {
    acks: DashMap<NodeId, HashMap<ConnectionId, AckState>>,
    synced: DashMap<NodeId, u64>,
    changed: Notify,
}

impl AckLedger {
    /// Record the ack for one delivered announcement.
    fn record(&self, node_id: &NodeId, sequence: u64, connection_id: ConnectionId, ack: AckState) {
        {
            let mut node = self.acks.entry(node_id.clone()).or_default();
            match ack {
                AckState::Holding(_) => {
                    let merged = match node.get(&connection_id) {
                        Some(previous) => previous.merge(ack),
                        None => ack,
                    };
                    node.insert(connection_id, merged);
                }
                AckState::Deleted => {
                    node.remove(&connection_id);
                }
            }
        }
        self.advance(node_id, sequence);
        self.changed.notify_waiters();
    }

    /// Replace a node's entries with the outcome of a resync that reflects
    /// every announcement up to `floor`.
    fn record_all(&self, node_id: &NodeId, floor: u64, states: Vec<(ConnectionId, AckState)>) {
        let held: HashMap<ConnectionId, AckState> = states
            .into_iter()
            .filter(|(_, ack)| matches!(ack, AckState::Holding(_)))
            .collect();
        self.acks.insert(node_id.clone(), held);
        self.advance(node_id, floor);
        self.changed.notify_waiters();
    }

    fn advance(&self, node_id: &NodeId, sequence: u64) {
        let mut synced = self.synced.entry(node_id.clone()).or_insert(0);
        *synced = (*synced).max(sequence);
    }

    /// Highest announcement sequence the node is known to reflect
    fn synced_through(&self, node_id: &NodeId) -> Option<u64> {
        self.synced.get(node_id).map(|synced| *synced)
    }

    /// What the node holds for `connection_id`, given announcements up to `floor`.
    fn get(&self, node_id: &NodeId, connection_id: ConnectionId, floor: u64) -> Option<AckState> {
        let held = self.acks.get(node_id).and_then(|node| node.get(&connection_id).copied());
        match held {
            Some(ack) => Some(ack),
            None if self.synced_through(node_id).is_some_and(|synced| synced >= floor) => {
                Some(AckState::Deleted)
            }
            None => None,
        }
    }

    fn forget(&self, node_id: &NodeId) {
        self.acks.remove(node_id);
        self.synced.remove(node_id);
        self.changed.notify_waiters();
    }
}

struct NodeHandle {
    resync: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Everything a delivery task needs, without a reference back to the broadcaster.
#[derive(Clone)]
struct DeliveryContext {
    membership: Membership,
    ledger: Arc<AckLedger>,
    sequence: Arc<AtomicU64>,
    source: Arc<dyn SnapshotSource>,
    settings: BroadcasterSettings,
    metrics: MetricsRecorder,
}

impl DeliveryContext {
    async fn with_retry<T, F, Fut>(
        &self,
        node_id: &NodeId,
        mut operation: F,
    ) -> std::result::Result<(T, u32), (EgressError, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retry = &self.settings.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match tokio::time::timeout(self.settings.delivery_timeout, operation()).await
            {
                Ok(Ok(value)) => return Ok((value, attempt)),
                Ok(Err(e)) => e,
                Err(_) => EgressError::propagation_degraded(
                    node_id.as_str(),
                    format!(
                        "no acknowledgement within {}ms",
                        self.settings.delivery_timeout.as_millis()
                    ),
                ),
            };

            if attempt >= retry.max_attempts {
                return Err((err, attempt));
            }

            let backoff = retry.backoff_for_attempt(attempt - 1);
            debug!(
                node_id = %node_id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Delivery attempt failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    fn degrade(&self, node_id: &NodeId, cause: &EgressError) {
        self.membership.mark_unreachable(node_id);
        self.metrics.record_propagation_degraded(node_id.as_str());
        let signal = EgressError::propagation_degraded(node_id.as_str(), cause.to_string());
        warn!(
            node_id = %node_id,
            error = %signal,
            max_attempts = self.settings.retry.max_attempts,
            "Worker node marked unreachable"
        );
    }

    async fn deliver(&self, worker: &dyn WorkerNode, announcement: &Announcement) -> bool {
        let node_id = worker.node_id();
        let span = broadcast_span!(
            "deliver",
            node_id,
            connection_id = %announcement.connection_id,
            version = %announcement.version,
            kind = %announcement.kind,
            sequence = announcement.sequence
        );

        async {
            match self.with_retry(node_id, || worker.deliver(announcement)).await {
                Ok((ack, attempts)) => {
                    self.ledger.record(node_id, announcement.sequence, announcement.connection_id, ack);
                    self.metrics.record_delivery(node_id.as_str(), true, attempts);
                    debug!(attempts, "Announcement acknowledged");
                    true
                }
                Err((err, attempts)) => {
                    self.metrics.record_delivery(node_id.as_str(), false, attempts);
                    self.degrade(node_id, &err);
                    false
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn resync(&self, worker: &dyn WorkerNode) -> bool {
        let node_id = worker.node_id();
        let span = broadcast_span!("resync", node_id);

        async {
            // Announcements up to here are committed before the listing reads them.
            let floor = self.sequence.load(Ordering::SeqCst);
            let snapshots = match self.source.snapshot_all().await {
                Ok(snapshots) => snapshots,
                Err(e) => {
                    error!(error = %e, "Failed to read snapshot listing for resync");
                    self.metrics.record_resync(node_id.as_str(), false);
                    return false;
                }
            };

            match self.with_retry(node_id, || worker.resync(&snapshots)).await {
                Ok((states, attempts)) => {
                    self.ledger.record_all(node_id, floor, states);
                    self.membership.mark_ready(node_id);
                    self.metrics.record_resync(node_id.as_str(), true);
                    info!(definitions = snapshots.len(), attempts, "Worker node resynchronised");
                    true
                }
                Err((err, _)) => {
                    self.metrics.record_resync(node_id.as_str(), false);
                    self.degrade(node_id, &err);
                    false
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(
        self,
        worker: Arc<dyn WorkerNode>,
        mut receiver: broadcast::Receiver<Arc<Announcement>>,
        resync: Arc<Notify>,
    ) {
        let node_id = worker.node_id().clone();
        let mut needs_resync = false;

        loop {
            let mut resync_now = false;

            tokio::select! {
                biased;
                _ = resync.notified() => {
                    needs_resync = true;
                    resync_now = true;
                }
                received = receiver.recv() => match received {
                    Ok(announcement) => {
                        let reflected = self
                            .ledger
                            .synced_through(&node_id)
                            .is_some_and(|synced| announcement.sequence <= synced);
                        if needs_resync {
                            resync_now = true;
                        } else if reflected {
                            debug!(
                                node_id = %node_id,
                                sequence = announcement.sequence,
                                "Announcement already reflected by resync"
                            );
                        } else if !self.deliver(worker.as_ref(), &announcement).await {
                            needs_resync = true;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(node_id = %node_id, skipped, "Worker node fell behind, resynchronising");
                        needs_resync = true;
                        resync_now = true;
                    }
                    Err(RecvError::Closed) => break,
                },
            }

            if resync_now && self.resync(worker.as_ref()).await {
                needs_resync = false;
            }
        }

        debug!(node_id = %node_id, "Delivery task stopped");
    }
}

struct Inner {
    sender: broadcast::Sender<Arc<Announcement>>,
    nodes: DashMap<NodeId, NodeHandle>,
    context: DeliveryContext,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for node in self.nodes.iter() {
            node.task.abort();
        }
    }
}

/// Fans committed mutations out to worker nodes. Cheap to clone.
#[derive(Clone)]
pub struct ClusterBroadcaster {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ClusterBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterBroadcaster")
            .field("nodes", &self.inner.context.membership.node_ids())
            .field("sequence", &self.inner.context.sequence.load(Ordering::Relaxed))
            .finish()
    }
}

impl ClusterBroadcaster {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        settings: BroadcasterSettings,
        metrics: MetricsRecorder,
    ) -> Self {
        let (sender, _) = broadcast::channel(settings.channel_capacity);
        let context = DeliveryContext {
            membership: Membership::new(),
            ledger: Arc::new(AckLedger::default()),
            sequence: Arc::new(AtomicU64::new(0)),
            source,
            settings,
            metrics,
        };

        Self {
            inner: Arc::new(Inner {
                sender,
                nodes: DashMap::new(),
                context,
            }),
        }
    }

    pub fn membership(&self) -> &Membership {
        &self.inner.context.membership
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.membership().node_ids()
    }

    /// Register a ready node and start delivering to it. Re-registering a
    /// node id replaces the previous delivery task, as after a worker restart.
    pub fn register_node(&self, worker: Arc<dyn WorkerNode>) -> NodeId {
        let node_id = worker.node_id().clone();
        // Membership first, so a failing initial resync can flag the node.
        let rejoined = self.membership().register(&node_id);
        // A restarted worker starts from an empty cache.
        if let Some((_, previous)) = self.inner.nodes.remove(&node_id) {
            previous.task.abort();
        }
        self.inner.context.ledger.forget(&node_id);

        let receiver = self.inner.sender.subscribe();
        let resync = Arc::new(Notify::new());
        // Initial resync runs before any announcement is delivered.
        resync.notify_one();

        let task = tokio::spawn(self.inner.context.clone().run(worker, receiver, resync.clone()));

        if let Some(previous) = self.inner.nodes.insert(node_id.clone(), NodeHandle { resync, task })
        {
            previous.task.abort();
        }
        self.refresh_gauges();

        info!(node_id = %node_id, rejoined, "Worker node registered");
        node_id
    }

    /// Remove a node on disconnect. Returns false if it was not registered.
    pub fn leave(&self, node_id: &NodeId) -> bool {
        let known = self.drop_node(node_id);
        if known {
            info!(node_id = %node_id, "Worker node left");
        }
        known
    }

    /// Record a heartbeat. A node returning from unreachable is resynchronised.
    pub fn heartbeat(&self, node_id: &NodeId) -> Result<()> {
        match self.membership().heartbeat(node_id) {
            Heartbeat::Unknown => Err(EgressError::not_found("node", node_id)),
            Heartbeat::Alive => Ok(()),
            Heartbeat::Returned => {
                info!(node_id = %node_id, "Unreachable worker node is back, resynchronising");
                self.request_resync(node_id)
            }
        }
    }

    /// Ask a node's delivery task to rebuild the node from a full listing
    pub fn request_resync(&self, node_id: &NodeId) -> Result<()> {
        let handle =
            self.inner.nodes.get(node_id).ok_or_else(|| EgressError::not_found("node", node_id))?;
        handle.resync.notify_one();
        Ok(())
    }

    /// Remove nodes that missed their heartbeat TTL
    pub fn expire_stale(&self) -> Vec<NodeId> {
        let expired = self.membership().expire(self.inner.context.settings.heartbeat_ttl);
        for node_id in &expired {
            self.drop_node(node_id);
            warn!(node_id = %node_id, "Worker node expired after missing heartbeats");
        }
        expired
    }

    /// Periodically expire silent nodes until the broadcaster is dropped
    pub fn spawn_expiry_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let broadcaster = ClusterBroadcaster { inner };
                broadcaster.expire_stale();
            }
        })
    }

    /// Heartbeat on behalf of an in-process node until the broadcaster is dropped
    pub fn spawn_heartbeats(&self, node_id: NodeId, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let broadcaster = ClusterBroadcaster { inner };
                if broadcaster.heartbeat(&node_id).is_err() {
                    break;
                }
            }
        })
    }

    /// Publish a committed mutation. Never waits for delivery.
    pub fn announce(&self, mut announcement: Announcement) -> u64 {
        let sequence = self.inner.context.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        announcement.sequence = sequence;

        let connection_id = announcement.connection_id;
        let kind = announcement.kind;
        let version = announcement.version;
        self.inner.context.metrics.record_announcement(kind.as_str());

        match self.inner.sender.send(Arc::new(announcement)) {
            Ok(receivers) => debug!(
                connection_id = %connection_id,
                kind = %kind,
                version = %version,
                sequence,
                receivers,
                "Announcement published"
            ),
            Err(_) => debug!(
                connection_id = %connection_id,
                sequence,
                "No worker nodes registered, announcement dropped"
            ),
        }
        sequence
    }

    /// Current propagation state of a mutation across registered nodes
    pub fn settle_report(&self, connection_id: ConnectionId, target: SettleTarget) -> SettleReport {
        self.report_through(connection_id, target, self.current_sequence())
    }

    /// Sequence of the most recent announcement
    pub fn current_sequence(&self) -> u64 {
        self.inner.context.sequence.load(Ordering::SeqCst)
    }

    fn report_through(
        &self,
        connection_id: ConnectionId,
        target: SettleTarget,
        floor: u64,
    ) -> SettleReport {
        let ledger = &self.inner.context.ledger;
        let (acknowledged, lagging): (Vec<NodeId>, Vec<NodeId>) =
            self.membership().node_ids().into_iter().partition(|node_id| {
                ledger
                    .get(node_id, connection_id, floor)
                    .map(|ack| ack.satisfies(target))
                    .unwrap_or(false)
            });

        SettleReport { connection_id, target, settled: lagging.is_empty(), acknowledged, lagging }
    }

    /// Wait until every registered node acknowledged `target` or the timeout passes
    pub async fn await_settled(
        &self,
        connection_id: ConnectionId,
        target: SettleTarget,
        timeout: Duration,
    ) -> SettleReport {
        let deadline = tokio::time::Instant::now() + timeout;
        let ledger = &self.inner.context.ledger;
        let floor = self.current_sequence();

        loop {
            let changed = ledger.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let report = self.report_through(connection_id, target, floor);
            if report.settled {
                return report;
            }

            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                let report = self.report_through(connection_id, target, floor);
                if !report.settled {
                    warn!(
                        connection_id = %connection_id,
                        lagging = ?report.lagging,
                        "Mutation did not settle within the window"
                    );
                }
                return report;
            }
        }
    }

    /// Stop every delivery task
    pub fn shutdown(&self) {
        for node_id in self.membership().node_ids() {
            self.drop_node(&node_id);
        }
    }

    fn drop_node(&self, node_id: &NodeId) -> bool {
        let handle = self.inner.nodes.remove(node_id);
        if let Some((_, handle)) = &handle {
            handle.task.abort();
        }
        let known = self.membership().leave(node_id) || handle.is_some();
        self.inner.context.ledger.forget(node_id);
        self.refresh_gauges();
        known
    }

    fn refresh_gauges(&self) {
        let membership = self.membership();
        let unreachable = membership.unreachable_nodes().len();
        self.inner.context.metrics.update_nodes(membership.len().saturating_sub(unreachable), unreachable);
    }

    /// Whether a node is currently flagged unreachable
    pub fn is_unreachable(&self, node_id: &NodeId) -> bool {
        self.membership().state(node_id) == Some(NodeState::Unreachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::types::AnnouncementKind;
    use crate::cluster::worker::LocalWorker;
    use crate::domain::{
        ClusterId, ConnectionAttributes, ConnectionDefinition, ConnectionKind, SnapshotVersion,
    };
    use chrono::Utc;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct StaticSource {
        snapshots: Mutex<Vec<Arc<DefinitionSnapshot>>>,
    }

    #[async_trait]
    impl SnapshotSource for StaticSource {
        async fn snapshot_all(&self) -> Result<Vec<Arc<DefinitionSnapshot>>> {
            Ok(self.snapshots.lock().await.clone())
        }
    }

    fn snapshot(id: i64, credential_version: u64) -> Arc<DefinitionSnapshot> {
        let now = Utc::now();
        DefinitionSnapshot::new(
            ConnectionDefinition {
                id: ConnectionId::new(id),
                cluster_id: ClusterId::DEFAULT,
                attributes: ConnectionAttributes {
                    name: format!("conn-{}", id),
                    kind: ConnectionKind::Ftp,
                    host: "ftp.gnupg.dk".to_string(),
                    port: 21,
                    is_active: true,
                    dircache: true,
                    user: "anonymous".to_string(),
                    timeout: 2000,
                },
                revision: 1,
                credential_version,
                created_at: now,
                updated_at: now,
            },
            None,
        )
    }

    fn fast_settings() -> BroadcasterSettings {
        BroadcasterSettings {
            retry: RetryConfig {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                backoff_multiplier: 2.0,
            },
            delivery_timeout: Duration::from_millis(200),
            channel_capacity: 16,
            heartbeat_ttl: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn registration_resyncs_from_source() {
        let source = Arc::new(StaticSource::default());
        source.snapshots.lock().await.push(snapshot(1, 1));
        let broadcaster =
            ClusterBroadcaster::new(source.clone(), fast_settings(), MetricsRecorder::new());

        let worker = Arc::new(LocalWorker::new("node-1"));
        broadcaster.register_node(worker.clone());

        let target = SettleTarget::Version(SnapshotVersion::new(1, 1));
        let report =
            broadcaster.await_settled(ConnectionId::new(1), target, Duration::from_secs(2)).await;
        assert!(report.settled);
        assert!(worker.snapshot(ConnectionId::new(1)).await.is_some());
    }

    #[tokio::test]
    async fn announcements_reach_every_node() {
        let source = Arc::new(StaticSource::default());
        let broadcaster =
            ClusterBroadcaster::new(source.clone(), fast_settings(), MetricsRecorder::new());
        let a = Arc::new(LocalWorker::new("a"));
        let b = Arc::new(LocalWorker::new("b"));
        broadcaster.register_node(a.clone());
        broadcaster.register_node(b.clone());

        // The source commits before each announcement, as the registry does.
        *source.snapshots.lock().await = vec![snapshot(7, 0)];
        broadcaster.announce(Announcement::upsert(AnnouncementKind::Created, snapshot(7, 0)));
        *source.snapshots.lock().await = vec![snapshot(7, 1)];
        broadcaster.announce(Announcement::upsert(AnnouncementKind::Updated, snapshot(7, 1)));

        let target = SettleTarget::Version(SnapshotVersion::new(1, 1));
        let report =
            broadcaster.await_settled(ConnectionId::new(7), target, Duration::from_secs(2)).await;
        assert!(report.settled);
        assert_eq!(report.acknowledged.len(), 2);

        source.snapshots.lock().await.clear();
        broadcaster.announce(Announcement::deleted(ConnectionId::new(7), SnapshotVersion::new(1, 2)));
        let report = broadcaster
            .await_settled(ConnectionId::new(7), SettleTarget::Deleted, Duration::from_secs(2))
            .await;
        assert!(report.settled);
        assert!(a.snapshot(ConnectionId::new(7)).await.is_none());
        assert!(b.snapshot(ConnectionId::new(7)).await.is_none());
    }

    #[tokio::test]
    async fn settle_times_out_with_lagging_nodes() {
        let source = Arc::new(StaticSource::default());
        let broadcaster =
            ClusterBroadcaster::new(source.clone(), fast_settings(), MetricsRecorder::new());
        broadcaster.register_node(Arc::new(LocalWorker::new("a")));
        source.snapshots.lock().await.push(snapshot(3, 0));
        broadcaster.announce(Announcement::upsert(AnnouncementKind::Created, snapshot(3, 0)));

        let target = SettleTarget::Version(SnapshotVersion::new(1, 1));
        let report =
            broadcaster.await_settled(ConnectionId::new(3), target, Duration::from_millis(50)).await;
        assert!(!report.settled);
        assert_eq!(report.lagging, vec![NodeId::from("a")]);
    }

    #[tokio::test]
    async fn node_registered_after_delete_counts_as_dropped() {
        let source = Arc::new(StaticSource::default());
        let broadcaster =
            ClusterBroadcaster::new(source.clone(), fast_settings(), MetricsRecorder::new());
        broadcaster.announce(Announcement::upsert(AnnouncementKind::Created, snapshot(4, 0)));
        broadcaster.announce(Announcement::deleted(ConnectionId::new(4), SnapshotVersion::new(1, 0)));

        let late = Arc::new(LocalWorker::new("late"));
        broadcaster.register_node(late.clone());

        let report = broadcaster
            .await_settled(ConnectionId::new(4), SettleTarget::Deleted, Duration::from_secs(2))
            .await;
        assert!(report.settled, "{:?}", report);
        assert_eq!(report.acknowledged, vec![NodeId::from("late")]);
        assert_eq!(late.state(ConnectionId::new(4)).await, None);
    }

    #[tokio::test]
    async fn delivered_deletes_leave_no_ack_entries() {
        let source = Arc::new(StaticSource::default());
        let broadcaster = ClusterBroadcaster::new(source, fast_settings(), MetricsRecorder::new());
        let node_id = broadcaster.register_node(Arc::new(LocalWorker::new("a")));

        for id in 1..=5 {
            broadcaster.announce(Announcement::upsert(AnnouncementKind::Created, snapshot(id, 0)));
            broadcaster.announce(Announcement::deleted(ConnectionId::new(id), SnapshotVersion::new(1, 0)));
        }
        let report = broadcaster
            .await_settled(ConnectionId::new(5), SettleTarget::Deleted, Duration::from_secs(2))
            .await;
        assert!(report.settled);

        let ledger = &broadcaster.inner.context.ledger;
        assert!(ledger.acks.get(&node_id).map(|node| node.is_empty()).unwrap_or(true));
        assert_eq!(ledger.synced_through(&node_id), Some(10));
    }

    #[tokio::test]
    async fn settles_trivially_without_nodes() {
        let broadcaster = ClusterBroadcaster::new(
            Arc::new(StaticSource::default()),
            fast_settings(),
            MetricsRecorder::new(),
        );
        broadcaster.announce(Announcement::upsert(AnnouncementKind::Created, snapshot(1, 0)));
        let report = broadcaster
            .await_settled(ConnectionId::new(1), SettleTarget::Deleted, Duration::from_millis(10))
            .await;
        assert!(report.settled);
    }

    #[tokio::test]
    async fn heartbeat_from_unknown_node_is_not_found() {
        let broadcaster = ClusterBroadcaster::new(
            Arc::new(StaticSource::default()),
            fast_settings(),
            MetricsRecorder::new(),
        );
        assert!(matches!(
            broadcaster.heartbeat(&NodeId::from("ghost")),
            Err(EgressError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn leave_forgets_node() {
        let broadcaster = ClusterBroadcaster::new(
            Arc::new(StaticSource::default()),
            fast_settings(),
            MetricsRecorder::new(),
        );
        let node_id = broadcaster.register_node(Arc::new(LocalWorker::new("a")));
        assert!(broadcaster.leave(&node_id));
        assert!(!broadcaster.leave(&node_id));
        assert!(broadcaster.node_ids().is_empty());
    }
}
