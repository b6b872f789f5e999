//! Mutation coordinator
//!
//! Runs every create, credential change, edit and delete as a staged,
//! serialized operation per connection id:
//!
//! ```text
//! Idle → Staging → Committing → Idle
//!           └────→ Aborted ───→ Idle
//! ```
//!
//! Staging holds the id's lock and validates. Committing writes to the
//! registry and the vault in an order that never orphans a credential. The
//! snapshot handed to the broadcaster is assembled before the lock is
//! released, and the caller gets its answer without waiting for any worker.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument};

use super::locks::IdLockGuard;
use super::snapshot::SnapshotReader;
use crate::cluster::{
    Announcement, AnnouncementKind, ClusterBroadcaster, SettleReport, SettleTarget,
};
use crate::domain::{
    ConnectionDefinition, ConnectionId, DefinitionSnapshot, SnapshotVersion,
};
use crate::errors::{EgressError, ErrorContext, Result};
use crate::mutation_span;
use crate::observability::MetricsRecorder;
use crate::secrets::CredentialVault;
use crate::storage::ConnectionRegistry;
use crate::validation::{
    self, empty_patch_violation, ChangePasswordRequest, CreateConnectionRequest,
    DeleteConnectionRequest, EditConnectionRequest, GetConnectionRequest, ListConnectionsRequest,
};

/// Where a mutation of one id currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    Staging,
    Committing,
    Aborted,
}

/// What a committed mutation produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationOutcome {
    pub id: ConnectionId,
    pub name: String,
    pub kind: AnnouncementKind,
    pub version: SnapshotVersion,
    /// Broadcast sequence of the announcement
    pub sequence: u64,
}

impl MutationOutcome {
    /// The state every worker node holds once this mutation has settled
    pub fn settle_target(&self) -> SettleTarget {
        match self.kind {
            AnnouncementKind::Deleted => SettleTarget::Deleted,
            AnnouncementKind::Created | AnnouncementKind::Updated => {
                SettleTarget::Version(self.version)
            }
        }
    }
}

/// Publishes the phase of one in-flight mutation; back to Idle on drop.
struct PhaseTracker<'a> {
    phases: &'a DashMap<ConnectionId, MutationPhase>,
    id: ConnectionId,
    operation: &'static str,
}

impl<'a> PhaseTracker<'a> {
    fn start(
        phases: &'a DashMap<ConnectionId, MutationPhase>,
        id: ConnectionId,
        operation: &'static str,
    ) -> Self {
        let tracker = Self { phases, id, operation };
        tracker.enter(MutationPhase::Staging);
        tracker
    }

    fn enter(&self, phase: MutationPhase) {
        self.phases.insert(self.id, phase);
        debug!(connection_id = %self.id, operation = self.operation, phase = ?phase, "Mutation phase");
    }

    fn finish<T>(&self, result: &Result<T>) {
        if result.is_err() {
            self.enter(MutationPhase::Aborted);
        }
    }
}

impl Drop for PhaseTracker<'_> {
    fn drop(&mut self) {
        self.phases.remove(&self.id);
    }
}

/// Serializes mutations per connection id and hands committed state to the
/// cluster broadcaster.
#[derive(Clone)]
pub struct MutationCoordinator {
    reader: SnapshotReader,
    broadcaster: ClusterBroadcaster,
    metrics: MetricsRecorder,
    phases: Arc<DashMap<ConnectionId, MutationPhase>>,
}

impl std::fmt::Debug for MutationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationCoordinator")
            .field("in_flight", &self.phases.len())
            .field("broadcaster", &self.broadcaster)
            .finish()
    }
}

impl MutationCoordinator {
    pub fn new(
        reader: SnapshotReader,
        broadcaster: ClusterBroadcaster,
        metrics: MetricsRecorder,
    ) -> Self {
        Self { reader, broadcaster, metrics, phases: Arc::new(DashMap::new()) }
    }

    pub fn broadcaster(&self) -> &ClusterBroadcaster {
        &self.broadcaster
    }

    pub fn reader(&self) -> &SnapshotReader {
        &self.reader
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    fn registry(&self) -> &dyn ConnectionRegistry {
        self.reader.registry().as_ref()
    }

    fn vault(&self) -> &dyn CredentialVault {
        self.reader.vault().as_ref()
    }

    /// Current phase of the mutation on `id`, `Idle` if none is running
    pub fn phase(&self, id: ConnectionId) -> MutationPhase {
        self.phases.get(&id).map(|p| *p).unwrap_or(MutationPhase::Idle)
    }

    /// Wait until every worker node reflects `outcome`
    pub async fn settle(&self, outcome: &MutationOutcome, timeout: Duration) -> SettleReport {
        self.broadcaster.await_settled(outcome.id, outcome.settle_target(), timeout).await
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Store a new definition and, when given, its initial secret.
    pub async fn create(&self, request: CreateConnectionRequest) -> Result<MutationOutcome> {
        let started = Instant::now();
        let span = mutation_span!("create");
        let result = self.create_inner(request).instrument(span).await;
        self.record("create", started, &result);
        result
    }

    async fn create_inner(&self, request: CreateConnectionRequest) -> Result<MutationOutcome> {
        // A new definition has no id to serialize on until the registry
        // assigns one, so its rules are checked first.
        validation::check(&request)?;
        let (definition, password) = request.into_parts()?;

        let id = self.registry().create(definition).await?;
        tracing::Span::current().record("connection_id", tracing::field::display(id));

        let guard = match self.lock(id).await {
            Ok(guard) => guard,
            Err(e) => {
                self.compensate_create(id).await;
                self.reader.locks().forget(id);
                return Err(e);
            }
        };
        let phase = PhaseTracker::start(&self.phases, id, "create");

        let result: Result<MutationOutcome> = async {
            let record = self.registry().read(id).await?;
            phase.enter(MutationPhase::Committing);

            let (version, secret) = match password {
                Some(password) => match self.vault().rotate(id, &password).await {
                    Ok(version) => (version, Some(password)),
                    Err(e) => {
                        self.compensate_create(id).await;
                        return Err(e.into());
                    }
                },
                None => self.reader.credential(&guard, id).await?,
            };

            let snapshot = DefinitionSnapshot::new(record.into_definition(version), secret);
            Ok(self.publish(Announcement::upsert(AnnouncementKind::Created, snapshot)))
        }
        .await;

        phase.finish(&result);
        drop(phase);
        drop(guard);
        if result.is_err() {
            self.reader.locks().forget(id);
        }
        result
    }

    /// Undo a definition whose caller will never learn its id.
    async fn compensate_create(&self, id: ConnectionId) {
        match self.registry().delete(id).await {
            Ok(()) => warn!(connection_id = %id, "Rolled back connection after failed create"),
            Err(e) => error!(
                connection_id = %id,
                error = %e,
                "Failed to roll back connection after failed create"
            ),
        }
    }

    /// Rotate the credential of an existing definition.
    pub async fn change_credential(&self, request: ChangePasswordRequest) -> Result<MutationOutcome> {
        let started = Instant::now();
        let id = request.connection_id();
        let span = mutation_span!("change_credential", id);
        let result: Result<MutationOutcome> = async {
            let guard = self.lock(id).await?;
            let phase = PhaseTracker::start(&self.phases, id, "change_credential");
            let result = self.change_credential_staged(&guard, &phase, request).await;
            phase.finish(&result);
            drop(phase);
            drop(guard);
            self.reader.locks().forget_if_missing(id, &result);
            result
        }
        .instrument(span)
        .await;
        self.record("change_credential", started, &result);
        result
    }

    async fn change_credential_staged(
        &self,
        _guard: &IdLockGuard,
        phase: &PhaseTracker<'_>,
        request: ChangePasswordRequest,
    ) -> Result<MutationOutcome> {
        validation::check(&request)?;
        let id = request.connection_id();
        // The vault does not know which ids exist; never store a secret for
        // a definition that is gone.
        let record = self.registry().read(id).await?;

        phase.enter(MutationPhase::Committing);
        let version = self
            .vault()
            .rotate(id, &request.password1)
            .await
            .context(format!("Rotating credential of connection {}", id))?;

        let snapshot =
            DefinitionSnapshot::new(record.into_definition(version), Some(request.password1));
        Ok(self.publish(Announcement::upsert(AnnouncementKind::Updated, snapshot)))
    }

    /// Change non-secret attributes of an existing definition.
    pub async fn edit(&self, request: EditConnectionRequest) -> Result<MutationOutcome> {
        let started = Instant::now();
        let id = request.connection_id();
        let span = mutation_span!("edit", id);
        let result: Result<MutationOutcome> = async {
            let guard = self.lock(id).await?;
            let phase = PhaseTracker::start(&self.phases, id, "edit");
            let result = self.edit_staged(&guard, &phase, request).await;
            phase.finish(&result);
            drop(phase);
            drop(guard);
            self.reader.locks().forget_if_missing(id, &result);
            result
        }
        .instrument(span)
        .await;
        self.record("edit", started, &result);
        result
    }

    async fn edit_staged(
        &self,
        guard: &IdLockGuard,
        phase: &PhaseTracker<'_>,
        request: EditConnectionRequest,
    ) -> Result<MutationOutcome> {
        validation::check(&request)?;
        let patch = request.to_patch()?;
        if patch.is_empty() {
            return Err(EgressError::validation_violations(vec![empty_patch_violation()]));
        }
        let id = request.connection_id();
        let (version, secret) = self.reader.credential(guard, id).await?;

        phase.enter(MutationPhase::Committing);
        let record = self.registry().update(id, &patch).await?;

        let snapshot = DefinitionSnapshot::new(record.into_definition(version), secret);
        Ok(self.publish(Announcement::upsert(AnnouncementKind::Updated, snapshot)))
    }

    /// Revoke the credential, then remove the definition.
    pub async fn delete(&self, request: DeleteConnectionRequest) -> Result<MutationOutcome> {
        let started = Instant::now();
        let id = request.connection_id();
        let span = mutation_span!("delete", id);
        let result: Result<MutationOutcome> = async {
            let guard = self.lock(id).await?;
            let phase = PhaseTracker::start(&self.phases, id, "delete");
            let result = self.delete_staged(&guard, &phase, request).await;
            phase.finish(&result);
            drop(phase);
            drop(guard);
            if result.is_ok() {
                self.reader.locks().forget(id);
            } else {
                self.reader.locks().forget_if_missing(id, &result);
            }
            result
        }
        .instrument(span)
        .await;
        self.record("delete", started, &result);
        result
    }

    async fn delete_staged(
        &self,
        _guard: &IdLockGuard,
        phase: &PhaseTracker<'_>,
        request: DeleteConnectionRequest,
    ) -> Result<MutationOutcome> {
        validation::check(&request)?;
        let id = request.connection_id();
        let record = self.registry().read(id).await?;
        let previous = self.vault().current_version(id).await?;

        phase.enter(MutationPhase::Committing);
        let revoked = self
            .vault()
            .delete(id)
            .await
            .context(format!("Revoking credential of connection {}", id))?;
        let version = if revoked { previous + 1 } else { previous };

        if let Err(e) = self.registry().delete(id).await {
            error!(connection_id = %id, error = %e, revoked, "Failed to delete connection");
            if revoked {
                // The definition survives without a secret; workers must stop
                // using the revoked one.
                let snapshot = DefinitionSnapshot::new(record.into_definition(version), None);
                self.publish(Announcement::upsert(AnnouncementKind::Updated, snapshot));
            }
            return Err(e);
        }

        let name = record.attributes.name;
        let announcement = Announcement::deleted(id, SnapshotVersion::new(record.revision, version));
        let mut outcome = self.publish(announcement);
        outcome.name = name;
        Ok(outcome)
    }

    /// One definition with its current credential version
    #[tracing::instrument(skip(self), fields(connection_id = request.id), name = "coordinator_get")]
    pub async fn get(&self, request: GetConnectionRequest) -> Result<ConnectionDefinition> {
        validation::check(&request)?;
        self.reader.read(request.connection_id()).await
    }

    /// Every definition of a cluster
    #[tracing::instrument(skip(self), fields(cluster_id = request.cluster_id), name = "coordinator_list")]
    pub async fn list(&self, request: ListConnectionsRequest) -> Result<Vec<ConnectionDefinition>> {
        validation::check(&request)?;
        self.reader.list(request.cluster_id()).await
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn lock(&self, id: ConnectionId) -> Result<IdLockGuard> {
        let guard = self.reader.locks().acquire(id).await.inspect_err(|_| {
            warn!(connection_id = %id, "Timed out waiting for connection lock");
        })?;
        self.metrics.record_lock_wait(guard.waited().as_secs_f64());
        Ok(guard)
    }

    fn publish(&self, announcement: Announcement) -> MutationOutcome {
        let id = announcement.connection_id;
        let kind = announcement.kind;
        let version = announcement.version;
        let name = announcement
            .snapshot
            .as_ref()
            .map(|s| s.definition.attributes.name.clone())
            .unwrap_or_default();

        let sequence = self.broadcaster.announce(announcement);
        info!(connection_id = %id, kind = %kind, version = %version, sequence, "Mutation committed");

        MutationOutcome { id, name, kind, version, sequence }
    }

    fn record<T>(&self, operation: &str, started: Instant, result: &Result<T>) {
        self.metrics.record_mutation(operation, result.is_ok(), started.elapsed().as_secs_f64());
        match result {
            Err(e @ EgressError::Validation { .. }) => {
                self.metrics.record_validation_failure(operation, e.violations().len());
                debug!(operation, error = %e, "Mutation rejected");
            }
            Err(e @ EgressError::Busy { .. }) => {
                self.metrics.record_lock_timeout(operation);
                debug!(operation, error = %e, "Mutation rejected");
            }
            Err(e @ (EgressError::NotFound { .. } | EgressError::DuplicateOrInvalid { .. })) => {
                debug!(operation, error = %e, "Mutation rejected");
            }
            Err(e) => error!(operation, error = %e, "Mutation failed"),
            Ok(_) => {}
        }
    }
}
