//! Outgoing connection definitions and the snapshots workers consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::id::{ClusterId, ConnectionId};
use crate::secrets::SecretString;

/// Type of an outgoing connection. Only FTP is modelled; the registry and
/// vault treat every kind through the same generic schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Ftp,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::Ftp => "ftp",
        }
    }

    /// Whether definitions of this kind carry a vault credential
    pub fn is_credentialed(&self) -> bool {
        match self {
            ConnectionKind::Ftp => true,
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ftp" => Ok(ConnectionKind::Ftp),
            other => Err(format!("unknown connection kind '{}'", other)),
        }
    }
}

/// Non-secret attributes of a definition, exactly as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionAttributes {
    pub name: String,
    pub kind: ConnectionKind,
    pub host: String,
    pub port: u16,
    pub is_active: bool,
    pub dircache: bool,
    pub user: String,
    pub timeout: u32,
}

/// Partial update of [`ConnectionAttributes`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionPatch {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub is_active: Option<bool>,
    pub dircache: Option<bool>,
    pub user: Option<String>,
    pub timeout: Option<u32>,
}

impl ConnectionPatch {
    pub fn is_empty(&self) -> bool {
        *self == ConnectionPatch::default()
    }

    /// Apply onto a copy of `attributes`
    pub fn apply_to(&self, attributes: &ConnectionAttributes) -> ConnectionAttributes {
        ConnectionAttributes {
            name: self.name.clone().unwrap_or_else(|| attributes.name.clone()),
            kind: attributes.kind,
            host: self.host.clone().unwrap_or_else(|| attributes.host.clone()),
            port: self.port.unwrap_or(attributes.port),
            is_active: self.is_active.unwrap_or(attributes.is_active),
            dircache: self.dircache.unwrap_or(attributes.dircache),
            user: self.user.clone().unwrap_or_else(|| attributes.user.clone()),
            timeout: self.timeout.unwrap_or(attributes.timeout),
        }
    }
}

/// A new definition handed to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConnection {
    pub cluster_id: ClusterId,
    pub attributes: ConnectionAttributes,
}

/// A stored definition. `credential_version` is 0 until the vault holds a
/// secret for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDefinition {
    pub id: ConnectionId,
    pub cluster_id: ClusterId,
    #[serde(flatten)]
    pub attributes: ConnectionAttributes,
    pub revision: u64,
    pub credential_version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionDefinition {
    pub fn snapshot_version(&self) -> SnapshotVersion {
        SnapshotVersion::new(self.revision, self.credential_version)
    }
}

/// Position of a definition in its own history.
///
/// Attribute edits advance `revision`, rotations advance `credential_version`,
/// and each serialized mutation advances exactly one of them, so any two
/// snapshots of the same id compare consistently in lexicographic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SnapshotVersion {
    pub revision: u64,
    pub credential_version: u64,
}

impl SnapshotVersion {
    pub const fn new(revision: u64, credential_version: u64) -> Self {
        Self { revision, credential_version }
    }
}

impl Ord for SnapshotVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.revision
            .cmp(&other.revision)
            .then(self.credential_version.cmp(&other.credential_version))
    }
}

impl PartialOrd for SnapshotVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}c{}", self.revision, self.credential_version)
    }
}

/// The complete tuple a worker uses to open outbound connections.
///
/// Only built while the mutation lock for the id is held, so attributes,
/// version and secret always belong to the same committed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinitionSnapshot {
    pub definition: ConnectionDefinition,
    pub secret: Option<SecretString>,
}

impl DefinitionSnapshot {
    pub fn new(definition: ConnectionDefinition, secret: Option<SecretString>) -> Arc<Self> {
        Arc::new(Self { definition, secret })
    }

    pub fn id(&self) -> ConnectionId {
        self.definition.id
    }

    pub fn version(&self) -> SnapshotVersion {
        self.definition.snapshot_version()
    }
}
