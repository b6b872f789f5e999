//! # Validated Request Structures
//!
//! Typed requests for every registry operation, with their shape rules
//! declared through `validator`, plus parsers from the flat JSON field sets
//! callers submit.

use serde::Deserialize;
use serde_json::Value;
use validator::Validate;

use super::fields::FieldReader;
use super::{validate_connection_name, validate_host, validate_password, validate_user};
use crate::domain::{
    ClusterId, ConnectionAttributes, ConnectionId, ConnectionKind, ConnectionPatch, NewConnection,
};
use crate::errors::{EgressError, FieldViolation, Result};
use crate::secrets::SecretString;

fn narrow<T: TryFrom<i64>>(field: &str, value: i64) -> Result<T> {
    T::try_from(value).map_err(|_| {
        EgressError::validation_violations(vec![FieldViolation::new(
            field,
            "range",
            format!("{} is out of range", field),
        )])
    })
}

// ============================================================================
// CONNECTION REQUEST STRUCTURES
// ============================================================================

/// Validated request for creating an FTP connection
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateConnectionRequest {
    #[validate(range(min = 1, message = "cluster_id must be positive"))]
    pub cluster_id: i64,

    #[validate(custom(function = "validate_connection_name"))]
    pub name: String,

    pub is_active: bool,

    #[validate(custom(function = "validate_host"))]
    pub host: String,

    #[validate(range(min = 1, max = 65535, message = "port must be between 1 and 65535"))]
    pub port: i64,

    pub dircache: bool,

    #[validate(custom(function = "validate_user"))]
    pub user: String,

    #[validate(range(min = 1, max = 4294967295i64, message = "timeout must be positive"))]
    pub timeout: i64,

    /// Initial secret, stored as credential version 1
    #[validate(custom(function = "validate_password"))]
    pub password: Option<SecretString>,
}

impl CreateConnectionRequest {
    /// Split into the registry definition and the optional initial secret
    pub fn into_parts(self) -> Result<(NewConnection, Option<SecretString>)> {
        let definition = NewConnection {
            cluster_id: ClusterId::new(self.cluster_id),
            attributes: ConnectionAttributes {
                name: self.name,
                kind: ConnectionKind::Ftp,
                host: self.host,
                port: narrow("port", self.port)?,
                is_active: self.is_active,
                dircache: self.dircache,
                user: self.user,
                timeout: narrow("timeout", self.timeout)?,
            },
        };
        Ok((definition, self.password))
    }
}

/// Validated request for rotating the credential of a connection
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(range(min = 1, message = "id must be positive"))]
    pub id: i64,

    #[validate(custom(function = "validate_password"))]
    pub password1: SecretString,

    #[validate(must_match(other = "password1", message = "password1 and password2 must be equal"))]
    pub password2: SecretString,
}

impl ChangePasswordRequest {
    pub fn connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.id)
    }
}

/// Validated request addressing one connection by id
#[derive(Debug, Clone, Copy, Deserialize, Validate)]
pub struct ConnectionIdRequest {
    #[validate(range(min = 1, message = "id must be positive"))]
    pub id: i64,
}

impl ConnectionIdRequest {
    pub fn connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.id)
    }
}

pub type DeleteConnectionRequest = ConnectionIdRequest;
pub type GetConnectionRequest = ConnectionIdRequest;

/// Validated request for listing the connections of a cluster
#[derive(Debug, Clone, Copy, Deserialize, Validate)]
pub struct ListConnectionsRequest {
    #[validate(range(min = 1, message = "cluster_id must be positive"))]
    pub cluster_id: i64,
}

impl ListConnectionsRequest {
    pub fn cluster_id(&self) -> ClusterId {
        ClusterId::new(self.cluster_id)
    }
}

/// Validated request for changing non-secret attributes
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct EditConnectionRequest {
    #[validate(range(min = 1, message = "id must be positive"))]
    pub id: i64,

    #[validate(custom(function = "validate_connection_name"))]
    pub name: Option<String>,

    pub is_active: Option<bool>,

    #[validate(custom(function = "validate_host"))]
    pub host: Option<String>,

    #[validate(range(min = 1, max = 65535, message = "port must be between 1 and 65535"))]
    pub port: Option<i64>,

    pub dircache: Option<bool>,

    #[validate(custom(function = "validate_user"))]
    pub user: Option<String>,

    #[validate(range(min = 1, max = 4294967295i64, message = "timeout must be positive"))]
    pub timeout: Option<i64>,
}

impl EditConnectionRequest {
    pub fn connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.id)
    }

    pub fn to_patch(&self) -> Result<ConnectionPatch> {
        Ok(ConnectionPatch {
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port.map(|p| narrow("port", p)).transpose()?,
            is_active: self.is_active,
            dircache: self.dircache,
            user: self.user.clone(),
            timeout: self.timeout.map(|t| narrow("timeout", t)).transpose()?,
        })
    }
}

/// Edit requests must change at least one attribute
pub fn empty_patch_violation() -> FieldViolation {
    FieldViolation::new("patch", "required", "at least one attribute must be given")
}

// ============================================================================
// RAW REQUEST PARSING
// ============================================================================

pub fn parse_create(raw: &Value) -> Result<CreateConnectionRequest> {
    let mut reader = FieldReader::new(raw);
    let request = CreateConnectionRequest {
        cluster_id: reader.integer("cluster_id").unwrap_or_default(),
        name: reader.string("name").unwrap_or_default(),
        is_active: reader.boolean("is_active").unwrap_or_default(),
        host: reader.string("host").unwrap_or_default(),
        port: reader.integer("port").unwrap_or_default(),
        dircache: reader.boolean("dircache").unwrap_or_default(),
        user: reader.string("user").unwrap_or_default(),
        timeout: reader.integer("timeout").unwrap_or_default(),
        password: reader.optional_secret("password"),
    };
    reader.finish(request)
}

pub fn parse_change_password(raw: &Value) -> Result<ChangePasswordRequest> {
    let mut reader = FieldReader::new(raw);
    let request = ChangePasswordRequest {
        id: reader.integer("id").unwrap_or_default(),
        password1: reader.secret("password1").unwrap_or_else(|| SecretString::new("")),
        password2: reader.secret("password2").unwrap_or_else(|| SecretString::new("")),
    };
    reader.finish(request)
}

pub fn parse_connection_id(raw: &Value) -> Result<ConnectionIdRequest> {
    let mut reader = FieldReader::new(raw);
    let request = ConnectionIdRequest { id: reader.integer("id").unwrap_or_default() };
    reader.finish(request)
}

pub fn parse_list(raw: &Value) -> Result<ListConnectionsRequest> {
    let mut reader = FieldReader::new(raw);
    let request =
        ListConnectionsRequest { cluster_id: reader.integer("cluster_id").unwrap_or_default() };
    reader.finish(request)
}

pub fn parse_edit(raw: &Value) -> Result<EditConnectionRequest> {
    let mut reader = FieldReader::new(raw);
    let request = EditConnectionRequest {
        id: reader.integer("id").unwrap_or_default(),
        name: reader.optional_string("name"),
        is_active: reader.optional_boolean("is_active"),
        host: reader.optional_string("host"),
        port: reader.optional_integer("port"),
        dircache: reader.optional_boolean("dircache"),
        user: reader.optional_string("user"),
        timeout: reader.optional_integer("timeout"),
    };

    let patch_fields = ["name", "is_active", "host", "port", "dircache", "user", "timeout"];
    let mistyped = reader.violations().iter().any(|v| patch_fields.contains(&v.field.as_str()));
    let nothing_given = request.name.is_none()
        && request.is_active.is_none()
        && request.host.is_none()
        && request.port.is_none()
        && request.dircache.is_none()
        && request.user.is_none()
        && request.timeout.is_none();
    if nothing_given && !mistyped {
        let violation = empty_patch_violation();
        reader.violate(&violation.field, &violation.rule, violation.message);
    }

    reader.finish(request)
}
