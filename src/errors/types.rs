//! # Error Types
//!
//! Error taxonomy for the egressplane control plane using `thiserror`.
//!
//! Synchronous failures (`Validation`, `NotFound`, `DuplicateOrInvalid`, `Busy`,
//! store failures) are returned to the caller of a mutation. `PropagationDegraded`
//! is produced by the broadcaster in the background and only ever reaches
//! observability sinks; it never unwinds a committed mutation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::secrets::SecretsError;

/// Custom result type for egressplane operations
pub type Result<T> = std::result::Result<T, EgressError>;

/// A single violated validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub rule: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(
        field: impl Into<String>,
        rule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self { field: field.into(), rule: rule.into(), message: message.into() }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Main error type for the egressplane control plane
#[derive(thiserror::Error, Debug)]
pub enum EgressError {
    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database and storage errors
    #[error("Database error: {context}")]
    Database {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// Request validation errors, carrying every violated rule
    #[error("Validation error: {message}")]
    Validation { message: String, violations: Vec<FieldViolation> },

    /// Resource not found errors
    #[error("Resource not found: {resource_type} with ID '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Unknown owning cluster or a name clash inside a cluster
    #[error("Duplicate or invalid {resource_type}: {message}")]
    DuplicateOrInvalid { message: String, resource_type: String },

    /// Per-resource serialization could not be acquired in time
    #[error("Resource busy: {resource_type} '{id}' still locked after {waited_ms}ms")]
    Busy { resource_type: String, id: String, waited_ms: u64 },

    /// Registry or vault write failure that is not a plain database error
    #[error("Store failure: {message}")]
    StoreFailure {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A worker node did not acknowledge within its retry budget
    #[error("Propagation degraded on node '{node_id}': {message}")]
    PropagationDegraded { node_id: String, message: String },

    /// Internal server errors
    #[error("Internal server error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Stable, transport-neutral classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    DuplicateOrInvalid,
    Busy,
    StoreFailure,
    PropagationDegraded,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::DuplicateOrInvalid => "duplicate_or_invalid",
            ErrorKind::Busy => "busy",
            ErrorKind::StoreFailure => "store_failure",
            ErrorKind::PropagationDegraded => "propagation_degraded",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EgressError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    /// Create a validation error without field details
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), violations: Vec::new() }
    }

    /// Create a validation error listing every violated rule
    pub fn validation_violations(violations: Vec<FieldViolation>) -> Self {
        let message = violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
        Self::Validation { message, violations }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: ToString>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.to_string() }
    }

    /// Create a duplicate-or-invalid error
    pub fn duplicate_or_invalid<M: Into<String>, R: Into<String>>(
        message: M,
        resource_type: R,
    ) -> Self {
        Self::DuplicateOrInvalid { message: message.into(), resource_type: resource_type.into() }
    }

    /// Create a busy error for a lock that was not acquired in time
    pub fn busy<R: Into<String>, I: ToString>(resource_type: R, id: I, waited_ms: u64) -> Self {
        Self::Busy { resource_type: resource_type.into(), id: id.to_string(), waited_ms }
    }

    /// Create a store failure
    pub fn store_failure<S: Into<String>>(message: S) -> Self {
        Self::StoreFailure { message: message.into(), source: None }
    }

    /// Create a propagation degraded signal
    pub fn propagation_degraded<N: Into<String>, M: Into<String>>(node_id: N, message: M) -> Self {
        Self::PropagationDegraded { node_id: node_id.into(), message: message.into() }
    }

    /// Create an internal server error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Wrap a database error with context
    pub fn database<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::Database { source, context: context.into() }
    }

    /// Add context to an error (used by ErrorContext trait)
    pub(crate) fn add_context(&mut self, context: String) {
        match self {
            EgressError::Io { context: ref mut ctx, .. }
            | EgressError::Database { context: ref mut ctx, .. }
            | EgressError::Serialization { context: ref mut ctx, .. } => {
                *ctx = format!("{}: {}", context, ctx);
            }
            EgressError::StoreFailure { message: ref mut msg, .. }
            | EgressError::Internal { message: ref mut msg, .. } => {
                *msg = format!("{}: {}", context, msg);
            }
            _ => {}
        }
    }

    /// Transport-neutral classification used by the result envelope
    pub fn kind(&self) -> ErrorKind {
        match self {
            EgressError::Validation { .. } | EgressError::Serialization { .. } => {
                ErrorKind::Validation
            }
            EgressError::NotFound { .. } => ErrorKind::NotFound,
            EgressError::DuplicateOrInvalid { .. } => ErrorKind::DuplicateOrInvalid,
            EgressError::Busy { .. } => ErrorKind::Busy,
            EgressError::Database { .. } | EgressError::Io { .. } | EgressError::StoreFailure { .. } => {
                ErrorKind::StoreFailure
            }
            EgressError::PropagationDegraded { .. } => ErrorKind::PropagationDegraded,
            EgressError::Config { .. } => ErrorKind::Config,
            EgressError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Get the HTTP status code an HTTP collaborator should return for this error
    pub fn status_code(&self) -> u16 {
        match self {
            EgressError::Config { .. } => 500,
            EgressError::Database { .. } => 500,
            EgressError::Io { .. } => 500,
            EgressError::Serialization { .. } => 400,
            EgressError::Validation { .. } => 400,
            EgressError::NotFound { .. } => 404,
            EgressError::DuplicateOrInvalid { .. } => 409,
            EgressError::Busy { .. } => 409,
            EgressError::StoreFailure { .. } => 500,
            EgressError::PropagationDegraded { .. } => 503,
            EgressError::Internal { .. } => 500,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EgressError::Database { .. }
                | EgressError::Io { .. }
                | EgressError::Busy { .. }
                | EgressError::PropagationDegraded { .. }
        )
    }

    /// Violated rules, empty for anything but validation errors
    pub fn violations(&self) -> &[FieldViolation] {
        match self {
            EgressError::Validation { violations, .. } => violations,
            _ => &[],
        }
    }
}

// Error conversions for common external error types
impl From<sqlx::Error> for EgressError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database { source: error, context: "Database operation failed".to_string() }
    }
}

impl From<sqlx::migrate::MigrateError> for EgressError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::StoreFailure {
            message: "Database migration failed".to_string(),
            source: Some(Box::new(error)),
        }
    }
}

impl From<std::io::Error> for EgressError {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for EgressError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<config::ConfigError> for EgressError {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<SecretsError> for EgressError {
    fn from(error: SecretsError) -> Self {
        match error {
            SecretsError::NotFound { key } => Self::not_found("credential", key),
            SecretsError::InvalidValue { reason } => {
                Self::validation_violations(vec![FieldViolation::new("password", "invalid", reason)])
            }
            other => Self::StoreFailure {
                message: "Credential vault operation failed".to_string(),
                source: Some(Box::new(other)),
            },
        }
    }
}

impl FieldViolation {
    /// Flatten derive-based validation errors into violations sorted by field
    pub fn from_validation_errors(errors: &validator::ValidationErrors) -> Vec<FieldViolation> {
        let mut violations: Vec<FieldViolation> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, field_errors)| {
                field_errors.iter().map(move |e| {
                    FieldViolation::new(
                        field.to_string(),
                        e.code.to_string(),
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string()),
                    )
                })
            })
            .collect();
        violations.sort_by(|a, b| a.field.cmp(&b.field).then_with(|| a.rule.cmp(&b.rule)));
        violations
    }
}

impl From<validator::ValidationErrors> for EgressError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::validation_violations(FieldViolation::from_validation_errors(&errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = EgressError::config("Test configuration error");
        assert!(matches!(error, EgressError::Config { .. }));
        assert_eq!(error.to_string(), "Configuration error: Test configuration error");
    }

    #[test]
    fn test_validation_violations_message() {
        let error = EgressError::validation_violations(vec![
            FieldViolation::new("port", "type", "expected integer"),
            FieldViolation::new("password2", "must_match", "passwords do not match"),
        ]);
        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(error.violations().len(), 2);
        assert_eq!(
            error.to_string(),
            "Validation error: port: expected integer; password2: passwords do not match"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(EgressError::validation("test").status_code(), 400);
        assert_eq!(EgressError::not_found("connection", 7).status_code(), 404);
        assert_eq!(EgressError::duplicate_or_invalid("x", "connection").status_code(), 409);
        assert_eq!(EgressError::busy("connection", 7, 50).status_code(), 409);
        assert_eq!(EgressError::internal("test").status_code(), 500);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(EgressError::not_found("connection", 1).kind(), ErrorKind::NotFound);
        assert_eq!(EgressError::store_failure("disk").kind(), ErrorKind::StoreFailure);
        assert_eq!(
            EgressError::from(sqlx::Error::RowNotFound).kind(),
            ErrorKind::StoreFailure
        );
        assert_eq!(ErrorKind::DuplicateOrInvalid.as_str(), "duplicate_or_invalid");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(EgressError::busy("connection", 1, 10).is_retryable());
        assert!(EgressError::propagation_degraded("node-1", "timeout").is_retryable());
        assert!(!EgressError::validation("test").is_retryable());
        assert!(!EgressError::not_found("connection", 1).is_retryable());
    }

    #[test]
    fn test_secrets_error_conversion() {
        let err: EgressError = SecretsError::not_found("42").into();
        assert!(matches!(err, EgressError::NotFound { ref id, .. } if id == "42"));

        let err: EgressError = SecretsError::backend_error("disk full").into();
        assert_eq!(err.kind(), ErrorKind::StoreFailure);
    }

    #[test]
    fn test_error_conversions() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: EgressError = io_error.into();
        assert!(matches!(error, EgressError::Io { .. }));

        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: EgressError = json_error.into();
        assert!(matches!(error, EgressError::Serialization { .. }));
    }
}
