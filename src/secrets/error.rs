//! Error types for credential vault operations.

use thiserror::Error;

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Errors that can occur inside the credential vault.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// No live credential exists for the key.
    #[error("Credential not found: {key}")]
    NotFound { key: String },

    /// Secret value validation failed.
    #[error("Invalid secret value: {reason}")]
    InvalidValue { reason: String },

    /// Rotation could not be committed.
    #[error("Rotation failed for credential '{key}': {reason}")]
    RotationFailed { key: String, reason: String },

    /// Sealing secret material failed.
    #[error("Encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Opening sealed material failed (wrong key or tampering).
    #[error("Decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    /// Backend storage error.
    #[error("Backend error: {message}")]
    BackendError { message: String },

    /// Underlying database error.
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl SecretsError {
    /// Create a not found error.
    pub fn not_found(key: impl ToString) -> Self {
        Self::NotFound { key: key.to_string() }
    }

    /// Create an invalid value error.
    pub fn invalid_value(reason: impl Into<String>) -> Self {
        Self::InvalidValue { reason: reason.into() }
    }

    /// Create a rotation failed error.
    pub fn rotation_failed(key: impl ToString, reason: impl Into<String>) -> Self {
        Self::RotationFailed { key: key.to_string(), reason: reason.into() }
    }

    /// Create an encryption failed error.
    pub fn encryption_failed(reason: impl Into<String>) -> Self {
        Self::EncryptionFailed { reason: reason.into() }
    }

    /// Create a decryption failed error.
    pub fn decryption_failed(reason: impl Into<String>) -> Self {
        Self::DecryptionFailed { reason: reason.into() }
    }

    /// Create a backend error.
    pub fn backend_error(message: impl Into<String>) -> Self {
        Self::BackendError { message: message.into() }
    }

    /// Create a config error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }
}
