//! Credential vault: secret material kept apart from definition attributes.
//!
//! Every connection id has at most one live secret. A rotation replaces the
//! material and bumps the version in a single statement, so no reader can see
//! the new version paired with the old secret or the other way round.
//!
//! Deleting drops the material and records the revocation as one more version.
//! The revoked row stays behind, which keeps `current_version` from ever going
//! backwards and lets a definition whose secret was revoked be told apart from
//! the same definition while the secret was still live.

use async_trait::async_trait;
use sqlx::FromRow;
use tracing::instrument;

use super::encryption::{SealedSecret, SecretEncryption};
use super::error::{Result, SecretsError};
use super::types::SecretString;
use crate::domain::ConnectionId;
use crate::storage::DbPool;

/// A live secret together with the version it was stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedSecret {
    pub version: u64,
    pub secret: SecretString,
}

/// Versioned secret storage keyed by connection id.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    /// Replace the secret for `connection_id`; returns the new version
    /// (previous version + 1, or 1 for the first secret).
    async fn rotate(&self, connection_id: ConnectionId, new_secret: &SecretString) -> Result<u64>;

    /// Current version, 0 if no secret was ever stored.
    async fn current_version(&self, connection_id: ConnectionId) -> Result<u64>;

    /// The live secret and its version, if any.
    async fn reveal(&self, connection_id: ConnectionId) -> Result<Option<VersionedSecret>>;

    /// Drop the live secret if present, bumping the version. Returns whether
    /// anything was removed.
    async fn delete(&self, connection_id: ConnectionId) -> Result<bool>;
}

#[derive(Debug, FromRow)]
struct CredentialRow {
    version: i64,
    ciphertext: Option<Vec<u8>>,
    nonce: Option<Vec<u8>>,
    key_id: Option<String>,
}

fn to_version(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

/// SQLite-backed vault that stores AES-256-GCM sealed material.
#[derive(Debug, Clone)]
pub struct SqlxCredentialVault {
    pool: DbPool,
    encryption: SecretEncryption,
}

impl SqlxCredentialVault {
    pub fn new(pool: DbPool, encryption: SecretEncryption) -> Self {
        Self { pool, encryption }
    }
}

#[async_trait]
impl CredentialVault for SqlxCredentialVault {
    #[instrument(skip(self, new_secret), fields(connection_id = %connection_id), name = "vault_rotate")]
    async fn rotate(&self, connection_id: ConnectionId, new_secret: &SecretString) -> Result<u64> {
        if new_secret.is_empty() {
            return Err(SecretsError::invalid_value("secret material cannot be empty"));
        }
        let sealed = self.encryption.seal(new_secret.expose_secret().as_bytes())?;
        let now = chrono::Utc::now();

        let version: i64 = sqlx::query_scalar(
            "INSERT INTO credentials (connection_id, version, ciphertext, nonce, key_id, revoked, updated_at) \
             VALUES (?1, 1, ?2, ?3, ?4, 0, ?5) \
             ON CONFLICT(connection_id) DO UPDATE SET \
                 version = credentials.version + 1, \
                 ciphertext = excluded.ciphertext, \
                 nonce = excluded.nonce, \
                 key_id = excluded.key_id, \
                 revoked = 0, \
                 updated_at = excluded.updated_at \
             RETURNING version",
        )
        .bind(connection_id)
        .bind(&sealed.ciphertext)
        .bind(&sealed.nonce)
        .bind(&sealed.key_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, connection_id = %connection_id, "Failed to rotate credential");
            SecretsError::rotation_failed(connection_id, e.to_string())
        })?;

        let version = to_version(version);
        tracing::info!(connection_id = %connection_id, version, "Rotated credential");
        Ok(version)
    }

    #[instrument(skip(self), fields(connection_id = %connection_id), name = "vault_current_version")]
    async fn current_version(&self, connection_id: ConnectionId) -> Result<u64> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM credentials WHERE connection_id = ?1")
                .bind(connection_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, connection_id = %connection_id, "Failed to read credential version");
                    SecretsError::from(e)
                })?;

        Ok(version.map(to_version).unwrap_or(0))
    }

    #[instrument(skip(self), fields(connection_id = %connection_id), name = "vault_reveal")]
    async fn reveal(&self, connection_id: ConnectionId) -> Result<Option<VersionedSecret>> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT version, ciphertext, nonce, key_id FROM credentials \
             WHERE connection_id = ?1 AND revoked = 0",
        )
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, connection_id = %connection_id, "Failed to read credential");
            SecretsError::from(e)
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        let (Some(ciphertext), Some(nonce), Some(key_id)) = (row.ciphertext, row.nonce, row.key_id)
        else {
            return Err(SecretsError::backend_error(format!(
                "Live credential for connection {} has no sealed material",
                connection_id
            )));
        };

        let plaintext = self.encryption.open(&SealedSecret { ciphertext, nonce, key_id })?;
        let secret = String::from_utf8(plaintext).map_err(|_| {
            SecretsError::decryption_failed("Credential material is not valid UTF-8")
        })?;

        Ok(Some(VersionedSecret { version: to_version(row.version), secret: SecretString::new(secret) }))
    }

    #[instrument(skip(self), fields(connection_id = %connection_id), name = "vault_delete")]
    async fn delete(&self, connection_id: ConnectionId) -> Result<bool> {
        let now = chrono::Utc::now();
        let result = sqlx::query(
            "UPDATE credentials SET version = version + 1, ciphertext = NULL, nonce = NULL, \
                 key_id = NULL, revoked = 1, updated_at = ?1 \
             WHERE connection_id = ?2 AND revoked = 0",
        )
        .bind(now)
        .bind(connection_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, connection_id = %connection_id, "Failed to revoke credential");
            SecretsError::from(e)
        })?;

        let removed = result.rows_affected() > 0;
        if removed {
            tracing::info!(connection_id = %connection_id, "Revoked credential");
        }
        Ok(removed)
    }
}
