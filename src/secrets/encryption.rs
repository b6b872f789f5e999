//! AES-256-GCM sealing of credential material at rest.
//!
//! The vault never writes a plaintext password to the database. Each rotation
//! seals the new secret under a fresh random nonce; the nonce and key id are
//! stored next to the ciphertext so that a later key rollover can still open
//! older rows.
//!
//! The master key comes from `encryption.master_key_base64` (environment
//! override `EGRESSPLANE__ENCRYPTION__MASTER_KEY_BASE64`). Without one an
//! ephemeral key is generated, which is only useful for throwaway databases.

use base64::Engine;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use super::error::{Result, SecretsError};
use crate::config::EncryptionConfig;

/// Size of AES-256-GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of AES-256-GCM tag in bytes
const TAG_SIZE: usize = 16;

/// Sealed credential material as stored by the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub key_id: String,
}

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_SIZE]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

/// Secret encryption service
#[derive(Clone)]
pub struct SecretEncryption {
    key_bytes: Arc<[u8; 32]>,
    key_id: String,
    rng: Arc<SystemRandom>,
}

impl SecretEncryption {
    /// Build from a base64-encoded 32 byte key.
    pub fn new(master_key_base64: &str, key_id: impl Into<String>) -> Result<Self> {
        let key_bytes =
            base64::engine::general_purpose::STANDARD.decode(master_key_base64).map_err(|e| {
                SecretsError::config_error(format!("Invalid base64 in master key: {}", e))
            })?;

        if key_bytes.len() != 32 {
            return Err(SecretsError::config_error(format!(
                "Master key must be 32 bytes (256 bits), got {} bytes",
                key_bytes.len()
            )));
        }

        let mut key_array = [0u8; 32];
        key_array.copy_from_slice(&key_bytes);

        let key_id = key_id.into();
        debug!(key_id = %key_id, "Secret encryption service initialized");

        Ok(Self { key_bytes: Arc::new(key_array), key_id, rng: Arc::new(SystemRandom::new()) })
    }

    /// Build from configuration, falling back to an ephemeral key.
    pub fn from_config(config: &EncryptionConfig) -> Result<Self> {
        match config.master_key_base64.as_deref() {
            Some(key) if !key.is_empty() => Self::new(key, config.key_id.clone()),
            _ => {
                warn!(
                    "No master key configured, generating an ephemeral key; \
                     stored credentials will not survive a restart"
                );
                Self::ephemeral()
            }
        }
    }

    /// Random key that lives only as long as this process.
    pub fn ephemeral() -> Result<Self> {
        let rng = SystemRandom::new();
        let mut key = [0u8; 32];
        rng.fill(&mut key)
            .map_err(|_| SecretsError::encryption_failed("Failed to generate ephemeral key"))?;
        Ok(Self {
            key_bytes: Arc::new(key),
            key_id: "ephemeral".to_string(),
            rng: Arc::new(rng),
        })
    }

    /// Current key id, stored alongside every sealed secret
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Seal plaintext under a fresh nonce; the tag is appended to the ciphertext.
    #[instrument(skip(self, plaintext), fields(plaintext_len = plaintext.len()))]
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedSecret> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        self.rng.fill(&mut nonce_bytes).map_err(|_| {
            error!("Failed to generate random nonce");
            SecretsError::encryption_failed("Failed to generate random nonce")
        })?;

        let unbound_key = UnboundKey::new(&AES_256_GCM, &*self.key_bytes).map_err(|_| {
            error!("Failed to create encryption key");
            SecretsError::encryption_failed("Failed to create encryption key")
        })?;

        let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut ciphertext = plaintext.to_vec();
        ciphertext.reserve(TAG_SIZE);

        sealing_key.seal_in_place_append_tag(Aad::empty(), &mut ciphertext).map_err(|_| {
            error!("Encryption failed");
            SecretsError::encryption_failed("Failed to seal credential material")
        })?;

        Ok(SealedSecret {
            ciphertext,
            nonce: nonce_bytes.to_vec(),
            key_id: self.key_id.clone(),
        })
    }

    /// Open a sealed secret produced by [`SecretEncryption::seal`].
    #[instrument(skip(self, sealed), fields(ciphertext_len = sealed.ciphertext.len()))]
    pub fn open(&self, sealed: &SealedSecret) -> Result<Vec<u8>> {
        if sealed.nonce.len() != NONCE_SIZE {
            return Err(SecretsError::decryption_failed(format!(
                "Invalid nonce length: expected {} bytes, got {} bytes",
                NONCE_SIZE,
                sealed.nonce.len()
            )));
        }

        if sealed.ciphertext.len() < TAG_SIZE {
            return Err(SecretsError::decryption_failed(
                "Ciphertext too short (missing authentication tag)",
            ));
        }

        if sealed.key_id != self.key_id {
            return Err(SecretsError::decryption_failed(format!(
                "Secret sealed with key '{}', active key is '{}'",
                sealed.key_id, self.key_id
            )));
        }

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        nonce_bytes.copy_from_slice(&sealed.nonce);

        let unbound_key = UnboundKey::new(&AES_256_GCM, &*self.key_bytes).map_err(|_| {
            error!("Failed to create decryption key");
            SecretsError::decryption_failed("Failed to create decryption key")
        })?;

        let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce_bytes));

        let mut buffer = sealed.ciphertext.clone();
        let plaintext = opening_key.open_in_place(Aad::empty(), &mut buffer).map_err(|_| {
            error!("Decryption failed - possible tampering or wrong key");
            SecretsError::decryption_failed("Authentication tag mismatch")
        })?;

        Ok(plaintext.to_vec())
    }
}

impl std::fmt::Debug for SecretEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretEncryption")
            .field("key_id", &self.key_id)
            .field("key_bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_key() -> SecretEncryption {
        let key = base64::engine::general_purpose::STANDARD.encode([0x42u8; 32]);
        SecretEncryption::new(&key, "test").unwrap()
    }

    #[test]
    fn seal_then_open() {
        let encryption = fixed_key();
        let sealed = encryption.seal(b"password_test").unwrap();

        assert!(sealed.ciphertext.len() > b"password_test".len());
        assert_eq!(sealed.nonce.len(), NONCE_SIZE);
        assert_eq!(sealed.key_id, "test");
        assert_eq!(encryption.open(&sealed).unwrap(), b"password_test");
    }

    #[test]
    fn nonces_are_fresh_per_seal() {
        let encryption = fixed_key();
        let first = encryption.seal(b"same").unwrap();
        let second = encryption.seal(b"same").unwrap();
        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.ciphertext, second.ciphertext);
    }

    #[test]
    fn tampering_is_detected() {
        let encryption = fixed_key();
        let mut sealed = encryption.seal(b"sensitive").unwrap();
        sealed.ciphertext[0] ^= 0xFF;
        assert!(matches!(encryption.open(&sealed), Err(SecretsError::DecryptionFailed { .. })));
    }

    #[test]
    fn foreign_key_id_is_rejected() {
        let encryption = fixed_key();
        let mut sealed = encryption.seal(b"sensitive").unwrap();
        sealed.key_id = "rotated-away".to_string();
        assert!(encryption.open(&sealed).is_err());
    }

    #[test]
    fn short_key_is_rejected() {
        let key = base64::engine::general_purpose::STANDARD.encode([1u8; 16]);
        assert!(matches!(
            SecretEncryption::new(&key, "short"),
            Err(SecretsError::ConfigError { .. })
        ));
    }

    #[test]
    fn ephemeral_keys_differ() {
        let a = SecretEncryption::ephemeral().unwrap();
        let b = SecretEncryption::ephemeral().unwrap();
        let sealed = a.seal(b"x").unwrap();
        // same key id, different key material
        assert!(b.open(&sealed).is_err());
    }
}
