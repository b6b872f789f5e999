//! Credential storage for outgoing connections.
//!
//! Secret material lives in the [`CredentialVault`], separate from the
//! non-secret definition attributes held by the registry. The vault is
//! versioned independently: each rotation produces exactly one new version and
//! keeps no copy of the previous secret.
//!
//! - [`types`]: [`SecretString`], a zeroizing, redacting string wrapper
//! - [`encryption`]: AES-256-GCM sealing of material at rest
//! - [`vault`]: the [`CredentialVault`] trait and its SQLite implementation
//!
//! # Example
//!
//! ```rust,ignore
//! use egressplane::secrets::{CredentialVault, SecretEncryption, SecretString, SqlxCredentialVault};
//!
//! let vault = SqlxCredentialVault::new(pool, SecretEncryption::ephemeral()?);
//! let version = vault.rotate(id, &SecretString::new("password_test")).await?;
//! assert_eq!(vault.current_version(id).await?, version);
//! ```

pub mod encryption;
pub mod error;
pub mod types;
pub mod vault;

pub use encryption::{SealedSecret, SecretEncryption};
pub use error::SecretsError;
pub use types::SecretString;
pub use vault::{CredentialVault, SqlxCredentialVault, VersionedSecret};
