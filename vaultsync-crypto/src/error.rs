//! Error types for the encryption layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Authentication tag did not verify: wrong passphrase or tampered data.
    /// Retrying with the same passphrase can never succeed.
    #[error("authentication failed (wrong passphrase or tampered data)")]
    Authentication,

    /// The ciphertext envelope is malformed.
    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    /// The envelope was written by an unknown format version.
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    /// Encryption was requested without a passphrase.
    #[error("passphrase is empty")]
    EmptyPassphrase,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CryptoError {
    /// Whether this error means the passphrase is wrong.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication)
    }
}
