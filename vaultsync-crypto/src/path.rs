//! Path obfuscation and path encryption.
//!
//! Obfuscation turns a path into a deterministic opaque document id so the
//! same path always maps to the same remote document. Path encryption is
//! reversible and is used for the `path` field carried inside documents.

use crate::envelope::PassphraseCipher;
use crate::error::CryptoResult;
use sha2::{Digest, Sha256};
use vaultsync_types::DocumentId;

/// Prefix marking an encrypted path string.
pub const ENCRYPTED_PATH_PREFIX: &str = "enc:";

const PATH_AAD: &[u8] = b"path";

/// Deterministic opaque id for `path`.
pub fn obfuscate_path(path: &str, passphrase: &str) -> DocumentId {
    let key = Sha256::digest(passphrase.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update([0u8]);
    hasher.update(path.as_bytes());
    DocumentId::obfuscated(&hex::encode(hasher.finalize()))
}

/// Encrypts a path for storage inside a remote document.
pub fn encrypt_path(cipher: &PassphraseCipher, path: &str) -> CryptoResult<String> {
    Ok(format!(
        "{ENCRYPTED_PATH_PREFIX}{}",
        cipher.encrypt_string(path, PATH_AAD)?
    ))
}

/// Reverses [`encrypt_path`]. Plain paths are returned unchanged.
pub fn decrypt_path(cipher: &PassphraseCipher, stored: &str) -> CryptoResult<String> {
    match stored.strip_prefix(ENCRYPTED_PATH_PREFIX) {
        Some(encoded) => cipher.decrypt_string(encoded, PATH_AAD),
        None => Ok(stored.to_string()),
    }
}

/// Whether `stored` was produced by [`encrypt_path`].
pub fn is_encrypted_path(stored: &str) -> bool {
    stored.starts_with(ENCRYPTED_PATH_PREFIX)
}
