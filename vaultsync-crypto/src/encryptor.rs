//! Encryption at the remote boundary.
//!
//! Stores and transports depend on `Arc<dyn ChunkCipher>` and never see the
//! passphrase. `PassphraseEncryptor` is used when end-to-end encryption is
//! enabled; `PassthroughEncryptor` when it is not (and in tests).

use crate::envelope::PassphraseCipher;
use crate::error::CryptoResult;
use crate::key::{IterationMode, KdfParams};
use crate::path::{decrypt_path, encrypt_path};

/// Encrypts chunk payloads and document paths for the remote.
pub trait ChunkCipher: Send + Sync {
    /// Encrypts a chunk payload. The chunk id is bound as associated data,
    /// so a payload swapped under another id fails to open.
    fn seal(&self, chunk_id: &str, data: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Decrypts a payload previously produced by `seal` for the same id.
    fn open(&self, chunk_id: &str, data: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Encrypts a path string for a remote document.
    fn seal_path(&self, path: &str) -> CryptoResult<String>;

    /// Reverses `seal_path`.
    fn open_path(&self, stored: &str) -> CryptoResult<String>;

    /// Whether payloads leaving this device are encrypted.
    fn is_encrypting(&self) -> bool;

    /// Passphrase verifier for the remote milestone, if encrypting.
    fn make_verifier(&self) -> CryptoResult<Option<String>>;

    /// Checks a verifier found on the remote.
    fn test_passphrase(&self, verifier: &str) -> bool;
}

/// No-op cipher. Data passes through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughEncryptor;

impl ChunkCipher for PassthroughEncryptor {
    fn seal(&self, _chunk_id: &str, data: &[u8]) -> CryptoResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn open(&self, _chunk_id: &str, data: &[u8]) -> CryptoResult<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn seal_path(&self, path: &str) -> CryptoResult<String> {
        Ok(path.to_string())
    }

    fn open_path(&self, stored: &str) -> CryptoResult<String> {
        Ok(stored.to_string())
    }

    fn is_encrypting(&self) -> bool {
        false
    }

    fn make_verifier(&self) -> CryptoResult<Option<String>> {
        Ok(None)
    }

    fn test_passphrase(&self, _verifier: &str) -> bool {
        false
    }
}

/// Passphrase-backed cipher.
#[derive(Debug)]
pub struct PassphraseEncryptor {
    cipher: PassphraseCipher,
}

impl PassphraseEncryptor {
    pub fn new(passphrase: &str, params: KdfParams, mode: IterationMode) -> CryptoResult<Self> {
        Ok(Self {
            cipher: PassphraseCipher::new(passphrase, params, mode)?,
        })
    }

    pub fn cipher(&self) -> &PassphraseCipher {
        &self.cipher
    }
}

impl ChunkCipher for PassphraseEncryptor {
    fn seal(&self, chunk_id: &str, data: &[u8]) -> CryptoResult<Vec<u8>> {
        self.cipher.encrypt(data, chunk_id.as_bytes())
    }

    fn open(&self, chunk_id: &str, data: &[u8]) -> CryptoResult<Vec<u8>> {
        self.cipher.decrypt(data, chunk_id.as_bytes())
    }

    fn seal_path(&self, path: &str) -> CryptoResult<String> {
        encrypt_path(&self.cipher, path)
    }

    fn open_path(&self, stored: &str) -> CryptoResult<String> {
        decrypt_path(&self.cipher, stored)
    }

    fn is_encrypting(&self) -> bool {
        true
    }

    fn make_verifier(&self) -> CryptoResult<Option<String>> {
        self.cipher.make_verifier().map(Some)
    }

    fn test_passphrase(&self, verifier: &str) -> bool {
        self.cipher.test_passphrase(verifier)
    }
}
