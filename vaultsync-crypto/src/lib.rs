//! Encryption and hashing layer for vaultsync.
//!
//! - Argon2id key derivation with a configurable iteration count
//! - ChaCha20-Poly1305 authenticated encryption in a versioned envelope
//! - Deterministic path obfuscation
//! - Content hashing for chunk ids (xxhash32, xxhash64, SHA-1)
//!
//! Chunk payloads are encrypted only at the remote boundary; the local
//! store keeps plaintext.

pub mod cipher;
pub mod encryptor;
pub mod envelope;
pub mod error;
pub mod hash;
pub mod key;
pub mod path;

pub use cipher::{open, seal, SealedBox, NONCE_SIZE, TAG_SIZE};
pub use encryptor::{ChunkCipher, PassphraseEncryptor, PassthroughEncryptor};
pub use envelope::{
    decrypt_with_passphrase, encrypt_with_passphrase, envelope_version, PassphraseCipher,
    ENVELOPE_VERSION,
};
pub use error::{CryptoError, CryptoResult};
pub use hash::{ContentHasher, HashAlgorithm};
pub use key::{
    derive_key, generate_random_key, DerivedKey, IterationMode, KdfParams, Salt, KEY_SIZE,
    MAX_MEMORY_COST, MAX_PARALLELISM, MAX_TIME_COST, SALT_SIZE,
};
pub use path::{decrypt_path, encrypt_path, is_encrypted_path, obfuscate_path};
