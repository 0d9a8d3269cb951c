//! Content hashing for chunk addressing.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fmt;
use vaultsync_types::ChunkId;
use xxhash_rust::{xxh32::xxh32, xxh64::xxh64};

/// Hash algorithm used to derive chunk ids.
///
/// Changing the algorithm changes every chunk id in the vault, so the
/// remote must be rebuilt afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    #[serde(rename = "xxhash32")]
    XxHash32,
    #[default]
    #[serde(rename = "xxhash64")]
    XxHash64,
    /// Legacy fallback for vaults created before xxhash support.
    Sha1,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::XxHash32 => "xxhash32",
            Self::XxHash64 => "xxhash64",
            Self::Sha1 => "sha1",
        })
    }
}

/// Hashes chunk content into [`ChunkId`]s.
///
/// With a salt, ids no longer reveal the plaintext digest to whoever can
/// read the remote.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentHasher {
    algorithm: HashAlgorithm,
    salt: Option<Vec<u8>>,
}

impl fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentHasher")
            .field("algorithm", &self.algorithm)
            .field("salted", &self.salt.is_some())
            .finish()
    }
}

impl ContentHasher {
    /// Unsalted hasher.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            salt: None,
        }
    }

    /// Hasher salted with a value derived from `passphrase`.
    pub fn with_passphrase(algorithm: HashAlgorithm, passphrase: &str) -> Self {
        let salt = Sha256::digest(passphrase.as_bytes()).to_vec();
        Self {
            algorithm,
            salt: Some(salt),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn is_salted(&self) -> bool {
        self.salt.is_some()
    }

    /// Hex digest of `data` (salt mixed in when configured).
    pub fn digest(&self, data: &[u8]) -> String {
        let salt = self.salt.as_deref().unwrap_or_default();
        match self.algorithm {
            HashAlgorithm::XxHash32 => {
                let seed = xxh32(salt, 0);
                format!("{:08x}{:08x}", xxh32(data, seed), data.len() as u32)
            }
            HashAlgorithm::XxHash64 => {
                let seed = xxh64(salt, 0);
                format!("{:016x}{:x}", xxh64(data, seed), data.len())
            }
            HashAlgorithm::Sha1 => {
                let mut hasher = Sha1::new();
                hasher.update(salt);
                hasher.update(data);
                hex::encode(hasher.finalize())
            }
        }
    }

    /// Chunk id for `data`.
    pub fn hash(&self, data: &[u8]) -> ChunkId {
        ChunkId::from_digest(&self.digest(data))
    }

    /// Short fingerprint of the hashing configuration, stored on the remote
    /// so devices with a mismatched configuration refuse to sync.
    pub fn tweak(&self) -> String {
        let probe = self.digest(b"vaultsync-hash-tweak");
        format!("{}:{}", self.algorithm, &probe[..8.min(probe.len())])
    }
}
