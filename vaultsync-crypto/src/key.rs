//! Key derivation and management.
//!
//! Uses Argon2id for deriving encryption keys from passphrases. The
//! "iteration count" of the sync configuration maps onto Argon2's time cost.

use crate::error::{CryptoError, CryptoResult};
use argon2::{Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of encryption keys in bytes (256 bits for ChaCha20).
pub const KEY_SIZE: usize = 32;

/// Size of salt in bytes.
pub const SALT_SIZE: usize = 16;

/// A derived encryption key with automatic zeroization on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Creates a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Salt for key derivation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Salt {
    bytes: [u8; SALT_SIZE],
}

impl Salt {
    /// Generates a random salt.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a salt from raw bytes.
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self { bytes }
    }

    /// Returns the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.bytes
    }
}

/// Largest accepted memory cost in KiB (1 GiB).
pub const MAX_MEMORY_COST: u32 = 1024 * 1024;

/// Largest accepted iteration count.
pub const MAX_TIME_COST: u32 = 64;

/// Largest parallelism an envelope header can carry.
pub const MAX_PARALLELISM: u32 = u8::MAX as u32;

/// Key derivation parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Time cost (iterations).
    pub time_cost: u32,
    /// Parallelism factor.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP recommendations for Argon2id (2023)
        Self {
            memory_cost: 19 * 1024, // 19 MiB
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and constrained devices. Not for real vaults.
    pub fn fast() -> Self {
        Self {
            memory_cost: 1024, // 1 MiB
            time_cost: 1,
            parallelism: 1,
        }
    }

    /// Returns a copy with a different iteration count.
    #[must_use]
    pub fn with_time_cost(self, time_cost: u32) -> Self {
        Self {
            time_cost: time_cost.max(1),
            ..self
        }
    }

    /// Checks the parameters against the bounds every envelope must meet.
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_cost > MAX_MEMORY_COST {
            return Err(format!(
                "memory_cost {} KiB exceeds {MAX_MEMORY_COST} KiB",
                self.memory_cost
            ));
        }
        if self.time_cost == 0 || self.time_cost > MAX_TIME_COST {
            return Err(format!(
                "time_cost {} is outside 1..={MAX_TIME_COST}",
                self.time_cost
            ));
        }
        if self.parallelism == 0 || self.parallelism > MAX_PARALLELISM {
            return Err(format!(
                "parallelism {} is outside 1..={MAX_PARALLELISM}",
                self.parallelism
            ));
        }
        Ok(())
    }
}

/// How the iteration count is chosen for each encryption.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum IterationMode {
    /// Always use the same iteration count.
    Fixed { iterations: u32 },
    /// Scale iterations down as payloads grow: one step below `max` for
    /// every doubling past 4 KiB, never below `min`.
    Dynamic { min: u32, max: u32 },
}

impl Default for IterationMode {
    fn default() -> Self {
        Self::Fixed { iterations: 2 }
    }
}

impl IterationMode {
    /// The highest iteration count this mode can produce.
    pub fn max_iterations(&self) -> u32 {
        match *self {
            Self::Fixed { iterations } => iterations.max(1),
            Self::Dynamic { max, .. } => max.max(1),
        }
    }

    /// Iteration count to use for a payload of `len` bytes.
    pub fn iterations_for(&self, len: usize) -> u32 {
        match *self {
            Self::Fixed { iterations } => iterations.max(1),
            Self::Dynamic { min, max } => {
                let upper = max.max(1);
                let lower = min.max(1).min(upper);
                let steps = ((len / 4096) + 1).ilog2();
                upper.saturating_sub(steps).clamp(lower, upper)
            }
        }
    }
}

/// Derives an encryption key from a passphrase using Argon2id.
pub fn derive_key(password: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<DerivedKey> {
    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut key_bytes)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    Ok(DerivedKey::from_bytes(key_bytes))
}

/// Generates a random encryption key.
pub fn generate_random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    DerivedKey::from_bytes(bytes)
}
