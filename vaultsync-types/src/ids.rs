//! Identifier types used throughout the vaultsync core.
//!
//! Devices use random UUID v4. Documents and chunks use string identifiers because
//! they are derived from paths and content hashes respectively, and travel
//! verbatim as remote document ids / object keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix carried by every chunk id.
pub const CHUNK_ID_PREFIX: &str = "h:";

/// Prefix carried by obfuscated document ids.
pub const OBFUSCATED_ID_PREFIX: &str = "f:";

/// Unique identifier for a device participating in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Creates a new device ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a device ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses a device ID from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Stable identifier of a document (one per vault path).
///
/// Either the path itself (escaped so it never collides with reserved
/// ids starting with `_`) or an opaque digest prefixed with `f:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Derives a plain (non-obfuscated) id from a vault path.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        if path.starts_with('_') {
            Self(format!("/{path}"))
        } else {
            Self(path.to_string())
        }
    }

    /// Wraps a hex digest produced by path obfuscation.
    #[must_use]
    pub fn obfuscated(digest_hex: &str) -> Self {
        Self(format!("{OBFUSCATED_ID_PREFIX}{digest_hex}"))
    }

    /// Wraps an id received from a remote without re-deriving it.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Whether this id was produced by path obfuscation.
    #[must_use]
    pub fn is_obfuscated(&self) -> bool {
        self.0.starts_with(OBFUSCATED_ID_PREFIX)
    }

    /// Returns the raw id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content address of a chunk: `h:` followed by the hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    /// Builds a chunk id from a hex digest.
    #[must_use]
    pub fn from_digest(digest_hex: &str) -> Self {
        Self(format!("{CHUNK_ID_PREFIX}{digest_hex}"))
    }

    /// Returns the hex digest without the prefix.
    #[must_use]
    pub fn digest(&self) -> &str {
        self.0.strip_prefix(CHUNK_ID_PREFIX).unwrap_or(&self.0)
    }

    /// Returns the full id string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChunkId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.strip_prefix(CHUNK_ID_PREFIX) {
            Some(digest) if !digest.is_empty() && digest.chars().all(|c| c.is_ascii_hexdigit()) => {
                Ok(Self(s.to_string()))
            }
            _ => Err(crate::Error::InvalidChunkId(s.to_string())),
        }
    }
}
