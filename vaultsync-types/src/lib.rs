//! Core type definitions for vaultsync.
//!
//! This crate defines the fundamental types shared by the storage layer and
//! both replication transports:
//! - Device, document and chunk identifiers
//! - Per-path [`Entry`] metadata
//! - The ternary [`Freshness`] comparison

mod entry;
mod freshness;
mod ids;

pub use entry::{now_millis, Entry, FileStat};
pub use freshness::{compare_mtime, truncate_mtime, Freshness, MTIME_RESOLUTION_MS};
pub use ids::{ChunkId, DeviceId, DocumentId, CHUNK_ID_PREFIX, OBFUSCATED_ID_PREFIX};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid chunk id: {0}")]
    InvalidChunkId(String),
}
