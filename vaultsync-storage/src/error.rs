//! Error types for the storage layer.

use thiserror::Error;
use vaultsync_types::ChunkId;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A referenced chunk is in neither Eden nor the durable tier.
    #[error("missing chunk: {0}")]
    MissingChunk(ChunkId),

    /// Chunk bytes do not hash to the id they were stored under.
    #[error("chunk {id} does not match its content (got {actual})")]
    HashMismatch { id: ChunkId, actual: ChunkId },

    /// Entry not found.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// Invalid data.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    /// The chunk this error is about, if any.
    pub fn chunk_id(&self) -> Option<&ChunkId> {
        match self {
            Self::MissingChunk(id) | Self::HashMismatch { id, .. } => Some(id),
            _ => None,
        }
    }
}
