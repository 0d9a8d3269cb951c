//! Error types for the sync layer.

use thiserror::Error;
use vaultsync_crypto::CryptoError;
use vaultsync_storage::StorageError;
use vaultsync_types::ChunkId;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote could not be reached or dropped the connection.
    #[error("connection to {peer} failed: {message}")]
    Connection { peer: String, message: String },

    /// The remote answered with an unexpected HTTP status.
    #[error("{peer} returned HTTP {status}: {message}")]
    Http {
        peer: String,
        status: u16,
        message: String,
    },

    /// An update raced a newer remote revision.
    #[error("conflict on {path}")]
    Conflict { path: String },

    /// A chunk is referenced but cannot be found.
    #[error("missing chunk {chunk} (path: {})", .path.as_deref().unwrap_or("?"))]
    MissingChunk {
        chunk: ChunkId,
        path: Option<String>,
    },

    /// A chunk is missing and the file it came from is gone too.
    #[error("data loss: chunk {chunk} of {path} cannot be recovered")]
    DataLoss { path: String, chunk: ChunkId },

    /// Wrong passphrase or rejected credentials. Never retried.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The remote is locked and this device has not been accepted.
    #[error("remote {peer} is locked; mark this device as resolved to continue")]
    Locked { peer: String },

    /// Fetched bytes do not match their content address.
    #[error("checksum mismatch for {key}")]
    ChecksumMismatch { key: String },

    /// Local storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Encryption error other than a failed authentication.
    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local file access error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration or configuration transition.
    #[error("configuration error: {0}")]
    Config(String),

    /// The change is destructive and needs an explicit rebuild.
    #[error("remote rebuild required: {0}")]
    RebuildRequired(String),

    /// The remote does not match this device's hash/chunk configuration.
    #[error("remote configuration mismatch: {0}")]
    RemoteMismatch(String),

    /// The cycle was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Malformed data from the remote.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Object store failure.
    #[error("object store error on {key}: {message}")]
    ObjectStore { key: String, message: String },

    /// Adds the failing operation to an error.
    #[error("{operation}: {source}")]
    Context {
        operation: String,
        #[source]
        source: Box<SyncError>,
    },
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Authentication => {
                Self::Authentication("wrong passphrase or tampered data".to_string())
            }
            other => Self::Crypto(other),
        }
    }
}

impl SyncError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::ObjectStore { .. } => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::Context { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// The innermost error, skipping context wrappers.
    pub fn root(&self) -> &SyncError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self.root(), Self::Authentication(_))
    }

    pub fn is_locked(&self) -> bool {
        matches!(self.root(), Self::Locked { .. })
    }

    /// Wraps this error with the operation that failed.
    #[must_use]
    pub fn context(self, operation: impl Into<String>) -> Self {
        Self::Context {
            operation: operation.into(),
            source: Box::new(self),
        }
    }
}

/// Adds operation context to `SyncResult`s.
pub trait ResultExt<T> {
    fn context(self, operation: impl Into<String>) -> SyncResult<T>;
}

impl<T, E: Into<SyncError>> ResultExt<T> for Result<T, E> {
    fn context(self, operation: impl Into<String>) -> SyncResult<T> {
        self.map_err(|e| e.into().context(operation))
    }
}
