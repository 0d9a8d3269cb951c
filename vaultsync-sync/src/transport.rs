//! Replication transport abstraction.
//!
//! Defines the [`Replicator`] trait both remotes implement and the
//! [`ReplicationContext`] the engine hands to every call, so transports
//! never own local state.

use crate::applier::EntryApplier;
use crate::config::{EngineConfig, RemoteConfig, ReplicationConfig};
use crate::couchdb::{CouchDbClient, DocumentReplicator};
use crate::error::{SyncError, SyncResult};
use crate::fence::CancelToken;
use crate::journal::{JournalReplicator, S3ObjectStore};
use crate::lock::Milestone;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use vaultsync_crypto::ChunkCipher;
use vaultsync_storage::{ChunkStore, DocumentStore, LocalBackend, StorageError};
use vaultsync_types::{ChunkId, DeviceId, Entry};

/// Everything a transport needs from the local side for one call.
#[derive(Clone)]
pub struct ReplicationContext {
    pub device_id: DeviceId,
    pub documents: Arc<DocumentStore>,
    pub chunks: Arc<ChunkStore>,
    /// Meta table for cursors and checkpoints.
    pub backend: Arc<dyn LocalBackend>,
    pub applier: Arc<EntryApplier>,
    pub cipher: Arc<dyn ChunkCipher>,
    pub cancel: CancelToken,
    /// Caps simultaneous chunk fetch/verify operations.
    pub fetch_limit: Arc<Semaphore>,
    pub settings: ReplicationConfig,
}

/// Counters for one replication call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    /// Entries sent to the remote.
    pub sent: usize,
    /// Remote entries applied locally.
    pub received: usize,
    pub chunks_sent: usize,
    pub chunks_fetched: usize,
    /// Received entries left in the conflict queue.
    pub conflicts: usize,
}

impl ReplicationStats {
    pub fn merge(&mut self, other: ReplicationStats) {
        self.sent += other.sent;
        self.received += other.received;
        self.chunks_sent += other.chunks_sent;
        self.chunks_fetched += other.chunks_fetched;
        self.conflicts += other.conflicts;
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Snapshot of the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStatus {
    pub peer: String,
    /// Documents or objects on the remote, chunks included.
    pub documents: u64,
    /// Remote change sequence, where the remote has one.
    pub update_seq: Option<String>,
    pub milestone: Option<Milestone>,
}

/// Which replication history to forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetScope {
    Full,
    SentOnly,
    ReceivedOnly,
}

impl ResetScope {
    pub fn resets_sent(self) -> bool {
        matches!(self, Self::Full | Self::SentOnly)
    }

    pub fn resets_received(self) -> bool {
        matches!(self, Self::Full | Self::ReceivedOnly)
    }
}

/// A remote the engine can replicate with.
#[async_trait]
pub trait Replicator: Send + Sync {
    /// Label used in logs and errors.
    fn peer(&self) -> String;

    /// Checks the remote is reachable and usable, creating it if needed.
    async fn try_connect(&self) -> SyncResult<()>;

    /// Sends local changes and applies remote ones.
    async fn push_pull(&self, ctx: &ReplicationContext) -> SyncResult<ReplicationStats>;

    async fn remote_status(&self) -> SyncResult<RemoteStatus>;

    async fn milestone(&self) -> SyncResult<Option<Milestone>>;

    async fn put_milestone(&self, milestone: &Milestone) -> SyncResult<()>;

    /// Uploads chunks regardless of what the remote is believed to hold.
    async fn send_chunks(&self, ctx: &ReplicationContext, ids: &[ChunkId]) -> SyncResult<usize>;

    /// Fetches chunks into the local store.
    async fn fetch_chunks(
        &self,
        ctx: &ReplicationContext,
        ids: &[ChunkId],
        path: Option<&str>,
    ) -> SyncResult<usize>;

    /// Latest entry per document on the remote, with paths opened.
    async fn remote_entries(&self, ctx: &ReplicationContext) -> SyncResult<Vec<Entry>>;

    /// Sends entries (and their chunks) outside the change cursor.
    async fn push_entries(&self, ctx: &ReplicationContext, entries: &[Entry]) -> SyncResult<usize>;

    /// Deletes everything on the remote and leaves it empty but usable.
    async fn wipe(&self) -> SyncResult<()>;

    /// Asks the remote to reclaim space, where supported.
    async fn compact_remote(&self) -> SyncResult<()>;

    /// Forgets replication history so the next cycle re-examines it.
    fn reset_checkpoint(&self, ctx: &ReplicationContext, scope: ResetScope) -> SyncResult<()>;
}

/// The configured transport, selected once per engine.
pub enum Transport {
    DocumentReplication(DocumentReplicator),
    Journal(JournalReplicator),
}

impl Transport {
    /// Builds the transport named by `config.remote`.
    pub fn from_config(config: &EngineConfig) -> SyncResult<Self> {
        Ok(match &config.remote {
            RemoteConfig::CouchDb { .. } => {
                let client = CouchDbClient::from_config(&config.remote)?;
                Self::DocumentReplication(DocumentReplicator::new(Arc::new(client)))
            }
            RemoteConfig::ObjectStore { .. } => {
                let store = S3ObjectStore::from_config(&config.remote)?;
                Self::Journal(JournalReplicator::new(Arc::new(store)))
            }
        })
    }

    pub fn replicator(&self) -> &dyn Replicator {
        match self {
            Self::DocumentReplication(r) => r,
            Self::Journal(r) => r,
        }
    }
}

/// Source of sealed chunk payloads.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    async fn fetch_sealed(&self, id: &ChunkId) -> SyncResult<Option<Vec<u8>>>;
}

/// Fetches the chunks of `ids` that are not stored locally, opens and
/// verifies them, and stores them. A payload that does not hash to its id
/// is fetched once more before `ChecksumMismatch` is reported.
pub async fn fetch_missing(
    ctx: &ReplicationContext,
    source: &dyn ChunkSource,
    ids: &[ChunkId],
    path: Option<&str>,
) -> SyncResult<usize> {
    let missing = ctx.chunks.missing(ids)?;
    if missing.is_empty() {
        return Ok(0);
    }
    debug!(count = missing.len(), path, "fetching missing chunks");
    let fetched = try_join_all(missing.iter().map(|id| async move {
        let _permit = ctx
            .fetch_limit
            .acquire()
            .await
            .map_err(|_| SyncError::Cancelled)?;
        ctx.cancel.check()?;
        fetch_one(ctx, source, id, path).await
    }))
    .await?;
    Ok(fetched.len())
}

async fn fetch_one(
    ctx: &ReplicationContext,
    source: &dyn ChunkSource,
    id: &ChunkId,
    path: Option<&str>,
) -> SyncResult<()> {
    for attempt in 0..2 {
        let sealed = source
            .fetch_sealed(id)
            .await?
            .ok_or_else(|| SyncError::MissingChunk {
                chunk: id.clone(),
                path: path.map(str::to_string),
            })?;
        let plain = if ctx.cipher.is_encrypting() {
            // Payloads from other devices carry their own salt; deriving
            // that key is CPU-bound.
            let cipher = Arc::clone(&ctx.cipher);
            let chunk = id.to_string();
            tokio::task::spawn_blocking(move || cipher.open(&chunk, &sealed))
                .await
                .map_err(|e| SyncError::Io(std::io::Error::other(e)))??
        } else {
            sealed
        };
        match ctx.chunks.insert_verified(id, &plain) {
            Ok(()) => return Ok(()),
            Err(StorageError::HashMismatch { actual, .. }) => {
                warn!(chunk = %id, %actual, attempt, "chunk failed verification");
            }
            Err(other) => return Err(other.into()),
        }
    }
    Err(SyncError::ChecksumMismatch {
        key: id.to_string(),
    })
}
