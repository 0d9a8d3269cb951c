//! Entry applier - materializes received entries.
//!
//! Both transports hand every received entry to [`EntryApplier::apply`]
//! once its chunks are stored locally. The applier asks the
//! [`ConflictResolver`] for a verdict and then writes the file, records a
//! tombstone, marks identical mtimes as same or leaves the local side to be
//! pushed.
//!
//! A [`SyncBase`] is kept per document: the local sequence and content
//! fingerprint at the last successful exchange. It tells echoes from real
//! changes and one-sided edits from diverged ones.

use crate::conflict::{ConflictResolver, Resolution};
use crate::error::{SyncError, SyncResult};
use crate::fs::FileAccess;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};
use vaultsync_storage::{ChunkStore, DocumentStore, LocalBackend, StorageError};
use vaultsync_types::{DocumentId, Entry};

const BASE_PREFIX: &str = "base:";

/// What both sides agreed on at the last exchange of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBase {
    /// Local sequence of the entry at that point.
    pub seq: u64,
    /// [`content_fingerprint`] of the exchanged content.
    pub fingerprint: String,
    /// Remote revision, for MVCC remotes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
}

impl SyncBase {
    pub fn of(entry: &Entry, rev: Option<String>) -> Self {
        Self {
            seq: entry.seq,
            fingerprint: content_fingerprint(entry),
            rev,
        }
    }

    /// Whether `entry` carries the content recorded in this base.
    pub fn matches(&self, entry: &Entry) -> bool {
        self.fingerprint == content_fingerprint(entry)
    }
}

/// Digest over the deleted flag and the chunk id sequence.
pub fn content_fingerprint(entry: &Entry) -> String {
    let mut hasher = Sha256::new();
    hasher.update([u8::from(entry.deleted)]);
    for id in &entry.chunk_ids {
        hasher.update(id.as_str().as_bytes());
        hasher.update([0]);
    }
    hex::encode(hasher.finalize())
}

/// Loads and stores [`SyncBase`] records in the backend's meta table.
#[derive(Clone)]
pub struct BaseStore {
    backend: Arc<dyn LocalBackend>,
}

impl BaseStore {
    pub fn new(backend: Arc<dyn LocalBackend>) -> Self {
        Self { backend }
    }

    pub fn get(&self, id: &DocumentId) -> SyncResult<Option<SyncBase>> {
        match self.backend.get_meta(&base_key(id))? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put(&self, id: &DocumentId, base: &SyncBase) -> SyncResult<()> {
        self.backend
            .put_meta(&base_key(id), &serde_json::to_string(base)?)?;
        Ok(())
    }

    pub fn remove(&self, id: &DocumentId) -> SyncResult<()> {
        self.backend.delete_meta(&base_key(id))?;
        Ok(())
    }

    /// Whether `entry` is exactly what was last exchanged, so pushing it
    /// again would only echo.
    pub fn is_synced(&self, entry: &Entry) -> SyncResult<bool> {
        Ok(self
            .get(&entry.id)?
            .is_some_and(|base| base.seq == entry.seq && base.matches(entry)))
    }
}

fn base_key(id: &DocumentId) -> String {
    format!("{BASE_PREFIX}{id}")
}

/// Applies received entries to the local stores and the vault.
pub struct EntryApplier {
    documents: Arc<DocumentStore>,
    chunks: Arc<ChunkStore>,
    files: Arc<dyn FileAccess>,
    resolver: Arc<ConflictResolver>,
    bases: BaseStore,
}

impl EntryApplier {
    pub fn new(
        documents: Arc<DocumentStore>,
        chunks: Arc<ChunkStore>,
        files: Arc<dyn FileAccess>,
        resolver: Arc<ConflictResolver>,
        bases: BaseStore,
    ) -> Self {
        Self {
            documents,
            chunks,
            files,
            resolver,
            bases,
        }
    }

    pub fn bases(&self) -> &BaseStore {
        &self.bases
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    /// Applies one received entry. Its chunks must already be stored.
    pub async fn apply(&self, remote: &Entry) -> SyncResult<Resolution> {
        let local = self.documents.get_by_id(&remote.id)?;
        let base = self.bases.get(&remote.id)?;

        if let (Some(local), Some(base)) = (&local, &base) {
            if base.seq == local.seq && base.matches(remote) && base.matches(local) {
                debug!(path = %remote.path, "echo of an exchanged entry, skipping");
                return Ok(Resolution::Identical);
            }
        }

        let verdict =
            self.resolver
                .resolve(&self.documents, local.as_ref(), remote, base.as_ref())?;
        debug!(path = %remote.path, ?verdict, "received entry classified");

        match verdict {
            Resolution::RemoteWins => {
                self.materialize(remote).await?;
            }
            Resolution::Identical => {
                if let Some(local) = &local {
                    self.documents
                        .mark_changes_are_same(&local.path, local.mtime, remote.mtime)?;
                    // Same content on both sides: the local entry counts as
                    // exchanged, whatever its sequence.
                    self.bases.put(
                        &remote.id,
                        &SyncBase {
                            seq: local.seq,
                            fingerprint: content_fingerprint(remote),
                            rev: remote.remote_rev.clone().or_else(|| {
                                base.as_ref().and_then(|b| b.rev.clone())
                            }),
                        },
                    )?;
                }
            }
            Resolution::LocalWins => {
                if let Some(local) = &local {
                    self.readvertise(local, remote, base.as_ref())?;
                }
            }
            Resolution::Conflict => {}
        }
        Ok(verdict)
    }

    /// Writes the remote version to the vault and the document store.
    pub async fn materialize(&self, remote: &Entry) -> SyncResult<Entry> {
        if remote.deleted {
            self.files.delete(&remote.path).await?;
            self.documents.unmark_changes(&remote.path)?;
        } else {
            let content = self
                .chunks
                .read_content(&remote.chunk_ids)
                .map_err(|e| match e {
                    StorageError::MissingChunk(chunk) => SyncError::MissingChunk {
                        chunk,
                        path: Some(remote.path.clone()),
                    },
                    other => other.into(),
                })?;
            self.files
                .write_file(&remote.path, &content, remote.mtime)
                .await?;
        }
        let stored = self.documents.put(remote)?;
        self.bases
            .put(&stored.id, &SyncBase::of(&stored, remote.remote_rev.clone()))?;
        info!(path = %remote.path, deleted = remote.deleted, "applied remote entry");
        Ok(stored)
    }

    /// Keeps `local` over a stale `remote`: records the remote as seen and
    /// stores `local` under a fresh sequence so the next push carries it.
    pub fn readvertise(
        &self,
        local: &Entry,
        remote: &Entry,
        base: Option<&SyncBase>,
    ) -> SyncResult<Entry> {
        let mut bumped = local.clone();
        bumped.remote_rev = remote.remote_rev.clone();
        let stored = self.documents.put(&bumped)?;
        let seen = SyncBase {
            seq: base.map_or(0, |b| b.seq),
            fingerprint: content_fingerprint(remote),
            rev: remote.remote_rev.clone(),
        };
        self.bases.put(&stored.id, &seen)?;
        debug!(path = %local.path, seq = stored.seq, "local entry kept and re-advertised");
        Ok(stored)
    }

    /// Records that `entry` reached the remote as revision `rev`.
    pub fn record_sent(&self, entry: &Entry, rev: Option<String>) -> SyncResult<()> {
        self.bases.put(&entry.id, &SyncBase::of(entry, rev))
    }
}
