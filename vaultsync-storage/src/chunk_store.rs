//! Content-addressed chunk store.
//!
//! New chunks land in [`Eden`] and graduate to the durable tier as its
//! thresholds fire. Reads consult Eden first. Chunks are immutable: a chunk
//! is only ever removed by garbage collection once nothing references it.

use crate::backend::LocalBackend;
use crate::eden::{Eden, EdenConfig};
use crate::error::{StorageError, StorageResult};
use crate::splitter::{Splitter, SplitterConfig};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};
use vaultsync_crypto::ContentHasher;
use vaultsync_types::ChunkId;

/// Outcome of a garbage-collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Chunks that were (or, in a dry run, would be) removed.
    pub removed: Vec<ChunkId>,
    /// Bytes reclaimed (or reclaimable).
    pub bytes: u64,
    pub dry_run: bool,
}

impl GcReport {
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }
}

/// Chunk storage over a [`LocalBackend`].
pub struct ChunkStore {
    backend: Arc<dyn LocalBackend>,
    hasher: ContentHasher,
    splitter: Splitter,
    eden: Eden,
}

impl ChunkStore {
    pub fn new(
        backend: Arc<dyn LocalBackend>,
        hasher: ContentHasher,
        splitter: SplitterConfig,
        eden: EdenConfig,
    ) -> Self {
        Self {
            eden: Eden::new(eden, Arc::clone(&backend)),
            backend,
            hasher,
            splitter: Splitter::new(splitter),
        }
    }

    pub fn hasher(&self) -> &ContentHasher {
        &self.hasher
    }

    pub fn eden(&self) -> &Eden {
        &self.eden
    }

    /// Cuts content into pieces.
    pub fn split<'a>(&self, content: &'a [u8]) -> Vec<&'a [u8]> {
        self.splitter.split(content)
    }

    /// Stores pieces, returning their ids in order. Pieces already stored
    /// are not written again.
    pub fn commit<T: AsRef<[u8]>>(&self, chunks: &[T]) -> StorageResult<Vec<ChunkId>> {
        self.commit_at(chunks, Utc::now())
    }

    /// [`Self::commit`] with an explicit clock.
    pub fn commit_at<T: AsRef<[u8]>>(
        &self,
        chunks: &[T],
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<ChunkId>> {
        let mut ids = Vec::with_capacity(chunks.len());
        let mut fresh = 0usize;
        for chunk in chunks {
            let data = chunk.as_ref();
            let id = self.hasher.hash(data);
            if !self.contains(&id)? {
                self.eden.insert(&id, data, now)?;
                fresh += 1;
            }
            ids.push(id);
        }
        // Thresholds are checked on every commit, dedup-only ones included.
        let graduated = self.eden.graduate_due(now)?.len();
        debug!(total = ids.len(), fresh, graduated, "committed chunks");
        Ok(ids)
    }

    /// Splits and commits `content`.
    pub fn store_content(&self, content: &[u8]) -> StorageResult<Vec<ChunkId>> {
        let pieces = self.split(content);
        self.commit(&pieces)
    }

    /// Stores a chunk received from a remote after checking that the bytes
    /// hash to `id`.
    pub fn insert_verified(&self, id: &ChunkId, data: &[u8]) -> StorageResult<()> {
        let actual = self.hasher.hash(data);
        if &actual != id {
            return Err(StorageError::HashMismatch {
                id: id.clone(),
                actual,
            });
        }
        if !self.contains(id)? {
            self.backend.put_chunk(id, data)?;
        }
        Ok(())
    }

    /// Plaintext of a chunk.
    pub fn read(&self, id: &ChunkId) -> StorageResult<Vec<u8>> {
        self.try_read(id)?
            .ok_or_else(|| StorageError::MissingChunk(id.clone()))
    }

    pub fn try_read(&self, id: &ChunkId) -> StorageResult<Option<Vec<u8>>> {
        if let Some(data) = self.eden.get(id)? {
            return Ok(Some(data));
        }
        self.backend.get_chunk(id)
    }

    /// Reassembles content from an ordered id list.
    pub fn read_content(&self, ids: &[ChunkId]) -> StorageResult<Vec<u8>> {
        let mut out = Vec::new();
        for id in ids {
            out.extend_from_slice(&self.read(id)?);
        }
        Ok(out)
    }

    pub fn contains(&self, id: &ChunkId) -> StorageResult<bool> {
        Ok(self.eden.contains(id)? || self.backend.has_chunk(id)?)
    }

    /// The ids in `ids` that are not stored locally, deduplicated.
    pub fn missing(&self, ids: &[ChunkId]) -> StorageResult<Vec<ChunkId>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for id in ids {
            if seen.insert(id) && !self.contains(id)? {
                out.push(id.clone());
            }
        }
        Ok(out)
    }

    /// Every stored chunk id (Eden and durable).
    pub fn all_ids(&self) -> StorageResult<Vec<ChunkId>> {
        let mut ids = self.backend.chunk_ids()?;
        ids.extend(self.eden.member_ids()?);
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Graduates every Eden member into the durable tier.
    pub fn compact(&self) -> StorageResult<usize> {
        let moved = self.eden.flush()?;
        if !moved.is_empty() {
            info!(moved = moved.len(), "compacted eden");
        }
        Ok(moved.len())
    }

    /// Applies Eden's thresholds against the current clock.
    pub fn compact_due(&self) -> StorageResult<usize> {
        Ok(self.eden.graduate_due(Utc::now())?.len())
    }

    /// Removes chunks not referenced by `live`. With `dry_run` nothing is
    /// deleted and the report lists what would be.
    ///
    /// Callers must hold the write side of the cycle fence so no
    /// replication cycle is advertising entries concurrently.
    pub fn garbage_collect(
        &self,
        live: &HashSet<ChunkId>,
        dry_run: bool,
    ) -> StorageResult<GcReport> {
        let mut report = GcReport {
            dry_run,
            ..GcReport::default()
        };
        for id in self.all_ids()? {
            if live.contains(&id) {
                continue;
            }
            let size = self.try_read(&id)?.map(|d| d.len() as u64).unwrap_or(0);
            if !dry_run {
                self.eden.discard(&id)?;
                self.backend.delete_chunk(&id)?;
            }
            report.bytes += size;
            report.removed.push(id);
        }
        info!(
            removed = report.removed.len(),
            bytes = report.bytes,
            dry_run,
            "garbage collection finished"
        );
        Ok(report)
    }

    /// Re-creates chunks from file content. Returns the ids that were
    /// missing before and are now stored.
    pub fn recreate(&self, content: &[u8]) -> StorageResult<Vec<ChunkId>> {
        let pieces = self.split(content);
        let mut recreated = Vec::new();
        for piece in pieces {
            let id = self.hasher.hash(piece);
            if !self.contains(&id)? {
                self.backend.put_chunk(&id, piece)?;
                recreated.push(id);
            }
        }
        Ok(recreated)
    }
}
