//! Operator maintenance actions.
//!
//! Everything here is started by a person, not by the sync loop. Actions
//! that delete chunks or replace the remote take the write side of the
//! cycle fence so no replication cycle runs at the same time.

use crate::engine::SyncEngine;
use crate::error::{ResultExt, SyncError, SyncResult};
use crate::lock::{LockCoordinator, Milestone};
use crate::retry::{retry, RetryConfig};
use crate::transport::ResetScope;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{info, warn};
use vaultsync_storage::{GcReport, StorageError};
use vaultsync_types::{ChunkId, Entry};

/// Outcome of [`SyncEngine::recreate_missing_chunks`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Chunks rebuilt from vault files.
    pub recreated: Vec<ChunkId>,
    /// Chunks fetched from the remote.
    pub fetched: usize,
    /// Chunks neither the vault nor the remote could supply.
    pub lost: Vec<(String, ChunkId)>,
}

impl RepairReport {
    /// Fails with `DataLoss` for the first unrecoverable chunk.
    pub fn ensure_complete(&self) -> SyncResult<()> {
        match self.lost.first() {
            Some((path, chunk)) => Err(SyncError::DataLoss {
                path: path.clone(),
                chunk: chunk.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// How a vault file and its document disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discrepancy {
    /// The document is live but the file is gone.
    MissingOnStorage,
    /// The file exists but there is no live document.
    MissingInDatabase,
    /// Both exist with different content.
    ContentMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathDiscrepancy {
    pub path: String,
    pub kind: Discrepancy,
}

/// Which side is authoritative when repairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairDirection {
    /// Vault files win; documents are updated or deleted.
    StorageToDatabase,
    /// Documents win; files are written or deleted.
    DatabaseToStorage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub discrepancies: Vec<PathDiscrepancy>,
    pub repaired: usize,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

impl SyncEngine {
    /// Restores chunks referenced by live documents but absent from the
    /// chunk store, first from the vault file and then from the remote.
    pub async fn recreate_missing_chunks(&self) -> SyncResult<RepairReport> {
        let mut report = RepairReport::default();
        let ctx = self.context();

        for entry in self.documents.list()? {
            let missing = self.chunks.missing(&entry.chunk_ids)?;
            if missing.is_empty() {
                continue;
            }
            self.cancel.check()?;
            warn!(path = %entry.path, count = missing.len(), "document has missing chunks");

            if let Some(content) = self.files.read_file(&entry.path).await? {
                report.recreated.extend(self.chunks.recreate(&content)?);
            }
            let still_missing = self.chunks.missing(&entry.chunk_ids)?;
            if still_missing.is_empty() {
                continue;
            }

            match self
                .replicator()
                .fetch_chunks(&ctx, &still_missing, Some(&entry.path))
                .await
            {
                Ok(n) => report.fetched += n,
                Err(err) if matches!(err.root(), SyncError::MissingChunk { .. }) => {}
                Err(err) => return Err(err.context(format!("fetching chunks of {}", entry.path))),
            }
            for chunk in self.chunks.missing(&entry.chunk_ids)? {
                report.lost.push((entry.path.clone(), chunk));
            }
        }

        info!(
            recreated = report.recreated.len(),
            fetched = report.fetched,
            lost = report.lost.len(),
            "missing chunk repair finished"
        );
        Ok(report)
    }

    /// Compares vault files against their documents. With a direction, the
    /// differences are repaired as well.
    pub async fn verify_and_repair(
        &self,
        direction: Option<RepairDirection>,
    ) -> SyncResult<VerifyReport> {
        let mut report = VerifyReport::default();
        let files: BTreeSet<String> = self.files.list_files().await?.into_iter().collect();
        let documents: BTreeMap<String, Entry> = self
            .documents
            .list()?
            .into_iter()
            .map(|e| (e.path.clone(), e))
            .collect();

        for path in files.iter().chain(documents.keys()).collect::<BTreeSet<_>>() {
            self.cancel.check()?;
            let kind = match (files.contains(path), documents.get(path)) {
                (true, None) => Discrepancy::MissingInDatabase,
                (false, Some(_)) => Discrepancy::MissingOnStorage,
                (true, Some(entry)) => {
                    let Some(content) = self.files.read_file(path).await? else {
                        continue;
                    };
                    let layout: Vec<ChunkId> = self
                        .chunks
                        .split(&content)
                        .into_iter()
                        .map(|piece| self.chunks.hasher().hash(piece))
                        .collect();
                    if layout == entry.chunk_ids {
                        continue;
                    }
                    Discrepancy::ContentMismatch
                }
                (false, None) => continue,
            };
            report.discrepancies.push(PathDiscrepancy {
                path: path.clone(),
                kind,
            });
        }

        if let Some(direction) = direction {
            for found in &report.discrepancies {
                self.repair(&found.path, found.kind, direction, documents.get(&found.path))
                    .await
                    .context(format!("repairing {}", found.path))?;
                report.repaired += 1;
            }
        }
        info!(
            discrepancies = report.discrepancies.len(),
            repaired = report.repaired,
            "verification finished"
        );
        Ok(report)
    }

    async fn repair(
        &self,
        path: &str,
        kind: Discrepancy,
        direction: RepairDirection,
        entry: Option<&Entry>,
    ) -> SyncResult<()> {
        match (direction, kind, entry) {
            (RepairDirection::StorageToDatabase, Discrepancy::MissingOnStorage, _) => {
                self.delete_file(path)?;
            }
            (RepairDirection::StorageToDatabase, _, _) => {
                self.store_verified(path).await?;
            }
            (RepairDirection::DatabaseToStorage, Discrepancy::MissingInDatabase, _) => {
                self.files.delete(path).await?;
            }
            (RepairDirection::DatabaseToStorage, _, Some(entry)) => {
                let content = self.chunks.read_content(&entry.chunk_ids).map_err(|e| match e {
                    StorageError::MissingChunk(chunk) => SyncError::MissingChunk {
                        chunk,
                        path: Some(path.to_string()),
                    },
                    other => other.into(),
                })?;
                self.files.write_file(path, &content, entry.mtime).await?;
            }
            (RepairDirection::DatabaseToStorage, _, None) => {}
        }
        Ok(())
    }

    /// Stores `path` from its current content regardless of its stat.
    async fn store_verified(&self, path: &str) -> SyncResult<()> {
        let (Some(content), Some(stat)) = (
            self.files.read_file(path).await?,
            self.files.stat_file(path).await?,
        ) else {
            self.delete_file(path)?;
            return Ok(());
        };
        let chunk_ids = self.chunks.store_content(&content)?;
        let entry = Entry::new(self.documents.id_for(path), path, stat, chunk_ids);
        self.documents.put(&entry)?;
        Ok(())
    }

    /// Removes chunks no live document or queued conflict references.
    pub async fn garbage_collect(&self, dry_run: bool) -> SyncResult<GcReport> {
        let _fence = self.fence.exclusive().await;
        let mut live: HashSet<ChunkId> = self
            .documents
            .list()?
            .into_iter()
            .flat_map(|e| e.chunk_ids)
            .collect();
        live.extend(self.resolver.referenced_chunks());
        Ok(self.chunks.garbage_collect(&live, dry_run)?)
    }

    /// Moves every Eden chunk to durable storage and asks the remote to
    /// compact. Returns the number of chunks moved.
    pub async fn compact(&self) -> SyncResult<usize> {
        let _fence = self.fence.exclusive().await;
        let moved = self.chunks.compact()?;
        let replicator = self.replicator();
        retry("compact remote", &self.config.retry, || replicator.compact_remote()).await?;
        info!(moved, peer = %replicator.peer(), "compaction finished");
        Ok(moved)
    }

    /// Forgets what was sent, received or both, so the next cycle
    /// re-examines that history.
    pub fn reset_checkpoint(&self, scope: ResetScope) -> SyncResult<()> {
        self.replicator().reset_checkpoint(&self.context(), scope)
    }

    /// Fails with `Locked` while another device holds the lock.
    pub async fn lock_remote(&self) -> SyncResult<Milestone> {
        self.edit_milestone(true, LockCoordinator::lock).await
    }

    pub async fn unlock_remote(&self) -> SyncResult<Milestone> {
        self.edit_milestone(true, LockCoordinator::unlock).await
    }

    /// Accepts this device on a locked remote.
    pub async fn mark_resolved(&self) -> SyncResult<Milestone> {
        self.edit_milestone(false, LockCoordinator::mark_resolved).await
    }

    async fn edit_milestone(
        &self,
        guarded: bool,
        edit: impl FnOnce(&LockCoordinator, &mut Milestone),
    ) -> SyncResult<Milestone> {
        let mut milestone = self.try_connect().await?;
        if guarded {
            self.locks.check_write(&milestone)?;
        }
        edit(&self.locks, &mut milestone);
        self.replicator().put_milestone(&milestone).await?;
        Ok(milestone)
    }

    /// Replaces the remote with this device's state: lock, wipe, push every
    /// document and its chunks, reset the checkpoint. The remote stays
    /// locked so other devices stop until they are marked resolved. Refused
    /// while another device holds the lock.
    pub async fn rebuild_remote(&self) -> SyncResult<usize> {
        let _fence = self.fence.exclusive().await;
        let replicator = self.replicator();
        retry("connect", &RetryConfig::connect(), || replicator.try_connect()).await?;

        // Announce the lock before anything disappears.
        if let Some(mut previous) = replicator.milestone().await? {
            self.locks.check_write(&previous)?;
            self.locks.lock(&mut previous);
            replicator.put_milestone(&previous).await?;
        }
        replicator.wipe().await.context("wiping remote")?;

        let ctx = self.context();
        replicator.reset_checkpoint(&ctx, ResetScope::Full)?;

        let mut milestone = Milestone::new(
            self.chunks.hasher().tweak(),
            self.cipher.make_verifier()?,
            self.config.replication.chunk_scheme,
        );
        self.locks.lock(&mut milestone);
        replicator.put_milestone(&milestone).await?;
        self.remember_epoch(Some(&milestone))?;

        let entries = self.documents.entries()?;
        let sent = replicator
            .push_entries(&ctx, &entries)
            .await
            .context("pushing documents to the rebuilt remote")?;
        info!(sent, peer = %replicator.peer(), "remote rebuilt from this device");
        Ok(sent)
    }

    /// Deletes everything on the remote and forgets replication history.
    /// Other devices notice the new epoch once the remote is set up again.
    pub async fn wipe_remote(&self) -> SyncResult<()> {
        let _fence = self.fence.exclusive().await;
        let replicator = self.replicator();
        retry("connect", &RetryConfig::connect(), || replicator.try_connect()).await?;
        if let Some(milestone) = replicator.milestone().await? {
            self.locks.check_write(&milestone)?;
        }
        replicator.wipe().await?;
        replicator.reset_checkpoint(&self.context(), ResetScope::Full)?;
        self.remember_epoch(None)?;
        warn!(peer = %replicator.peer(), "remote wiped");
        Ok(())
    }

    /// Uploads every local chunk again.
    pub async fn resend_chunks(&self) -> SyncResult<usize> {
        let _cycle = self.fence.enter_cycle().await;
        let ids = self.chunks.all_ids()?;
        let sent = self.replicator().send_chunks(&self.context(), &ids).await?;
        info!(sent, "chunks re-sent");
        Ok(sent)
    }
}
