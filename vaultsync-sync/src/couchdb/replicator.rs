//! Document-replication transport.
//!
//! Pull reads the remote `_changes` feed from the stored remote sequence
//! and applies every entry document once its chunks have been fetched.
//! Push walks the local change sequence in batches, uploads the chunks the
//! remote lacks first and then the entry documents, and only advances the
//! local cursor past batches the remote acknowledged.

use super::database::{PutOutcome, RemoteDatabase};
use super::wire::{doc_kind, ChunkDoc, DocKind, EntryDoc, MILESTONE_ID};
use crate::config::ChunkRevisionScheme;
use crate::conflict::Resolution;
use crate::error::{ResultExt, SyncError, SyncResult};
use crate::lock::Milestone;
use crate::transport::{
    fetch_missing, ChunkSource, RemoteStatus, ReplicationContext, ReplicationStats,
    Replicator, ResetScope,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vaultsync_types::{ChunkId, Entry};

const REMOTE_SEQ_KEY: &str = "couchdb:remote_seq";
const LOCAL_SEQ_KEY: &str = "couchdb:local_seq";

/// Rows requested per `_changes` page when scanning the whole database.
const SCAN_PAGE: usize = 500;

/// Replicates with a CouchDB-compatible database.
pub struct DocumentReplicator {
    db: Arc<dyn RemoteDatabase>,
}

impl DocumentReplicator {
    pub fn new(db: Arc<dyn RemoteDatabase>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<dyn RemoteDatabase> {
        &self.db
    }

    async fn pull(&self, ctx: &ReplicationContext) -> SyncResult<ReplicationStats> {
        let mut stats = ReplicationStats::default();
        let mut since = ctx
            .backend
            .get_meta(REMOTE_SEQ_KEY)?
            .unwrap_or_else(|| "0".to_string());
        let limit = ctx.settings.batch_size;

        loop {
            ctx.cancel.check()?;
            let page = self.db.changes(&since, limit).await?;
            let rows = page.results.len();
            for change in page.results {
                let Some(doc) = change.doc else { continue };
                if doc_kind(&doc) != DocKind::Entry {
                    continue;
                }
                let doc: EntryDoc = serde_json::from_value(doc)?;
                let remote = doc
                    .to_entry(ctx.cipher.as_ref())
                    .context(format!("decoding document {}", change.id))?;
                stats.merge(self.receive(ctx, &remote).await?);
            }
            since = page.last_seq;
            ctx.backend.put_meta(REMOTE_SEQ_KEY, &since)?;
            if rows < limit {
                break;
            }
        }
        Ok(stats)
    }

    async fn receive(
        &self,
        ctx: &ReplicationContext,
        remote: &Entry,
    ) -> SyncResult<ReplicationStats> {
        let mut stats = ReplicationStats::default();
        if !remote.deleted {
            stats.chunks_fetched += fetch_missing(ctx, self, &remote.chunk_ids, Some(&remote.path))
                .await
                .context(format!("fetching chunks of {}", remote.path))?;
        }
        match ctx.applier.apply(remote).await? {
            Resolution::RemoteWins => stats.received += 1,
            Resolution::Conflict => stats.conflicts += 1,
            Resolution::LocalWins | Resolution::Identical => {}
        }
        Ok(stats)
    }

    async fn push(&self, ctx: &ReplicationContext) -> SyncResult<ReplicationStats> {
        let cursor: u64 = ctx
            .backend
            .get_meta(LOCAL_SEQ_KEY)?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0);
        let changes = ctx.documents.changes_since(cursor)?;
        let Some(last_seq) = changes.last().map(|e| e.seq) else {
            return Ok(ReplicationStats::default());
        };

        let mut pending = Vec::new();
        for entry in changes {
            if !ctx.applier.bases().is_synced(&entry)? {
                pending.push(entry);
            }
        }
        debug!(cursor, last_seq, pending = pending.len(), "pushing local changes");

        let batches: Vec<Vec<Entry>> = pending
            .chunks(ctx.settings.batch_size)
            .map(<[Entry]>::to_vec)
            .collect();
        let batch_ends: Vec<u64> = batches
            .iter()
            .map(|b| b.last().map_or(cursor, |e| e.seq))
            .collect();

        let mut results = stream::iter(batches)
            .map(|batch| async move { self.push_batch(ctx, &batch).await })
            .buffered(ctx.settings.batches_limit);

        let mut stats = ReplicationStats::default();
        let mut index = 0;
        while let Some(result) = results.next().await {
            match result {
                Ok(batch_stats) => {
                    stats.merge(batch_stats);
                    ctx.backend
                        .put_meta(LOCAL_SEQ_KEY, &batch_ends[index].to_string())?;
                    index += 1;
                }
                Err(err) => {
                    warn!(error = %err, acknowledged = index, "push batch failed");
                    return Err(err);
                }
            }
        }
        // Entries skipped as already exchanged sit between batches.
        ctx.backend.put_meta(LOCAL_SEQ_KEY, &last_seq.to_string())?;
        Ok(stats)
    }

    async fn push_batch(
        &self,
        ctx: &ReplicationContext,
        entries: &[Entry],
    ) -> SyncResult<ReplicationStats> {
        let mut stats = ReplicationStats::default();
        let chunk_ids: Vec<ChunkId> = {
            let mut seen = HashSet::new();
            entries
                .iter()
                .filter(|e| !e.deleted)
                .flat_map(|e| e.chunk_ids.iter())
                .filter(|id| seen.insert(*id))
                .cloned()
                .collect()
        };
        stats.chunks_sent += self.upload_chunks(ctx, &chunk_ids, false).await?;

        let bases = ctx.applier.bases();
        let mut docs = Vec::with_capacity(entries.len());
        for entry in entries {
            // Without a base the document is new to this remote as far as
            // we know; a conflict then goes through the resolver.
            let rev = bases.get(&entry.id)?.and_then(|b| b.rev);
            let doc = EntryDoc::from_entry(entry, ctx.cipher.as_ref(), rev)?;
            docs.push(serde_json::to_value(doc)?);
        }
        ctx.cancel.check()?;
        let results = self.db.bulk_docs(&docs, true).await?;
        let by_id: BTreeMap<&str, &Entry> =
            entries.iter().map(|e| (e.id.as_str(), e)).collect();

        for result in results {
            let Some(entry) = by_id.get(result.id.as_str()) else {
                continue;
            };
            if result.is_ok() {
                ctx.applier.record_sent(entry, result.rev.clone())?;
                stats.sent += 1;
            } else if result.is_conflict() {
                stats.merge(self.resolve_push_conflict(ctx, entry).await?);
            } else {
                return Err(SyncError::Protocol(format!(
                    "{} rejected {}: {}",
                    self.db.label(),
                    entry.path,
                    result.reason.as_deref().unwrap_or("unknown error")
                )));
            }
        }
        Ok(stats)
    }

    /// A rejected update: pull the remote version through the resolver and
    /// retry once if the local side still wins.
    async fn resolve_push_conflict(
        &self,
        ctx: &ReplicationContext,
        entry: &Entry,
    ) -> SyncResult<ReplicationStats> {
        let Some(doc) = self.db.get(entry.id.as_str()).await? else {
            return Err(SyncError::Conflict {
                path: entry.path.clone(),
            });
        };
        let remote: EntryDoc = serde_json::from_value(doc)?;
        let remote = remote.to_entry(ctx.cipher.as_ref())?;
        info!(path = %entry.path, "update conflict, consulting resolver");

        let mut stats = self.receive(ctx, &remote).await?;
        let Some(current) = ctx.documents.get_by_id(&entry.id)? else {
            return Ok(stats);
        };
        let base = ctx.applier.bases().get(&entry.id)?;
        let wins = base
            .as_ref()
            .is_some_and(|b| b.rev == remote.remote_rev && !b.matches(&current));
        if !wins {
            return Ok(stats);
        }

        let doc = EntryDoc::from_entry(&current, ctx.cipher.as_ref(), remote.remote_rev.clone())?;
        match self
            .db
            .put(current.id.as_str(), &serde_json::to_value(doc)?)
            .await?
        {
            PutOutcome::Ok { rev } => {
                ctx.applier.record_sent(&current, Some(rev))?;
                stats.sent += 1;
                Ok(stats)
            }
            PutOutcome::Conflict => Err(SyncError::Conflict {
                path: entry.path.clone(),
            }),
        }
    }

    /// Uploads chunks in bulk requests of at most `max_chunk_bulk_bytes`.
    /// Unless `force` is set, chunks the remote already has are skipped.
    async fn upload_chunks(
        &self,
        ctx: &ReplicationContext,
        ids: &[ChunkId],
        force: bool,
    ) -> SyncResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let wanted: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let to_send: Vec<String> = if force {
            wanted
        } else {
            self.db.missing_docs(&wanted).await?
        };
        if to_send.is_empty() {
            return Ok(0);
        }

        let scheme = ctx.settings.chunk_scheme;
        let new_edits = scheme == ChunkRevisionScheme::ContentDerived;
        let limit = ctx.settings.max_chunk_bulk_bytes;
        let mut sent = 0;
        let mut bulk: Vec<Value> = Vec::new();
        let mut bulk_bytes = 0usize;

        for raw in &to_send {
            ctx.cancel.check()?;
            let id: ChunkId = raw
                .parse()
                .map_err(|e| SyncError::Protocol(format!("{e}")))?;
            let data = ctx.chunks.read(&id).map_err(|_| SyncError::MissingChunk {
                chunk: id.clone(),
                path: None,
            })?;
            let doc = ChunkDoc::seal(&id, &data, ctx.cipher.as_ref(), scheme)?;
            let size = doc.data.len();
            if !bulk.is_empty() && bulk_bytes + size > limit {
                sent += self.flush_chunks(&mut bulk, new_edits).await?;
                bulk_bytes = 0;
            }
            bulk.push(serde_json::to_value(doc)?);
            bulk_bytes += size;
        }
        if !bulk.is_empty() {
            sent += self.flush_chunks(&mut bulk, new_edits).await?;
        }
        debug!(sent, "uploaded chunks");
        Ok(sent)
    }

    async fn flush_chunks(&self, bulk: &mut Vec<Value>, new_edits: bool) -> SyncResult<usize> {
        let docs = std::mem::take(bulk);
        let results = self.db.bulk_docs(&docs, new_edits).await?;
        for result in &results {
            // A conflict means another device uploaded the same chunk.
            if !(result.is_ok() || result.is_conflict()) {
                return Err(SyncError::Protocol(format!(
                    "chunk {} rejected: {}",
                    result.id,
                    result.reason.as_deref().unwrap_or("unknown error")
                )));
            }
        }
        Ok(docs.len())
    }
}

#[async_trait]
impl ChunkSource for DocumentReplicator {
    async fn fetch_sealed(&self, id: &ChunkId) -> SyncResult<Option<Vec<u8>>> {
        let Some(doc) = self.db.get(id.as_str()).await? else {
            return Ok(None);
        };
        let doc: ChunkDoc = serde_json::from_value(doc)?;
        doc.sealed_bytes().map(Some)
    }
}

#[async_trait]
impl Replicator for DocumentReplicator {
    fn peer(&self) -> String {
        self.db.label()
    }

    async fn try_connect(&self) -> SyncResult<()> {
        self.db.ensure_exists().await?;
        let info = self.db.info().await?;
        debug!(peer = %self.peer(), docs = info.doc_count, "connected");
        Ok(())
    }

    async fn push_pull(&self, ctx: &ReplicationContext) -> SyncResult<ReplicationStats> {
        let mut stats = self.pull(ctx).await.context("pulling changes")?;
        stats.merge(self.push(ctx).await.context("pushing changes")?);
        if !stats.is_empty() {
            info!(peer = %self.peer(), ?stats, "replication cycle finished");
        }
        Ok(stats)
    }

    async fn remote_status(&self) -> SyncResult<RemoteStatus> {
        let info = self.db.info().await?;
        Ok(RemoteStatus {
            peer: self.peer(),
            documents: info.doc_count,
            update_seq: Some(info.update_seq),
            milestone: self.milestone().await?,
        })
    }

    async fn milestone(&self) -> SyncResult<Option<Milestone>> {
        match self.db.get(MILESTONE_ID).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    async fn put_milestone(&self, milestone: &Milestone) -> SyncResult<()> {
        let mut doc = serde_json::to_value(milestone)?;
        if let Some(current) = self.db.get(MILESTONE_ID).await? {
            if let (Some(rev), Some(obj)) = (current.get("_rev").cloned(), doc.as_object_mut()) {
                obj.insert("_rev".into(), rev);
            }
        }
        match self.db.put(MILESTONE_ID, &doc).await? {
            PutOutcome::Ok { .. } => Ok(()),
            PutOutcome::Conflict => Err(SyncError::Conflict {
                path: MILESTONE_ID.to_string(),
            }),
        }
    }

    async fn send_chunks(&self, ctx: &ReplicationContext, ids: &[ChunkId]) -> SyncResult<usize> {
        self.upload_chunks(ctx, ids, true).await
    }

    async fn fetch_chunks(
        &self,
        ctx: &ReplicationContext,
        ids: &[ChunkId],
        path: Option<&str>,
    ) -> SyncResult<usize> {
        fetch_missing(ctx, self, ids, path).await
    }

    async fn remote_entries(&self, ctx: &ReplicationContext) -> SyncResult<Vec<Entry>> {
        let mut latest = BTreeMap::new();
        let mut since = "0".to_string();
        loop {
            let page = self.db.changes(&since, SCAN_PAGE).await?;
            let rows = page.results.len();
            for change in page.results {
                let Some(doc) = change.doc else { continue };
                if doc_kind(&doc) != DocKind::Entry {
                    continue;
                }
                let doc: EntryDoc = serde_json::from_value(doc)?;
                let entry = doc.to_entry(ctx.cipher.as_ref())?;
                latest.insert(entry.id.clone(), entry);
            }
            since = page.last_seq;
            if rows < SCAN_PAGE {
                break;
            }
        }
        Ok(latest.into_values().collect())
    }

    async fn push_entries(&self, ctx: &ReplicationContext, entries: &[Entry]) -> SyncResult<usize> {
        let mut sent = 0;
        for batch in entries.chunks(ctx.settings.batch_size) {
            ctx.cancel.check()?;
            sent += self.push_batch(ctx, batch).await?.sent;
        }
        Ok(sent)
    }

    async fn wipe(&self) -> SyncResult<()> {
        self.db.recreate().await
    }

    async fn compact_remote(&self) -> SyncResult<()> {
        self.db.compact().await
    }

    fn reset_checkpoint(&self, ctx: &ReplicationContext, scope: ResetScope) -> SyncResult<()> {
        if scope.resets_sent() {
            ctx.backend.delete_meta(LOCAL_SEQ_KEY)?;
            for entry in ctx.documents.entries()? {
                ctx.applier.bases().remove(&entry.id)?;
            }
        }
        if scope.resets_received() {
            ctx.backend.delete_meta(REMOTE_SEQ_KEY)?;
        }
        info!(peer = %self.peer(), ?scope, "replication checkpoint reset");
        Ok(())
    }
}
