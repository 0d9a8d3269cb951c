//! Journal transport.
//!
//! Bucket layout:
//!
//! ```text
//! milestone.json                      lock state, verifier, hash tweak
//! chunks/{chunk id}                   sealed chunk payloads, write-once
//! journal/{device}/{sha256}.json      batches of entries, keyed by digest
//! checkpoints/{device}.json           mirror of each device's checkpoint
//! ```
//!
//! Delivery is at-least-once: every object is written before the
//! checkpoint that mentions it, and replaying a record is harmless because
//! the applier recognizes content it already has.

use super::checkpoint::CheckpointInfo;
use super::object_store::ObjectStore;
use crate::conflict::Resolution;
use crate::error::{ResultExt, SyncError, SyncResult};
use crate::lock::Milestone;
use crate::transport::{
    fetch_missing, ChunkSource, RemoteStatus, ReplicationContext, ReplicationStats,
    Replicator, ResetScope,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vaultsync_crypto::ChunkCipher;
use vaultsync_types::{ChunkId, DeviceId, DocumentId, Entry};

const MILESTONE_KEY: &str = "milestone.json";
const CHUNK_PREFIX: &str = "chunks/";
const JOURNAL_PREFIX: &str = "journal/";
const CHECKPOINT_PREFIX: &str = "checkpoints/";

/// One journal object: a batch of entries from one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub device: DeviceId,
    pub created: DateTime<Utc>,
    pub entries: Vec<JournalEntry>,
}

impl JournalRecord {
    fn first_seq(&self) -> u64 {
        self.entries.iter().map(|e| e.seq).min().unwrap_or(0)
    }
}

/// An entry as written to the journal. `path` is sealed when encryption is
/// enabled; `seq` is the sender's local sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    pub path: String,
    pub mtime: u64,
    pub size: u64,
    pub deleted: bool,
    pub chunk_ids: Vec<ChunkId>,
    pub seq: u64,
}

impl JournalEntry {
    fn seal(entry: &Entry, cipher: &dyn ChunkCipher) -> SyncResult<Self> {
        Ok(Self {
            id: entry.id.as_str().to_string(),
            path: cipher.seal_path(&entry.path)?,
            mtime: entry.mtime,
            size: entry.size,
            deleted: entry.deleted,
            chunk_ids: entry.chunk_ids.clone(),
            seq: entry.seq,
        })
    }

    fn open(&self, cipher: &dyn ChunkCipher) -> SyncResult<Entry> {
        Ok(Entry {
            id: DocumentId::from_raw(self.id.clone()),
            path: cipher.open_path(&self.path)?,
            mtime: self.mtime,
            size: self.size,
            deleted: self.deleted,
            chunk_ids: self.chunk_ids.clone(),
            seq: 0,
            remote_rev: None,
        })
    }
}

pub fn chunk_key(id: &ChunkId) -> String {
    format!("{CHUNK_PREFIX}{id}")
}

fn record_key(device: &DeviceId, bytes: &[u8]) -> String {
    format!(
        "{JOURNAL_PREFIX}{device}/{}.json",
        hex::encode(Sha256::digest(bytes))
    )
}

/// The digest a record key claims for its content.
fn claimed_digest(key: &str) -> Option<&str> {
    key.rsplit_once('/')?.1.strip_suffix(".json")
}

fn checkpoint_key(device: &DeviceId) -> String {
    format!("{CHECKPOINT_PREFIX}{device}.json")
}

/// Replicates through an object store.
pub struct JournalReplicator {
    store: Arc<dyn ObjectStore>,
}

impl JournalReplicator {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Local checkpoint, or the mirrored one when this device lost its
    /// local state.
    async fn load_checkpoint(&self, ctx: &ReplicationContext) -> SyncResult<CheckpointInfo> {
        if let Some(cp) = CheckpointInfo::load(ctx.backend.as_ref())? {
            return Ok(cp);
        }
        match self.store.get(&checkpoint_key(&ctx.device_id)).await? {
            Some(bytes) => {
                let mut cp: CheckpointInfo = serde_json::from_slice(&bytes)?;
                // Local sequences restart with a fresh store.
                cp.reset_sent();
                info!(device = %ctx.device_id, "restored checkpoint from bucket");
                Ok(cp)
            }
            None => Ok(CheckpointInfo::default()),
        }
    }

    async fn mirror_checkpoint(
        &self,
        ctx: &ReplicationContext,
        cp: &CheckpointInfo,
    ) -> SyncResult<()> {
        self.store
            .put(&checkpoint_key(&ctx.device_id), serde_json::to_vec(cp)?)
            .await
    }

    /// Fetches a record and checks it against the digest in its key,
    /// fetching once more on a mismatch.
    async fn fetch_record(&self, key: &str) -> SyncResult<Option<JournalRecord>> {
        let Some(expected) = claimed_digest(key) else {
            warn!(key, "ignoring malformed journal key");
            return Ok(None);
        };
        for attempt in 0..2 {
            let Some(bytes) = self.store.get(key).await? else {
                return Ok(None);
            };
            if hex::encode(Sha256::digest(&bytes)) == expected {
                return Ok(Some(serde_json::from_slice(&bytes)?));
            }
            warn!(key, attempt, "journal record failed verification");
        }
        Err(SyncError::ChecksumMismatch {
            key: key.to_string(),
        })
    }

    async fn receive(
        &self,
        ctx: &ReplicationContext,
        cp: &mut CheckpointInfo,
    ) -> SyncResult<ReplicationStats> {
        let mut stats = ReplicationStats::default();
        let own_prefix = format!("{JOURNAL_PREFIX}{}/", ctx.device_id);
        let keys = self.store.list(JOURNAL_PREFIX).await?;

        let mut records = Vec::new();
        for key in keys {
            if cp.known_ids.contains(&key) {
                continue;
            }
            if key.starts_with(&own_prefix) || cp.received_files.contains(&key) {
                cp.known_ids.insert(key);
                continue;
            }
            ctx.cancel.check()?;
            if let Some(record) = self.fetch_record(&key).await? {
                records.push((key, record));
            }
        }
        // Per-device order matters; a device's sequences only grow.
        records.sort_by(|(_, a), (_, b)| {
            (a.device, a.first_seq()).cmp(&(b.device, b.first_seq()))
        });

        for (key, record) in records {
            debug!(key, entries = record.entries.len(), "applying journal record");
            for sealed in &record.entries {
                ctx.cancel.check()?;
                let remote = sealed.open(ctx.cipher.as_ref())?;
                if !remote.deleted {
                    stats.chunks_fetched +=
                        fetch_missing(ctx, self, &remote.chunk_ids, Some(&remote.path))
                            .await
                            .context(format!("fetching chunks of {}", remote.path))?;
                }
                match ctx.applier.apply(&remote).await? {
                    Resolution::RemoteWins => {
                        stats.received += 1;
                        if let Some(stored) = ctx.documents.get_by_id(&remote.id)? {
                            cp.sent_ids.insert(stored.sent_id());
                        }
                    }
                    Resolution::Conflict => stats.conflicts += 1,
                    Resolution::LocalWins | Resolution::Identical => {}
                }
            }
            cp.received_files.insert(key.clone());
            cp.known_ids.insert(key);
            cp.save(ctx.backend.as_ref())?;
        }
        Ok(stats)
    }

    async fn send(
        &self,
        ctx: &ReplicationContext,
        cp: &mut CheckpointInfo,
    ) -> SyncResult<ReplicationStats> {
        let changes = ctx.documents.changes_since(cp.last_local_seq)?;
        let Some(last_seq) = changes.last().map(|e| e.seq) else {
            return Ok(ReplicationStats::default());
        };
        let mut pending = Vec::new();
        for entry in changes {
            if cp.sent_ids.contains(&entry.sent_id()) || ctx.applier.bases().is_synced(&entry)? {
                continue;
            }
            pending.push(entry);
        }

        let mut stats = ReplicationStats::default();
        for batch in pending.chunks(ctx.settings.batch_size) {
            ctx.cancel.check()?;
            stats.merge(self.send_batch(ctx, cp, batch).await?);
        }
        cp.advance(last_seq);
        cp.save(ctx.backend.as_ref())?;
        Ok(stats)
    }

    /// Uploads the chunks of `batch` the bucket lacks, then one record for
    /// it, then saves the checkpoint.
    async fn send_batch(
        &self,
        ctx: &ReplicationContext,
        cp: &mut CheckpointInfo,
        batch: &[Entry],
    ) -> SyncResult<ReplicationStats> {
        let mut stats = ReplicationStats::default();
        let mut uploaded = Vec::new();
        for entry in batch.iter().filter(|e| !e.deleted) {
            for id in &entry.chunk_ids {
                let key = chunk_key(id);
                if cp.sent_files.contains(&key) || uploaded.contains(&key) {
                    continue;
                }
                ctx.cancel.check()?;
                self.upload_chunk(ctx, id, &entry.path).await?;
                uploaded.push(key);
                stats.chunks_sent += 1;
            }
        }

        let record = JournalRecord {
            device: ctx.device_id,
            created: Utc::now(),
            entries: batch
                .iter()
                .map(|e| JournalEntry::seal(e, ctx.cipher.as_ref()))
                .collect::<SyncResult<_>>()?,
        };
        let bytes = serde_json::to_vec(&record)?;
        let key = record_key(&ctx.device_id, &bytes);
        self.store.put(&key, bytes).await?;
        debug!(key, entries = batch.len(), "journal record uploaded");

        cp.sent_files.extend(uploaded);
        cp.sent_files.insert(key.clone());
        cp.known_ids.insert(key);
        for entry in batch {
            cp.sent_ids.insert(entry.sent_id());
            ctx.applier.record_sent(entry, None)?;
        }
        if let Some(last) = batch.last() {
            cp.advance(last.seq);
        }
        cp.save(ctx.backend.as_ref())?;
        stats.sent += batch.len();
        Ok(stats)
    }

    async fn upload_chunk(&self, ctx: &ReplicationContext, id: &ChunkId, path: &str) -> SyncResult<()> {
        let data = ctx.chunks.read(id).map_err(|_| SyncError::MissingChunk {
            chunk: id.clone(),
            path: Some(path.to_string()),
        })?;
        let sealed = ctx.cipher.seal(id.as_str(), &data)?;
        self.store.put(&chunk_key(id), sealed).await
    }

    /// Every record in the bucket, in application order.
    async fn all_records(&self) -> SyncResult<Vec<JournalRecord>> {
        let mut records = Vec::new();
        for key in self.store.list(JOURNAL_PREFIX).await? {
            if let Some(record) = self.fetch_record(&key).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| {
            (a.created, a.device, a.first_seq()).cmp(&(b.created, b.device, b.first_seq()))
        });
        Ok(records)
    }
}

#[async_trait]
impl ChunkSource for JournalReplicator {
    async fn fetch_sealed(&self, id: &ChunkId) -> SyncResult<Option<Vec<u8>>> {
        self.store.get(&chunk_key(id)).await
    }
}

#[async_trait]
impl Replicator for JournalReplicator {
    fn peer(&self) -> String {
        self.store.label()
    }

    async fn try_connect(&self) -> SyncResult<()> {
        let present = self.store.exists(MILESTONE_KEY).await?;
        debug!(peer = %self.peer(), milestone = present, "connected");
        Ok(())
    }

    async fn push_pull(&self, ctx: &ReplicationContext) -> SyncResult<ReplicationStats> {
        let mut cp = self.load_checkpoint(ctx).await?;
        let mut stats = self
            .receive(ctx, &mut cp)
            .await
            .context("receiving journal")?;
        stats.merge(self.send(ctx, &mut cp).await.context("sending journal")?);
        if !stats.is_empty() {
            self.mirror_checkpoint(ctx, &cp).await?;
            info!(peer = %self.peer(), ?stats, "journal cycle finished");
        }
        Ok(stats)
    }

    async fn remote_status(&self) -> SyncResult<RemoteStatus> {
        let keys = self.store.list("").await?;
        Ok(RemoteStatus {
            peer: self.peer(),
            documents: keys.len() as u64,
            update_seq: None,
            milestone: self.milestone().await?,
        })
    }

    async fn milestone(&self) -> SyncResult<Option<Milestone>> {
        match self.store.get(MILESTONE_KEY).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_milestone(&self, milestone: &Milestone) -> SyncResult<()> {
        self.store
            .put(MILESTONE_KEY, serde_json::to_vec(milestone)?)
            .await
    }

    async fn send_chunks(&self, ctx: &ReplicationContext, ids: &[ChunkId]) -> SyncResult<usize> {
        let mut cp = self.load_checkpoint(ctx).await?;
        for id in ids {
            ctx.cancel.check()?;
            self.upload_chunk(ctx, id, "").await?;
            cp.sent_files.insert(chunk_key(id));
        }
        cp.save(ctx.backend.as_ref())?;
        Ok(ids.len())
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
        let mut latest: BTreeMap<DocumentId, Entry> = BTreeMap::new();
        for record in self.all_records().await? {
            for sealed in &record.entries {
                let entry = sealed.open(ctx.cipher.as_ref())?;
                let newer = latest
                    .get(&entry.id)
                    .is_none_or(|current| entry.mtime >= current.mtime);
                if newer {
                    latest.insert(entry.id.clone(), entry);
                }
            }
        }
        Ok(latest.into_values().collect())
    }

    async fn push_entries(&self, ctx: &ReplicationContext, entries: &[Entry]) -> SyncResult<usize> {
        let mut cp = self.load_checkpoint(ctx).await?;
        let mut sent = 0;
        for batch in entries.chunks(ctx.settings.batch_size) {
            ctx.cancel.check()?;
            sent += self.send_batch(ctx, &mut cp, batch).await?.sent;
        }
        self.mirror_checkpoint(ctx, &cp).await?;
        Ok(sent)
    }

    async fn wipe(&self) -> SyncResult<()> {
        let removed = self.store.delete_prefix("").await?;
        info!(peer = %self.peer(), removed, "bucket wiped");
        Ok(())
    }

    async fn compact_remote(&self) -> SyncResult<()> {
        debug!(peer = %self.peer(), "object stores have nothing to compact");
        Ok(())
    }

    fn reset_checkpoint(&self, ctx: &ReplicationContext, scope: ResetScope) -> SyncResult<()> {
        let mut cp = CheckpointInfo::load(ctx.backend.as_ref())?.unwrap_or_default();
        if scope.resets_sent() {
            cp.reset_sent();
            for entry in ctx.documents.entries()? {
                ctx.applier.bases().remove(&entry.id)?;
            }
        }
        if scope.resets_received() {
            cp.reset_received();
        }
        cp.save(ctx.backend.as_ref())?;
        info!(peer = %self.peer(), ?scope, "journal checkpoint reset");
        Ok(())
    }
}
