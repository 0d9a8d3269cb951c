//! Sync engine - one per device.
//!
//! Owns the local stores, the cipher and the configured [`Transport`], and
//! drives replication cycles through the [`Replicator`] trait. Local file
//! changes enter through [`SyncEngine::store_file`] / [`SyncEngine::scan_local`];
//! remote changes leave through the [`EntryApplier`].

use crate::applier::{BaseStore, EntryApplier};
use crate::config::{ConfigChange, EncryptionConfig, EngineConfig};
use crate::conflict::{ConflictChoice, ConflictRecord, ConflictResolver};
use crate::error::{ResultExt, SyncError, SyncResult};
use crate::fence::{CancelToken, CycleFence};
use crate::fs::FileAccess;
use crate::lock::{LockCoordinator, Milestone};
use crate::retry::{retry, RetryConfig};
use crate::transport::{
    RemoteStatus, ReplicationContext, ReplicationStats, Replicator, ResetScope, Transport,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use vaultsync_crypto::{ChunkCipher, ContentHasher, PassphraseEncryptor, PassthroughEncryptor};
use vaultsync_storage::{ChunkStore, DocumentStore, IdStrategy, LocalBackend};
use vaultsync_types::{now_millis, DeviceId, Entry, FileStat};

const REMOTE_EPOCH_KEY: &str = "remote_epoch";

/// Result of a full local scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Paths whose content or mtime changed.
    pub stored: Vec<String>,
    /// Paths recorded as deleted.
    pub deleted: Vec<String>,
}

/// The sync engine for one device.
pub struct SyncEngine {
    pub(crate) config: EngineConfig,
    pub(crate) backend: Arc<dyn LocalBackend>,
    pub(crate) files: Arc<dyn FileAccess>,
    pub(crate) transport: Arc<Transport>,
    pub(crate) documents: Arc<DocumentStore>,
    pub(crate) chunks: Arc<ChunkStore>,
    pub(crate) cipher: Arc<dyn ChunkCipher>,
    pub(crate) resolver: Arc<ConflictResolver>,
    pub(crate) applier: Arc<EntryApplier>,
    pub(crate) locks: LockCoordinator,
    pub(crate) fence: CycleFence,
    pub(crate) cancel: CancelToken,
    fetch_limit: Arc<Semaphore>,
}

impl SyncEngine {
    /// Builds an engine. Key derivation for an encrypted configuration runs
    /// on the blocking pool.
    pub async fn new(
        config: EngineConfig,
        backend: Arc<dyn LocalBackend>,
        files: Arc<dyn FileAccess>,
        transport: Transport,
    ) -> SyncResult<Self> {
        Self::build(config, backend, files, Arc::new(transport)).await
    }

    async fn build(
        config: EngineConfig,
        backend: Arc<dyn LocalBackend>,
        files: Arc<dyn FileAccess>,
        transport: Arc<Transport>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let cipher = build_cipher(&config.encryption).await?;

        let (hasher, ids) = match config.encryption.active_passphrase() {
            Some(passphrase) => (
                ContentHasher::with_passphrase(config.hash_algorithm, passphrase),
                if config.encryption.obfuscate_paths {
                    IdStrategy::Obfuscated(passphrase.to_string())
                } else {
                    IdStrategy::Plain
                },
            ),
            None => (ContentHasher::new(config.hash_algorithm), IdStrategy::Plain),
        };

        let documents = Arc::new(DocumentStore::new(Arc::clone(&backend), ids));
        let chunks = Arc::new(ChunkStore::new(
            Arc::clone(&backend),
            hasher,
            config.splitter,
            config.eden,
        ));
        let resolver = Arc::new(ConflictResolver::new(config.conflict.clone()));
        let applier = Arc::new(EntryApplier::new(
            Arc::clone(&documents),
            Arc::clone(&chunks),
            Arc::clone(&files),
            Arc::clone(&resolver),
            BaseStore::new(Arc::clone(&backend)),
        ));
        let locks = LockCoordinator::new(config.device_id, transport.replicator().peer());

        info!(
            device = %config.device_id,
            peer = %transport.replicator().peer(),
            encrypted = cipher.is_encrypting(),
            "sync engine created"
        );

        Ok(Self {
            fetch_limit: Arc::new(Semaphore::new(config.replication.fetch_concurrency)),
            config,
            backend,
            files,
            transport,
            documents,
            chunks,
            cipher,
            resolver,
            applier,
            locks,
            fence: CycleFence::new(),
            cancel: CancelToken::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device_id(&self) -> DeviceId {
        self.config.device_id
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    pub fn replicator(&self) -> &dyn Replicator {
        self.transport.replicator()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Context handed to the transport for one call.
    pub fn context(&self) -> ReplicationContext {
        ReplicationContext {
            device_id: self.config.device_id,
            documents: Arc::clone(&self.documents),
            chunks: Arc::clone(&self.chunks),
            backend: Arc::clone(&self.backend),
            applier: Arc::clone(&self.applier),
            cipher: Arc::clone(&self.cipher),
            cancel: self.cancel.clone(),
            fetch_limit: Arc::clone(&self.fetch_limit),
            settings: self.config.replication.clone(),
        }
    }

    // ── Local changes ───────────────────────────────────────────────

    /// Records the current state of `path`. Returns the stored entry, or
    /// `None` if nothing changed. A missing file is recorded as deleted.
    pub async fn store_file(&self, path: &str) -> SyncResult<Option<Entry>> {
        let (Some(content), Some(stat)) = (
            self.files.read_file(path).await?,
            self.files.stat_file(path).await?,
        ) else {
            return self.delete_file(path);
        };

        let existing = self.documents.get(path)?;
        if let Some(existing) = existing.as_ref().filter(|e| !e.deleted) {
            if existing.stat() == stat {
                return Ok(None);
            }
        }

        // Chunks are committed before the entry that references them.
        let chunk_ids = self.chunks.store_content(&content)?;
        let entry = Entry::new(self.documents.id_for(path), path, stat, chunk_ids);

        if let Some(existing) = existing.as_ref().filter(|e| !e.deleted) {
            if existing.same_content(&entry) {
                self.documents
                    .mark_changes_are_same(path, existing.mtime, stat.mtime)?;
                debug!(path, "mtime changed without content change");
                return Ok(None);
            }
        }

        let stored = self.documents.put(&entry)?;
        debug!(path, seq = stored.seq, chunks = stored.chunk_ids.len(), "stored local change");
        Ok(Some(stored))
    }

    /// Records `path` as deleted. Returns the tombstone if the path was live.
    pub fn delete_file(&self, path: &str) -> SyncResult<Option<Entry>> {
        match self.documents.get(path)? {
            Some(existing) if !existing.deleted => {
                Ok(self.documents.delete(path, now_millis())?)
            }
            _ => Ok(None),
        }
    }

    /// Stores every changed file and records deletions of vanished ones.
    pub async fn scan_local(&self) -> SyncResult<ScanReport> {
        let mut report = ScanReport::default();
        let present: BTreeSet<String> = self.files.list_files().await?.into_iter().collect();

        for path in &present {
            self.cancel.check()?;
            if self
                .store_file(path)
                .await
                .context(format!("store {path}"))?
                .is_some()
            {
                report.stored.push(path.clone());
            }
        }
        for entry in self.documents.list()? {
            if !present.contains(&entry.path) && self.delete_file(&entry.path)?.is_some() {
                report.deleted.push(entry.path);
            }
        }
        info!(
            stored = report.stored.len(),
            deleted = report.deleted.len(),
            "local scan finished"
        );
        Ok(report)
    }

    // ── Remote ──────────────────────────────────────────────────────

    /// Connects to the remote and checks it matches this device. Creates
    /// the milestone on a fresh remote.
    pub async fn try_connect(&self) -> SyncResult<Milestone> {
        let replicator = self.replicator();
        retry("connect", &RetryConfig::connect(), || replicator.try_connect()).await?;

        let milestone = match replicator.milestone().await? {
            Some(milestone) => milestone,
            None => {
                let milestone = Milestone::new(
                    self.chunks.hasher().tweak(),
                    self.cipher.make_verifier()?,
                    self.config.replication.chunk_scheme,
                );
                replicator.put_milestone(&milestone).await?;
                info!(peer = %replicator.peer(), "initialized remote milestone");
                milestone
            }
        };

        self.locks.verify_compatibility(
            &milestone,
            &self.chunks.hasher().tweak(),
            |verifier| self.cipher.test_passphrase(verifier),
            self.cipher.is_encrypting(),
        )?;
        self.observe_epoch(&milestone)?;
        Ok(milestone)
    }

    /// Voids local replication history when the remote was replaced since
    /// the last connection.
    fn observe_epoch(&self, milestone: &Milestone) -> SyncResult<()> {
        let seen = self.backend.get_meta(REMOTE_EPOCH_KEY)?;
        if seen.as_deref() == Some(milestone.epoch.as_str()) {
            return Ok(());
        }
        if seen.is_some() {
            warn!(
                peer = %self.replicator().peer(),
                "remote was rebuilt or wiped, resetting replication history"
            );
            self.replicator()
                .reset_checkpoint(&self.context(), ResetScope::Full)?;
        }
        self.remember_epoch(Some(milestone))
    }

    pub(crate) fn remember_epoch(&self, milestone: Option<&Milestone>) -> SyncResult<()> {
        match milestone {
            Some(milestone) => self.backend.put_meta(REMOTE_EPOCH_KEY, &milestone.epoch)?,
            None => self.backend.delete_meta(REMOTE_EPOCH_KEY)?,
        }
        Ok(())
    }

    /// Runs one replication cycle: push local changes, pull remote ones.
    pub async fn replicate(&self) -> SyncResult<ReplicationStats> {
        self.cancel.check()?;
        let _cycle = self.fence.enter_cycle().await;

        let milestone = self.try_connect().await?;
        self.locks.check_write(&milestone)?;

        let ctx = self.context();
        let replicator = self.replicator();
        let stats = retry("replicate", &self.config.retry, || replicator.push_pull(&ctx))
            .await
            .context(format!("replicate with {}", replicator.peer()))?;

        let graduated = self.chunks.compact_due()?;
        if graduated > 0 {
            debug!(graduated, "eden chunks graduated after cycle");
        }
        info!(
            sent = stats.sent,
            received = stats.received,
            conflicts = stats.conflicts,
            "replication cycle finished"
        );
        Ok(stats)
    }

    pub async fn remote_status(&self) -> SyncResult<RemoteStatus> {
        self.replicator().remote_status().await
    }

    /// Stops the running cycle at the next chunk boundary and refuses new
    /// ones until [`SyncEngine::resume`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn resume(&self) {
        self.cancel.reset();
    }

    // ── Conflicts ───────────────────────────────────────────────────

    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.resolver.conflicts()
    }

    /// Marks `path` as the document in front of the user. With
    /// `check_only_on_open`, this surfaces a deferred conflict.
    pub fn open_document(&self, path: &str) -> Option<ConflictRecord> {
        self.resolver.set_active(Some(path));
        self.resolver.open(path)
    }

    pub fn set_active_document(&self, path: Option<&str>) {
        self.resolver.set_active(path);
    }

    /// Settles a queued conflict. The result is stored locally and pushed
    /// by the next cycle.
    pub async fn resolve_conflict(&self, path: &str, choice: ConflictChoice) -> SyncResult<Entry> {
        let record = self
            .resolver
            .take(path)
            .ok_or_else(|| SyncError::Config(format!("no conflict queued for {path}")))?;
        let base = self.applier.bases().get(&record.id)?;

        let resolved = match choice {
            ConflictChoice::KeepRemote => self.applier.materialize(&record.remote).await?,
            ConflictChoice::KeepLocal => {
                let local = self.documents.get(path)?.unwrap_or(record.local);
                self.applier.readvertise(&local, &record.remote, base.as_ref())?
            }
            ConflictChoice::Merged(content) => {
                let mtime = now_millis().max(record.local.mtime).max(record.remote.mtime);
                let chunk_ids = self.chunks.store_content(&content)?;
                self.files.write_file(path, &content, mtime).await?;
                let merged = Entry::new(
                    record.id.clone(),
                    path,
                    FileStat {
                        mtime,
                        size: content.len() as u64,
                    },
                    chunk_ids,
                );
                self.applier
                    .readvertise(&merged, &record.remote, base.as_ref())?
            }
        };
        info!(path, seq = resolved.seq, "conflict resolved");
        Ok(resolved)
    }

    // ── Configuration ───────────────────────────────────────────────

    /// Builds an engine for `next` over the same local state. Destructive
    /// changes need `rebuild_acknowledged`, after which the caller is
    /// expected to rebuild or fetch the remote.
    pub async fn apply_config(
        &self,
        next: EngineConfig,
        rebuild_acknowledged: bool,
    ) -> SyncResult<SyncEngine> {
        let changes = self.config.transition_to(&next, rebuild_acknowledged)?;
        info!(?changes, "applying configuration");
        let transport = if changes.contains(&ConfigChange::Remote) {
            Arc::new(Transport::from_config(&next)?)
        } else {
            Arc::clone(&self.transport)
        };
        if changes.iter().any(|c| c.is_destructive()) {
            warn!(?changes, "destructive configuration change acknowledged");
        }
        Self::build(next, Arc::clone(&self.backend), Arc::clone(&self.files), transport).await
    }
}

async fn build_cipher(encryption: &EncryptionConfig) -> SyncResult<Arc<dyn ChunkCipher>> {
    let Some(passphrase) = encryption.active_passphrase() else {
        return Ok(Arc::new(PassthroughEncryptor));
    };
    let passphrase = passphrase.to_string();
    let (kdf, mode) = (encryption.kdf, encryption.iteration_mode);
    let encryptor = tokio::task::spawn_blocking(move || -> SyncResult<PassphraseEncryptor> {
        let encryptor = PassphraseEncryptor::new(&passphrase, kdf, mode)?;
        encryptor.cipher().warm_up(0)?;
        Ok(encryptor)
    })
    .await
    .map_err(|e| SyncError::Io(std::io::Error::other(e)))??;
    Ok(Arc::new(encryptor))
}
