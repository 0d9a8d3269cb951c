//! Conflict resolution.
//!
//! Every received entry passes through [`ConflictResolver::resolve`]. The
//! verdict is driven by what each side did since the last successful
//! exchange (the [`SyncBase`]) and, when there is no shared history, by
//! [`DocumentStore::compare_file_freshness`]. Diverged edits go through the
//! auto-merge strategies; whatever they cannot settle is queued for the
//! host UI.

use crate::applier::SyncBase;
use crate::config::ConflictPolicy;
use crate::error::SyncResult;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};
use vaultsync_storage::DocumentStore;
use vaultsync_types::{ChunkId, DocumentId, Entry, Freshness};

/// Verdict for one received entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local version; the remote one is stale.
    LocalWins,
    /// Materialize the remote version.
    RemoteWins,
    /// Both sides describe the same content.
    Identical,
    /// Both sides changed and nothing settled it.
    Conflict,
}

/// A pluggable rule for settling diverged edits without asking the user.
pub trait AutoMergeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns a verdict other than `Conflict`, or `None` to pass.
    fn try_resolve(&self, local: &Entry, remote: &Entry) -> Option<Resolution>;
}

/// Settles conflicts where both sides reference the same chunk sequence.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentEqualStrategy;

impl AutoMergeStrategy for ContentEqualStrategy {
    fn name(&self) -> &'static str {
        "content-equal"
    }

    fn try_resolve(&self, local: &Entry, remote: &Entry) -> Option<Resolution> {
        local.same_content(remote).then_some(Resolution::Identical)
    }
}

/// Keeps whichever side has the later mtime.
///
/// Ties are broken on the chunk id sequence so every device picks the same
/// winner for the same pair.
#[derive(Debug, Default, Clone, Copy)]
pub struct PreferNewerStrategy;

impl PreferNewerStrategy {
    fn order(local: &Entry, remote: &Entry) -> Ordering {
        local
            .mtime
            .cmp(&remote.mtime)
            .then_with(|| remote.deleted.cmp(&local.deleted))
            .then_with(|| local.chunk_ids.cmp(&remote.chunk_ids))
    }
}

impl AutoMergeStrategy for PreferNewerStrategy {
    fn name(&self) -> &'static str {
        "prefer-newer"
    }

    fn try_resolve(&self, local: &Entry, remote: &Entry) -> Option<Resolution> {
        Some(match Self::order(local, remote) {
            Ordering::Greater => Resolution::LocalWins,
            Ordering::Less => Resolution::RemoteWins,
            Ordering::Equal => Resolution::Identical,
        })
    }
}

/// A conflict waiting for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    pub path: String,
    pub id: DocumentId,
    pub local: Entry,
    pub remote: Entry,
    pub detected_at: DateTime<Utc>,
}

/// How the user settled a queued conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictChoice {
    KeepLocal,
    KeepRemote,
    /// Replace both with merged content.
    Merged(Vec<u8>),
}

#[derive(Default)]
struct Queue {
    visible: BTreeMap<String, ConflictRecord>,
    /// Parked until the document is opened.
    deferred: BTreeMap<String, ConflictRecord>,
    active: Option<String>,
}

/// Freshness-driven resolver with a manual queue.
pub struct ConflictResolver {
    policy: ConflictPolicy,
    strategies: Vec<Box<dyn AutoMergeStrategy>>,
    queue: Mutex<Queue>,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        let mut strategies: Vec<Box<dyn AutoMergeStrategy>> = Vec::new();
        if policy.prefer_newer {
            strategies.push(Box::new(PreferNewerStrategy));
        }
        Self {
            policy,
            strategies,
            queue: Mutex::new(Queue::default()),
        }
    }

    /// Appends a strategy. Strategies run in insertion order.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Box<dyn AutoMergeStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn policy(&self) -> &ConflictPolicy {
        &self.policy
    }

    /// Classifies `remote` against the local state by history and
    /// freshness alone, without touching the queue.
    pub fn classify(
        &self,
        documents: &DocumentStore,
        local: Option<&Entry>,
        remote: &Entry,
        base: Option<&SyncBase>,
    ) -> SyncResult<Resolution> {
        let Some(local) = local else {
            return Ok(Resolution::RemoteWins);
        };
        if let Some(base) = base {
            let remote_changed = !base.matches(remote);
            let local_changed = local.seq != base.seq;
            return Ok(match (local_changed, remote_changed) {
                (_, false) => Resolution::LocalWins,
                (false, true) => Resolution::RemoteWins,
                (true, true) => Resolution::Conflict,
            });
        }
        let freshness =
            documents.compare_file_freshness(&remote.path, Some(local.stat()), Some(remote.stat()))?;
        Ok(match freshness {
            Freshness::BaseIsNew => Resolution::LocalWins,
            Freshness::TargetIsNew => Resolution::RemoteWins,
            Freshness::Even => Resolution::Conflict,
        })
    }

    /// Short-circuits identical content, classifies `remote`, runs the
    /// strategies on a conflict and queues it if none of them settles it.
    pub fn resolve(
        &self,
        documents: &DocumentStore,
        local: Option<&Entry>,
        remote: &Entry,
        base: Option<&SyncBase>,
    ) -> SyncResult<Resolution> {
        if let Some(verdict) = local.and_then(|l| ContentEqualStrategy.try_resolve(l, remote)) {
            return Ok(verdict);
        }
        let verdict = self.classify(documents, local, remote, base)?;
        let (Resolution::Conflict, Some(local)) = (verdict, local) else {
            return Ok(verdict);
        };
        Ok(self.settle(local, remote))
    }

    fn settle(&self, local: &Entry, remote: &Entry) -> Resolution {
        for strategy in &self.strategies {
            if let Some(verdict) = strategy.try_resolve(local, remote) {
                debug!(path = %remote.path, strategy = strategy.name(), ?verdict, "conflict auto-resolved");
                return verdict;
            }
        }

        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if self.policy.prompt_only_active && queue.active.as_deref() != Some(remote.path.as_str()) {
            if let Some(verdict) = PreferNewerStrategy.try_resolve(local, remote) {
                debug!(path = %remote.path, ?verdict, "inactive document resolved by mtime");
                return verdict;
            }
        }

        let record = ConflictRecord {
            path: remote.path.clone(),
            id: remote.id.clone(),
            local: local.clone(),
            remote: remote.clone(),
            detected_at: Utc::now(),
        };
        if self.policy.check_only_on_open && queue.active.as_deref() != Some(remote.path.as_str()) {
            queue.deferred.insert(record.path.clone(), record);
        } else {
            info!(path = %remote.path, "conflict queued for manual resolution");
            queue.visible.insert(record.path.clone(), record);
        }
        Resolution::Conflict
    }

    /// Conflicts waiting for the user, ordered by path.
    pub fn conflicts(&self) -> Vec<ConflictRecord> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .visible
            .values()
            .cloned()
            .collect()
    }

    /// Chunks referenced by either side of any queued conflict. Garbage
    /// collection must keep them.
    pub fn referenced_chunks(&self) -> HashSet<ChunkId> {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue
            .visible
            .values()
            .chain(queue.deferred.values())
            .flat_map(|r| r.local.chunk_ids.iter().chain(r.remote.chunk_ids.iter()))
            .cloned()
            .collect()
    }

    /// Whether `path` has a conflict, visible or deferred.
    pub fn has_conflict(&self, path: &str) -> bool {
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.visible.contains_key(path) || queue.deferred.contains_key(path)
    }

    /// Removes and returns the conflict for `path`.
    pub fn take(&self, path: &str) -> Option<ConflictRecord> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue
            .visible
            .remove(path)
            .or_else(|| queue.deferred.remove(path))
    }

    /// Marks `path` as the document in front of the user.
    pub fn set_active(&self, path: Option<&str>) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active = path.map(str::to_string);
    }

    /// Called when a document is opened: makes it active and surfaces a
    /// deferred conflict for it.
    pub fn open(&self, path: &str) -> Option<ConflictRecord> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.active = Some(path.to_string());
        if let Some(record) = queue.deferred.remove(path) {
            queue.visible.insert(path.to_string(), record);
        }
        queue.visible.get(path).cloned()
    }
}
