//! Per-path entry metadata and the marked-same table.
//!
//! The marked-same table remembers mtime pairs the user (or the resolver)
//! has declared to describe identical content. Freshness comparison
//! consults it before looking at timestamps, so two devices that disagree
//! only on mtime stop ping-ponging the same file.

use crate::backend::LocalBackend;
use crate::error::StorageResult;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};
use vaultsync_crypto::obfuscate_path;
use vaultsync_types::{
    compare_mtime, truncate_mtime, DocumentId, Entry, FileStat, Freshness,
};

const MARKED_SAME_PREFIX: &str = "same:";

/// How document ids are derived from paths.
#[derive(Clone, Default)]
pub enum IdStrategy {
    /// The id is the (escaped) path.
    #[default]
    Plain,
    /// The id is an opaque digest keyed by the passphrase.
    Obfuscated(String),
}

impl fmt::Debug for IdStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("Plain"),
            Self::Obfuscated(_) => f.write_str("Obfuscated([REDACTED])"),
        }
    }
}

/// Entry storage keyed by document id.
pub struct DocumentStore {
    backend: Arc<dyn LocalBackend>,
    ids: IdStrategy,
}

impl DocumentStore {
    pub fn new(backend: Arc<dyn LocalBackend>, ids: IdStrategy) -> Self {
        Self { backend, ids }
    }

    /// Document id for `path`.
    pub fn id_for(&self, path: &str) -> DocumentId {
        match &self.ids {
            IdStrategy::Plain => DocumentId::from_path(path),
            IdStrategy::Obfuscated(passphrase) => obfuscate_path(path, passphrase),
        }
    }

    pub fn get(&self, path: &str) -> StorageResult<Option<Entry>> {
        self.backend.get_entry(&self.id_for(path))
    }

    pub fn get_by_id(&self, id: &DocumentId) -> StorageResult<Option<Entry>> {
        self.backend.get_entry(id)
    }

    /// Stores `entry` under the next local sequence number.
    pub fn put(&self, entry: &Entry) -> StorageResult<Entry> {
        let seq = self.backend.insert_entry(entry)?;
        trace!(id = %entry.id, seq, deleted = entry.deleted, "stored entry");
        let mut stored = entry.clone();
        stored.seq = seq;
        Ok(stored)
    }

    /// Replaces the entry for `path` with a tombstone and forgets its
    /// marked-same pairs. Returns `None` if the path was unknown.
    pub fn delete(&self, path: &str, mtime: u64) -> StorageResult<Option<Entry>> {
        let Some(existing) = self.get(path)? else {
            return Ok(None);
        };
        if existing.deleted {
            return Ok(Some(existing));
        }
        let tombstone = self.put(&existing.tombstone(mtime.max(existing.mtime)))?;
        self.unmark_changes(path)?;
        debug!(path, "entry deleted");
        Ok(Some(tombstone))
    }

    /// Live (non-deleted) entries.
    pub fn list(&self) -> StorageResult<Vec<Entry>> {
        Ok(self
            .backend
            .entries()?
            .into_iter()
            .filter(|e| !e.deleted)
            .collect())
    }

    /// All entries, tombstones included.
    pub fn entries(&self) -> StorageResult<Vec<Entry>> {
        self.backend.entries()
    }

    /// Entries changed after `seq`, in sequence order.
    pub fn changes_since(&self, seq: u64) -> StorageResult<Vec<Entry>> {
        self.backend.entries_since(seq)
    }

    pub fn current_seq(&self) -> StorageResult<u64> {
        self.backend.max_seq()
    }

    // ── Marked-same table ────────────────────────────────────────

    /// Records that `mtime_a` and `mtime_b` describe the same content of
    /// `path`.
    ///
    /// Equal mtimes are ignored. If the stored set already contains either
    /// mtime the pair joins it; otherwise the pair replaces it.
    pub fn mark_changes_are_same(&self, path: &str, mtime_a: u64, mtime_b: u64) -> StorageResult<()> {
        let a = truncate_mtime(mtime_a);
        let b = truncate_mtime(mtime_b);
        if a == b {
            return Ok(());
        }
        let mut set = self.marked_same(path)?;
        if !(set.contains(&a) || set.contains(&b)) {
            set.clear();
        }
        set.insert(a);
        set.insert(b);
        self.backend
            .put_meta(&marked_key(path), &serde_json::to_string(&set)?)?;
        debug!(path, ?set, "marked changes as same");
        Ok(())
    }

    /// Forgets the marked-same set for `path`.
    pub fn unmark_changes(&self, path: &str) -> StorageResult<()> {
        self.backend.delete_meta(&marked_key(path))
    }

    /// Returns `Some(Even)` when every mtime in `mtimes` is in the
    /// marked-same set for `path`.
    pub fn is_marked_as_same_changes(
        &self,
        path: &str,
        mtimes: &[u64],
    ) -> StorageResult<Option<Freshness>> {
        let set = self.marked_same(path)?;
        if set.is_empty() || mtimes.is_empty() {
            return Ok(None);
        }
        let all = mtimes.iter().all(|m| set.contains(&truncate_mtime(*m)));
        Ok(all.then_some(Freshness::Even))
    }

    /// Compares a base and a target version of `path`. A missing side is
    /// older than any present one.
    pub fn compare_file_freshness(
        &self,
        path: &str,
        base: Option<FileStat>,
        target: Option<FileStat>,
    ) -> StorageResult<Freshness> {
        let (base, target) = match (base, target) {
            (None, None) => return Ok(Freshness::Even),
            (None, Some(_)) => return Ok(Freshness::TargetIsNew),
            (Some(_), None) => return Ok(Freshness::BaseIsNew),
            (Some(b), Some(t)) => (b, t),
        };
        if base.mtime != 0
            && target.mtime != 0
            && self
                .is_marked_as_same_changes(path, &[base.mtime, target.mtime])?
                .is_some()
        {
            return Ok(Freshness::Even);
        }
        Ok(compare_mtime(base.mtime, target.mtime))
    }

    fn marked_same(&self, path: &str) -> StorageResult<BTreeSet<u64>> {
        match self.backend.get_meta(&marked_key(path))? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(BTreeSet::new()),
        }
    }
}

fn marked_key(path: &str) -> String {
    format!("{MARKED_SAME_PREFIX}{path}")
}
