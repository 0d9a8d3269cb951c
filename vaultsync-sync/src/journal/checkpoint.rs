//! Journal replication checkpoint.

use crate::error::SyncResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use vaultsync_storage::LocalBackend;

const CHECKPOINT_KEY: &str = "journal:checkpoint";

/// What this device has exchanged with the bucket.
///
/// Updated in memory as objects are written or read and saved only after
/// the data it describes is durable on both ends, so an interrupted cycle
/// repeats work instead of skipping it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    /// Highest local sequence whose entries are all uploaded.
    pub last_local_seq: u64,
    /// `id@seq` of entries uploaded (or received) above `last_local_seq`.
    pub sent_ids: BTreeSet<String>,
    /// Object keys this device uploaded.
    pub sent_files: BTreeSet<String>,
    /// Journal records applied locally.
    pub received_files: BTreeSet<String>,
    /// Journal records already examined, from any device.
    pub known_ids: BTreeSet<String>,
}

impl CheckpointInfo {
    pub fn load(backend: &dyn LocalBackend) -> SyncResult<Option<Self>> {
        match backend.get_meta(CHECKPOINT_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, backend: &dyn LocalBackend) -> SyncResult<()> {
        backend.put_meta(CHECKPOINT_KEY, &serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Advances `last_local_seq` and drops `sent_ids` it now covers.
    pub fn advance(&mut self, seq: u64) {
        if seq <= self.last_local_seq {
            return;
        }
        self.last_local_seq = seq;
        self.sent_ids.retain(|sent| {
            sent.rsplit_once('@')
                .and_then(|(_, s)| s.parse::<u64>().ok())
                .is_none_or(|s| s > seq)
        });
    }

    pub fn reset_sent(&mut self) {
        self.last_local_seq = 0;
        self.sent_ids.clear();
        self.sent_files.clear();
    }

    pub fn reset_received(&mut self) {
        self.received_files.clear();
        self.known_ids.clear();
    }
}
