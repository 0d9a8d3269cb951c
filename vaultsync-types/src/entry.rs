//! Per-path document metadata.

use crate::ids::{ChunkId, DocumentId};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata for one vault path, referencing its content as an ordered list
/// of chunks.
///
/// `seq` is assigned by the local document store on every write and is
/// meaningless across devices. `remote_rev` is the last MVCC revision seen
/// from a document-replication remote, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: DocumentId,
    pub path: String,
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime: u64,
    pub size: u64,
    pub deleted: bool,
    pub chunk_ids: Vec<ChunkId>,
    #[serde(default)]
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_rev: Option<String>,
}

impl Entry {
    /// Creates a live entry for `path` with the given content layout.
    pub fn new(
        id: DocumentId,
        path: impl Into<String>,
        stat: FileStat,
        chunk_ids: Vec<ChunkId>,
    ) -> Self {
        Self {
            id,
            path: path.into(),
            mtime: stat.mtime,
            size: stat.size,
            deleted: false,
            chunk_ids,
            seq: 0,
            remote_rev: None,
        }
    }

    /// Returns a tombstone for this entry, stamped with `mtime`.
    #[must_use]
    pub fn tombstone(&self, mtime: u64) -> Self {
        Self {
            mtime,
            size: 0,
            deleted: true,
            chunk_ids: Vec::new(),
            ..self.clone()
        }
    }

    /// The file stat this entry describes.
    pub fn stat(&self) -> FileStat {
        FileStat {
            mtime: self.mtime,
            size: self.size,
        }
    }

    /// Whether both entries describe the same content layout.
    pub fn same_content(&self, other: &Entry) -> bool {
        self.deleted == other.deleted
            && self.size == other.size
            && self.chunk_ids == other.chunk_ids
    }

    /// Identifier used by the journal transport to remember what was sent.
    pub fn sent_id(&self) -> String {
        format!("{}@{}", self.id, self.seq)
    }
}

/// Modification time and size of a file, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileStat {
    pub mtime: u64,
    pub size: u64,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
