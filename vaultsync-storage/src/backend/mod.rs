//! Local persistence behind one trait.
//!
//! Everything a device needs to survive a restart lives here: durable
//! chunks, the Eden tier, entries and a small key/value table used for
//! marked-same pairs, checkpoints and replication cursors.

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::error::StorageResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vaultsync_types::{ChunkId, DocumentId, Entry};

/// A chunk waiting in the Eden tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdenMember {
    pub id: ChunkId,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Storage operations required by the chunk and document stores.
///
/// Implementations must be internally synchronized; every method takes
/// `&self`.
pub trait LocalBackend: Send + Sync {
    // ── Durable chunks ───────────────────────────────────────────

    fn get_chunk(&self, id: &ChunkId) -> StorageResult<Option<Vec<u8>>>;

    /// Stores a chunk. Storing an existing id is a no-op.
    fn put_chunk(&self, id: &ChunkId, data: &[u8]) -> StorageResult<()>;

    fn has_chunk(&self, id: &ChunkId) -> StorageResult<bool>;

    /// Removes a chunk, returning whether it existed.
    fn delete_chunk(&self, id: &ChunkId) -> StorageResult<bool>;

    fn chunk_ids(&self) -> StorageResult<Vec<ChunkId>>;

    // ── Eden ─────────────────────────────────────────────────────

    /// Adds a member. Members keep insertion order.
    fn eden_put(&self, member: &EdenMember) -> StorageResult<()>;

    fn eden_get(&self, id: &ChunkId) -> StorageResult<Option<EdenMember>>;

    fn eden_remove(&self, id: &ChunkId) -> StorageResult<()>;

    /// All members, oldest first.
    fn eden_members(&self) -> StorageResult<Vec<EdenMember>>;

    // ── Entries ──────────────────────────────────────────────────

    fn get_entry(&self, id: &DocumentId) -> StorageResult<Option<Entry>>;

    /// Stores `entry` under the next local sequence number and returns it.
    /// The `seq` field of the argument is ignored.
    fn insert_entry(&self, entry: &Entry) -> StorageResult<u64>;

    /// All entries, ordered by sequence number.
    fn entries(&self) -> StorageResult<Vec<Entry>>;

    /// Entries with `seq > since`, ordered by sequence number.
    fn entries_since(&self, since: u64) -> StorageResult<Vec<Entry>>;

    /// Highest sequence number assigned so far (0 when empty).
    fn max_seq(&self) -> StorageResult<u64>;

    // ── Key/value ────────────────────────────────────────────────

    fn get_meta(&self, key: &str) -> StorageResult<Option<String>>;

    fn put_meta(&self, key: &str, value: &str) -> StorageResult<()>;

    fn delete_meta(&self, key: &str) -> StorageResult<()>;

    /// Drops all chunks, Eden members, entries and metadata.
    fn clear(&self) -> StorageResult<()>;
}
