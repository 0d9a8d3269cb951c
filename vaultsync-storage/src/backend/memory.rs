use super::{EdenMember, LocalBackend};
use crate::error::StorageResult;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use vaultsync_types::{ChunkId, DocumentId, Entry};

#[derive(Default)]
struct State {
    chunks: HashMap<ChunkId, Vec<u8>>,
    eden: Vec<EdenMember>,
    entries: HashMap<DocumentId, Entry>,
    seq: u64,
    meta: BTreeMap<String, String>,
}

/// Volatile backend for tests and ephemeral devices.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LocalBackend for MemoryBackend {
    fn get_chunk(&self, id: &ChunkId) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.state().chunks.get(id).cloned())
    }

    fn put_chunk(&self, id: &ChunkId, data: &[u8]) -> StorageResult<()> {
        self.state()
            .chunks
            .entry(id.clone())
            .or_insert_with(|| data.to_vec());
        Ok(())
    }

    fn has_chunk(&self, id: &ChunkId) -> StorageResult<bool> {
        Ok(self.state().chunks.contains_key(id))
    }

    fn delete_chunk(&self, id: &ChunkId) -> StorageResult<bool> {
        Ok(self.state().chunks.remove(id).is_some())
    }

    fn chunk_ids(&self) -> StorageResult<Vec<ChunkId>> {
        let mut ids: Vec<_> = self.state().chunks.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn eden_put(&self, member: &EdenMember) -> StorageResult<()> {
        let mut state = self.state();
        if !state.eden.iter().any(|m| m.id == member.id) {
            state.eden.push(member.clone());
        }
        Ok(())
    }

    fn eden_get(&self, id: &ChunkId) -> StorageResult<Option<EdenMember>> {
        Ok(self.state().eden.iter().find(|m| &m.id == id).cloned())
    }

    fn eden_remove(&self, id: &ChunkId) -> StorageResult<()> {
        self.state().eden.retain(|m| &m.id != id);
        Ok(())
    }

    fn eden_members(&self) -> StorageResult<Vec<EdenMember>> {
        Ok(self.state().eden.clone())
    }

    fn get_entry(&self, id: &DocumentId) -> StorageResult<Option<Entry>> {
        Ok(self.state().entries.get(id).cloned())
    }

    fn insert_entry(&self, entry: &Entry) -> StorageResult<u64> {
        let mut state = self.state();
        state.seq += 1;
        let seq = state.seq;
        let mut stored = entry.clone();
        stored.seq = seq;
        state.entries.insert(stored.id.clone(), stored);
        Ok(seq)
    }

    fn entries(&self) -> StorageResult<Vec<Entry>> {
        self.entries_since(0)
    }

    fn entries_since(&self, since: u64) -> StorageResult<Vec<Entry>> {
        let mut out: Vec<_> = self
            .state()
            .entries
            .values()
            .filter(|e| e.seq > since)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.seq);
        Ok(out)
    }

    fn max_seq(&self) -> StorageResult<u64> {
        Ok(self.state().seq)
    }

    fn get_meta(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.state().meta.get(key).cloned())
    }

    fn put_meta(&self, key: &str, value: &str) -> StorageResult<()> {
        self.state().meta.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_meta(&self, key: &str) -> StorageResult<()> {
        self.state().meta.remove(key);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        let mut state = self.state();
        let seq = state.seq;
        *state = State::default();
        // Sequence numbers never go backwards, even across a local reset.
        state.seq = seq;
        Ok(())
    }
}
