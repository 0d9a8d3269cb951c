//! Eden: the bounded tier holding recently created chunks.
//!
//! Three independent thresholds apply: member count, cumulative bytes and
//! the age of the oldest member. When any of them is reached the oldest
//! members graduate into the durable tier until none is.

use crate::backend::{EdenMember, LocalBackend};
use crate::error::StorageResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use vaultsync_types::ChunkId;

/// Eden thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdenConfig {
    pub max_count: usize,
    pub max_bytes: u64,
    pub max_age_secs: u64,
}

impl Default for EdenConfig {
    fn default() -> Self {
        Self {
            max_count: 10,
            max_bytes: 256 * 1024,
            max_age_secs: 10,
        }
    }
}

/// Which threshold forced a graduation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdenTrigger {
    Count,
    Bytes,
    Age,
}

/// Snapshot of the tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdenStats {
    pub count: usize,
    pub bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
}

/// Recent-chunk tier stored in a [`LocalBackend`].
pub struct Eden {
    config: EdenConfig,
    backend: Arc<dyn LocalBackend>,
}

impl Eden {
    pub fn new(config: EdenConfig, backend: Arc<dyn LocalBackend>) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> EdenConfig {
        self.config
    }

    pub fn get(&self, id: &ChunkId) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.backend.eden_get(id)?.map(|m| m.data))
    }

    pub fn contains(&self, id: &ChunkId) -> StorageResult<bool> {
        Ok(self.backend.eden_get(id)?.is_some())
    }

    /// Admits a new chunk, then graduates members as needed. Returns the
    /// ids moved into the durable tier.
    pub fn admit(&self, id: &ChunkId, data: &[u8], now: DateTime<Utc>) -> StorageResult<Vec<ChunkId>> {
        self.insert(id, data, now)?;
        self.graduate_due(now)
    }

    pub(crate) fn insert(&self, id: &ChunkId, data: &[u8], now: DateTime<Utc>) -> StorageResult<()> {
        self.backend.eden_put(&EdenMember {
            id: id.clone(),
            data: data.to_vec(),
            created_at: now,
        })
    }

    /// Graduates oldest members while any threshold is reached.
    pub fn graduate_due(&self, now: DateTime<Utc>) -> StorageResult<Vec<ChunkId>> {
        let members = self.backend.eden_members()?;
        let mut bytes: u64 = members.iter().map(|m| m.data.len() as u64).sum();
        let mut graduated = Vec::new();

        for (idx, member) in members.iter().enumerate() {
            let remaining = &members[idx..];
            let Some(trigger) = self.exceeded(remaining.len(), bytes, remaining.first(), now) else {
                break;
            };
            debug!(chunk = %member.id, ?trigger, "graduating chunk from eden");
            self.graduate(member)?;
            bytes -= member.data.len() as u64;
            graduated.push(member.id.clone());
        }
        Ok(graduated)
    }

    /// Graduates every member regardless of thresholds.
    pub fn flush(&self) -> StorageResult<Vec<ChunkId>> {
        let members = self.backend.eden_members()?;
        let mut moved = Vec::with_capacity(members.len());
        for member in &members {
            self.graduate(member)?;
            moved.push(member.id.clone());
        }
        Ok(moved)
    }

    /// Drops a member without graduating it.
    pub fn discard(&self, id: &ChunkId) -> StorageResult<()> {
        self.backend.eden_remove(id)
    }

    pub fn member_ids(&self) -> StorageResult<Vec<ChunkId>> {
        Ok(self
            .backend
            .eden_members()?
            .into_iter()
            .map(|m| m.id)
            .collect())
    }

    pub fn stats(&self) -> StorageResult<EdenStats> {
        let members = self.backend.eden_members()?;
        Ok(EdenStats {
            count: members.len(),
            bytes: members.iter().map(|m| m.data.len() as u64).sum(),
            oldest: members.first().map(|m| m.created_at),
        })
    }

    /// The first threshold reached by a tier with these totals, if any.
    pub fn exceeded(
        &self,
        count: usize,
        bytes: u64,
        oldest: Option<&EdenMember>,
        now: DateTime<Utc>,
    ) -> Option<EdenTrigger> {
        if count == 0 {
            return None;
        }
        if count >= self.config.max_count {
            return Some(EdenTrigger::Count);
        }
        if bytes >= self.config.max_bytes {
            return Some(EdenTrigger::Bytes);
        }
        let max_age = Duration::seconds(self.config.max_age_secs.min(i64::MAX as u64 / 1000) as i64);
        match oldest {
            Some(m) if now - m.created_at >= max_age => Some(EdenTrigger::Age),
            _ => None,
        }
    }

    fn graduate(&self, member: &EdenMember) -> StorageResult<()> {
        // Durable write first; a crash in between leaves a harmless duplicate.
        self.backend.put_chunk(&member.id, &member.data)?;
        self.backend.eden_remove(&member.id)
    }
}
