//! Document shapes stored in the CouchDB database.
//!
//! Entries are `plain` documents `{_id, _rev, path, mtime, size, deleted,
//! chunkIds}`; chunks are `leaf` documents whose `_id` is the chunk id and
//! whose `data` is the base64 of the sealed payload. Deletions are kept as
//! ordinary documents with `deleted: true` so they replicate like edits.

use crate::config::ChunkRevisionScheme;
use crate::error::{SyncError, SyncResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use vaultsync_crypto::ChunkCipher;
use vaultsync_types::{ChunkId, DocumentId, Entry};

/// `_local` documents are not replicated and never appear in `_changes`.
pub const MILESTONE_ID: &str = "_local/vaultsync_milestone";

pub const ENTRY_TYPE: &str = "plain";
pub const CHUNK_TYPE: &str = "leaf";

/// Entry document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDoc {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    /// Path, sealed when encryption is enabled.
    pub path: String,
    pub mtime: u64,
    pub size: u64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(rename = "chunkIds", default)]
    pub chunk_ids: Vec<String>,
}

impl EntryDoc {
    pub fn from_entry(
        entry: &Entry,
        cipher: &dyn ChunkCipher,
        rev: Option<String>,
    ) -> SyncResult<Self> {
        Ok(Self {
            id: entry.id.as_str().to_string(),
            rev,
            kind: ENTRY_TYPE.to_string(),
            path: cipher.seal_path(&entry.path)?,
            mtime: entry.mtime,
            size: entry.size,
            deleted: entry.deleted,
            chunk_ids: entry.chunk_ids.iter().map(ToString::to_string).collect(),
        })
    }

    pub fn to_entry(&self, cipher: &dyn ChunkCipher) -> SyncResult<Entry> {
        let chunk_ids = self
            .chunk_ids
            .iter()
            .map(|raw| {
                ChunkId::from_str(raw)
                    .map_err(|e| SyncError::Protocol(format!("document {}: {e}", self.id)))
            })
            .collect::<SyncResult<Vec<_>>>()?;
        Ok(Entry {
            id: DocumentId::from_raw(self.id.clone()),
            path: cipher.open_path(&self.path)?,
            mtime: self.mtime,
            size: self.size,
            deleted: self.deleted,
            chunk_ids,
            seq: 0,
            remote_rev: self.rev.clone(),
        })
    }
}

/// Chunk document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDoc {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
    /// Whether `data` is sealed.
    #[serde(rename = "e_", default)]
    pub encrypted: bool,
}

impl ChunkDoc {
    pub fn seal(
        id: &ChunkId,
        data: &[u8],
        cipher: &dyn ChunkCipher,
        scheme: ChunkRevisionScheme,
    ) -> SyncResult<Self> {
        let sealed = cipher.seal(id.as_str(), data)?;
        Ok(Self {
            id: id.to_string(),
            rev: match scheme {
                ChunkRevisionScheme::Fixed => Some(fixed_chunk_rev(id)),
                ChunkRevisionScheme::ContentDerived => None,
            },
            kind: CHUNK_TYPE.to_string(),
            data: STANDARD.encode(sealed),
            encrypted: cipher.is_encrypting(),
        })
    }

    /// The sealed payload.
    pub fn sealed_bytes(&self) -> SyncResult<Vec<u8>> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| SyncError::Protocol(format!("chunk {}: bad base64: {e}", self.id)))
    }
}

/// Revision used for chunks under [`ChunkRevisionScheme::Fixed`]. The same
/// chunk always gets the same revision on every device.
pub fn fixed_chunk_rev(id: &ChunkId) -> String {
    let digest = hex::encode(Sha256::digest(id.as_str().as_bytes()));
    format!("1-{}", &digest[..32])
}

/// Kind of a raw database document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocKind {
    Entry,
    Chunk,
    Other,
}

pub fn doc_kind(doc: &Value) -> DocKind {
    match doc.get("type").and_then(Value::as_str) {
        Some(ENTRY_TYPE) => DocKind::Entry,
        Some(CHUNK_TYPE) => DocKind::Chunk,
        _ => DocKind::Other,
    }
}

/// Sequence values are opaque: numbers on CouchDB 1.x, strings later.
pub fn seq_to_string(seq: &Value) -> String {
    match seq {
        Value::String(s) => s.clone(),
        Value::Null => "0".to_string(),
        other => other.to_string(),
    }
}
