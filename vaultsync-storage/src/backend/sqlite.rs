use super::{EdenMember, LocalBackend};
use crate::error::{StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use vaultsync_types::{ChunkId, DocumentId, Entry};

/// Persistent backend in a single SQLite file.
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening sqlite backend");
        let conn = Connection::open(path)?;
        let backend = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        backend.init_schema()?;
        Ok(backend)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let backend = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        backend.init_schema()?;
        Ok(backend)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> StorageResult<()> {
        self.conn().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                data BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS eden (
                ord INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                data BLOB NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS entries_seq ON entries(seq);

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS counters (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }
}

fn parse_chunk_id(raw: String) -> StorageResult<ChunkId> {
    raw.parse()
        .map_err(|_| StorageError::InvalidData(format!("invalid chunk id in store: {raw}")))
}

fn parse_entry(body: &str, seq: i64) -> StorageResult<Entry> {
    let mut entry: Entry = serde_json::from_str(body)?;
    entry.seq = seq as u64;
    Ok(entry)
}

fn parse_member(id: String, data: Vec<u8>, created_at: String) -> StorageResult<EdenMember> {
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| StorageError::InvalidData(format!("invalid eden timestamp: {e}")))?
        .with_timezone(&Utc);
    Ok(EdenMember {
        id: parse_chunk_id(id)?,
        data,
        created_at,
    })
}

impl LocalBackend for SqliteBackend {
    fn get_chunk(&self, id: &ChunkId) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT data FROM chunks WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn put_chunk(&self, id: &ChunkId, data: &[u8]) -> StorageResult<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO chunks (id, data) VALUES (?1, ?2)",
            params![id.as_str(), data],
        )?;
        Ok(())
    }

    fn has_chunk(&self, id: &ChunkId) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM chunks WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn delete_chunk(&self, id: &ChunkId) -> StorageResult<bool> {
        let removed = self
            .conn()
            .execute("DELETE FROM chunks WHERE id = ?1", params![id.as_str()])?;
        Ok(removed > 0)
    }

    fn chunk_ids(&self) -> StorageResult<Vec<ChunkId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM chunks ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(parse_chunk_id(row?)?);
        }
        Ok(ids)
    }

    fn eden_put(&self, member: &EdenMember) -> StorageResult<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO eden (id, data, created_at) VALUES (?1, ?2, ?3)",
            params![
                member.id.as_str(),
                member.data,
                member.created_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    fn eden_get(&self, id: &ChunkId) -> StorageResult<Option<EdenMember>> {
        let row: Option<(String, Vec<u8>, String)> = self
            .conn()
            .query_row(
                "SELECT id, data, created_at FROM eden WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        row.map(|(id, data, ts)| parse_member(id, data, ts))
            .transpose()
    }

    fn eden_remove(&self, id: &ChunkId) -> StorageResult<()> {
        self.conn()
            .execute("DELETE FROM eden WHERE id = ?1", params![id.as_str()])?;
        Ok(())
    }

    fn eden_members(&self) -> StorageResult<Vec<EdenMember>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, data, created_at FROM eden ORDER BY ord")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut members = Vec::new();
        for row in rows {
            let (id, data, ts) = row?;
            members.push(parse_member(id, data, ts)?);
        }
        Ok(members)
    }

    fn get_entry(&self, id: &DocumentId) -> StorageResult<Option<Entry>> {
        let row: Option<(String, i64)> = self
            .conn()
            .query_row(
                "SELECT body, seq FROM entries WHERE id = ?1",
                params![id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(body, seq)| parse_entry(&body, seq)).transpose()
    }

    fn insert_entry(&self, entry: &Entry) -> StorageResult<u64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let current: Option<i64> = tx
            .query_row(
                "SELECT value FROM counters WHERE name = 'seq'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let seq = current.unwrap_or(0) + 1;
        let mut stored = entry.clone();
        stored.seq = seq as u64;
        let body = serde_json::to_string(&stored)?;
        tx.execute(
            "INSERT OR REPLACE INTO counters (name, value) VALUES ('seq', ?1)",
            params![seq],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO entries (id, seq, body) VALUES (?1, ?2, ?3)",
            params![stored.id.as_str(), seq, body],
        )?;
        tx.commit()?;
        Ok(seq as u64)
    }

    fn entries(&self) -> StorageResult<Vec<Entry>> {
        self.entries_since(0)
    }

    fn entries_since(&self, since: u64) -> StorageResult<Vec<Entry>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT body, seq FROM entries WHERE seq > ?1 ORDER BY seq")?;
        let rows = stmt.query_map(params![since as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (body, seq) = row?;
            out.push(parse_entry(&body, seq)?);
        }
        Ok(out)
    }

    fn max_seq(&self) -> StorageResult<u64> {
        let value: Option<i64> = self
            .conn()
            .query_row(
                "SELECT value FROM counters WHERE name = 'seq'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0) as u64)
    }

    fn get_meta(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn put_meta(&self, key: &str, value: &str) -> StorageResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete_meta(&self, key: &str) -> StorageResult<()> {
        self.conn()
            .execute("DELETE FROM meta WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        self.conn().execute_batch(
            "
            DELETE FROM chunks;
            DELETE FROM eden;
            DELETE FROM entries;
            DELETE FROM meta;
            ",
        )?;
        Ok(())
    }
}
