//! CouchDB database operations used by the document transport.

use crate::error::SyncResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Database summary from `GET /{db}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub doc_count: u64,
    pub update_seq: String,
}

/// Outcome of a single-document write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Ok { rev: String },
    /// `_rev` did not match the current revision.
    Conflict,
}

/// Per-document result of `_bulk_docs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    pub id: String,
    #[serde(default)]
    pub rev: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl BulkResult {
    pub fn is_conflict(&self) -> bool {
        self.error.as_deref() == Some("conflict")
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// One row of the `_changes` feed, with the document included.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub seq: String,
    pub id: String,
    pub doc: Option<Value>,
}

/// A page of the `_changes` feed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangesPage {
    pub results: Vec<Change>,
    pub last_seq: String,
}

/// The subset of the CouchDB HTTP API the transport needs.
#[async_trait]
pub trait RemoteDatabase: Send + Sync {
    fn label(&self) -> String;

    async fn info(&self) -> SyncResult<DatabaseInfo>;

    /// Creates the database if it does not exist.
    async fn ensure_exists(&self) -> SyncResult<()>;

    async fn get(&self, id: &str) -> SyncResult<Option<Value>>;

    async fn put(&self, id: &str, doc: &Value) -> SyncResult<PutOutcome>;

    /// The ids in `ids` with no live document.
    async fn missing_docs(&self, ids: &[String]) -> SyncResult<Vec<String>>;

    /// `POST /_bulk_docs`. With `new_edits == false` the documents keep the
    /// revisions they carry.
    async fn bulk_docs(&self, docs: &[Value], new_edits: bool) -> SyncResult<Vec<BulkResult>>;

    /// Documents changed after `since`, at most `limit` rows.
    async fn changes(&self, since: &str, limit: usize) -> SyncResult<ChangesPage>;

    /// Drops and recreates the database.
    async fn recreate(&self) -> SyncResult<()>;

    /// `POST /_compact`.
    async fn compact(&self) -> SyncResult<()>;
}

/// In-memory database for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use sha2::{Digest, Sha256};
    use std::collections::BTreeMap;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    #[derive(Debug, Clone)]
    struct StoredDoc {
        rev: String,
        generation: u64,
        seq: u64,
        body: Value,
    }

    #[derive(Debug, Default)]
    struct State {
        docs: BTreeMap<String, StoredDoc>,
        local: BTreeMap<String, Value>,
        seq: u64,
        fail_next: usize,
        bulk_calls: usize,
        compactions: usize,
    }

    /// MVCC document store with CouchDB revision rules, `_local` documents
    /// and failure injection.
    #[derive(Debug, Default)]
    pub struct MemoryDatabase {
        state: Mutex<State>,
    }

    impl MemoryDatabase {
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Fails the next `n` requests with a connection error.
        pub fn fail_next(&self, n: usize) {
            self.state().fail_next = n;
        }

        pub fn doc_count(&self) -> usize {
            self.state().docs.len()
        }

        pub fn doc_ids(&self) -> Vec<String> {
            self.state().docs.keys().cloned().collect()
        }

        pub fn bulk_calls(&self) -> usize {
            self.state().bulk_calls
        }

        pub fn compactions(&self) -> usize {
            self.state().compactions
        }

        /// Overwrites a document body in place, keeping its revision.
        pub fn tamper(&self, id: &str, body: Value) {
            if let Some(doc) = self.state().docs.get_mut(id) {
                doc.body = body;
            }
        }

        /// Removes a document without leaving any trace.
        pub fn purge(&self, id: &str) {
            self.state().docs.remove(id);
        }

        fn check_failure(&self) -> SyncResult<()> {
            let mut state = self.state();
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(SyncError::Connection {
                    peer: "memory".into(),
                    message: "injected failure".into(),
                });
            }
            Ok(())
        }

        fn write(state: &mut State, id: &str, doc: &Value, new_edits: bool) -> BulkResult {
            let given = doc.get("_rev").and_then(Value::as_str).map(str::to_string);
            let current = state.docs.get(id).cloned();
            let mut body = doc.clone();
            if let Some(obj) = body.as_object_mut() {
                obj.remove("_rev");
                obj.insert("_id".into(), Value::String(id.to_string()));
            }

            let (rev, generation) = if new_edits {
                match (&current, &given) {
                    (Some(cur), Some(g)) if &cur.rev == g => (None, cur.generation + 1),
                    (None, None) => (None, 1),
                    _ => {
                        return BulkResult {
                            id: id.to_string(),
                            rev: None,
                            error: Some("conflict".into()),
                            reason: Some("Document update conflict.".into()),
                        };
                    }
                }
            } else {
                let Some(g) = given else {
                    return BulkResult {
                        id: id.to_string(),
                        rev: None,
                        error: Some("bad_request".into()),
                        reason: Some("new_edits=false requires _rev".into()),
                    };
                };
                if current.as_ref().is_some_and(|c| c.rev == g) {
                    return BulkResult {
                        id: id.to_string(),
                        rev: Some(g),
                        error: None,
                        reason: None,
                    };
                }
                let generation = g
                    .split_once('-')
                    .and_then(|(n, _)| n.parse().ok())
                    .unwrap_or(1);
                (Some(g), generation)
            };

            let rev = rev.unwrap_or_else(|| {
                let digest = hex::encode(Sha256::digest(body.to_string().as_bytes()));
                format!("{generation}-{}", &digest[..32])
            });
            state.seq += 1;
            let seq = state.seq;
            state.docs.insert(
                id.to_string(),
                StoredDoc {
                    rev: rev.clone(),
                    generation,
                    seq,
                    body,
                },
            );
            BulkResult {
                id: id.to_string(),
                rev: Some(rev),
                error: None,
                reason: None,
            }
        }
    }

    fn with_rev(doc: &StoredDoc) -> Value {
        let mut body = doc.body.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("_rev".into(), Value::String(doc.rev.clone()));
        }
        body
    }

    #[async_trait]
    impl RemoteDatabase for MemoryDatabase {
        fn label(&self) -> String {
            "memory".to_string()
        }

        async fn info(&self) -> SyncResult<DatabaseInfo> {
            self.check_failure()?;
            let state = self.state();
            Ok(DatabaseInfo {
                doc_count: state.docs.len() as u64,
                update_seq: state.seq.to_string(),
            })
        }

        async fn ensure_exists(&self) -> SyncResult<()> {
            self.check_failure()
        }

        async fn get(&self, id: &str) -> SyncResult<Option<Value>> {
            self.check_failure()?;
            let state = self.state();
            if id.starts_with("_local/") {
                return Ok(state.local.get(id).cloned());
            }
            Ok(state.docs.get(id).map(with_rev))
        }

        async fn put(&self, id: &str, doc: &Value) -> SyncResult<PutOutcome> {
            self.check_failure()?;
            let mut state = self.state();
            if id.starts_with("_local/") {
                let mut body = doc.clone();
                if let Some(obj) = body.as_object_mut() {
                    obj.insert("_id".into(), Value::String(id.to_string()));
                }
                state.local.insert(id.to_string(), body);
                return Ok(PutOutcome::Ok {
                    rev: "0-1".to_string(),
                });
            }
            let result = Self::write(&mut state, id, doc, true);
            Ok(match result.rev {
                Some(rev) if result.error.is_none() => PutOutcome::Ok { rev },
                _ => PutOutcome::Conflict,
            })
        }

        async fn missing_docs(&self, ids: &[String]) -> SyncResult<Vec<String>> {
            self.check_failure()?;
            let state = self.state();
            Ok(ids
                .iter()
                .filter(|id| !state.docs.contains_key(id.as_str()))
                .cloned()
                .collect())
        }

        async fn bulk_docs(&self, docs: &[Value], new_edits: bool) -> SyncResult<Vec<BulkResult>> {
            self.check_failure()?;
            let mut state = self.state();
            state.bulk_calls += 1;
            Ok(docs
                .iter()
                .map(|doc| {
                    let id = doc
                        .get("_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    Self::write(&mut state, &id, doc, new_edits)
                })
                .collect())
        }

        async fn changes(&self, since: &str, limit: usize) -> SyncResult<ChangesPage> {
            self.check_failure()?;
            let since: u64 = since.parse().unwrap_or(0);
            let state = self.state();
            let mut rows: Vec<_> = state.docs.values().filter(|d| d.seq > since).collect();
            rows.sort_by_key(|d| d.seq);
            rows.truncate(limit.max(1));
            let last_seq = rows.last().map_or(since, |d| d.seq);
            Ok(ChangesPage {
                results: rows
                    .into_iter()
                    .map(|d| Change {
                        seq: d.seq.to_string(),
                        id: d
                            .body
                            .get("_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        doc: Some(with_rev(d)),
                    })
                    .collect(),
                last_seq: last_seq.to_string(),
            })
        }

        async fn recreate(&self) -> SyncResult<()> {
            self.check_failure()?;
            let mut state = self.state();
            state.docs.clear();
            state.local.clear();
            Ok(())
        }

        async fn compact(&self) -> SyncResult<()> {
            self.check_failure()?;
            self.state().compactions += 1;
            Ok(())
        }
    }
}
