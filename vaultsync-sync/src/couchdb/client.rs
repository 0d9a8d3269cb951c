//! CouchDB HTTP client.

use super::database::{BulkResult, Change, ChangesPage, DatabaseInfo, PutOutcome, RemoteDatabase};
use super::wire::seq_to_string;
use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct InfoResponse {
    doc_count: u64,
    update_seq: Value,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    rev: String,
}

#[derive(Debug, Deserialize)]
struct AllDocsResponse {
    rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
struct AllDocsRow {
    key: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    value: Option<AllDocsValue>,
}

#[derive(Debug, Deserialize)]
struct AllDocsValue {
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Deserialize)]
struct ChangesResponse {
    results: Vec<ChangeRow>,
    last_seq: Value,
}

#[derive(Debug, Deserialize)]
struct ChangeRow {
    seq: Value,
    id: String,
    #[serde(default)]
    doc: Option<Value>,
}

/// `RemoteDatabase` over the CouchDB HTTP API.
pub struct CouchDbClient {
    client: Client,
    base_url: String,
    database: String,
    username: String,
    password: String,
}

impl CouchDbClient {
    pub fn new(
        base_url: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn from_config(remote: &RemoteConfig) -> SyncResult<Self> {
        match remote {
            RemoteConfig::CouchDb {
                url,
                database,
                username,
                password,
            } => Self::new(url.as_str(), database.as_str(), username.as_str(), password.as_str()),
            RemoteConfig::ObjectStore { .. } => Err(SyncError::Config(
                "object store remote given to the CouchDB client".into(),
            )),
        }
    }

    fn db_url(&self) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(&self.database))
    }

    fn doc_url(&self, id: &str) -> String {
        // `_local/` must stay a path segment separator.
        match id.strip_prefix("_local/") {
            Some(rest) => format!("{}/_local/{}", self.db_url(), urlencoding::encode(rest)),
            None => format!("{}/{}", self.db_url(), urlencoding::encode(id)),
        }
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        if self.username.is_empty() {
            request
        } else {
            request.basic_auth(&self.username, Some(&self.password))
        }
    }

    async fn send(&self, request: RequestBuilder) -> SyncResult<Response> {
        self.authed(request)
            .send()
            .await
            .map_err(|e| SyncError::Connection {
                peer: self.label(),
                message: e.to_string(),
            })
    }

    async fn fail(&self, response: Response) -> SyncError {
        let status = response.status();
        let message = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return SyncError::Authentication(format!("{} rejected credentials", self.label()));
        }
        SyncError::Http {
            peer: self.label(),
            status: status.as_u16(),
            message,
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(&self, response: Response) -> SyncResult<T> {
        if !response.status().is_success() {
            return Err(self.fail(response).await);
        }
        response.json().await.map_err(|e| SyncError::Protocol(format!(
            "{}: malformed response: {e}",
            self.label()
        )))
    }
}

#[async_trait]
impl RemoteDatabase for CouchDbClient {
    fn label(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    async fn info(&self) -> SyncResult<DatabaseInfo> {
        let response = self.send(self.client.get(self.db_url())).await?;
        let info: InfoResponse = self.json(response).await?;
        Ok(DatabaseInfo {
            doc_count: info.doc_count,
            update_seq: seq_to_string(&info.update_seq),
        })
    }

    async fn ensure_exists(&self) -> SyncResult<()> {
        let response = self.send(self.client.head(self.db_url())).await?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                let response = self.send(self.client.put(self.db_url())).await?;
                match response.status() {
                    // Another device created it in between.
                    s if s.is_success() || s == StatusCode::PRECONDITION_FAILED => {
                        info!(database = %self.database, "created remote database");
                        Ok(())
                    }
                    _ => Err(self.fail(response).await),
                }
            }
            _ => Err(self.fail(response).await),
        }
    }

    async fn get(&self, id: &str) -> SyncResult<Option<Value>> {
        let response = self.send(self.client.get(self.doc_url(id))).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.json(response).await.map(Some)
    }

    async fn put(&self, id: &str, doc: &Value) -> SyncResult<PutOutcome> {
        let response = self
            .send(self.client.put(self.doc_url(id)).json(doc))
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(PutOutcome::Conflict);
        }
        let put: PutResponse = self.json(response).await?;
        Ok(PutOutcome::Ok { rev: put.rev })
    }

    async fn missing_docs(&self, ids: &[String]) -> SyncResult<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .send(
                self.client
                    .post(format!("{}/_all_docs", self.db_url()))
                    .json(&json!({ "keys": ids })),
            )
            .await?;
        let all: AllDocsResponse = self.json(response).await?;
        Ok(all
            .rows
            .into_iter()
            .filter(|row| row.error.is_some() || row.value.as_ref().is_some_and(|v| v.deleted))
            .map(|row| row.key)
            .collect())
    }

    async fn bulk_docs(&self, docs: &[Value], new_edits: bool) -> SyncResult<Vec<BulkResult>> {
        debug!(count = docs.len(), new_edits, "bulk_docs");
        let body = json!({ "docs": docs, "new_edits": new_edits });
        let response = self
            .send(
                self.client
                    .post(format!("{}/_bulk_docs", self.db_url()))
                    .json(&body),
            )
            .await?;
        self.json(response).await
    }

    async fn changes(&self, since: &str, limit: usize) -> SyncResult<ChangesPage> {
        let response = self
            .send(self.client.get(format!("{}/_changes", self.db_url())).query(&[
                ("since", since.to_string()),
                ("limit", limit.to_string()),
                ("include_docs", "true".to_string()),
            ]))
            .await?;
        let changes: ChangesResponse = self.json(response).await?;
        Ok(ChangesPage {
            results: changes
                .results
                .into_iter()
                .map(|row| Change {
                    seq: seq_to_string(&row.seq),
                    id: row.id,
                    doc: row.doc,
                })
                .collect(),
            last_seq: seq_to_string(&changes.last_seq),
        })
    }

    async fn recreate(&self) -> SyncResult<()> {
        let response = self.send(self.client.delete(self.db_url())).await?;
        if !(response.status().is_success() || response.status() == StatusCode::NOT_FOUND) {
            return Err(self.fail(response).await);
        }
        let response = self.send(self.client.put(self.db_url())).await?;
        if !response.status().is_success() {
            return Err(self.fail(response).await);
        }
        info!(database = %self.database, "remote database recreated");
        Ok(())
    }

    async fn compact(&self) -> SyncResult<()> {
        let response = self
            .send(
                self.client
                    .post(format!("{}/_compact", self.db_url()))
                    .json(&json!({})),
            )
            .await?;
        if !response.status().is_success() {
            return Err(self.fail(response).await);
        }
        info!(database = %self.database, "remote compaction requested");
        Ok(())
    }
}
