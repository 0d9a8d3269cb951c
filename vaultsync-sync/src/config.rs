//! Engine configuration.
//!
//! An [`EngineConfig`] is immutable once an engine is built from it. Moving
//! to a new configuration goes through [`EngineConfig::transition_to`],
//! which refuses changes that would strand existing remote data unless the
//! caller acknowledges a rebuild.

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use vaultsync_crypto::{HashAlgorithm, IterationMode, KdfParams, MAX_TIME_COST};
use vaultsync_storage::{EdenConfig, SplitterConfig};
use vaultsync_types::DeviceId;

/// Top-level configuration for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub device_id: DeviceId,
    pub device_name: String,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
    #[serde(default)]
    pub splitter: SplitterConfig,
    #[serde(default)]
    pub eden: EdenConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub conflict: ConflictPolicy,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_id: DeviceId::new(),
            device_name: "vaultsync device".to_string(),
            remote: RemoteConfig::default(),
            encryption: EncryptionConfig::default(),
            hash_algorithm: HashAlgorithm::default(),
            splitter: SplitterConfig::default(),
            eden: EdenConfig::default(),
            replication: ReplicationConfig::default(),
            conflict: ConflictPolicy::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Where the vault replicates to.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteConfig {
    /// CouchDB-compatible document database.
    CouchDb {
        url: String,
        database: String,
        #[serde(default)]
        username: String,
        #[serde(default)]
        password: String,
    },
    /// S3-compatible object store used as a journal.
    ObjectStore {
        #[serde(default)]
        endpoint: Option<String>,
        bucket: String,
        region: String,
        access_key_id: String,
        secret_access_key: String,
        #[serde(default)]
        prefix: String,
    },
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self::CouchDb {
            url: "http://127.0.0.1:5984".to_string(),
            database: "vault".to_string(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CouchDb {
                url,
                database,
                username,
                ..
            } => f
                .debug_struct("CouchDb")
                .field("url", url)
                .field("database", database)
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::ObjectStore {
                endpoint,
                bucket,
                region,
                prefix,
                ..
            } => f
                .debug_struct("ObjectStore")
                .field("endpoint", endpoint)
                .field("bucket", bucket)
                .field("region", region)
                .field("prefix", prefix)
                .field("credentials", &"[REDACTED]")
                .finish(),
        }
    }
}

impl RemoteConfig {
    /// Short label used in logs and error context.
    pub fn peer_label(&self) -> String {
        match self {
            Self::CouchDb { url, database, .. } => format!("{}/{database}", url.trim_end_matches('/')),
            Self::ObjectStore { bucket, prefix, .. } if prefix.is_empty() => format!("s3://{bucket}"),
            Self::ObjectStore { bucket, prefix, .. } => format!("s3://{bucket}/{prefix}"),
        }
    }
}

/// End-to-end encryption settings.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionConfig {
    pub enabled: bool,
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Replace document ids with passphrase-keyed digests.
    #[serde(default)]
    pub obfuscate_paths: bool,
    #[serde(default)]
    pub iteration_mode: IterationMode,
    #[serde(default)]
    pub kdf: KdfParams,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            passphrase: None,
            obfuscate_paths: false,
            iteration_mode: IterationMode::default(),
            kdf: KdfParams::default(),
        }
    }
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("enabled", &self.enabled)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .field("obfuscate_paths", &self.obfuscate_paths)
            .field("iteration_mode", &self.iteration_mode)
            .field("kdf", &self.kdf)
            .finish()
    }
}

impl EncryptionConfig {
    /// The passphrase, when encryption is enabled and one is set.
    pub fn active_passphrase(&self) -> Option<&str> {
        self.passphrase
            .as_deref()
            .filter(|p| self.enabled && !p.is_empty())
    }
}

/// How chunk documents get their revision on a document-replication remote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkRevisionScheme {
    /// A fixed revision written with `new_edits=false`; re-sending a chunk
    /// never creates a conflict.
    #[default]
    Fixed,
    /// Server-assigned revisions.
    ContentDerived,
}

/// Replication tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Entries per push batch.
    pub batch_size: usize,
    /// Push batches in flight at once.
    pub batches_limit: usize,
    /// Upper bound on the encoded size of one bulk chunk upload.
    pub max_chunk_bulk_bytes: usize,
    pub chunk_scheme: ChunkRevisionScheme,
    /// Simultaneous chunk fetch/verify operations.
    pub fetch_concurrency: usize,
    /// Seconds between cycles of the live loop.
    pub live_interval_secs: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batches_limit: 4,
            max_chunk_bulk_bytes: 1024 * 1024,
            chunk_scheme: ChunkRevisionScheme::default(),
            fetch_concurrency: 8,
            live_interval_secs: 30,
        }
    }
}

/// Conflict handling policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPolicy {
    /// Resolve diverged edits automatically in favor of the later mtime.
    #[serde(default)]
    pub prefer_newer: bool,
    /// Only check for conflicts when a document is opened.
    #[serde(default)]
    pub check_only_on_open: bool,
    /// Only prompt for the active document; others resolve automatically.
    #[serde(default)]
    pub prompt_only_active: bool,
}

/// A setting that differs between two configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    Remote,
    HashAlgorithm,
    EncryptionToggled,
    Passphrase,
    PathObfuscation,
    Splitter,
    Eden,
    Replication,
    Conflict,
    Retry,
    DeviceName,
}

impl ConfigChange {
    /// Whether the change invalidates data already on the remote.
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            Self::HashAlgorithm | Self::EncryptionToggled | Self::Passphrase | Self::PathObfuscation
        )
    }
}

impl EngineConfig {
    /// Checks internal invariants.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device_name.trim().is_empty() {
            return Err(SyncError::Config("device_name must not be empty".into()));
        }
        if self.encryption.enabled && self.encryption.active_passphrase().is_none() {
            return Err(SyncError::Config(
                "encryption is enabled but no passphrase is set".into(),
            ));
        }
        if self.encryption.obfuscate_paths && !self.encryption.enabled {
            return Err(SyncError::Config(
                "path obfuscation requires encryption".into(),
            ));
        }
        if self.replication.batch_size < 2 {
            return Err(SyncError::Config("batch_size must be at least 2".into()));
        }
        if self.replication.batches_limit == 0 {
            return Err(SyncError::Config("batches_limit must be at least 1".into()));
        }
        if self.replication.fetch_concurrency == 0 {
            return Err(SyncError::Config(
                "fetch_concurrency must be at least 1".into(),
            ));
        }
        if self.replication.max_chunk_bulk_bytes == 0 {
            return Err(SyncError::Config(
                "max_chunk_bulk_bytes must be greater than 0".into(),
            ));
        }
        self.encryption
            .kdf
            .validate()
            .map_err(|e| SyncError::Config(format!("encryption.kdf: {e}")))?;
        if self.encryption.iteration_mode.max_iterations() > MAX_TIME_COST {
            return Err(SyncError::Config(format!(
                "encryption.iteration_mode allows at most {MAX_TIME_COST} iterations"
            )));
        }
        self.retry.validate().map_err(SyncError::Config)?;
        if self.eden.max_count == 0 {
            return Err(SyncError::Config("eden.max_count must be at least 1".into()));
        }
        self.splitter.validate().map_err(SyncError::Config)?;
        match &self.remote {
            RemoteConfig::CouchDb { url, database, .. } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(SyncError::Config(format!("invalid CouchDB url: {url}")));
                }
                if database.is_empty() {
                    return Err(SyncError::Config("database name must not be empty".into()));
                }
            }
            RemoteConfig::ObjectStore { bucket, region, .. } => {
                if bucket.is_empty() || region.is_empty() {
                    return Err(SyncError::Config(
                        "bucket and region must not be empty".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Lists the settings that differ from `next`.
    pub fn diff(&self, next: &EngineConfig) -> Vec<ConfigChange> {
        let mut changes = Vec::new();
        if self.remote != next.remote {
            changes.push(ConfigChange::Remote);
        }
        if self.hash_algorithm != next.hash_algorithm {
            changes.push(ConfigChange::HashAlgorithm);
        }
        if self.encryption.enabled != next.encryption.enabled {
            changes.push(ConfigChange::EncryptionToggled);
        } else if self.encryption.active_passphrase() != next.encryption.active_passphrase() {
            changes.push(ConfigChange::Passphrase);
        }
        if self.encryption.obfuscate_paths != next.encryption.obfuscate_paths {
            changes.push(ConfigChange::PathObfuscation);
        }
        if self.splitter != next.splitter {
            changes.push(ConfigChange::Splitter);
        }
        if self.eden != next.eden {
            changes.push(ConfigChange::Eden);
        }
        if self.replication != next.replication {
            changes.push(ConfigChange::Replication);
        }
        if self.conflict != next.conflict {
            changes.push(ConfigChange::Conflict);
        }
        if self.retry != next.retry {
            changes.push(ConfigChange::Retry);
        }
        if self.device_name != next.device_name {
            changes.push(ConfigChange::DeviceName);
        }
        changes
    }

    /// Validates `next` and the transition to it. Destructive changes are
    /// rejected unless `rebuild_acknowledged` is set.
    pub fn transition_to(
        &self,
        next: &EngineConfig,
        rebuild_acknowledged: bool,
    ) -> SyncResult<Vec<ConfigChange>> {
        next.validate()?;
        if self.device_id != next.device_id {
            return Err(SyncError::Config("device_id cannot change".into()));
        }
        let changes = self.diff(next);
        let destructive: Vec<_> = changes.iter().filter(|c| c.is_destructive()).collect();
        if !destructive.is_empty() && !rebuild_acknowledged {
            return Err(SyncError::RebuildRequired(format!(
                "{destructive:?} change the remote layout"
            )));
        }
        Ok(changes)
    }
}
