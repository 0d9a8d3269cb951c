//! Vault replication engine.
//!
//! Keeps a vault of files in sync with a remote through content-addressed
//! chunks and per-path documents. Two transports are provided:
//! - a CouchDB-compatible document database (`couchdb`)
//! - an S3-compatible bucket holding an append-only journal (`journal`)
//!
//! # Architecture
//!
//! - **Engine**: owns the local stores and runs replication cycles
//! - **Transport**: the [`Replicator`] trait both remotes implement
//! - **Applier**: materializes received entries through the resolver
//! - **Conflict**: classifies divergent edits and queues the rest
//! - **Lock**: advisory remote lock and compatibility checks
//!
//! ## Cycle
//!
//! 1. **Connect**: check the remote milestone (passphrase, hash tweak, lock)
//! 2. **Pull**: fetch remote changes, verify their chunks, apply them
//! 3. **Push**: upload chunks the remote lacks, then the documents
//! 4. **Checkpoint**: advance cursors past acknowledged data only
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vaultsync_storage::MemoryBackend;
//! use vaultsync_sync::fs::DirectoryFileAccess;
//! use vaultsync_sync::{EngineConfig, SyncEngine, Transport};
//!
//! # async fn run() -> vaultsync_sync::SyncResult<()> {
//! let config = EngineConfig::default();
//! let transport = Transport::from_config(&config)?;
//! let engine = SyncEngine::new(
//!     config,
//!     Arc::new(MemoryBackend::new()),
//!     Arc::new(DirectoryFileAccess::new("/path/to/vault")),
//!     transport,
//! )
//! .await?;
//! engine.scan_local().await?;
//! engine.replicate().await?;
//! # Ok(())
//! # }
//! ```

pub mod applier;
pub mod config;
pub mod conflict;
pub mod couchdb;
mod engine;
mod error;
pub mod fence;
pub mod fs;
pub mod journal;
mod live;
pub mod lock;
mod maintenance;
pub mod retry;
pub mod transport;

pub use applier::{content_fingerprint, BaseStore, EntryApplier, SyncBase};
pub use config::{
    ChunkRevisionScheme, ConfigChange, ConflictPolicy, EncryptionConfig, EngineConfig,
    RemoteConfig, ReplicationConfig,
};
pub use conflict::{
    AutoMergeStrategy, ConflictChoice, ConflictRecord, ConflictResolver, ContentEqualStrategy,
    PreferNewerStrategy, Resolution,
};
pub use engine::{ScanReport, SyncEngine};
pub use error::{ResultExt, SyncError, SyncResult};
pub use fence::{CancelToken, CycleFence};
pub use fs::{DirectoryFileAccess, FileAccess};
pub use live::{LiveExit, LiveHandle};
pub use lock::{LockCoordinator, LockState, Milestone};
pub use maintenance::{Discrepancy, PathDiscrepancy, RepairDirection, RepairReport, VerifyReport};
pub use retry::{retry, RetryConfig};
pub use transport::{
    RemoteStatus, ReplicationContext, ReplicationStats, Replicator, ResetScope, Transport,
};
