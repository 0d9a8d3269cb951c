//! Local storage layer for vaultsync.
//!
//! # Architecture
//!
//! - [`ChunkStore`] splits content, addresses pieces by hash and keeps new
//!   pieces in the [`Eden`] tier until its thresholds graduate them
//! - [`DocumentStore`] keeps one [`vaultsync_types::Entry`] per path plus the
//!   marked-same mtime table
//! - Both sit on a [`LocalBackend`]: [`MemoryBackend`] for tests,
//!   [`SqliteBackend`] for devices

mod backend;
mod chunk_store;
mod document_store;
mod eden;
mod error;
mod splitter;

pub use backend::{EdenMember, LocalBackend, MemoryBackend, SqliteBackend};
pub use chunk_store::{ChunkStore, GcReport};
pub use document_store::{DocumentStore, IdStrategy};
pub use eden::{Eden, EdenConfig, EdenStats, EdenTrigger};
pub use error::{StorageError, StorageResult};
pub use splitter::{join, Splitter, SplitterConfig};
