//! Journal transport over an S3-compatible object store.

mod checkpoint;
pub mod object_store;
mod replicator;
mod s3;

pub use checkpoint::CheckpointInfo;
pub use object_store::ObjectStore;
pub use replicator::{chunk_key, JournalEntry, JournalRecord, JournalReplicator};
pub use s3::S3ObjectStore;
