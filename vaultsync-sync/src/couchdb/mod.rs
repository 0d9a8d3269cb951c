//! Document-replication transport over a CouchDB-compatible database.

mod client;
pub mod database;
mod replicator;
pub mod wire;

pub use client::CouchDbClient;
pub use database::{
    BulkResult, Change, ChangesPage, DatabaseInfo, PutOutcome, RemoteDatabase,
};
pub use replicator::DocumentReplicator;
