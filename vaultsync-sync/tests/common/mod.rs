#![allow(dead_code)]

use std::sync::Arc;
use vaultsync_crypto::KdfParams;
use vaultsync_storage::{MemoryBackend, SplitterConfig};
use vaultsync_sync::couchdb::database::mock::MemoryDatabase;
use vaultsync_sync::couchdb::{DocumentReplicator, RemoteDatabase};
use vaultsync_sync::fs::mock::MemoryFileAccess;
use vaultsync_sync::journal::object_store::mock::MemoryObjectStore;
use vaultsync_sync::journal::{JournalReplicator, ObjectStore};
use vaultsync_sync::{
    EncryptionConfig, EngineConfig, RemoteConfig, RetryConfig, SyncEngine, Transport,
};

/// One simulated device: an engine over an in-memory vault and backend.
pub struct Device {
    pub engine: SyncEngine,
    pub files: Arc<MemoryFileAccess>,
    pub backend: Arc<MemoryBackend>,
}

impl Device {
    /// Writes a file into the vault and records it.
    pub async fn write(&self, path: &str, content: &str, mtime: u64) {
        self.files.insert(path, content.as_bytes(), mtime);
        self.engine.store_file(path).await.unwrap();
    }

    pub async fn remove(&self, path: &str) {
        self.files.remove(path);
        self.engine.store_file(path).await.unwrap();
    }

    pub fn read(&self, path: &str) -> Option<String> {
        self.files
            .contents(path)
            .map(|data| String::from_utf8(data).unwrap())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Small fixed-size chunks so short texts span several chunks.
pub fn config(name: &str) -> EngineConfig {
    EngineConfig {
        device_name: name.to_string(),
        splitter: SplitterConfig::Fixed { size: 8 },
        retry: RetryConfig::fast(),
        ..EngineConfig::default()
    }
}

pub fn journal_config(name: &str) -> EngineConfig {
    EngineConfig {
        remote: RemoteConfig::ObjectStore {
            endpoint: None,
            bucket: "vault".into(),
            region: "us-east-1".into(),
            access_key_id: "test".into(),
            secret_access_key: "test".into(),
            prefix: String::new(),
        },
        ..config(name)
    }
}

pub fn encrypted(config: EngineConfig, passphrase: &str) -> EngineConfig {
    EngineConfig {
        encryption: EncryptionConfig {
            enabled: true,
            passphrase: Some(passphrase.to_string()),
            kdf: KdfParams::fast(),
            ..EncryptionConfig::default()
        },
        ..config
    }
}

pub async fn couch_device(db: &Arc<MemoryDatabase>, config: EngineConfig) -> Device {
    let remote: Arc<dyn RemoteDatabase> = db.clone();
    device(config, Transport::DocumentReplication(DocumentReplicator::new(remote))).await
}

pub async fn journal_device(store: &Arc<MemoryObjectStore>, config: EngineConfig) -> Device {
    let remote: Arc<dyn ObjectStore> = store.clone();
    device(config, Transport::Journal(JournalReplicator::new(remote))).await
}

async fn device(config: EngineConfig, transport: Transport) -> Device {
    let files = Arc::new(MemoryFileAccess::new());
    let backend = Arc::new(MemoryBackend::new());
    let engine = SyncEngine::new(config, backend.clone(), files.clone(), transport)
        .await
        .unwrap();
    Device {
        engine,
        files,
        backend,
    }
}
