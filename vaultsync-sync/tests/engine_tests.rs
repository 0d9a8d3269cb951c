mod common;

use common::{config, couch_device, encrypted, Device};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use vaultsync_storage::SqliteBackend;
use vaultsync_sync::couchdb::database::mock::MemoryDatabase;
use vaultsync_sync::couchdb::{DocumentReplicator, RemoteDatabase};
use vaultsync_sync::{
    ConflictPolicy, DirectoryFileAccess, EngineConfig, ScanReport, SyncEngine, SyncError,
    Transport,
};
use vaultsync_types::Freshness;

const T0: u64 = 1_700_000_000_000;

async fn device() -> Device {
    couch_device(&Arc::new(MemoryDatabase::new()), config("engine")).await
}

// ── Local changes ───────────────────────────────────────────────

#[tokio::test]
async fn store_file_records_new_content() {
    let d = device().await;
    d.files.insert("a.md", "first draft", T0);

    let entry = d.engine.store_file("a.md").await.unwrap().unwrap();
    assert_eq!(entry.path, "a.md");
    assert_eq!(entry.mtime, T0);
    assert!(!entry.deleted);
    assert_eq!(
        d.engine.chunks().read_content(&entry.chunk_ids).unwrap(),
        b"first draft"
    );
}

#[tokio::test]
async fn unchanged_file_is_not_stored_again() {
    let d = device().await;
    d.write("a.md", "steady", T0).await;
    let seq = d.engine.documents().get("a.md").unwrap().unwrap().seq;

    assert_eq!(d.engine.store_file("a.md").await.unwrap(), None);
    assert_eq!(d.engine.documents().get("a.md").unwrap().unwrap().seq, seq);
}

#[tokio::test]
async fn touched_file_is_marked_same() {
    let d = device().await;
    d.write("a.md", "same bytes", T0).await;

    d.files.insert("a.md", "same bytes", T0 + 10_000);
    assert_eq!(d.engine.store_file("a.md").await.unwrap(), None);
    assert_eq!(
        d.engine
            .documents()
            .is_marked_as_same_changes("a.md", &[T0, T0 + 10_000])
            .unwrap(),
        Some(Freshness::Even)
    );
}

#[tokio::test]
async fn missing_file_becomes_tombstone() {
    let d = device().await;
    d.write("a.md", "doomed", T0).await;
    d.files.remove("a.md");

    let tombstone = d.engine.store_file("a.md").await.unwrap().unwrap();
    assert!(tombstone.deleted);
    // Deleting twice records nothing.
    assert_eq!(d.engine.store_file("a.md").await.unwrap(), None);
    assert_eq!(d.engine.store_file("never-existed.md").await.unwrap(), None);
}

#[tokio::test]
async fn scan_reports_stored_and_deleted_paths() {
    let d = device().await;
    d.write("keep.md", "kept", T0).await;
    d.write("gone.md", "removed later", T0).await;

    d.files.remove("gone.md");
    d.files.insert("keep.md", "kept and edited", T0 + 4_000);
    d.files.insert("new/file.md", "brand new", T0);

    let report = d.engine.scan_local().await.unwrap();
    assert_eq!(
        report,
        ScanReport {
            stored: vec!["keep.md".into(), "new/file.md".into()],
            deleted: vec!["gone.md".into()],
        }
    );
    assert_eq!(d.engine.scan_local().await.unwrap(), ScanReport::default());
}

// ── Configuration ───────────────────────────────────────────────

#[tokio::test]
async fn policy_change_applies_in_place() {
    let d = device().await;
    d.write("a.md", "survives reconfiguration", T0).await;

    let next = EngineConfig {
        conflict: ConflictPolicy {
            prefer_newer: true,
            ..ConflictPolicy::default()
        },
        ..d.engine.config().clone()
    };
    let engine = d.engine.apply_config(next, false).await.unwrap();
    assert!(engine.config().conflict.prefer_newer);
    assert_eq!(engine.device_id(), d.engine.device_id());
    assert!(engine.documents().get("a.md").unwrap().is_some());
}

#[tokio::test]
async fn destructive_change_needs_acknowledgement() {
    let d = device().await;
    let next = encrypted(d.engine.config().clone(), "new passphrase");

    let err = d.engine.apply_config(next.clone(), false).await.err().unwrap();
    assert!(matches!(err, SyncError::RebuildRequired(_)));

    let engine = d.engine.apply_config(next, true).await.unwrap();
    assert!(engine.config().encryption.enabled);
}

#[tokio::test]
async fn device_id_cannot_change() {
    let d = device().await;
    let err = d.engine.apply_config(config("other"), false).await.err().unwrap();
    assert!(matches!(err, SyncError::Config(_)));
}

// ── Cancellation ────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_engine_refuses_cycles_until_resumed() {
    let d = device().await;
    d.write("a.md", "waiting", T0).await;

    d.engine.cancel();
    assert!(matches!(
        d.engine.replicate().await,
        Err(SyncError::Cancelled)
    ));

    d.engine.resume();
    assert_eq!(d.engine.replicate().await.unwrap().sent, 1);
}

// ── Persistence ─────────────────────────────────────────────────

async fn disk_engine(db: &Arc<MemoryDatabase>, dir: &std::path::Path, cfg: EngineConfig) -> SyncEngine {
    let backend = Arc::new(SqliteBackend::open(dir.join("local.db")).unwrap());
    let files = Arc::new(DirectoryFileAccess::new(dir.join("vault")));
    let remote: Arc<dyn RemoteDatabase> = db.clone();
    SyncEngine::new(
        cfg,
        backend,
        files,
        Transport::DocumentReplication(DocumentReplicator::new(remote)),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn state_survives_reopening_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("vault/daily")).unwrap();
    std::fs::write(dir.path().join("vault/daily/today.md"), "on disk").unwrap();
    let db = Arc::new(MemoryDatabase::new());
    let cfg = config("disk");

    let engine = disk_engine(&db, dir.path(), cfg.clone()).await;
    assert_eq!(
        engine.scan_local().await.unwrap().stored,
        vec!["daily/today.md".to_string()]
    );
    assert_eq!(engine.replicate().await.unwrap().sent, 1);
    drop(engine);

    let reopened = disk_engine(&db, dir.path(), cfg).await;
    assert_eq!(reopened.scan_local().await.unwrap(), ScanReport::default());
    assert!(reopened.replicate().await.unwrap().is_empty());
}
