mod common;

use common::{config, couch_device, Device};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use vaultsync_storage::LocalBackend;
use vaultsync_sync::couchdb::database::mock::MemoryDatabase;
use vaultsync_sync::{Discrepancy, PathDiscrepancy, RepairDirection, SyncError};
use vaultsync_types::ChunkId;

const T0: u64 = 1_700_000_000_000;

fn drop_chunk(device: &Device, id: &ChunkId) {
    device.engine.chunks().eden().discard(id).unwrap();
    device.backend.delete_chunk(id).unwrap();
}

fn first_chunk(device: &Device, path: &str) -> ChunkId {
    device.engine.documents().get(path).unwrap().unwrap().chunk_ids[0].clone()
}

async fn device() -> (Arc<MemoryDatabase>, Device) {
    let db = Arc::new(MemoryDatabase::new());
    let device = couch_device(&db, config("maint")).await;
    (db, device)
}

// ── Garbage collection ──────────────────────────────────────────

#[tokio::test]
async fn gc_removes_only_unreferenced_chunks() {
    let (_db, d) = device().await;
    d.write("a.md", "abcdefgh12345678", T0).await;
    let stale = first_chunk(&d, "a.md");
    d.write("a.md", "zzzzzzzz12345678", T0 + 10_000).await;

    let preview = d.engine.garbage_collect(true).await.unwrap();
    assert!(preview.dry_run);
    assert_eq!(preview.removed, vec![stale.clone()]);
    assert_eq!(preview.bytes, 8);
    assert!(d.engine.chunks().contains(&stale).unwrap());

    let report = d.engine.garbage_collect(false).await.unwrap();
    assert_eq!(report.removed_count(), 1);
    assert!(!d.engine.chunks().contains(&stale).unwrap());
    assert_eq!(
        d.engine.chunks().read_content(&d.engine.documents().get("a.md").unwrap().unwrap().chunk_ids).unwrap(),
        b"zzzzzzzz12345678"
    );
    assert!(d.engine.garbage_collect(false).await.unwrap().removed.is_empty());
}

#[tokio::test]
async fn compaction_empties_eden_and_compacts_remote() {
    let (db, d) = device().await;
    d.write("a.md", "eden holds new chunks", T0).await;
    assert!(d.engine.chunks().eden().stats().unwrap().count > 0);

    let moved = d.engine.compact().await.unwrap();
    assert!(moved > 0);
    assert_eq!(d.engine.chunks().eden().stats().unwrap().count, 0);
    assert_eq!(db.compactions(), 1);
    assert_eq!(d.read("a.md").as_deref(), Some("eden holds new chunks"));
}

// ── Missing chunks ──────────────────────────────────────────────

#[tokio::test]
async fn missing_chunk_is_recreated_from_file() {
    let (_db, d) = device().await;
    d.write("a.md", "recoverable text", T0).await;
    let id = first_chunk(&d, "a.md");
    drop_chunk(&d, &id);

    let report = d.engine.recreate_missing_chunks().await.unwrap();
    assert_eq!(report.recreated, vec![id.clone()]);
    assert_eq!(report.fetched, 0);
    report.ensure_complete().unwrap();
    assert!(d.engine.chunks().contains(&id).unwrap());
}

#[tokio::test]
async fn missing_chunk_is_fetched_from_remote() {
    let (_db, d) = device().await;
    d.write("a.md", "kept remotely", T0).await;
    d.engine.replicate().await.unwrap();

    let id = first_chunk(&d, "a.md");
    d.files.remove("a.md");
    drop_chunk(&d, &id);

    let report = d.engine.recreate_missing_chunks().await.unwrap();
    assert!(report.recreated.is_empty());
    assert_eq!(report.fetched, 1);
    assert!(report.lost.is_empty());
}

#[tokio::test]
async fn unrecoverable_chunk_is_data_loss() {
    let (_db, d) = device().await;
    d.write("a.md", "gone for good", T0).await;
    let id = first_chunk(&d, "a.md");
    d.files.remove("a.md");
    drop_chunk(&d, &id);

    let report = d.engine.recreate_missing_chunks().await.unwrap();
    assert_eq!(report.lost, vec![("a.md".to_string(), id)]);
    assert!(matches!(
        report.ensure_complete(),
        Err(SyncError::DataLoss { .. })
    ));
}

// ── Verify and repair ───────────────────────────────────────────

/// Leaves one discrepancy of each kind behind the engine's back.
async fn diverge(d: &Device) {
    d.write("a.md", "original a", T0).await;
    d.write("b.md", "original b", T0).await;
    d.files.insert("a.md", "changed a!", T0);
    d.files.remove("b.md");
    d.files.insert("c.md", "untracked", T0);
}

fn expected() -> Vec<PathDiscrepancy> {
    vec![
        PathDiscrepancy {
            path: "a.md".into(),
            kind: Discrepancy::ContentMismatch,
        },
        PathDiscrepancy {
            path: "b.md".into(),
            kind: Discrepancy::MissingOnStorage,
        },
        PathDiscrepancy {
            path: "c.md".into(),
            kind: Discrepancy::MissingInDatabase,
        },
    ]
}

#[tokio::test]
async fn verify_reports_without_touching_anything() {
    let (_db, d) = device().await;
    diverge(&d).await;

    let report = d.engine.verify_and_repair(None).await.unwrap();
    assert_eq!(report.discrepancies, expected());
    assert_eq!(report.repaired, 0);
    assert_eq!(d.read("a.md").as_deref(), Some("changed a!"));
}

#[tokio::test]
async fn repair_from_storage_updates_documents() {
    let (_db, d) = device().await;
    diverge(&d).await;

    let report = d
        .engine
        .verify_and_repair(Some(RepairDirection::StorageToDatabase))
        .await
        .unwrap();
    assert_eq!(report.repaired, 3);

    let docs = d.engine.documents();
    assert!(docs.get("b.md").unwrap().unwrap().deleted);
    assert!(!docs.get("c.md").unwrap().unwrap().deleted);
    assert_eq!(
        d.engine
            .chunks()
            .read_content(&docs.get("a.md").unwrap().unwrap().chunk_ids)
            .unwrap(),
        b"changed a!"
    );
    assert!(d.engine.verify_and_repair(None).await.unwrap().is_clean());
}

#[tokio::test]
async fn repair_from_database_rewrites_files() {
    let (_db, d) = device().await;
    diverge(&d).await;

    let report = d
        .engine
        .verify_and_repair(Some(RepairDirection::DatabaseToStorage))
        .await
        .unwrap();
    assert_eq!(report.repaired, 3);

    assert_eq!(d.read("a.md").as_deref(), Some("original a"));
    assert_eq!(d.read("b.md").as_deref(), Some("original b"));
    assert_eq!(d.read("c.md"), None);
    assert!(d.engine.verify_and_repair(None).await.unwrap().is_clean());
}

// ── Remote maintenance ──────────────────────────────────────────

#[tokio::test]
async fn resend_restores_purged_chunks() {
    let (db, d) = device().await;
    d.write("a.md", "resend these chunks", T0).await;
    d.engine.replicate().await.unwrap();

    let id = first_chunk(&d, "a.md");
    db.purge(id.as_str());
    assert!(!db.doc_ids().contains(&id.to_string()));

    let sent = d.engine.resend_chunks().await.unwrap();
    assert_eq!(sent, d.engine.chunks().all_ids().unwrap().len());
    assert!(db.doc_ids().contains(&id.to_string()));
}

#[tokio::test]
async fn rebuild_locks_remote_until_peers_resolve() {
    let db = Arc::new(MemoryDatabase::new());
    let a = couch_device(&db, config("a")).await;
    let b = couch_device(&db, config("b")).await;
    a.write("a.md", "authoritative copy", T0).await;
    a.engine.replicate().await.unwrap();
    b.engine.replicate().await.unwrap();

    assert_eq!(a.engine.rebuild_remote().await.unwrap(), 1);
    assert!(b.engine.replicate().await.unwrap_err().is_locked());

    b.engine.mark_resolved().await.unwrap();
    let stats = b.engine.replicate().await.unwrap();
    assert_eq!(stats.conflicts, 0);
    assert_eq!(b.read("a.md").as_deref(), Some("authoritative copy"));

    // The rebuilt remote is complete on its own.
    let c = couch_device(&db, config("c")).await;
    c.engine.mark_resolved().await.unwrap();
    c.engine.replicate().await.unwrap();
    assert_eq!(c.read("a.md").as_deref(), Some("authoritative copy"));
}

#[tokio::test]
async fn held_lock_refuses_other_devices_remote_changes() {
    let db = Arc::new(MemoryDatabase::new());
    let a = couch_device(&db, config("a")).await;
    let b = couch_device(&db, config("b")).await;
    a.write("a.md", "owner's copy", T0).await;
    b.write("b.md", "would clobber", T0).await;
    a.engine.replicate().await.unwrap();
    a.engine.rebuild_remote().await.unwrap();

    assert!(b.engine.rebuild_remote().await.unwrap_err().is_locked());
    assert!(b.engine.wipe_remote().await.unwrap_err().is_locked());
    assert!(b.engine.lock_remote().await.unwrap_err().is_locked());
    assert!(b.engine.unlock_remote().await.unwrap_err().is_locked());

    // The holder's remote is untouched.
    let status = a.engine.remote_status().await.unwrap();
    assert!(status.milestone.unwrap().locked);
    a.engine.replicate().await.unwrap();
    let c = couch_device(&db, config("c")).await;
    c.engine.mark_resolved().await.unwrap();
    c.engine.replicate().await.unwrap();
    assert_eq!(c.read("a.md").as_deref(), Some("owner's copy"));
    assert_eq!(c.read("b.md"), None);

    assert!(!a.engine.unlock_remote().await.unwrap().locked);
    assert!(b.engine.lock_remote().await.unwrap().locked);
}
