mod common;

use common::{encrypted, journal_config, journal_device, Device};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use vaultsync_sync::journal::object_store::mock::MemoryObjectStore;
use vaultsync_sync::journal::{chunk_key, CheckpointInfo};
use vaultsync_sync::{EngineConfig, ResetScope, RetryConfig, SyncError};

const NOTE: &str = "notes/journal.md";
const T0: u64 = 1_700_000_000_000;

/// Six single-chunk notes, sent two per record.
async fn six_notes(store: &Arc<MemoryObjectStore>) -> Device {
    let mut config = journal_config("a");
    config.replication.batch_size = 2;
    let a = journal_device(store, config).await;
    for i in 0..6 {
        a.write(&format!("n{i}.md"), &format!("note {i}"), T0).await;
    }
    a
}

fn device_records(store: &MemoryObjectStore, device: &Device) -> Vec<String> {
    let prefix = format!("journal/{}/", device.engine.device_id());
    store
        .keys()
        .into_iter()
        .filter(|k| k.starts_with(&prefix))
        .collect()
}

#[tokio::test]
async fn journal_carries_files_between_devices() {
    let store = Arc::new(MemoryObjectStore::new());
    let a = journal_device(&store, journal_config("a")).await;
    let b = journal_device(&store, journal_config("b")).await;

    a.write(NOTE, "written to the bucket", T0).await;
    a.write("other.md", "second file", T0).await;
    let sent = a.engine.replicate().await.unwrap();
    assert_eq!(sent.sent, 2);
    assert_eq!(device_records(&store, &a).len(), 1);

    let received = b.engine.replicate().await.unwrap();
    assert_eq!(received.received, 2);
    assert_eq!(b.read(NOTE).as_deref(), Some("written to the bucket"));
    assert_eq!(b.read("other.md").as_deref(), Some("second file"));
    // Received entries are not echoed back.
    assert!(device_records(&store, &b).is_empty());

    b.remove("other.md").await;
    b.engine.replicate().await.unwrap();
    a.engine.replicate().await.unwrap();
    assert_eq!(a.read("other.md"), None);
    assert_eq!(a.read(NOTE).as_deref(), Some("written to the bucket"));
}

#[tokio::test]
async fn interrupted_upload_is_delivered_exactly_once() {
    let store = Arc::new(MemoryObjectStore::new());
    let config = EngineConfig {
        retry: RetryConfig {
            max_attempts: Some(1),
            ..RetryConfig::fast()
        },
        ..journal_config("a")
    };
    let a = journal_device(&store, config).await;
    let b = journal_device(&store, journal_config("b")).await;
    a.write(NOTE, "fits one", T0).await;

    store.fail_next_put("journal/");
    let err = a.engine.replicate().await.unwrap_err();
    assert!(matches!(err.root(), SyncError::ObjectStore { .. }));
    assert!(device_records(&store, &a).is_empty());

    a.engine.replicate().await.unwrap();
    assert_eq!(store.put_count("chunks/"), 2);
    assert_eq!(store.put_count("journal/"), 2);
    assert_eq!(device_records(&store, &a).len(), 1);

    // A settled cycle writes nothing.
    assert!(a.engine.replicate().await.unwrap().is_empty());
    assert_eq!(store.put_count("journal/"), 2);

    assert_eq!(b.engine.replicate().await.unwrap().received, 1);
    assert_eq!(b.read(NOTE).as_deref(), Some("fits one"));
}

#[tokio::test]
async fn replaying_received_history_is_harmless() {
    let store = Arc::new(MemoryObjectStore::new());
    let a = journal_device(&store, journal_config("a")).await;
    let b = journal_device(&store, journal_config("b")).await;
    a.write(NOTE, "replay me", T0).await;
    a.engine.replicate().await.unwrap();
    b.engine.replicate().await.unwrap();

    b.engine.reset_checkpoint(ResetScope::ReceivedOnly).unwrap();
    let replay = b.engine.replicate().await.unwrap();
    assert_eq!(replay.received, 0);
    assert_eq!(replay.conflicts, 0);
    assert!(device_records(&store, &b).is_empty());
    assert_eq!(b.read(NOTE).as_deref(), Some("replay me"));
}

#[tokio::test]
async fn tampered_record_is_rejected() {
    let store = Arc::new(MemoryObjectStore::new());
    let a = journal_device(&store, journal_config("a")).await;
    let b = journal_device(&store, journal_config("b")).await;
    a.write(NOTE, "genuine", T0).await;
    a.engine.replicate().await.unwrap();

    let key = device_records(&store, &a).remove(0);
    store.tamper(&key, br#"{"forged":true}"#.to_vec());

    let err = b.engine.replicate().await.unwrap_err();
    assert!(matches!(err.root(), SyncError::ChecksumMismatch { .. }));
    assert_eq!(store.get_count(&key), 2);
    assert_eq!(b.read(NOTE), None);
}

#[tokio::test]
async fn encrypted_journal_round_trips() {
    let store = Arc::new(MemoryObjectStore::new());
    let a = journal_device(&store, encrypted(journal_config("a"), "bucket pass")).await;
    let b = journal_device(&store, encrypted(journal_config("b"), "bucket pass")).await;
    a.write("private/diary.md", "dear diary", T0).await;
    a.engine.replicate().await.unwrap();
    b.engine.replicate().await.unwrap();
    assert_eq!(b.read("private/diary.md").as_deref(), Some("dear diary"));

    let intruder = journal_device(&store, encrypted(journal_config("c"), "guess")).await;
    assert!(intruder.engine.replicate().await.unwrap_err().is_authentication());
}

#[tokio::test]
async fn checkpoint_is_restored_from_bucket() {
    let store = Arc::new(MemoryObjectStore::new());
    let a = journal_device(&store, journal_config("a")).await;
    let b_config = journal_config("b");
    let b = journal_device(&store, b_config.clone()).await;
    a.write(NOTE, "already here", T0).await;
    a.engine.replicate().await.unwrap();
    b.engine.replicate().await.unwrap();
    let key = device_records(&store, &a).remove(0);
    let fetched = store.get_count(&key);

    // Same device, fresh local database.
    let restored = journal_device(&store, b_config).await;
    let stats = restored.engine.replicate().await.unwrap();
    assert_eq!(stats.received, 0);
    assert_eq!(store.get_count(&key), fetched);
}

#[tokio::test]
async fn wipe_and_rebuild_republish_everything() {
    let store = Arc::new(MemoryObjectStore::new());
    let a = journal_device(&store, journal_config("a")).await;
    a.write(NOTE, "survives the wipe", T0).await;
    a.engine.replicate().await.unwrap();

    a.engine.wipe_remote().await.unwrap();
    assert!(store.keys().is_empty());

    assert_eq!(a.engine.replicate().await.unwrap().sent, 1);
    let c = journal_device(&store, journal_config("c")).await;
    c.engine.replicate().await.unwrap();
    assert_eq!(c.read(NOTE).as_deref(), Some("survives the wipe"));

    assert_eq!(a.engine.rebuild_remote().await.unwrap(), 1);
    let status = a.engine.remote_status().await.unwrap();
    assert!(status.milestone.unwrap().locked);
    assert!(c.engine.replicate().await.unwrap_err().is_locked());
    a.engine.unlock_remote().await.unwrap();
}

#[tokio::test]
async fn peers_repopulate_a_wiped_bucket() {
    let store = Arc::new(MemoryObjectStore::new());
    let a = journal_device(&store, journal_config("a")).await;
    let b = journal_device(&store, journal_config("b")).await;
    b.write("x.md", "only b has this", T0).await;
    b.engine.replicate().await.unwrap();

    a.engine.wipe_remote().await.unwrap();
    a.write("a.md", "after the wipe", T0).await;
    assert_eq!(a.engine.replicate().await.unwrap().sent, 1);

    // B sees a new remote: it forgets its history and uploads again.
    let stats = b.engine.replicate().await.unwrap();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.sent, 1);
    assert_eq!(b.read("a.md").as_deref(), Some("after the wipe"));

    let c = journal_device(&store, journal_config("c")).await;
    c.engine.replicate().await.unwrap();
    assert_eq!(c.read("x.md").as_deref(), Some("only b has this"));
    assert_eq!(c.read("a.md").as_deref(), Some("after the wipe"));
}

#[tokio::test]
async fn cancelled_send_keeps_finished_batches() {
    let store = Arc::new(MemoryObjectStore::new());
    let a = six_notes(&store).await;
    let b = journal_device(&store, journal_config("b")).await;

    store.cancel_after("journal/", 2, a.engine.cancel_token().clone());
    let err = a.engine.replicate().await.unwrap_err();
    assert!(matches!(err.root(), SyncError::Cancelled));
    assert_eq!(device_records(&store, &a).len(), 2);

    let cp = CheckpointInfo::load(a.backend.as_ref()).unwrap().unwrap();
    let fourth = a.engine.documents().get("n3.md").unwrap().unwrap();
    assert_eq!(cp.last_local_seq, fourth.seq);
    assert_eq!(cp.sent_files.iter().filter(|k| k.starts_with("journal/")).count(), 2);

    a.engine.resume();
    assert_eq!(a.engine.replicate().await.unwrap().sent, 2);
    assert_eq!(store.put_count("journal/"), 3);
    assert_eq!(store.put_count("chunks/"), 6);

    assert_eq!(b.engine.replicate().await.unwrap().received, 6);
    for i in 0..6 {
        assert_eq!(b.read(&format!("n{i}.md")), Some(format!("note {i}")));
    }
}

#[tokio::test]
async fn cancelled_receive_resumes_inside_a_record() {
    let store = Arc::new(MemoryObjectStore::new());
    let a = six_notes(&store).await;
    let b = journal_device(&store, journal_config("b")).await;
    a.engine.replicate().await.unwrap();
    assert_eq!(device_records(&store, &a).len(), 3);

    // The third chunk belongs to the first note of the second record.
    store.cancel_after("chunks/", 3, b.engine.cancel_token().clone());
    let err = b.engine.replicate().await.unwrap_err();
    assert!(matches!(err.root(), SyncError::Cancelled));
    let present: Vec<bool> = (0..6).map(|i| b.read(&format!("n{i}.md")).is_some()).collect();
    assert_eq!(present, vec![true, true, true, false, false, false]);

    let cp = CheckpointInfo::load(b.backend.as_ref()).unwrap().unwrap();
    assert_eq!(cp.received_files.len(), 1);

    b.engine.resume();
    let stats = b.engine.replicate().await.unwrap();
    assert_eq!(stats.received, 3);
    assert_eq!(stats.conflicts, 0);
    for i in 0..6 {
        assert_eq!(b.read(&format!("n{i}.md")), Some(format!("note {i}")));
        let chunk = &a.engine.documents().get(&format!("n{i}.md")).unwrap().unwrap().chunk_ids[0];
        assert_eq!(store.get_count(&chunk_key(chunk)), 1);
    }
    assert!(device_records(&store, &b).is_empty());
}
