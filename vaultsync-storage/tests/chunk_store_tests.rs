use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::collections::HashSet;
use std::sync::Arc;
use vaultsync_crypto::{ContentHasher, HashAlgorithm};
use vaultsync_storage::{
    ChunkStore, EdenConfig, LocalBackend, MemoryBackend, SplitterConfig, StorageError,
};
use vaultsync_types::ChunkId;

fn store_with(eden: EdenConfig) -> (Arc<MemoryBackend>, ChunkStore) {
    let backend = Arc::new(MemoryBackend::new());
    let store = ChunkStore::new(
        backend.clone() as Arc<dyn LocalBackend>,
        ContentHasher::new(HashAlgorithm::XxHash64),
        SplitterConfig::Fixed { size: 4 },
        eden,
    );
    (backend, store)
}

fn store() -> ChunkStore {
    store_with(EdenConfig::default()).1
}

#[test]
fn identical_content_identical_ids() {
    let store = store();
    let a = store.store_content(b"hello world!").unwrap();
    let b = store.store_content(b"hello world!").unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 3);
}

#[test]
fn dedup_within_content() {
    let store = store();
    let ids = store.store_content(b"abcdabcdabcd").unwrap();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], ids[1]);
    assert_eq!(store.all_ids().unwrap().len(), 1);
}

#[test]
fn read_roundtrip() {
    let store = store();
    let ids = store.store_content(b"some note content").unwrap();
    assert_eq!(store.read_content(&ids).unwrap(), b"some note content");
}

#[test]
fn missing_chunk_is_reported() {
    let store = store();
    let ghost = ChunkId::from_digest("deadbeef");
    assert!(matches!(store.read(&ghost), Err(StorageError::MissingChunk(id)) if id == ghost));
    assert_eq!(store.missing(&[ghost.clone(), ghost.clone()]).unwrap(), vec![ghost]);
}

#[test]
fn new_chunks_land_in_eden_then_compact() {
    let (backend, store) = store_with(EdenConfig {
        max_count: 100,
        max_bytes: 1 << 20,
        max_age_secs: 3600,
    });
    let ids = store.store_content(b"12345678").unwrap();
    assert!(backend.chunk_ids().unwrap().is_empty());
    assert_eq!(store.eden().stats().unwrap().count, 2);

    assert_eq!(store.compact().unwrap(), 2);
    assert_eq!(backend.chunk_ids().unwrap().len(), 2);
    assert_eq!(store.read_content(&ids).unwrap(), b"12345678");
}

#[test]
fn dedup_only_commit_still_graduates_stale_chunks() {
    let (backend, store) = store_with(EdenConfig {
        max_count: 100,
        max_bytes: 1 << 20,
        max_age_secs: 10,
    });
    let t0 = Utc.timestamp_opt(1_000, 0).unwrap();
    let ids = store.commit_at(&[b"aaaa"], t0).unwrap();
    assert!(!backend.has_chunk(&ids[0]).unwrap());

    // Nothing new in this commit, but the old member is past its age.
    store.commit_at(&[b"aaaa"], t0 + Duration::seconds(100)).unwrap();
    assert!(backend.has_chunk(&ids[0]).unwrap());
    assert_eq!(store.eden().stats().unwrap().count, 0);
}

#[test]
fn commit_at_the_age_limit_graduates() {
    let (backend, store) = store_with(EdenConfig {
        max_count: 100,
        max_bytes: 1 << 20,
        max_age_secs: 10,
    });
    let t0 = Utc.timestamp_opt(1_000, 0).unwrap();
    let old = store.commit_at(&[b"aaaa"], t0).unwrap();
    let new = store.commit_at(&[b"bbbb"], t0 + Duration::seconds(10)).unwrap();
    assert!(backend.has_chunk(&old[0]).unwrap());
    assert_eq!(store.eden().member_ids().unwrap(), new);
}

#[test]
fn garbage_collect_removes_unreferenced() {
    let store = store();
    let keep = store.store_content(b"keep1234").unwrap();
    let drop = store.store_content(b"dropABCD").unwrap();
    store.compact().unwrap();

    let live: HashSet<ChunkId> = keep.iter().cloned().collect();
    let dry = store.garbage_collect(&live, true).unwrap();
    assert!(dry.dry_run);
    assert_eq!(dry.removed_count(), 2);
    assert!(store.contains(&drop[0]).unwrap());

    let report = store.garbage_collect(&live, false).unwrap();
    assert_eq!(report.removed_count(), 2);
    assert_eq!(report.bytes, 8);
    assert!(!store.contains(&drop[0]).unwrap());
    assert!(store.contains(&keep[0]).unwrap());
}

#[test]
fn gc_also_clears_eden() {
    let store = store();
    let ids = store.store_content(b"eden").unwrap();
    let report = store.garbage_collect(&HashSet::new(), false).unwrap();
    assert_eq!(report.removed, ids);
    assert!(store.all_ids().unwrap().is_empty());
}

#[test]
fn insert_verified_rejects_wrong_bytes() {
    let store = store();
    let id = store.hasher().hash(b"real");
    let err = store.insert_verified(&id, b"fake").unwrap_err();
    assert!(matches!(err, StorageError::HashMismatch { .. }));
    store.insert_verified(&id, b"real").unwrap();
    assert_eq!(store.read(&id).unwrap(), b"real");
}

#[test]
fn recreate_restores_only_missing() {
    let store = store();
    let ids = store.store_content(b"aaaabbbb").unwrap();
    store.garbage_collect(&[ids[0].clone()].into_iter().collect(), false).unwrap();
    let recreated = store.recreate(b"aaaabbbb").unwrap();
    assert_eq!(recreated, vec![ids[1].clone()]);
    assert_eq!(store.read_content(&ids).unwrap(), b"aaaabbbb");
}
