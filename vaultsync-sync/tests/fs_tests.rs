use vaultsync_sync::fs::mock::MemoryFileAccess;
use vaultsync_sync::{DirectoryFileAccess, FileAccess, SyncError};

// ── Directory-backed vault ──────────────────────────────────────

#[tokio::test]
async fn directory_write_read_and_stat() {
    let dir = tempfile::tempdir().unwrap();
    let files = DirectoryFileAccess::new(dir.path());

    files
        .write_file("notes/daily/today.md", b"hello", 1_700_000_000_000)
        .await
        .unwrap();
    assert_eq!(
        files.read_file("notes/daily/today.md").await.unwrap(),
        Some(b"hello".to_vec())
    );

    let stat = files.stat_file("notes/daily/today.md").await.unwrap().unwrap();
    assert_eq!(stat.size, 5);
    assert_eq!(stat.mtime, 1_700_000_000_000);
}

#[tokio::test]
async fn directory_missing_files_are_none() {
    let dir = tempfile::tempdir().unwrap();
    let files = DirectoryFileAccess::new(dir.path());
    assert_eq!(files.read_file("nope.md").await.unwrap(), None);
    assert_eq!(files.stat_file("nope.md").await.unwrap(), None);
    files.delete("nope.md").await.unwrap();
}

#[tokio::test]
async fn directory_lists_nested_files_sorted() {
    let dir = tempfile::tempdir().unwrap();
    let files = DirectoryFileAccess::new(dir.path());
    for path in ["b.md", "a/z.md", "a/b/c.md"] {
        files.write_file(path, b"x", 1_000).await.unwrap();
    }
    assert_eq!(
        files.list_files().await.unwrap(),
        vec!["a/b/c.md".to_string(), "a/z.md".into(), "b.md".into()]
    );

    files.delete("a/z.md").await.unwrap();
    assert_eq!(files.list_files().await.unwrap().len(), 2);
}

#[tokio::test]
async fn directory_rejects_escaping_paths() {
    let dir = tempfile::tempdir().unwrap();
    let files = DirectoryFileAccess::new(dir.path().join("vault"));
    let err = files.write_file("../outside.md", b"x", 1_000).await.unwrap_err();
    assert!(matches!(err, SyncError::Config(_)));
    assert!(files.read_file("a/../../etc/passwd").await.is_err());
}

#[tokio::test]
async fn directory_leading_slash_is_vault_relative() {
    let dir = tempfile::tempdir().unwrap();
    let files = DirectoryFileAccess::new(dir.path());
    files.write_file("/root.md", b"r", 2_000).await.unwrap();
    assert!(dir.path().join("root.md").exists());
}

// ── In-memory vault ─────────────────────────────────────────────

#[tokio::test]
async fn memory_vault_behaves_like_a_directory() {
    let files = MemoryFileAccess::new();
    assert!(files.is_empty());
    files.write_file("/a.md", b"one", 10).await.unwrap();
    files.insert("b.md", "two", 20);

    assert_eq!(files.list_files().await.unwrap(), vec!["a.md", "b.md"]);
    let stat = files.stat_file("a.md").await.unwrap().unwrap();
    assert_eq!((stat.mtime, stat.size), (10, 3));

    files.delete("a.md").await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files.read_file("a.md").await.unwrap(), None);
}
