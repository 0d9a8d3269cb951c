//! File access collaborator.
//!
//! The engine never touches the host file system directly. Everything goes
//! through [`FileAccess`], so hosts with their own vault APIs plug in here.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use vaultsync_types::FileStat;

/// Reads and writes vault files by vault-relative path (`/` separated).
#[async_trait]
pub trait FileAccess: Send + Sync {
    /// Returns `None` if the file does not exist.
    async fn read_file(&self, path: &str) -> SyncResult<Option<Vec<u8>>>;

    /// Creates or replaces a file and sets its modification time.
    async fn write_file(&self, path: &str, data: &[u8], mtime: u64) -> SyncResult<()>;

    async fn stat_file(&self, path: &str) -> SyncResult<Option<FileStat>>;

    /// Every file in the vault, sorted.
    async fn list_files(&self) -> SyncResult<Vec<String>>;

    /// Removes a file. Missing files are not an error.
    async fn delete(&self, path: &str) -> SyncResult<()>;
}

/// [`FileAccess`] over a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryFileAccess {
    root: PathBuf,
}

impl DirectoryFileAccess {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> SyncResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(SyncError::Config(format!("path escapes the vault: {path}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileAccess for DirectoryFileAccess {
    async fn read_file(&self, path: &str) -> SyncResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.resolve(path)?).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, path: &str, data: &[u8], mtime: u64) -> SyncResult<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, data).await?;
        let file = tokio::fs::File::options().write(true).open(&target).await?;
        let file = file.into_std().await;
        let modified = UNIX_EPOCH + Duration::from_millis(mtime);
        tokio::task::spawn_blocking(move || file.set_modified(modified))
            .await
            .map_err(|e| SyncError::Io(std::io::Error::other(e)))??;
        Ok(())
    }

    async fn stat_file(&self, path: &str) -> SyncResult<Option<FileStat>> {
        let meta = match tokio::fs::metadata(self.resolve(path)?).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mtime = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Ok(Some(FileStat {
            mtime,
            size: meta.len(),
        }))
    }

    async fn list_files(&self) -> SyncResult<Vec<String>> {
        let mut out = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut reader = match tokio::fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(item) = reader.next_entry().await? {
                let kind = item.file_type().await?;
                let full = item.path();
                if kind.is_dir() {
                    pending.push(full);
                } else if kind.is_file() {
                    if let Ok(rel) = full.strip_prefix(&self.root) {
                        let parts: Vec<_> = rel
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect();
                        out.push(parts.join("/"));
                    }
                }
            }
        }
        out.sort();
        Ok(out)
    }

    async fn delete(&self, path: &str) -> SyncResult<()> {
        match tokio::fs::remove_file(self.resolve(path)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory file access for testing.
pub mod mock {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Mutex, PoisonError};

    /// A vault held in memory.
    #[derive(Debug, Default)]
    pub struct MemoryFileAccess {
        files: Mutex<BTreeMap<String, (Vec<u8>, u64)>>,
    }

    impl MemoryFileAccess {
        pub fn new() -> Self {
            Self::default()
        }

        /// Sets a file directly, bypassing the engine.
        pub fn insert(&self, path: &str, data: impl Into<Vec<u8>>, mtime: u64) {
            self.files
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(normalize(path), (data.into(), mtime));
        }

        pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
            self.files
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&normalize(path))
                .map(|(data, _)| data.clone())
        }

        pub fn remove(&self, path: &str) {
            self.files
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&normalize(path));
        }

        pub fn len(&self) -> usize {
            self.files.lock().unwrap_or_else(PoisonError::into_inner).len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    fn normalize(path: &str) -> String {
        path.trim_start_matches('/').to_string()
    }

    #[async_trait]
    impl FileAccess for MemoryFileAccess {
        async fn read_file(&self, path: &str) -> SyncResult<Option<Vec<u8>>> {
            Ok(self.contents(path))
        }

        async fn write_file(&self, path: &str, data: &[u8], mtime: u64) -> SyncResult<()> {
            self.insert(path, data, mtime);
            Ok(())
        }

        async fn stat_file(&self, path: &str) -> SyncResult<Option<FileStat>> {
            Ok(self
                .files
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&normalize(path))
                .map(|(data, mtime)| FileStat {
                    mtime: *mtime,
                    size: data.len() as u64,
                }))
        }

        async fn list_files(&self) -> SyncResult<Vec<String>> {
            Ok(self
                .files
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned()
                .collect())
        }

        async fn delete(&self, path: &str) -> SyncResult<()> {
            self.remove(path);
            Ok(())
        }
    }
}
