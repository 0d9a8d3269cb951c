//! Object storage used by the journal transport.

use crate::error::SyncResult;
use async_trait::async_trait;

/// A flat key/value object store (an S3 bucket or a prefix of one).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    fn label(&self) -> String;

    async fn put(&self, key: &str, data: Vec<u8>) -> SyncResult<()>;

    /// Returns `None` if the object does not exist.
    async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>>;

    async fn exists(&self, key: &str) -> SyncResult<bool>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> SyncResult<Vec<String>>;

    async fn delete(&self, key: &str) -> SyncResult<()>;

    /// Deletes every object under `prefix`, returning how many.
    async fn delete_prefix(&self, prefix: &str) -> SyncResult<usize> {
        let keys = self.list(prefix).await?;
        for key in &keys {
            self.delete(key).await?;
        }
        Ok(keys.len())
    }
}

/// In-memory object store for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use crate::fence::CancelToken;
    use std::collections::{BTreeMap, HashMap};
    use std::fmt;
    use std::sync::{Mutex, MutexGuard, PoisonError};

    /// Cancels a token once enough matching requests have completed.
    struct Tripwire {
        prefix: String,
        remaining: usize,
        token: CancelToken,
    }

    impl fmt::Debug for Tripwire {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Tripwire")
                .field("prefix", &self.prefix)
                .field("remaining", &self.remaining)
                .finish_non_exhaustive()
        }
    }

    #[derive(Debug, Default)]
    struct State {
        objects: BTreeMap<String, Vec<u8>>,
        puts: HashMap<String, usize>,
        gets: HashMap<String, usize>,
        fail_put_prefix: Option<String>,
        fail_next: usize,
        tripwire: Option<Tripwire>,
    }

    /// Bucket held in memory, with request counters and failure injection.
    #[derive(Debug, Default)]
    pub struct MemoryObjectStore {
        state: Mutex<State>,
    }

    impl MemoryObjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Fails the next put whose key starts with `prefix`.
        pub fn fail_next_put(&self, prefix: impl Into<String>) {
            self.state().fail_put_prefix = Some(prefix.into());
        }

        /// Fails the next `n` requests of any kind.
        pub fn fail_next(&self, n: usize) {
            self.state().fail_next = n;
        }

        /// Cancels `token` after `requests` more successful puts or gets of
        /// keys starting with `prefix`.
        pub fn cancel_after(&self, prefix: impl Into<String>, requests: usize, token: CancelToken) {
            self.state().tripwire = Some(Tripwire {
                prefix: prefix.into(),
                remaining: requests,
                token,
            });
        }

        /// Put attempts for keys starting with `prefix`, failed ones included.
        pub fn put_count(&self, prefix: &str) -> usize {
            self.state()
                .puts
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(_, n)| n)
                .sum()
        }

        pub fn get_count(&self, key: &str) -> usize {
            self.state().gets.get(key).copied().unwrap_or(0)
        }

        pub fn keys(&self) -> Vec<String> {
            self.state().objects.keys().cloned().collect()
        }

        /// Replaces an object's bytes directly.
        pub fn tamper(&self, key: &str, data: Vec<u8>) {
            self.state().objects.insert(key.to_string(), data);
        }

        fn count_toward_tripwire(state: &mut State, key: &str) {
            let Some(trip) = state.tripwire.as_mut() else {
                return;
            };
            if !key.starts_with(&trip.prefix) {
                return;
            }
            trip.remaining = trip.remaining.saturating_sub(1);
            if trip.remaining == 0 {
                trip.token.cancel();
                state.tripwire = None;
            }
        }

        fn check_failure(state: &mut State, key: &str) -> SyncResult<()> {
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(SyncError::ObjectStore {
                    key: key.to_string(),
                    message: "injected failure".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryObjectStore {
        fn label(&self) -> String {
            "memory".to_string()
        }

        async fn put(&self, key: &str, data: Vec<u8>) -> SyncResult<()> {
            let mut state = self.state();
            *state.puts.entry(key.to_string()).or_default() += 1;
            Self::check_failure(&mut state, key)?;
            if state
                .fail_put_prefix
                .as_deref()
                .is_some_and(|p| key.starts_with(p))
            {
                state.fail_put_prefix = None;
                return Err(SyncError::ObjectStore {
                    key: key.to_string(),
                    message: "injected put failure".into(),
                });
            }
            state.objects.insert(key.to_string(), data);
            Self::count_toward_tripwire(&mut state, key);
            Ok(())
        }

        async fn get(&self, key: &str) -> SyncResult<Option<Vec<u8>>> {
            let mut state = self.state();
            *state.gets.entry(key.to_string()).or_default() += 1;
            Self::check_failure(&mut state, key)?;
            let object = state.objects.get(key).cloned();
            Self::count_toward_tripwire(&mut state, key);
            Ok(object)
        }

        async fn exists(&self, key: &str) -> SyncResult<bool> {
            let mut state = self.state();
            Self::check_failure(&mut state, key)?;
            Ok(state.objects.contains_key(key))
        }

        async fn list(&self, prefix: &str) -> SyncResult<Vec<String>> {
            let mut state = self.state();
            Self::check_failure(&mut state, prefix)?;
            Ok(state
                .objects
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn delete(&self, key: &str) -> SyncResult<()> {
            let mut state = self.state();
            Self::check_failure(&mut state, key)?;
            state.objects.remove(key);
            Ok(())
        }
    }
}
