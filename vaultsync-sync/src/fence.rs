//! Cycle fencing and cancellation.

use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use tokio::sync::{watch, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Keeps garbage collection and compaction away from running replication
/// cycles. Cycles share the read side; GC and compaction take the write
/// side and wait for in-flight cycles to finish.
#[derive(Clone, Default)]
pub struct CycleFence {
    inner: Arc<RwLock<()>>,
}

impl CycleFence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enter_cycle(&self) -> OwnedRwLockReadGuard<()> {
        Arc::clone(&self.inner).read_owned().await
    }

    pub async fn exclusive(&self) -> OwnedRwLockWriteGuard<()> {
        Arc::clone(&self.inner).write_owned().await
    }
}

/// Cooperative cancellation flag checked between chunk units.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Clears a previous cancellation so the next cycle can run.
    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns `Err(Cancelled)` once cancelled.
    pub fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Sender lives as long as any token clone, so this cannot fail early.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}
