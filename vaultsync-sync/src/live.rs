//! Live sync loop.
//!
//! Runs a local scan and a replication cycle on an interval, and on demand
//! through a [`LiveHandle`]. Transient failures are logged and retried on
//! the next tick; `Authentication` and `Locked` stop the loop because
//! retrying cannot fix them.

use crate::engine::SyncEngine;
use crate::error::{SyncError, SyncResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
enum LiveCommand {
    SyncNow,
    Stop,
}

/// Why the loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveExit {
    Stopped,
    Cancelled,
    /// A cycle failed in a way only the operator can fix.
    Fatal(String),
}

/// Handle for sending commands to a running live loop.
#[derive(Clone)]
pub struct LiveHandle {
    command_tx: mpsc::Sender<LiveCommand>,
}

impl LiveHandle {
    pub async fn stop(&self) -> SyncResult<()> {
        self.send(LiveCommand::Stop).await
    }

    /// Runs a cycle now instead of waiting for the next tick.
    pub async fn sync_now(&self) -> SyncResult<()> {
        self.send(LiveCommand::SyncNow).await
    }

    async fn send(&self, command: LiveCommand) -> SyncResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SyncError::Config("live sync is not running".to_string()))
    }
}

impl SyncEngine {
    /// Starts the live loop on the current runtime.
    pub fn spawn_live(self: &Arc<Self>) -> (LiveHandle, JoinHandle<LiveExit>) {
        let (command_tx, command_rx) = mpsc::channel(16);
        let interval = Duration::from_secs(self.config.replication.live_interval_secs.max(1));
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move { engine.run_live(command_rx, interval).await });
        (LiveHandle { command_tx }, task)
    }

    async fn run_live(
        &self,
        mut command_rx: mpsc::Receiver<LiveCommand>,
        interval: Duration,
    ) -> LiveExit {
        info!(device = %self.device_id(), ?interval, "live sync started");
        let mut ticker = tokio::time::interval(interval);
        // Skip first immediate tick
        ticker.tick().await;

        let exit = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(exit) = self.live_cycle().await {
                        break exit;
                    }
                }
                _ = self.cancel.cancelled() => {
                    break LiveExit::Cancelled;
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(LiveCommand::SyncNow) => {
                            debug!("sync requested");
                            if let Some(exit) = self.live_cycle().await {
                                break exit;
                            }
                        }
                        Some(LiveCommand::Stop) => {
                            info!("live sync stopping");
                            break LiveExit::Stopped;
                        }
                        None => {
                            info!("command channel closed, stopping live sync");
                            break LiveExit::Stopped;
                        }
                    }
                }
            }
        };
        info!(?exit, "live sync stopped");
        exit
    }

    /// One scan + replicate pass. Returns an exit reason if the loop must
    /// stop.
    async fn live_cycle(&self) -> Option<LiveExit> {
        let result = match self.scan_local().await {
            Ok(_) => self.replicate().await.map(|_| ()),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => None,
            Err(err) if err.is_authentication() || err.is_locked() => {
                error!(error = %err, "live sync halted");
                Some(LiveExit::Fatal(err.to_string()))
            }
            Err(err) if matches!(err.root(), SyncError::Cancelled) => Some(LiveExit::Cancelled),
            Err(err) => {
                warn!(error = %err, "live sync cycle failed");
                None
            }
        }
    }
}
