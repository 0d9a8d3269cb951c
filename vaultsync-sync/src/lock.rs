//! Advisory remote lock.
//!
//! The lock lives in the remote milestone record next to the passphrase
//! verifier and the hash configuration ("tweak") the remote was built with.
//! Both transports store the milestone; the coordinator only interprets it.

use crate::config::ChunkRevisionScheme;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;
use vaultsync_types::DeviceId;

/// Remote-wide state shared by every device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    #[serde(default)]
    pub locked: bool,
    /// Devices allowed to write while locked.
    #[serde(default)]
    pub accepted_devices: BTreeSet<DeviceId>,
    /// Passphrase verifier, present when the remote is encrypted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verifier: Option<String>,
    /// Hash configuration of the remote's chunk ids.
    pub hash_tweak: String,
    #[serde(default)]
    pub chunk_scheme: ChunkRevisionScheme,
    pub created: DateTime<Utc>,
    /// Changes whenever the remote is rebuilt or wiped and set up again.
    /// Replication history recorded under another epoch is void.
    #[serde(default)]
    pub epoch: String,
}

impl Milestone {
    pub fn new(
        hash_tweak: impl Into<String>,
        verifier: Option<String>,
        chunk_scheme: ChunkRevisionScheme,
    ) -> Self {
        Self {
            locked: false,
            accepted_devices: BTreeSet::new(),
            verifier,
            hash_tweak: hash_tweak.into(),
            chunk_scheme,
            created: Utc::now(),
            epoch: Uuid::new_v4().to_string(),
        }
    }

    pub fn state(&self) -> LockState {
        if self.locked {
            LockState::Locked {
                accepted: self.accepted_devices.clone(),
            }
        } else {
            LockState::Unlocked
        }
    }
}

/// Lock state as seen by one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked { accepted: BTreeSet<DeviceId> },
}

impl LockState {
    pub fn permits(&self, device: &DeviceId) -> bool {
        match self {
            Self::Unlocked => true,
            Self::Locked { accepted } => accepted.contains(device),
        }
    }
}

/// Interprets and edits the milestone on behalf of one device.
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    device_id: DeviceId,
    peer: String,
}

impl LockCoordinator {
    pub fn new(device_id: DeviceId, peer: impl Into<String>) -> Self {
        Self {
            device_id,
            peer: peer.into(),
        }
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Fails with `Locked` if this device may not write.
    pub fn check_write(&self, milestone: &Milestone) -> SyncResult<()> {
        if milestone.state().permits(&self.device_id) {
            Ok(())
        } else {
            warn!(peer = %self.peer, device = %self.device_id, "remote is locked");
            Err(SyncError::Locked {
                peer: self.peer.clone(),
            })
        }
    }

    /// Locks the remote with this device as the only accepted one.
    pub fn lock(&self, milestone: &mut Milestone) {
        milestone.locked = true;
        milestone.accepted_devices.clear();
        milestone.accepted_devices.insert(self.device_id);
        info!(peer = %self.peer, device = %self.device_id, "remote locked");
    }

    pub fn unlock(&self, milestone: &mut Milestone) {
        milestone.locked = false;
        milestone.accepted_devices.clear();
        info!(peer = %self.peer, "remote unlocked");
    }

    /// Accepts this device after the operator has reconciled it with a
    /// rebuilt remote.
    pub fn mark_resolved(&self, milestone: &mut Milestone) {
        if milestone.accepted_devices.insert(self.device_id) {
            info!(peer = %self.peer, device = %self.device_id, "device marked as resolved");
        }
    }

    /// Checks the passphrase verifier and the hash tweak against this
    /// device's configuration.
    pub fn verify_compatibility(
        &self,
        milestone: &Milestone,
        local_tweak: &str,
        passphrase_ok: impl FnOnce(&str) -> bool,
        encrypting: bool,
    ) -> SyncResult<()> {
        match (&milestone.verifier, encrypting) {
            (Some(verifier), true) => {
                if !passphrase_ok(verifier) {
                    return Err(SyncError::Authentication(format!(
                        "passphrase does not match {}",
                        self.peer
                    )));
                }
            }
            (Some(_), false) => {
                return Err(SyncError::RemoteMismatch(
                    "remote is encrypted but encryption is disabled".into(),
                ));
            }
            (None, true) => {
                return Err(SyncError::RemoteMismatch(
                    "remote is not encrypted but encryption is enabled".into(),
                ));
            }
            (None, false) => {}
        }
        if milestone.hash_tweak != local_tweak {
            return Err(SyncError::RemoteMismatch(format!(
                "remote uses {} but this device uses {local_tweak}",
                milestone.hash_tweak
            )));
        }
        Ok(())
    }
}
