//! Ternary freshness comparison.
//!
//! Raw timestamps are never compared directly: hosts report mtimes with
//! different resolutions, so both sides are truncated to a common
//! resolution first.

use serde::{Deserialize, Serialize};

/// Coarsest mtime resolution seen across supported filesystems (FAT).
pub const MTIME_RESOLUTION_MS: u64 = 2_000;

/// Result of comparing a base file against a target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Freshness {
    /// The base side carries the newer change.
    BaseIsNew,
    /// The target side carries the newer change.
    TargetIsNew,
    /// Neither side is newer.
    Even,
}

impl Freshness {
    /// Swaps the roles of base and target.
    #[must_use]
    pub fn reversed(self) -> Self {
        match self {
            Self::BaseIsNew => Self::TargetIsNew,
            Self::TargetIsNew => Self::BaseIsNew,
            Self::Even => Self::Even,
        }
    }
}

/// Truncates an mtime to [`MTIME_RESOLUTION_MS`].
#[must_use]
pub fn truncate_mtime(mtime: u64) -> u64 {
    mtime - mtime % MTIME_RESOLUTION_MS
}

/// Compares two mtimes after truncation.
#[must_use]
pub fn compare_mtime(base: u64, target: u64) -> Freshness {
    let base = truncate_mtime(base);
    let target = truncate_mtime(target);
    match base.cmp(&target) {
        std::cmp::Ordering::Greater => Freshness::BaseIsNew,
        std::cmp::Ordering::Less => Freshness::TargetIsNew,
        std::cmp::Ordering::Equal => Freshness::Even,
    }
}
