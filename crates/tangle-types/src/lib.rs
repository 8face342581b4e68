//! Plain-data types shared by the tangle runtime and its tooling.
//!
//! Everything here is a value: identities (`LockId`, `ThreadId`, `CondvarId`),
//! point-in-time snapshots of the lock and thread registries, and the records
//! produced by deadlock detection and abandoned-lock scans. None of it holds a
//! live lock, so it can be copied around, sorted, and serialized freely.

mod ids;
mod query;
mod snapshots;

pub use ids::*;
pub use query::*;
pub use snapshots::*;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch, saturating to zero for clocks set before it.
pub fn unix_ms(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(duration_ms)
        .unwrap_or(0)
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
