//! Lock Module
//!
//! Quorum-based distributed locking over one or more independent lock nodes.
//!
//! A lock is held when a majority of lock nodes accepted the caller's random
//! token for the lock key before the TTL, minus a clock drift allowance, ran out.
//! Minority node failures therefore never grant the same lock twice.

mod handle;
mod redlock;

pub use handle::LockHandle;
pub use redlock::{LockSettings, Redlock};

use std::time::Duration;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
