//! Cache Entry Module
//!
//! Defines the structure for individual entries held by an in-memory node.

use std::time::{SystemTime, UNIX_EPOCH};

// == Cache Entry ==
/// Represents a single stored value with its expiry metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The serialized value
    pub value: Vec<u8>,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry with an optional TTL in milliseconds.
    pub fn new(value: Vec<u8>, ttl_ms: Option<u64>) -> Self {
        Self {
            value,
            expires_at: ttl_ms.map(deadline_after),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time reaches its expiration time.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => current_timestamp_ms() >= expires,
            None => false,
        }
    }

    /// Re-arms the expiry to `ttl_ms` from now.
    pub fn expire_in(&mut self, ttl_ms: u64) {
        self.expires_at = Some(deadline_after(ttl_ms));
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, or None if no expiration is set.
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at
            .map(|expires| expires.saturating_sub(current_timestamp_ms()))
    }

    /// Returns remaining TTL in whole seconds, rounded to nearest.
    pub fn ttl_remaining(&self) -> Option<u64> {
        self.ttl_remaining_ms().map(|ms| ms.saturating_add(500) / 1000)
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Absolute expiry `ttl_ms` from now; huge TTLs pin to the far future.
fn deadline_after(ttl_ms: u64) -> u64 {
    current_timestamp_ms().saturating_add(ttl_ms)
}
