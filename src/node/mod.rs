//! Node Module
//!
//! A single cache node reachable over a connection, with in-memory and Redis
//! implementations plus an optional traffic monitor.

mod entry;
mod glob;
mod memory;
mod monitor;
mod redis;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

pub use entry::{current_timestamp_ms, CacheEntry};
pub use glob::glob_matches;
pub use memory::{spawn_sweeper, MemoryNode};
pub use monitor::Monitored;
pub use redis::{parse_cluster_masters, RedisNode};

// == Key TTL ==
/// Remaining time-to-live of a key as reported by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyTtl {
    /// Key does not exist
    Missing,
    /// Key exists without expiry
    Persistent,
    /// Key expires in the given number of seconds
    Expires(u64),
}

impl KeyTtl {
    /// Converts a Redis `TTL` reply (-2 missing, -1 persistent).
    pub fn from_reply(ttl: i64) -> Self {
        match ttl {
            -2 => KeyTtl::Missing,
            t if t < 0 => KeyTtl::Persistent,
            t => KeyTtl::Expires(t as u64),
        }
    }

    /// Returns remaining seconds, None if the key never expires or is missing.
    pub fn seconds(&self) -> Option<u64> {
        match self {
            KeyTtl::Expires(secs) => Some(*secs),
            _ => None,
        }
    }
}

// == Cache Node ==
/// One physical cache node.
///
/// Keys are passed through untouched: namespacing happens above this layer.
/// Connection failures are returned to the caller and never retried here.
#[async_trait]
pub trait CacheNode: Send + Sync {
    /// Stable node identifier used in logs and error context.
    fn name(&self) -> &str;

    /// Point read.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Point write, `ttl` in seconds (None = no expiry).
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<()>;

    /// Deletes a batch of keys owned by this node, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<u64>;

    /// Reads value and TTL in one round trip.
    async fn get_with_ttl(&self, key: &str) -> Result<(Option<Vec<u8>>, KeyTtl)>;

    /// Returns the next cursor (0 = end of stream) and up to roughly `count`
    /// keys matching the glob `pattern`.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;

    /// Writes `value` with a millisecond TTL only if `key` is absent.
    async fn set_if_absent(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool>;

    /// Deletes `key` only if it currently holds `value`.
    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool>;

    /// Resets the millisecond TTL of `key` only if it currently holds `value`.
    async fn expire_if_value(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool>;

    /// Releases the connection. Later calls fail with a connection error.
    async fn close(&self) -> Result<()>;
}
