//! Shard Cache - A namespaced cache client for single nodes and clusters
//!
//! Provides prefixed reads and writes, glob pattern invalidation across every
//! node of a topology, and quorum-based distributed locks.

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod lock;
pub mod node;

pub use cache::{Cache, CacheOptions, TtlValue};
pub use config::Config;
pub use error::{CacheError, Result};
pub use lock::LockHandle;
pub use node::KeyTtl;
