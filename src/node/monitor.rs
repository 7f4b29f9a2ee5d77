//! Traffic monitor: logs every command a node receives.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{CacheNode, KeyTtl};
use crate::error::Result;

/// Wraps a node and emits a debug event per command on the
/// `shard_cache::monitor` target. Results pass through untouched.
pub struct Monitored {
    inner: Arc<dyn CacheNode>,
}

impl Monitored {
    pub fn wrap(inner: Arc<dyn CacheNode>) -> Arc<dyn CacheNode> {
        Arc::new(Self { inner })
    }
}

const TARGET: &str = "shard_cache::monitor";

#[async_trait]
impl CacheNode for Monitored {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        debug!(target: TARGET, node = %self.inner.name(), "GET {}", key);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<()> {
        debug!(target: TARGET, node = %self.inner.name(), "SET {} ({} bytes, ttl {:?})", key, value.len(), ttl);
        self.inner.set(key, value, ttl).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        debug!(target: TARGET, node = %self.inner.name(), "DEL {:?}", keys);
        self.inner.del(keys).await
    }

    async fn get_with_ttl(&self, key: &str) -> Result<(Option<Vec<u8>>, KeyTtl)> {
        debug!(target: TARGET, node = %self.inner.name(), "GET+TTL {}", key);
        self.inner.get_with_ttl(key).await
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        debug!(target: TARGET, node = %self.inner.name(), "SCAN {} MATCH {} COUNT {}", cursor, pattern, count);
        self.inner.scan(cursor, pattern, count).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        debug!(target: TARGET, node = %self.inner.name(), "SET {} NX PX {}", key, ttl_ms);
        self.inner.set_if_absent(key, value, ttl_ms).await
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool> {
        debug!(target: TARGET, node = %self.inner.name(), "DEL-IF-EQ {}", key);
        self.inner.delete_if_value(key, value).await
    }

    async fn expire_if_value(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        debug!(target: TARGET, node = %self.inner.name(), "PEXPIRE-IF-EQ {} {}", key, ttl_ms);
        self.inner.expire_if_value(key, value, ttl_ms).await
    }

    async fn close(&self) -> Result<()> {
        debug!(target: TARGET, node = %self.inner.name(), "QUIT");
        self.inner.close().await
    }
}
