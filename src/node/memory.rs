//! In-Memory Node Module
//!
//! A self-contained cache node holding its keyspace in process memory. Used for
//! local development and to simulate single and multi-node topologies in tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{glob_matches, CacheEntry, CacheNode, KeyTtl};
use crate::error::{CacheError, Result};

#[derive(Debug)]
struct Slot {
    /// Insertion sequence, used as the scan cursor position
    seq: u64,
    entry: CacheEntry,
}

// == Keyspace ==
/// Keys in insertion order so that scan cursors survive concurrent deletes.
#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Slot>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl Keyspace {
    fn live(&mut self, key: &str) -> Option<&mut CacheEntry> {
        if self.entries.get(key).is_some_and(|slot| slot.entry.is_expired()) {
            self.remove(key);
            return None;
        }
        self.entries.get_mut(key).map(|slot| &mut slot.entry)
    }

    fn insert(&mut self, key: &str, entry: CacheEntry) {
        if let Some(slot) = self.entries.get_mut(key) {
            slot.entry = entry;
            return;
        }
        self.next_seq += 1;
        let seq = self.next_seq;
        self.order.insert(seq, key.to_string());
        self.entries.insert(key.to_string(), Slot { seq, entry });
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(slot) => {
                self.order.remove(&slot.seq);
                true
            }
            None => false,
        }
    }

    fn purge_expired(&mut self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }
}

// == Memory Node ==
/// In-process cache node with millisecond TTL expiry.
#[derive(Debug)]
pub struct MemoryNode {
    name: String,
    keyspace: RwLock<Keyspace>,
    available: AtomicBool,
    closed: AtomicBool,
}

impl MemoryNode {
    // == Constructor ==
    /// Creates an empty node identified by `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keyspace: RwLock::new(Keyspace::default()),
            available: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    /// Simulates the node becoming unreachable (`false`) or recovering.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Stores raw bytes, bypassing serialization.
    pub async fn put_raw(&self, key: &str, value: &[u8]) {
        self.keyspace
            .write()
            .await
            .insert(key, CacheEntry::new(value.to_vec(), None));
    }

    /// Number of live keys on this node.
    pub async fn len(&self) -> usize {
        let keyspace = self.keyspace.read().await;
        keyspace
            .entries
            .values()
            .filter(|slot| !slot.entry.is_expired())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Removes all expired entries, returning how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        self.keyspace.write().await.purge_expired()
    }

    fn ensure_reachable(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CacheError::Connection(format!(
                "connection to {} is closed",
                self.name
            )));
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(CacheError::Connection(format!(
                "node {} is unreachable",
                self.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheNode for MemoryNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_reachable()?;
        let mut keyspace = self.keyspace.write().await;
        Ok(keyspace.live(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<()> {
        self.ensure_reachable()?;
        let entry = CacheEntry::new(value, ttl.map(|secs| secs.saturating_mul(1000)));
        self.keyspace.write().await.insert(key, entry);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.ensure_reachable()?;
        let mut keyspace = self.keyspace.write().await;
        let mut removed = 0;
        for key in keys {
            if keyspace.live(key).is_some() {
                keyspace.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn get_with_ttl(&self, key: &str) -> Result<(Option<Vec<u8>>, KeyTtl)> {
        self.ensure_reachable()?;
        let mut keyspace = self.keyspace.write().await;
        Ok(match keyspace.live(key) {
            Some(entry) => {
                let ttl = match entry.ttl_remaining() {
                    Some(secs) => KeyTtl::Expires(secs),
                    None => KeyTtl::Persistent,
                };
                (Some(entry.value.clone()), ttl)
            }
            None => (None, KeyTtl::Missing),
        })
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.ensure_reachable()?;
        let keyspace = self.keyspace.read().await;

        let mut examined = 0;
        let mut next = 0;
        let mut keys = Vec::new();
        for (seq, key) in keyspace.order.range(cursor..) {
            if examined == count.max(1) {
                next = *seq;
                break;
            }
            examined += 1;

            let expired = keyspace
                .entries
                .get(key)
                .map_or(true, |slot| slot.entry.is_expired());
            if !expired && glob_matches(pattern, key) {
                keys.push(key.clone());
            }
        }

        Ok((next, keys))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        self.ensure_reachable()?;
        let mut keyspace = self.keyspace.write().await;
        if keyspace.live(key).is_some() {
            return Ok(false);
        }
        keyspace.insert(key, CacheEntry::new(value.as_bytes().to_vec(), Some(ttl_ms)));
        Ok(true)
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool> {
        self.ensure_reachable()?;
        let mut keyspace = self.keyspace.write().await;
        let holds = keyspace
            .live(key)
            .is_some_and(|entry| entry.value == value.as_bytes());
        Ok(holds && keyspace.remove(key))
    }

    async fn expire_if_value(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        self.ensure_reachable()?;
        let mut keyspace = self.keyspace.write().await;
        match keyspace.live(key) {
            Some(entry) if entry.value == value.as_bytes() => {
                entry.expire_in(ttl_ms);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(node = %self.name, "Memory node closed");
        }
        Ok(())
    }
}

// == Expiry Sweeper ==
/// Spawns a background task that periodically purges expired entries.
///
/// Expired keys are already invisible to reads; the sweep only reclaims memory.
/// The returned handle should be aborted on shutdown.
pub fn spawn_sweeper(node: Arc<MemoryNode>, interval_secs: u64) -> JoinHandle<()> {
    let interval = Duration::from_secs(interval_secs);

    tokio::spawn(async move {
        info!(
            node = %node.name,
            "Starting expiry sweeper with interval of {} seconds", interval_secs
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = node.purge_expired().await;
            if removed > 0 {
                info!(node = %node.name, "Expiry sweep: removed {} expired entries", removed);
            } else {
                debug!(node = %node.name, "Expiry sweep: no expired entries found");
            }
        }
    })
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|k| k.to_string()).collect()
    }

    async fn scan_all(node: &MemoryNode, pattern: &str, count: usize) -> Vec<String> {
        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let (next, batch) = node.scan(cursor, pattern, count).await.unwrap();
            found.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        found
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let node = MemoryNode::new("memory://test");

        node.set("key1", b"value1".to_vec(), None).await.unwrap();
        let value = node.get("key1").await.unwrap();

        assert_eq!(value, Some(b"value1".to_vec()));
        assert_eq!(node.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let node = MemoryNode::new("memory://test");
        assert_eq!(node.get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let node = MemoryNode::new("memory://test");

        node.set("key1", b"value1".to_vec(), None).await.unwrap();
        node.set("key1", b"value2".to_vec(), None).await.unwrap();

        assert_eq!(node.get("key1").await.unwrap(), Some(b"value2".to_vec()));
        assert_eq!(node.len().await, 1);
    }

    #[tokio::test]
    async fn test_del_counts_existing_keys_only() {
        let node = MemoryNode::new("memory://test");
        node.set("a", b"1".to_vec(), None).await.unwrap();
        node.set("b", b"2".to_vec(), None).await.unwrap();

        let removed = node.del(&keys(&["a", "b", "missing"])).await.unwrap();

        assert_eq!(removed, 2);
        assert!(node.is_empty().await);
    }

    #[tokio::test]
    async fn test_get_with_ttl() {
        let node = MemoryNode::new("memory://test");
        node.set("ttl", b"v".to_vec(), Some(10)).await.unwrap();
        node.set("forever", b"v".to_vec(), None).await.unwrap();

        let (value, ttl) = node.get_with_ttl("ttl").await.unwrap();
        assert_eq!(value, Some(b"v".to_vec()));
        assert_eq!(ttl, KeyTtl::Expires(10));

        let (_, ttl) = node.get_with_ttl("forever").await.unwrap();
        assert_eq!(ttl, KeyTtl::Persistent);

        let (value, ttl) = node.get_with_ttl("missing").await.unwrap();
        assert_eq!(value, None);
        assert_eq!(ttl, KeyTtl::Missing);
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let node = MemoryNode::new("memory://test");
        node.set_if_absent("short", "token", 50).await.unwrap();

        assert!(node.get("short").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(node.get("short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_batches_cover_all_matches() {
        let node = MemoryNode::new("memory://test");
        for i in 0..25 {
            node.set(&format!("user:{}", i), b"u".to_vec(), None).await.unwrap();
            node.set(&format!("order:{}", i), b"o".to_vec(), None).await.unwrap();
        }

        let mut found = scan_all(&node, "user:*", 7).await;
        found.sort();

        assert_eq!(found.len(), 25);
        assert!(found.iter().all(|k| k.starts_with("user:")));
    }

    #[tokio::test]
    async fn test_scan_cursor_survives_deletes() {
        let node = MemoryNode::new("memory://test");
        for i in 0..10 {
            node.set(&format!("k{}", i), b"v".to_vec(), None).await.unwrap();
        }

        let mut cursor = 0;
        let mut seen = 0;
        loop {
            let (next, batch) = node.scan(cursor, "*", 3).await.unwrap();
            seen += batch.len();
            node.del(&batch).await.unwrap();
            if next == 0 {
                break;
            }
            cursor = next;
        }

        assert_eq!(seen, 10);
        assert!(node.is_empty().await);
    }

    #[tokio::test]
    async fn test_scan_empty_node_ends_immediately() {
        let node = MemoryNode::new("memory://test");
        let (next, batch) = node.scan(0, "*", 100).await.unwrap();
        assert_eq!(next, 0);
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_set_if_absent_and_compare_delete() {
        let node = MemoryNode::new("memory://test");

        assert!(node.set_if_absent("lock", "owner-a", 10_000).await.unwrap());
        assert!(!node.set_if_absent("lock", "owner-b", 10_000).await.unwrap());

        assert!(!node.delete_if_value("lock", "owner-b").await.unwrap());
        assert!(node.expire_if_value("lock", "owner-a", 20_000).await.unwrap());
        assert!(node.delete_if_value("lock", "owner-a").await.unwrap());
        assert!(node.get("lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_node_returns_connection_error() {
        let node = MemoryNode::new("memory://test");
        node.set_available(false);

        let result = node.get("key").await;
        assert!(matches!(result, Err(CacheError::Connection(_))));

        node.set_available(true);
        assert!(node.get("key").await.is_ok());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let node = MemoryNode::new("memory://test");
        node.close().await.unwrap();
        node.close().await.unwrap();

        let result = node.set("key", b"v".to_vec(), None).await;
        assert!(matches!(result, Err(CacheError::Connection(_))));
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_entries() {
        let node = Arc::new(MemoryNode::new("memory://sweep"));
        node.set_if_absent("expire_soon", "v", 100).await.unwrap();
        node.set("long_lived", b"v".to_vec(), Some(3600)).await.unwrap();

        let handle = spawn_sweeper(node.clone(), 1);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let keyspace = node.keyspace.read().await;
        assert!(!keyspace.entries.contains_key("expire_soon"));
        assert!(keyspace.entries.contains_key("long_lived"));
        drop(keyspace);

        handle.abort();
    }
}
