//! Cache Client Module
//!
//! The facade applications talk to: namespaced reads and writes, explicit and
//! pattern deletes, and distributed locks over whichever topology was opened.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::clean::clean_patterns;
use crate::cache::Namespace;
use crate::config::{Config, DEFAULT_SCAN_BATCH_SIZE};
use crate::connection::{self, BackgroundTasks, NodeConnection};
use crate::error::{CacheError, Result};
use crate::lock::{LockHandle, LockSettings, Redlock};
use crate::node::KeyTtl;

// == TTL Value ==
/// A value read together with its remaining lifetime.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TtlValue<T> {
    pub value: Option<T>,
    pub ttl: KeyTtl,
}

// == Cache Options ==
/// Client-side settings for a cache built from existing connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Prefix applied to every key, pattern and lock key
    pub prefix: String,
    /// Default TTL in seconds for writes without one
    pub ttl: Option<u64>,
    /// `COUNT` hint per scan batch
    pub scan_batch_size: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            ttl: None,
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
        }
    }
}

impl From<&Config> for CacheOptions {
    fn from(config: &Config) -> Self {
        Self {
            prefix: config.prefix.clone(),
            ttl: config.ttl,
            scan_batch_size: config.scan_batch_size,
        }
    }
}

// == Cache ==
/// Namespaced cache client over a single node or a cluster.
pub struct Cache {
    namespace: Namespace,
    default_ttl: Option<u64>,
    scan_batch_size: usize,
    connection: Arc<dyn NodeConnection>,
    redlock: Redlock,
    /// Tasks owned by the opened nodes, aborted on close or drop
    background: Mutex<BackgroundTasks>,
    closed: AtomicBool,
}

impl Cache {
    // == Constructors ==
    /// Opens every connection described by `config`.
    ///
    /// Configuration problems are reported before any node is contacted.
    pub async fn connect(config: &Config) -> Result<Self> {
        let opened = connection::open(config).await?;
        let redlock = Redlock::new(opened.lock_clients, LockSettings::from(&config.redlock))?;

        let mut cache = Self::assemble(CacheOptions::from(config), opened.data, redlock)?;
        cache.background = Mutex::new(opened.sweepers);
        Ok(cache)
    }

    /// Builds a client over connections opened elsewhere.
    ///
    /// # Arguments
    /// * `options` - Prefix, default TTL and scan batch size
    /// * `connection` - Topology holding the cached data
    /// * `lock_clients` - Independent lock nodes; empty means lock on `connection`
    /// * `settings` - Lock retry and drift parameters
    pub fn from_parts(
        options: CacheOptions,
        connection: Arc<dyn NodeConnection>,
        lock_clients: Vec<Arc<dyn NodeConnection>>,
        settings: LockSettings,
    ) -> Result<Self> {
        let lock_clients = if lock_clients.is_empty() {
            vec![connection.clone()]
        } else {
            lock_clients
        };
        let redlock = Redlock::new(lock_clients, settings)?;
        Self::assemble(options, connection, redlock)
    }

    fn assemble(
        options: CacheOptions,
        connection: Arc<dyn NodeConnection>,
        redlock: Redlock,
    ) -> Result<Self> {
        if options.scan_batch_size == 0 {
            return Err(CacheError::Configuration(
                "scan_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            namespace: Namespace::new(options.prefix),
            default_ttl: options.ttl,
            scan_batch_size: options.scan_batch_size,
            connection,
            redlock,
            background: Mutex::new(BackgroundTasks::default()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn connection(&self) -> &Arc<dyn NodeConnection> {
        &self.connection
    }

    // == Get ==
    /// Reads and decodes `key`.
    ///
    /// A missing key and a stored value that does not decode as `T` both
    /// yield `None`; the latter is logged.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let key = self.namespace.key(key);
        let raw = self.connection.route(&key).get(&key).await?;
        Ok(raw.and_then(|bytes| decode(&key, &bytes)))
    }

    // == Set ==
    /// Encodes and stores `value` under `key`.
    ///
    /// # Arguments
    /// * `key` - Logical key, namespaced before sending
    /// * `value` - Any serializable value, stored as JSON
    /// * `ttl` - TTL in seconds; falls back to the configured default, and
    ///   `0` or no TTL at all stores without expiry
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<u64>,
    ) -> Result<()> {
        let payload = serde_json::to_vec(value)?;
        let ttl = ttl.or(self.default_ttl).filter(|secs| *secs > 0);
        let key = self.namespace.key(key);

        self.connection.route(&key).set(&key, payload, ttl).await?;
        debug!(key = %key, ttl = ?ttl, "Value stored");
        Ok(())
    }

    // == Delete ==
    /// Deletes one or more keys, returning how many existed.
    ///
    /// Keys are grouped by owning node and each group is removed with one
    /// batched delete. Missing keys and an empty input are not errors.
    pub async fn del<I, K>(&self, keys: I) -> Result<u64>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys = self.namespace.keys(keys);
        if keys.is_empty() {
            return Ok(0);
        }

        let groups = self.connection.partition(&keys);
        let removed = try_join_all(groups.iter().map(|(node, group)| node.del(group)))
            .await
            .map_err(|err| CacheError::Delete {
                keys: keys.clone(),
                source: Box::new(err),
            })?;

        let removed: u64 = removed.into_iter().sum();
        debug!(requested = keys.len(), removed, "Keys deleted");
        Ok(removed)
    }

    // == Clean ==
    /// Deletes every key matching any of the glob `patterns`, across all nodes.
    ///
    /// Patterns are handled one after another and the first failure aborts the
    /// rest. Keys written while a pattern is being processed may survive it.
    pub async fn clean<I, P>(&self, patterns: I) -> Result<u64>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| self.namespace.pattern(p.as_ref()))
            .collect();
        clean_patterns(self.connection.as_ref(), &patterns, self.scan_batch_size).await
    }

    /// Deletes every key under this client's prefix.
    pub async fn clean_all(&self) -> Result<u64> {
        self.clean(["*"]).await
    }

    // == Get With TTL ==
    /// Reads `key` and its remaining TTL in one round trip.
    pub async fn get_with_ttl<T: DeserializeOwned>(&self, key: &str) -> Result<TtlValue<T>> {
        let key = self.namespace.key(key);
        let (raw, ttl) = self.connection.route(&key).get_with_ttl(&key).await?;
        Ok(TtlValue {
            value: raw.and_then(|bytes| decode(&key, &bytes)),
            ttl,
        })
    }

    // == Locks ==
    /// Acquires the lock guarding `key`, retrying while it is held elsewhere.
    ///
    /// `ttl` defaults to the configured lock TTL.
    pub async fn lock(&self, key: &str, ttl: Option<Duration>) -> Result<LockHandle> {
        self.redlock.lock(&self.namespace.lock_key(key), ttl).await
    }

    /// Acquires the lock guarding `key` with a single attempt.
    pub async fn try_lock(&self, key: &str, ttl: Option<Duration>) -> Result<LockHandle> {
        self.redlock.try_lock(&self.namespace.lock_key(key), ttl).await
    }

    // == Close ==
    /// Closes the data and lock connections and stops background tasks.
    ///
    /// Calling it more than once is harmless. Every connection is closed even
    /// when an earlier one fails; the first failure is returned.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Cache already closed");
            return Ok(());
        }

        let mut outcome = self.connection.close().await;
        for client in self.redlock.clients() {
            if Arc::ptr_eq(client, &self.connection) {
                continue;
            }
            let closed = client.close().await;
            if outcome.is_ok() {
                outcome = closed;
            }
        }

        let stopped = self.background.lock().await.abort_all();
        debug!(stopped, "Background tasks stopped");

        match &outcome {
            Ok(()) => info!(prefix = %self.namespace.prefix(), "Cache closed"),
            Err(err) => warn!(error = %err, "Cache closed with errors"),
        }
        outcome
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Lenient read-path decoding: bad payloads read as a miss.
fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, error = %err, "Discarding undecodable cached value");
            None
        }
    }
}
