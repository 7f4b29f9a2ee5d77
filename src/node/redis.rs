//! Redis Node Module
//!
//! Cache node backed by a Redis server, either a standalone instance, one master
//! of a cluster, or the cluster as a whole through a redirect-aware router.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use redis::aio::{ConnectionLike, MultiplexedConnection};
use redis::cluster::ClusterClientBuilder;
use redis::cluster_async::ClusterConnection;
use redis::{ConnectionAddr, ConnectionInfo, IntoConnectionInfo};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{CacheNode, KeyTtl};
use crate::config::ClusterOptions;
use crate::error::{CacheError, Result};

/// Deletes the key only while it still holds the caller's token.
const DELETE_IF_VALUE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Re-arms the key's TTL only while it still holds the caller's token.
const EXPIRE_IF_VALUE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// How a batch of keys is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeleteMode {
    /// One multi-key `DEL`
    Batch,
    /// One `DEL` per key in a single pipeline; keys may span hash slots
    Pipelined,
    /// Concurrent single-key `DEL`s, each routed on its own
    PerKey,
}

// == Redis Node ==
/// A Redis endpoint speaking over a shared async connection.
///
/// `close` drops the node's connection handle; once every in-flight command
/// has finished with its clone, the underlying socket is torn down.
pub struct RedisNode<C> {
    name: String,
    conn: RwLock<Option<C>>,
    delete_mode: DeleteMode,
}

impl RedisNode<MultiplexedConnection> {
    /// Connects to a standalone Redis server.
    pub async fn connect(url: &str) -> Result<Self> {
        let info = parse_url(url)?;
        let conn = open_multiplexed(info).await?;
        info!(node = %url, "Connected to redis node");
        Ok(Self::new(url.to_string(), conn, DeleteMode::Batch))
    }

    /// Connects to every master of the cluster reachable through `seed`.
    ///
    /// Masters are read from `CLUSTER NODES`; failed masters are skipped.
    pub async fn connect_cluster_masters(seed: &str) -> Result<Vec<Self>> {
        let seed_info = parse_url(seed)?;
        let mut conn = open_multiplexed(seed_info.clone()).await?;
        let listing: String = redis::cmd("CLUSTER").arg("NODES").query_async(&mut conn).await?;

        let masters = parse_cluster_masters(&listing);
        if masters.is_empty() {
            return Err(CacheError::Configuration(format!(
                "no reachable cluster masters reported by {}",
                seed
            )));
        }

        let mut nodes = Vec::with_capacity(masters.len());
        for (host, port) in masters {
            let mut info = seed_info.clone();
            info.addr = ConnectionAddr::Tcp(host.clone(), port);
            let conn = open_multiplexed(info).await?;
            let name = format!("redis://{}:{}", host, port);
            debug!(node = %name, "Connected to cluster master");
            nodes.push(Self::new(name, conn, DeleteMode::Pipelined));
        }
        Ok(nodes)
    }
}

impl RedisNode<ClusterConnection> {
    /// Opens a cluster-aware router over the given seed nodes.
    pub async fn connect_router(seeds: &[String], options: &ClusterOptions) -> Result<Self> {
        let mut builder = ClusterClientBuilder::new(seeds.to_vec());
        if options.read_from_replicas {
            builder = builder.read_from_replicas();
        }
        if let Some(retries) = options.retries {
            builder = builder.retries(retries);
        }
        if let Some(timeout_ms) = options.connection_timeout_ms {
            builder = builder.connection_timeout(Duration::from_millis(timeout_ms));
        }

        let client = builder
            .build()
            .map_err(|e| CacheError::Configuration(format!("invalid cluster nodes: {}", e)))?;
        let conn = client.get_async_connection().await?;

        let name = format!("cluster({})", seeds.join(","));
        info!(router = %name, "Connected to redis cluster");
        Ok(Self::new(name, conn, DeleteMode::PerKey))
    }
}

impl<C> RedisNode<C> {
    fn new(name: String, conn: C, delete_mode: DeleteMode) -> Self {
        Self {
            name,
            conn: RwLock::new(Some(conn)),
            delete_mode,
        }
    }

    /// Drops the connection handle, returning whether it was still open.
    async fn shutdown(&self) -> bool {
        self.conn.write().await.take().is_some()
    }
}

impl<C: Clone> RedisNode<C> {
    async fn connection(&self) -> Result<C> {
        self.conn.read().await.clone().ok_or_else(|| {
            CacheError::Connection(format!("connection to {} is closed", self.name))
        })
    }
}

#[async_trait]
impl<C> CacheNode for RedisNode<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<()> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(secs) = ttl {
            cmd.arg("EX").arg(secs);
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection().await?;

        match self.delete_mode {
            DeleteMode::Batch => {
                let mut cmd = redis::cmd("DEL");
                for key in keys {
                    cmd.arg(key);
                }
                let removed: u64 = cmd.query_async(&mut conn).await?;
                Ok(removed)
            }
            DeleteMode::Pipelined => {
                let mut pipe = redis::pipe();
                for key in keys {
                    pipe.cmd("DEL").arg(key);
                }
                let counts: Vec<u64> = pipe.query_async(&mut conn).await?;
                Ok(counts.into_iter().sum())
            }
            DeleteMode::PerKey => {
                let counts = try_join_all(keys.iter().map(|key| {
                    let mut conn = conn.clone();
                    async move {
                        let removed: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
                        Ok::<u64, CacheError>(removed)
                    }
                }))
                .await?;
                Ok(counts.into_iter().sum())
            }
        }
    }

    async fn get_with_ttl(&self, key: &str) -> Result<(Option<Vec<u8>>, KeyTtl)> {
        let mut conn = self.connection().await?;
        let (value, ttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .cmd("GET")
            .arg(key)
            .cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok((value, KeyTtl::from_reply(ttl)))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.connection().await?;
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok((next, keys))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let removed: i64 = redis::cmd("EVAL")
            .arg(DELETE_IF_VALUE_SCRIPT)
            .arg(1)
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn expire_if_value(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        let mut conn = self.connection().await?;
        let extended: i64 = redis::cmd("EVAL")
            .arg(EXPIRE_IF_VALUE_SCRIPT)
            .arg(1)
            .arg(key)
            .arg(value)
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn close(&self) -> Result<()> {
        if self.shutdown().await {
            info!(node = %self.name, "Redis connection closed");
        }
        Ok(())
    }
}

fn parse_url(url: &str) -> Result<ConnectionInfo> {
    url.into_connection_info()
        .map_err(|e| CacheError::Configuration(format!("invalid redis url {}: {}", url, e)))
}

async fn open_multiplexed(info: ConnectionInfo) -> Result<MultiplexedConnection> {
    let client = redis::Client::open(info)
        .map_err(|e| CacheError::Configuration(format!("invalid redis connection: {}", e)))?;
    Ok(client.get_multiplexed_async_connection().await?)
}

// == Cluster Topology Parsing ==
/// Extracts `(host, port)` of every healthy master from a `CLUSTER NODES` reply.
///
/// Each line reads `<id> <host:port@cport> <flags> <master-id> ...`.
pub fn parse_cluster_masters(listing: &str) -> Vec<(String, u16)> {
    listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _id = fields.next()?;
            let address = fields.next()?;
            let flags: Vec<&str> = fields.next()?.split(',').collect();

            let healthy_master = flags.contains(&"master")
                && !flags.contains(&"fail")
                && !flags.contains(&"noaddr");
            if !healthy_master {
                return None;
            }

            let endpoint = address.split(['@', ',']).next()?;
            let (host, port) = endpoint.rsplit_once(':')?;
            if host.is_empty() {
                return None;
            }
            Some((host.to_string(), port.parse().ok()?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238317239 4 connected
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 127.0.0.1:30002@31002 master - 0 1426238316232 2 connected 5461-10922
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 127.0.0.1:30003@31003 master - 0 1426238318243 3 connected 10923-16383
6ec23923021cf3ffec47632106199cb7f496ce01 127.0.0.1:30005@31005 slave 67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 0 1426238316232 5 connected
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:30001@31001,node-1.internal myself,master - 0 0 1 connected 0-5460
a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2 127.0.0.1:30006@31006 master,fail - 1426238316232 1426238316232 6 disconnected
";

    #[test]
    fn test_parse_cluster_masters_keeps_healthy_masters() {
        let masters = parse_cluster_masters(LISTING);

        assert_eq!(
            masters,
            vec![
                ("127.0.0.1".to_string(), 30002),
                ("127.0.0.1".to_string(), 30003),
                ("127.0.0.1".to_string(), 30001),
            ]
        );
    }

    #[test]
    fn test_parse_cluster_masters_ignores_garbage() {
        assert!(parse_cluster_masters("").is_empty());
        assert!(parse_cluster_masters("not a cluster listing").is_empty());
        assert!(parse_cluster_masters("id :0@0 myself,master - 0 0 0 connected").is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_releases_connection_handle() {
        let conn = std::sync::Arc::new(());
        let node = RedisNode::new("redis://test".to_string(), conn.clone(), DeleteMode::Batch);
        assert_eq!(std::sync::Arc::strong_count(&conn), 2);
        assert!(node.connection().await.is_ok());

        assert!(node.shutdown().await);

        assert_eq!(std::sync::Arc::strong_count(&conn), 1);
        assert!(matches!(node.connection().await, Err(CacheError::Connection(_))));
        assert!(!node.shutdown().await);
    }

    #[test]
    fn test_invalid_url_is_configuration_error() {
        let result = parse_url("not-a-url");
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }
}
