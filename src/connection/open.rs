//! Builds node connections from configuration.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{Cluster, NodeConnection, SingleNode};
use crate::config::{ClusterConfig, Config};
use crate::error::{CacheError, Result};
use crate::node::{spawn_sweeper, CacheNode, MemoryNode, Monitored, RedisNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Memory,
    Redis,
}

fn scheme_of(url: &str) -> Result<Scheme> {
    if url.starts_with("memory://") {
        Ok(Scheme::Memory)
    } else if ["redis://", "rediss://", "redis+unix://", "unix://"]
        .iter()
        .any(|prefix| url.starts_with(prefix))
    {
        Ok(Scheme::Redis)
    } else {
        Err(CacheError::Configuration(format!(
            "unsupported node url '{}', expected memory:// or redis://",
            url
        )))
    }
}

// == Background Tasks ==
/// Tasks spawned on behalf of opened nodes. Dropping the set aborts them, so
/// a failed open or a client dropped without `close` leaves nothing running.
#[derive(Debug, Default)]
pub struct BackgroundTasks(Vec<JoinHandle<()>>);

impl BackgroundTasks {
    pub fn push(&mut self, task: JoinHandle<()>) {
        self.0.push(task);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Aborts every task, returning how many were still held.
    pub fn abort_all(&mut self) -> usize {
        let count = self.0.len();
        for task in self.0.drain(..) {
            task.abort();
        }
        count
    }
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        let aborted = self.abort_all();
        if aborted > 0 {
            debug!(aborted, "Background tasks aborted on drop");
        }
    }
}

/// Connections opened for a client, plus the background tasks they own.
pub struct Opened {
    pub data: Arc<dyn NodeConnection>,
    pub lock_clients: Vec<Arc<dyn NodeConnection>>,
    pub sweepers: BackgroundTasks,
}

/// Opens the data connection and lock clients described by `config`.
///
/// Every url is checked before the first connection attempt.
pub async fn open(config: &Config) -> Result<Opened> {
    config.validate()?;
    match &config.cluster {
        Some(cluster) => check_cluster_schemes(cluster)?,
        None => {
            scheme_of(&config.url)?;
        }
    }
    for url in &config.redlock.clients {
        scheme_of(url)?;
    }

    // Dropped on any early return below, aborting what was already spawned
    let mut sweepers = BackgroundTasks::default();
    let data: Arc<dyn NodeConnection> = match &config.cluster {
        Some(cluster) => Arc::new(open_cluster(cluster, config, &mut sweepers).await?)
            as Arc<dyn NodeConnection>,
        None => Arc::new(SingleNode::new(
            open_node(&config.url, config, &mut sweepers).await?,
        )),
    };

    let lock_clients = if config.redlock.clients.is_empty() {
        vec![data.clone()]
    } else {
        let mut clients: Vec<Arc<dyn NodeConnection>> = Vec::new();
        for url in &config.redlock.clients {
            let node = open_node(url, config, &mut sweepers).await?;
            clients.push(Arc::new(SingleNode::new(node)));
        }
        clients
    };

    info!(
        topology = ?data.topology(),
        nodes = data.nodes().len(),
        lock_clients = lock_clients.len(),
        "Cache connections opened"
    );

    Ok(Opened {
        data,
        lock_clients,
        sweepers,
    })
}

/// Opens one standalone node, wrapping it in a monitor when enabled.
pub async fn open_node(
    url: &str,
    config: &Config,
    sweepers: &mut BackgroundTasks,
) -> Result<Arc<dyn CacheNode>> {
    let node: Arc<dyn CacheNode> = match scheme_of(url)? {
        Scheme::Memory => {
            let node = Arc::new(MemoryNode::new(url));
            if config.sweep_interval > 0 {
                sweepers.push(spawn_sweeper(node.clone(), config.sweep_interval));
            }
            node as Arc<dyn CacheNode>
        }
        Scheme::Redis => Arc::new(RedisNode::connect(url).await?),
    };
    Ok(monitored(node, config.monitor))
}

async fn open_cluster(
    cluster: &ClusterConfig,
    config: &Config,
    sweepers: &mut BackgroundTasks,
) -> Result<Cluster> {
    match scheme_of(&cluster.nodes[0])? {
        Scheme::Memory => {
            let mut nodes = Vec::with_capacity(cluster.nodes.len());
            for url in &cluster.nodes {
                nodes.push(open_node(url, config, sweepers).await?);
            }
            Cluster::sharded(nodes)
        }
        Scheme::Redis => {
            let router = RedisNode::connect_router(&cluster.nodes, &cluster.options).await?;
            let masters = RedisNode::connect_cluster_masters(&cluster.nodes[0])
                .await?
                .into_iter()
                .map(|node| monitored(Arc::new(node), config.monitor))
                .collect();
            Cluster::routed(monitored(Arc::new(router), config.monitor), masters)
        }
    }
}

fn check_cluster_schemes(cluster: &ClusterConfig) -> Result<()> {
    let mut schemes = Vec::with_capacity(cluster.nodes.len());
    for url in &cluster.nodes {
        schemes.push(scheme_of(url)?);
    }
    if schemes.windows(2).any(|pair| pair[0] != pair[1]) {
        return Err(CacheError::Configuration(
            "cluster.nodes mixes memory:// and redis:// urls".to_string(),
        ));
    }
    Ok(())
}

fn monitored(node: Arc<dyn CacheNode>, monitor: bool) -> Arc<dyn CacheNode> {
    if monitor {
        Monitored::wrap(node)
    } else {
        node
    }
}
