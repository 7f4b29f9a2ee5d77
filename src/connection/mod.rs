//! Connection Module
//!
//! Uniform access to a single node or a sharded cluster of nodes. Higher layers
//! depend only on [`NodeConnection`], never on which topology is active.

mod cluster;
mod open;
mod single;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::node::CacheNode;

pub use cluster::{key_slot, Cluster, SLOT_COUNT};
pub use open::{open, open_node, BackgroundTasks, Opened};
pub use single::SingleNode;

// == Topology ==
/// Shape of the backing store, fixed for the lifetime of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Single,
    Cluster,
}

// == Node Connection ==
/// A topology of one or more cache nodes.
#[async_trait]
pub trait NodeConnection: Send + Sync {
    fn topology(&self) -> Topology;

    /// Every node backing this connection, in a stable order. Never empty.
    fn nodes(&self) -> Vec<Arc<dyn CacheNode>>;

    /// The node responsible for `key`.
    fn route(&self, key: &str) -> Arc<dyn CacheNode>;

    /// Groups keys by owning node, preserving key order within each group.
    fn partition(&self, keys: &[String]) -> Vec<(Arc<dyn CacheNode>, Vec<String>)> {
        let mut groups: Vec<(Arc<dyn CacheNode>, Vec<String>)> = Vec::new();
        for key in keys {
            let node = self.route(key);
            match groups.iter_mut().find(|(owner, _)| Arc::ptr_eq(owner, &node)) {
                Some((_, group)) => group.push(key.clone()),
                None => groups.push((node, vec![key.clone()])),
            }
        }
        groups
    }

    /// Closes every underlying node connection.
    async fn close(&self) -> Result<()>;
}
