use std::sync::Arc;

use async_trait::async_trait;

use super::{NodeConnection, Topology};
use crate::error::Result;
use crate::node::CacheNode;

/// A connection to exactly one node.
#[derive(Clone)]
pub struct SingleNode {
    node: Arc<dyn CacheNode>,
}

impl SingleNode {
    pub fn new(node: Arc<dyn CacheNode>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl NodeConnection for SingleNode {
    fn topology(&self) -> Topology {
        Topology::Single
    }

    fn nodes(&self) -> Vec<Arc<dyn CacheNode>> {
        vec![self.node.clone()]
    }

    fn route(&self, _key: &str) -> Arc<dyn CacheNode> {
        self.node.clone()
    }

    async fn close(&self) -> Result<()> {
        self.node.close().await
    }
}
