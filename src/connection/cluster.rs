//! Sharded cluster topology.
//!
//! Keys map to one of 16384 hash slots (CRC16 of the key, or of its `{hash tag}`),
//! and each node owns a contiguous slot range. A cluster may instead delegate
//! point routing to a redirect-aware router connection while still exposing its
//! masters for fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{NodeConnection, Topology};
use crate::error::{CacheError, Result};
use crate::node::CacheNode;

/// Number of hash slots in a cluster keyspace.
pub const SLOT_COUNT: u16 = 16384;

// == Cluster ==
pub struct Cluster {
    nodes: Vec<Arc<dyn CacheNode>>,
    router: Option<Arc<dyn CacheNode>>,
}

impl Cluster {
    /// Cluster that routes keys to `nodes` by hash slot.
    pub fn sharded(nodes: Vec<Arc<dyn CacheNode>>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(CacheError::Configuration(
                "a cluster needs at least one node".to_string(),
            ));
        }
        Ok(Self { nodes, router: None })
    }

    /// Cluster whose point operations go through `router`, with `nodes`
    /// (the masters) used for fan-out.
    pub fn routed(router: Arc<dyn CacheNode>, nodes: Vec<Arc<dyn CacheNode>>) -> Result<Self> {
        let mut cluster = Self::sharded(nodes)?;
        cluster.router = Some(router);
        Ok(cluster)
    }

    fn owner(&self, slot: u16) -> usize {
        slot as usize * self.nodes.len() / SLOT_COUNT as usize
    }
}

#[async_trait]
impl NodeConnection for Cluster {
    fn topology(&self) -> Topology {
        Topology::Cluster
    }

    fn nodes(&self) -> Vec<Arc<dyn CacheNode>> {
        self.nodes.clone()
    }

    fn route(&self, key: &str) -> Arc<dyn CacheNode> {
        match &self.router {
            Some(router) => router.clone(),
            None => self.nodes[self.owner(key_slot(key))].clone(),
        }
    }

    async fn close(&self) -> Result<()> {
        let mut first_error = None;
        for node in self.router.iter().chain(self.nodes.iter()) {
            if let Err(err) = node.close().await {
                warn!(node = %node.name(), error = %err, "Failed to close cluster node");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

// == Hash Slots ==
/// Hash slot of `key`, honouring `{hash tags}` like Redis Cluster.
pub fn key_slot(key: &str) -> u16 {
    let bytes = key.as_bytes();
    let hashed = match bytes.iter().position(|&b| b == b'{') {
        Some(open) => match bytes[open + 1..].iter().position(|&b| b == b'}') {
            Some(len) if len > 0 => &bytes[open + 1..open + 1 + len],
            _ => bytes,
        },
        None => bytes,
    };
    crc16(hashed) % SLOT_COUNT
}

/// CRC16/XMODEM (polynomial 0x1021).
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
