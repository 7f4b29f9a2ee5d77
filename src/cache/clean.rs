//! Scan-and-Delete Module
//!
//! Deletes every key matching a set of glob patterns across all nodes of a
//! topology, one bounded batch at a time.
//!
//! Each node is drained with a pull cursor: a batch is fetched, deleted, and
//! only then is the next batch requested, so at most one delete is in flight per
//! (node, pattern) and memory stays bounded to one batch. Cluster nodes are
//! drained concurrently; patterns are processed strictly one after another.
//!
//! Keys written while a pattern is being drained may survive it. Scanning and
//! deleting is not atomic with concurrent writers.

use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use crate::connection::{NodeConnection, Topology};
use crate::error::{CacheError, Result};
use crate::node::CacheNode;

/// Deletes all keys matching `patterns` (already namespaced), in order.
///
/// The first failing pattern aborts the remaining ones. Returns the number of
/// keys removed.
pub async fn clean_patterns(
    connection: &dyn NodeConnection,
    patterns: &[String],
    batch_size: usize,
) -> Result<u64> {
    let mut total = 0;
    for pattern in patterns {
        total += clean_pattern(connection, pattern, batch_size).await?;
    }
    Ok(total)
}

/// Drains one pattern from every node of the topology.
pub async fn clean_pattern(
    connection: &dyn NodeConnection,
    pattern: &str,
    batch_size: usize,
) -> Result<u64> {
    let nodes = connection.nodes();

    let deleted: u64 = match (connection.topology(), nodes.as_slice()) {
        (Topology::Single, [node]) => drain_node(node, pattern, batch_size).await?,
        _ => try_join_all(
            nodes
                .iter()
                .map(|node| drain_node(node, pattern, batch_size)),
        )
        .await?
        .into_iter()
        .sum(),
    };

    info!(pattern, nodes = nodes.len(), deleted, "Pattern cleaned");
    Ok(deleted)
}

/// Scans `node` for `pattern`, deleting each batch before fetching the next.
async fn drain_node(node: &Arc<dyn CacheNode>, pattern: &str, batch_size: usize) -> Result<u64> {
    let annotate = |err: CacheError| {
        warn!(node = %node.name(), pattern, error = %err, "Scan-delete aborted");
        CacheError::Deletion {
            pattern: pattern.to_string(),
            node: node.name().to_string(),
            source: Box::new(err),
        }
    };

    let mut cursor = 0;
    let mut deleted = 0;
    loop {
        let (next, keys) = node
            .scan(cursor, pattern, batch_size)
            .await
            .map_err(annotate)?;

        if !keys.is_empty() {
            deleted += node.del(&keys).await.map_err(annotate)?;
            debug!(node = %node.name(), pattern, batch = keys.len(), "Deleted batch");
        }

        if next == 0 {
            return Ok(deleted);
        }
        cursor = next;
    }
}
