//! Error types for the cache client
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache client.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Invalid or incomplete construction parameters
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Node unreachable, timed out or already closed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Node answered with an error reply
    #[error("Node error: {0}")]
    Node(String),

    /// Value could not be serialized for writing
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Batched delete of explicit keys failed
    #[error("Failed to delete keys {keys:?}: {source}")]
    Delete {
        keys: Vec<String>,
        #[source]
        source: Box<CacheError>,
    },

    /// Scan-and-delete of a pattern failed on a node
    #[error("Failed to clean pattern '{pattern}' on node {node}: {source}")]
    Deletion {
        pattern: String,
        node: String,
        #[source]
        source: Box<CacheError>,
    },

    /// Quorum not reached within the retry budget
    #[error("Unable to acquire lock on '{resource}' after {attempts} attempt(s)")]
    LockAcquisition { resource: String, attempts: u32 },

    /// Some lock nodes could not be reached while releasing
    #[error("Lock release failed: {0}")]
    LockRelease(String),

    /// Operation on a lock handle that is no longer held
    #[error("Lock already released or expired: {0}")]
    LockReleased(String),
}

// == Redis Error Mapping ==
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
        {
            CacheError::Connection(err.to_string())
        } else {
            CacheError::Node(err.to_string())
        }
    }
}

impl CacheError {
    /// Returns true for errors caused by an unreachable node.
    pub fn is_connection(&self) -> bool {
        match self {
            CacheError::Connection(_) => true,
            CacheError::Delete { source, .. } | CacheError::Deletion { source, .. } => {
                source.is_connection()
            }
            _ => false,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache client.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deletion_error_names_pattern_and_node() {
        let err = CacheError::Deletion {
            pattern: "app:user:*".to_string(),
            node: "memory://b".to_string(),
            source: Box::new(CacheError::Connection("node unavailable".to_string())),
        };

        let message = err.to_string();
        assert!(message.contains("app:user:*"));
        assert!(message.contains("memory://b"));
        assert!(err.is_connection());
    }

    #[test]
    fn test_delete_error_lists_keys() {
        let err = CacheError::Delete {
            keys: vec!["app:a".to_string(), "app:b".to_string()],
            source: Box::new(CacheError::Node("WRONGTYPE".to_string())),
        };

        assert!(err.to_string().contains("app:a"));
        assert!(!err.is_connection());
    }

    #[test]
    fn test_serialization_error_from_serde() {
        let parse = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: CacheError = parse.into();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
