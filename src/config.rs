//! Configuration Module
//!
//! Handles loading and validating client configuration from environment variables
//! or any serde source.

use std::env;

use serde::Deserialize;

use crate::error::{CacheError, Result};

/// Default number of keys requested per scan batch
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 100;

/// Default lock time-to-live in milliseconds
pub const DEFAULT_LOCK_TTL_MS: u64 = 15_000;

/// Client configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Namespace prepended to every key
    pub prefix: String,
    /// Default TTL in seconds for writes without explicit TTL (None = no expiry)
    pub ttl: Option<u64>,
    /// Single node URL (`memory://name` or `redis://host:port`)
    pub url: String,
    /// Cluster topology, takes precedence over `url` when present
    pub cluster: Option<ClusterConfig>,
    /// Lock coordinator tuning
    pub redlock: RedlockConfig,
    /// Keys requested per scan batch during pattern deletes
    pub scan_batch_size: usize,
    /// Emit a debug event for every node command
    pub monitor: bool,
    /// Expiry sweep interval in seconds for in-memory nodes (0 disables)
    pub sweep_interval: u64,
}

/// Cluster node list and connection options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Seed node URLs
    pub nodes: Vec<String>,
    pub options: ClusterOptions,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    /// Route reads to replicas when available
    pub read_from_replicas: bool,
    /// Redirect/retry budget of the cluster router
    pub retries: Option<u32>,
    /// Per-connection timeout in milliseconds
    pub connection_timeout_ms: Option<u64>,
}

/// Lock coordinator parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedlockConfig {
    /// Independent lock node URLs (empty = use the data connection)
    pub clients: Vec<String>,
    /// Fraction of the TTL reserved for clock drift
    pub drift_factor: f64,
    /// Retries after the first attempt for blocking `lock`
    pub retry_count: u32,
    /// Base delay between attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Maximum random delay added to each retry in milliseconds
    pub retry_jitter_ms: u64,
    /// Lock TTL in milliseconds when the caller gives none
    pub lock_ttl_ms: u64,
}

impl Default for RedlockConfig {
    fn default() -> Self {
        Self {
            clients: Vec::new(),
            drift_factor: 0.01,
            retry_count: 10,
            retry_delay_ms: 200,
            retry_jitter_ms: 200,
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
        }
    }
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_PREFIX` - Key namespace (default: empty)
    /// - `CACHE_TTL` - Default TTL in seconds, 0 for none (default: none)
    /// - `CACHE_URL` - Single node URL (default: `memory://default`)
    /// - `CACHE_CLUSTER` - `true` to enable cluster mode
    /// - `CACHE_CLUSTER_NODES` - Comma separated node URLs
    /// - `CACHE_CLUSTER_READ_FROM_REPLICAS`, `CACHE_CLUSTER_RETRIES`,
    ///   `CACHE_CLUSTER_CONNECTION_TIMEOUT_MS` - Cluster options
    /// - `REDLOCK_CLIENTS` - Comma separated lock node URLs
    /// - `REDLOCK_DRIFT_FACTOR`, `REDLOCK_RETRY_COUNT`, `REDLOCK_RETRY_DELAY_MS`,
    ///   `REDLOCK_RETRY_JITTER_MS`, `REDLOCK_TTL_MS` - Lock tuning
    /// - `CACHE_SCAN_BATCH` - Keys per scan batch (default: 100)
    /// - `CACHE_MONITOR` - `true` to log every node command
    /// - `CACHE_SWEEP_INTERVAL` - Memory node sweep interval (default: 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let lock_defaults = RedlockConfig::default();

        let cluster = if env_parse("CACHE_CLUSTER").unwrap_or(false) {
            Some(ClusterConfig {
                nodes: env_list("CACHE_CLUSTER_NODES"),
                options: ClusterOptions {
                    read_from_replicas: env_parse("CACHE_CLUSTER_READ_FROM_REPLICAS")
                        .unwrap_or(false),
                    retries: env_parse("CACHE_CLUSTER_RETRIES"),
                    connection_timeout_ms: env_parse("CACHE_CLUSTER_CONNECTION_TIMEOUT_MS"),
                },
            })
        } else {
            None
        };

        Self {
            prefix: env::var("CACHE_PREFIX").unwrap_or(defaults.prefix),
            ttl: env_parse::<u64>("CACHE_TTL").filter(|ttl| *ttl > 0),
            url: env::var("CACHE_URL").unwrap_or(defaults.url),
            cluster,
            redlock: RedlockConfig {
                clients: env_list("REDLOCK_CLIENTS"),
                drift_factor: env_parse("REDLOCK_DRIFT_FACTOR")
                    .unwrap_or(lock_defaults.drift_factor),
                retry_count: env_parse("REDLOCK_RETRY_COUNT")
                    .unwrap_or(lock_defaults.retry_count),
                retry_delay_ms: env_parse("REDLOCK_RETRY_DELAY_MS")
                    .unwrap_or(lock_defaults.retry_delay_ms),
                retry_jitter_ms: env_parse("REDLOCK_RETRY_JITTER_MS")
                    .unwrap_or(lock_defaults.retry_jitter_ms),
                lock_ttl_ms: env_parse("REDLOCK_TTL_MS").unwrap_or(lock_defaults.lock_ttl_ms),
            },
            scan_batch_size: env_parse("CACHE_SCAN_BATCH").unwrap_or(defaults.scan_batch_size),
            monitor: env_parse("CACHE_MONITOR").unwrap_or(false),
            sweep_interval: env_parse("CACHE_SWEEP_INTERVAL").unwrap_or(defaults.sweep_interval),
        }
    }

    // == Validate ==
    /// Rejects configurations that cannot produce a working client.
    ///
    /// Runs before any connection is opened.
    pub fn validate(&self) -> Result<()> {
        if let Some(cluster) = &self.cluster {
            if cluster.nodes.is_empty() {
                return Err(CacheError::Configuration(
                    "cluster mode requires at least one entry in cluster.nodes".to_string(),
                ));
            }
        } else if self.url.is_empty() {
            return Err(CacheError::Configuration(
                "a node url is required outside cluster mode".to_string(),
            ));
        }

        if self.scan_batch_size == 0 {
            return Err(CacheError::Configuration(
                "scan_batch_size must be greater than zero".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.redlock.drift_factor) {
            return Err(CacheError::Configuration(format!(
                "redlock.drift_factor must be in [0, 1), got {}",
                self.redlock.drift_factor
            )));
        }

        if self.redlock.lock_ttl_ms == 0 {
            return Err(CacheError::Configuration(
                "redlock.lock_ttl_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            ttl: None,
            url: "memory://default".to_string(),
            cluster: None,
            redlock: RedlockConfig::default(),
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
            monitor: false,
            sweep_interval: 1,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.prefix, "");
        assert_eq!(config.ttl, None);
        assert_eq!(config.url, "memory://default");
        assert!(config.cluster.is_none());
        assert_eq!(config.scan_batch_size, 100);
        assert_eq!(config.redlock.retry_count, 10);
        assert_eq!(config.redlock.lock_ttl_ms, 15_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        for name in [
            "CACHE_PREFIX",
            "CACHE_TTL",
            "CACHE_URL",
            "CACHE_CLUSTER",
            "CACHE_SCAN_BATCH",
            "REDLOCK_CLIENTS",
            "REDLOCK_RETRY_COUNT",
        ] {
            env::remove_var(name);
        }

        let config = Config::from_env();
        assert_eq!(config.prefix, "");
        assert_eq!(config.ttl, None);
        assert_eq!(config.url, "memory://default");
        assert!(config.cluster.is_none());
        assert!(config.redlock.clients.is_empty());
        assert_eq!(config.redlock.retry_count, 10);
        assert_eq!(config.scan_batch_size, 100);
    }

    #[test]
    fn test_cluster_without_nodes_is_rejected() {
        let config = Config {
            cluster: Some(ClusterConfig::default()),
            ..Config::default()
        };

        let result = config.validate();
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let config = Config {
            scan_batch_size: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_drift_factor_out_of_range_is_rejected() {
        let mut config = Config::default();
        config.redlock.drift_factor = 1.5;
        assert!(matches!(config.validate(), Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_config_deserialize_partial() {
        let json = r#"{
            "prefix": "app:",
            "ttl": 60,
            "cluster": { "nodes": ["memory://a", "memory://b"] },
            "redlock": { "retry_count": 3 }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.prefix, "app:");
        assert_eq!(config.ttl, Some(60));
        assert_eq!(config.cluster.as_ref().unwrap().nodes.len(), 2);
        assert!(!config.cluster.as_ref().unwrap().options.read_from_replicas);
        assert_eq!(config.redlock.retry_count, 3);
        assert_eq!(config.redlock.retry_delay_ms, 200);
        assert_eq!(config.scan_batch_size, 100);
        assert!(config.validate().is_ok());
    }
}
