use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{duration_ms, LockHandle};
use crate::config::RedlockConfig;
use crate::connection::NodeConnection;
use crate::error::{CacheError, Result};

// == Lock Settings ==
/// Timing parameters of the lock coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct LockSettings {
    /// Fraction of the TTL reserved for clock drift between nodes
    pub drift_factor: f64,
    /// Retries after the first attempt for blocking acquisition
    pub retry_count: u32,
    /// Base pause between attempts
    pub retry_delay: Duration,
    /// Upper bound of the random pause added to `retry_delay`
    pub retry_jitter: Duration,
    /// TTL used when the caller gives none
    pub default_ttl: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self::from(&RedlockConfig::default())
    }
}

impl From<&RedlockConfig> for LockSettings {
    fn from(config: &RedlockConfig) -> Self {
        Self {
            drift_factor: config.drift_factor,
            retry_count: config.retry_count,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            retry_jitter: Duration::from_millis(config.retry_jitter_ms),
            default_ttl: Duration::from_millis(config.lock_ttl_ms),
        }
    }
}

// == Redlock ==
/// Lock coordinator over a fixed set of lock clients.
#[derive(Clone)]
pub struct Redlock {
    clients: Arc<[Arc<dyn NodeConnection>]>,
    settings: LockSettings,
}

impl Redlock {
    pub fn new(clients: Vec<Arc<dyn NodeConnection>>, settings: LockSettings) -> Result<Self> {
        if clients.is_empty() {
            return Err(CacheError::Configuration(
                "the lock coordinator needs at least one client".to_string(),
            ));
        }
        Ok(Self {
            clients: clients.into(),
            settings,
        })
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    pub(crate) fn clients(&self) -> &[Arc<dyn NodeConnection>] {
        &self.clients
    }

    /// Votes needed to hold a lock: a strict majority of clients.
    pub fn quorum(&self) -> usize {
        self.clients.len() / 2 + 1
    }

    /// Acquires `resource`, retrying within the configured budget.
    pub async fn lock(&self, resource: &str, ttl: Option<Duration>) -> Result<LockHandle> {
        self.acquire(resource, ttl, self.settings.retry_count).await
    }

    /// Acquires `resource` with a single attempt.
    pub async fn try_lock(&self, resource: &str, ttl: Option<Duration>) -> Result<LockHandle> {
        self.acquire(resource, ttl, 0).await
    }

    async fn acquire(
        &self,
        resource: &str,
        ttl: Option<Duration>,
        retries: u32,
    ) -> Result<LockHandle> {
        let ttl_ms = duration_ms(ttl.unwrap_or(self.settings.default_ttl));
        let token = Uuid::new_v4().simple().to_string();
        let attempts = retries + 1;

        for attempt in 1..=attempts {
            if let Some(validity) = self.attempt(resource, &token, ttl_ms).await {
                info!(resource, attempt, validity_ms = validity, "Lock acquired");
                return Ok(LockHandle::new(
                    self.clone(),
                    resource.to_string(),
                    token,
                    validity,
                ));
            }

            if attempt < attempts {
                let pause = self.retry_pause();
                debug!(resource, attempt, pause_ms = pause.as_millis() as u64, "Lock busy, retrying");
                tokio::time::sleep(pause).await;
            }
        }

        warn!(resource, attempts, "Lock acquisition failed");
        Err(CacheError::LockAcquisition {
            resource: resource.to_string(),
            attempts,
        })
    }

    /// One round of `SET NX PX` on every client. Returns the remaining
    /// validity in milliseconds when a quorum was reached in time; otherwise
    /// undoes any partial acquisition.
    async fn attempt(&self, resource: &str, token: &str, ttl_ms: u64) -> Option<u64> {
        let started = Instant::now();
        let votes = join_all(self.clients.iter().map(|client| {
            let node = client.route(resource);
            async move { node.set_if_absent(resource, token, ttl_ms).await }
        }))
        .await;

        let granted = self.count_votes(resource, votes);
        let validity = self.validity(ttl_ms, started);
        if granted >= self.quorum() && validity > 0 {
            return Some(validity);
        }

        debug!(resource, granted, quorum = self.quorum(), "Quorum not reached");
        self.unlock_all(resource, token).await;
        None
    }

    /// Compare-and-delete `token` on every client.
    pub(crate) async fn unlock_all(&self, resource: &str, token: &str) -> Vec<Result<bool>> {
        join_all(self.clients.iter().map(|client| {
            let node = client.route(resource);
            async move { node.delete_if_value(resource, token).await }
        }))
        .await
    }

    /// Re-arms `token` on every client, returning the new validity in
    /// milliseconds when a quorum confirmed it.
    pub(crate) async fn extend_all(&self, resource: &str, token: &str, ttl_ms: u64) -> Option<u64> {
        let started = Instant::now();
        let votes = join_all(self.clients.iter().map(|client| {
            let node = client.route(resource);
            async move { node.expire_if_value(resource, token, ttl_ms).await }
        }))
        .await;

        let granted = self.count_votes(resource, votes);
        let validity = self.validity(ttl_ms, started);
        (granted >= self.quorum() && validity > 0).then_some(validity)
    }

    fn count_votes(&self, resource: &str, votes: Vec<Result<bool>>) -> usize {
        votes
            .into_iter()
            .filter(|vote| match vote {
                Ok(granted) => *granted,
                Err(err) => {
                    debug!(resource, error = %err, "Lock node did not vote");
                    false
                }
            })
            .count()
    }

    /// TTL left after the time spent and the drift allowance.
    fn validity(&self, ttl_ms: u64, started: Instant) -> u64 {
        let drift = ((ttl_ms as f64 * self.settings.drift_factor) as u64).saturating_add(2);
        let elapsed = duration_ms(started.elapsed());
        ttl_ms.saturating_sub(elapsed.saturating_add(drift))
    }

    fn retry_pause(&self) -> Duration {
        let jitter_ms = self.settings.retry_jitter.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        self.settings.retry_delay + Duration::from_millis(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SingleNode;
    use crate::node::{CacheNode, MemoryNode};

    fn lock_nodes(count: usize) -> (Vec<Arc<MemoryNode>>, Vec<Arc<dyn NodeConnection>>) {
        let nodes: Vec<Arc<MemoryNode>> = (0..count)
            .map(|i| Arc::new(MemoryNode::new(format!("memory://lock-{}", i))))
            .collect();
        let clients = nodes
            .iter()
            .map(|n| Arc::new(SingleNode::new(n.clone())) as Arc<dyn NodeConnection>)
            .collect();
        (nodes, clients)
    }

    fn fast_settings() -> LockSettings {
        LockSettings {
            retry_count: 3,
            retry_delay: Duration::from_millis(10),
            retry_jitter: Duration::from_millis(5),
            ..LockSettings::default()
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = LockSettings::default();
        assert_eq!(settings.retry_count, 10);
        assert_eq!(settings.retry_delay, Duration::from_millis(200));
        assert_eq!(settings.default_ttl, Duration::from_millis(15_000));
        assert!((settings.drift_factor - 0.01).abs() < f64::EPSILON);
    }

    #[test]
    fn test_quorum_is_strict_majority() {
        for (count, quorum) in [(1, 1), (2, 2), (3, 2), (4, 3), (5, 3)] {
            let (_, clients) = lock_nodes(count);
            let redlock = Redlock::new(clients, LockSettings::default()).unwrap();
            assert_eq!(redlock.quorum(), quorum);
        }
    }

    #[test]
    fn test_no_clients_is_rejected() {
        let result = Redlock::new(Vec::new(), LockSettings::default());
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_acquires_with_minority_down() {
        let (nodes, clients) = lock_nodes(3);
        nodes[2].set_available(false);
        let redlock = Redlock::new(clients, fast_settings()).unwrap();

        let handle = redlock.try_lock("res-lock", None).await.unwrap();

        assert!(nodes[0].get("res-lock").await.unwrap().is_some());
        assert!(nodes[1].get("res-lock").await.unwrap().is_some());
        let _ = handle.release().await;
    }

    #[tokio::test]
    async fn test_fails_and_rolls_back_with_majority_down() {
        let (nodes, clients) = lock_nodes(3);
        nodes[1].set_available(false);
        nodes[2].set_available(false);
        let redlock = Redlock::new(clients, fast_settings()).unwrap();

        let result = redlock.lock("res-lock", None).await;

        match result {
            Err(CacheError::LockAcquisition { resource, attempts }) => {
                assert_eq!(resource, "res-lock");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected result: {:?}", other.map(|h| h.token().to_string())),
        }
        // The vote granted by the healthy node was withdrawn
        assert!(nodes[0].get("res-lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_try_lock_does_not_retry() {
        let (_, clients) = lock_nodes(1);
        let mut settings = fast_settings();
        settings.retry_delay = Duration::from_secs(5);
        let redlock = Redlock::new(clients, settings).unwrap();

        let _held = redlock.try_lock("res-lock", None).await.unwrap();
        let started = Instant::now();
        let result = redlock.try_lock("res-lock", None).await;

        assert!(matches!(
            result,
            Err(CacheError::LockAcquisition { attempts: 1, .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_ttl_shorter_than_drift_never_validates() {
        let (nodes, clients) = lock_nodes(1);
        let redlock = Redlock::new(clients, fast_settings()).unwrap();

        let result = redlock.try_lock("res-lock", Some(Duration::from_millis(1))).await;

        assert!(result.is_err());
        assert!(nodes[0].get("res-lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unbounded_ttl_locks_and_releases() {
        let (nodes, clients) = lock_nodes(3);
        let redlock = Redlock::new(clients, fast_settings()).unwrap();

        let handle = redlock.try_lock("res-lock", Some(Duration::MAX)).await.unwrap();

        assert!(!handle.is_expired());
        for node in &nodes {
            assert!(node.get("res-lock").await.unwrap().is_some());
        }
        handle.release().await.unwrap();
        assert!(nodes[0].get("res-lock").await.unwrap().is_none());
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
