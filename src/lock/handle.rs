use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info, warn};

use super::{duration_ms, Redlock};
use crate::error::{CacheError, Result};

// == Lock Handle ==
/// Proof of holding a distributed lock.
///
/// `release` gives the lock back; it is single-use, and calling it again is a
/// no-op. If a handle is dropped without being released, the lock lapses on
/// the nodes once its TTL expires.
pub struct LockHandle {
    coordinator: Redlock,
    resource: String,
    token: String,
    expires_at: DateTime<Utc>,
    released: AtomicBool,
}

impl LockHandle {
    pub(crate) fn new(coordinator: Redlock, resource: String, token: String, validity_ms: u64) -> Self {
        Self {
            coordinator,
            resource,
            token,
            expires_at: deadline(validity_ms),
            released: AtomicBool::new(false),
        }
    }

    /// The namespaced lock key.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Random value identifying this holder on the lock nodes.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Instant after which exclusivity is no longer guaranteed.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    // == Release ==
    /// Releases the lock on every lock node.
    ///
    /// Only entries still holding this handle's token are removed, so a lock
    /// that expired and was taken by someone else is left alone. Fails with
    /// [`CacheError::LockRelease`] when some nodes could not be reached; the
    /// handle counts as released either way.
    pub async fn release(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            debug!(resource = %self.resource, "Lock already released");
            return Ok(());
        }

        let outcomes = self
            .coordinator
            .unlock_all(&self.resource, &self.token)
            .await;
        let total = outcomes.len();
        let failures: Vec<String> = outcomes
            .into_iter()
            .filter_map(|outcome| outcome.err().map(|err| err.to_string()))
            .collect();

        if failures.is_empty() {
            info!(resource = %self.resource, "Lock released");
            return Ok(());
        }

        warn!(
            resource = %self.resource,
            failed = failures.len(),
            total,
            "Lock release reached only part of the lock nodes"
        );
        Err(CacheError::LockRelease(format!(
            "{} of {} lock nodes failed for '{}': {}",
            failures.len(),
            total,
            self.resource,
            failures.join("; ")
        )))
    }

    // == Extend ==
    /// Pushes the expiry to `ttl` from now on a quorum of lock nodes.
    pub async fn extend(&mut self, ttl: Duration) -> Result<()> {
        if self.is_released() || self.is_expired() {
            return Err(CacheError::LockReleased(self.resource.clone()));
        }

        match self
            .coordinator
            .extend_all(&self.resource, &self.token, duration_ms(ttl))
            .await
        {
            Some(validity) => {
                self.expires_at = deadline(validity);
                debug!(resource = %self.resource, validity_ms = validity, "Lock extended");
                Ok(())
            }
            None => Err(CacheError::LockAcquisition {
                resource: self.resource.clone(),
                attempts: 1,
            }),
        }
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("resource", &self.resource)
            .field("expires_at", &self.expires_at)
            .field("released", &self.is_released())
            .field("clients", &self.coordinator.clients().len())
            .finish()
    }
}

/// Wall-clock expiry; validities beyond chrono's range pin to its maximum.
fn deadline(validity_ms: u64) -> DateTime<Utc> {
    let ms = i64::try_from(validity_ms).unwrap_or(i64::MAX);
    ChronoDuration::try_milliseconds(ms)
        .and_then(|validity| Utc::now().checked_add_signed(validity))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
