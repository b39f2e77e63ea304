//! Priority arbiter for exclusive bus access
//!
//! `push_request` registers the caller in the shared queue and polls until
//! its token is at the head, then runs the callback while holding the bus.
//!
//! ```text
//!  caller ──► with_queue: purge expired, upsert, sort, head == me?
//!               │ no: sleep(poll_interval), retry until deadline
//!               ▼ yes: mark granted (pinned at head)
//!           callback()  ◄── heartbeat extends the lease every lease/3
//!               ▼
//!           with_queue: remove token   (always, success / error / panic)
//! ```
//!
//! A granted request is never preempted; a more urgent request that arrives
//! meanwhile only moves ahead of the requests that are still waiting.

use crate::error::{ArbiterError, Result};
use crate::priority::{PriorityClass, PriorityConfig, PriorityTable};
use crate::queue::{PriorityRequest, QueueState};
use crate::store::QueueStore;
use chrono::{DateTime, Utc};
use futures::future::{self, Either};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Delay between attempts to take the mutation mutex
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Attempts made to remove a finished request from the queue
const RELEASE_ATTEMPTS: u32 = 3;

/// Arbiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterConfig {
    /// Overall deadline for reaching the head of the queue
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    /// Delay between head-of-queue checks
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Lease length of a queue entry; refreshed while waiting and while granted
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,
    /// TTL of the mutation mutex
    #[serde(default = "default_mutex_ttl_ms")]
    pub mutex_ttl_ms: u64,
    /// How long one mutation waits for the mutex before giving up this round
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,
    /// Priority alias table
    #[serde(default)]
    pub priorities: PriorityConfig,
}

fn default_wait_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_lease_ttl_ms() -> u64 {
    15_000
}

fn default_mutex_ttl_ms() -> u64 {
    2_000
}

fn default_lock_wait_ms() -> u64 {
    1_000
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_ttl_ms: default_lease_ttl_ms(),
            mutex_ttl_ms: default_mutex_ttl_ms(),
            lock_wait_ms: default_lock_wait_ms(),
            priorities: PriorityConfig::default(),
        }
    }
}

impl ArbiterConfig {
    /// Set the overall wait deadline
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the head-of-queue poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the entry lease length
    #[must_use]
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl_ms = ttl.as_millis() as u64;
        self
    }

    fn lease(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.lease_ttl_ms as i64)
    }
}

/// Grants exclusive bus access in priority order
pub struct Arbiter {
    store: Arc<dyn QueueStore>,
    table: PriorityTable,
    config: ArbiterConfig,
}

impl Arbiter {
    /// Create an arbiter over the given queue store
    ///
    /// # Errors
    ///
    /// Returns `ArbiterError::InvalidConfig` if the priority table is invalid.
    pub fn new(store: Arc<dyn QueueStore>, config: ArbiterConfig) -> Result<Self> {
        let table = PriorityTable::from_config(&config.priorities)?;
        info!(
            store = store.name(),
            default_class = %table.default_class(),
            "Bus arbiter initialized"
        );
        Ok(Self {
            store,
            table,
            config,
        })
    }

    /// Resolve a free-form priority name
    #[must_use]
    pub fn resolve(&self, priority: &str) -> PriorityClass {
        self.table.resolve(priority)
    }

    /// Run `callback` with exclusive ownership of the bus.
    ///
    /// Blocks until the request reaches the head of the shared queue or the
    /// configured deadline elapses (`ArbiterError::Busy`). The request is
    /// removed from the queue however the callback ends. If this future is
    /// dropped mid-flight the entry is reclaimed when its lease expires.
    pub async fn push_request<T, E, F, Fut>(&self, priority: &str, callback: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<ArbiterError>,
    {
        let class = self.table.resolve(priority);
        let token = Uuid::new_v4().to_string();
        let enqueued_at = Utc::now();
        let started = Instant::now();
        let deadline = started + Duration::from_millis(self.config.wait_timeout_ms);
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let lease = self.config.lease();

        debug!(token = %token, priority = %priority, class = %class, "Bus request enqueued");

        loop {
            let round = self
                .with_queue(|state, now| {
                    let purged = state.purge_expired(now);
                    state.upsert(PriorityRequest::new(&token, class, enqueued_at, now + lease));
                    let at_head = state.head(now).is_some_and(|head| head.token == token);
                    if at_head {
                        state.grant(&token, now, now + lease);
                    }
                    (at_head, purged)
                })
                .await;

            match round {
                Ok(Some((true, _))) => break,
                Ok(Some((false, purged))) if purged > 0 => {
                    debug!(purged = purged, "Purged expired bus requests");
                }
                Ok(_) => {}
                Err(e) => {
                    self.release(&token).await;
                    return Err(e.into());
                }
            }

            if Instant::now() >= deadline {
                self.release(&token).await;
                let waited_ms = started.elapsed().as_millis() as u64;
                warn!(token = %token, class = %class, waited_ms = waited_ms, "Bus request timed out");
                return Err(ArbiterError::Busy {
                    priority: class.to_string(),
                    waited_ms,
                }
                .into());
            }

            sleep(poll_interval).await;
        }

        info!(
            token = %token,
            class = %class,
            waited_ms = started.elapsed().as_millis() as u64,
            "Bus granted"
        );

        let guarded = AssertUnwindSafe(callback()).catch_unwind();
        tokio::pin!(guarded);

        // polled alongside the callback, so a slow lease extension never stalls it
        let period = Duration::from_millis((self.config.lease_ttl_ms / 3).max(1));
        let heartbeat = async {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                self.extend_grant(&token).await;
            }
        };
        tokio::pin!(heartbeat);

        let outcome = match future::select(guarded, heartbeat).await {
            Either::Left((out, _)) => out,
            Either::Right((_, guarded)) => guarded.await,
        };

        self.release(&token).await;
        debug!(token = %token, "Bus released");

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Live (non-expired) queue entries in grant order
    pub async fn snapshot(&self) -> Result<Vec<PriorityRequest>> {
        let now = Utc::now();
        let state = self.store.load().await?;
        Ok(state
            .into_entries()
            .into_iter()
            .filter(|r| !r.is_expired(now))
            .collect())
    }

    async fn extend_grant(&self, token: &str) {
        let lease = self.config.lease();
        match self
            .with_queue(|state, now| state.extend_lease(token, now + lease))
            .await
        {
            Ok(Some(true)) => debug!(token = %token, "Bus lease extended"),
            Ok(Some(false)) => warn!(token = %token, "Granted bus request vanished from queue"),
            Ok(None) => debug!(token = %token, "Queue busy, lease extension deferred"),
            Err(e) => warn!(token = %token, error = %e, "Failed to extend bus lease"),
        }
    }

    async fn release(&self, token: &str) {
        for attempt in 1..=RELEASE_ATTEMPTS {
            match self.with_queue(|state, _| state.remove(token)).await {
                Ok(Some(_)) => return,
                Ok(None) => debug!(token = %token, attempt = attempt, "Queue busy during release"),
                Err(e) => warn!(token = %token, attempt = attempt, error = %e, "Release failed"),
            }
        }
        warn!(token = %token, "Could not remove bus request; lease expiry will reclaim it");
    }

    /// Run `mutate` on the queue while holding the mutation mutex.
    ///
    /// Returns `Ok(None)` if the mutex could not be taken within `lock_wait_ms`.
    async fn with_queue<R>(
        &self,
        mutate: impl FnOnce(&mut QueueState, DateTime<Utc>) -> R,
    ) -> Result<Option<R>> {
        let owner = Uuid::new_v4().to_string();
        let mutex_ttl = Duration::from_millis(self.config.mutex_ttl_ms);
        let lock_deadline = Instant::now() + Duration::from_millis(self.config.lock_wait_ms);

        while !self.store.try_lock(&owner, mutex_ttl).await? {
            if Instant::now() >= lock_deadline {
                return Ok(None);
            }
            sleep(LOCK_RETRY_DELAY).await;
        }

        let result = async {
            let mut state = self.store.load().await?;
            let value = mutate(&mut state, Utc::now());
            self.store.save(&state).await?;
            Ok::<_, ArbiterError>(value)
        }
        .await;

        if let Err(e) = self.store.unlock(&owner).await {
            warn!(error = %e, "Failed to release queue mutex");
        }

        result.map(Some)
    }
}
