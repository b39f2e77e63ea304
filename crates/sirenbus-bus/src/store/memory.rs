use super::{state_ttl, QueueStore};
use crate::error::Result;
use crate::queue::QueueState;
use async_trait::async_trait;
use chrono::Utc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct Inner {
    lock: Option<(String, Instant)>,
    state: Option<(QueueState, Instant)>,
}

/// In-process queue store
///
/// Emulates the Redis key TTLs so behaviour matches the shared backend.
/// Only valid when every caller of the arbiter lives in this process.
#[derive(Default)]
pub struct MemoryQueueStore {
    inner: Mutex<Inner>,
}

impl MemoryQueueStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn try_lock(&self, owner: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        match &inner.lock {
            Some((holder, expires)) if *expires > now && holder != owner => Ok(false),
            _ => {
                inner.lock = Some((owner.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn unlock(&self, owner: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if matches!(&inner.lock, Some((holder, _)) if holder == owner) {
            inner.lock = None;
        }
        Ok(())
    }

    async fn load(&self) -> Result<QueueState> {
        let mut inner = self.inner.lock().await;
        match &inner.state {
            Some((state, expires)) if *expires > Instant::now() => Ok(state.clone()),
            Some(_) => {
                debug!("In-memory queue state expired");
                inner.state = None;
                Ok(QueueState::default())
            }
            None => Ok(QueueState::default()),
        }
    }

    async fn save(&self, state: &QueueState) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.state = state_ttl(state, Utc::now())
            .filter(|_| !state.is_empty())
            .map(|ttl| (state.clone(), Instant::now() + ttl));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
