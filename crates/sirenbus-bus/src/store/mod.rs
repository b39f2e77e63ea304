//! Queue state backends
//!
//! Callers of the arbiter run in separate processes, so the queue lives in
//! an external store and is only mutated while holding a short-TTL mutation
//! mutex. The mutex guards queue *mutation*; it is not bus ownership.
//!
//! - `SqliteQueueStore`: shared by every process on the host through one
//!   database file (default)
//! - `RedisQueueStore`: shared across hosts through a Redis server
//! - `MemoryQueueStore`: one process only, for tests

mod memory;
mod redis_store;
mod sqlite_store;

pub use memory::MemoryQueueStore;
pub use redis_store::RedisQueueStore;
pub use sqlite_store::SqliteQueueStore;

use crate::error::Result;
use crate::queue::QueueState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Backend holding the shared queue state and its mutation mutex
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Try to take the mutation mutex for `owner`, auto-expiring after `ttl`.
    ///
    /// Returns `false` if another owner holds it.
    async fn try_lock(&self, owner: &str, ttl: Duration) -> Result<bool>;

    /// Release the mutation mutex if `owner` still holds it
    async fn unlock(&self, owner: &str) -> Result<()>;

    /// Load the queue; a missing key is an empty queue
    async fn load(&self) -> Result<QueueState>;

    /// Persist the queue. An empty queue deletes the key; otherwise the key
    /// expires at the furthest entry expiry.
    async fn save(&self, state: &QueueState) -> Result<()>;

    /// Backend name (for logging)
    fn name(&self) -> &str;
}

/// Remaining TTL for a persisted queue, at least one millisecond
pub(crate) fn state_ttl(state: &QueueState, now: DateTime<Utc>) -> Option<Duration> {
    let furthest = state.furthest_expiry()?;
    let ms = (furthest - now).num_milliseconds().max(1);
    Some(Duration::from_millis(ms as u64))
}
