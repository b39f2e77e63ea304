use super::{state_ttl, QueueStore};
use crate::error::{ArbiterError, Result};
use crate::queue::QueueState;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::debug;

/// Deletes the lock key only if it still carries the caller's token
const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed queue store (shared between processes)
///
/// # Keys
///
/// - `{prefix}queue`: JSON list of requests, `PX` TTL = furthest expiry
/// - `{prefix}queue:lock`: mutation mutex, `SET NX PX` with the owner token
pub struct RedisQueueStore {
    client: redis::Client,
    state_key: String,
    lock_key: String,
}

impl RedisQueueStore {
    /// Create a new Redis store with the default key prefix
    ///
    /// # Errors
    ///
    /// Returns error if the Redis URL is invalid
    pub fn new(redis_url: &str) -> Result<Self> {
        Self::with_prefix(redis_url, "sirenbus:bus:")
    }

    /// Create with a custom key prefix
    ///
    /// # Errors
    ///
    /// Returns error if the Redis URL is invalid
    pub fn with_prefix(redis_url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| ArbiterError::Store(format!("invalid Redis URL: {e}")))?;

        Ok(Self {
            client,
            state_key: format!("{prefix}queue"),
            lock_key: format!("{prefix}queue:lock"),
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| ArbiterError::Store(format!("Redis connection failed: {e}")))
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    async fn try_lock(&self, owner: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.get_connection().await?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(&self.lock_key)
            .arg(owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn unlock(&self, owner: &str) -> Result<()> {
        let mut conn = self.get_connection().await?;

        let deleted: i64 = redis::cmd("EVAL")
            .arg(UNLOCK_SCRIPT)
            .arg(1)
            .arg(&self.lock_key)
            .arg(owner)
            .query_async(&mut conn)
            .await?;

        if deleted == 0 {
            debug!(owner = %owner, "Queue lock already expired or taken over");
        }
        Ok(())
    }

    async fn load(&self) -> Result<QueueState> {
        let mut conn = self.get_connection().await?;

        let data: Option<String> = redis::cmd("GET")
            .arg(&self.state_key)
            .query_async(&mut conn)
            .await?;

        match data {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(QueueState::default()),
        }
    }

    async fn save(&self, state: &QueueState) -> Result<()> {
        let mut conn = self.get_connection().await?;

        match state_ttl(state, Utc::now()).filter(|_| !state.is_empty()) {
            Some(ttl) => {
                let json = serde_json::to_string(state)?;
                redis::cmd("SET")
                    .arg(&self.state_key)
                    .arg(&json)
                    .arg("PX")
                    .arg(ttl.as_millis() as u64)
                    .query_async::<()>(&mut conn)
                    .await?;
            }
            None => {
                redis::cmd("DEL")
                    .arg(&self.state_key)
                    .query_async::<()>(&mut conn)
                    .await?;
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "redis"
    }
}

#[cfg(test)]
// Redis tests require a running Redis instance
// Run with: cargo test --features redis-tests
#[cfg(feature = "redis-tests")]
mod tests {
    use super::*;
    use crate::priority::PriorityClass;
    use crate::queue::PriorityRequest;

    #[tokio::test]
    async fn test_redis_lock_and_state() {
        let store =
            RedisQueueStore::with_prefix("redis://127.0.0.1:6379", "sirenbus:test:").unwrap();

        assert!(store.try_lock("owner-a", Duration::from_secs(2)).await.unwrap());
        assert!(!store.try_lock("owner-b", Duration::from_secs(2)).await.unwrap());

        let now = Utc::now();
        let mut state = QueueState::default();
        state.upsert(PriorityRequest::new(
            "t1",
            PriorityClass::Gsm,
            now,
            now + chrono::Duration::seconds(5),
        ));
        store.save(&state).await.unwrap();
        assert_eq!(store.load().await.unwrap(), state);

        store.save(&QueueState::default()).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());

        store.unlock("owner-a").await.unwrap();
        assert!(store.try_lock("owner-b", Duration::from_secs(2)).await.unwrap());
        store.unlock("owner-b").await.unwrap();
    }
}
