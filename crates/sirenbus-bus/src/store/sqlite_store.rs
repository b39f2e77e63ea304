use super::{state_ttl, QueueStore};
use crate::error::{ArbiterError, Result};
use crate::queue::QueueState;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// SQLite-backed queue store (shared between processes on one host)
///
/// # Tables
///
/// - `bus_queue_lock`: single row holding the mutation mutex owner and its
///   wall-clock expiry; taken with a conditional upsert
/// - `bus_queue_state`: single row with the JSON queue and the expiry of
///   its furthest entry
///
/// Every process opening the same database file sees the same queue, so
/// this is the default backend when no Redis server is configured.
#[derive(Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    /// Open (or create) the database at `db_path` and run migrations
    ///
    /// # Errors
    ///
    /// Returns error if the directory or database cannot be created
    pub async fn from_path(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ArbiterError::Store(format!("failed to create directory: {e}")))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;

        info!("SQLite queue store initialized at {}", db_path.display());
        Ok(store)
    }

    /// In-memory store (for testing)
    ///
    /// # Errors
    ///
    /// Returns error if SQLite cannot be opened
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;

        debug!("In-memory SQLite queue store initialized");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bus_queue_lock (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                owner TEXT NOT NULL,
                expires_at_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bus_queue_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                state TEXT NOT NULL,
                expires_at_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn try_lock(&self, owner: &str, ttl: Duration) -> Result<bool> {
        let now_ms = Utc::now().timestamp_millis();
        let expires_at_ms = now_ms + ttl.as_millis().max(1) as i64;

        // insert, or take over a row that expired or is already ours
        let result = sqlx::query(
            r#"
            INSERT INTO bus_queue_lock (id, owner, expires_at_ms) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                owner = excluded.owner,
                expires_at_ms = excluded.expires_at_ms
            WHERE bus_queue_lock.expires_at_ms <= ? OR bus_queue_lock.owner = excluded.owner
            "#,
        )
        .bind(owner)
        .bind(expires_at_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn unlock(&self, owner: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM bus_queue_lock WHERE id = 1 AND owner = ?")
            .bind(owner)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            debug!(owner = %owner, "Queue lock already expired or taken over");
        }
        Ok(())
    }

    async fn load(&self) -> Result<QueueState> {
        let row = sqlx::query("SELECT state FROM bus_queue_state WHERE id = 1 AND expires_at_ms > ?")
            .bind(Utc::now().timestamp_millis())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.try_get("state")?;
                Ok(serde_json::from_str(&json)?)
            }
            None => Ok(QueueState::default()),
        }
    }

    async fn save(&self, state: &QueueState) -> Result<()> {
        let now = Utc::now();

        match state_ttl(state, now).filter(|_| !state.is_empty()) {
            Some(ttl) => {
                let json = serde_json::to_string(state)?;
                sqlx::query(
                    r#"
                    INSERT INTO bus_queue_state (id, state, expires_at_ms) VALUES (1, ?, ?)
                    ON CONFLICT(id) DO UPDATE SET
                        state = excluded.state,
                        expires_at_ms = excluded.expires_at_ms
                    "#,
                )
                .bind(json)
                .bind(now.timestamp_millis() + ttl.as_millis() as i64)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM bus_queue_state WHERE id = 1")
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
