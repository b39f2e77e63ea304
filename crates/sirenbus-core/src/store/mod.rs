//! BroadcastStore - SQLite persistence for sessions, playlists, control
//! channel audit rows and telemetry
//!
//! The store enforces forward-only transitions with guarded updates but no
//! cross-entity invariants; the single-running-session rule lives in the
//! orchestrator.

mod helpers;

use crate::error::{Error, Result};
use crate::types::{
    BroadcastSession, ControlChannelCommand, Playlist, PlaylistStatus, TelemetryEntry,
    TelemetryKind,
};
use chrono::{DateTime, Utc};
use helpers::{
    format_ts, row_to_command, row_to_item, row_to_playlist, row_to_session, row_to_telemetry,
};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// SQLite-backed broadcast store
#[derive(Clone)]
pub struct BroadcastStore {
    pool: SqlitePool,
}

impl BroadcastStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub async fn from_path(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Database(format!("failed to create directory: {e}")))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;

        info!("Broadcast store initialized at {}", db_path.display());
        Ok(store)
    }

    /// In-memory store (for testing)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;

        debug!("In-memory broadcast store initialized");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS broadcast_sessions (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                route TEXT NOT NULL,
                zones TEXT NOT NULL,
                options TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                stopped_at TEXT,
                stop_reason TEXT,
                device_response TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_status ON broadcast_sessions(status, started_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS broadcast_playlists (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                route TEXT NOT NULL,
                zones TEXT NOT NULL,
                options TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS broadcast_playlist_items (
                playlist_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                recording_ref TEXT NOT NULL,
                duration_seconds REAL,
                gain REAL,
                gap_ms INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL,
                PRIMARY KEY (playlist_id, position),
                FOREIGN KEY (playlist_id) REFERENCES broadcast_playlists(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS control_channel_commands (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                command TEXT NOT NULL,
                state_before TEXT,
                state_after TEXT,
                reason TEXT,
                result TEXT NOT NULL,
                payload TEXT NOT NULL,
                issued_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS telemetry (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type TEXT NOT NULL,
                session_id TEXT,
                playlist_id TEXT,
                payload TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                recorded_at_us INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_telemetry_recorded ON telemetry(recorded_at_us)",
        )
        .execute(&self.pool)
        .await?;

        debug!("Broadcast store migrations completed");
        Ok(())
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Insert a new session row
    pub async fn insert_session(&self, session: &BroadcastSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO broadcast_sessions
                (id, source, route, zones, options, status, started_at,
                 stopped_at, stop_reason, device_response)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.id.to_string())
        .bind(&session.source)
        .bind(serde_json::to_string(&session.route)?)
        .bind(serde_json::to_string(&session.zones)?)
        .bind(serde_json::to_string(&session.options)?)
        .bind(session.status.as_str())
        .bind(format_ts(session.started_at))
        .bind(session.stopped_at.map(format_ts))
        .bind(&session.stop_reason)
        .bind(
            session
                .device_response
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recently started session still marked running
    pub async fn running_session(&self) -> Result<Option<BroadcastSession>> {
        sqlx::query(
            "SELECT * FROM broadcast_sessions WHERE status = 'running' ORDER BY started_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_session)
        .transpose()
    }

    /// Get a session by id
    pub async fn get_session(&self, id: Uuid) -> Result<BroadcastSession> {
        let row = sqlx::query("SELECT * FROM broadcast_sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {id}")))?;

        row_to_session(row)
    }

    /// Mark a running session stopped; false if it was not running
    pub async fn stop_session(
        &self,
        id: Uuid,
        reason: &str,
        stopped_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE broadcast_sessions
            SET status = 'stopped', stopped_at = ?, stop_reason = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(format_ts(stopped_at))
        .bind(reason)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count sessions with the given status
    pub async fn count_sessions(&self, status: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM broadcast_sessions WHERE status = ?")
                .bind(status)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    // ========================================================================
    // Playlists
    // ========================================================================

    /// Persist a playlist and its items atomically
    pub async fn create_playlist(&self, playlist: &Playlist) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO broadcast_playlists
                (id, status, route, zones, options, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(playlist.id.to_string())
        .bind(playlist.status.as_str())
        .bind(serde_json::to_string(&playlist.route)?)
        .bind(serde_json::to_string(&playlist.zones)?)
        .bind(serde_json::to_string(&playlist.options)?)
        .bind(format_ts(playlist.created_at))
        .bind(format_ts(playlist.updated_at))
        .execute(&mut *tx)
        .await?;

        for item in &playlist.items {
            sqlx::query(
                r#"
                INSERT INTO broadcast_playlist_items
                    (playlist_id, position, recording_ref, duration_seconds, gain, gap_ms, metadata)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(playlist.id.to_string())
            .bind(item.position)
            .bind(&item.recording_ref)
            .bind(item.duration_seconds)
            .bind(item.gain)
            .bind(i64::try_from(item.gap_ms).unwrap_or(i64::MAX))
            .bind(serde_json::to_string(&item.metadata)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(playlist_id = %playlist.id, items = playlist.items.len(), "Playlist created");
        Ok(())
    }

    /// Get a playlist with its items in position order
    pub async fn get_playlist(&self, id: Uuid) -> Result<Playlist> {
        let row = sqlx::query("SELECT * FROM broadcast_playlists WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("playlist {id}")))?;

        let items = sqlx::query(
            "SELECT * FROM broadcast_playlist_items WHERE playlist_id = ? ORDER BY position ASC",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(row_to_item)
        .collect::<Result<Vec<_>>>()?;

        row_to_playlist(row, items)
    }

    /// Current (live) playlist status
    pub async fn playlist_status(&self, id: Uuid) -> Result<PlaylistStatus> {
        let status: String = sqlx::query_scalar("SELECT status FROM broadcast_playlists WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("playlist {id}")))?;

        status.parse().map_err(Error::Serialization)
    }

    /// Move a playlist to `to` if it is currently in one of `from`.
    ///
    /// Returns whether the row changed.
    pub async fn transition_playlist(
        &self,
        id: Uuid,
        to: PlaylistStatus,
        from: &[PlaylistStatus],
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }

        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE broadcast_playlists SET status = ?, updated_at = ? WHERE id = ? AND status IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(format_ts(Utc::now()))
            .bind(id.to_string());
        for status in from {
            query = query.bind(status.as_str());
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Control channel audit
    // ========================================================================

    /// Append an audit row
    pub async fn record_command(&self, command: &ControlChannelCommand) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO control_channel_commands
                (command, state_before, state_after, reason, result, payload, issued_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&command.command)
        .bind(&command.state_before)
        .bind(&command.state_after)
        .bind(&command.reason)
        .bind(command.result.as_str())
        .bind(serde_json::to_string(&command.payload)?)
        .bind(format_ts(command.issued_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Latest state reported by the control worker
    pub async fn last_known_state(&self) -> Result<Option<String>> {
        let state: Option<String> = sqlx::query_scalar(
            "SELECT state_after FROM control_channel_commands WHERE state_after IS NOT NULL ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(state)
    }

    /// Most recent audit rows, newest first
    pub async fn recent_commands(&self, limit: i64) -> Result<Vec<ControlChannelCommand>> {
        sqlx::query("SELECT * FROM control_channel_commands ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(row_to_command)
            .collect()
    }

    // ========================================================================
    // Telemetry
    // ========================================================================

    /// Append a telemetry entry
    pub async fn append_telemetry(
        &self,
        kind: TelemetryKind,
        session_id: Option<Uuid>,
        playlist_id: Option<Uuid>,
        payload: Value,
    ) -> Result<TelemetryEntry> {
        let recorded_at = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO telemetry
                (type, session_id, playlist_id, payload, recorded_at, recorded_at_us)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(kind.as_str())
        .bind(session_id.map(|id| id.to_string()))
        .bind(playlist_id.map(|id| id.to_string()))
        .bind(serde_json::to_string(&payload)?)
        .bind(format_ts(recorded_at))
        .bind(recorded_at.timestamp_micros())
        .execute(&self.pool)
        .await?;

        Ok(TelemetryEntry {
            id: result.last_insert_rowid(),
            kind: kind.as_str().to_string(),
            session_id,
            playlist_id,
            payload,
            recorded_at,
        })
    }

    /// Up to `limit` most recent entries, newest first, optionally only
    /// those recorded at or after `since`
    pub async fn telemetry(
        &self,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<TelemetryEntry>> {
        let rows = match since {
            Some(since) => {
                sqlx::query(
                    "SELECT * FROM telemetry WHERE recorded_at_us >= ? ORDER BY recorded_at_us DESC, id DESC LIMIT ?",
                )
                .bind(since.timestamp_micros())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM telemetry ORDER BY recorded_at_us DESC, id DESC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(row_to_telemetry).collect()
    }
}
