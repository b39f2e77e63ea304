//! Row conversion helpers

use crate::error::{Error, Result};
use crate::types::{
    BroadcastSession, ControlChannelCommand, Playlist, PlaylistItem, TelemetryEntry,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

/// Fixed-width RFC3339 so stored timestamps sort lexicographically
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Serialization(format!("invalid timestamp: {e}")))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Serialization(format!("invalid uuid: {e}")))
}

fn parse_json(s: &str) -> Result<Value> {
    serde_json::from_str(s).map_err(|e| Error::Serialization(format!("invalid json: {e}")))
}

fn parse_list(s: &str) -> Result<Vec<String>> {
    serde_json::from_str(s).map_err(|e| Error::Serialization(format!("invalid list: {e}")))
}

pub(crate) fn row_to_session(row: SqliteRow) -> Result<BroadcastSession> {
    let id: String = row.get("id");
    let route: String = row.get("route");
    let zones: String = row.get("zones");
    let options: String = row.get("options");
    let status: String = row.get("status");
    let started_at: String = row.get("started_at");
    let stopped_at: Option<String> = row.get("stopped_at");
    let device_response: Option<String> = row.get("device_response");

    Ok(BroadcastSession {
        id: parse_uuid(&id)?,
        source: row.get("source"),
        route: parse_list(&route)?,
        zones: parse_list(&zones)?,
        options: parse_json(&options)?,
        status: status.parse().map_err(Error::Serialization)?,
        started_at: parse_ts(&started_at)?,
        stopped_at: stopped_at.as_deref().map(parse_ts).transpose()?,
        stop_reason: row.get("stop_reason"),
        device_response: device_response.as_deref().map(parse_json).transpose()?,
    })
}

pub(crate) fn row_to_playlist(row: SqliteRow, items: Vec<PlaylistItem>) -> Result<Playlist> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let route: String = row.get("route");
    let zones: String = row.get("zones");
    let options: String = row.get("options");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Playlist {
        id: parse_uuid(&id)?,
        status: status.parse().map_err(Error::Serialization)?,
        route: parse_list(&route)?,
        zones: parse_list(&zones)?,
        options: parse_json(&options)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
        items,
    })
}

pub(crate) fn row_to_item(row: SqliteRow) -> Result<PlaylistItem> {
    let gap_ms: i64 = row.get("gap_ms");
    let metadata: String = row.get("metadata");

    Ok(PlaylistItem {
        position: row.get("position"),
        recording_ref: row.get("recording_ref"),
        duration_seconds: row.get("duration_seconds"),
        gain: row.get("gain"),
        gap_ms: u64::try_from(gap_ms).unwrap_or(0),
        metadata: parse_json(&metadata)?,
    })
}

pub(crate) fn row_to_command(row: SqliteRow) -> Result<ControlChannelCommand> {
    let result: String = row.get("result");
    let payload: String = row.get("payload");
    let issued_at: String = row.get("issued_at");

    Ok(ControlChannelCommand {
        command: row.get("command"),
        state_before: row.get("state_before"),
        state_after: row.get("state_after"),
        reason: row.get("reason"),
        result: result.parse().map_err(Error::Serialization)?,
        payload: parse_json(&payload)?,
        issued_at: parse_ts(&issued_at)?,
    })
}

pub(crate) fn row_to_telemetry(row: SqliteRow) -> Result<TelemetryEntry> {
    let session_id: Option<String> = row.get("session_id");
    let playlist_id: Option<String> = row.get("playlist_id");
    let payload: String = row.get("payload");
    let recorded_at: String = row.get("recorded_at");

    Ok(TelemetryEntry {
        id: row.get("id"),
        kind: row.get("type"),
        session_id: session_id.as_deref().map(parse_uuid).transpose()?,
        playlist_id: playlist_id.as_deref().map(parse_uuid).transpose()?,
        payload: parse_json(&payload)?,
        recorded_at: parse_ts(&recorded_at)?,
    })
}
