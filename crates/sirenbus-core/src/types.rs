//! Broadcast domain records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_source() -> String {
    "manual".to_string()
}

/// Session lifecycle: running, then stopped (terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Transmission in progress
    Running,
    /// Transmission ended
    Stopped,
}

impl SessionStatus {
    /// Storage representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Parameters of a new broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    /// Requesting subsystem; resolved to a bus priority class
    #[serde(default = "default_source")]
    pub source: String,
    /// Target addresses
    #[serde(default)]
    pub route: Vec<String>,
    /// Target zones
    #[serde(default)]
    pub zones: Vec<String>,
    /// Free-form options stored with the session
    #[serde(default = "empty_object")]
    pub options: Value,
}

impl StartRequest {
    /// Request from `source` with no targets
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            route: Vec::new(),
            zones: Vec::new(),
            options: empty_object(),
        }
    }

    /// Set the route
    #[must_use]
    pub fn with_route(mut self, route: Vec<String>) -> Self {
        self.route = route;
        self
    }

    /// Set the zones
    #[must_use]
    pub fn with_zones(mut self, zones: Vec<String>) -> Self {
        self.zones = zones;
        self
    }

    /// Set the options
    #[must_use]
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// One contiguous broadcast transmission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastSession {
    /// Session id
    pub id: Uuid,
    /// Requesting subsystem
    pub source: String,
    /// Target addresses
    pub route: Vec<String>,
    /// Target zones
    pub zones: Vec<String>,
    /// Free-form options
    pub options: Value,
    /// Lifecycle status
    pub status: SessionStatus,
    /// When the transmission began
    pub started_at: DateTime<Utc>,
    /// When the transmission ended
    pub stopped_at: Option<DateTime<Utc>>,
    /// Why the transmission ended
    pub stop_reason: Option<String>,
    /// Device answer to "begin transmission"
    pub device_response: Option<Value>,
}

impl BroadcastSession {
    /// New running session for a successfully started transmission
    #[must_use]
    pub fn running(request: &StartRequest, device_response: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: request.source.clone(),
            route: request.route.clone(),
            zones: request.zones.clone(),
            options: request.options.clone(),
            status: SessionStatus::Running,
            started_at: Utc::now(),
            stopped_at: None,
            stop_reason: None,
            device_response: Some(device_response),
        }
    }
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StopOutcome {
    /// The running session was stopped
    Stopped {
        /// Session after the stop was recorded
        session: BroadcastSession,
    },
    /// Nothing was running
    Idle,
}

/// Snapshot returned by the orchestrator's status query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastStatus {
    /// `running` or `idle`
    pub status: String,
    /// Running session, if any
    pub session: Option<BroadcastSession>,
    /// Device status answer
    pub device: Option<Value>,
    /// Device status failure, reported inline
    pub device_error: Option<String>,
}

/// Playlist lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistStatus {
    /// Created, sequencer not yet started
    Queued,
    /// Sequencer playing items
    Running,
    /// Every item played
    Completed,
    /// Stopped by an operator
    Cancelled,
    /// Stopped on the first playback failure
    Failed,
}

impl PlaylistStatus {
    /// Storage representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PlaylistStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlaylistStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown playlist status: {other}")),
        }
    }
}

/// Item as submitted for a new playlist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistItemInput {
    /// Recording reference, resolved by the player
    pub recording_ref: String,
    /// Nominal duration
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    /// Playback gain
    #[serde(default)]
    pub gain: Option<f64>,
    /// Pause after this item
    #[serde(default)]
    pub gap_ms: u64,
    /// Free-form metadata
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

impl PlaylistItemInput {
    /// Item with no gain, gap or metadata
    pub fn new(recording_ref: impl Into<String>) -> Self {
        Self {
            recording_ref: recording_ref.into(),
            duration_seconds: None,
            gain: None,
            gap_ms: 0,
            metadata: empty_object(),
        }
    }
}

/// New playlist submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistInput {
    /// Target addresses
    #[serde(default)]
    pub route: Vec<String>,
    /// Target zones
    #[serde(default)]
    pub zones: Vec<String>,
    /// Options handed to the session
    #[serde(default = "empty_object")]
    pub options: Value,
    /// Items in play order
    pub items: Vec<PlaylistItemInput>,
}

/// Stored playlist item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistItem {
    /// Play order, starting at 0
    pub position: i64,
    /// Recording reference
    pub recording_ref: String,
    /// Nominal duration
    pub duration_seconds: Option<f64>,
    /// Playback gain
    pub gain: Option<f64>,
    /// Pause after this item
    pub gap_ms: u64,
    /// Free-form metadata
    pub metadata: Value,
}

/// Stored playlist with its items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    /// Playlist id
    pub id: Uuid,
    /// Lifecycle status
    pub status: PlaylistStatus,
    /// Target addresses
    pub route: Vec<String>,
    /// Target zones
    pub zones: Vec<String>,
    /// Options handed to the session
    pub options: Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Items ordered by position
    pub items: Vec<PlaylistItem>,
}

impl Playlist {
    /// Queued playlist built from a submission
    #[must_use]
    pub fn queued(input: PlaylistInput) -> Self {
        let now = Utc::now();
        let items = input
            .items
            .into_iter()
            .enumerate()
            .map(|(position, item)| PlaylistItem {
                position: position as i64,
                recording_ref: item.recording_ref,
                duration_seconds: item.duration_seconds,
                gain: item.gain,
                gap_ms: item.gap_ms,
                metadata: item.metadata,
            })
            .collect();

        Self {
            id: Uuid::new_v4(),
            status: PlaylistStatus::Queued,
            route: input.route,
            zones: input.zones,
            options: input.options,
            created_at: now,
            updated_at: now,
            items,
        }
    }
}

/// Outcome of one control channel attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandResult {
    /// Worker answered
    Ok,
    /// Worker did not answer in time
    Timeout,
    /// Not sent: the hardware is already in the requested state
    Skipped,
    /// Any other failure
    Error,
}

impl CommandResult {
    /// Storage representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Timeout => "TIMEOUT",
            Self::Skipped => "SKIPPED",
            Self::Error => "ERROR",
        }
    }
}

impl FromStr for CommandResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Self::Ok),
            "TIMEOUT" => Ok(Self::Timeout),
            "SKIPPED" => Ok(Self::Skipped),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown command result: {other}")),
        }
    }
}

/// Audit record of one control channel attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlChannelCommand {
    /// Command sent (e.g. `pause_modbus`)
    pub command: String,
    /// Last known hardware state before the attempt
    pub state_before: Option<String>,
    /// State reported by the worker
    pub state_after: Option<String>,
    /// Operator-supplied reason
    pub reason: Option<String>,
    /// Attempt outcome
    pub result: CommandResult,
    /// Worker response, or the error message
    pub payload: Value,
    /// When the attempt was made
    pub issued_at: DateTime<Utc>,
}

/// Telemetry entry kinds written by the orchestrator and sequencer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKind {
    /// Session started
    StreamStarted,
    /// Session stopped
    StreamStopped,
    /// Playlist item playback began
    PlaylistItemStarted,
    /// Playlist item played successfully
    PlaylistItemFinished,
    /// Playlist item playback failed
    PlaylistItemFailed,
    /// Playlist could not be run
    PlaylistFailed,
}

impl TelemetryKind {
    /// Stored `type` value
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StreamStarted => "stream_started",
            Self::StreamStopped => "stream_stopped",
            Self::PlaylistItemStarted => "playlist_item_started",
            Self::PlaylistItemFinished => "playlist_item_finished",
            Self::PlaylistItemFailed => "playlist_item_failed",
            Self::PlaylistFailed => "playlist_failed",
        }
    }
}

/// Append-only telemetry record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEntry {
    /// Row id
    pub id: i64,
    /// Entry type (`stream_started`, ...)
    #[serde(rename = "type")]
    pub kind: String,
    /// Related session
    pub session_id: Option<Uuid>,
    /// Related playlist
    pub playlist_id: Option<Uuid>,
    /// Entry details
    pub payload: Value,
    /// When it was recorded
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_request_defaults() {
        let request: StartRequest = serde_json::from_value(json!({"zones": ["z1"]})).unwrap();
        assert_eq!(request.source, "manual");
        assert_eq!(request.zones, vec!["z1"]);
        assert!(request.route.is_empty());
        assert_eq!(request.options, json!({}));
    }

    #[test]
    fn test_stop_outcome_serialization() {
        assert_eq!(
            serde_json::to_value(StopOutcome::Idle).unwrap(),
            json!({"status": "idle"})
        );
    }

    #[test]
    fn test_playlist_positions_follow_input_order() {
        let playlist = Playlist::queued(PlaylistInput {
            route: vec!["r1".to_string()],
            zones: vec![],
            options: json!({}),
            items: vec![PlaylistItemInput::new("a.mp3"), PlaylistItemInput::new("b.mp3")],
        });
        assert_eq!(playlist.status, PlaylistStatus::Queued);
        let refs: Vec<_> = playlist
            .items
            .iter()
            .map(|i| (i.position, i.recording_ref.as_str()))
            .collect();
        assert_eq!(refs, vec![(0, "a.mp3"), (1, "b.mp3")]);
    }

    #[test]
    fn test_command_result_wire_format() {
        assert_eq!(serde_json::to_value(CommandResult::Skipped).unwrap(), json!("SKIPPED"));
        assert_eq!("TIMEOUT".parse::<CommandResult>().unwrap(), CommandResult::Timeout);
    }
}
