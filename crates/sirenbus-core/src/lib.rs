//! Sirenbus Core - broadcast orchestration
//!
//! This crate contains the session and playlist logic of the siren controller:
//! - Orchestrator: start/stop of the single broadcast session
//! - Device: arbitrated device commands over the shared bus
//! - Control: audited pause/resume path through the control worker
//! - Playlist: sequential playback of stored recordings
//! - Store: SQLite persistence for sessions, playlists, commands and telemetry

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod control;
pub mod device;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod player;
pub mod playlist;
pub mod store;
pub mod types;

pub use control::{ControlChannel, ControlVerb};
pub use device::{ArbitratedDevice, DeviceCommands, DeviceLink, SimulatedLink};
pub use error::{DeviceError, Error, Result};
pub use events::EventBus;
pub use orchestrator::{Orchestrator, TelemetryConfig};
pub use player::{CommandPlayer, PlaybackOutcome, Player, PlayerConfig};
pub use playlist::PlaylistSequencer;
pub use store::BroadcastStore;
pub use types::{
    BroadcastSession, BroadcastStatus, CommandResult, ControlChannelCommand, Playlist,
    PlaylistInput, PlaylistItem, PlaylistItemInput, PlaylistStatus, SessionStatus, StartRequest,
    StopOutcome, TelemetryEntry, TelemetryKind,
};
