//! Error types for sirenbus-core
//!
//! Internal failures are folded into a small set of coarse statuses
//! (`Error::status`) before they reach external callers.

use sirenbus_bus::{ArbiterError, DriverError};
use sirenbus_ipc::TransportError;
use thiserror::Error;

/// Failure of a device command (begin/end transmission, read status)
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The bus was not granted before the arbiter deadline
    #[error("bus busy: {priority} not granted within {waited_ms} ms")]
    Busy {
        /// Canonical class of the refused request
        priority: String,
        /// Time spent waiting
        waited_ms: u64,
    },

    /// Arbiter infrastructure failure (queue store, configuration)
    #[error("arbiter error: {0}")]
    Arbiter(String),

    /// Transceiver direction switch failed
    #[error("direction driver error: {0}")]
    Driver(#[from] DriverError),

    /// The register-level link rejected or failed the command
    #[error("device link error: {0}")]
    Link(String),
}

impl From<ArbiterError> for DeviceError {
    fn from(e: ArbiterError) -> Self {
        match e {
            ArbiterError::Busy {
                priority,
                waited_ms,
            } => Self::Busy {
                priority,
                waited_ms,
            },
            other => Self::Arbiter(other.to_string()),
        }
    }
}

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// A device command failed inside the orchestrator
    #[error("control channel error: {0}")]
    ControlChannel(#[from] DeviceError),

    /// A more urgent broadcast holds the bus
    #[error("broadcast locked by active {class} session {session_id}")]
    BroadcastLocked {
        /// Canonical class of the running session
        class: String,
        /// Running session id
        session_id: String,
    },

    /// Alternate control path failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Entity not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not allowed in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Coarse status string exposed to external callers
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            Self::ControlChannel(DeviceError::Busy { .. }) => "bus_busy",
            Self::ControlChannel(_) => "control_channel_error",
            Self::BroadcastLocked { .. } => "jsvv_active",
            Self::Transport(TransportError::Timeout(_)) => "transport_timeout",
            Self::Transport(TransportError::Transport(_)) => "transport_error",
            Self::Transport(_) => "worker_unavailable",
            Self::NotFound(_) => "not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Database(_) | Self::Serialization(_) => "storage_error",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
