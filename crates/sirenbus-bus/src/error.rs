//! Error types for sirenbus-bus

use thiserror::Error;

/// Arbiter error type
#[derive(Debug, Error)]
pub enum ArbiterError {
    /// The caller's deadline elapsed before it reached the head of the queue
    #[error("bus busy: {priority} request not granted within {waited_ms} ms")]
    Busy {
        /// Canonical priority class of the rejected request
        priority: String,
        /// How long the caller waited
        waited_ms: u64,
    },

    /// Queue state backend failure (SQLite, Redis, serialization)
    #[error("queue store error: {0}")]
    Store(String),

    /// Invalid priority configuration
    #[error("invalid priority configuration: {0}")]
    InvalidConfig(String),
}

impl From<redis::RedisError> for ArbiterError {
    fn from(e: redis::RedisError) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<sqlx::Error> for ArbiterError {
    fn from(e: sqlx::Error) -> Self {
        Self::Store(format!("SQLite queue store: {e}"))
    }
}

impl From<serde_json::Error> for ArbiterError {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(format!("queue state serialization failed: {e}"))
    }
}

/// Direction driver error type
#[derive(Debug, Error)]
pub enum DriverError {
    /// I/O failure while switching the transceiver line
    #[error("driver I/O error on {target}: {source}")]
    Io {
        /// GPIO value file or serial device path
        target: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Driver kind not available on this platform
    #[error("driver unavailable: {0}")]
    Unavailable(String),

    /// Invalid driver configuration
    #[error("invalid driver configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for arbiter operations
pub type Result<T> = std::result::Result<T, ArbiterError>;
