//! Error types for sirenbus-ipc

use thiserror::Error;

/// Transport / supervisor error type
#[derive(Debug, Error)]
pub enum TransportError {
    /// Handshake or response not received in time (retryable)
    #[error("transport timeout: {0}")]
    Timeout(String),

    /// Connect failure, write failure, bad handshake or malformed response (retryable)
    #[error("transport error: {0}")]
    Transport(String),

    /// The worker process could not be launched (not retried)
    #[error("worker spawn failed: {0}")]
    WorkerSpawn(String),

    /// The worker was launched but its socket never appeared (not retried)
    #[error("worker did not create {endpoint} within {waited_ms} ms; see {log_path}")]
    WorkerStartupTimeout {
        /// Socket path that was polled
        endpoint: String,
        /// How long we waited
        waited_ms: u64,
        /// Worker log file
        log_path: String,
    },
}

impl TransportError {
    /// Whether `send()` may retry after this error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }

    /// Whether this is a timeout (as opposed to any other failure)
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, TransportError>;
