//! One-shot request/response client for the control worker
//!
//! # Wire protocol (per attempt)
//!
//! ```text
//! client                         worker
//!   │ ── connect (connect_timeout) ──►│
//!   │ ◄── "READY\n"  (handshake_timeout)
//!   │ ── {"command":...}\n ──────────►│
//!   │ ◄── {"ok":true,...}\n (read_timeout)
//! ```
//!
//! A connect failure that means "nobody is listening" (missing socket file,
//! connection refused) triggers one worker auto-start per `send()`, followed
//! by one immediate reconnect, before the regular retry loop continues.

use crate::error::{Result, TransportError};
use crate::retry::{retry_with_backoff, Backoff, RetryConfig};
use crate::supervisor::WorkerSupervisor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Unix socket path of the control worker
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Connect timeout
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Deadline for the handshake line
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Deadline for the response line (also bounds the request write)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Attempts per `send()`
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Linear backoff base: the n-th retry waits `backoff_ms * n`
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Accepted handshake lines
    #[serde(default = "default_handshake_tokens")]
    pub handshake_tokens: Vec<String>,
}

fn default_endpoint() -> String {
    "/run/sirenbus/control.sock".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    3_000
}

fn default_handshake_timeout_ms() -> u64 {
    1_000
}

fn default_read_timeout_ms() -> u64 {
    3_000
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    200
}

fn default_handshake_tokens() -> Vec<String> {
    vec!["READY".to_string(), "OK".to_string(), "HELLO".to_string()]
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout_ms: default_connect_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            attempts: default_attempts(),
            backoff_ms: default_backoff_ms(),
            handshake_tokens: default_handshake_tokens(),
        }
    }
}

impl TransportConfig {
    /// Config for a given socket path with default timeouts
    #[must_use]
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    fn retry(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_attempts(self.attempts)
            .with_initial_delay(Duration::from_millis(self.backoff_ms))
            .with_backoff(Backoff::Linear)
    }
}

/// Control worker client
pub struct TransportClient {
    config: TransportConfig,
    retry: RetryConfig,
    supervisor: Option<Arc<WorkerSupervisor>>,
}

impl TransportClient {
    /// Create a client without worker auto-start
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        let retry = config.retry();
        Self {
            config,
            retry,
            supervisor: None,
        }
    }

    /// Enable on-demand worker auto-start
    #[must_use]
    pub fn with_supervisor(mut self, supervisor: Arc<WorkerSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    /// Socket path this client talks to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// Send one request and return the worker's response object unmodified.
    ///
    /// # Errors
    ///
    /// The last attempt's `Timeout` or `Transport` error once attempts are
    /// exhausted; supervisor errors immediately.
    pub async fn send(&self, request: &Value) -> Result<Value> {
        let autostarted = AtomicBool::new(false);

        let response = retry_with_backoff(
            &self.retry,
            || self.attempt(request, &autostarted),
            TransportError::is_retryable,
        )
        .await
        .map_err(|e| e.last_error)?;

        debug!(endpoint = %self.config.endpoint, "Control request answered");
        Ok(response)
    }

    #[cfg(unix)]
    async fn attempt(&self, request: &Value, autostarted: &AtomicBool) -> Result<Value> {
        let stream = match self.connect().await {
            Ok(stream) => stream,
            Err(e) if is_server_absent(&e) => match &self.supervisor {
                Some(supervisor) if !autostarted.swap(true, Ordering::SeqCst) => {
                    info!(endpoint = %self.config.endpoint, error = %e, "Control worker not reachable, auto-starting");
                    supervisor.ensure_online().await?;
                    self.connect().await.map_err(|e| self.connect_error(e))?
                }
                _ => return Err(self.connect_error(e)),
            },
            Err(e) => return Err(self.connect_error(e)),
        };

        self.exchange(stream, request).await
    }

    #[cfg(not(unix))]
    async fn attempt(&self, _request: &Value, _autostarted: &AtomicBool) -> Result<Value> {
        Err(TransportError::Transport(
            "Unix domain sockets are only available on Unix".to_string(),
        ))
    }

    #[cfg(unix)]
    async fn connect(&self) -> std::io::Result<tokio::net::UnixStream> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        match tokio::time::timeout(timeout, tokio::net::UnixStream::connect(&self.config.endpoint))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect timed out after {} ms", self.config.connect_timeout_ms),
            )),
        }
    }

    fn connect_error(&self, e: std::io::Error) -> TransportError {
        TransportError::Transport(format!("connect to {} failed: {e}", self.config.endpoint))
    }

    #[cfg(unix)]
    async fn exchange(&self, stream: tokio::net::UnixStream, request: &Value) -> Result<Value> {
        use tokio::io::{AsyncWriteExt, BufReader};

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let handshake = read_line(
            &mut reader,
            Duration::from_millis(self.config.handshake_timeout_ms),
            "handshake",
        )
        .await?;
        let handshake = handshake.trim();
        if !self
            .config
            .handshake_tokens
            .iter()
            .any(|token| token.eq_ignore_ascii_case(handshake))
        {
            return Err(TransportError::Transport(format!(
                "unexpected handshake: {handshake:?}"
            )));
        }

        let mut payload = serde_json::to_vec(request)
            .map_err(|e| TransportError::Transport(format!("cannot encode request: {e}")))?;
        payload.push(b'\n');

        let write_timeout = Duration::from_millis(self.config.read_timeout_ms);
        let write = async {
            write_half.write_all(&payload).await?;
            write_half.flush().await
        };
        match tokio::time::timeout(write_timeout, write).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(TransportError::Transport(format!("write failed: {e}"))),
            Err(_) => return Err(TransportError::Transport("write timed out".to_string())),
        }

        let line = read_line(
            &mut reader,
            Duration::from_millis(self.config.read_timeout_ms),
            "response",
        )
        .await?;

        parse_response(&line)
    }
}

/// "Nobody is listening" conditions that justify a worker auto-start
fn is_server_absent(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
    )
}

#[cfg(unix)]
async fn read_line<R>(reader: &mut R, timeout: Duration, what: &str) -> Result<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    use tokio::io::AsyncBufReadExt;

    let mut line = String::new();
    match tokio::time::timeout(timeout, reader.read_line(&mut line)).await {
        Err(_) => Err(TransportError::Timeout(format!(
            "{what} not received within {} ms",
            timeout.as_millis()
        ))),
        Ok(Err(e)) => Err(TransportError::Transport(format!("reading {what} failed: {e}"))),
        Ok(Ok(0)) => Err(TransportError::Transport(format!(
            "connection closed before {what}"
        ))),
        Ok(Ok(_)) => Ok(line),
    }
}

fn parse_response(line: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(line.trim())
        .map_err(|e| TransportError::Transport(format!("malformed response: {e}")))?;
    if !value.is_object() {
        return Err(TransportError::Transport(format!(
            "response is not a JSON object: {}",
            line.trim()
        )));
    }
    Ok(value)
}
