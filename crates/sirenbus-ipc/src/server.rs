//! Reference control worker endpoint
//!
//! Speaks the same wire protocol the transport client expects: a handshake
//! line on accept, one JSON request line in, one JSON response line out,
//! then the connection is closed.

use crate::error::{Result, TransportError};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Produces the response object for one request object
pub type RequestHandler = Arc<dyn Fn(Value) -> Value + Send + Sync>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Unix-socket server for the control protocol
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    handshake: String,
}

impl ControlServer {
    /// Bind to `path`, replacing a stale socket file left by a previous run
    ///
    /// # Errors
    ///
    /// `Transport` if the directory cannot be created or the bind fails.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                TransportError::Transport(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        if path.exists() {
            debug!(path = %path.display(), "Removing stale control socket");
            std::fs::remove_file(&path).map_err(|e| {
                TransportError::Transport(format!("cannot remove {}: {e}", path.display()))
            })?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| {
            TransportError::Transport(format!("cannot bind {}: {e}", path.display()))
        })?;

        Ok(Self {
            listener,
            path,
            handshake: "READY".to_string(),
        })
    }

    /// Override the handshake line (without the trailing newline)
    #[must_use]
    pub fn with_handshake(mut self, handshake: impl Into<String>) -> Self {
        self.handshake = handshake.into();
        self
    }

    /// Socket path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` fires, then remove the socket file
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept errors are logged and skipped.
    pub async fn serve(self, handler: RequestHandler, shutdown: CancellationToken) -> Result<()> {
        info!(path = %self.path.display(), "Control server listening");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let handler = handler.clone();
                        let handshake = self.handshake.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &handshake, handler).await {
                                debug!(error = %e, "Control connection ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept control connection"),
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Control socket already gone");
        }
        info!(path = %self.path.display(), "Control server stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: UnixStream,
    handshake: &str,
    handler: RequestHandler,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half
        .write_all(format!("{handshake}\n").as_bytes())
        .await?;
    write_half.flush().await?;

    let mut line = String::new();
    let read = match tokio::time::timeout(REQUEST_TIMEOUT, reader.read_line(&mut line)).await {
        Ok(read) => read?,
        Err(_) => return Ok(()),
    };
    if read == 0 {
        return Ok(());
    }

    let response = match serde_json::from_str::<Value>(line.trim()) {
        Ok(request) if request.is_object() => handler(request),
        Ok(_) => json!({"ok": false, "error": "request must be a JSON object"}),
        Err(e) => json!({"ok": false, "error": format!("invalid request: {e}")}),
    };

    let mut payload = serde_json::to_vec(&response)?;
    payload.push(b'\n');
    write_half.write_all(&payload).await?;
    write_half.flush().await
}
