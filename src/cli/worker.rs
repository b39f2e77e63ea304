//! `sirenbus worker` - reference control worker
//!
//! Serves the control protocol on a Unix socket and keeps a small
//! RUNNING / PAUSED / STOPPED state machine in memory.

use anyhow::Result;
use serde_json::{json, Value};
use std::sync::Mutex;

const RUNNING: &str = "RUNNING";
const PAUSED: &str = "PAUSED";
const STOPPED: &str = "STOPPED";

/// Worker state shared by all connections
#[derive(Debug)]
pub struct WorkerState {
    state: Mutex<&'static str>,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self {
            state: Mutex::new(RUNNING),
        }
    }
}

impl WorkerState {
    /// Apply one request and build its response
    pub fn handle(&self, request: &Value) -> Value {
        let Some(command) = request.get("command").and_then(Value::as_str) else {
            return json!({"ok": false, "error": "missing command"});
        };

        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let current = *state;

        let next = match command {
            "status_modbus" => Ok(current),
            "pause_modbus" if current == STOPPED => Err("cannot pause while STOPPED"),
            "pause_modbus" => Ok(PAUSED),
            "resume_modbus" => Ok(RUNNING),
            "stop_modbus" => Ok(STOPPED),
            _ => Err("unknown command"),
        };

        match next {
            Ok(next) => {
                *state = next;
                json!({"ok": true, "command": command, "state": next, "previous": current})
            }
            Err(error) => json!({"ok": false, "command": command, "state": current, "error": error}),
        }
    }
}

/// Serve until Ctrl-C
#[cfg(unix)]
pub async fn run(endpoint: &str) -> Result<()> {
    use sirenbus_ipc::{ControlServer, RequestHandler};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use tracing::info;

    let server = ControlServer::bind(endpoint)?;
    let state = Arc::new(WorkerState::default());
    let handler: RequestHandler = Arc::new(move |request: Value| state.handle(&request));

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            shutdown.cancel();
        }
    });

    info!(endpoint = %endpoint, "Control worker started");
    server.serve(handler, shutdown).await?;
    Ok(())
}

/// Unix sockets are required
#[cfg(not(unix))]
pub async fn run(_endpoint: &str) -> Result<()> {
    anyhow::bail!("the control worker requires Unix domain sockets")
}
