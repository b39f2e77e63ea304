//! Control channel - audited alternate control path
//!
//! Sends `<verb>_modbus` commands to the control worker through the IPC
//! transport and writes one `ControlChannelCommand` row per attempt. It does
//! not take the bus arbiter: the worker owns its own hardware access.

use crate::error::Result;
use crate::store::BroadcastStore;
use crate::types::{CommandResult, ControlChannelCommand};
use chrono::Utc;
use serde_json::{json, Value};
use sirenbus_ipc::TransportClient;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Commands understood by the control worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlVerb {
    /// Pause the transmission hardware
    Pause,
    /// Resume after a pause
    Resume,
    /// Stop the transmission hardware
    Stop,
    /// Query the worker state
    Status,
}

impl ControlVerb {
    /// Wire command name
    #[must_use]
    pub fn command(self) -> &'static str {
        match self {
            Self::Pause => "pause_modbus",
            Self::Resume => "resume_modbus",
            Self::Stop => "stop_modbus",
            Self::Status => "status_modbus",
        }
    }

    /// State in which sending this verb would be a no-op
    fn already_in(self) -> Option<&'static str> {
        match self {
            Self::Pause => Some("PAUSED"),
            Self::Resume => Some("RUNNING"),
            Self::Stop | Self::Status => None,
        }
    }
}

impl fmt::Display for ControlVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

impl FromStr for ControlVerb {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().trim_end_matches("_modbus") {
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "stop" => Ok(Self::Stop),
            "status" => Ok(Self::Status),
            other => Err(format!("unknown control verb: {other}")),
        }
    }
}

/// Audited client of the control worker
pub struct ControlChannel {
    transport: Arc<TransportClient>,
    store: BroadcastStore,
}

impl ControlChannel {
    /// Create a control channel
    pub fn new(transport: Arc<TransportClient>, store: BroadcastStore) -> Self {
        Self { transport, store }
    }

    /// Send `verb`, skipping it when the last known state already matches.
    ///
    /// # Errors
    ///
    /// Transport failures are recorded as `TIMEOUT`/`ERROR` rows and returned.
    pub async fn send(&self, verb: ControlVerb, reason: Option<&str>) -> Result<ControlChannelCommand> {
        let state_before = self.store.last_known_state().await?;

        if let (Some(noop_state), Some(current)) = (verb.already_in(), state_before.as_deref()) {
            if current.eq_ignore_ascii_case(noop_state) {
                let record = ControlChannelCommand {
                    command: verb.command().to_string(),
                    state_before: state_before.clone(),
                    state_after: state_before.clone(),
                    reason: reason.map(str::to_string),
                    result: CommandResult::Skipped,
                    payload: json!({"skipped": true, "state": current}),
                    issued_at: Utc::now(),
                };
                self.store.record_command(&record).await?;
                info!(command = %verb, state = %current, "Control command skipped");
                return Ok(record);
            }
        }

        let request = json!({"command": verb.command(), "reason": reason});
        self.exchange(request, state_before, reason).await
    }

    /// Send an arbitrary request object, audited like any other command
    ///
    /// # Errors
    ///
    /// Transport failures are recorded and returned.
    pub async fn send_raw(&self, request: Value, reason: Option<&str>) -> Result<ControlChannelCommand> {
        let state_before = self.store.last_known_state().await?;
        self.exchange(request, state_before, reason).await
    }

    async fn exchange(
        &self,
        request: Value,
        state_before: Option<String>,
        reason: Option<&str>,
    ) -> Result<ControlChannelCommand> {
        let command = request
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or("raw")
            .to_string();
        let issued_at = Utc::now();

        match self.transport.send(&request).await {
            Ok(response) => {
                let state_after = response
                    .get("state")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let result = if response.get("ok") == Some(&Value::Bool(false)) {
                    CommandResult::Error
                } else {
                    CommandResult::Ok
                };

                let record = ControlChannelCommand {
                    command,
                    state_before,
                    state_after,
                    reason: reason.map(str::to_string),
                    result,
                    payload: response,
                    issued_at,
                };
                self.store.record_command(&record).await?;
                info!(
                    command = %record.command,
                    result = record.result.as_str(),
                    state = ?record.state_after,
                    "Control command answered"
                );
                Ok(record)
            }
            Err(e) => {
                let result = if e.is_timeout() {
                    CommandResult::Timeout
                } else {
                    CommandResult::Error
                };
                let record = ControlChannelCommand {
                    command,
                    state_before,
                    state_after: None,
                    reason: reason.map(str::to_string),
                    result,
                    payload: json!({"error": e.to_string()}),
                    issued_at,
                };
                if let Err(store_err) = self.store.record_command(&record).await {
                    warn!(error = %store_err, "Failed to audit control command");
                }
                warn!(command = %record.command, error = %e, "Control command failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use sirenbus_ipc::{ControlServer, TransportConfig};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    async fn channel_with_worker(
        dir: &TempDir,
    ) -> (ControlChannel, BroadcastStore, Arc<AtomicU32>, CancellationToken) {
        let endpoint = dir.path().join("control.sock");
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let server = ControlServer::bind(&endpoint).unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.serve(
            Arc::new(move |request: Value| {
                counter.fetch_add(1, Ordering::SeqCst);
                let state = match request["command"].as_str() {
                    Some("pause_modbus") => "PAUSED",
                    Some("stop_modbus") => "STOPPED",
                    _ => "RUNNING",
                };
                json!({"ok": true, "state": state})
            }),
            shutdown.clone(),
        ));

        let store = BroadcastStore::in_memory().await.unwrap();
        let transport = TransportClient::new(TransportConfig {
            endpoint: endpoint.display().to_string(),
            attempts: 1,
            ..Default::default()
        });
        (
            ControlChannel::new(Arc::new(transport), store.clone()),
            store,
            calls,
            shutdown,
        )
    }

    #[test]
    fn test_verb_parsing() {
        assert_eq!("pause".parse::<ControlVerb>().unwrap(), ControlVerb::Pause);
        assert_eq!("STOP_MODBUS".parse::<ControlVerb>().unwrap(), ControlVerb::Stop);
        assert!("reboot".parse::<ControlVerb>().is_err());
    }

    #[tokio::test]
    async fn test_pause_records_state_transition() {
        let dir = TempDir::new().unwrap();
        let (channel, store, calls, shutdown) = channel_with_worker(&dir).await;

        let first = channel.send(ControlVerb::Pause, Some("maintenance")).await.unwrap();
        assert_eq!(first.result, CommandResult::Ok);
        assert_eq!(first.state_before, None);
        assert_eq!(first.state_after.as_deref(), Some("PAUSED"));

        let resumed = channel.send(ControlVerb::Resume, None).await.unwrap();
        assert_eq!(resumed.state_before.as_deref(), Some("PAUSED"));
        assert_eq!(resumed.state_after.as_deref(), Some("RUNNING"));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.recent_commands(10).await.unwrap().len(), 2);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_redundant_pause_is_skipped() {
        let dir = TempDir::new().unwrap();
        let (channel, store, calls, shutdown) = channel_with_worker(&dir).await;

        channel.send(ControlVerb::Pause, None).await.unwrap();
        let second = channel.send(ControlVerb::Pause, None).await.unwrap();

        assert_eq!(second.result, CommandResult::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let rows = store.recent_commands(10).await.unwrap();
        assert_eq!(rows[0].result, CommandResult::Skipped);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_unreachable_worker_is_audited_as_error() {
        let dir = TempDir::new().unwrap();
        let store = BroadcastStore::in_memory().await.unwrap();
        let transport = TransportClient::new(TransportConfig {
            endpoint: dir.path().join("absent.sock").display().to_string(),
            attempts: 1,
            ..Default::default()
        });
        let channel = ControlChannel::new(Arc::new(transport), store.clone());

        let err = channel.send(ControlVerb::Stop, Some("test")).await.unwrap_err();
        assert_eq!(err.status(), "transport_error");

        let rows = store.recent_commands(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].command, "stop_modbus");
        assert_eq!(rows[0].result, CommandResult::Error);
    }

    #[tokio::test]
    async fn test_raw_request_uses_its_command_name() {
        let dir = TempDir::new().unwrap();
        let (channel, _store, _calls, shutdown) = channel_with_worker(&dir).await;

        let record = channel
            .send_raw(json!({"command": "stop_modbus", "zone": 3}), None)
            .await
            .unwrap();
        assert_eq!(record.command, "stop_modbus");
        assert_eq!(record.payload, json!({"ok": true, "state": "STOPPED"}));
        shutdown.cancel();
    }
}
