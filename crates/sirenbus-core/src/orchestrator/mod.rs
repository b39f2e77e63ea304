//! Broadcast session orchestrator
//!
//! Session lifecycle: (none) → running → stopped. A stopped session is never
//! reused; the next broadcast gets a new record.
//!
//! "At most one running session" is a check-then-act rule enforced here,
//! not by the database, so every session mutation must go through this
//! type. Within one process `start`/`stop` are serialized by a mutex; across
//! processes the device command itself is serialized by the bus arbiter.

use crate::control::{ControlChannel, ControlVerb};
use crate::device::DeviceCommands;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::store::BroadcastStore;
use crate::types::{
    BroadcastSession, BroadcastStatus, ControlChannelCommand, StartRequest, StopOutcome,
    TelemetryEntry, TelemetryKind,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sirenbus_bus::{PriorityClass, PriorityTable};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Telemetry query settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Maximum number of entries returned by a telemetry query
    #[serde(default = "default_query_limit")]
    pub query_limit: i64,
}

fn default_query_limit() -> i64 {
    500
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            query_limit: default_query_limit(),
        }
    }
}

/// Drives broadcast sessions over the device and control channel
pub struct Orchestrator {
    store: BroadcastStore,
    device: Arc<dyn DeviceCommands>,
    control: Option<Arc<ControlChannel>>,
    priorities: PriorityTable,
    events: EventBus,
    telemetry: TelemetryConfig,
    session_lock: Mutex<()>,
}

impl Orchestrator {
    /// Create an orchestrator without a control channel
    pub fn new(
        store: BroadcastStore,
        device: Arc<dyn DeviceCommands>,
        priorities: PriorityTable,
    ) -> Self {
        Self {
            store,
            device,
            control: None,
            priorities,
            events: EventBus::default(),
            telemetry: TelemetryConfig::default(),
            session_lock: Mutex::new(()),
        }
    }

    /// Attach the alternate control path (pause/resume)
    #[must_use]
    pub fn with_control_channel(mut self, control: Arc<ControlChannel>) -> Self {
        self.control = Some(control);
        self
    }

    /// Publish telemetry on a shared event bus
    #[must_use]
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Override telemetry settings
    #[must_use]
    pub fn with_telemetry_config(mut self, telemetry: TelemetryConfig) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Underlying store
    #[must_use]
    pub fn store(&self) -> &BroadcastStore {
        &self.store
    }

    /// Live telemetry feed
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Alternate control path, if configured
    #[must_use]
    pub fn control_channel(&self) -> Option<&ControlChannel> {
        self.control.as_deref()
    }

    /// Start a broadcast, or return the session already running.
    ///
    /// # Errors
    ///
    /// `BroadcastLocked` if a more urgent emergency broadcast is running,
    /// `ControlChannel` if the device refused to start (no session is stored).
    pub async fn start(&self, request: StartRequest) -> Result<BroadcastSession> {
        let _guard = self.session_lock.lock().await;

        if let Some(running) = self.store.running_session().await? {
            let running_class = self.priorities.resolve(&running.source);
            let requested_class = self.priorities.resolve(&request.source);
            if running_class == PriorityClass::Jsvv && running_class.level() < requested_class.level() {
                warn!(
                    session_id = %running.id,
                    requested = %requested_class,
                    "Start refused: emergency broadcast active"
                );
                return Err(Error::BroadcastLocked {
                    class: running_class.to_string(),
                    session_id: running.id.to_string(),
                });
            }
            info!(session_id = %running.id, source = %request.source, "Session already running");
            return Ok(running);
        }

        let response = self.device.begin_transmission(&request).await.map_err(|e| {
            warn!(source = %request.source, error = %e, "Device refused to begin transmission");
            Error::from(e)
        })?;

        let session = BroadcastSession::running(&request, response);
        self.store.insert_session(&session).await?;

        info!(session_id = %session.id, source = %session.source, "Broadcast started");
        self.record(
            TelemetryKind::StreamStarted,
            Some(session.id),
            None,
            json!({
                "source": session.source,
                "route": session.route,
                "zones": session.zones,
            }),
        )
        .await;

        Ok(session)
    }

    /// Stop the running broadcast, or report idle if there is none.
    ///
    /// # Errors
    ///
    /// `ControlChannel` if the device refused to stop; the session stays running.
    pub async fn stop(&self, reason: &str) -> Result<StopOutcome> {
        let _guard = self.session_lock.lock().await;

        let Some(running) = self.store.running_session().await? else {
            info!(reason = %reason, "Stop requested while idle");
            return Ok(StopOutcome::Idle);
        };

        let response = self.device.end_transmission().await.map_err(|e| {
            warn!(session_id = %running.id, error = %e, "Device refused to end transmission");
            Error::from(e)
        })?;

        self.store.stop_session(running.id, reason, Utc::now()).await?;
        let session = self.store.get_session(running.id).await?;

        info!(session_id = %session.id, reason = %reason, "Broadcast stopped");
        self.record(
            TelemetryKind::StreamStopped,
            Some(session.id),
            None,
            json!({"reason": reason, "device_response": response}),
        )
        .await;

        Ok(StopOutcome::Stopped { session })
    }

    /// Running session (or idle) plus the device's own status
    pub async fn status(&self) -> Result<BroadcastStatus> {
        let session = self.store.running_session().await?;
        let (device, device_error) = match self.device.read_status().await {
            Ok(status) => (Some(status), None),
            Err(e) => (None, Some(e.to_string())),
        };

        Ok(BroadcastStatus {
            status: if session.is_some() { "running" } else { "idle" }.to_string(),
            session,
            device,
            device_error,
        })
    }

    /// Most recent telemetry, optionally only entries at or after `since`
    pub async fn telemetry(&self, since: Option<DateTime<Utc>>) -> Result<Vec<TelemetryEntry>> {
        self.store.telemetry(since, self.telemetry.query_limit).await
    }

    /// Pause the transmission hardware through the control channel
    pub async fn pause(&self, reason: Option<&str>) -> Result<ControlChannelCommand> {
        self.control_or_err()?.send(ControlVerb::Pause, reason).await
    }

    /// Resume the transmission hardware through the control channel
    pub async fn resume(&self, reason: Option<&str>) -> Result<ControlChannelCommand> {
        self.control_or_err()?.send(ControlVerb::Resume, reason).await
    }

    /// Append a telemetry entry and publish it
    pub async fn record_telemetry(
        &self,
        kind: TelemetryKind,
        session_id: Option<Uuid>,
        playlist_id: Option<Uuid>,
        payload: Value,
    ) -> Result<TelemetryEntry> {
        let entry = self
            .store
            .append_telemetry(kind, session_id, playlist_id, payload)
            .await?;
        self.events.publish(entry.clone());
        Ok(entry)
    }

    /// Telemetry for an already committed change; failures are only logged
    async fn record(
        &self,
        kind: TelemetryKind,
        session_id: Option<Uuid>,
        playlist_id: Option<Uuid>,
        payload: Value,
    ) {
        if let Err(e) = self
            .record_telemetry(kind, session_id, playlist_id, payload)
            .await
        {
            warn!(kind = kind.as_str(), error = %e, "Failed to record telemetry");
        }
    }

    fn control_or_err(&self) -> Result<&ControlChannel> {
        self.control
            .as_deref()
            .ok_or_else(|| Error::InvalidState("control channel not configured".to_string()))
    }
}

#[cfg(test)]
mod tests;
