//! Integration tests for Sirenbus
//!
//! These tests wire the crates together the way the binary does:
//! - sirenbus-bus: arbiter over the in-memory queue, noop direction driver
//! - sirenbus-ipc: transport client against a real control server socket
//! - sirenbus-core: orchestrator, control channel, playlist sequencer

#![cfg(unix)]

use serde_json::{json, Value};
use sirenbus_bus::{Arbiter, ArbiterConfig, MemoryQueueStore, NoopDriver, PriorityTable};
use sirenbus_core::{
    ArbitratedDevice, BroadcastStore, CommandPlayer, CommandResult, ControlChannel, Orchestrator,
    PlayerConfig, PlaylistInput, PlaylistItemInput, PlaylistSequencer, PlaylistStatus,
    SimulatedLink, StartRequest, StopOutcome,
};
use sirenbus_ipc::{ControlServer, RequestHandler, TransportClient, TransportConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Harness {
    _dir: TempDir,
    orchestrator: Arc<Orchestrator>,
    recordings: std::path::PathBuf,
    shutdown: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("control.sock");
    let recordings = dir.path().join("recordings");
    std::fs::create_dir_all(&recordings).unwrap();

    // control worker that tracks RUNNING / PAUSED
    let state = Arc::new(Mutex::new("RUNNING"));
    let handler: RequestHandler = Arc::new(move |request: Value| {
        let mut state = state.lock().unwrap();
        match request["command"].as_str() {
            Some("pause_modbus") => *state = "PAUSED",
            Some("resume_modbus") => *state = "RUNNING",
            _ => {}
        }
        json!({"ok": true, "state": *state})
    });
    let shutdown = CancellationToken::new();
    let server = ControlServer::bind(&socket).unwrap();
    tokio::spawn(server.serve(handler, shutdown.clone()));

    let arbiter = Arc::new(
        Arbiter::new(
            Arc::new(MemoryQueueStore::new()),
            ArbiterConfig::default().with_poll_interval(Duration::from_millis(5)),
        )
        .unwrap(),
    );
    let device = ArbitratedDevice::new(
        arbiter,
        Arc::new(NoopDriver::default()),
        Arc::new(SimulatedLink::new()),
    );

    let store = BroadcastStore::from_path(&dir.path().join("sirenbus.db"))
        .await
        .unwrap();
    let transport = TransportClient::new(TransportConfig::for_endpoint(
        socket.display().to_string(),
    ));
    let control = ControlChannel::new(Arc::new(transport), store.clone());
    let orchestrator = Arc::new(
        Orchestrator::new(store, Arc::new(device), PriorityTable::default())
            .with_control_channel(Arc::new(control)),
    );

    Harness {
        _dir: dir,
        orchestrator,
        recordings,
        shutdown,
    }
}

fn sequencer(h: &Harness, script: &str) -> Arc<PlaylistSequencer> {
    let player = CommandPlayer::new(PlayerConfig {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string(), "{file}".to_string()],
        recordings_dir: h.recordings.display().to_string(),
    });
    Arc::new(PlaylistSequencer::new(
        h.orchestrator.clone(),
        Arc::new(player),
    ))
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_session_lifecycle_through_arbitrated_device() {
    let h = harness().await;
    let orch = &h.orchestrator;

    let session = orch
        .start(StartRequest::new("manual").with_zones(vec!["north".to_string()]))
        .await
        .unwrap();
    assert_eq!(session.device_response.as_ref().unwrap()["transmitting"], true);

    let status = orch.status().await.unwrap();
    assert_eq!(status.status, "running");
    assert!(status.device_error.is_none());

    match orch.stop("operator_request").await.unwrap() {
        StopOutcome::Stopped { session: stopped } => assert_eq!(stopped.id, session.id),
        StopOutcome::Idle => panic!("expected a stopped session"),
    }
    assert_eq!(orch.status().await.unwrap().status, "idle");
}

// ============================================================================
// Control channel
// ============================================================================

#[tokio::test]
async fn test_pause_resume_audit_trail() {
    let h = harness().await;
    let orch = &h.orchestrator;

    let paused = orch.pause(Some("maintenance")).await.unwrap();
    assert_eq!(paused.result, CommandResult::Ok);
    assert_eq!(paused.state_after.as_deref(), Some("PAUSED"));

    let again = orch.pause(Some("maintenance")).await.unwrap();
    assert_eq!(again.result, CommandResult::Skipped);

    let resumed = orch.resume(None).await.unwrap();
    assert_eq!(resumed.result, CommandResult::Ok);
    assert_eq!(resumed.state_before.as_deref(), Some("PAUSED"));
    assert_eq!(resumed.state_after.as_deref(), Some("RUNNING"));

    let audit = orch.store().recent_commands(10).await.unwrap();
    assert_eq!(audit.len(), 3);
}

// ============================================================================
// Playlists
// ============================================================================

#[tokio::test]
async fn test_playlist_with_external_player() {
    let h = harness().await;
    std::fs::write(h.recordings.join("gong.wav"), b"RIFF").unwrap();
    std::fs::write(h.recordings.join("notice.wav"), b"RIFF").unwrap();
    let sequencer = sequencer(&h, "test -f \"$0\"");

    let playlist = sequencer
        .create_playlist(PlaylistInput {
            route: vec!["4".to_string()],
            zones: vec!["square".to_string()],
            options: json!({}),
            items: vec![
                PlaylistItemInput::new("gong.wav"),
                PlaylistItemInput::new("notice.wav"),
            ],
        })
        .await
        .unwrap();

    let status = sequencer.run(playlist.id).await.unwrap();
    assert_eq!(status, PlaylistStatus::Completed);

    let kinds: Vec<String> = h
        .orchestrator
        .telemetry(None)
        .await
        .unwrap()
        .into_iter()
        .rev()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            "stream_started",
            "playlist_item_started",
            "playlist_item_finished",
            "playlist_item_started",
            "playlist_item_finished",
            "stream_stopped",
        ]
    );
}

#[tokio::test]
async fn test_playlist_missing_recording_fails() {
    let h = harness().await;
    let sequencer = sequencer(&h, "exit 0");

    let playlist = sequencer
        .create_playlist(PlaylistInput {
            route: vec![],
            zones: vec![],
            options: json!({}),
            items: vec![PlaylistItemInput::new("absent.wav")],
        })
        .await
        .unwrap();

    assert_eq!(
        sequencer.run(playlist.id).await.unwrap(),
        PlaylistStatus::Failed
    );
    assert!(h.orchestrator.store().running_session().await.unwrap().is_none());
}
