use super::*;
use crate::device::{ArbitratedDevice, DeviceCommands, SimulatedLink};
use crate::error::DeviceError;
use crate::player::PlaybackOutcome;
use crate::types::{PlaylistItem, PlaylistItemInput, SessionStatus, StopOutcome};
use async_trait::async_trait;
use serde_json::Value;
use sirenbus_bus::{Arbiter, ArbiterConfig, MemoryQueueStore, NoopDriver, PriorityTable};
use std::sync::Mutex;

/// Player with scripted per-position outcomes
#[derive(Default)]
struct ScriptedPlayer {
    failing: Vec<i64>,
    played: Mutex<Vec<i64>>,
    /// Cancels this playlist right after the first item plays
    cancel_after_first: Mutex<Option<(BroadcastStore, Uuid)>>,
}

#[async_trait]
impl Player for ScriptedPlayer {
    async fn play(&self, item: &PlaylistItem) -> PlaybackOutcome {
        self.played.lock().unwrap().push(item.position);

        let cancel = self.cancel_after_first.lock().unwrap().take();
        if let Some((store, id)) = cancel {
            store
                .transition_playlist(
                    id,
                    PlaylistStatus::Cancelled,
                    &[PlaylistStatus::Queued, PlaylistStatus::Running],
                )
                .await
                .unwrap();
        }

        if self.failing.contains(&item.position) {
            PlaybackOutcome::failed("player_failed", json!({"exit_code": 1}))
        } else {
            PlaybackOutcome::played(json!({"exit_code": 0}))
        }
    }
}

struct RefusingDevice;

#[async_trait]
impl DeviceCommands for RefusingDevice {
    async fn begin_transmission(&self, _request: &StartRequest) -> std::result::Result<Value, DeviceError> {
        Err(DeviceError::Link("amplifier fault".to_string()))
    }

    async fn end_transmission(&self) -> std::result::Result<Value, DeviceError> {
        Ok(json!({"ok": true}))
    }

    async fn read_status(&self) -> std::result::Result<Value, DeviceError> {
        Ok(json!({"ok": false}))
    }
}

async fn simulated_orchestrator() -> Arc<Orchestrator> {
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
    let store = BroadcastStore::in_memory().await.unwrap();
    Arc::new(Orchestrator::new(store, Arc::new(device), PriorityTable::default()))
}

fn two_items() -> PlaylistInput {
    PlaylistInput {
        route: vec!["10".to_string()],
        zones: vec!["centre".to_string()],
        options: json!({}),
        items: vec![PlaylistItemInput::new("first.wav"), PlaylistItemInput::new("second.wav")],
    }
}

async fn kinds(orch: &Orchestrator, playlist_id: Uuid) -> Vec<String> {
    let mut entries: Vec<_> = orch
        .telemetry(None)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.playlist_id == Some(playlist_id))
        .collect();
    entries.sort_by_key(|e| e.id);
    entries.into_iter().map(|e| e.kind).collect()
}

async fn last_session(orch: &Orchestrator) -> crate::types::BroadcastSession {
    let entry = orch
        .telemetry(None)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.kind == "stream_stopped")
        .expect("a stopped session");
    orch.store()
        .get_session(entry.session_id.unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_all_items_played_completes_playlist() {
    let orch = simulated_orchestrator().await;
    let player = Arc::new(ScriptedPlayer::default());
    let sequencer = PlaylistSequencer::new(orch.clone(), player.clone());

    let playlist = sequencer.create_playlist(two_items()).await.unwrap();
    let status = sequencer.run(playlist.id).await.unwrap();

    assert_eq!(status, PlaylistStatus::Completed);
    assert_eq!(*player.played.lock().unwrap(), vec![0, 1]);
    assert_eq!(
        kinds(&orch, playlist.id).await,
        vec![
            "playlist_item_started",
            "playlist_item_finished",
            "playlist_item_started",
            "playlist_item_finished",
        ]
    );

    let session = last_session(&orch).await;
    assert_eq!(session.status, SessionStatus::Stopped);
    assert_eq!(session.stop_reason.as_deref(), Some(REASON_COMPLETED));
    assert_eq!(session.route, vec!["10"]);
}

#[tokio::test]
async fn test_first_failure_stops_playlist() {
    let orch = simulated_orchestrator().await;
    let player = Arc::new(ScriptedPlayer {
        failing: vec![0],
        ..Default::default()
    });
    let sequencer = PlaylistSequencer::new(orch.clone(), player.clone());

    let playlist = sequencer.create_playlist(two_items()).await.unwrap();
    let status = sequencer.run(playlist.id).await.unwrap();

    assert_eq!(status, PlaylistStatus::Failed);
    assert_eq!(
        orch.store().playlist_status(playlist.id).await.unwrap(),
        PlaylistStatus::Failed
    );
    assert_eq!(*player.played.lock().unwrap(), vec![0]);
    assert_eq!(
        kinds(&orch, playlist.id).await,
        vec!["playlist_item_started", "playlist_item_failed"]
    );
    assert_eq!(
        last_session(&orch).await.stop_reason.as_deref(),
        Some(REASON_FAILED)
    );
    assert_eq!(orch.stop("after").await.unwrap(), StopOutcome::Idle);
}

#[tokio::test]
async fn test_cancel_between_items() {
    let orch = simulated_orchestrator().await;
    let player = Arc::new(ScriptedPlayer::default());
    let sequencer = PlaylistSequencer::new(orch.clone(), player.clone());

    let playlist = sequencer.create_playlist(two_items()).await.unwrap();
    *player.cancel_after_first.lock().unwrap() = Some((orch.store().clone(), playlist.id));

    let status = sequencer.run(playlist.id).await.unwrap();

    assert_eq!(status, PlaylistStatus::Cancelled);
    assert_eq!(
        orch.store().playlist_status(playlist.id).await.unwrap(),
        PlaylistStatus::Cancelled
    );
    // the in-flight item finished, the next one never started
    assert_eq!(*player.played.lock().unwrap(), vec![0]);
    assert_eq!(
        kinds(&orch, playlist.id).await,
        vec!["playlist_item_started", "playlist_item_finished"]
    );
    assert_eq!(
        last_session(&orch).await.stop_reason.as_deref(),
        Some(REASON_CANCELLED)
    );
}

#[tokio::test]
async fn test_cancelled_before_start_has_no_side_effects() {
    let orch = simulated_orchestrator().await;
    let player = Arc::new(ScriptedPlayer::default());
    let sequencer = PlaylistSequencer::new(orch.clone(), player.clone());

    let playlist = sequencer.create_playlist(two_items()).await.unwrap();
    assert!(sequencer.cancel_playlist(playlist.id).await.unwrap());

    let status = sequencer.run(playlist.id).await.unwrap();

    assert_eq!(status, PlaylistStatus::Cancelled);
    assert!(player.played.lock().unwrap().is_empty());
    assert!(orch.telemetry(None).await.unwrap().is_empty());
    assert_eq!(orch.store().count_sessions("running").await.unwrap(), 0);
    assert_eq!(orch.store().count_sessions("stopped").await.unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_only_from_queued_or_running() {
    let orch = simulated_orchestrator().await;
    let sequencer = PlaylistSequencer::new(orch.clone(), Arc::new(ScriptedPlayer::default()));

    let playlist = sequencer.create_playlist(two_items()).await.unwrap();
    sequencer.run(playlist.id).await.unwrap();

    assert!(!sequencer.cancel_playlist(playlist.id).await.unwrap());
    assert_eq!(
        sequencer.get_playlist(playlist.id).await.unwrap().status,
        PlaylistStatus::Completed
    );

    let err = sequencer.cancel_playlist(Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.status(), "not_found");
}

#[tokio::test]
async fn test_rerun_of_finished_playlist_is_rejected() {
    let orch = simulated_orchestrator().await;
    let sequencer = PlaylistSequencer::new(orch.clone(), Arc::new(ScriptedPlayer::default()));

    let playlist = sequencer.create_playlist(two_items()).await.unwrap();
    sequencer.run(playlist.id).await.unwrap();

    let err = sequencer.run(playlist.id).await.unwrap_err();
    assert_eq!(err.status(), "invalid_state");
}

#[tokio::test]
async fn test_session_start_failure_marks_playlist_failed() {
    let store = BroadcastStore::in_memory().await.unwrap();
    let orch = Arc::new(Orchestrator::new(
        store,
        Arc::new(RefusingDevice),
        PriorityTable::default(),
    ));
    let player = Arc::new(ScriptedPlayer::default());
    let sequencer = PlaylistSequencer::new(orch.clone(), player.clone());

    let playlist = sequencer.create_playlist(two_items()).await.unwrap();
    let err = sequencer.run(playlist.id).await.unwrap_err();

    assert_eq!(err.status(), "control_channel_error");
    assert_eq!(
        orch.store().playlist_status(playlist.id).await.unwrap(),
        PlaylistStatus::Failed
    );
    assert!(player.played.lock().unwrap().is_empty());
    assert_eq!(kinds(&orch, playlist.id).await, vec!["playlist_failed"]);
}

#[tokio::test]
async fn test_empty_playlist_rejected() {
    let orch = simulated_orchestrator().await;
    let sequencer = PlaylistSequencer::new(orch, Arc::new(ScriptedPlayer::default()));

    let mut input = two_items();
    input.items.clear();
    let err = sequencer.create_playlist(input).await.unwrap_err();
    assert_eq!(err.status(), "invalid_state");
}

#[tokio::test]
async fn test_spawned_job_reports_final_status() {
    let orch = simulated_orchestrator().await;
    let sequencer = Arc::new(PlaylistSequencer::new(
        orch,
        Arc::new(ScriptedPlayer::default()),
    ));

    let mut input = two_items();
    input.items[0].gap_ms = 20;
    let playlist = sequencer.create_playlist(input).await.unwrap();

    let status = sequencer.spawn(playlist.id).await.unwrap().unwrap();
    assert_eq!(status, PlaylistStatus::Completed);
}

#[tokio::test]
async fn test_playlist_joins_running_session_and_stops_it() {
    let orch = simulated_orchestrator().await;
    let manual = orch.start(StartRequest::new("manual")).await.unwrap();
    let sequencer = PlaylistSequencer::new(orch.clone(), Arc::new(ScriptedPlayer::default()));

    let playlist = sequencer.create_playlist(two_items()).await.unwrap();
    let status = sequencer.run(playlist.id).await.unwrap();

    assert_eq!(status, PlaylistStatus::Completed);
    let session = orch.store().get_session(manual.id).await.unwrap();
    assert_eq!(session.source, "manual");
    assert_eq!(session.status, SessionStatus::Stopped);
    assert_eq!(session.stop_reason.as_deref(), Some(REASON_COMPLETED));
    assert_eq!(orch.store().count_sessions("stopped").await.unwrap(), 1);
}
