use super::*;
use crate::error::DeviceError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

#[derive(Default)]
struct FakeDevice {
    begins: AtomicU32,
    ends: AtomicU32,
    fail_begin: AtomicBool,
    fail_end: AtomicBool,
}

#[async_trait]
impl DeviceCommands for FakeDevice {
    async fn begin_transmission(&self, request: &StartRequest) -> std::result::Result<Value, DeviceError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        // widen the check-then-act window
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(DeviceError::Link("exciter did not acknowledge".to_string()));
        }
        Ok(json!({"ok": true, "zones": request.zones}))
    }

    async fn end_transmission(&self) -> std::result::Result<Value, DeviceError> {
        self.ends.fetch_add(1, Ordering::SeqCst);
        if self.fail_end.load(Ordering::SeqCst) {
            return Err(DeviceError::Busy {
                priority: "stop".to_string(),
                waited_ms: 30_000,
            });
        }
        Ok(json!({"ok": true}))
    }

    async fn read_status(&self) -> std::result::Result<Value, DeviceError> {
        Ok(json!({"ok": true, "transmitting": self.begins.load(Ordering::SeqCst) > self.ends.load(Ordering::SeqCst)}))
    }
}

async fn orchestrator() -> (Arc<Orchestrator>, Arc<FakeDevice>) {
    let device = Arc::new(FakeDevice::default());
    let store = BroadcastStore::in_memory().await.unwrap();
    let orchestrator = Orchestrator::new(store, device.clone(), PriorityTable::default());
    (Arc::new(orchestrator), device)
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let (orch, device) = orchestrator().await;

    let first = orch
        .start(StartRequest::new("manual").with_zones(vec!["z1".to_string()]))
        .await
        .unwrap();
    let second = orch.start(StartRequest::new("plan")).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.zones, vec!["z1"]);
    assert_eq!(device.begins.load(Ordering::SeqCst), 1);
    assert_eq!(orch.store().count_sessions("running").await.unwrap(), 1);

    let telemetry = orch.telemetry(None).await.unwrap();
    assert_eq!(telemetry.len(), 1);
    assert_eq!(telemetry[0].kind, "stream_started");
    assert_eq!(telemetry[0].session_id, Some(first.id));
}

#[tokio::test]
async fn test_concurrent_starts_share_one_session() {
    let (orch, device) = orchestrator().await;

    let a = tokio::spawn({
        let orch = orch.clone();
        async move { orch.start(StartRequest::new("plan")).await }
    });
    let b = tokio::spawn({
        let orch = orch.clone();
        async move { orch.start(StartRequest::new("gsm")).await }
    });
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    assert_eq!(a.id, b.id);
    assert_eq!(device.begins.load(Ordering::SeqCst), 1);
    assert_eq!(orch.store().count_sessions("running").await.unwrap(), 1);
}

#[tokio::test]
async fn test_stop_then_idle() {
    let (orch, device) = orchestrator().await;
    let session = orch.start(StartRequest::new("manual")).await.unwrap();

    let outcome = orch.stop("operator_request").await.unwrap();
    match outcome {
        StopOutcome::Stopped { session: stopped } => {
            assert_eq!(stopped.id, session.id);
            assert_eq!(stopped.status, crate::types::SessionStatus::Stopped);
            assert_eq!(stopped.stop_reason.as_deref(), Some("operator_request"));
            assert!(stopped.stopped_at.is_some());
        }
        StopOutcome::Idle => panic!("expected a stopped session"),
    }

    assert_eq!(orch.stop("again").await.unwrap(), StopOutcome::Idle);
    assert_eq!(device.ends.load(Ordering::SeqCst), 1);

    let stored = orch.store().get_session(session.id).await.unwrap();
    assert_eq!(stored.stop_reason.as_deref(), Some("operator_request"));

    let kinds: Vec<_> = orch
        .telemetry(None)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec!["stream_stopped", "stream_started"]);
}

#[tokio::test]
async fn test_new_session_after_stop() {
    let (orch, _device) = orchestrator().await;
    let first = orch.start(StartRequest::new("manual")).await.unwrap();
    orch.stop("done").await.unwrap();
    let second = orch.start(StartRequest::new("manual")).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(orch.store().count_sessions("stopped").await.unwrap(), 1);
    assert_eq!(orch.store().count_sessions("running").await.unwrap(), 1);
}

#[tokio::test]
async fn test_device_failure_creates_no_session() {
    let (orch, device) = orchestrator().await;
    device.fail_begin.store(true, Ordering::SeqCst);

    let err = orch.start(StartRequest::new("manual")).await.unwrap_err();
    assert!(matches!(err, Error::ControlChannel(_)));
    assert_eq!(err.status(), "control_channel_error");
    assert!(orch.store().running_session().await.unwrap().is_none());
    assert!(orch.telemetry(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_stop_keeps_session_running() {
    let (orch, device) = orchestrator().await;
    let session = orch.start(StartRequest::new("manual")).await.unwrap();
    device.fail_end.store(true, Ordering::SeqCst);

    let err = orch.stop("operator").await.unwrap_err();
    assert_eq!(err.status(), "bus_busy");
    assert_eq!(
        orch.store().running_session().await.unwrap().map(|s| s.id),
        Some(session.id)
    );
}

#[tokio::test]
async fn test_emergency_broadcast_locks_out_lower_priority() {
    let (orch, _device) = orchestrator().await;
    let alert = orch.start(StartRequest::new("jsvv")).await.unwrap();

    let err = orch.start(StartRequest::new("plan")).await.unwrap_err();
    assert!(matches!(err, Error::BroadcastLocked { .. }));
    assert_eq!(err.status(), "jsvv_active");

    // same class joins the running alert
    let joined = orch.start(StartRequest::new("alarm")).await.unwrap();
    assert_eq!(joined.id, alert.id);
}

#[tokio::test]
async fn test_status_reports_session_and_device() {
    let (orch, _device) = orchestrator().await;

    let idle = orch.status().await.unwrap();
    assert_eq!(idle.status, "idle");
    assert!(idle.session.is_none());
    assert_eq!(idle.device.unwrap()["transmitting"], false);

    let session = orch.start(StartRequest::new("manual")).await.unwrap();
    let running = orch.status().await.unwrap();
    assert_eq!(running.status, "running");
    assert_eq!(running.session.unwrap().id, session.id);
    assert_eq!(running.device.unwrap()["transmitting"], true);
}

#[tokio::test]
async fn test_telemetry_published_on_event_bus() {
    let (orch, _device) = orchestrator().await;
    let mut rx = orch.events().subscribe();

    let session = orch.start(StartRequest::new("manual")).await.unwrap();
    let event = rx.recv().await.unwrap();
    assert_eq!(event.kind, "stream_started");
    assert_eq!(event.session_id, Some(session.id));
}

#[tokio::test]
async fn test_telemetry_respects_query_limit() {
    let device = Arc::new(FakeDevice::default());
    let store = BroadcastStore::in_memory().await.unwrap();
    let orch = Orchestrator::new(store, device, PriorityTable::default())
        .with_telemetry_config(TelemetryConfig { query_limit: 2 });

    for _ in 0..2 {
        orch.start(StartRequest::new("manual")).await.unwrap();
        orch.stop("cycle").await.unwrap();
    }

    assert_eq!(orch.telemetry(None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_pause_without_control_channel() {
    let (orch, _device) = orchestrator().await;
    let err = orch.pause(Some("maintenance")).await.unwrap_err();
    assert_eq!(err.status(), "invalid_state");
}
