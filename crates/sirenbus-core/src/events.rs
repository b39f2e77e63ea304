//! EventBus - live feed of telemetry entries
//!
//! Storage stays authoritative; the bus only serves in-process subscribers
//! (e.g. a status display). Slow subscribers lag and miss entries instead
//! of blocking the publisher.

use crate::types::TelemetryEntry;
use tokio::sync::broadcast;

/// Broadcast channel of freshly recorded telemetry
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TelemetryEntry>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` entries per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every entry published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEntry> {
        self.sender.subscribe()
    }

    /// Publish to all subscribers; returns how many received it
    pub fn publish(&self, entry: TelemetryEntry) -> usize {
        // no receivers is not an error
        self.sender.send(entry).unwrap_or(0)
    }

    /// Number of active subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn entry(kind: &str) -> TelemetryEntry {
        TelemetryEntry {
            id: 1,
            kind: kind.to_string(),
            session_id: None,
            playlist_id: None,
            payload: json!({}),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.publish(entry("stream_started")), 2);
        assert_eq!(rx1.recv().await.unwrap().kind, "stream_started");
        assert_eq!(rx2.recv().await.unwrap().kind, "stream_started");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(entry("stream_stopped")), 0);
    }
}
