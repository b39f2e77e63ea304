//! Playlist sequencer
//!
//! Plays a stored playlist through one broadcast session. Cancellation is
//! cooperative: the live playlist status is re-read before every item, so
//! an operator cancel takes effect at the next item boundary and an item
//! already playing always runs to completion.

use crate::error::{Error, Result};
use crate::orchestrator::Orchestrator;
use crate::player::Player;
use crate::store::BroadcastStore;
use crate::types::{
    BroadcastSession, Playlist, PlaylistInput, PlaylistStatus, StartRequest, TelemetryKind,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Stop reason when an operator cancelled the playlist
pub const REASON_CANCELLED: &str = "playlist_cancelled";
/// Stop reason after the first playback failure
pub const REASON_FAILED: &str = "playlist_failed";
/// Stop reason after the last item played
pub const REASON_COMPLETED: &str = "playlist_completed";

/// Priority source used for playlist sessions
const PLAYLIST_SOURCE: &str = "playlist";

/// Creates, cancels and runs playlists
pub struct PlaylistSequencer {
    orchestrator: Arc<Orchestrator>,
    player: Arc<dyn Player>,
}

impl PlaylistSequencer {
    /// Create a sequencer
    pub fn new(orchestrator: Arc<Orchestrator>, player: Arc<dyn Player>) -> Self {
        Self {
            orchestrator,
            player,
        }
    }

    fn store(&self) -> &BroadcastStore {
        self.orchestrator.store()
    }

    /// Persist a new queued playlist with its items
    ///
    /// # Errors
    ///
    /// `InvalidState` for a playlist without items.
    pub async fn create_playlist(&self, input: PlaylistInput) -> Result<Playlist> {
        if input.items.is_empty() {
            return Err(Error::InvalidState("playlist has no items".to_string()));
        }

        let playlist = Playlist::queued(input);
        self.store().create_playlist(&playlist).await?;
        info!(playlist_id = %playlist.id, items = playlist.items.len(), "Playlist queued");
        Ok(playlist)
    }

    /// Operator cancel; only queued or running playlists change.
    ///
    /// Returns whether the status changed.
    pub async fn cancel_playlist(&self, id: Uuid) -> Result<bool> {
        // surface NotFound for unknown ids
        self.store().playlist_status(id).await?;

        let changed = self
            .store()
            .transition_playlist(
                id,
                PlaylistStatus::Cancelled,
                &[PlaylistStatus::Queued, PlaylistStatus::Running],
            )
            .await?;
        if changed {
            info!(playlist_id = %id, "Playlist cancelled");
        }
        Ok(changed)
    }

    /// Stored playlist with items
    pub async fn get_playlist(&self, id: Uuid) -> Result<Playlist> {
        self.store().get_playlist(id).await
    }

    /// Run the playlist as a background job
    pub fn spawn(self: &Arc<Self>, id: Uuid) -> JoinHandle<Result<PlaylistStatus>> {
        let sequencer = self.clone();
        tokio::spawn(async move {
            let result = sequencer.run(id).await;
            if let Err(e) = &result {
                error!(playlist_id = %id, error = %e, "Playlist job failed");
            }
            result
        })
    }

    /// Play the playlist to its end, first failure or cancellation.
    ///
    /// Returns the playlist's final status.
    ///
    /// Session start is idempotent: if another source already has a session
    /// running, the playlist plays into that session and stops it when it
    /// finishes.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the playlist is neither queued nor cancelled; the
    /// orchestrator's error if the session cannot be started.
    pub async fn run(&self, id: Uuid) -> Result<PlaylistStatus> {
        let playlist = self.store().get_playlist(id).await?;

        if playlist.status == PlaylistStatus::Cancelled {
            info!(playlist_id = %id, "Playlist cancelled before start");
            return Ok(PlaylistStatus::Cancelled);
        }

        if !self
            .store()
            .transition_playlist(id, PlaylistStatus::Running, &[PlaylistStatus::Queued])
            .await?
        {
            return match self.store().playlist_status(id).await? {
                PlaylistStatus::Cancelled => Ok(PlaylistStatus::Cancelled),
                other => Err(Error::InvalidState(format!(
                    "playlist {id} is {other}, expected queued"
                ))),
            };
        }

        let request = StartRequest::new(PLAYLIST_SOURCE)
            .with_route(playlist.route.clone())
            .with_zones(playlist.zones.clone())
            .with_options(playlist.options.clone());

        let session = match self.orchestrator.start(request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(playlist_id = %id, error = %e, "Could not start playlist session");
                self.mark(id, PlaylistStatus::Failed).await;
                self.telemetry(
                    TelemetryKind::PlaylistFailed,
                    None,
                    id,
                    json!({"error": e.to_string(), "status": e.status()}),
                )
                .await;
                return Err(e);
            }
        };

        if session.source != PLAYLIST_SOURCE {
            warn!(
                playlist_id = %id,
                session_id = %session.id,
                source = %session.source,
                "Playlist joined a session started by another source; it will be stopped when the playlist ends"
            );
        }

        info!(playlist_id = %id, session_id = %session.id, "Playlist running");

        match self.play_items(&playlist, &session).await {
            Ok(status) => Ok(status),
            Err(e) => {
                if let Err(stop_err) = self.orchestrator.stop(REASON_FAILED).await {
                    warn!(playlist_id = %id, error = %stop_err, "Failed to stop session after error");
                }
                self.mark(id, PlaylistStatus::Failed).await;
                Err(e)
            }
        }
    }

    async fn play_items(&self, playlist: &Playlist, session: &BroadcastSession) -> Result<PlaylistStatus> {
        let id = playlist.id;

        for item in &playlist.items {
            if self.store().playlist_status(id).await? == PlaylistStatus::Cancelled {
                info!(playlist_id = %id, position = item.position, "Playlist cancelled, stopping");
                self.orchestrator.stop(REASON_CANCELLED).await?;
                return Ok(PlaylistStatus::Cancelled);
            }

            let item_info = json!({
                "position": item.position,
                "recording_ref": item.recording_ref,
            });
            self.orchestrator
                .record_telemetry(
                    TelemetryKind::PlaylistItemStarted,
                    Some(session.id),
                    Some(id),
                    item_info.clone(),
                )
                .await?;

            let outcome = self.player.play(item).await;

            if !outcome.success {
                warn!(
                    playlist_id = %id,
                    position = item.position,
                    status = %outcome.status,
                    "Playlist item failed"
                );
                self.orchestrator
                    .record_telemetry(
                        TelemetryKind::PlaylistItemFailed,
                        Some(session.id),
                        Some(id),
                        json!({
                            "position": item.position,
                            "recording_ref": item.recording_ref,
                            "status": outcome.status,
                            "context": outcome.context,
                        }),
                    )
                    .await?;
                self.orchestrator.stop(REASON_FAILED).await?;
                self.mark(id, PlaylistStatus::Failed).await;
                return Ok(PlaylistStatus::Failed);
            }

            self.orchestrator
                .record_telemetry(
                    TelemetryKind::PlaylistItemFinished,
                    Some(session.id),
                    Some(id),
                    json!({
                        "position": item.position,
                        "recording_ref": item.recording_ref,
                        "status": outcome.status,
                        "context": outcome.context,
                    }),
                )
                .await?;
            debug!(playlist_id = %id, position = item.position, "Playlist item finished");

            if item.gap_ms > 0 {
                tokio::time::sleep(Duration::from_millis(item.gap_ms)).await;
            }
        }

        self.orchestrator.stop(REASON_COMPLETED).await?;
        self.mark(id, PlaylistStatus::Completed).await;
        let status = self.store().playlist_status(id).await?;
        info!(playlist_id = %id, status = %status, "Playlist finished");
        Ok(status)
    }

    /// Forward-only transition out of `running`
    async fn mark(&self, id: Uuid, to: PlaylistStatus) {
        match self
            .store()
            .transition_playlist(id, to, &[PlaylistStatus::Running])
            .await
        {
            Ok(true) => debug!(playlist_id = %id, status = %to, "Playlist status updated"),
            Ok(false) => debug!(playlist_id = %id, status = %to, "Playlist no longer running"),
            Err(e) => warn!(playlist_id = %id, error = %e, "Failed to update playlist status"),
        }
    }

    async fn telemetry(
        &self,
        kind: TelemetryKind,
        session_id: Option<Uuid>,
        playlist_id: Uuid,
        payload: serde_json::Value,
    ) {
        if let Err(e) = self
            .orchestrator
            .record_telemetry(kind, session_id, Some(playlist_id), payload)
            .await
        {
            warn!(kind = kind.as_str(), error = %e, "Failed to record telemetry");
        }
    }
}

#[cfg(test)]
mod tests;
