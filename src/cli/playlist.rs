//! `sirenbus playlist` subcommands

use super::{emit, print_json};
use crate::server::Runtime;
use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::json;
use sirenbus_core::PlaylistInput;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

#[derive(Subcommand, Debug)]
pub enum PlaylistCommand {
    /// Queue a playlist described by a JSON file
    Create {
        /// `{"route": [..], "zones": [..], "options": {..}, "items": [..]}`
        file: PathBuf,
        /// Play it right away
        #[arg(long)]
        run: bool,
    },
    /// Play a queued playlist in the foreground
    Run { id: Uuid },
    /// Cancel a queued or running playlist
    Cancel { id: Uuid },
    /// Show a playlist and its items
    Show { id: Uuid },
}

pub async fn run(command: PlaylistCommand, runtime: &Runtime) -> Result<()> {
    let sequencer = &runtime.sequencer;

    match command {
        PlaylistCommand::Create { file, run } => {
            let input = read_input(&file)?;
            let playlist = match sequencer.create_playlist(input).await {
                Ok(playlist) => playlist,
                Err(e) => return emit::<()>(Err(e)),
            };
            if !run {
                return print_json(&playlist);
            }
            info!(playlist_id = %playlist.id, "Running new playlist");
            play(runtime, playlist.id).await
        }
        PlaylistCommand::Run { id } => play(runtime, id).await,
        PlaylistCommand::Cancel { id } => {
            let changed = match sequencer.cancel_playlist(id).await {
                Ok(changed) => changed,
                Err(e) => return emit::<()>(Err(e)),
            };
            let status = sequencer.get_playlist(id).await.map(|p| p.status);
            emit(status.map(|status| json!({"id": id, "cancelled": changed, "status": status})))
        }
        PlaylistCommand::Show { id } => emit(sequencer.get_playlist(id).await),
    }
}

async fn play(runtime: &Runtime, id: Uuid) -> Result<()> {
    if let Err(e) = runtime.sequencer.run(id).await {
        return emit::<()>(Err(e));
    }
    emit(runtime.sequencer.get_playlist(id).await)
}

fn read_input(file: &Path) -> Result<PlaylistInput> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid playlist file {}", file.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_input_applies_item_defaults() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("morning.json");
        std::fs::write(
            &file,
            r#"{"route": ["7"], "zones": ["square"], "items": [{"recording_ref": "gong.wav"}]}"#,
        )
        .unwrap();

        let input = read_input(&file).unwrap();
        assert_eq!(input.route, vec!["7"]);
        assert_eq!(input.items.len(), 1);
        assert_eq!(input.items[0].recording_ref, "gong.wav");
        assert_eq!(input.items[0].gap_ms, 0);
    }

    #[test]
    fn test_read_input_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(read_input(&dir.path().join("absent.json")).is_err());
    }
}
