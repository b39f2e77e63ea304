//! Playback of playlist items
//!
//! A failed playback is a value (`PlaybackOutcome { success: false, .. }`),
//! never an error: the sequencer decides what a failure means.

use crate::types::PlaylistItem;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tracing::{debug, warn};

/// Result of playing one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackOutcome {
    /// Whether the item played completely
    pub success: bool,
    /// Short machine-readable status
    pub status: String,
    /// Details (exit code, timings, ...)
    pub context: Value,
}

impl PlaybackOutcome {
    /// Successful playback
    pub fn played(context: Value) -> Self {
        Self {
            success: true,
            status: "played".to_string(),
            context,
        }
    }

    /// Failed playback
    pub fn failed(status: impl Into<String>, context: Value) -> Self {
        Self {
            success: false,
            status: status.into(),
            context,
        }
    }
}

/// Plays a recording on the running broadcast
#[async_trait]
pub trait Player: Send + Sync {
    /// Play `item` to completion
    async fn play(&self, item: &PlaylistItem) -> PlaybackOutcome;
}

/// External player command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// Program to run
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments; `{file}` and `{gain}` are substituted per item
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Base directory for relative recording references
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: String,
}

fn default_program() -> String {
    "aplay".to_string()
}

fn default_args() -> Vec<String> {
    vec!["-q".to_string(), "{file}".to_string()]
}

fn default_recordings_dir() -> String {
    "recordings".to_string()
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            recordings_dir: default_recordings_dir(),
        }
    }
}

/// Player that runs an external command per item
pub struct CommandPlayer {
    config: PlayerConfig,
}

impl CommandPlayer {
    /// Create a command player
    #[must_use]
    pub fn new(config: PlayerConfig) -> Self {
        Self { config }
    }

    fn resolve(&self, recording_ref: &str) -> PathBuf {
        let path = Path::new(recording_ref);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config.recordings_dir).join(path)
        }
    }

    fn render_args(&self, file: &Path, gain: f64) -> Vec<String> {
        let file = file.display().to_string();
        let gain = gain.to_string();
        self.config
            .args
            .iter()
            .map(|arg| arg.replace("{file}", &file).replace("{gain}", &gain))
            .collect()
    }
}

#[async_trait]
impl Player for CommandPlayer {
    async fn play(&self, item: &PlaylistItem) -> PlaybackOutcome {
        let file = self.resolve(&item.recording_ref);
        if !file.is_file() {
            warn!(file = %file.display(), "Recording not found");
            return PlaybackOutcome::failed(
                "missing_recording",
                json!({"file": file.display().to_string()}),
            );
        }

        let args = self.render_args(&file, item.gain.unwrap_or(1.0));
        debug!(program = %self.config.program, args = ?args, "Starting playback");

        let started = Instant::now();
        let output = tokio::process::Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match output {
            Ok(output) if output.status.success() => PlaybackOutcome::played(json!({
                "file": file.display().to_string(),
                "exit_code": output.status.code(),
                "elapsed_ms": elapsed_ms,
            })),
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                warn!(
                    file = %file.display(),
                    exit_code = ?output.status.code(),
                    "Player exited with failure"
                );
                PlaybackOutcome::failed(
                    "player_failed",
                    json!({
                        "file": file.display().to_string(),
                        "exit_code": output.status.code(),
                        "elapsed_ms": elapsed_ms,
                        "stderr": stderr,
                    }),
                )
            }
            Err(e) => {
                warn!(program = %self.config.program, error = %e, "Player could not be started");
                PlaybackOutcome::failed(
                    "player_unavailable",
                    json!({"program": self.config.program, "error": e.to_string()}),
                )
            }
        }
    }
}
