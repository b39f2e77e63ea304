//! Worker process supervisor
//!
//! Lazily starts the control worker behind the transport socket. Liveness
//! is inferred from the socket file alone: a crashed worker that left its
//! socket behind looks healthy here and surfaces as an ordinary transport
//! error on connect.

use crate::error::{Result, TransportError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Worker launch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Start the worker automatically when the socket is absent
    #[serde(default = "default_autostart")]
    pub autostart: bool,
    /// Program to execute (interpreter or worker binary)
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Worker script passed as first argument; empty to omit
    #[serde(default)]
    pub script: String,
    /// File receiving the worker's stdout and stderr (appended)
    #[serde(default = "default_log_path")]
    pub log_path: String,
    /// How long to wait for the socket to appear
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Delay between socket checks during startup
    #[serde(default = "default_startup_poll_ms")]
    pub startup_poll_ms: u64,
}

fn default_autostart() -> bool {
    true
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_log_path() -> String {
    "logs/control-worker.log".to_string()
}

fn default_startup_timeout_ms() -> u64 {
    5_000
}

fn default_startup_poll_ms() -> u64 {
    100
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            autostart: default_autostart(),
            interpreter: default_interpreter(),
            script: String::new(),
            log_path: default_log_path(),
            startup_timeout_ms: default_startup_timeout_ms(),
            startup_poll_ms: default_startup_poll_ms(),
        }
    }
}

/// Fully resolved launch command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program to execute
    pub program: String,
    /// Arguments: `[script] --endpoint <endpoint>`
    pub args: Vec<String>,
    /// Socket path the worker must create
    pub endpoint: PathBuf,
    /// Log file for stdout/stderr
    pub log_path: PathBuf,
}

/// Starts the worker process
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Launch the worker detached; must not wait for it to become ready
    async fn launch(&self, spec: &LaunchSpec) -> Result<()>;
}

/// Launches the worker as a detached OS process
#[derive(Debug, Default)]
pub struct ProcessLauncher;

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<()> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_path)
            .map_err(|e| {
                TransportError::WorkerSpawn(format!(
                    "cannot open log {}: {e}",
                    spec.log_path.display()
                ))
            })?;
        let log_err = log
            .try_clone()
            .map_err(|e| TransportError::WorkerSpawn(format!("cannot clone log handle: {e}")))?;

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(false);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            TransportError::WorkerSpawn(format!("cannot launch {}: {e}", spec.program))
        })?;

        info!(program = %spec.program, pid = ?child.id(), "Control worker launched");

        // reap the child so an early exit does not linger as a zombie
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!(status = %status, "Control worker exited"),
                Err(e) => warn!(error = %e, "Failed to wait for control worker"),
            }
        });

        Ok(())
    }
}

/// Ensures the control worker is running
pub struct WorkerSupervisor {
    endpoint: PathBuf,
    config: WorkerConfig,
    launcher: Arc<dyn WorkerLauncher>,
    startup: Mutex<()>,
}

impl WorkerSupervisor {
    /// Create a supervisor that launches OS processes
    pub fn new(endpoint: impl Into<PathBuf>, config: WorkerConfig) -> Self {
        Self::with_launcher(endpoint, config, Arc::new(ProcessLauncher))
    }

    /// Create a supervisor with a custom launcher
    pub fn with_launcher(
        endpoint: impl Into<PathBuf>,
        config: WorkerConfig,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            launcher,
            startup: Mutex::new(()),
        }
    }

    /// Socket path watched by this supervisor
    #[must_use]
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Launch command derived from configuration
    #[must_use]
    pub fn launch_spec(&self) -> LaunchSpec {
        let mut args = Vec::with_capacity(3);
        if !self.config.script.is_empty() {
            args.push(self.config.script.clone());
        }
        args.push("--endpoint".to_string());
        args.push(self.endpoint.display().to_string());

        LaunchSpec {
            program: self.config.interpreter.clone(),
            args,
            endpoint: self.endpoint.clone(),
            log_path: PathBuf::from(&self.config.log_path),
        }
    }

    /// Make sure the worker socket exists, launching the worker if needed.
    ///
    /// Idempotent and cheap when the socket file is present.
    ///
    /// # Errors
    ///
    /// `WorkerSpawn` if directories or the process cannot be created,
    /// `WorkerStartupTimeout` if the socket does not appear in time.
    pub async fn ensure_online(&self) -> Result<()> {
        if self.endpoint.exists() {
            return Ok(());
        }

        // one launch at a time within this process
        let _startup = self.startup.lock().await;
        if self.endpoint.exists() {
            debug!(endpoint = %self.endpoint.display(), "Worker came up while waiting");
            return Ok(());
        }

        let spec = self.launch_spec();
        prepare_parent(&spec.endpoint)?;
        prepare_parent(&spec.log_path)?;

        info!(
            endpoint = %spec.endpoint.display(),
            program = %spec.program,
            "Control worker socket absent, starting worker"
        );
        self.launcher.launch(&spec).await?;

        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.startup_timeout_ms);
        let poll = Duration::from_millis(self.config.startup_poll_ms.max(1));

        loop {
            if self.endpoint.exists() {
                info!(
                    endpoint = %self.endpoint.display(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Control worker online"
                );
                return Ok(());
            }
            if started.elapsed() >= timeout {
                warn!(endpoint = %self.endpoint.display(), "Control worker startup timed out");
                return Err(TransportError::WorkerStartupTimeout {
                    endpoint: self.endpoint.display().to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                    log_path: spec.log_path.display().to_string(),
                });
            }
            sleep(poll).await;
        }
    }
}

fn prepare_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| {
                TransportError::WorkerSpawn(format!(
                    "cannot create directory {}: {e}",
                    parent.display()
                ))
            }),
        _ => Ok(()),
    }
}
