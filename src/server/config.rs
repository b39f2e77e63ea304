//! Application configuration types
//!
//! Sections map one-to-one onto `config/default.toml`. Library crates own
//! their own config structs; this module only assembles them.

use serde::{Deserialize, Serialize};
use sirenbus_bus::{ArbiterConfig, DriverConfig};
use sirenbus_core::{PlayerConfig, TelemetryConfig};
use sirenbus_ipc::{TransportConfig, WorkerConfig};
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding `sirenbus.db`; defaults to the platform data dir
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub arbiter: ArbiterConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Resolved data directory
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .as_ref()
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir)
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("sirenbus"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// Where the shared bus queue lives
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
}

/// Bus queue backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// Tables in `data_dir/sirenbus.db`, shared by every process on the host
    #[default]
    Sqlite,
    /// Redis server at `redis.url`, shared across hosts
    Redis,
    /// Private to one process; no exclusion between CLI invocations
    Memory,
}

/// Redis connection for the `redis` queue backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "sirenbus:bus:".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            key_prefix: default_key_prefix(),
        }
    }
}

/// Log output settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// JSON lines instead of the human-readable format
    #[serde(default)]
    pub json: bool,
    /// Also write daily-rolling log files here
    #[serde(default)]
    pub directory: Option<String>,
}
