//! Configuration loading
//!
//! Embedded defaults, then optional files, then environment variables.

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    let env = std::env::var("SIRENBUS_ENV").unwrap_or_else(|_| "development".to_string());

    let config = Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{env}")).required(false))
        .add_source(File::with_name("config/local").required(false))
        // SIRENBUS_TRANSPORT__ENDPOINT: single `_` after the prefix, `__` between sections
        .add_source(
            Environment::with_prefix("SIRENBUS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::QueueBackend;
    use sirenbus_bus::{DriverKind, PriorityTable};

    #[test]
    fn test_embedded_defaults_deserialize() {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.queue.backend, QueueBackend::Sqlite);
        assert!(config.redis.url.is_empty());
        assert_eq!(config.driver.kind, DriverKind::Noop);
        assert_eq!(config.transport.attempts, 3);
        assert_eq!(config.transport.handshake_tokens, vec!["READY", "OK", "HELLO"]);
        assert_eq!(config.worker.script, "worker");
        assert_eq!(config.telemetry.query_limit, 500);
        assert!(PriorityTable::from_config(&config.arbiter.priorities).is_ok());
    }
}
