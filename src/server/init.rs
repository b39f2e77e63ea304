//! Component wiring
//!
//! Builds the bus arbiter, device, control channel, orchestrator and
//! playlist sequencer from an `AppConfig`.

use super::config::{AppConfig, QueueBackend};
use anyhow::{bail, Context, Result};
use sirenbus_bus::{
    build_driver, Arbiter, MemoryQueueStore, PriorityTable, QueueStore, RedisQueueStore,
    SqliteQueueStore,
};
use sirenbus_core::{
    ArbitratedDevice, BroadcastStore, CommandPlayer, ControlChannel, Orchestrator,
    PlaylistSequencer, SimulatedLink,
};
use sirenbus_ipc::{TransportClient, WorkerSupervisor};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the CLI commands operate on
pub struct Runtime {
    pub arbiter: Arc<Arbiter>,
    pub orchestrator: Arc<Orchestrator>,
    pub sequencer: Arc<PlaylistSequencer>,
}

/// Select the bus queue backend
async fn build_queue_store(config: &AppConfig, db_path: &Path) -> Result<Arc<dyn QueueStore>> {
    match config.queue.backend {
        QueueBackend::Sqlite => {
            let store = SqliteQueueStore::from_path(db_path)
                .await
                .context("Failed to initialize SQLite queue store")?;
            info!("Bus queue shared through {}", db_path.display());
            Ok(Arc::new(store))
        }
        QueueBackend::Redis => {
            if config.redis.url.is_empty() {
                bail!("queue.backend = \"redis\" requires redis.url");
            }
            info!(prefix = %config.redis.key_prefix, "Bus queue shared through Redis");
            Ok(Arc::new(
                RedisQueueStore::with_prefix(&config.redis.url, &config.redis.key_prefix)
                    .context("Failed to create Redis queue store")?,
            ))
        }
        QueueBackend::Memory => {
            warn!("Bus queue kept in-process; other sirenbus processes are not excluded from the bus");
            Ok(Arc::new(MemoryQueueStore::new()))
        }
    }
}

/// Initialize all components
pub async fn init(config: &AppConfig) -> Result<Runtime> {
    let data_dir = config.data_dir();
    info!("Data directory: {}", data_dir.display());

    let db_path = data_dir.join("sirenbus.db");
    let store = BroadcastStore::from_path(&db_path)
        .await
        .context("Failed to initialize SQLite broadcast store")?;
    info!("SQLite broadcast store initialized at {}", db_path.display());

    let queue_store = build_queue_store(config, &db_path).await?;

    let arbiter = Arc::new(
        Arbiter::new(queue_store, config.arbiter.clone()).context("Invalid arbiter configuration")?,
    );
    let priorities = PriorityTable::from_config(&config.arbiter.priorities)
        .context("Invalid priority configuration")?;

    let driver = build_driver(&config.driver).context("Failed to build direction driver")?;
    info!(driver = driver.name(), "Direction driver ready");

    let device = ArbitratedDevice::new(arbiter.clone(), driver, Arc::new(SimulatedLink::new()));

    let mut transport = TransportClient::new(config.transport.clone());
    if config.worker.autostart {
        let supervisor = WorkerSupervisor::new(&config.transport.endpoint, config.worker.clone());
        transport = transport.with_supervisor(Arc::new(supervisor));
    }
    let control = ControlChannel::new(Arc::new(transport), store.clone());

    let orchestrator = Arc::new(
        Orchestrator::new(store, Arc::new(device), priorities)
            .with_control_channel(Arc::new(control))
            .with_telemetry_config(config.telemetry.clone()),
    );

    let player = CommandPlayer::new(config.player.clone());
    let sequencer = Arc::new(PlaylistSequencer::new(orchestrator.clone(), Arc::new(player)));

    Ok(Runtime {
        arbiter,
        orchestrator,
        sequencer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sirenbus_bus::ArbiterError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig {
            data_dir: Some(dir.path().display().to_string()),
            ..Default::default()
        };
        config.arbiter.poll_interval_ms = 5;
        config
    }

    #[tokio::test]
    async fn test_runtimes_on_one_data_dir_never_share_the_bus() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let first = init(&config).await.unwrap();
        let second = init(&config).await.unwrap();

        let holders = AtomicUsize::new(0);
        let most = AtomicUsize::new(0);
        let hold = |runtime: &Runtime| {
            let arbiter = runtime.arbiter.clone();
            let holders = &holders;
            let most = &most;
            async move {
                arbiter
                    .push_request("plan", || async {
                        let now = holders.fetch_add(1, Ordering::SeqCst) + 1;
                        most.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        holders.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, ArbiterError>(())
                    })
                    .await
            }
        };

        let (a, b) = tokio::join!(hold(&first), hold(&second));
        a.unwrap();
        b.unwrap();
        assert_eq!(most.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_redis_backend_requires_url() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.queue.backend = QueueBackend::Redis;

        let err = init(&config).await.err().unwrap();
        assert!(err.to_string().contains("redis.url"));
    }
}
