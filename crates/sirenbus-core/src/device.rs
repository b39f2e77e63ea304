//! Device command interface
//!
//! `DeviceCommands` is what the orchestrator drives. `ArbitratedDevice`
//! implements it on top of a raw `DeviceLink` by taking the bus through the
//! arbiter and bracketing every write with the direction driver:
//!
//! ```text
//! begin  : push_request(source)    enter_transmit → link.start → enter_receive
//! end    : push_request("stop")    enter_transmit → link.stop  → enter_receive
//! status : push_request("polling") enter_receive  → link.read_status
//! ```

use crate::error::DeviceError;
use crate::types::StartRequest;
use async_trait::async_trait;
use serde_json::{json, Value};
use sirenbus_bus::{Arbiter, DirectionDriver};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// High-level device commands used by the orchestrator
#[async_trait]
pub trait DeviceCommands: Send + Sync {
    /// Start transmitting to the request's route and zones
    async fn begin_transmission(&self, request: &StartRequest) -> Result<Value, DeviceError>;

    /// Stop transmitting
    async fn end_transmission(&self) -> Result<Value, DeviceError>;

    /// Query the device state
    async fn read_status(&self) -> Result<Value, DeviceError>;
}

/// Register-level primitives of the broadcast hardware
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Write the start command
    async fn start(&self, route: &[String], zones: &[String]) -> Result<Value, DeviceError>;

    /// Write the stop command
    async fn stop(&self) -> Result<Value, DeviceError>;

    /// Read the status registers
    async fn read_status(&self) -> Result<Value, DeviceError>;

    /// Link name for logging
    fn name(&self) -> &str;
}

/// Device commands routed through the bus arbiter
pub struct ArbitratedDevice {
    arbiter: Arc<Arbiter>,
    driver: Arc<dyn DirectionDriver>,
    link: Arc<dyn DeviceLink>,
}

impl ArbitratedDevice {
    /// Wrap `link` with bus arbitration and direction switching
    pub fn new(
        arbiter: Arc<Arbiter>,
        driver: Arc<dyn DirectionDriver>,
        link: Arc<dyn DeviceLink>,
    ) -> Self {
        info!(link = link.name(), driver = driver.name(), "Arbitrated device ready");
        Self {
            arbiter,
            driver,
            link,
        }
    }

    /// Run a write with the transceiver in transmit, always switching back
    async fn transmit<F>(&self, write: F) -> Result<Value, DeviceError>
    where
        F: Future<Output = Result<Value, DeviceError>> + Send,
    {
        self.driver.enter_transmit().await?;
        let result = write.await;
        if let Err(e) = self.driver.enter_receive().await {
            // the write itself already happened; report it as such
            warn!(error = %e, "Failed to switch transceiver back to receive");
        }
        result
    }
}

#[async_trait]
impl DeviceCommands for ArbitratedDevice {
    async fn begin_transmission(&self, request: &StartRequest) -> Result<Value, DeviceError> {
        debug!(source = %request.source, "Begin transmission requested");
        self.arbiter
            .push_request(&request.source, || {
                self.transmit(self.link.start(&request.route, &request.zones))
            })
            .await
    }

    async fn end_transmission(&self) -> Result<Value, DeviceError> {
        self.arbiter
            .push_request("stop", || self.transmit(self.link.stop()))
            .await
    }

    async fn read_status(&self) -> Result<Value, DeviceError> {
        self.arbiter
            .push_request("polling", || async {
                self.driver.enter_receive().await?;
                self.link.read_status().await
            })
            .await
    }
}

/// Stand-in link that only logs and tracks whether it is transmitting
#[derive(Debug, Default)]
pub struct SimulatedLink {
    transmitting: AtomicBool,
}

impl SimulatedLink {
    /// Create an idle simulated link
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceLink for SimulatedLink {
    async fn start(&self, route: &[String], zones: &[String]) -> Result<Value, DeviceError> {
        self.transmitting.store(true, Ordering::SeqCst);
        info!(route = ?route, zones = ?zones, "Simulated device: transmission started");
        Ok(json!({"ok": true, "transmitting": true, "route": route, "zones": zones}))
    }

    async fn stop(&self) -> Result<Value, DeviceError> {
        self.transmitting.store(false, Ordering::SeqCst);
        info!("Simulated device: transmission stopped");
        Ok(json!({"ok": true, "transmitting": false}))
    }

    async fn read_status(&self) -> Result<Value, DeviceError> {
        Ok(json!({
            "ok": true,
            "transmitting": self.transmitting.load(Ordering::SeqCst),
        }))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
