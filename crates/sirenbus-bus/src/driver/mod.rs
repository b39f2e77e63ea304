//! Transceiver direction switching
//!
//! The bus is half-duplex: before writing, the transceiver must be switched
//! to transmit, and back to receive afterwards (or before polling status).
//! Three interchangeable drivers are selected by static configuration.

mod gpio;
mod noop;
mod serial_rts;

pub use gpio::GpioDriver;
pub use noop::NoopDriver;
pub use serial_rts::SerialRtsDriver;

use crate::error::DriverError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Switches the bus transceiver between transmit and receive
#[async_trait]
pub trait DirectionDriver: Send + Sync {
    /// Switch to transmit, then wait the lead delay
    async fn enter_transmit(&self) -> Result<(), DriverError>;

    /// Wait the tail delay, then switch to receive
    async fn enter_receive(&self) -> Result<(), DriverError>;

    /// Leave the line in receive and release the device
    async fn shutdown(&self) -> Result<(), DriverError>;

    /// Driver name (for logging)
    fn name(&self) -> &str;
}

/// Driver selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// No direction control (auto-direction transceiver)
    #[default]
    Noop,
    /// GPIO line toggled through its sysfs value file
    Gpio,
    /// RTS pin of a serial port
    SerialRts,
}

/// Driver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Driver kind
    #[serde(default)]
    pub kind: DriverKind,
    /// GPIO value file, e.g. `/sys/class/gpio/gpio17/value`
    #[serde(default)]
    pub gpio_value_path: Option<String>,
    /// Serial device, e.g. `/dev/ttyUSB0`
    #[serde(default)]
    pub serial_port: Option<String>,
    /// Invert the line level (transmit = low)
    #[serde(default)]
    pub active_low: bool,
    /// Settling time after switching to transmit
    #[serde(default)]
    pub lead_ms: u64,
    /// Settling time before switching back to receive
    #[serde(default)]
    pub tail_ms: u64,
}

impl DriverConfig {
    fn lead(&self) -> Duration {
        Duration::from_millis(self.lead_ms)
    }

    fn tail(&self) -> Duration {
        Duration::from_millis(self.tail_ms)
    }
}

/// Build the configured driver
///
/// # Errors
///
/// Returns `DriverError::InvalidConfig` when the selected kind lacks its
/// device path.
pub fn build_driver(config: &DriverConfig) -> Result<Arc<dyn DirectionDriver>, DriverError> {
    match config.kind {
        DriverKind::Noop => Ok(Arc::new(NoopDriver::new(config.lead(), config.tail()))),
        DriverKind::Gpio => {
            let path = config.gpio_value_path.as_deref().ok_or_else(|| {
                DriverError::InvalidConfig("gpio driver requires gpio_value_path".to_string())
            })?;
            Ok(Arc::new(GpioDriver::new(
                path,
                config.active_low,
                config.lead(),
                config.tail(),
            )))
        }
        DriverKind::SerialRts => {
            let port = config.serial_port.as_deref().ok_or_else(|| {
                DriverError::InvalidConfig("serial_rts driver requires serial_port".to_string())
            })?;
            Ok(Arc::new(SerialRtsDriver::new(
                port,
                config.active_low,
                config.lead(),
                config.tail(),
            )))
        }
    }
}

#[cfg(test)]
mod tests;
