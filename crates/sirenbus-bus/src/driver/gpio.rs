use super::DirectionDriver;
use crate::error::DriverError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Toggles a GPIO line through its sysfs `value` file.
///
/// The line must already be exported and configured as an output.
#[derive(Debug)]
pub struct GpioDriver {
    value_path: PathBuf,
    active_low: bool,
    lead: Duration,
    tail: Duration,
}

impl GpioDriver {
    /// Create a GPIO driver for the given value file
    pub fn new(value_path: impl Into<PathBuf>, active_low: bool, lead: Duration, tail: Duration) -> Self {
        Self {
            value_path: value_path.into(),
            active_low,
            lead,
            tail,
        }
    }

    async fn set_line(&self, transmit: bool) -> Result<(), DriverError> {
        let high = transmit != self.active_low;
        let level = if high { "1" } else { "0" };
        tokio::fs::write(&self.value_path, level)
            .await
            .map_err(|source| DriverError::Io {
                target: self.value_path.display().to_string(),
                source,
            })?;
        debug!(path = %self.value_path.display(), level = level, transmit = transmit, "GPIO line set");
        Ok(())
    }
}

#[async_trait]
impl DirectionDriver for GpioDriver {
    async fn enter_transmit(&self) -> Result<(), DriverError> {
        self.set_line(true).await?;
        if !self.lead.is_zero() {
            sleep(self.lead).await;
        }
        Ok(())
    }

    async fn enter_receive(&self) -> Result<(), DriverError> {
        if !self.tail.is_zero() {
            sleep(self.tail).await;
        }
        self.set_line(false).await
    }

    async fn shutdown(&self) -> Result<(), DriverError> {
        self.set_line(false).await
    }

    fn name(&self) -> &str {
        "gpio"
    }
}
