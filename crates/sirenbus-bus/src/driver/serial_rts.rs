use super::DirectionDriver;
use crate::error::DriverError;
use async_trait::async_trait;
use serialport::SerialPort;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info};

/// Line speed used when opening the port; only the RTS pin is driven.
const BAUD_RATE: u32 = 9_600;

/// Drives the transceiver's DE/RE pins from the RTS line of a serial port.
///
/// The port is opened on first use and kept open until `shutdown`.
pub struct SerialRtsDriver {
    port: PathBuf,
    active_low: bool,
    lead: Duration,
    tail: Duration,
    handle: Mutex<Option<Box<dyn SerialPort>>>,
}

impl SerialRtsDriver {
    /// Create a driver for the given serial device
    pub fn new(port: impl Into<PathBuf>, active_low: bool, lead: Duration, tail: Duration) -> Self {
        Self {
            port: port.into(),
            active_low,
            lead,
            tail,
            handle: Mutex::new(None),
        }
    }

    fn io_error(&self, source: impl Into<std::io::Error>) -> DriverError {
        DriverError::Io {
            target: self.port.display().to_string(),
            source: source.into(),
        }
    }

    fn set_rts(&self, transmit: bool) -> Result<(), DriverError> {
        let mut guard = self
            .handle
            .lock()
            .map_err(|_| DriverError::Unavailable("serial RTS handle poisoned".to_string()))?;

        if guard.is_none() {
            let port = serialport::new(self.port.to_string_lossy(), BAUD_RATE)
                .timeout(Duration::from_millis(100))
                .open()
                .map_err(|e| self.io_error(e))?;
            info!(port = %self.port.display(), "Serial port opened for RTS control");
            *guard = Some(port);
        }

        let Some(port) = guard.as_mut() else {
            return Err(DriverError::Unavailable("serial port not open".to_string()));
        };

        let level = transmit != self.active_low;
        port.write_request_to_send(level)
            .map_err(|e| self.io_error(e))?;

        debug!(port = %self.port.display(), rts = level, "RTS line set");
        Ok(())
    }
}

#[async_trait]
impl DirectionDriver for SerialRtsDriver {
    async fn enter_transmit(&self) -> Result<(), DriverError> {
        self.set_rts(true)?;
        if !self.lead.is_zero() {
            sleep(self.lead).await;
        }
        Ok(())
    }

    async fn enter_receive(&self) -> Result<(), DriverError> {
        if !self.tail.is_zero() {
            sleep(self.tail).await;
        }
        self.set_rts(false)
    }

    async fn shutdown(&self) -> Result<(), DriverError> {
        let opened = self.handle.lock().map(|g| g.is_some()).unwrap_or(false);
        if opened {
            self.set_rts(false)?;
        }
        if let Ok(mut guard) = self.handle.lock() {
            guard.take();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "serial_rts"
    }
}
