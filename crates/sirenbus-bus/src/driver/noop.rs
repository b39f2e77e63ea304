use super::DirectionDriver;
use crate::error::DriverError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::trace;

/// Driver for transceivers that switch direction on their own.
///
/// Still honours the lead/tail delays.
#[derive(Debug, Default)]
pub struct NoopDriver {
    lead: Duration,
    tail: Duration,
}

impl NoopDriver {
    /// Create a noop driver with settling delays
    #[must_use]
    pub fn new(lead: Duration, tail: Duration) -> Self {
        Self { lead, tail }
    }
}

#[async_trait]
impl DirectionDriver for NoopDriver {
    async fn enter_transmit(&self) -> Result<(), DriverError> {
        trace!("noop driver: transmit");
        if !self.lead.is_zero() {
            sleep(self.lead).await;
        }
        Ok(())
    }

    async fn enter_receive(&self) -> Result<(), DriverError> {
        if !self.tail.is_zero() {
            sleep(self.tail).await;
        }
        trace!("noop driver: receive");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DriverError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
