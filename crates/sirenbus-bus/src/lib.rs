//! Sirenbus Bus - shared bus arbitration
//!
//! This crate owns access to the single half-duplex broadcast bus:
//! - Priority: canonical urgency classes and the alias table
//! - Queue: the shared, lease-based priority queue state
//! - Store: queue state backends (SQLite, Redis, in-memory)
//! - Arbiter: priority-ordered mutual exclusion over the bus
//! - Driver: transceiver direction switching (noop, GPIO, serial RTS)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod arbiter;
pub mod driver;
pub mod error;
pub mod priority;
pub mod queue;
pub mod store;

pub use arbiter::{Arbiter, ArbiterConfig};
pub use driver::{
    build_driver, DirectionDriver, DriverConfig, DriverKind, GpioDriver, NoopDriver,
    SerialRtsDriver,
};
pub use error::{ArbiterError, DriverError, Result};
pub use priority::{PriorityClass, PriorityConfig, PriorityTable};
pub use queue::{PriorityRequest, QueueState};
pub use store::{MemoryQueueStore, QueueStore, RedisQueueStore, SqliteQueueStore};
