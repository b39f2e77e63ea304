//! Sirenbus IPC - control worker transport
//!
//! The alternate control path for the transmission hardware:
//! - Transport: one-shot request/response over a Unix socket with
//!   handshake, timeouts and linear-backoff retries
//! - Supervisor: lazy start of the control worker behind that socket
//! - Server: reference worker endpoint speaking the same protocol
//! - Retry: backoff helper shared by the above

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod retry;
#[cfg(unix)]
pub mod server;
pub mod supervisor;
pub mod transport;

pub use error::{Result, TransportError};
pub use retry::{retry_with_backoff, Backoff, RetryConfig, RetryError};
#[cfg(unix)]
pub use server::{ControlServer, RequestHandler};
pub use supervisor::{LaunchSpec, ProcessLauncher, WorkerConfig, WorkerLauncher, WorkerSupervisor};
pub use transport::{TransportClient, TransportConfig};
