//! Server-side wiring for the sirenbus binary
//!
//! - `config`: configuration structures for all components
//! - `loader`: configuration loading from files and environment
//! - `init`: builds the runtime from configuration

pub mod config;
mod init;
mod loader;

pub use init::{init, Runtime};
pub use loader::load_config;
