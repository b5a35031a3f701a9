//! Server module for Aegis
//!
//! Contains the main server initialization and runtime logic.
//!
//! # Module Structure
//!
//! - `config`: Configuration structures for all server components
//! - `loader`: Configuration loading from files and environment
//! - `init`: Component wiring and the HTTP run loop
//! - `shutdown`: Ctrl+C / SIGTERM handling

pub mod config;
mod init;
mod loader;
mod shutdown;

// Re-export public API
pub use init::{build_components, run, Components};
pub use loader::load_config;
pub use shutdown::wait_for_shutdown_signal;
