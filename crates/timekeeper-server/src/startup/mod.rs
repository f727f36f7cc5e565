//! Process startup: logging and controller discovery

pub mod bootstrap;
pub mod logging;

pub use bootstrap::{ensure_controller, probe_controller, spawn_controller};
pub use logging::{LoggingConfig, LoggingGuard, init_logging};
