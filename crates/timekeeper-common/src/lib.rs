//! Timekeeper Common - Shared constants, errors, and utilities
//!
//! This crate provides the foundational pieces used across all Timekeeper components:
//! - Wire bounds shared by the message model and every transport
//! - Transport and codec error types
//! - Time formatting helpers

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::{CodecError, TransportError};
pub use utils::{format_utc, now_utc};

/// Maximum number of addresses carried by a single message
pub const MAX_ADDRESSES: usize = 16;

/// Maximum length of a single address in bytes
pub const MAX_ADDRESS_LENGTH: usize = 256;

/// Default number of nodes the controller keeps in its membership set
pub const DEFAULT_MAX_MEMBERS: usize = MAX_ADDRESSES;

/// Default well-known controller address for the TCP transport
pub const DEFAULT_TCP_CONTROLLER_ADDRESS: &str = "127.0.0.1:47000";

/// File name of the well-known controller socket for the Unix transport
pub const CONTROLLER_SOCKET_NAME: &str = "controller.sock";

/// Time format used when displaying a received timestamp
pub const TIME_DISPLAY_FORMAT: &str = "UTC: %Y-%m-%d %H:%M:%S";
