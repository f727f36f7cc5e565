//! Error types for Timekeeper
//!
//! This module defines:
//! - `TransportError`: failures of the point-to-point transport (connect, accept, read, write)
//! - `CodecError`: failures encoding or decoding a wire frame

use std::time::Duration;

/// Errors raised by a transport implementation.
///
/// None of these are fatal on their own: the coordination layer treats them
/// as membership-pruning or retry signals.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("connect to '{address}' timed out after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("endpoint '{0}' is not reachable")]
    Unreachable(String),

    #[error("cannot listen on '{address}': {reason}")]
    Listen { address: String, reason: String },

    #[error("connection closed by peer")]
    Closed,

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while encoding or decoding a message frame
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("too many addresses: {count} (max {max})")]
    TooManyAddresses { count: usize, max: usize },

    #[error("address too long: {length} bytes (max {max})")]
    AddressTooLong { length: usize, max: usize },

    #[error("unknown role tag: {0}")]
    UnknownRole(u8),

    #[error("unknown message kind tag: {0}")]
    UnknownKind(u8),

    #[error("frame truncated: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("address is not valid UTF-8")]
    InvalidUtf8,

    #[error("timestamp out of range: {0}")]
    InvalidTimestamp(i64),
}
