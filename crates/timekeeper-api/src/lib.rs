//! Timekeeper API - Protocol message model
//!
//! This crate defines the vocabulary exchanged between the controller and nodes:
//! - [`Address`]: opaque transport endpoint identifier
//! - [`Role`] and [`MessageKind`]: who sent a message and what it means
//! - [`Message`]: the wire record
//! - [`codec`]: length-prefixed binary framing with explicit bounds

pub mod codec;
pub mod model;

pub use model::{Address, Message, MessageKind, Role};
