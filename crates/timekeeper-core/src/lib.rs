//! Timekeeper Core - Leader election and time broadcast
//!
//! Two single-owner state machines drive the protocol:
//! - [`Controller`]: admits nodes, elects a leader, relays registrations to it
//! - [`Node`]: registers, waits as a client, broadcasts time once promoted
//!
//! Both are generic over [`timekeeper_transport::Transport`], so the same
//! logic runs over TCP, Unix sockets, or in-memory channels. Neither loop
//! exits the process; fatal conditions come back as typed values.

pub mod config;
pub mod controller;
pub mod error;
pub mod membership;
pub mod metrics;
pub mod node;
pub mod retry;

pub use config::{AdmissionPolicy, ConfigError, CoordinationConfig};
pub use controller::{Admission, Controller, ControllerExit, ControllerState, LeaderState, Step};
pub use error::{ControllerError, NodeError};
pub use membership::MemberSet;
pub use node::{Node, NodeState};
pub use retry::{RetryBudget, RetryDecision};
