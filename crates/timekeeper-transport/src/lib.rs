//! Timekeeper Transport - Point-to-point message delivery
//!
//! The coordination layer only sees the three traits defined here:
//! - [`Transport`]: address factory plus `listen`/`connect`
//! - [`Listener`]: server side endpoint with a bounded `accept`
//! - [`Connection`]: one request/response exchange of a single [`Message`]
//!
//! Implementations:
//! - [`TcpTransport`]: loopback TCP, one port per participant
//! - [`UnixTransport`]: Unix domain sockets in a shared directory (unix only)
//! - [`MemoryTransport`]: in-process channels for tests
//!
//! A timeout expiring is a normal outcome, not an error: `accept` returns
//! `None`, `connect` returns [`TransportError::ConnectTimeout`].

use std::time::Duration;

use async_trait::async_trait;

use timekeeper_api::{Address, Message};
use timekeeper_common::TransportError;

pub mod memory;
pub mod stream;
pub mod tcp;
#[cfg(unix)]
pub mod unix;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;
#[cfg(unix)]
pub use unix::UnixTransport;

/// Default bound on a single `receive` call
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// A single established exchange between two participants
#[async_trait]
pub trait Connection: Send {
    /// Write one message to the peer
    async fn send(&mut self, message: &Message) -> Result<(), TransportError>;

    /// Read one message from the peer.
    ///
    /// Never fails: a failed or timed out read yields a message whose
    /// `delivered` flag is `false`, which the caller must discard.
    async fn receive(&mut self) -> Message;

    /// Close the connection
    async fn close(&mut self);
}

/// Server side endpoint bound to an address
#[async_trait]
pub trait Listener: Send {
    type Connection: Connection;

    /// The canonical address peers use to reach this listener
    fn address(&self) -> &Address;

    /// Wait up to `timeout` for an inbound connection
    async fn accept(&mut self, timeout: Duration) -> Option<Self::Connection>;
}

/// Factory for addresses, listeners, and outbound connections
#[async_trait]
pub trait Transport: Send + Sync {
    type Connection: Connection;
    type Listener: Listener<Connection = Self::Connection>;

    /// Well-known rendezvous address of the controller
    fn controller_address(&self) -> Address;

    /// A fresh address for a node's own listener
    fn generate_address(&self) -> Address;

    /// Open a listener on `address`
    async fn listen(&self, address: &Address) -> Result<Self::Listener, TransportError>;

    /// Connect to `address`, giving up after `timeout`
    async fn connect(
        &self,
        address: &Address,
        timeout: Duration,
    ) -> Result<Self::Connection, TransportError>;
}

/// Connect to `address` and write a single message, closing afterwards.
///
/// This is the unit of every outbound exchange in the protocol: election,
/// relay, broadcast, heartbeat, and the bootstrap probe.
pub async fn deliver<T: Transport + ?Sized>(
    transport: &T,
    address: &Address,
    message: &Message,
    timeout: Duration,
) -> Result<(), TransportError> {
    let mut connection = transport.connect(address, timeout).await?;
    let result = connection.send(message).await;
    connection.close().await;
    result
}
