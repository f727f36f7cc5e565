//! In-memory transport for testing.
//!
//! Uses tokio channels to simulate the transport without actual I/O:
//! - Unit tests of the controller and node state machines
//! - Multi-participant clusters in one process
//! - Crash simulation via [`MemoryTransport::kill`]
//!
//! Every message still goes through the wire codec, so bound violations
//! surface exactly as they would on a real transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use timekeeper_api::{
    Address, Message,
    codec::{decode_frame, encode_frame},
};
use timekeeper_common::TransportError;

use crate::{Connection, DEFAULT_READ_TIMEOUT, Listener, Transport};

/// Pending connections a listener can queue before `connect` blocks
const BACKLOG: usize = 64;

/// Frames one side can buffer before `send` blocks
const CONNECTION_BUFFER: usize = 16;

const CONTROLLER_ADDRESS: &str = "mem://controller";

type Registry = DashMap<Address, mpsc::Sender<MemoryConnection>>;

/// In-memory transport; clones share the same endpoint registry
#[derive(Clone)]
pub struct MemoryTransport {
    registry: Arc<Registry>,
    next_id: Arc<AtomicU64>,
    read_timeout: Duration,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Make `address` unreachable, as if its process crashed
    pub fn kill(&self, address: &Address) -> bool {
        self.registry.remove(address).is_some()
    }

    /// Whether a listener is registered at `address`
    pub fn is_listening(&self, address: &Address) -> bool {
        self.registry.contains_key(address)
    }

    /// Number of registered listeners
    pub fn endpoint_count(&self) -> usize {
        self.registry.len()
    }
}

/// One side of an in-memory duplex exchange
pub struct MemoryConnection {
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
    peer: Address,
    read_timeout: Duration,
}

impl MemoryConnection {
    fn pair(client: Address, server: Address, read_timeout: Duration) -> (Self, Self) {
        let (to_server, from_client) = mpsc::channel(CONNECTION_BUFFER);
        let (to_client, from_server) = mpsc::channel(CONNECTION_BUFFER);

        let client_side = Self {
            tx: to_server,
            rx: from_server,
            peer: server,
            read_timeout,
        };
        let server_side = Self {
            tx: to_client,
            rx: from_client,
            peer: client,
            read_timeout,
        };
        (client_side, server_side)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let frame = encode_frame(message)?;
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn receive(&mut self) -> Message {
        match tokio::time::timeout(self.read_timeout, self.rx.recv()).await {
            Ok(Some(frame)) => match decode_frame(frame) {
                Ok(message) => message,
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "Dropping undecodable frame");
                    Message::undelivered()
                }
            },
            Ok(None) => Message::undelivered(),
            Err(_) => Message::undelivered(),
        }
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

/// A registered in-memory listener; deregisters itself on drop
pub struct MemoryEndpoint {
    address: Address,
    incoming: mpsc::Receiver<MemoryConnection>,
    sender: mpsc::Sender<MemoryConnection>,
    registry: Arc<Registry>,
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        self.registry
            .remove_if(&self.address, |_, tx| tx.same_channel(&self.sender));
    }
}

#[async_trait]
impl Listener for MemoryEndpoint {
    type Connection = MemoryConnection;

    fn address(&self) -> &Address {
        &self.address
    }

    async fn accept(&mut self, timeout: Duration) -> Option<MemoryConnection> {
        match tokio::time::timeout(timeout, self.incoming.recv()).await {
            Ok(connection) => connection,
            Err(_) => None,
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Connection = MemoryConnection;
    type Listener = MemoryEndpoint;

    fn controller_address(&self) -> Address {
        Address::from(CONTROLLER_ADDRESS)
    }

    fn generate_address(&self) -> Address {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Address::new(format!("mem://node-{}", id))
    }

    async fn listen(&self, address: &Address) -> Result<MemoryEndpoint, TransportError> {
        if self.registry.contains_key(address) {
            return Err(TransportError::Listen {
                address: address.to_string(),
                reason: "address already in use".to_string(),
            });
        }

        let (sender, incoming) = mpsc::channel(BACKLOG);
        self.registry.insert(address.clone(), sender.clone());

        Ok(MemoryEndpoint {
            address: address.clone(),
            incoming,
            sender,
            registry: self.registry.clone(),
        })
    }

    async fn connect(
        &self,
        address: &Address,
        timeout: Duration,
    ) -> Result<MemoryConnection, TransportError> {
        let listener = self
            .registry
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::Unreachable(address.to_string()))?;

        let client = Address::new(format!(
            "mem://outbound-{}",
            self.next_id.fetch_add(1, Ordering::Relaxed)
        ));
        let (client_side, server_side) =
            MemoryConnection::pair(client, address.clone(), self.read_timeout);

        match tokio::time::timeout(timeout, listener.send(server_side)).await {
            Ok(Ok(())) => Ok(client_side),
            Ok(Err(_)) => Err(TransportError::Unreachable(address.to_string())),
            Err(_) => Err(TransportError::ConnectTimeout {
                address: address.to_string(),
                timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deliver;
    use timekeeper_api::{MessageKind, Role};

    #[tokio::test]
    async fn test_send_receive() {
        let transport = MemoryTransport::new();
        let address = transport.generate_address();
        let mut endpoint = transport.listen(&address).await.unwrap();

        deliver(
            &transport,
            &address,
            &Message::new_client(Address::from("n7")),
            Duration::from_millis(100),
        )
        .await
        .unwrap();

        let mut connection = endpoint.accept(Duration::from_secs(1)).await.unwrap();
        let message = connection.receive().await;
        assert!(message.delivered);
        assert_eq!(message.role, Role::Client);
        assert_eq!(message.kind, MessageKind::NewClient);
        assert_eq!(message.first_address(), Some(&Address::from("n7")));
    }

    #[tokio::test]
    async fn test_connect_to_unknown_address() {
        let transport = MemoryTransport::new();
        let result = transport
            .connect(&Address::from("mem://nobody"), Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(TransportError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_kill_makes_endpoint_unreachable() {
        let transport = MemoryTransport::new();
        let address = transport.generate_address();
        let _endpoint = transport.listen(&address).await.unwrap();

        assert!(transport.is_listening(&address));
        assert!(transport.kill(&address));
        assert!(!transport.is_listening(&address));

        let result = transport.connect(&address, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(TransportError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_drop_deregisters_endpoint() {
        let transport = MemoryTransport::new();
        let address = transport.generate_address();
        let endpoint = transport.listen(&address).await.unwrap();
        assert_eq!(transport.endpoint_count(), 1);

        drop(endpoint);
        assert_eq!(transport.endpoint_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_listen_rejected() {
        let transport = MemoryTransport::new();
        let address = transport.controller_address();
        let _endpoint = transport.listen(&address).await.unwrap();
        assert!(matches!(
            transport.listen(&address).await,
            Err(TransportError::Listen { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_times_out() {
        let transport = MemoryTransport::new();
        let mut endpoint = transport
            .listen(&transport.generate_address())
            .await
            .unwrap();
        assert!(endpoint.accept(Duration::from_secs(5)).await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_message_rejected_at_send() {
        let transport = MemoryTransport::new();
        let address = transport.generate_address();
        let _endpoint = transport.listen(&address).await.unwrap();

        let addresses = (0..17).map(|i| Address::new(format!("n{}", i))).collect();
        let result = deliver(
            &transport,
            &address,
            &Message::set_server(addresses),
            Duration::from_millis(100),
        )
        .await;
        assert!(matches!(result, Err(TransportError::Codec(_))));
    }

    #[tokio::test]
    async fn test_clones_share_registry() {
        let transport = MemoryTransport::new();
        let other = transport.clone();
        let address = transport.generate_address();
        let _endpoint = transport.listen(&address).await.unwrap();
        assert!(other.is_listening(&address));
        assert_ne!(other.generate_address(), address);
    }
}
