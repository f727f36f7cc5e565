// Loopback TCP transport
// Each participant listens on its own port; addresses are "host:port" strings

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use timekeeper_api::Address;
use timekeeper_common::{DEFAULT_TCP_CONTROLLER_ADDRESS, TransportError};

use crate::{DEFAULT_READ_TIMEOUT, Listener, Transport, stream::StreamConnection};

pub type TcpConnection = StreamConnection<TcpStream>;

/// TCP transport configuration
#[derive(Clone, Debug)]
pub struct TcpTransport {
    controller_address: Address,
    bind_host: String,
    read_timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Address::from(DEFAULT_TCP_CONTROLLER_ADDRESS))
    }
}

impl TcpTransport {
    pub fn new(controller_address: Address) -> Self {
        Self {
            controller_address,
            bind_host: "127.0.0.1".to_string(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

/// A bound TCP listener
pub struct TcpEndpoint {
    listener: TcpListener,
    address: Address,
    read_timeout: Duration,
}

#[async_trait]
impl Listener for TcpEndpoint {
    type Connection = TcpConnection;

    fn address(&self) -> &Address {
        &self.address
    }

    async fn accept(&mut self, timeout: Duration) -> Option<TcpConnection> {
        match tokio::time::timeout(timeout, self.listener.accept()).await {
            Ok(Ok((stream, peer))) => {
                debug!(address = %self.address, peer = %peer, "Accepted connection");
                Some(StreamConnection::new(
                    stream,
                    peer.to_string(),
                    self.read_timeout,
                ))
            }
            Ok(Err(e)) => {
                warn!(address = %self.address, error = %e, "Accept failed");
                None
            }
            Err(_) => None,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Connection = TcpConnection;
    type Listener = TcpEndpoint;

    fn controller_address(&self) -> Address {
        self.controller_address.clone()
    }

    /// Port 0: the operating system picks a free port at bind time
    fn generate_address(&self) -> Address {
        Address::new(format!("{}:0", self.bind_host))
    }

    async fn listen(&self, address: &Address) -> Result<TcpEndpoint, TransportError> {
        let listener = TcpListener::bind(address.as_str())
            .await
            .map_err(|e| TransportError::Listen {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        let bound = listener.local_addr()?;

        Ok(TcpEndpoint {
            listener,
            address: Address::new(bound.to_string()),
            read_timeout: self.read_timeout,
        })
    }

    async fn connect(
        &self,
        address: &Address,
        timeout: Duration,
    ) -> Result<TcpConnection, TransportError> {
        match tokio::time::timeout(timeout, TcpStream::connect(address.as_str())).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true)?;
                Ok(StreamConnection::new(
                    stream,
                    address.to_string(),
                    self.read_timeout,
                ))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::ConnectTimeout {
                address: address.to_string(),
                timeout,
            }),
        }
    }
}
