// Unix domain socket transport
// Local named endpoints in a shared directory, the closest analogue of named pipes

use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use timekeeper_api::Address;
use timekeeper_common::{CONTROLLER_SOCKET_NAME, TransportError};

use crate::{DEFAULT_READ_TIMEOUT, Listener, Transport, stream::StreamConnection};

pub type UnixConnection = StreamConnection<UnixStream>;

/// Attempts at picking an unused socket name before giving up on uniqueness
const NAME_ATTEMPTS: usize = 32;

/// Unix socket transport rooted at a socket directory
#[derive(Clone, Debug)]
pub struct UnixTransport {
    socket_dir: PathBuf,
    read_timeout: Duration,
}

impl UnixTransport {
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    fn random_name(&self) -> PathBuf {
        let n: u32 = rand::rng().random_range(1..=9999);
        self.socket_dir.join(format!("{}.sock", n))
    }
}

/// Device and inode of a file, identifying one particular socket at a path
fn file_identity(path: &Path) -> Option<(u64, u64)> {
    std::fs::symlink_metadata(path)
        .ok()
        .map(|meta| (meta.dev(), meta.ino()))
}

/// A bound Unix socket; the socket file is removed on drop
pub struct UnixEndpoint {
    listener: UnixListener,
    address: Address,
    path: PathBuf,
    identity: Option<(u64, u64)>,
    read_timeout: Duration,
}

impl Drop for UnixEndpoint {
    fn drop(&mut self) {
        // another endpoint may have been bound at this path since
        if self.identity.is_none() || file_identity(&self.path) != self.identity {
            debug!(path = %self.path.display(), "Socket file no longer ours, leaving it");
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Failed to remove socket file");
        }
    }
}

#[async_trait]
impl Listener for UnixEndpoint {
    type Connection = UnixConnection;

    fn address(&self) -> &Address {
        &self.address
    }

    async fn accept(&mut self, timeout: Duration) -> Option<UnixConnection> {
        match tokio::time::timeout(timeout, self.listener.accept()).await {
            Ok(Ok((stream, _))) => Some(StreamConnection::new(
                stream,
                self.address.to_string(),
                self.read_timeout,
            )),
            Ok(Err(e)) => {
                warn!(address = %self.address, error = %e, "Accept failed");
                None
            }
            Err(_) => None,
        }
    }
}

#[async_trait]
impl Transport for UnixTransport {
    type Connection = UnixConnection;
    type Listener = UnixEndpoint;

    fn controller_address(&self) -> Address {
        Address::new(
            self.socket_dir
                .join(CONTROLLER_SOCKET_NAME)
                .to_string_lossy()
                .into_owned(),
        )
    }

    fn generate_address(&self) -> Address {
        let mut path = self.random_name();
        for _ in 1..NAME_ATTEMPTS {
            if !path.exists() {
                break;
            }
            path = self.random_name();
        }
        Address::new(path.to_string_lossy().into_owned())
    }

    async fn listen(&self, address: &Address) -> Result<UnixEndpoint, TransportError> {
        let path = PathBuf::from(address.as_str());
        let listen_error = |e: std::io::Error| TransportError::Listen {
            address: address.to_string(),
            reason: e.to_string(),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(listen_error)?;
        }
        if path.exists() {
            match UnixStream::connect(&path).await {
                Ok(_) => {
                    return Err(TransportError::Listen {
                        address: address.to_string(),
                        reason: "address already in use".to_string(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                    info!(path = %path.display(), "Removing stale socket file");
                    tokio::fs::remove_file(&path).await.map_err(listen_error)?;
                }
                Err(e) => return Err(listen_error(e)),
            }
        }

        let listener = UnixListener::bind(&path).map_err(listen_error)?;
        let identity = file_identity(&path);
        Ok(UnixEndpoint {
            listener,
            address: address.clone(),
            path,
            identity,
            read_timeout: self.read_timeout,
        })
    }

    async fn connect(
        &self,
        address: &Address,
        timeout: Duration,
    ) -> Result<UnixConnection, TransportError> {
        match tokio::time::timeout(timeout, UnixStream::connect(address.as_str())).await {
            Ok(Ok(stream)) => Ok(StreamConnection::new(
                stream,
                address.to_string(),
                self.read_timeout,
            )),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::ConnectTimeout {
                address: address.to_string(),
                timeout,
            }),
        }
    }
}
