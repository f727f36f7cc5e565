// Framed connection over any byte stream
// Shared by the TCP and Unix socket transports

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use timekeeper_api::{
    Message,
    codec::{check_body_len, decode_body, encode_frame},
};
use timekeeper_common::TransportError;

use crate::Connection;

/// A connection that exchanges length-prefixed frames over a byte stream
pub struct StreamConnection<S> {
    stream: S,
    peer: String,
    read_timeout: Duration,
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer: impl Into<String>, read_timeout: Duration) -> Self {
        Self {
            stream,
            peer: peer.into(),
            read_timeout,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    async fn read_frame(&mut self) -> Result<Message, TransportError> {
        let len = match self.stream.read_u32().await {
            Ok(len) => len,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TransportError::Closed);
            }
            Err(e) => return Err(e.into()),
        };
        let len = check_body_len(len)?;
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await?;
        Ok(decode_body(&body[..])?)
    }
}

#[async_trait]
impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let frame = encode_frame(message)?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Message {
        match tokio::time::timeout(self.read_timeout, self.read_frame()).await {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                warn!(peer = %self.peer, error = %e, "Read failed");
                Message::undelivered()
            }
            Err(_) => {
                warn!(peer = %self.peer, timeout = ?self.read_timeout, "Read timed out");
                Message::undelivered()
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(peer = %self.peer, error = %e, "Shutdown after exchange failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timekeeper_api::{Address, MessageKind, Role};

    #[tokio::test]
    async fn test_duplex_exchange() {
        let (a, b) = tokio::io::duplex(4096);
        let mut writer = StreamConnection::new(a, "b", Duration::from_secs(1));
        let mut reader = StreamConnection::new(b, "a", Duration::from_secs(1));

        writer
            .send(&Message::new_client(Address::from("n1")))
            .await
            .unwrap();
        writer.close().await;

        let message = reader.receive().await;
        assert!(message.delivered);
        assert_eq!(message.role, Role::Client);
        assert_eq!(message.kind, MessageKind::NewClient);
        assert_eq!(message.first_address(), Some(&Address::from("n1")));
    }

    #[tokio::test]
    async fn test_closed_peer_is_undelivered() {
        let (a, b) = tokio::io::duplex(64);
        drop(a);
        let mut reader = StreamConnection::new(b, "a", Duration::from_secs(1));
        assert!(!reader.receive().await.delivered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        let (_a, b) = tokio::io::duplex(64);
        let mut reader = StreamConnection::new(b, "a", Duration::from_millis(200));
        assert!(!reader.receive().await.delivered);
    }

    #[tokio::test]
    async fn test_garbage_frame_is_undelivered() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(&[0, 0, 0, 11, 9, 9, 0, 0, 0, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();
        let mut reader = StreamConnection::new(b, "a", Duration::from_secs(1));
        assert!(!reader.receive().await.delivered);
    }
}
