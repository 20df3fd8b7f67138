//! A [`Connection`] over any `AsyncRead + AsyncWrite` stream.

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Connection, ConnectionId, TransportError};

/// Wraps a raw byte stream (TCP socket, in-memory duplex, ...) as a
/// [`Connection`].
pub struct StreamConnection<S> {
    id: ConnectionId,
    stream: S,
    peer: Option<SocketAddr>,
    closed: bool,
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps `stream`, allocating a fresh [`ConnectionId`].
    pub fn new(stream: S) -> Self {
        Self::with_peer(stream, None)
    }

    /// Wraps `stream` and records the remote address.
    pub fn with_peer(stream: S, peer: Option<SocketAddr>) -> Self {
        Self {
            id: ConnectionId::next(),
            stream,
            peer,
            closed: false,
        }
    }
}

impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Error = TransportError;

    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize, Self::Error> {
        if self.closed {
            return Ok(0);
        }
        self.stream
            .read_buf(buf)
            .await
            .map_err(TransportError::ReadFailed)
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        if self.closed {
            return Err(TransportError::ConnectionClosed(format!(
                "{} already closed",
                self.id
            )));
        }
        self.stream
            .write_all(data)
            .await
            .map_err(TransportError::WriteFailed)?;
        self.stream.flush().await.map_err(TransportError::WriteFailed)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            // The peer may already be gone; closing is still done.
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(TransportError::WriteFailed(e)),
        }
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}
