//! Transport abstraction layer for Keystone.
//!
//! Provides the [`Transport`] and [`Connection`] traits over a reliable,
//! ordered byte stream. Reads are allowed to return partial data; turning
//! bytes into packets is the job of the layers above.
//!
//! # Feature Flags
//!
//! - `tcp` (default): TCP transport via `tokio::net`

#![allow(async_fn_in_trait)]

mod error;
mod stream;
#[cfg(feature = "tcp")]
mod tcp;

pub use error::TransportError;
pub use stream::StreamConnection;
#[cfg(feature = "tcp")]
pub use tcp::{TcpConnection, TcpTransport};

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique connection ID.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;

    /// Gracefully shuts down the transport, stopping new connections.
    async fn shutdown(&self) -> Result<(), Self::Error>;
}

/// A single byte-stream connection.
///
/// A connection is owned by exactly one task, so every operation takes
/// `&mut self`. [`read`](Connection::read) is cancel-safe: it can sit in a
/// `tokio::select!` next to other branches without losing bytes.
pub trait Connection: Send + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reads whatever bytes are available and appends them to `buf`.
    ///
    /// Returns the number of bytes appended. `Ok(0)` means the peer
    /// closed the stream cleanly.
    async fn read(&mut self, buf: &mut BytesMut) -> Result<usize, Self::Error>;

    /// Writes all of `data` to the peer.
    async fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Closes the connection. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the remote address, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}
