/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed by the peer or locally.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Writing bytes to the peer failed.
    #[error("write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    /// Reading bytes from the peer failed.
    #[error("read failed: {0}")]
    ReadFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}
