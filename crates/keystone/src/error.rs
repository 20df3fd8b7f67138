//! Unified error type for the Keystone server.

use keystone_protocol::ProtocolError;
use keystone_session::SessionError;
use keystone_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// Connection tasks and packet handlers deal with this single type; the
/// `#[from]` conversions let `?` lift sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum KeystoneError {
    /// A transport-level error (accept, read, write).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (framing, sequencing, encoding).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (handshake, account binding, phase).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// An application packet arrived before the handshake was verified.
    #[error("packet 0x{header:02X} received before handshake")]
    Unverified { header: u8 },

    /// Configuration could not be loaded or is inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// A packet handler rejected a packet.
    #[error("handler failed: {0}")]
    Handler(String),
}

impl KeystoneError {
    /// Returns `true` when the connection that produced this error must
    /// be closed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Unverified { .. } | Self::Config(_) => true,
            Self::Protocol(e) => e.is_fatal(),
            Self::Session(e) => matches!(
                e,
                SessionError::HandshakeFailed | SessionError::Closed(_) | SessionError::NotFound(_)
            ),
            Self::Handler(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_session::{AccountId, SessionId};

    #[test]
    fn test_from_transport_error() {
        let err: KeystoneError = TransportError::ConnectionClosed("gone".into()).into();
        assert!(matches!(err, KeystoneError::Transport(_)));
        assert!(err.to_string().contains("gone"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_from_protocol_error_keeps_fatality() {
        let err: KeystoneError = ProtocolError::SequenceMismatch { expected: 0, actual: 1 }.into();
        assert!(err.is_fatal());

        let err: KeystoneError = ProtocolError::UnknownPacket {
            header: 0x42,
            direction: keystone_protocol::Direction::Outgoing,
        }
        .into();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_from_session_error_duplicate_login_is_not_fatal() {
        let err: KeystoneError = SessionError::AccountAlreadyBound {
            account: AccountId(1),
            session: SessionId(2),
        }
        .into();
        assert!(matches!(err, KeystoneError::Session(_)));
        assert!(!err.is_fatal());

        let err: KeystoneError = SessionError::HandshakeFailed.into();
        assert!(err.is_fatal());
    }
}
