//! Error types for the session layer.

use keystone_protocol::Phase;

use crate::{AccountId, SessionId};

/// Errors that can occur while managing sessions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No live session has this id. It was never created or has already
    /// been removed.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The session is already bound to a different account.
    #[error("session {session} is already bound to account {account}")]
    SessionBound { session: SessionId, account: AccountId },

    /// Another live session owns this account and the duplicate-login
    /// policy rejects the newcomer.
    #[error("account {account} is already bound to session {session}")]
    AccountAlreadyBound { account: AccountId, session: SessionId },

    /// Phases only move forward.
    #[error("cannot move from phase {from} back to {to}")]
    PhaseRegression { from: Phase, to: Phase },

    /// No transition links these phases (into or out of the
    /// authentication side phase, for example).
    #[error("no transition from phase {from} to {to}")]
    InvalidTransition { from: Phase, to: Phase },

    /// The session tried to leave `HANDSHAKE` before being verified.
    #[error("handshake not verified")]
    HandshakeIncomplete,

    /// The handshake echo did not match, or arrived after the exchange
    /// was already settled.
    #[error("handshake failed")]
    HandshakeFailed,

    /// A bounded random draw was given an empty range.
    #[error("empty range [{from}, {to})")]
    InvalidRange { from: i64, to: i64 },

    /// The session's connection is gone; nothing can be sent to it.
    #[error("session {0} is closed")]
    Closed(SessionId),
}
