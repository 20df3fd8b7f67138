//! Session types: the server's record of one live connection.
//!
//! A session tracks:
//! - WHO is on the other end (`AccountId`, once logged in)
//! - WHERE they are in the protocol (`Phase`, handshake status)
//! - HOW their packets are sequenced (`Sequencer`)
//! - HOW to reach them (`ChannelHandle`)

use std::fmt;

use keystone_protocol::{HandshakePayload, Packet, Phase, SequenceMode, Sequencer};
use keystone_transport::ConnectionId;
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{HandshakeOutcome, HandshakeState, SessionError};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Process-unique session identifier. Never reused while the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Persistent account identifier, assigned by the login handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "account-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ChannelHandle
// ---------------------------------------------------------------------------

/// Opaque handle to the connection a session lives on.
///
/// Holds the sending half of the connection task's outbound queue and the
/// token that tells the task to shut down. It never owns the socket.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    connection: ConnectionId,
    outbound: mpsc::UnboundedSender<Packet>,
    closed: CancellationToken,
}

impl ChannelHandle {
    pub fn new(
        connection: ConnectionId,
        outbound: mpsc::UnboundedSender<Packet>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            connection,
            outbound,
            closed,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Cancelled once the session has been closed.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Mutable per-session state, guarded by the session's mutex.
#[derive(Debug)]
pub struct SessionState {
    account_id: Option<AccountId>,
    phase: Phase,
    pub sequencer: Sequencer,
    pub handshake: HandshakeState,
    /// Set by the registry on removal so a late `bind_account` cannot
    /// leave a dangling account entry.
    pub(crate) detached: bool,
}

impl SessionState {
    pub fn new(handshake: HandshakeState) -> Self {
        Self {
            account_id: None,
            phase: Phase::Handshake,
            sequencer: Sequencer::default(),
            handshake,
            detached: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.account_id
    }

    pub(crate) fn set_account(&mut self, account: AccountId) {
        self.account_id = Some(account);
    }

    /// Moves the session forward to `to`.
    ///
    /// # Errors
    /// - [`SessionError::PhaseRegression`] if `to` is earlier than the
    ///   current phase.
    /// - [`SessionError::InvalidTransition`] for any other move
    ///   [`Phase::can_advance_to`] refuses, such as `LOGIN → AUTH`.
    /// - [`SessionError::HandshakeIncomplete`] when leaving `HANDSHAKE`
    ///   before the handshake is verified.
    pub fn advance_phase(&mut self, to: Phase) -> Result<(), SessionError> {
        let from = self.phase;
        if !from.can_advance_to(to) {
            return Err(if to < from {
                SessionError::PhaseRegression { from, to }
            } else {
                SessionError::InvalidTransition { from, to }
            });
        }
        if self.phase == Phase::Handshake && to != Phase::Handshake && !self.handshake.is_verified() {
            return Err(SessionError::HandshakeIncomplete);
        }
        self.phase = to;
        Ok(())
    }

    /// Checks a handshake echo. On success the sequencer switches to the
    /// table for `mode` and both counters restart at zero.
    pub fn verify_handshake(
        &mut self,
        echo: &HandshakePayload,
        now_ms: u32,
        window_ms: u32,
        mode: SequenceMode,
    ) -> HandshakeOutcome {
        let outcome = self.handshake.verify(echo, now_ms, window_ms);
        if outcome == HandshakeOutcome::Verified {
            self.sequencer.rekey(mode.table_for(self.handshake.server_key()));
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A live connection as seen by the rest of the server.
///
/// Sessions are created and owned by the
/// [`SessionRegistry`](crate::SessionRegistry) and handed out as
/// `Arc<Session>`.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    channel: ChannelHandle,
    state: Mutex<SessionState>,
}

impl Session {
    pub(crate) fn new(id: SessionId, channel: ChannelHandle, state: SessionState) -> Self {
        Self {
            id,
            channel,
            state: Mutex::new(state),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn channel(&self) -> &ChannelHandle {
        &self.channel
    }

    /// Locks the mutable state. Keep the guard short-lived; never hold it
    /// across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase()
    }

    pub fn account_id(&self) -> Option<AccountId> {
        self.state.lock().account_id()
    }

    /// Queues `packet` for the connection task to encode and write.
    ///
    /// # Errors
    /// [`SessionError::Closed`] if the session was closed or its task has
    /// already exited.
    pub fn send(&self, packet: Packet) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed(self.id));
        }
        self.channel
            .outbound
            .send(packet)
            .map_err(|_| SessionError::Closed(self.id))
    }

    pub fn is_closed(&self) -> bool {
        self.channel.closed.is_cancelled()
    }

    /// Signals the connection task to shut down. Idempotent.
    pub(crate) fn close(&self) {
        self.channel.closed.cancel();
    }
}
