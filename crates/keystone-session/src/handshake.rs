//! The challenge-response handshake.
//!
//! On accept the server sends a random key together with its clock. The
//! client must echo the expected value (see [`ChallengeTransform`]) along
//! with the time and delta it received. The state machine is:
//!
//! ```text
//!             echo ok, clock in window
//!   Pending ─────────────────────────────→ Verified
//!      │  ↺ echo ok, clock out of window
//!      │    (resend challenge with a new delta)
//!      │
//!      └──── echo mismatch ──────────────→ Failed
//! ```
//!
//! `Verified` and `Failed` are terminal.

use std::time::{SystemTime, UNIX_EPOCH};

use keystone_protocol::HandshakePayload;

/// Milliseconds since the Unix epoch, truncated to 32 bits as carried on
/// the wire.
pub fn now_ms() -> u32 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    elapsed.as_millis() as u32
}

/// Maps the challenge the server sends to the value the client must echo.
pub trait ChallengeTransform: Send + Sync + 'static {
    fn expected_echo(&self, challenge: u32) -> u32;
}

/// The client echoes the challenge unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityEcho;

impl ChallengeTransform for IdentityEcho {
    fn expected_echo(&self, challenge: u32) -> u32 {
        challenge
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    Pending,
    Verified,
    Failed,
}

/// What the connection should do after an echo was checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// The session may leave the handshake phase.
    Verified,
    /// Key matched but clocks disagree; send the challenge again with
    /// these values and stay pending.
    Resync { time: u32, delta: i32 },
    /// Key mismatch. The connection must close.
    Failed,
    /// The handshake was already settled. The connection must close.
    NotPending,
}

#[derive(Debug, Clone)]
pub struct HandshakeState {
    server_key: u32,
    client_key_expected: u32,
    status: HandshakeStatus,
    last_sync_ms: u32,
}

impl HandshakeState {
    pub fn new(server_key: u32, client_key_expected: u32, now_ms: u32) -> Self {
        Self {
            server_key,
            client_key_expected,
            status: HandshakeStatus::Pending,
            last_sync_ms: now_ms,
        }
    }

    pub fn server_key(&self) -> u32 {
        self.server_key
    }

    pub fn client_key_expected(&self) -> u32 {
        self.client_key_expected
    }

    pub fn status(&self) -> HandshakeStatus {
        self.status
    }

    pub fn is_verified(&self) -> bool {
        self.status == HandshakeStatus::Verified
    }

    /// The first challenge sent to the client.
    pub fn challenge(&self) -> HandshakePayload {
        HandshakePayload {
            handshake: self.server_key,
            time: self.last_sync_ms,
            delta: 0,
        }
    }

    /// Checks a client echo received at `now_ms`.
    ///
    /// The echo is accepted when `now - (time + delta)` lies in
    /// `[0, window_ms]`. A matching key outside that window produces a
    /// [`HandshakeOutcome::Resync`] with half the observed round trip as
    /// the new delta.
    pub fn verify(&mut self, echo: &HandshakePayload, now_ms: u32, window_ms: u32) -> HandshakeOutcome {
        if self.status != HandshakeStatus::Pending {
            return HandshakeOutcome::NotPending;
        }
        if echo.handshake != self.client_key_expected {
            self.status = HandshakeStatus::Failed;
            return HandshakeOutcome::Failed;
        }

        // The millisecond clock is 32 bits and wraps, so differences are
        // taken modulo 2^32 and read as signed.
        let drift = now_ms.wrapping_sub(echo.time.wrapping_add_signed(echo.delta)) as i32;
        if drift >= 0 && drift.unsigned_abs() <= window_ms {
            self.status = HandshakeStatus::Verified;
            return HandshakeOutcome::Verified;
        }

        let mut delta = (now_ms.wrapping_sub(echo.time) as i32) / 2;
        if delta < 0 {
            delta = (now_ms.wrapping_sub(self.last_sync_ms) as i32) / 2;
        }
        self.last_sync_ms = now_ms;
        HandshakeOutcome::Resync { time: now_ms, delta }
    }
}
