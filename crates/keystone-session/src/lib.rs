//! Session management for Keystone.
//!
//! This crate owns everything the server remembers about a connection
//! between two packets:
//!
//! 1. **Session state** ([`Session`], [`SessionState`]): phase, account,
//!    sequencer, and the handshake exchange.
//! 2. **Handshake** ([`HandshakeState`], [`ChallengeTransform`]): the
//!    challenge-response gate every connection passes first.
//! 3. **Registry** ([`SessionRegistry`]): the concurrent index of live
//!    sessions by id and by account.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server (above)   ← drives sessions from connection tasks
//!     ↕
//! Session Layer (this crate)
//!     ↕
//! Protocol Layer (below)  ← Phase, Sequencer, HandshakePayload
//! ```

mod error;
mod handshake;
mod keygen;
mod registry;
mod session;

pub use error::SessionError;
pub use handshake::{
    ChallengeTransform, HandshakeOutcome, HandshakeState, HandshakeStatus, IdentityEcho, now_ms,
};
pub use keygen::{generate_handshake_key, percentage_check, random_i32_in_range, random_u32_in_range};
pub use registry::{DuplicateLoginPolicy, SessionRegistry};
pub use session::{AccountId, ChannelHandle, Session, SessionId, SessionState};
