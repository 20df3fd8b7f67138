//! Routing of admitted packets to application handlers.
//!
//! The core only decodes, sequences, and gates packets. What a login or a
//! chat message *means* is decided by handlers registered here, keyed by
//! header byte.

use std::collections::HashMap;
use std::sync::Arc;

use keystone_protocol::packets::phase_packet;
use keystone_protocol::{Packet, Phase};
use keystone_session::{AccountId, Session, SessionRegistry};
use tracing::{debug, info};

use crate::{KeystoneError, ServerConfig};

type HandlerFn = dyn Fn(&Packet, &HandlerContext<'_>) -> Result<(), KeystoneError> + Send + Sync + 'static;

/// Header → handler table, built once before the server starts.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<u8, Box<HandlerFn>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut headers: Vec<_> = self.handlers.keys().copied().collect();
        headers.sort_unstable();
        f.debug_struct("Dispatcher").field("headers", &headers).finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `header`, replacing any previous one.
    pub fn on<F>(mut self, header: u8, handler: F) -> Self
    where
        F: Fn(&Packet, &HandlerContext<'_>) -> Result<(), KeystoneError> + Send + Sync + 'static,
    {
        self.handlers.insert(header, Box::new(handler));
        self
    }

    pub fn handles(&self, header: u8) -> bool {
        self.handlers.contains_key(&header)
    }

    /// Runs the handler registered for the packet's header.
    ///
    /// Packets nobody registered for are logged and ignored.
    pub fn dispatch(&self, packet: &Packet, ctx: &HandlerContext<'_>) -> Result<(), KeystoneError> {
        match self.handlers.get(&packet.header()) {
            Some(handler) => handler(packet, ctx),
            None => {
                debug!(
                    session_id = %ctx.session().id(),
                    header = format_args!("0x{:02X}", packet.header()),
                    "no handler registered, packet ignored"
                );
                Ok(())
            }
        }
    }
}

/// What a handler may touch while processing one packet.
pub struct HandlerContext<'a> {
    session: &'a Arc<Session>,
    sessions: &'a SessionRegistry,
    config: &'a ServerConfig,
}

impl<'a> HandlerContext<'a> {
    pub fn new(session: &'a Arc<Session>, sessions: &'a SessionRegistry, config: &'a ServerConfig) -> Self {
        Self {
            session,
            sessions,
            config,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        self.session
    }

    pub fn sessions(&self) -> &SessionRegistry {
        self.sessions
    }

    pub fn config(&self) -> &ServerConfig {
        self.config
    }

    /// Queues a packet for this session's connection.
    pub fn send(&self, packet: Packet) -> Result<(), KeystoneError> {
        self.session.send(packet)?;
        Ok(())
    }

    /// Binds this session to `account` under the configured
    /// duplicate-login policy.
    pub fn bind_account(&self, account: AccountId) -> Result<(), KeystoneError> {
        let evicted = self
            .sessions
            .bind_account(self.session.id(), account, self.config.duplicate_login_policy)?;
        if let Some(old) = evicted {
            info!(%account, evicted = %old.id(), "previous login for account closed");
        }
        Ok(())
    }

    /// Moves the session to `phase` and announces it to the client.
    pub fn advance_phase(&self, phase: Phase) -> Result<(), KeystoneError> {
        self.session.lock().advance_phase(phase)?;
        self.send(phase_packet(phase))
    }

    /// Closes this session through the registry. Idempotent.
    pub fn close(&self) -> bool {
        self.sessions.close(self.session.id())
    }
}
