//! `KeystoneServer` builder and accept loop.
//!
//! This is the entry point for running a Keystone server. It ties the
//! layers together: transport → protocol → session → dispatch.

use std::sync::Arc;

use keystone_protocol::{PacketSchema, SchemaRegistry};
use keystone_session::{ChallengeTransform, SessionRegistry};
use keystone_transport::{TcpTransport, Transport};
use tokio_util::sync::CancellationToken;

use crate::connection::{Shared, handle_connection};
use crate::{Dispatcher, KeystoneError, ServerConfig};

/// Builder for configuring and starting a Keystone server.
///
/// # Example
///
/// ```rust,ignore
/// use keystone::prelude::*;
///
/// let server = KeystoneServer::builder()
///     .bind("0.0.0.0:11002")
///     .packet(login_schema)
///     .dispatcher(Dispatcher::new().on(0x6F, on_login))
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct KeystoneServerBuilder {
    config: ServerConfig,
    schemas: SchemaRegistry,
    pending: Vec<PacketSchema>,
    dispatcher: Dispatcher,
    sessions: SessionRegistry,
}

impl KeystoneServerBuilder {
    /// Creates a builder with default settings and the built-in
    /// handshake and phase packets.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            schemas: SchemaRegistry::with_builtin(),
            pending: Vec::new(),
            dispatcher: Dispatcher::new(),
            sessions: SessionRegistry::new(),
        }
    }

    /// Sets the address to listen on. Overrides `config.bind_addr`.
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Adds one packet schema. Conflicts are reported by [`build`](Self::build).
    pub fn packet(mut self, schema: PacketSchema) -> Self {
        self.pending.push(schema);
        self
    }

    /// Replaces the schema registry. It should include the built-in
    /// packets (see [`SchemaRegistry::with_builtin`]).
    pub fn schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Sets how a client derives its handshake echo from the challenge.
    pub fn challenge_transform<T: ChallengeTransform>(mut self, transform: T) -> Self {
        self.sessions = SessionRegistry::with_transform(transform);
        self
    }

    /// Validates the configuration, registers the schemas, and binds the
    /// listener.
    pub async fn build(self) -> Result<KeystoneServer, KeystoneError> {
        self.config.validate()?;

        let mut schemas = self.schemas;
        for schema in self.pending {
            schemas.register(schema)?;
        }

        let transport = TcpTransport::bind(&self.config.bind_addr).await?;

        let shared = Arc::new(Shared {
            config: Arc::new(self.config),
            schemas: Arc::new(schemas),
            sessions: Arc::new(self.sessions),
            dispatcher: self.dispatcher,
        });

        Ok(KeystoneServer {
            transport,
            shared,
            shutdown: CancellationToken::new(),
        })
    }
}

impl Default for KeystoneServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Keystone server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct KeystoneServer {
    transport: TcpTransport,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl KeystoneServer {
    pub fn builder() -> KeystoneServerBuilder {
        KeystoneServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The live session registry, for closing or messaging sessions from
    /// outside a handler.
    pub fn sessions(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.shared.sessions)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// A token that stops [`run()`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the accept loop.
    ///
    /// Spawns one task per accepted connection. Returns once the shutdown
    /// token is cancelled, after closing every live session.
    pub async fn run(mut self) -> Result<(), KeystoneError> {
        tracing::info!(
            addr = %self.shared.config.bind_addr,
            role = ?self.shared.config.role,
            "keystone server running"
        );

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let shared = Arc::clone(&self.shared);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, shared).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
            }
        }

        let sessions = &self.shared.sessions;
        let ids = sessions.session_ids();
        tracing::info!(sessions = ids.len(), "shutting down");
        for id in ids {
            sessions.close(id);
        }
        self.transport.shutdown().await?;
        Ok(())
    }
}
