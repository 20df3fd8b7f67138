//! # Keystone
//!
//! Network core for binary, session-based game servers.
//!
//! Keystone accepts TCP connections, runs a challenge-response handshake,
//! then decodes a stream of declaratively described packets. Sequenced
//! packets are checked against a per-session rotating counter. Only
//! verified sessions reach application handlers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keystone::prelude::*;
//!
//! # async fn start() -> Result<(), KeystoneError> {
//! let ping = PacketSchema::builder("ping", 0x10, Direction::Incoming)
//!     .sequenced()
//!     .field("n", FieldKind::u32())
//!     .build()?;
//!
//! let server = KeystoneServer::builder()
//!     .bind("0.0.0.0:13000")
//!     .packet(ping)
//!     .dispatcher(Dispatcher::new().on(0x10, |packet, ctx| {
//!         tracing::info!(session = %ctx.session().id(), n = ?packet.uint(0), "ping");
//!         Ok(())
//!     }))
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod connection;
mod dispatch;
mod error;
mod pipeline;
mod server;

pub use config::{ServerConfig, ServerRole, UnknownPacketPolicy, UnverifiedPacketPolicy};
pub use dispatch::{Dispatcher, HandlerContext};
pub use error::KeystoneError;
pub use pipeline::{Admission, InboundPipeline, OutboundPipeline};
pub use server::{KeystoneServer, KeystoneServerBuilder};

pub use keystone_protocol as protocol;
pub use keystone_session as session;
pub use keystone_transport as transport;

/// Convenience re-exports for server and handler code.
pub mod prelude {
    pub use crate::{
        Dispatcher, HandlerContext, KeystoneError, KeystoneServer, KeystoneServerBuilder,
        ServerConfig, ServerRole, UnknownPacketPolicy, UnverifiedPacketPolicy,
    };
    pub use keystone_protocol::{
        Direction, FieldKind, FieldValue, Packet, PacketSchema, Phase, SequenceMode,
    };
    pub use keystone_session::{AccountId, DuplicateLoginPolicy, Session, SessionId};
}
