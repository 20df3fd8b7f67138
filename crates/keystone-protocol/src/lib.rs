//! Wire protocol for Keystone.
//!
//! This crate defines the binary language spoken between game clients and
//! the authentication or game server:
//!
//! - **Schemas** ([`PacketSchema`], [`FieldSpec`], [`FieldKind`]) describe
//!   packet layouts declaratively; [`SchemaRegistry`] indexes them by
//!   header and direction.
//! - **Codec** ([`codec`]) turns [`Packet`]s into big-endian bytes and
//!   back, and [`WireDecoder`] frames a byte stream incrementally.
//! - **Sequencing** ([`Sequencer`], [`SequenceTable`]) implements the
//!   rotating per-packet check byte.
//! - **Errors** ([`ProtocolError`], [`FramingError`]).
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and session
//! (per-connection state). It knows nothing about sockets or accounts.
//!
//! ```text
//! Transport (bytes) → Protocol (Frame / Packet) → Session (phase, handshake)
//! ```

pub mod codec;
mod error;
mod frame;
mod packet;
pub mod packets;
mod phase;
mod registry;
mod schema;
mod sequence;

pub use codec::Decoded;
pub use error::{FramingError, ProtocolError};
pub use frame::{Frame, WireDecoder};
pub use packet::{FieldValue, Packet};
pub use packets::{HANDSHAKE_HEADER, HandshakePayload, PHASE_HEADER};
pub use phase::Phase;
pub use registry::SchemaRegistry;
pub use schema::{Direction, FieldKind, FieldSpec, IntWidth, PacketSchema, PacketSchemaBuilder};
pub use sequence::{SequenceMode, SequenceTable, Sequencer};
