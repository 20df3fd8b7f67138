//! The per-connection packet pipeline.
//!
//! ```text
//! inbound:   bytes → frame split → decode → sequence check → handshake gate → dispatch
//! outbound:  packet → encode → stamp sequence byte → bytes
//! ```
//!
//! Both halves are synchronous and never touch the socket. The connection
//! task feeds them bytes and writes what they produce, which keeps every
//! stage testable without a transport.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use keystone_protocol::packets::phase_packet;
use keystone_protocol::{
    Direction, Frame, HandshakePayload, Packet, ProtocolError, SchemaRegistry, WireDecoder, codec,
};
use keystone_session::{HandshakeOutcome, Session, SessionError, SessionState, now_ms};
use tokio_util::codec::Decoder;
use tracing::{debug, info, warn};

use crate::{KeystoneError, ServerConfig, UnknownPacketPolicy, UnverifiedPacketPolicy};

/// What the connection should do with one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// An application packet cleared every stage; hand it to dispatch.
    Dispatch(Packet),
    /// The pipeline answered the frame itself (handshake traffic).
    Respond(Vec<Packet>),
    /// The frame was discarded by policy.
    Drop,
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Inbound half: owns the read buffer and turns it into admissions.
pub struct InboundPipeline {
    buffer: BytesMut,
    decoder: WireDecoder,
    config: Arc<ServerConfig>,
    clock: fn() -> u32,
}

impl InboundPipeline {
    pub fn new(schemas: Arc<SchemaRegistry>, config: Arc<ServerConfig>) -> Self {
        Self {
            buffer: BytesMut::with_capacity(config.max_packet_size),
            decoder: WireDecoder::new(schemas, config.max_packet_size),
            config,
            clock: now_ms,
        }
    }

    /// Replaces the millisecond clock used to check handshake echoes.
    pub fn with_clock(mut self, clock: fn() -> u32) -> Self {
        self.clock = clock;
        self
    }

    /// The buffer the transport should append received bytes to.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Appends received bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Runs the next complete frame through every stage.
    ///
    /// Returns `Ok(None)` when the buffer holds no complete frame yet.
    ///
    /// # Errors
    /// Every error returned here means the connection must close:
    /// framing and oversize errors, sequence mismatches, handshake
    /// failures, and packets refused by a `close` policy.
    pub fn next(&mut self, session: &Session) -> Result<Option<Admission>, KeystoneError> {
        let frame = match self.decoder.decode(&mut self.buffer) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(None),
            Err(ProtocolError::UnknownPacket { header, direction })
                if self.config.unknown_packet_policy == UnknownPacketPolicy::Ignore =>
            {
                warn!(
                    session_id = %session.id(),
                    header = format_args!("0x{header:02X}"),
                    ?direction,
                    "unknown packet ignored"
                );
                return Ok(Some(Admission::Drop));
            }
            Err(e) => return Err(e.into()),
        };

        let mut state = session.lock();
        check_sequence(&mut state, &frame, session)?;
        self.gate_handshake(&mut state, frame, session)
    }

    fn gate_handshake(
        &self,
        state: &mut SessionState,
        frame: Frame,
        session: &Session,
    ) -> Result<Option<Admission>, KeystoneError> {
        if frame.schema.is_handshake() {
            return self.handshake(state, &frame.packet, session).map(Some);
        }

        if state.handshake.is_verified() {
            return Ok(Some(Admission::Dispatch(frame.packet)));
        }

        let header = frame.schema.header();
        match self.config.unverified_packet_policy {
            UnverifiedPacketPolicy::Drop => {
                warn!(
                    session_id = %session.id(),
                    packet = frame.schema.name(),
                    "packet before handshake dropped"
                );
                Ok(Some(Admission::Drop))
            }
            UnverifiedPacketPolicy::Close => Err(KeystoneError::Unverified { header }),
        }
    }

    fn handshake(
        &self,
        state: &mut SessionState,
        packet: &Packet,
        session: &Session,
    ) -> Result<Admission, KeystoneError> {
        let Some(echo) = HandshakePayload::from_packet(packet) else {
            return Err(SessionError::HandshakeFailed.into());
        };

        let outcome = state.verify_handshake(
            &echo,
            (self.clock)(),
            self.config.handshake_sync_window_ms,
            self.config.sequence_mode,
        );

        match outcome {
            HandshakeOutcome::Verified => {
                let phase = self.config.role.phase_after_handshake();
                state.advance_phase(phase)?;
                info!(session_id = %session.id(), %phase, "handshake verified");
                Ok(Admission::Respond(vec![phase_packet(phase)]))
            }
            HandshakeOutcome::Resync { time, delta } => {
                debug!(session_id = %session.id(), time, delta, "handshake clock resync");
                let challenge = HandshakePayload {
                    handshake: state.handshake.server_key(),
                    time,
                    delta,
                };
                Ok(Admission::Respond(vec![challenge.to_packet()]))
            }
            HandshakeOutcome::Failed | HandshakeOutcome::NotPending => {
                warn!(session_id = %session.id(), ?outcome, "handshake rejected");
                Err(SessionError::HandshakeFailed.into())
            }
        }
    }
}

/// Consumes the sequence byte of a sequenced frame.
fn check_sequence(state: &mut SessionState, frame: &Frame, session: &Session) -> Result<(), KeystoneError> {
    let Some(actual) = frame.sequence else {
        return Ok(());
    };
    state.sequencer.consume_inbound(actual).map_err(|e| {
        warn!(session_id = %session.id(), packet = frame.schema.name(), error = %e, "sequence check failed");
        KeystoneError::from(e)
    })
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Outbound half: encodes packets and stamps their sequence byte.
pub struct OutboundPipeline {
    schemas: Arc<SchemaRegistry>,
    buffer: BytesMut,
}

impl OutboundPipeline {
    pub fn new(schemas: Arc<SchemaRegistry>) -> Self {
        Self {
            schemas,
            buffer: BytesMut::new(),
        }
    }

    /// Produces the wire bytes for `packet` sent to `session`.
    ///
    /// The outbound counter only advances once the packet encoded
    /// successfully.
    ///
    /// # Errors
    /// [`ProtocolError::UnknownPacket`] if no outgoing schema exists for
    /// the header, or any encoding error.
    pub fn encode(&mut self, packet: &Packet, session: &Session) -> Result<Bytes, KeystoneError> {
        let header = packet.header();
        let schema = self
            .schemas
            .lookup(header, Direction::Outgoing)
            .ok_or(ProtocolError::UnknownPacket {
                header,
                direction: Direction::Outgoing,
            })?;

        self.buffer.clear();
        codec::encode(packet, schema, &mut self.buffer)?;
        if schema.is_sequenced() {
            let byte = session.lock().sequencer.next_outbound();
            codec::stamp_sequence(&mut self.buffer, schema, byte);
        }
        debug!(session_id = %session.id(), packet = schema.name(), len = self.buffer.len(), "encoded");
        Ok(self.buffer.split().freeze())
    }
}
