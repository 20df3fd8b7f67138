//! Incremental framing of an inbound byte stream.
//!
//! [`WireDecoder`] plugs into `tokio_util::codec`: it is handed the
//! connection's read buffer after every read, and either splits one whole
//! frame off the front or leaves the buffer untouched until more bytes
//! arrive. Bytes are never consumed twice and never lost between reads.

use std::sync::Arc;

use bytes::BytesMut;
use tokio_util::codec::Decoder;
use tracing::debug;

use crate::{Direction, Packet, PacketSchema, ProtocolError, SchemaRegistry, codec};

/// One decoded inbound frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub schema: Arc<PacketSchema>,
    pub packet: Packet,
    /// Raw sequence byte, not yet checked.
    pub sequence: Option<u8>,
}

/// Splits client → server frames using the incoming half of a
/// [`SchemaRegistry`].
#[derive(Debug, Clone)]
pub struct WireDecoder {
    registry: Arc<SchemaRegistry>,
    max_packet_size: usize,
}

impl WireDecoder {
    pub fn new(registry: Arc<SchemaRegistry>, max_packet_size: usize) -> Self {
        Self {
            registry,
            max_packet_size,
        }
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }
}

impl Decoder for WireDecoder {
    type Item = Frame;
    type Error = ProtocolError;

    /// # Errors
    /// - [`ProtocolError::UnknownPacket`]: no incoming schema for the
    ///   header. Every buffered byte is discarded first, since there is no
    ///   way to find the next frame boundary. The stream can continue with
    ///   the next read.
    /// - [`ProtocolError::OversizedPacket`] and framing errors: the buffer
    ///   is left as is and the stream must be closed.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let Some(&header) = src.first() else {
            return Ok(None);
        };

        let Some(schema) = self.registry.lookup(header, Direction::Incoming) else {
            debug!(
                header = format_args!("0x{header:02X}"),
                discarded = src.len(),
                "no schema for inbound header"
            );
            src.clear();
            return Err(ProtocolError::UnknownPacket {
                header,
                direction: Direction::Incoming,
            });
        };

        let Some(len) = codec::frame_len(src, schema, self.max_packet_size)? else {
            return Ok(None);
        };

        let bytes = src.split_to(len);
        let decoded = codec::decode(&bytes, schema)?;
        debug!(packet = schema.name(), len, "decoded frame");

        Ok(Some(Frame {
            schema: Arc::clone(schema),
            packet: decoded.packet,
            sequence: decoded.sequence,
        }))
    }
}
