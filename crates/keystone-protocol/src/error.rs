//! Error types for the protocol layer.
//!
//! Everything that can go wrong while turning bytes into packets (or
//! packets into bytes) lands here. The connection task decides what is
//! fatal; see [`ProtocolError::is_fatal`].

use crate::Direction;

/// The byte boundary of a frame can no longer be trusted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// A dynamic-size packet declared a body length that does not match
    /// the bytes its fields actually consumed.
    #[error("declared body length {declared} but fields consumed {consumed}")]
    LengthMismatch { declared: usize, consumed: usize },

    /// The frame ended before all fields were read.
    #[error("frame ended early: needed {needed} more bytes, {remaining} left")]
    ShortRead { needed: usize, remaining: usize },

    /// Bytes were left over after the last field of a fixed-size packet.
    #[error("{0} trailing bytes after the last field")]
    TrailingBytes(usize),
}

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is malformed. Only closing the connection recovers.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// The sequence byte did not match the table entry for the current
    /// counter. Treated as tampering or desync.
    #[error("sequence mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    SequenceMismatch { expected: u8, actual: u8 },

    /// No schema is registered for this header in this direction.
    #[error("unknown packet header 0x{header:02X} ({direction:?})")]
    UnknownPacket { header: u8, direction: Direction },

    /// A frame is larger than the configured in-flight maximum.
    #[error("packet of {size} bytes exceeds maximum of {max}")]
    OversizedPacket { size: usize, max: usize },

    /// The packet header does not belong to the schema used to encode it.
    #[error("packet header 0x{actual:02X} does not match schema 0x{expected:02X}")]
    HeaderMismatch { expected: u8, actual: u8 },

    /// The packet carries a different number of values than the layout.
    #[error("expected {expected} field values, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    /// A value does not have the type its field declares.
    #[error("field `{field}` expects {expected}")]
    FieldMismatch {
        field: &'static str,
        expected: &'static str,
    },

    /// An integer does not fit the declared width.
    #[error("value {value} does not fit field `{field}`")]
    ValueOutOfRange { field: &'static str, value: i128 },

    /// A string or byte array is longer than its declared capacity.
    #[error("field `{field}` is {actual} bytes, capacity is {capacity}")]
    FieldTooLong {
        field: &'static str,
        actual: usize,
        capacity: usize,
    },

    /// A byte array is shorter than its declared length. Unlike strings,
    /// raw bytes have no terminator, so padding could not be undone.
    #[error("field `{field}` is {actual} bytes, expected exactly {length}")]
    FieldTooShort {
        field: &'static str,
        actual: usize,
        length: usize,
    },

    /// A string contains an interior NUL or is not valid UTF-8.
    #[error("field `{0}` is not a valid fixed-length string")]
    InvalidString(&'static str),

    /// A schema or registry was built with an inconsistent layout.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Required by `tokio_util::codec::Decoder`.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns `true` when the connection must be closed.
    ///
    /// Unknown packets are governed by a separate policy, so they are the
    /// only inbound error reported as non-fatal here.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnknownPacket { .. })
    }
}
