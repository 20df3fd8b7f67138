//! Schema-driven binary codec.
//!
//! The codec turns a [`Packet`] into bytes (and back) by walking its
//! [`PacketSchema`]. All multi-byte integers are big-endian. Fixed-length
//! strings and byte arrays always occupy exactly their declared length.
//!
//! The sequence byte is *reserved* here but never interpreted: encoding
//! writes a zero placeholder that the sequencer later overwrites through
//! [`stamp_sequence`], and decoding hands the raw byte back in
//! [`Decoded::sequence`] for the sequencer to check.
//!
//! Every read is bounds-checked before it happens, so a hostile frame can
//! produce an error but never a panic or an allocation sized by the peer.

use bytes::{Buf, BufMut, BytesMut};

use crate::{FieldKind, FieldSpec, FieldValue, FramingError, Packet, PacketSchema, ProtocolError};

/// Result of decoding one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub packet: Packet,
    /// The raw sequence byte, for sequenced schemas.
    pub sequence: Option<u8>,
}

/// Appends the encoded form of `packet` to `out`.
///
/// On error nothing is left behind in `out`: the buffer is truncated back
/// to its original length.
///
/// # Errors
/// Header or field-count mismatches, values that do not fit their field,
/// strings longer than their capacity, and dynamic bodies too large for
/// the 16-bit length prefix.
pub fn encode(packet: &Packet, schema: &PacketSchema, out: &mut BytesMut) -> Result<(), ProtocolError> {
    let start = out.len();
    let result = encode_frame(packet, schema, out);
    if result.is_err() {
        out.truncate(start);
    }
    result
}

/// Encodes `packet` into a fresh buffer.
pub fn encode_to_vec(packet: &Packet, schema: &PacketSchema) -> Result<Vec<u8>, ProtocolError> {
    let mut out = BytesMut::with_capacity(schema.prefix_len() + schema.fixed_body_len());
    encode(packet, schema, &mut out)?;
    Ok(out.to_vec())
}

fn encode_frame(packet: &Packet, schema: &PacketSchema, out: &mut BytesMut) -> Result<(), ProtocolError> {
    if packet.header() != schema.header() {
        return Err(ProtocolError::HeaderMismatch {
            expected: schema.header(),
            actual: packet.header(),
        });
    }

    out.reserve(schema.prefix_len() + schema.fixed_body_len());
    out.put_u8(schema.header());
    if schema.is_sequenced() {
        // Placeholder, overwritten by the sequencer.
        out.put_u8(0);
    }

    let length_at = out.len();
    if schema.has_dynamic_size() {
        out.put_u16(0);
    }
    let body_start = out.len();

    encode_fields(schema.fields(), packet.fields(), out)?;

    if schema.has_dynamic_size() {
        let body_len = out.len() - body_start;
        let declared = u16::try_from(body_len).map_err(|_| ProtocolError::OversizedPacket {
            size: body_len,
            max: usize::from(u16::MAX),
        })?;
        out[length_at..length_at + 2].copy_from_slice(&declared.to_be_bytes());
    }
    Ok(())
}

fn encode_fields(specs: &[FieldSpec], values: &[FieldValue], out: &mut BytesMut) -> Result<(), ProtocolError> {
    if specs.len() != values.len() {
        return Err(ProtocolError::FieldCount {
            expected: specs.len(),
            actual: values.len(),
        });
    }
    for (spec, value) in specs.iter().zip(values) {
        encode_field(spec, value, out)?;
    }
    Ok(())
}

fn encode_field(spec: &FieldSpec, value: &FieldValue, out: &mut BytesMut) -> Result<(), ProtocolError> {
    let field = spec.name;
    match (&spec.kind, value) {
        (FieldKind::Int { width, unsigned: true }, FieldValue::UInt(v)) => {
            let n = width.bytes();
            let max = if n == 8 { u64::MAX } else { (1u64 << (8 * n)) - 1 };
            if *v > max {
                return Err(ProtocolError::ValueOutOfRange {
                    field,
                    value: i128::from(*v),
                });
            }
            out.put_uint(*v, n);
        }
        (FieldKind::Int { width, unsigned: false }, FieldValue::Int(v)) => {
            let bits = 8 * width.bytes() as u32;
            let min = -(1i128 << (bits - 1));
            let max = (1i128 << (bits - 1)) - 1;
            let wide = i128::from(*v);
            if wide < min || wide > max {
                return Err(ProtocolError::ValueOutOfRange { field, value: wide });
            }
            out.put_int(*v, width.bytes());
        }
        (FieldKind::Int { unsigned: true, .. }, _) => {
            return Err(ProtocolError::FieldMismatch {
                field,
                expected: "an unsigned integer",
            });
        }
        (FieldKind::Int { .. }, _) => {
            return Err(ProtocolError::FieldMismatch {
                field,
                expected: "a signed integer",
            });
        }
        (FieldKind::Bytes { length }, FieldValue::Bytes(bytes)) => {
            if bytes.len() < *length {
                return Err(ProtocolError::FieldTooShort {
                    field,
                    actual: bytes.len(),
                    length: *length,
                });
            }
            put_padded(field, bytes, *length, out)?;
        }
        (FieldKind::Str { length }, FieldValue::Str(text)) => {
            if text.as_bytes().contains(&0) {
                return Err(ProtocolError::InvalidString(field));
            }
            put_padded(field, text.as_bytes(), *length, out)?;
        }
        (FieldKind::Nested(inner), FieldValue::Nested(values)) => {
            encode_fields(inner, values, out)?;
        }
        (FieldKind::Tail, FieldValue::Bytes(bytes)) => out.put_slice(bytes),
        (FieldKind::Bytes { .. } | FieldKind::Tail, _) => {
            return Err(ProtocolError::FieldMismatch { field, expected: "bytes" });
        }
        (FieldKind::Str { .. }, _) => {
            return Err(ProtocolError::FieldMismatch { field, expected: "a string" });
        }
        (FieldKind::Nested(_), _) => {
            return Err(ProtocolError::FieldMismatch {
                field,
                expected: "a nested layout",
            });
        }
    }
    Ok(())
}

fn put_padded(field: &'static str, bytes: &[u8], capacity: usize, out: &mut BytesMut) -> Result<(), ProtocolError> {
    if bytes.len() > capacity {
        return Err(ProtocolError::FieldTooLong {
            field,
            actual: bytes.len(),
            capacity,
        });
    }
    out.put_slice(bytes);
    out.put_bytes(0, capacity - bytes.len());
    Ok(())
}

/// Writes `byte` into the sequence slot of an encoded frame.
///
/// Returns `false` (and leaves the frame alone) when the schema is not
/// sequenced or the frame is too short to hold the slot.
pub fn stamp_sequence(frame: &mut [u8], schema: &PacketSchema, byte: u8) -> bool {
    match schema.sequence_offset().and_then(|at| frame.get_mut(at)) {
        Some(slot) => {
            *slot = byte;
            true
        }
        None => false,
    }
}

/// Computes the total length of the frame at the start of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed. For dynamic-size
/// schemas only the prefix is inspected, and the declared size is checked
/// against `max` before any body byte is considered.
///
/// # Errors
/// [`ProtocolError::OversizedPacket`] if the frame would exceed `max`.
pub fn frame_len(buf: &[u8], schema: &PacketSchema, max: usize) -> Result<Option<usize>, ProtocolError> {
    let prefix = schema.prefix_len();
    let total = if schema.has_dynamic_size() {
        if buf.len() < prefix {
            return Ok(None);
        }
        let declared = u16::from_be_bytes([buf[prefix - 2], buf[prefix - 1]]);
        prefix + usize::from(declared)
    } else {
        prefix + schema.fixed_body_len()
    };

    if total > max {
        return Err(ProtocolError::OversizedPacket { size: total, max });
    }
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some(total))
}

/// Decodes exactly one complete frame.
///
/// `frame` must contain the whole frame and nothing else; use
/// [`frame_len`] to split it off a stream first.
pub fn decode(frame: &[u8], schema: &PacketSchema) -> Result<Decoded, ProtocolError> {
    let mut buf = frame;

    let header = read_uint(&mut buf, 1)? as u8;
    if header != schema.header() {
        return Err(ProtocolError::HeaderMismatch {
            expected: schema.header(),
            actual: header,
        });
    }

    let sequence = if schema.is_sequenced() {
        Some(read_uint(&mut buf, 1)? as u8)
    } else {
        None
    };

    let fields = if schema.has_dynamic_size() {
        let declared = read_uint(&mut buf, 2)? as usize;
        let mut body = take(&mut buf, declared)?;
        let fields = decode_fields(schema.fields(), &mut body)?;
        if !body.is_empty() {
            return Err(FramingError::LengthMismatch {
                declared,
                consumed: declared - body.len(),
            }
            .into());
        }
        fields
    } else {
        decode_fields(schema.fields(), &mut buf)?
    };

    if !buf.is_empty() {
        return Err(FramingError::TrailingBytes(buf.len()).into());
    }

    Ok(Decoded {
        packet: Packet::new(header, fields),
        sequence,
    })
}

fn decode_fields(specs: &[FieldSpec], buf: &mut &[u8]) -> Result<Vec<FieldValue>, ProtocolError> {
    specs.iter().map(|spec| decode_field(spec, buf)).collect()
}

fn decode_field(spec: &FieldSpec, buf: &mut &[u8]) -> Result<FieldValue, ProtocolError> {
    let value = match &spec.kind {
        FieldKind::Int { width, unsigned: true } => FieldValue::UInt(read_uint(buf, width.bytes())?),
        FieldKind::Int { width, unsigned: false } => {
            need(buf, width.bytes())?;
            FieldValue::Int(buf.get_int(width.bytes()))
        }
        FieldKind::Bytes { length } => FieldValue::Bytes(take(buf, *length)?.to_vec()),
        FieldKind::Str { length } => {
            let raw = take(buf, *length)?;
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            let text = std::str::from_utf8(&raw[..end]).map_err(|_| ProtocolError::InvalidString(spec.name))?;
            FieldValue::Str(text.to_string())
        }
        FieldKind::Nested(inner) => FieldValue::Nested(decode_fields(inner, buf)?),
        FieldKind::Tail => {
            let len = buf.len();
            FieldValue::Bytes(take(buf, len)?.to_vec())
        }
    };
    Ok(value)
}

fn need(buf: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        return Err(FramingError::ShortRead {
            needed,
            remaining: buf.len(),
        }
        .into());
    }
    Ok(())
}

fn read_uint(buf: &mut &[u8], n: usize) -> Result<u64, ProtocolError> {
    need(buf, n)?;
    Ok(buf.get_uint(n))
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8], ProtocolError> {
    need(buf, n)?;
    let (head, rest) = buf.split_at(n);
    *buf = rest;
    Ok(head)
}
