//! Declarative packet layouts.
//!
//! A [`PacketSchema`] is the static description of one packet type: its
//! header byte, which way it travels, whether it carries a sequence byte
//! or a length prefix, and the ordered list of fields in its body. The
//! codec reads schemas; it never inspects packet types at runtime.
//!
//! ```text
//! [header:1][sequence:1 if sequenced][length:2 BE if dynamic][fields...]
//! ```
//!
//! Schemas are built once at startup through [`PacketSchema::builder`],
//! which validates the layout so the codec can trust it afterwards.

use crate::ProtocolError;

/// Which way a packet travels, seen from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client → server.
    Incoming,
    /// Server → client.
    Outgoing,
    /// Valid in both directions (the handshake packet, for example).
    Both,
}

impl Direction {
    /// Returns `true` if a schema declared with `self` may travel in
    /// `other`.
    pub fn includes(self, other: Direction) -> bool {
        self == Direction::Both || other == Direction::Both || self == other
    }
}

/// Byte width of a fixed-size integer field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    One = 1,
    Two = 2,
    Four = 4,
    Eight = 8,
}

impl IntWidth {
    /// Number of bytes on the wire.
    pub fn bytes(self) -> usize {
        self as usize
    }
}

/// The wire shape of a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// Big-endian integer. `unsigned` only changes interpretation, never
    /// the storage width.
    Int { width: IntWidth, unsigned: bool },
    /// Exactly `length` raw bytes. Shorter or longer values fail to
    /// encode.
    Bytes { length: usize },
    /// UTF-8 text stored in exactly `length` bytes, NUL-padded.
    Str { length: usize },
    /// An embedded layout without its own header.
    Nested(Vec<FieldSpec>),
    /// Variable-length bytes running to the end of the body. Only valid as
    /// the last field of a dynamic-size schema.
    Tail,
}

impl FieldKind {
    pub fn u8() -> Self {
        Self::Int { width: IntWidth::One, unsigned: true }
    }

    pub fn u16() -> Self {
        Self::Int { width: IntWidth::Two, unsigned: true }
    }

    pub fn u32() -> Self {
        Self::Int { width: IntWidth::Four, unsigned: true }
    }

    pub fn u64() -> Self {
        Self::Int { width: IntWidth::Eight, unsigned: true }
    }

    pub fn i8() -> Self {
        Self::Int { width: IntWidth::One, unsigned: false }
    }

    pub fn i16() -> Self {
        Self::Int { width: IntWidth::Two, unsigned: false }
    }

    pub fn i32() -> Self {
        Self::Int { width: IntWidth::Four, unsigned: false }
    }

    pub fn i64() -> Self {
        Self::Int { width: IntWidth::Eight, unsigned: false }
    }

    pub fn bytes(length: usize) -> Self {
        Self::Bytes { length }
    }

    pub fn string(length: usize) -> Self {
        Self::Str { length }
    }

    /// Builds a nested layout from `(name, kind)` pairs, numbering
    /// positions in order.
    pub fn nested<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, FieldKind)>,
    {
        Self::Nested(
            fields
                .into_iter()
                .enumerate()
                .map(|(i, (name, kind))| FieldSpec::new(i as u16, name, kind))
                .collect(),
        )
    }

    /// Fixed number of bytes this field occupies. `Tail` counts as zero.
    pub fn wire_len(&self) -> usize {
        match self {
            Self::Int { width, .. } => width.bytes(),
            Self::Bytes { length } | Self::Str { length } => *length,
            Self::Nested(fields) => fields.iter().map(|f| f.kind.wire_len()).sum(),
            Self::Tail => 0,
        }
    }
}

/// One field of a packet body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    /// Serialization order. Positions of a layout form `0..N`.
    pub position: u16,
    /// Used in error messages and logs only.
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn new(position: u16, name: &'static str, kind: FieldKind) -> Self {
        Self {
            position,
            name,
            kind,
        }
    }
}

/// Immutable description of one packet type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketSchema {
    name: &'static str,
    header: u8,
    direction: Direction,
    sequenced: bool,
    dynamic_size: bool,
    handshake: bool,
    fields: Vec<FieldSpec>,
    fixed_body_len: usize,
}

impl PacketSchema {
    /// Starts building a schema.
    pub fn builder(name: &'static str, header: u8, direction: Direction) -> PacketSchemaBuilder {
        PacketSchemaBuilder {
            name,
            header,
            direction,
            sequenced: false,
            dynamic_size: false,
            handshake: false,
            fields: Vec::new(),
        }
    }

    /// Assembles a fixed-size, unsequenced schema whose layout is known to
    /// be valid at compile time.
    pub(crate) fn fixed(
        name: &'static str,
        header: u8,
        direction: Direction,
        handshake: bool,
        fields: Vec<FieldSpec>,
    ) -> Self {
        let fixed_body_len = fields.iter().map(|f| f.kind.wire_len()).sum();
        Self {
            name,
            header,
            direction,
            sequenced: false,
            dynamic_size: false,
            handshake,
            fields,
            fixed_body_len,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn header(&self) -> u8 {
        self.header
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether a sequence byte follows the header.
    pub fn is_sequenced(&self) -> bool {
        self.sequenced
    }

    /// Whether a 2-byte length prefix precedes the body.
    pub fn has_dynamic_size(&self) -> bool {
        self.dynamic_size
    }

    /// Whether this packet belongs to the handshake exchange and may pass
    /// the gate before the handshake is verified.
    pub fn is_handshake(&self) -> bool {
        self.handshake
    }

    /// Fields in position order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Bytes before the body: header, optional sequence byte, optional
    /// length prefix.
    pub fn prefix_len(&self) -> usize {
        1 + usize::from(self.sequenced) + if self.dynamic_size { 2 } else { 0 }
    }

    /// Body bytes excluding any tail field.
    pub fn fixed_body_len(&self) -> usize {
        self.fixed_body_len
    }

    /// Offset of the sequence byte inside an encoded frame.
    pub fn sequence_offset(&self) -> Option<usize> {
        self.sequenced.then_some(1)
    }
}

/// Builder returned by [`PacketSchema::builder`].
#[derive(Debug, Clone)]
pub struct PacketSchemaBuilder {
    name: &'static str,
    header: u8,
    direction: Direction,
    sequenced: bool,
    dynamic_size: bool,
    handshake: bool,
    fields: Vec<FieldSpec>,
}

impl PacketSchemaBuilder {
    /// Reserve a sequence byte after the header.
    pub fn sequenced(mut self) -> Self {
        self.sequenced = true;
        self
    }

    /// Prefix the body with its length.
    pub fn dynamic_size(mut self) -> Self {
        self.dynamic_size = true;
        self
    }

    /// Mark the packet as part of the handshake exchange.
    pub fn handshake(mut self) -> Self {
        self.handshake = true;
        self
    }

    /// Appends a field at the next position.
    pub fn field(mut self, name: &'static str, kind: FieldKind) -> Self {
        let position = self.fields.len() as u16;
        self.fields.push(FieldSpec::new(position, name, kind));
        self
    }

    /// Adds a field with an explicit position. Positions may be given in
    /// any order; [`build`](Self::build) sorts and checks them.
    pub fn field_at(mut self, position: u16, name: &'static str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec::new(position, name, kind));
        self
    }

    /// Validates the layout and produces the schema.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidSchema`] when positions are not exactly
    /// `0..N`, when a tail field is misplaced, or when a fixed body does
    /// not fit a 16-bit length prefix.
    pub fn build(mut self) -> Result<PacketSchema, ProtocolError> {
        validate_layout(self.name, &mut self.fields, false)?;

        if let Some(last) = self.fields.last() {
            if last.kind == FieldKind::Tail && !self.dynamic_size {
                return Err(ProtocolError::InvalidSchema(format!(
                    "{}: tail field `{}` requires a dynamic-size schema",
                    self.name, last.name
                )));
            }
        }

        let fixed_body_len: usize = self.fields.iter().map(|f| f.kind.wire_len()).sum();
        if self.dynamic_size && fixed_body_len > usize::from(u16::MAX) {
            return Err(ProtocolError::InvalidSchema(format!(
                "{}: body of {fixed_body_len} bytes cannot be length-prefixed",
                self.name
            )));
        }

        Ok(PacketSchema {
            name: self.name,
            header: self.header,
            direction: self.direction,
            sequenced: self.sequenced,
            dynamic_size: self.dynamic_size,
            handshake: self.handshake,
            fields: self.fields,
            fixed_body_len,
        })
    }
}

/// Sorts `fields` by position and checks that positions are gapless,
/// unique, and that only the last top-level field may be a tail.
fn validate_layout(
    owner: &str,
    fields: &mut [FieldSpec],
    nested: bool,
) -> Result<(), ProtocolError> {
    fields.sort_by_key(|f| f.position);

    let count = fields.len();
    for (expected, field) in fields.iter_mut().enumerate() {
        if usize::from(field.position) != expected {
            return Err(ProtocolError::InvalidSchema(format!(
                "{owner}: field `{}` has position {}, expected {expected}",
                field.name, field.position
            )));
        }
        match &mut field.kind {
            FieldKind::Tail if nested || expected + 1 != count => {
                return Err(ProtocolError::InvalidSchema(format!(
                    "{owner}: tail field `{}` must be the last top-level field",
                    field.name
                )));
            }
            FieldKind::Nested(inner) => validate_layout(field.name, inner, true)?,
            _ => {}
        }
    }
    Ok(())
}
