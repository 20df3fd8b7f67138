//! Decoded packets: a header plus field values in schema order.

/// The value of one field.
///
/// Signed integer fields hold [`FieldValue::Int`], unsigned ones hold
/// [`FieldValue::UInt`]. The codec rejects the other variant rather than
/// guessing, so a decoded packet always re-encodes to the same bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Int(i64),
    UInt(u64),
    Bytes(Vec<u8>),
    Str(String),
    Nested(Vec<FieldValue>),
}

impl FieldValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_nested(&self) -> Option<&[FieldValue]> {
        match self {
            Self::Nested(v) => Some(v),
            _ => None,
        }
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        Self::UInt(u64::from(v))
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

/// A typed packet: header byte plus one value per schema field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: u8,
    fields: Vec<FieldValue>,
}

impl Packet {
    pub fn new(header: u8, fields: Vec<FieldValue>) -> Self {
        Self { header, fields }
    }

    pub fn header(&self) -> u8 {
        self.header
    }

    pub fn fields(&self) -> &[FieldValue] {
        &self.fields
    }

    /// Returns the value at `position`, if present.
    pub fn get(&self, position: usize) -> Option<&FieldValue> {
        self.fields.get(position)
    }

    /// Convenience for unsigned fields.
    pub fn uint(&self, position: usize) -> Option<u64> {
        self.get(position).and_then(FieldValue::as_u64)
    }

    /// Convenience for signed fields.
    pub fn int(&self, position: usize) -> Option<i64> {
        self.get(position).and_then(FieldValue::as_i64)
    }

    /// Convenience for string fields.
    pub fn str(&self, position: usize) -> Option<&str> {
        self.get(position).and_then(FieldValue::as_str)
    }
}
