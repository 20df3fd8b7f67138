//! The schema arena: every packet type known to a server, indexed by
//! header byte per direction.

use std::sync::Arc;

use crate::{Direction, PacketSchema, ProtocolError, packets};

const SLOTS: usize = 256;

/// Static table of packet schemas, built once at startup.
///
/// Lookups are a single index into a fixed array per direction. A schema
/// declared [`Direction::Both`] occupies a slot in each.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    incoming: Vec<Option<Arc<PacketSchema>>>,
    outgoing: Vec<Option<Arc<PacketSchema>>>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            incoming: vec![None; SLOTS],
            outgoing: vec![None; SLOTS],
        }
    }

    /// A registry preloaded with the handshake and phase packets.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for schema in [packets::handshake_schema(), packets::phase_schema()] {
            // Fresh registry, so these headers cannot collide.
            let _ = registry.register(schema);
        }
        registry
    }

    /// Adds a schema.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidSchema`] if the header is already taken in
    /// one of the schema's directions. Nothing is inserted in that case.
    pub fn register(&mut self, schema: PacketSchema) -> Result<(), ProtocolError> {
        let header = usize::from(schema.header());
        let direction = schema.direction();
        let incoming = direction.includes(Direction::Incoming);
        let outgoing = direction.includes(Direction::Outgoing);

        for (wanted, slots, label) in [
            (incoming, &self.incoming, "incoming"),
            (outgoing, &self.outgoing, "outgoing"),
        ] {
            if let (true, Some(existing)) = (wanted, &slots[header]) {
                return Err(ProtocolError::InvalidSchema(format!(
                    "{}: header 0x{header:02X} already used by {} ({label})",
                    schema.name(),
                    existing.name()
                )));
            }
        }

        let schema = Arc::new(schema);
        if incoming {
            self.incoming[header] = Some(Arc::clone(&schema));
        }
        if outgoing {
            self.outgoing[header] = Some(schema);
        }
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, schema: PacketSchema) -> Result<Self, ProtocolError> {
        self.register(schema)?;
        Ok(self)
    }

    /// Finds the schema for `header` travelling in `direction`.
    ///
    /// `Direction::Both` matches a schema registered in either direction,
    /// preferring the incoming one.
    pub fn lookup(&self, header: u8, direction: Direction) -> Option<&Arc<PacketSchema>> {
        let slot = usize::from(header);
        match direction {
            Direction::Incoming => self.incoming[slot].as_ref(),
            Direction::Outgoing => self.outgoing[slot].as_ref(),
            Direction::Both => self.incoming[slot].as_ref().or(self.outgoing[slot].as_ref()),
        }
    }

    /// Number of distinct schemas registered.
    pub fn len(&self) -> usize {
        let both = self
            .incoming
            .iter()
            .flatten()
            .filter(|s| s.direction() == Direction::Both)
            .count();
        self.incoming.iter().flatten().count() + self.outgoing.iter().flatten().count() - both
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldKind;
    use crate::packets::{HANDSHAKE_HEADER, PHASE_HEADER};

    fn schema(header: u8, direction: Direction) -> PacketSchema {
        PacketSchema::builder("test", header, direction)
            .field("v", FieldKind::u8())
            .build()
            .unwrap()
    }

    #[test]
    fn test_with_builtin_registers_handshake_both_ways() {
        let registry = SchemaRegistry::with_builtin();
        assert!(registry.lookup(HANDSHAKE_HEADER, Direction::Incoming).is_some());
        assert!(registry.lookup(HANDSHAKE_HEADER, Direction::Outgoing).is_some());
        assert!(registry.lookup(PHASE_HEADER, Direction::Outgoing).is_some());
        assert!(registry.lookup(PHASE_HEADER, Direction::Incoming).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_same_header_other_direction_is_allowed() {
        let mut registry = SchemaRegistry::new();
        registry.register(schema(0x10, Direction::Incoming)).unwrap();
        registry.register(schema(0x10, Direction::Outgoing)).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_duplicate_header_returns_error() {
        let mut registry = SchemaRegistry::new();
        registry.register(schema(0x10, Direction::Incoming)).unwrap();

        let err = registry.register(schema(0x10, Direction::Both)).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidSchema(_)));
        // The failed Both registration must not leak into the outgoing slot.
        assert!(registry.lookup(0x10, Direction::Outgoing).is_none());
    }

    #[test]
    fn test_lookup_unknown_header_returns_none() {
        let registry = SchemaRegistry::with_builtin();
        assert!(registry.lookup(0x42, Direction::Incoming).is_none());
        assert!(SchemaRegistry::new().is_empty());
    }
}
