//! Property-based checks of the codec and the incremental frame decoder.
//!
//! Schemas are generated along with matching values: integers of every
//! width and signedness, exact-length byte arrays, strings within
//! capacity, nested layouts, and a tail on dynamic-size packets.

use std::sync::Arc;

use bytes::BytesMut;
use keystone_protocol::{
    Direction, FieldKind, FieldValue, IntWidth, Packet, PacketSchema, SchemaRegistry, WireDecoder,
    codec,
};
use proptest::prelude::*;
use tokio_util::codec::Decoder;

const NAMES: [&str; 8] = ["f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7"];

// =========================================================================
// Strategies
// =========================================================================

fn int_field() -> impl Strategy<Value = (FieldKind, FieldValue)> {
    let width = prop_oneof![
        Just(IntWidth::One),
        Just(IntWidth::Two),
        Just(IntWidth::Four),
        Just(IntWidth::Eight),
    ];
    (width, any::<bool>(), any::<u64>()).prop_map(|(width, unsigned, raw)| {
        let bits = 8 * width.bytes() as u32;
        let value = if unsigned {
            FieldValue::UInt(if bits == 64 { raw } else { raw & ((1u64 << bits) - 1) })
        } else {
            // Sign-extend the low `bits` bits.
            let shift = 64 - bits;
            FieldValue::Int(((raw << shift) as i64) >> shift)
        };
        (FieldKind::Int { width, unsigned }, value)
    })
}

fn bytes_field() -> impl Strategy<Value = (FieldKind, FieldValue)> {
    (1usize..=8)
        .prop_flat_map(|len| prop::collection::vec(any::<u8>(), len))
        .prop_map(|bytes| (FieldKind::bytes(bytes.len()), FieldValue::Bytes(bytes)))
}

fn string_field() -> impl Strategy<Value = (FieldKind, FieldValue)> {
    (1usize..=12)
        .prop_flat_map(|capacity| {
            (
                Just(capacity),
                prop::collection::vec(prop::char::range('a', 'z'), 0..=capacity),
            )
        })
        .prop_map(|(capacity, chars)| {
            (
                FieldKind::string(capacity),
                FieldValue::Str(chars.into_iter().collect()),
            )
        })
}

fn leaf_field() -> impl Strategy<Value = (FieldKind, FieldValue)> {
    prop_oneof![int_field(), bytes_field(), string_field()]
}

fn nested_field() -> impl Strategy<Value = (FieldKind, FieldValue)> {
    prop::collection::vec(leaf_field(), 1..4).prop_map(|pairs| {
        let kind = FieldKind::nested(
            pairs
                .iter()
                .enumerate()
                .map(|(i, (kind, _))| (NAMES[i], kind.clone())),
        );
        let values = pairs.into_iter().map(|(_, value)| value).collect();
        (kind, FieldValue::Nested(values))
    })
}

fn any_field() -> impl Strategy<Value = (FieldKind, FieldValue)> {
    prop_oneof![3 => leaf_field(), 1 => nested_field()]
}

/// A generated schema together with one packet that fits it.
#[derive(Debug, Clone)]
struct Layout {
    sequenced: bool,
    dynamic: bool,
    fields: Vec<(FieldKind, FieldValue)>,
    tail: Option<Vec<u8>>,
}

impl Layout {
    fn schema(&self, header: u8) -> PacketSchema {
        let mut builder = PacketSchema::builder("generated", header, Direction::Incoming);
        if self.sequenced {
            builder = builder.sequenced();
        }
        if self.dynamic {
            builder = builder.dynamic_size();
        }
        for (i, (kind, _)) in self.fields.iter().enumerate() {
            builder = builder.field(NAMES[i], kind.clone());
        }
        if self.tail.is_some() {
            builder = builder.field("tail", FieldKind::Tail);
        }
        builder.build().unwrap()
    }

    fn packet(&self, header: u8) -> Packet {
        let mut values: Vec<FieldValue> = self.fields.iter().map(|(_, value)| value.clone()).collect();
        if let Some(tail) = &self.tail {
            values.push(FieldValue::Bytes(tail.clone()));
        }
        Packet::new(header, values)
    }
}

fn layout() -> impl Strategy<Value = Layout> {
    (
        any::<bool>(),
        any::<bool>(),
        prop::collection::vec(any_field(), 0..6),
        prop::collection::vec(any::<u8>(), 0..64),
    )
        .prop_map(|(sequenced, dynamic, fields, tail)| Layout {
            sequenced,
            dynamic,
            fields,
            tail: dynamic.then_some(tail),
        })
}

// =========================================================================
// Properties
// =========================================================================

proptest! {
    #[test]
    fn prop_decode_of_encode_returns_same_packet(layout in layout()) {
        let schema = layout.schema(0x42);
        let packet = layout.packet(0x42);

        let bytes = codec::encode_to_vec(&packet, &schema).unwrap();
        prop_assert_eq!(
            codec::frame_len(&bytes, &schema, usize::MAX).unwrap(),
            Some(bytes.len())
        );

        let decoded = codec::decode(&bytes, &schema).unwrap();
        prop_assert_eq!(decoded.sequence, layout.sequenced.then_some(0));
        prop_assert_eq!(decoded.packet, packet);
    }
}

proptest! {
    #[test]
    fn prop_wire_decoder_reassembles_any_chunking(
        layouts in prop::collection::vec(layout(), 1..6),
        chunks in prop::collection::vec(1usize..16, 1..20),
    ) {
        let mut registry = SchemaRegistry::new();
        let mut stream = Vec::new();
        let mut expected = Vec::new();
        for (i, layout) in layouts.iter().enumerate() {
            let header = i as u8 + 1;
            let schema = layout.schema(header);
            let packet = layout.packet(header);
            stream.extend(codec::encode_to_vec(&packet, &schema).unwrap());
            registry.register(schema).unwrap();
            expected.push(packet);
        }

        let mut decoder = WireDecoder::new(Arc::new(registry), usize::MAX);
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        let mut offset = 0;
        let mut sizes = chunks.iter().cycle();

        while offset < stream.len() {
            let step = sizes.next().copied().unwrap_or(1).min(stream.len() - offset);
            buf.extend_from_slice(&stream[offset..offset + step]);
            offset += step;
            while let Some(frame) = decoder.decode(&mut buf).unwrap() {
                decoded.push(frame.packet);
            }
        }

        prop_assert!(buf.is_empty());
        prop_assert_eq!(decoded, expected);
    }
}
