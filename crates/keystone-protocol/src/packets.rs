//! Packets every server speaks regardless of role.
//!
//! | Header | Name      | Direction | Body                                  |
//! |--------|-----------|-----------|---------------------------------------|
//! | `0xFF` | handshake | both      | `handshake: u32, time: u32, delta: i32` |
//! | `0xFD` | phase     | outgoing  | `phase: u8`                           |
//!
//! Neither is sequenced: the handshake runs before the sequencer is reset,
//! and the phase announcement brackets it.

use crate::{Direction, FieldKind, FieldSpec, Packet, PacketSchema, Phase};

pub const HANDSHAKE_HEADER: u8 = 0xFF;
pub const PHASE_HEADER: u8 = 0xFD;

pub fn handshake_schema() -> PacketSchema {
    PacketSchema::fixed(
        "handshake",
        HANDSHAKE_HEADER,
        Direction::Both,
        true,
        vec![
            FieldSpec::new(0, "handshake", FieldKind::u32()),
            FieldSpec::new(1, "time", FieldKind::u32()),
            FieldSpec::new(2, "delta", FieldKind::i32()),
        ],
    )
}

pub fn phase_schema() -> PacketSchema {
    PacketSchema::fixed(
        "phase",
        PHASE_HEADER,
        Direction::Outgoing,
        false,
        vec![FieldSpec::new(0, "phase", FieldKind::u8())],
    )
}

/// The challenge (server → client) or its echo (client → server).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePayload {
    pub handshake: u32,
    /// Sender's clock in milliseconds, truncated to 32 bits.
    pub time: u32,
    /// Clock correction the receiver should apply.
    pub delta: i32,
}

impl HandshakePayload {
    pub fn to_packet(self) -> Packet {
        Packet::new(
            HANDSHAKE_HEADER,
            vec![self.handshake.into(), self.time.into(), self.delta.into()],
        )
    }

    /// Reads a decoded handshake packet. Returns `None` if `packet` is not
    /// one.
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        if packet.header() != HANDSHAKE_HEADER {
            return None;
        }
        Some(Self {
            handshake: u32::try_from(packet.uint(0)?).ok()?,
            time: u32::try_from(packet.uint(1)?).ok()?,
            delta: i32::try_from(packet.int(2)?).ok()?,
        })
    }
}

/// Builds the phase announcement for `phase`.
pub fn phase_packet(phase: Phase) -> Packet {
    Packet::new(PHASE_HEADER, vec![phase.as_u8().into()])
}
