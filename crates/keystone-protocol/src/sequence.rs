//! Per-session rotating sequence check.
//!
//! Every sequenced packet carries one byte taken from a 256-entry
//! permutation table, indexed by a counter that advances once per packet
//! and wraps at 256. Inbound and outbound traffic keep separate counters
//! over the same table.
//!
//! ```text
//! counter:  0      1      2     ...  255     0 ...
//! byte:     t[0]   t[1]   t[2]  ...  t[255]  t[0] ...
//! ```
//!
//! A rejected inbound byte leaves the counter untouched; the caller is
//! expected to close the connection.

use std::sync::{Arc, LazyLock};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

static IDENTITY: LazyLock<Arc<SequenceTable>> = LazyLock::new(|| {
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        *slot = i as u8;
    }
    Arc::new(SequenceTable(table))
});

/// A bijection on `0..=255` mapping counter values to expected bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct SequenceTable([u8; 256]);

impl SequenceTable {
    /// The shared identity table: `table[i] == i`.
    pub fn identity() -> Arc<Self> {
        Arc::clone(&IDENTITY)
    }

    /// Wraps an explicit permutation.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidSchema`] if some byte value appears twice.
    pub fn from_permutation(table: [u8; 256]) -> Result<Self, ProtocolError> {
        let mut seen = [false; 256];
        for &byte in &table {
            if std::mem::replace(&mut seen[usize::from(byte)], true) {
                return Err(ProtocolError::InvalidSchema(format!(
                    "sequence table repeats byte 0x{byte:02X}"
                )));
            }
        }
        Ok(Self(table))
    }

    /// Derives a permutation from a handshake key. Both ends that know the
    /// key derive the same table.
    pub fn keyed(key: u32) -> Self {
        let mut table = IDENTITY.0;
        let mut rng = StdRng::seed_from_u64(u64::from(key));
        table.shuffle(&mut rng);
        Self(table)
    }

    /// The byte expected when the counter equals `counter`.
    pub fn expected(&self, counter: u8) -> u8 {
        self.0[usize::from(counter)]
    }
}

impl std::fmt::Debug for SequenceTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SequenceTable")
            .field(&format_args!("[{:02X} {:02X} {:02X} ..]", self.0[0], self.0[1], self.0[2]))
            .finish()
    }
}

/// How a session obtains its sequence table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceMode {
    /// `table[i] == i`, shared by all sessions.
    #[default]
    Identity,
    /// Shuffled with the handshake key as seed.
    Keyed,
}

impl SequenceMode {
    /// The table a session should use once `key` has been verified.
    pub fn table_for(self, key: u32) -> Arc<SequenceTable> {
        match self {
            Self::Identity => SequenceTable::identity(),
            Self::Keyed => Arc::new(SequenceTable::keyed(key)),
        }
    }
}

/// Sequence state of one session.
#[derive(Debug, Clone)]
pub struct Sequencer {
    table: Arc<SequenceTable>,
    inbound: u8,
    outbound: u8,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new(SequenceTable::identity())
    }
}

impl Sequencer {
    pub fn new(table: Arc<SequenceTable>) -> Self {
        Self {
            table,
            inbound: 0,
            outbound: 0,
        }
    }

    /// Checks an inbound sequence byte and advances the inbound counter.
    ///
    /// # Errors
    /// [`ProtocolError::SequenceMismatch`] if `actual` is not the table
    /// entry for the current counter. The counter is not advanced.
    pub fn consume_inbound(&mut self, actual: u8) -> Result<(), ProtocolError> {
        let expected = self.table.expected(self.inbound);
        if actual != expected {
            return Err(ProtocolError::SequenceMismatch { expected, actual });
        }
        self.inbound = self.inbound.wrapping_add(1);
        Ok(())
    }

    /// Returns the byte to stamp on the next outbound packet and advances
    /// the outbound counter.
    pub fn next_outbound(&mut self) -> u8 {
        let byte = self.table.expected(self.outbound);
        self.outbound = self.outbound.wrapping_add(1);
        byte
    }

    /// Sets both counters back to zero.
    pub fn reset(&mut self) {
        self.inbound = 0;
        self.outbound = 0;
    }

    /// Swaps in a new table and resets both counters.
    pub fn rekey(&mut self, table: Arc<SequenceTable>) {
        self.table = table;
        self.reset();
    }

    /// Current `(inbound, outbound)` counters.
    pub fn counters(&self) -> (u8, u8) {
        (self.inbound, self.outbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_inbound_follows_table_and_wraps() {
        let mut seq = Sequencer::default();
        for round in 0..2 {
            for i in 0..=255u8 {
                assert!(seq.consume_inbound(i).is_ok(), "round {round}, byte {i}");
            }
        }
        assert_eq!(seq.counters(), (0, 0));
    }

    #[test]
    fn test_consume_inbound_mismatch_leaves_counter_unchanged() {
        let mut seq = Sequencer::default();
        seq.consume_inbound(0).unwrap();

        let err = seq.consume_inbound(7).unwrap_err();
        assert!(matches!(err, ProtocolError::SequenceMismatch { expected: 1, actual: 7 }));
        assert_eq!(seq.counters(), (1, 0));

        // The correct byte is still accepted afterwards.
        seq.consume_inbound(1).unwrap();
    }

    #[test]
    fn test_next_outbound_is_independent_of_inbound() {
        let mut seq = Sequencer::default();
        assert_eq!(seq.next_outbound(), 0);
        assert_eq!(seq.next_outbound(), 1);
        seq.consume_inbound(0).unwrap();
        assert_eq!(seq.counters(), (1, 2));

        seq.reset();
        assert_eq!(seq.counters(), (0, 0));
    }

    #[test]
    fn test_keyed_table_is_a_deterministic_permutation() {
        let a = SequenceTable::keyed(0xA1B2_C3D4);
        let b = SequenceTable::keyed(0xA1B2_C3D4);
        assert_eq!(a, b);
        assert!(SequenceTable::from_permutation(a.0).is_ok());
        assert_ne!(a, *SequenceTable::identity());
    }

    #[test]
    fn test_from_permutation_duplicate_byte_returns_error() {
        let mut table = IDENTITY.0;
        table[10] = 11;
        assert!(SequenceTable::from_permutation(table).is_err());
    }

    #[test]
    fn test_rekey_switches_table_and_resets() {
        let mut seq = Sequencer::default();
        seq.next_outbound();
        let keyed = SequenceMode::Keyed.table_for(99);
        let first = keyed.expected(0);
        seq.rekey(keyed);
        assert_eq!(seq.counters(), (0, 0));
        assert_eq!(seq.next_outbound(), first);
    }
}
