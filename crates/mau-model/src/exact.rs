//! Exact-match word format, way descriptors and the per-table stash.
//!
//! An exact word carries the key in bits `0..64`, the match payload in
//! `64..118` and a version/valid mask in `118..122`. A way hashes the key to a
//! word index plus a RAM select; only the RAM whose select equals the hashed
//! select is read.

use crate::{
    bits::{deposit128, field128, mask64},
    HashResult, MatchInput, MatchPayload, MauError, LOGICAL_TABLES, PAYLOAD_BITS,
};

/// Entries in each table's stash.
pub const STASH_ENTRIES: usize = 4;
/// Bits of the word index a way takes from its hash group.
pub const WAY_INDEX_BITS: u32 = 10;
/// Maximum exact key bytes per table.
pub const EXACT_KEY_BYTES: usize = 8;

const KEY_LSB: u32 = 0;
const PAYLOAD_LSB: u32 = 64;
const VERSION_LSB: u32 = 118;
const VERSION_BITS: u32 = 4;

/// Decoded exact-match word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ExactEntry {
    /// Stored key.
    pub key: u64,
    /// Payload returned on a hit.
    pub payload: MatchPayload,
    /// One bit per packet version; zero means the entry is invalid.
    pub version_mask: u8,
}

impl ExactEntry {
    /// Entry valid for every version.
    #[must_use]
    pub const fn new(key: u64, payload: MatchPayload) -> Self {
        Self {
            key,
            payload,
            version_mask: 0xF,
        }
    }

    /// Encodes to a RAM word.
    #[must_use]
    pub fn to_word(&self) -> u128 {
        let word = deposit128(0, KEY_LSB, 64, u128::from(self.key));
        let word = deposit128(word, PAYLOAD_LSB, PAYLOAD_BITS, u128::from(self.payload.to_bits()));
        deposit128(word, VERSION_LSB, VERSION_BITS, u128::from(self.version_mask))
    }

    /// Decodes a RAM word.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_word(word: u128) -> Self {
        Self {
            key: field128(word, KEY_LSB, 64) as u64,
            payload: MatchPayload::from_bits(field128(word, PAYLOAD_LSB, PAYLOAD_BITS) as u64),
            version_mask: field128(word, VERSION_LSB, VERSION_BITS) as u8,
        }
    }

    /// Entry matches `key` under `match_mask` for packet `version`.
    #[must_use]
    pub const fn matches(&self, key: u64, match_mask: u64, version: u8) -> bool {
        (self.version_mask >> (version & 0x3)) & 1 == 1 && (self.key ^ key) & match_mask == 0
    }
}

/// One RAM of a way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct WayRam {
    /// SRAM row.
    pub row: u8,
    /// SRAM column.
    pub col: u8,
    /// Hashed select value that addresses this RAM.
    pub select: u8,
    /// VPN used for direct addressing of hits in this RAM.
    pub vpn: u8,
}

/// An exact-match way.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ExactWayConfig {
    /// Owning logical table.
    pub table: u8,
    /// Hash group supplying the address.
    pub hash_group: u8,
    /// First hash bit of the word index.
    pub hash_lsb: u8,
    /// Hash bits above the index used as RAM select.
    pub select_bits: u8,
    /// RAMs of the way.
    pub rams: Vec<WayRam>,
}

impl ExactWayConfig {
    /// Word index and RAM select for a packet.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn locate(&self, hash: &HashResult) -> (u16, u8) {
        let lsb = u32::from(self.hash_lsb);
        let group = usize::from(self.hash_group);
        let index = hash.field(group, lsb, WAY_INDEX_BITS) as u16;
        let select = hash.field(group, lsb + WAY_INDEX_BITS, u32::from(self.select_bits.min(8))) as u8;
        (index, select)
    }

    /// RAM addressed by a select value.
    #[must_use]
    pub fn ram(&self, select: u8) -> Option<&WayRam> {
        self.rams.iter().find(|ram| ram.select == select)
    }
}

/// Assembles a table's live key from its exact-bus byte list.
#[must_use]
pub fn exact_key(input: &MatchInput, key_bytes: &[u8]) -> u64 {
    key_bytes
        .iter()
        .take(EXACT_KEY_BYTES)
        .enumerate()
        .fold(0u64, |key, (position, byte)| {
            key | (u64::from(input.exact_byte(usize::from(*byte))) << (position * 8))
        })
}

/// Match mask covering the bytes a key actually uses.
#[must_use]
pub fn key_mask(key_bytes: usize) -> u64 {
    mask64(u32::try_from(key_bytes.min(EXACT_KEY_BYTES) * 8).unwrap_or(64))
}

/// One stash entry and the main-table location it shadows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StashEntry {
    /// Exact word.
    pub word: u128,
    /// Entry takes part in lookups.
    pub valid: bool,
    /// Shadowed VPN.
    pub vpn: u8,
    /// Shadowed word index.
    pub index: u16,
}

/// Stash entries of every logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashArray {
    entries: Vec<StashEntry>,
}

impl Default for StashArray {
    fn default() -> Self {
        Self::new()
    }
}

impl StashArray {
    /// Empty stashes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: vec![StashEntry::default(); LOGICAL_TABLES * STASH_ENTRIES],
        }
    }

    fn slot(table: u8, entry: usize) -> Result<usize, MauError> {
        if usize::from(table) >= LOGICAL_TABLES {
            return Err(MauError::OutOfRange {
                what: "logical table",
                index: usize::from(table),
            });
        }
        if entry >= STASH_ENTRIES {
            return Err(MauError::OutOfRange {
                what: "stash entry",
                index: entry,
            });
        }
        Ok(usize::from(table) * STASH_ENTRIES + entry)
    }

    /// Reads an entry.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] for a bad table or entry.
    pub fn get(&self, table: u8, entry: usize) -> Result<StashEntry, MauError> {
        let slot = Self::slot(table, entry)?;
        Ok(self.entries.get(slot).copied().unwrap_or_default())
    }

    /// Writes an entry.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] for a bad table or entry.
    pub fn set(&mut self, table: u8, entry: usize, value: StashEntry) -> Result<(), MauError> {
        let slot = Self::slot(table, entry)?;
        if let Some(target) = self.entries.get_mut(slot) {
            *target = value;
        }
        Ok(())
    }

    /// Entries of one table.
    #[must_use]
    pub fn table(&self, table: u8) -> &[StashEntry] {
        let start = usize::from(table) * STASH_ENTRIES;
        self.entries.get(start..start + STASH_ENTRIES).unwrap_or(&[])
    }
}
