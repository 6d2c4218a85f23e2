//! Hash engine: GF(2) matrix hash of the exact bus into eight 52-bit groups.
//!
//! Output bit `b` of a group is the seed bit `b` XOR the parity of every
//! enabled, valid input bit `i` whose matrix column `matrix[i]` has bit `b` set.
//! Input bits are grouped in sixteen 64-bit stages that can be switched off
//! individually.

use crate::{bits::field64, bits::mask64, MatchInput, MauError, EXACT_XBAR_BYTES};

/// Hash groups per stage.
pub const HASH_GROUPS: usize = 8;
/// Width of a group's output.
pub const HASH_OUTPUT_BITS: u32 = 52;
/// Input bits (the whole exact bus).
pub const HASH_INPUT_BITS: usize = EXACT_XBAR_BYTES * 8;
/// Input bits per enable stage.
pub const HASH_STAGE_BITS: usize = 64;

/// Matrix, seed and stage enables of one hash group.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct HashGroupConfig {
    /// XOR-ed into the output.
    pub seed: u64,
    /// One bit per 64-bit input stage.
    pub stage_enable: u16,
    /// One 52-bit column per input bit.
    pub matrix: Vec<u64>,
}

impl Default for HashGroupConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            stage_enable: u16::MAX,
            matrix: vec![0; HASH_INPUT_BITS],
        }
    }
}

impl HashGroupConfig {
    /// Sets the matrix column of input bit `bit`.
    pub fn set_column(&mut self, bit: usize, column: u64) {
        if let Some(slot) = self.matrix.get_mut(bit) {
            *slot = column & mask64(HASH_OUTPUT_BITS);
        }
    }

    /// Checks the matrix shape.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] naming the group when the matrix is
    /// not exactly one column per input bit.
    #[allow(clippy::missing_const_for_fn)]
    pub fn validate(&self, group: usize) -> Result<(), MauError> {
        if self.matrix.len() == HASH_INPUT_BITS {
            Ok(())
        } else {
            Err(MauError::OutOfRange {
                what: "hash matrix",
                index: group,
            })
        }
    }
}

/// Hashes raw bus bytes with per-byte validity through one group.
#[must_use]
pub fn hash(bits: &[u8], valid: &[bool], group: &HashGroupConfig) -> u64 {
    let mut acc = 0u64;
    for (byte_index, byte) in bits.iter().enumerate().take(EXACT_XBAR_BYTES) {
        if *byte == 0 || !valid.get(byte_index).copied().unwrap_or(false) {
            continue;
        }
        let stage = (byte_index * 8) / HASH_STAGE_BITS;
        if (group.stage_enable >> stage) & 1 == 0 {
            continue;
        }
        for lane in 0..8 {
            if (byte >> lane) & 1 == 1 {
                acc ^= group.matrix.get(byte_index * 8 + lane).copied().unwrap_or(0);
            }
        }
    }
    (acc ^ group.seed) & mask64(HASH_OUTPUT_BITS)
}

/// Hashes the exact bus of a match input.
#[must_use]
pub fn hash_input(input: &MatchInput, group: &HashGroupConfig) -> u64 {
    hash(&input.exact, &input.exact_valid, group)
}

/// Outputs of all groups for one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct HashResult {
    /// One 52-bit value per group.
    pub values: [u64; HASH_GROUPS],
}

impl HashResult {
    /// Bits `[lsb, lsb + width)` of a group's output; zero for unknown groups.
    #[must_use]
    pub fn field(&self, group: usize, lsb: u32, width: u32) -> u64 {
        self.values
            .get(group)
            .map_or(0, |value| field64(*value, lsb, width))
    }
}

/// Hashes the exact bus through every configured group.
#[must_use]
pub fn hash_all(input: &MatchInput, groups: &[HashGroupConfig]) -> HashResult {
    let mut result = HashResult::default();
    for (slot, group) in result.values.iter_mut().zip(groups) {
        *slot = hash_input(input, group);
    }
    result
}
