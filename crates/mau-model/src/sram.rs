//! Unit SRAM array of a stage and the usage map that gives each RAM its role.

use crate::{AluKind, MauError};

/// RAM rows.
pub const SRAM_ROWS: usize = 8;
/// RAM columns.
pub const SRAM_COLS: usize = 12;
/// 128-bit words per RAM.
pub const SRAM_WORDS: usize = 1024;

/// Role of one unit RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SramUse {
    /// Not in use.
    #[default]
    Unused,
    /// Exact-match way RAM (way membership lives in the way descriptor).
    ExactMatch,
    /// Action data of a table at one VPN.
    ActionData {
        /// Owning logical table.
        table: u8,
        /// Virtual page.
        vpn: u8,
    },
    /// Statistics of a stats ALU at one VPN.
    Stats {
        /// Stats ALU.
        alu: u8,
        /// Virtual page.
        vpn: u8,
    },
    /// Meter, selector or stateful words of a meter ALU at one VPN.
    Meter {
        /// Meter ALU.
        alu: u8,
        /// Virtual page.
        vpn: u8,
    },
    /// Idle-time words of an idle ALU at one VPN.
    Idle {
        /// Idle ALU.
        alu: u8,
        /// Virtual page.
        vpn: u8,
    },
}

impl SramUse {
    /// Usage tag an ALU of `kind` looks for; `None` for action data.
    #[must_use]
    pub const fn for_alu(kind: AluKind, alu: u8, vpn: u8) -> Option<Self> {
        match kind {
            AluKind::Stats => Some(Self::Stats { alu, vpn }),
            AluKind::Meter => Some(Self::Meter { alu, vpn }),
            AluKind::Idle => Some(Self::Idle { alu, vpn }),
            AluKind::Action => None,
        }
    }
}

/// Word storage for every unit RAM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SramArray {
    words: Vec<u128>,
}

impl Default for SramArray {
    fn default() -> Self {
        Self::new()
    }
}

impl SramArray {
    /// Zeroed array.
    #[must_use]
    pub fn new() -> Self {
        Self {
            words: vec![0; SRAM_ROWS * SRAM_COLS * SRAM_WORDS],
        }
    }

    fn slot(row: usize, col: usize, word: usize) -> Result<usize, MauError> {
        if row >= SRAM_ROWS {
            return Err(MauError::OutOfRange {
                what: "sram row",
                index: row,
            });
        }
        if col >= SRAM_COLS {
            return Err(MauError::OutOfRange {
                what: "sram col",
                index: col,
            });
        }
        if word >= SRAM_WORDS {
            return Err(MauError::OutOfRange {
                what: "sram word",
                index: word,
            });
        }
        Ok((row * SRAM_COLS + col) * SRAM_WORDS + word)
    }

    /// Reads one word.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] for a location outside the array.
    pub fn read(&self, row: usize, col: usize, word: usize) -> Result<u128, MauError> {
        let slot = Self::slot(row, col, word)?;
        Ok(self.words.get(slot).copied().unwrap_or(0))
    }

    /// Writes one word.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] for a location outside the array.
    pub fn write(&mut self, row: usize, col: usize, word: usize, value: u128) -> Result<(), MauError> {
        let slot = Self::slot(row, col, word)?;
        if let Some(target) = self.words.get_mut(slot) {
            *target = value;
        }
        Ok(())
    }
}
