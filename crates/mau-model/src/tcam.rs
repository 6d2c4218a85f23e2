//! Ternary match arrays, TCAM chains and priority resolution.

use log::warn;

use crate::{bits::mask64, Gress, MatchInput, MauError};

/// Physical TCAM rows.
pub const TCAM_ROWS: usize = 12;
/// Physical TCAM columns.
pub const TCAM_COLS: usize = 2;
/// Entries per physical TCAM.
pub const TCAM_ENTRIES: usize = 512;
/// Logical TCAMs per stage.
pub const LOGICAL_TCAMS: usize = 8;
/// Width of one TCAM's search slice.
pub const TCAM_SLICE_BITS: u32 = 44;
/// Search slices on the ternary bus.
pub const TCAM_SLICES: usize = 12;

/// One ternary entry: bits where `mask` is set must equal `key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TcamWord {
    /// Match value.
    pub key: u64,
    /// Care bits.
    pub mask: u64,
    /// Entry takes part in searches.
    pub valid: bool,
}

impl TcamWord {
    /// Valid entry, truncated to the slice width.
    #[must_use]
    pub const fn new(key: u64, mask: u64) -> Self {
        Self {
            key: key & mask64(TCAM_SLICE_BITS),
            mask: mask & mask64(TCAM_SLICE_BITS),
            valid: true,
        }
    }

    /// Entry matches a search slice.
    #[must_use]
    pub const fn matches(&self, input: u64) -> bool {
        self.valid && (input ^ self.key) & self.mask & mask64(TCAM_SLICE_BITS) == 0
    }
}

/// Mode of one physical TCAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TcamConfig {
    /// TCAM takes part in searches.
    pub enabled: bool,
    /// Thread the TCAM serves.
    pub gress: Gress,
    /// Ternary bus slice searched.
    pub input_slice: u8,
}

/// A run of TCAMs in one column searched as one wide entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TcamChain {
    /// Column.
    pub col: u8,
    /// First row; its TIND holds the payload.
    pub head_row: u8,
    /// Rows in the chain.
    pub width: u8,
    /// Priority of the chain relative to its siblings.
    pub priority_base: u16,
    /// VPN of direct-addressed resources for hits in this chain.
    pub direct_vpn: u8,
}

/// A logical TCAM and its chains.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct LogicalTcamConfig {
    /// Logical table fed by this TCAM.
    pub logical_table: Option<u8>,
    /// Chains, in any order.
    pub chains: Vec<TcamChain>,
}

impl LogicalTcamConfig {
    /// Rejects chains that share a priority base.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::DuplicateChainPriority`].
    pub fn validate(&self, index: usize) -> Result<(), MauError> {
        for (position, chain) in self.chains.iter().enumerate() {
            let duplicate = self.chains[..position]
                .iter()
                .any(|other| other.priority_base == chain.priority_base);
            if duplicate {
                return Err(MauError::DuplicateChainPriority {
                    tcam: u8::try_from(index).unwrap_or(u8::MAX),
                    priority_base: chain.priority_base,
                });
            }
        }
        Ok(())
    }
}

/// The winning ternary entry of a logical TCAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TernaryHit {
    /// Chain position in the logical TCAM.
    pub chain: u8,
    /// Head row.
    pub row: u8,
    /// Column.
    pub col: u8,
    /// Entry index.
    pub index: u16,
    /// `priority_base * 512 + index`.
    pub priority: u32,
    /// TIND payload at the head row.
    pub payload: u64,
    /// VPN for direct addressing.
    pub direct_vpn: u8,
}

/// Outcome of searching a logical TCAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TernarySearch {
    /// Highest-priority hit.
    pub hit: Option<TernaryHit>,
    /// Chains that could not be searched.
    pub chain_errors: u32,
}

/// Entry storage and TIND payloads of all physical TCAMs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcamArray {
    words: Vec<TcamWord>,
    tind: Vec<u64>,
}

impl Default for TcamArray {
    fn default() -> Self {
        Self::new()
    }
}

impl TcamArray {
    /// Array with every entry invalid.
    #[must_use]
    pub fn new() -> Self {
        Self {
            words: vec![TcamWord::default(); TCAM_ROWS * TCAM_COLS * TCAM_ENTRIES],
            tind: vec![0; TCAM_ROWS * TCAM_COLS * TCAM_ENTRIES],
        }
    }

    fn slot(row: usize, col: usize, index: usize) -> Result<usize, MauError> {
        if row >= TCAM_ROWS {
            return Err(MauError::OutOfRange {
                what: "tcam row",
                index: row,
            });
        }
        if col >= TCAM_COLS {
            return Err(MauError::OutOfRange {
                what: "tcam col",
                index: col,
            });
        }
        if index >= TCAM_ENTRIES {
            return Err(MauError::OutOfRange {
                what: "tcam entry",
                index,
            });
        }
        Ok((row * TCAM_COLS + col) * TCAM_ENTRIES + index)
    }

    /// Reads an entry.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] outside the array.
    pub fn read(&self, row: usize, col: usize, index: usize) -> Result<TcamWord, MauError> {
        let slot = Self::slot(row, col, index)?;
        Ok(self.words.get(slot).copied().unwrap_or_default())
    }

    /// Writes an entry.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] outside the array.
    pub fn write(
        &mut self,
        row: usize,
        col: usize,
        index: usize,
        word: TcamWord,
    ) -> Result<(), MauError> {
        let slot = Self::slot(row, col, index)?;
        if let Some(target) = self.words.get_mut(slot) {
            *target = word;
        }
        Ok(())
    }

    /// Reads a TIND payload.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] outside the array.
    pub fn read_tind(&self, row: usize, col: usize, index: usize) -> Result<u64, MauError> {
        let slot = Self::slot(row, col, index)?;
        Ok(self.tind.get(slot).copied().unwrap_or(0))
    }

    /// Writes a TIND payload.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] outside the array.
    pub fn write_tind(
        &mut self,
        row: usize,
        col: usize,
        index: usize,
        payload: u64,
    ) -> Result<(), MauError> {
        let slot = Self::slot(row, col, index)?;
        if let Some(target) = self.tind.get_mut(slot) {
            *target = payload;
        }
        Ok(())
    }

    /// Copies entries `[src, src + count)` to `[dst, dst + count)` in one TCAM,
    /// in the direction that keeps overlapping ranges intact.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] when either range leaves the TCAM.
    pub fn copy_range(
        &mut self,
        row: usize,
        col: usize,
        src: usize,
        dst: usize,
        count: usize,
    ) -> Result<(), MauError> {
        if count == 0 {
            return Ok(());
        }
        Self::slot(row, col, src + count - 1)?;
        Self::slot(row, col, dst + count - 1)?;
        let mut offsets: Vec<usize> = (0..count).collect();
        if dst > src {
            offsets.reverse();
        }
        for offset in offsets {
            let word = self.read(row, col, src + offset)?;
            let tind = self.read_tind(row, col, src + offset)?;
            self.write(row, col, dst + offset, word)?;
            self.write_tind(row, col, dst + offset, tind)?;
        }
        Ok(())
    }

    /// Searches every chain of a logical TCAM for `gress`.
    ///
    /// Chains that leave the array or cross a disabled or foreign TCAM are
    /// skipped and counted in `chain_errors`.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::TcamPriorityTie`] when two hits share a priority and
    /// `relax_tie` is off.
    pub fn search(
        &self,
        modes: &[TcamConfig],
        logical: &LogicalTcamConfig,
        input: &MatchInput,
        gress: Gress,
        relax_tie: bool,
    ) -> Result<TernarySearch, MauError> {
        let table = logical.logical_table.unwrap_or(u8::MAX);
        let mut result = TernarySearch::default();
        for (position, chain) in logical.chains.iter().enumerate() {
            let Some(rows) = chain_rows(modes, chain, gress) else {
                warn!(
                    "table {table}: tcam chain col {} rows {}+{} unusable for {gress:?}",
                    chain.col, chain.head_row, chain.width
                );
                result.chain_errors = result.chain_errors.saturating_add(1);
                continue;
            };
            let Some(index) = self.search_chain(chain, &rows, input) else {
                continue;
            };
            let hit = TernaryHit {
                chain: u8::try_from(position).unwrap_or(u8::MAX),
                row: chain.head_row,
                col: chain.col,
                index: u16::try_from(index).unwrap_or(u16::MAX),
                priority: u32::from(chain.priority_base) * 512
                    + u32::try_from(index).unwrap_or(0),
                payload: self.read_tind(
                    usize::from(chain.head_row),
                    usize::from(chain.col),
                    index,
                )?,
                direct_vpn: chain.direct_vpn,
            };
            match result.hit {
                Some(best) if best.priority == hit.priority => {
                    if !relax_tie {
                        return Err(MauError::TcamPriorityTie {
                            table,
                            row: hit.row,
                            col: hit.col,
                            priority: hit.priority,
                        });
                    }
                    warn!("table {table}: tcam priority tie at {}, keeping first", hit.priority);
                }
                Some(best) if best.priority > hit.priority => {}
                _ => result.hit = Some(hit),
            }
        }
        Ok(result)
    }

    fn search_chain(
        &self,
        chain: &TcamChain,
        rows: &[(usize, u64)],
        input: &MatchInput,
    ) -> Option<usize> {
        let col = usize::from(chain.col);
        let slices: Vec<(usize, u64)> = rows
            .iter()
            .map(|(row, slice)| (*row, slice_bits(input, *slice)))
            .collect();
        (0..TCAM_ENTRIES).rev().find(|index| {
            slices.iter().all(|(row, bits)| {
                self.read(*row, col, *index)
                    .is_ok_and(|word| word.matches(*bits))
            })
        })
    }
}

fn chain_rows(modes: &[TcamConfig], chain: &TcamChain, gress: Gress) -> Option<Vec<(usize, u64)>> {
    let head = usize::from(chain.head_row);
    let width = usize::from(chain.width);
    let col = usize::from(chain.col);
    if width == 0 || head + width > TCAM_ROWS || col >= TCAM_COLS {
        return None;
    }
    (head..head + width)
        .map(|row| {
            let mode = modes.get(row * TCAM_COLS + col)?;
            (mode.enabled && mode.gress == gress).then_some((row, u64::from(mode.input_slice)))
        })
        .collect()
}

fn slice_bits(input: &MatchInput, slice: u64) -> u64 {
    let slice = usize::try_from(slice).unwrap_or(usize::MAX);
    if slice >= TCAM_SLICES {
        return 0;
    }
    input.ternary_bits(slice * TCAM_SLICE_BITS as usize, TCAM_SLICE_BITS as usize)
}

#[cfg(test)]
mod tests {
    use super::{
        LogicalTcamConfig, TcamArray, TcamChain, TcamConfig, TcamWord, TCAM_COLS, TCAM_ENTRIES,
    };
    use crate::{Gress, MatchInput, MauError};
    use proptest::prelude::*;

    fn modes() -> Vec<TcamConfig> {
        vec![
            TcamConfig {
                enabled: true,
                gress: Gress::Ingress,
                input_slice: 0,
            };
            24
        ]
    }

    fn input_with(byte0: u8) -> MatchInput {
        let mut input = MatchInput::default();
        input.ternary[0] = byte0;
        input.ternary_valid[0] = true;
        input
    }

    fn chain(col: u8, head_row: u8, priority_base: u16) -> TcamChain {
        TcamChain {
            col,
            head_row,
            width: 1,
            priority_base,
            direct_vpn: 0,
        }
    }

    #[test]
    fn masked_match() {
        let word = TcamWord::new(0xA0, 0xF0);
        assert!(word.matches(0xA5));
        assert!(!word.matches(0xB5));
        assert!(!TcamWord::default().matches(0));
    }

    #[test]
    fn highest_index_wins_within_chain() {
        let mut tcams = TcamArray::new();
        tcams.write(0, 0, 3, TcamWord::new(0, 0)).unwrap();
        tcams.write(0, 0, 40, TcamWord::new(0x12, 0xFF)).unwrap();
        tcams.write_tind(0, 0, 40, 0xBEEF).unwrap();
        let logical = LogicalTcamConfig {
            logical_table: Some(1),
            chains: vec![chain(0, 0, 0)],
        };
        let search = tcams
            .search(&modes(), &logical, &input_with(0x12), Gress::Ingress, false)
            .unwrap();
        let hit = search.hit.unwrap();
        assert_eq!(hit.index, 40);
        assert_eq!(hit.payload, 0xBEEF);

        let miss_wide = tcams
            .search(&modes(), &logical, &input_with(0x13), Gress::Ingress, false)
            .unwrap();
        assert_eq!(miss_wide.hit.unwrap().index, 3);
    }

    #[test]
    fn wide_chain_needs_every_row() {
        let mut tcams = TcamArray::new();
        let mut modes = modes();
        modes[TCAM_COLS].input_slice = 1;
        tcams.write(0, 0, 7, TcamWord::new(0x12, 0xFF)).unwrap();
        let logical = LogicalTcamConfig {
            logical_table: Some(1),
            chains: vec![TcamChain {
                width: 2,
                ..chain(0, 0, 0)
            }],
        };
        let input = input_with(0x12);
        let search = tcams
            .search(&modes, &logical, &input, Gress::Ingress, false)
            .unwrap();
        assert_eq!(search.hit, None);
        tcams.write(1, 0, 7, TcamWord::new(0, 0)).unwrap();
        let search = tcams
            .search(&modes, &logical, &input, Gress::Ingress, false)
            .unwrap();
        assert_eq!(search.hit.map(|hit| hit.index), Some(7));
    }

    #[test]
    fn unusable_chains_are_counted_not_searched() {
        let mut tcams = TcamArray::new();
        tcams.write(11, 1, 0, TcamWord::new(0, 0)).unwrap();
        let mut modes = modes();
        modes[2 * TCAM_COLS + 1].gress = Gress::Egress;
        let logical = LogicalTcamConfig {
            logical_table: Some(0),
            chains: vec![
                TcamChain {
                    width: 2,
                    ..chain(1, 11, 0)
                },
                chain(1, 2, 1),
            ],
        };
        let search = tcams
            .search(&modes, &logical, &input_with(0), Gress::Ingress, false)
            .unwrap();
        assert_eq!(search.chain_errors, 2);
        assert_eq!(search.hit, None);
    }

    #[test]
    fn duplicate_bases_rejected_at_config_time() {
        let logical = LogicalTcamConfig {
            logical_table: Some(0),
            chains: vec![chain(0, 0, 4), chain(1, 0, 4)],
        };
        assert_eq!(
            logical.validate(3),
            Err(MauError::DuplicateChainPriority {
                tcam: 3,
                priority_base: 4,
            })
        );
    }

    #[test]
    fn runtime_tie_is_fatal_unless_relaxed() {
        let mut tcams = TcamArray::new();
        tcams.write(0, 0, 9, TcamWord::new(0, 0)).unwrap();
        tcams.write(0, 1, 9, TcamWord::new(0, 0)).unwrap();
        let logical = LogicalTcamConfig {
            logical_table: Some(5),
            chains: vec![chain(0, 0, 2), chain(1, 0, 2)],
        };
        let tie = tcams.search(&modes(), &logical, &input_with(0), Gress::Ingress, false);
        assert!(matches!(tie, Err(MauError::TcamPriorityTie { table: 5, .. })));
        let relaxed = tcams
            .search(&modes(), &logical, &input_with(0), Gress::Ingress, true)
            .unwrap();
        assert_eq!(relaxed.hit.map(|hit| hit.col), Some(0));
    }

    #[test]
    fn copy_range_handles_overlap() {
        let mut tcams = TcamArray::new();
        for index in 0..4 {
            tcams
                .write(2, 0, index, TcamWord::new(index as u64, 0xFF))
                .unwrap();
        }
        tcams.copy_range(2, 0, 0, 2, 4).unwrap();
        for index in 0..4 {
            assert_eq!(tcams.read(2, 0, index + 2).unwrap().key, index as u64);
        }
        assert!(tcams.copy_range(2, 0, TCAM_ENTRIES - 1, 0, 2).is_err());
    }

    proptest! {
        #[test]
        fn highest_priority_hit_wins(
            entries in proptest::collection::vec((0usize..TCAM_ENTRIES, 0u16..4, any::<bool>()), 1..12),
        ) {
            let mut tcams = TcamArray::new();
            let logical = LogicalTcamConfig {
                logical_table: Some(0),
                chains: (0..4u16).map(|base| chain((base % 2) as u8, (base / 2) as u8, base)).collect(),
            };
            let mut expected: Option<u32> = None;
            for (index, base, hits) in &entries {
                let target = chain((*base % 2) as u8, (*base / 2) as u8, *base);
                let word = if *hits { TcamWord::new(0, 0) } else { TcamWord::new(1, 1) };
                tcams.write(usize::from(target.head_row), usize::from(target.col), *index, word).unwrap();
            }
            for base in 0..4u16 {
                let target = chain((base % 2) as u8, (base / 2) as u8, base);
                for index in 0..TCAM_ENTRIES {
                    let word = tcams.read(usize::from(target.head_row), usize::from(target.col), index).unwrap();
                    if word.matches(0) {
                        let priority = u32::from(base) * 512 + index as u32;
                        expected = Some(expected.map_or(priority, |best| best.max(priority)));
                    }
                }
            }
            let search = tcams.search(&modes(), &logical, &input_with(0), Gress::Ingress, false).unwrap();
            prop_assert_eq!(search.hit.map(|hit| hit.priority), expected);
        }
    }
}
