//! Control-plane maintenance: raw memory access, barrier locks, TCAM
//! moves, table moves, dumps and stateful clears.

use log::{debug, warn};

use crate::{
    AddressMode, AluKind, ConfigEvent, Mau, MauError, SramUse, StashEntry, StepKind, TcamWord,
    SRAM_WORDS,
};

/// A raw memory location reachable over the register bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MemAddress {
    /// Unit SRAM word.
    Sram {
        /// RAM row.
        row: u8,
        /// RAM column.
        col: u8,
        /// Word.
        word: u16,
    },
    /// TCAM entry.
    Tcam {
        /// TCAM row.
        row: u8,
        /// TCAM column.
        col: u8,
        /// Entry.
        index: u16,
    },
    /// Ternary indirection payload.
    Tind {
        /// TCAM row.
        row: u8,
        /// TCAM column.
        col: u8,
        /// Entry.
        index: u16,
    },
    /// Stash entry.
    Stash {
        /// Logical table.
        table: u8,
        /// Entry.
        entry: u8,
    },
}

/// Contents of one [`MemAddress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum PbusValue {
    /// SRAM word.
    Word(u128),
    /// TCAM entry.
    Tcam(TcamWord),
    /// TIND payload.
    Tind(u64),
    /// Stash entry.
    Stash(StashEntry),
}

impl PbusValue {
    const fn name(&self) -> &'static str {
        match self {
            Self::Word(_) => "sram word",
            Self::Tcam(_) => "tcam entry",
            Self::Tind(_) => "tind payload",
            Self::Stash(_) => "stash entry",
        }
    }
}

/// Word location inside a table's direct stats and idle pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MoveLocation {
    /// Virtual page.
    pub vpn: u8,
    /// Word within the page.
    pub index: u16,
}

/// A pushed table move waiting to be popped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TableMove {
    /// Entry being moved.
    pub src: MoveLocation,
    /// Destination.
    pub dst: MoveLocation,
}

/// One control-plane request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MaintenanceOp {
    /// Raw read.
    PbusRead {
        /// Location.
        addr: MemAddress,
    },
    /// Raw write.
    PbusWrite {
        /// Location.
        addr: MemAddress,
        /// New contents.
        value: PbusValue,
    },
    /// Suspends or resumes an ALU's sweeps.
    BarrierLock {
        /// ALU family.
        kind: AluKind,
        /// ALU.
        alu: u8,
        /// Suspend when set.
        lock: bool,
    },
    /// Writes one TCAM entry.
    TcamWrite {
        /// TCAM row.
        row: u8,
        /// TCAM column.
        col: u8,
        /// Entry.
        index: u16,
        /// Entry contents.
        word: TcamWord,
    },
    /// Moves a block of entries within one TCAM.
    TcamCopy {
        /// TCAM row.
        row: u8,
        /// TCAM column.
        col: u8,
        /// First source entry.
        src: u16,
        /// First destination entry.
        dst: u16,
        /// Entries copied.
        count: u16,
    },
    /// Announces that an entry of `table` moves from `src` to `dst`.
    PushTableMove {
        /// Logical table.
        table: u8,
        /// Old location.
        src: MoveLocation,
        /// New location.
        dst: MoveLocation,
    },
    /// Completes the pushed move of `table`.
    PopTableMove {
        /// Logical table.
        table: u8,
    },
    /// Reads every word of a stateful page.
    StatefulDump {
        /// Meter ALU.
        alu: u8,
        /// Virtual page.
        vpn: u8,
    },
    /// Reads every word of an idle page.
    IdleDump {
        /// Idle ALU.
        alu: u8,
        /// Virtual page.
        vpn: u8,
        /// Zero the page after reading.
        clear: bool,
    },
    /// Zeroes the stateful pages `vpn_lo..=vpn_hi` of a meter ALU.
    StatefulClear {
        /// Meter ALU.
        alu: u8,
        /// First page.
        vpn_lo: u8,
        /// Last page.
        vpn_hi: u8,
    },
}

impl MaintenanceOp {
    /// Invocation kind the request runs under.
    #[must_use]
    pub const fn step_kind(&self) -> StepKind {
        match self {
            Self::PbusRead { .. } => StepKind::PbusRead,
            Self::PbusWrite { .. }
            | Self::BarrierLock { .. }
            | Self::TcamWrite { .. }
            | Self::TcamCopy { .. }
            | Self::PushTableMove { .. }
            | Self::PopTableMove { .. } => StepKind::PbusWrite,
            Self::StatefulDump { .. } | Self::IdleDump { .. } => StepKind::Dump,
            Self::StatefulClear { .. } => StepKind::StatefulClear,
        }
    }
}

/// Completion of a [`MaintenanceOp`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MaintenanceReply {
    /// Request applied.
    Done,
    /// Raw read result.
    Read(PbusValue),
    /// Barrier lock acknowledged.
    BarrierAck {
        /// ALU family.
        kind: AluKind,
        /// ALU.
        alu: u8,
        /// Lock now in effect.
        locked: bool,
    },
    /// Words moved by a popped table move.
    Moved {
        /// Words copied.
        words: u8,
    },
    /// Dumped page.
    Words(Vec<u128>),
    /// Words zeroed.
    Cleared {
        /// Count.
        words: u32,
    },
}

impl Mau {
    pub(crate) fn apply_maintenance(
        &mut self,
        op: MaintenanceOp,
    ) -> Result<MaintenanceReply, MauError> {
        debug!("stage {}: {op:?}", self.config.stage);
        match op {
            MaintenanceOp::PbusRead { addr } => self.raw_read(addr).map(MaintenanceReply::Read),
            MaintenanceOp::PbusWrite { addr, value } => {
                self.raw_write(addr, value)?;
                Ok(MaintenanceReply::Done)
            }
            MaintenanceOp::BarrierLock { kind, alu, lock } => {
                self.sweeps.set_locked(kind, alu, lock)?;
                Ok(MaintenanceReply::BarrierAck {
                    kind,
                    alu,
                    locked: lock,
                })
            }
            MaintenanceOp::TcamWrite {
                row,
                col,
                index,
                word,
            } => {
                self.tcams
                    .write(usize::from(row), usize::from(col), usize::from(index), word)?;
                Ok(MaintenanceReply::Done)
            }
            MaintenanceOp::TcamCopy {
                row,
                col,
                src,
                dst,
                count,
            } => {
                self.tcams.copy_range(
                    usize::from(row),
                    usize::from(col),
                    usize::from(src),
                    usize::from(dst),
                    usize::from(count),
                )?;
                Ok(MaintenanceReply::Done)
            }
            MaintenanceOp::PushTableMove { table, src, dst } => {
                let slot = self
                    .moves
                    .get_mut(usize::from(table))
                    .ok_or(MauError::OutOfRange {
                        what: "logical table",
                        index: usize::from(table),
                    })?;
                if slot.is_some() {
                    warn!("table {table}: table move pushed over a pending one");
                }
                *slot = Some(TableMove { src, dst });
                Ok(MaintenanceReply::Done)
            }
            MaintenanceOp::PopTableMove { table } => self.pop_table_move(table),
            MaintenanceOp::StatefulDump { alu, vpn } => {
                let (row, col) = self.alu_ram(AluKind::Meter, alu, vpn)?;
                self.read_page(row, col).map(MaintenanceReply::Words)
            }
            MaintenanceOp::IdleDump { alu, vpn, clear } => {
                let (row, col) = self.alu_ram(AluKind::Idle, alu, vpn)?;
                let words = self.read_page(row, col)?;
                if clear {
                    self.zero_page(row, col)?;
                }
                Ok(MaintenanceReply::Words(words))
            }
            MaintenanceOp::StatefulClear {
                alu,
                vpn_lo,
                vpn_hi,
            } => {
                let mut words = 0u32;
                for vpn in vpn_lo..=vpn_hi {
                    let Ok((row, col)) = self.alu_ram(AluKind::Meter, alu, vpn) else {
                        continue;
                    };
                    self.zero_page(row, col)?;
                    words = words.saturating_add(u32::try_from(SRAM_WORDS).unwrap_or(u32::MAX));
                }
                Ok(MaintenanceReply::Cleared { words })
            }
        }
    }

    pub(crate) fn raw_read(&self, addr: MemAddress) -> Result<PbusValue, MauError> {
        match addr {
            MemAddress::Sram { row, col, word } => self
                .srams
                .read(usize::from(row), usize::from(col), usize::from(word))
                .map(PbusValue::Word),
            MemAddress::Tcam { row, col, index } => self
                .tcams
                .read(usize::from(row), usize::from(col), usize::from(index))
                .map(PbusValue::Tcam),
            MemAddress::Tind { row, col, index } => self
                .tcams
                .read_tind(usize::from(row), usize::from(col), usize::from(index))
                .map(PbusValue::Tind),
            MemAddress::Stash { table, entry } => self
                .stash
                .get(table, usize::from(entry))
                .map(PbusValue::Stash),
        }
    }

    fn raw_write(&mut self, addr: MemAddress, value: PbusValue) -> Result<(), MauError> {
        match (addr, value) {
            (MemAddress::Sram { row, col, word }, PbusValue::Word(data)) => {
                self.srams
                    .write(usize::from(row), usize::from(col), usize::from(word), data)
            }
            (MemAddress::Tcam { row, col, index }, PbusValue::Tcam(data)) => {
                self.tcams
                    .write(usize::from(row), usize::from(col), usize::from(index), data)
            }
            (MemAddress::Tind { row, col, index }, PbusValue::Tind(data)) => self
                .tcams
                .write_tind(usize::from(row), usize::from(col), usize::from(index), data),
            (MemAddress::Stash { table, entry }, PbusValue::Stash(data)) => {
                self.stash.set(table, usize::from(entry), data)
            }
            (addr, value) => Err(MauError::PbusMismatch {
                target: match addr {
                    MemAddress::Sram { .. } => "sram",
                    MemAddress::Tcam { .. } => "tcam",
                    MemAddress::Tind { .. } => "tind",
                    MemAddress::Stash { .. } => "stash",
                },
                value: value.name(),
            }),
        }
    }

    pub(crate) fn alu_ram(&self, kind: AluKind, alu: u8, vpn: u8) -> Result<(usize, usize), MauError> {
        SramUse::for_alu(kind, alu, vpn)
            .and_then(|usage| self.config.find_sram(usage))
            .ok_or(MauError::NoMemory { kind, alu, vpn })
    }

    fn read_page(&self, row: usize, col: usize) -> Result<Vec<u128>, MauError> {
        (0..SRAM_WORDS)
            .map(|word| self.srams.read(row, col, word))
            .collect()
    }

    fn zero_page(&mut self, row: usize, col: usize) -> Result<(), MauError> {
        for word in 0..SRAM_WORDS {
            self.srams.write(row, col, word, 0)?;
        }
        Ok(())
    }

    fn pop_table_move(&mut self, table: u8) -> Result<MaintenanceReply, MauError> {
        let pending = self
            .moves
            .get_mut(usize::from(table))
            .and_then(Option::take)
            .ok_or(MauError::NoPendingMove { table })?;
        let Some(config) = self.config.table(table) else {
            return Ok(MaintenanceReply::Moved { words: 0 });
        };
        let direct = [
            (AluKind::Stats, config.stats_mode, config.stats_route),
            (AluKind::Idle, config.idle_mode, config.idle_route),
        ];
        let mut words = 0u8;
        for (kind, mode, route) in direct {
            let Some(route) = route.filter(|_| mode == AddressMode::Direct) else {
                continue;
            };
            let rams = (
                self.alu_ram(kind, route.alu, pending.src.vpn),
                self.alu_ram(kind, route.alu, pending.dst.vpn),
            );
            let ((src_row, src_col), (dst_row, dst_col)) = match rams {
                (Ok(src), Ok(dst)) => (src, dst),
                (Err(error), _) | (_, Err(error)) => {
                    warn!("table {table}: table move skipped, {error}");
                    self.diag.record(table, ConfigEvent::MissingMemory);
                    continue;
                }
            };
            let word = self
                .srams
                .read(src_row, src_col, usize::from(pending.src.index))?;
            self.srams
                .write(dst_row, dst_col, usize::from(pending.dst.index), word)?;
            self.srams
                .write(src_row, src_col, usize::from(pending.src.index), 0)?;
            words += 1;
        }
        debug!(
            "table {table}: moved {words} words from {:?} to {:?}",
            pending.src, pending.dst
        );
        Ok(MaintenanceReply::Moved { words })
    }
}

#[cfg(test)]
mod tests {
    use super::{MaintenanceOp, MaintenanceReply, MemAddress, MoveLocation, PbusValue};
    use crate::{
        AddressMode, AluKind, BusRoute, Mau, MauConfig, MauError, SimulationConfig, SramUse,
        StepKind, TcamWord,
    };

    fn mau(config: MauConfig) -> Mau {
        Mau::new(config, SimulationConfig::default()).expect("valid config")
    }

    #[test]
    fn kinds_follow_request() {
        let read = MaintenanceOp::PbusRead {
            addr: MemAddress::Stash { table: 0, entry: 0 },
        };
        assert_eq!(read.step_kind(), StepKind::PbusRead);
        let clear = MaintenanceOp::StatefulClear {
            alu: 0,
            vpn_lo: 0,
            vpn_hi: 0,
        };
        assert_eq!(clear.step_kind(), StepKind::StatefulClear);
        let dump = MaintenanceOp::IdleDump {
            alu: 0,
            vpn: 0,
            clear: false,
        };
        assert_eq!(dump.step_kind(), StepKind::Dump);
    }

    #[test]
    fn raw_access_rejects_mismatched_values() {
        let mut mau = mau(MauConfig::new(0));
        let addr = MemAddress::Tcam {
            row: 3,
            col: 1,
            index: 9,
        };
        let word = TcamWord::new(0xAB, 0xFF);
        mau.pbus_write(addr, PbusValue::Tcam(word)).expect("write");
        assert_eq!(mau.pbus_read(addr), Ok(PbusValue::Tcam(word)));
        assert!(matches!(
            mau.pbus_write(addr, PbusValue::Word(1)),
            Err(MauError::PbusMismatch { target: "tcam", .. })
        ));
    }

    #[test]
    fn tcam_copy_moves_entries() {
        let mut mau = mau(MauConfig::new(0));
        let word = TcamWord::new(5, 0xF);
        mau.maintenance(MaintenanceOp::TcamWrite {
            row: 0,
            col: 0,
            index: 10,
            word,
        })
        .expect("write");
        mau.maintenance(MaintenanceOp::TcamCopy {
            row: 0,
            col: 0,
            src: 10,
            dst: 11,
            count: 1,
        })
        .expect("copy");
        let moved = mau.pbus_read(MemAddress::Tcam {
            row: 0,
            col: 0,
            index: 11,
        });
        assert_eq!(moved, Ok(PbusValue::Tcam(word)));
    }

    #[test]
    fn table_move_relocates_direct_state() {
        let mut config = MauConfig::new(0);
        config.alus.stats[1].enabled = true;
        config.set_sram(1, 0, SramUse::Stats { alu: 1, vpn: 2 }).expect("sram");
        config.set_sram(1, 1, SramUse::Stats { alu: 1, vpn: 3 }).expect("sram");
        config.tables[4].stats_mode = AddressMode::Direct;
        config.tables[4].stats_route = Some(BusRoute { bus: 0, alu: 1 });
        let mut mau = mau(config);
        let src = MemAddress::Sram { row: 1, col: 0, word: 8 };
        let dst = MemAddress::Sram { row: 1, col: 1, word: 40 };
        mau.pbus_write(src, PbusValue::Word(0x55)).expect("seed");

        assert_eq!(
            mau.maintenance(MaintenanceOp::PopTableMove { table: 4 }),
            Err(MauError::NoPendingMove { table: 4 })
        );
        mau.maintenance(MaintenanceOp::PushTableMove {
            table: 4,
            src: MoveLocation { vpn: 2, index: 8 },
            dst: MoveLocation { vpn: 3, index: 40 },
        })
        .expect("push");
        let reply = mau.maintenance(MaintenanceOp::PopTableMove { table: 4 });
        assert_eq!(reply, Ok(MaintenanceReply::Moved { words: 1 }));
        assert_eq!(mau.pbus_read(dst), Ok(PbusValue::Word(0x55)));
        assert_eq!(mau.pbus_read(src), Ok(PbusValue::Word(0)));
    }

    #[test]
    fn dumps_and_clears_pages() {
        let mut config = MauConfig::new(0);
        config.set_sram(5, 2, SramUse::Idle { alu: 0, vpn: 1 }).expect("sram");
        config.set_sram(6, 2, SramUse::Meter { alu: 3, vpn: 4 }).expect("sram");
        let mut mau = mau(config);
        mau.pbus_write(MemAddress::Sram { row: 5, col: 2, word: 3 }, PbusValue::Word(7))
            .expect("seed");
        mau.pbus_write(MemAddress::Sram { row: 6, col: 2, word: 1 }, PbusValue::Word(9))
            .expect("seed");

        let Ok(MaintenanceReply::Words(words)) = mau.maintenance(MaintenanceOp::IdleDump {
            alu: 0,
            vpn: 1,
            clear: true,
        }) else {
            panic!("idle dump failed");
        };
        assert_eq!(words[3], 7);
        let words = mau
            .dump(MaintenanceOp::IdleDump {
                alu: 0,
                vpn: 1,
                clear: false,
            })
            .expect("dump");
        assert!(words.iter().all(|word| *word == 0));

        assert_eq!(mau.stateful_clear(3, 0, 10), Ok(1024));
        assert_eq!(
            mau.pbus_read(MemAddress::Sram { row: 6, col: 2, word: 1 }),
            Ok(PbusValue::Word(0))
        );
        assert_eq!(
            mau.maintenance(MaintenanceOp::StatefulDump { alu: 2, vpn: 0 }),
            Err(MauError::NoMemory {
                kind: AluKind::Meter,
                alu: 2,
                vpn: 0
            })
        );
    }
}
