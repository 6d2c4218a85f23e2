//! Register bus access to stage configuration and change notification.
//!
//! Addresses are `block << 24 | index << 12 | offset`. Offsets count 32-bit
//! registers. A write patches its field in place once the value is known to
//! be legal, bumps the configuration generation and notifies registered
//! listeners with the [`ConfigField`] it touched.

use crate::{
    AluKind, Gress, LogicalTableConfig, Mau, MauError, SnapshotState, VpnRange, XbarByteConfig,
    XbarSource, ALUS_PER_KIND, EXACT_XBAR_BYTES, HASH_GROUPS, HASH_INPUT_BITS, LOGICAL_TABLES, PHV_WORDS,
    TCAM_COLS, TCAM_ROWS, TERNARY_XBAR_BYTES,
};
use crate::bits::{field64, mask64};

/// Exact xbar byte selects; index = output byte.
pub const BLOCK_EXACT_XBAR: u8 = 0x01;
/// Ternary xbar byte selects; index = pre-swizzle byte.
pub const BLOCK_TERNARY_XBAR: u8 = 0x02;
/// Ternary swizzle; index = output position.
pub const BLOCK_SWIZZLE: u8 = 0x03;
/// Container thread ownership; index = container.
pub const BLOCK_PHV_THREAD: u8 = 0x04;
/// Hash seed (offsets 0, 1) and stage enable (offset 2); index = group.
pub const BLOCK_HASH: u8 = 0x05;
/// Hash matrix; index = group, offset = `bit * 2 + high_half`.
pub const BLOCK_HASH_MATRIX: u8 = 0x06;
/// TCAM mode; index = `row * TCAM_COLS + col`.
pub const BLOCK_TCAM_MODE: u8 = 0x07;
/// ALU VPN range (offset 0) and enable (offset 1); index = `family * 4 + alu`.
pub const BLOCK_ALU: u8 = 0x08;
/// Table action VPN range; index = table.
pub const BLOCK_ACTION_VPN: u8 = 0x09;
/// Next-table LUT (offsets 0..8), miss next table (8), override (9); index = table.
pub const BLOCK_NEXT_TABLE: u8 = 0x0A;
/// Long-branch terminate mask.
pub const BLOCK_PREDICATION: u8 = 0x0B;
/// Snapshot read-back; index = table, or [`SNAPSHOT_STATE_INDEX`].
pub const BLOCK_SNAPSHOT: u8 = 0x0C;
/// Snapshot block index of the state register.
pub const SNAPSHOT_STATE_INDEX: u16 = 0x100;

const OVERRIDE_ENABLE: u32 = 1 << 8;
#[allow(clippy::cast_possible_truncation)]
const TERNARY_XBAR_BYTES_U32: u32 = TERNARY_XBAR_BYTES as u32;

/// Builds a register address.
#[must_use]
#[allow(clippy::cast_lossless)]
pub const fn register_address(block: u8, index: u16, offset: u16) -> u32 {
    (block as u32) << 24 | ((index as u32) & 0xFFF) << 12 | (offset as u32) & 0xFFF
}

/// Part of the configuration a change touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ConfigField {
    /// Crossbar selects, swizzle or container ownership.
    Xbar,
    /// One hash group.
    Hash {
        /// Group.
        group: u8,
    },
    /// TCAM modes.
    Tcam,
    /// Logical TCAM chains.
    LogicalTcam,
    /// One logical table descriptor.
    Table {
        /// Logical table.
        table: u8,
    },
    /// Exact-match ways.
    ExactWays,
    /// SRAM usage.
    Sram,
    /// ALU configuration.
    Alu,
    /// Sweep schedules.
    Sweep,
    /// Stage predication registers.
    Predication,
}

/// Observer of configuration changes.
///
/// Listeners run synchronously inside the change and see only the field;
/// they are meant for cache invalidation.
pub trait ConfigListener: Send {
    /// Called after a change is committed.
    fn config_changed(&mut self, field: ConfigField);
}

/// 32-bit register access.
pub trait RegisterBus {
    /// Reads a register.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::UnknownRegister`] for an unmapped address.
    fn read(&mut self, addr: u32) -> Result<u32, MauError>;

    /// Writes a register.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::UnknownRegister`] for an unmapped or read-only
    /// address or a reserved field code, and [`MauError::OutOfRange`] for a
    /// value the field cannot hold.
    fn write(&mut self, addr: u32, value: u32) -> Result<(), MauError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Register {
    ExactXbar(usize),
    TernaryXbar(usize),
    Swizzle(usize),
    PhvThread(usize),
    HashSeed { group: u8, high: bool },
    HashStageEnable(u8),
    HashColumn { group: u8, bit: usize, high: bool },
    TcamMode(usize),
    AluVpn { kind: AluKind, alu: u8 },
    AluEnable { kind: AluKind, alu: u8 },
    ActionVpn(u8),
    NextTableLut { table: u8, entry: usize },
    MissNextTable(u8),
    NextTableOverride(u8),
    LongBranchTerminate,
    SnapshotTable { table: u8, offset: u16 },
    SnapshotState,
}

const ALU_FAMILIES: [AluKind; 3] = [AluKind::Stats, AluKind::Meter, AluKind::Idle];

#[allow(clippy::cast_possible_truncation)]
fn decode(addr: u32) -> Result<Register, MauError> {
    let unknown = MauError::UnknownRegister { addr };
    let block = (addr >> 24) as u8;
    let index = ((addr >> 12) & 0xFFF) as usize;
    let offset = (addr & 0xFFF) as usize;
    // Small indices also fit the u8 ids tables, groups and ALUs use.
    let id = low_u8((addr >> 12) & 0xFF);
    let register = match (block, offset) {
        (BLOCK_EXACT_XBAR, 0) if index < EXACT_XBAR_BYTES => Register::ExactXbar(index),
        (BLOCK_TERNARY_XBAR, 0) if index < TERNARY_XBAR_BYTES => Register::TernaryXbar(index),
        (BLOCK_SWIZZLE, 0) if index < TERNARY_XBAR_BYTES => Register::Swizzle(index),
        (BLOCK_PHV_THREAD, 0) if index < PHV_WORDS => Register::PhvThread(index),
        (BLOCK_HASH, 0 | 1) if index < HASH_GROUPS => Register::HashSeed {
            group: id,
            high: offset == 1,
        },
        (BLOCK_HASH, 2) if index < HASH_GROUPS => Register::HashStageEnable(id),
        (BLOCK_HASH_MATRIX, _) if index < HASH_GROUPS && offset < HASH_INPUT_BITS * 2 => {
            Register::HashColumn {
                group: id,
                bit: offset / 2,
                high: offset % 2 == 1,
            }
        }
        (BLOCK_TCAM_MODE, 0) if index < TCAM_ROWS * TCAM_COLS => Register::TcamMode(index),
        (BLOCK_ALU, 0 | 1) if index < ALU_FAMILIES.len() * ALUS_PER_KIND => {
            let kind = ALU_FAMILIES[index / ALUS_PER_KIND];
            let alu = low_u8((addr >> 12) & 0x3);
            if offset == 0 {
                Register::AluVpn { kind, alu }
            } else {
                Register::AluEnable { kind, alu }
            }
        }
        (BLOCK_ACTION_VPN, 0) if index < LOGICAL_TABLES => Register::ActionVpn(id),
        (BLOCK_NEXT_TABLE, _) if index < LOGICAL_TABLES => match offset {
            0..=7 => Register::NextTableLut {
                table: id,
                entry: offset,
            },
            8 => Register::MissNextTable(id),
            9 => Register::NextTableOverride(id),
            _ => return Err(unknown),
        },
        (BLOCK_PREDICATION, 0) if index == 0 => Register::LongBranchTerminate,
        (BLOCK_SNAPSHOT, 0) if index == usize::from(SNAPSHOT_STATE_INDEX) => Register::SnapshotState,
        (BLOCK_SNAPSHOT, 0..=2) if index < LOGICAL_TABLES => Register::SnapshotTable {
            table: id,
            offset: (addr & 0x3) as u16,
        },
        _ => return Err(unknown),
    };
    Ok(register)
}

const fn gress_code(gress: Gress) -> u32 {
    match gress {
        Gress::Ingress => 0,
        Gress::Egress => 1,
        Gress::Ghost => 2,
    }
}

const fn gress_from_code(code: u32, addr: u32) -> Result<Gress, MauError> {
    match code {
        0 => Ok(Gress::Ingress),
        1 => Ok(Gress::Egress),
        2 => Ok(Gress::Ghost),
        _ => Err(MauError::UnknownRegister { addr }),
    }
}

/// `kind[1:0] | word[15:8] | byte[17:16] | gress[25:24]`.
fn encode_xbar(byte: &XbarByteConfig) -> u32 {
    let (kind, word, lane) = match byte.source {
        XbarSource::Disabled => (0, 0, 0),
        XbarSource::PhvByte { word, byte } => (1, word, byte),
        XbarSource::ValidBits { first_word } => (2, first_word, 0),
        XbarSource::Version => (3, 0, 0),
    };
    kind | u32::from(word) << 8 | u32::from(lane & 0x3) << 16 | gress_code(byte.gress) << 24
}

#[allow(clippy::cast_possible_truncation)]
fn decode_xbar(value: u32, addr: u32) -> Result<XbarByteConfig, MauError> {
    let word = (value >> 8) as u8;
    let source = match value & 0x3 {
        0 => XbarSource::Disabled,
        1 => XbarSource::PhvByte {
            word,
            byte: ((value >> 16) & 0x3) as u8,
        },
        2 => XbarSource::ValidBits { first_word: word },
        _ => XbarSource::Version,
    };
    Ok(XbarByteConfig {
        source,
        gress: gress_from_code((value >> 24) & 0x3, addr)?,
    })
}

fn encode_vpn(range: VpnRange) -> u32 {
    u32::from(range.base) | u32::from(range.limit) << 8
}

#[allow(clippy::cast_possible_truncation)]
const fn decode_vpn(value: u32) -> VpnRange {
    VpnRange::new(value as u8, (value >> 8) as u8)
}

#[allow(clippy::cast_possible_truncation)]
const fn low_u8(value: u32) -> u8 {
    value as u8
}

impl Mau {
    fn read_register(&self, register: Register) -> u32 {
        let config = &self.config;
        match register {
            Register::ExactXbar(index) => config.xbar.exact.get(index).map_or(0, encode_xbar),
            Register::TernaryXbar(index) => config.xbar.ternary.get(index).map_or(0, encode_xbar),
            Register::Swizzle(index) => config.xbar.swizzle.get(index).map_or(0, |s| u32::from(*s)),
            Register::PhvThread(index) => config
                .xbar
                .phv_thread
                .get(index)
                .map_or(0, |gress| gress_code(*gress)),
            Register::HashSeed { group, high } => config.hash.get(usize::from(group)).map_or(0, |hash| {
                let lsb = if high { 32 } else { 0 };
                u32::try_from(field64(hash.seed, lsb, 32)).unwrap_or(0)
            }),
            Register::HashStageEnable(group) => config
                .hash
                .get(usize::from(group))
                .map_or(0, |hash| u32::from(hash.stage_enable)),
            Register::HashColumn { group, bit, high } => config
                .hash
                .get(usize::from(group))
                .and_then(|hash| hash.matrix.get(bit))
                .map_or(0, |column| {
                    let lsb = if high { 32 } else { 0 };
                    u32::try_from(field64(*column, lsb, 32)).unwrap_or(0)
                }),
            Register::TcamMode(index) => config.tcams.get(index).map_or(0, |tcam| {
                u32::from(tcam.enabled)
                    | gress_code(tcam.gress) << 4
                    | u32::from(tcam.input_slice) << 8
            }),
            Register::AluVpn { kind, alu } => config
                .alus
                .vpn_range(kind, alu)
                .map_or(0, encode_vpn),
            Register::AluEnable { kind, alu } => u32::from(config.alus.enabled(kind, alu)),
            Register::ActionVpn(table) => config
                .table(table)
                .map_or(0, |table| encode_vpn(table.action_vpn_range)),
            Register::NextTableLut { table, entry } => config
                .table(table)
                .and_then(|table| table.next_table_lut.get(entry))
                .map_or(0, |next| u32::from(*next)),
            Register::MissNextTable(table) => config
                .table(table)
                .map_or(0, |table| u32::from(table.miss_next_table)),
            Register::NextTableOverride(table) => config
                .table(table)
                .and_then(|table| table.next_table_override)
                .map_or(0, |next| OVERRIDE_ENABLE | u32::from(next)),
            Register::LongBranchTerminate => u32::from(config.predication.long_branch_terminate),
            Register::SnapshotState => match self.snapshot.state() {
                SnapshotState::Passive => 0,
                SnapshotState::Armed(_) => 1,
                SnapshotState::Full => 2,
            },
            Register::SnapshotTable { table, offset } => self
                .snapshot
                .capture()
                .and_then(|capture| capture.table(table))
                .map_or(0, |capture| match offset {
                    0 => {
                        u32::from(capture.hit)
                            | u32::from(capture.executed) << 1
                            | u32::from(capture.inhibited) << 2
                    }
                    1 => capture.match_address,
                    _ => u32::from(capture.next_table),
                }),
        }
    }

    #[allow(clippy::too_many_lines)]
    fn write_register(&mut self, register: Register, value: u32, addr: u32) -> Result<(), MauError> {
        match register {
            Register::ExactXbar(index) => {
                let byte = decode_xbar(value, addr)?;
                self.patch_config(ConfigField::Xbar, |config| {
                    if let Some(slot) = config.xbar.exact.get_mut(index) {
                        *slot = byte;
                    }
                });
            }
            Register::TernaryXbar(index) => {
                let byte = decode_xbar(value, addr)?;
                self.patch_config(ConfigField::Xbar, |config| {
                    if let Some(slot) = config.xbar.ternary.get_mut(index) {
                        *slot = byte;
                    }
                });
            }
            Register::Swizzle(index) => {
                if value >= TERNARY_XBAR_BYTES_U32 {
                    return Err(MauError::OutOfRange {
                        what: "swizzle",
                        index: usize::try_from(value).unwrap_or(usize::MAX),
                    });
                }
                self.patch_config(ConfigField::Xbar, |config| {
                    if let Some(slot) = config.xbar.swizzle.get_mut(index) {
                        *slot = low_u8(value);
                    }
                });
            }
            Register::PhvThread(index) => {
                let gress = gress_from_code(value, addr)?;
                self.patch_config(ConfigField::Xbar, |config| {
                    if let Some(slot) = config.xbar.phv_thread.get_mut(index) {
                        *slot = gress;
                    }
                });
            }
            Register::HashSeed { group, high } => {
                self.patch_config(ConfigField::Hash { group }, |config| {
                    if let Some(hash) = config.hash.get_mut(usize::from(group)) {
                        hash.seed = replace_half(hash.seed, high, value);
                    }
                });
            }
            Register::HashStageEnable(group) => {
                self.patch_config(ConfigField::Hash { group }, |config| {
                    if let Some(hash) = config.hash.get_mut(usize::from(group)) {
                        hash.stage_enable = u16::try_from(value & 0xFFFF).unwrap_or(u16::MAX);
                    }
                });
            }
            Register::HashColumn { group, bit, high } => {
                self.patch_config(ConfigField::Hash { group }, |config| {
                    if let Some(hash) = config.hash.get_mut(usize::from(group)) {
                        let column = hash.matrix.get(bit).copied().unwrap_or(0);
                        hash.set_column(bit, replace_half(column, high, value));
                    }
                });
            }
            Register::TcamMode(index) => {
                let gress = gress_from_code((value >> 4) & 0x3, addr)?;
                self.patch_config(ConfigField::Tcam, |config| {
                    if let Some(tcam) = config.tcams.get_mut(index) {
                        tcam.enabled = value & 1 == 1;
                        tcam.gress = gress;
                        tcam.input_slice = low_u8((value >> 8) & 0xF);
                    }
                });
            }
            Register::AluVpn { kind, alu } => {
                let range = decode_vpn(value);
                self.patch_config(ConfigField::Alu, |config| {
                    config.alus.set_vpn_range(kind, alu, range);
                });
            }
            Register::AluEnable { kind, alu } => {
                self.patch_config(ConfigField::Alu, |config| {
                    config.alus.set_enabled(kind, alu, value & 1 == 1);
                });
            }
            Register::ActionVpn(table) => {
                let range = decode_vpn(value);
                self.patch_table(table, |config| config.action_vpn_range = range);
            }
            Register::NextTableLut { table, entry } => self.patch_table(table, |config| {
                if let Some(slot) = config.next_table_lut.get_mut(entry) {
                    *slot = low_u8(value);
                }
            }),
            Register::MissNextTable(table) => {
                self.patch_table(table, |config| config.miss_next_table = low_u8(value));
            }
            Register::NextTableOverride(table) => self.patch_table(table, |config| {
                config.next_table_override =
                    (value & OVERRIDE_ENABLE != 0).then_some(low_u8(value));
            }),
            Register::LongBranchTerminate => self.patch_config(ConfigField::Predication, |config| {
                config.predication.long_branch_terminate = low_u8(value);
            }),
            Register::SnapshotState | Register::SnapshotTable { .. } => {
                return Err(MauError::UnknownRegister { addr });
            }
        }
        Ok(())
    }

    fn patch_table<F>(&mut self, table: u8, update: F)
    where
        F: FnOnce(&mut LogicalTableConfig),
    {
        self.patch_config(ConfigField::Table { table }, |config| {
            if let Some(slot) = config.table_mut(table) {
                update(slot);
            }
        });
    }
}

fn replace_half(current: u64, high: bool, value: u32) -> u64 {
    let lsb = if high { 32 } else { 0 };
    (current & !(mask64(32) << lsb)) | u64::from(value) << lsb
}

impl RegisterBus for Mau {
    fn read(&mut self, addr: u32) -> Result<u32, MauError> {
        decode(addr).map(|register| self.read_register(register))
    }

    fn write(&mut self, addr: u32, value: u32) -> Result<(), MauError> {
        let register = decode(addr)?;
        self.write_register(register, value, addr)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        register_address, ConfigField, ConfigListener, RegisterBus, BLOCK_ALU, BLOCK_EXACT_XBAR,
        BLOCK_HASH, BLOCK_HASH_MATRIX, BLOCK_NEXT_TABLE, BLOCK_SNAPSHOT, BLOCK_SWIZZLE,
        BLOCK_TCAM_MODE, SNAPSHOT_STATE_INDEX,
    };
    use crate::{
        AluKind, Gress, Mau, MauConfig, MauError, SimulationConfig, SnapshotTrigger, VpnRange,
        XbarByteConfig,
    };
    use std::sync::mpsc;

    struct Forward(mpsc::Sender<ConfigField>);

    impl ConfigListener for Forward {
        fn config_changed(&mut self, field: ConfigField) {
            let _ = self.0.send(field);
        }
    }

    fn mau() -> Mau {
        Mau::new(MauConfig::new(0), SimulationConfig::default()).expect("mau")
    }

    #[test]
    fn xbar_select_round_trips_and_notifies() {
        let mut mau = mau();
        let (tx, rx) = mpsc::channel();
        mau.add_listener(Box::new(Forward(tx)));
        let addr = register_address(BLOCK_EXACT_XBAR, 17, 0);
        let value = 1 | 42 << 8 | 3 << 16 | 1 << 24;
        mau.write(addr, value).expect("write");
        assert_eq!(mau.read(addr), Ok(value));
        assert_eq!(
            mau.config().xbar.exact[17],
            XbarByteConfig::phv(42, 3, Gress::Egress)
        );
        assert_eq!(rx.try_recv(), Ok(ConfigField::Xbar));
        assert_eq!(mau.generation(), 1);
    }

    #[test]
    fn hash_halves_compose() {
        let mut mau = mau();
        mau.write(register_address(BLOCK_HASH, 3, 0), 0xDEAD_BEEF)
            .expect("seed lo");
        mau.write(register_address(BLOCK_HASH, 3, 1), 0x000A_BCDE)
            .expect("seed hi");
        assert_eq!(mau.config().hash[3].seed, 0x000A_BCDE_DEAD_BEEF);
        mau.write(register_address(BLOCK_HASH_MATRIX, 3, 2 * 700 + 1), 0xFFFF_FFFF)
            .expect("column hi");
        assert_eq!(mau.config().hash[3].matrix[700], 0x000F_FFFF_0000_0000);
        assert_eq!(
            mau.read(register_address(BLOCK_HASH_MATRIX, 3, 2 * 700 + 1)),
            Ok(0x000F_FFFF)
        );
    }

    #[test]
    fn tables_alus_and_tcams_decode() {
        let mut mau = mau();
        mau.write(register_address(BLOCK_ALU, 4 + 2, 0), 3 | 9 << 8)
            .expect("meter vpn");
        assert_eq!(
            mau.config().alus.vpn_range(AluKind::Meter, 2),
            Some(VpnRange::new(3, 9))
        );
        mau.write(register_address(BLOCK_ALU, 8 + 1, 1), 1).expect("idle enable");
        assert!(mau.config().alus.enabled(AluKind::Idle, 1));

        mau.write(register_address(BLOCK_NEXT_TABLE, 5, 9), 0x100 | 0x27)
            .expect("override");
        assert_eq!(mau.config().tables[5].next_table_override, Some(0x27));
        mau.write(register_address(BLOCK_NEXT_TABLE, 5, 9), 0).expect("clear");
        assert_eq!(mau.config().tables[5].next_table_override, None);

        mau.write(register_address(BLOCK_TCAM_MODE, 7, 0), 1 | 1 << 4 | 5 << 8)
            .expect("tcam");
        let tcam = mau.config().tcam(3, 1).expect("tcam");
        assert!(tcam.enabled);
        assert_eq!(tcam.gress, Gress::Egress);
        assert_eq!(tcam.input_slice, 5);
    }

    #[test]
    fn unknown_and_read_only_addresses_fail() {
        let mut mau = mau();
        let bad = register_address(0x7F, 0, 0);
        assert_eq!(mau.read(bad), Err(MauError::UnknownRegister { addr: bad }));
        let beyond = register_address(BLOCK_EXACT_XBAR, 128, 0);
        assert!(mau.write(beyond, 0).is_err());
        let state = register_address(BLOCK_SNAPSHOT, SNAPSHOT_STATE_INDEX, 0);
        assert_eq!(mau.read(state), Ok(0));
        mau.snapshot_mut().arm(SnapshotTrigger::AnyPacket);
        assert_eq!(mau.read(state), Ok(1));
        assert!(mau.write(state, 0).is_err());
        assert_eq!(mau.generation(), 0);
    }

    #[test]
    fn swizzle_writes_are_range_checked_in_place() {
        let mut mau = mau();
        let addr = register_address(BLOCK_SWIZZLE, 4, 0);
        assert_eq!(
            mau.write(addr, 66),
            Err(MauError::OutOfRange {
                what: "swizzle",
                index: 66
            })
        );
        assert_eq!(mau.generation(), 0);
        assert_eq!(mau.config().xbar.swizzle[4], 4);

        mau.write(addr, 65).expect("last byte");
        assert_eq!(mau.read(addr), Ok(65));
        assert_eq!(mau.generation(), 1);
        assert_eq!(mau.config().validate(mau.sim().chip), Ok(()));
    }

    #[test]
    fn reserved_gress_code_is_rejected() {
        let mut mau = mau();
        let gress_bits = register_address(BLOCK_EXACT_XBAR, 0, 0);
        assert!(mau.write(gress_bits, 3 << 24).is_err());
    }
}
