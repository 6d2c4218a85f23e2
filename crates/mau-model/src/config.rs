//! Simulation-wide options, chip profiles and the static configuration of one stage.
//!
//! `SimulationConfig` is passed explicitly at construction; nothing in the model
//! reads process-global state. `MauConfig` is the per-program image of a stage
//! and is validated whole before a change is committed.

use crate::{
    AluConfig, AluKind, ExactWayConfig, HashGroupConfig, LogicalTableConfig, LogicalTcamConfig, MauError,
    SramUse, SweepConfigs, TcamConfig, XbarConfig, HASH_GROUPS, LOGICAL_TABLES, LOGICAL_TCAMS,
    BUSES_PER_KIND, BUS_KINDS, SRAM_COLS, SRAM_ROWS, TCAM_COLS, TCAM_ROWS,
};

/// Packet thread a table, container or xbar byte belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Gress {
    /// Ingress thread.
    #[default]
    Ingress,
    /// Egress thread.
    Egress,
    /// Ghost thread (Tofino2 and later).
    Ghost,
}

impl Gress {
    /// All threads in evaluation order.
    pub const ALL: [Self; 3] = [Self::Ingress, Self::Egress, Self::Ghost];

    /// Dense index used for per-thread arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Ingress => 0,
            Self::Egress => 1,
            Self::Ghost => 2,
        }
    }
}

/// Chip generation; selects which predication and timing features exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ChipVariant {
    /// First generation: next-table chaining only.
    #[default]
    Tofino,
    /// Adds ghost thread, global-exec and long-branch vectors, TEOP.
    Tofino2,
    /// Same predication model as Tofino2.
    Tofino3,
}

impl ChipVariant {
    /// Ghost thread is present.
    #[must_use]
    pub const fn supports_ghost(self) -> bool {
        !matches!(self, Self::Tofino)
    }

    /// Global-execute bits wake tables directly.
    #[must_use]
    pub const fn supports_global_exec(self) -> bool {
        !matches!(self, Self::Tofino)
    }

    /// Long-branch tags carry activation across stages.
    #[must_use]
    pub const fn supports_long_branch(self) -> bool {
        !matches!(self, Self::Tofino)
    }

    /// ALUs may be timed to the truncated end-of-packet event.
    #[must_use]
    pub const fn supports_teop(self) -> bool {
        !matches!(self, Self::Tofino)
    }
}

/// Process-level switches threaded into every stage at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(clippy::struct_excessive_bools)]
pub struct SimulationConfig {
    /// Chip profile.
    pub chip: ChipVariant,
    /// Surface lookups and lookup errors of tables predication did not activate.
    pub evaluate_all: bool,
    /// OR addresses of two bus drivers instead of failing.
    pub relax_bus_conflict_check: bool,
    /// Resolve double hits by precedence instead of failing.
    pub relax_double_hit_check: bool,
    /// Treat cross-thread xbar selections as invalid bytes instead of failing.
    pub relax_xbar_gress_check: bool,
    /// Resolve equal ternary priorities to the first chain instead of failing.
    pub relax_tcam_tie_check: bool,
}

impl SimulationConfig {
    /// Strict configuration for a given chip.
    #[must_use]
    pub const fn for_chip(chip: ChipVariant) -> Self {
        Self {
            chip,
            evaluate_all: false,
            relax_bus_conflict_check: false,
            relax_double_hit_check: false,
            relax_xbar_gress_check: false,
            relax_tcam_tie_check: false,
        }
    }
}

/// Stage-level predication registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PredicationConfig {
    /// Long-branch tags cleared on leaving this stage.
    pub long_branch_terminate: u8,
}

/// Static configuration of one MAU stage.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MauConfig {
    /// Stage index in the pipe; forms the upper nibble of next-table ids.
    pub stage: u8,
    /// Input crossbar byte selects, swizzle and container ownership.
    pub xbar: XbarConfig,
    /// Hash group matrices.
    pub hash: Vec<HashGroupConfig>,
    /// Physical TCAM modes, row-major `row * TCAM_COLS + col`.
    pub tcams: Vec<TcamConfig>,
    /// Logical TCAM chain descriptors.
    pub logical_tcams: Vec<LogicalTcamConfig>,
    /// Logical table descriptors.
    pub tables: Vec<LogicalTableConfig>,
    /// Exact-match ways.
    pub exact_ways: Vec<ExactWayConfig>,
    /// SRAM usage, row-major `row * SRAM_COLS + col`.
    pub sram_use: Vec<SramUse>,
    /// Stats, meter and idle ALU configuration.
    pub alus: AluConfig,
    /// Background sweep configuration.
    pub sweeps: SweepConfigs,
    /// Stage predication registers.
    pub predication: PredicationConfig,
}

impl Default for MauConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

impl MauConfig {
    /// Empty configuration for a stage: every table unused, every RAM unused.
    #[must_use]
    pub fn new(stage: u8) -> Self {
        Self {
            stage,
            xbar: XbarConfig::default(),
            hash: vec![HashGroupConfig::default(); HASH_GROUPS],
            tcams: vec![TcamConfig::default(); TCAM_ROWS * TCAM_COLS],
            logical_tcams: vec![LogicalTcamConfig::default(); LOGICAL_TCAMS],
            tables: vec![LogicalTableConfig::default(); LOGICAL_TABLES],
            exact_ways: Vec::new(),
            sram_use: vec![SramUse::Unused; SRAM_ROWS * SRAM_COLS],
            alus: AluConfig::default(),
            sweeps: SweepConfigs::default(),
            predication: PredicationConfig::default(),
        }
    }

    /// Table descriptor, if `table` is a valid logical table id.
    #[must_use]
    pub fn table(&self, table: u8) -> Option<&LogicalTableConfig> {
        self.tables.get(usize::from(table))
    }

    /// Mutable table descriptor.
    pub fn table_mut(&mut self, table: u8) -> Option<&mut LogicalTableConfig> {
        self.tables.get_mut(usize::from(table))
    }

    /// Physical TCAM mode at `(row, col)`.
    #[must_use]
    pub fn tcam(&self, row: usize, col: usize) -> Option<&TcamConfig> {
        if row >= TCAM_ROWS || col >= TCAM_COLS {
            return None;
        }
        self.tcams.get(row * TCAM_COLS + col)
    }

    /// SRAM usage at `(row, col)`.
    #[must_use]
    pub fn sram(&self, row: usize, col: usize) -> SramUse {
        if row >= SRAM_ROWS || col >= SRAM_COLS {
            return SramUse::Unused;
        }
        self.sram_use
            .get(row * SRAM_COLS + col)
            .copied()
            .unwrap_or(SramUse::Unused)
    }

    /// Sets SRAM usage at `(row, col)`.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] when `(row, col)` is outside the array.
    pub fn set_sram(&mut self, row: usize, col: usize, usage: SramUse) -> Result<(), MauError> {
        if row >= SRAM_ROWS || col >= SRAM_COLS {
            return Err(MauError::OutOfRange {
                what: "sram",
                index: row * SRAM_COLS + col,
            });
        }
        if let Some(slot) = self.sram_use.get_mut(row * SRAM_COLS + col) {
            *slot = usage;
        }
        Ok(())
    }

    /// Locates the RAM holding `usage`, scanning rows then columns.
    #[must_use]
    pub fn find_sram(&self, usage: SramUse) -> Option<(usize, usize)> {
        self.sram_use
            .iter()
            .position(|candidate| *candidate == usage)
            .map(|slot| (slot / SRAM_COLS, slot % SRAM_COLS))
    }

    /// Checks the whole configuration before it is committed.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::DuplicateChainPriority`] when two chains of one
    /// logical TCAM share a priority base, [`MauError::UnsupportedFeature`]
    /// when the configuration uses a thread or timing the chip lacks, and
    /// [`MauError::OutOfRange`] when a vector has the wrong shape.
    pub fn validate(&self, chip: ChipVariant) -> Result<(), MauError> {
        check_len("hash group", self.hash.len(), HASH_GROUPS)?;
        check_len("tcam", self.tcams.len(), TCAM_ROWS * TCAM_COLS)?;
        check_len("logical tcam", self.logical_tcams.len(), LOGICAL_TCAMS)?;
        check_len("logical table", self.tables.len(), LOGICAL_TABLES)?;
        check_len("sram", self.sram_use.len(), SRAM_ROWS * SRAM_COLS)?;
        self.xbar.validate()?;

        for (index, group) in self.hash.iter().enumerate() {
            group.validate(index)?;
        }
        for (index, tcam) in self.logical_tcams.iter().enumerate() {
            tcam.validate(index)?;
        }
        if !chip.supports_ghost() {
            let ghost_table = self
                .tables
                .iter()
                .any(|table| table.gress == Some(Gress::Ghost));
            if ghost_table {
                return Err(MauError::UnsupportedFeature {
                    feature: "ghost thread",
                    chip,
                });
            }
        }
        if !chip.supports_teop() && self.alus.uses_teop() {
            return Err(MauError::UnsupportedFeature {
                feature: "teop alu timing",
                chip,
            });
        }
        Ok(())
    }
}

/// Two tables routing one bus to different ALUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteDisagreement {
    /// Address family of the bus.
    pub kind: AluKind,
    /// Bus index.
    pub bus: u8,
    /// Lowest table driving the bus; its ALU is the one used.
    pub first_table: u8,
    /// ALU named by `first_table`.
    pub first_alu: u8,
    /// Later table naming another ALU.
    pub table: u8,
    /// ALU named by `table`.
    pub alu: u8,
}

impl MauConfig {
    /// Every table whose route sends a bus to another ALU than the lowest
    /// table driving that bus.
    ///
    /// These are not validation errors: the stage commits the configuration
    /// and keeps the lowest table's ALU.
    #[must_use]
    pub fn route_disagreements(&self) -> Vec<RouteDisagreement> {
        let mut found = Vec::new();
        for kind in BUS_KINDS {
            let mut owners: [Option<(u8, u8)>; BUSES_PER_KIND] = [None; BUSES_PER_KIND];
            for (table, descriptor) in (0u8..).zip(&self.tables) {
                if descriptor.gress.is_none() {
                    continue;
                }
                let Some(route) = descriptor.driven_route(kind) else {
                    continue;
                };
                let Some(owner) = owners.get_mut(usize::from(route.bus)) else {
                    continue;
                };
                match *owner {
                    None => *owner = Some((table, route.alu)),
                    Some((first_table, first_alu)) if first_alu != route.alu => {
                        found.push(RouteDisagreement {
                            kind,
                            bus: route.bus,
                            first_table,
                            first_alu,
                            table,
                            alu: route.alu,
                        });
                    }
                    Some(_) => {}
                }
            }
        }
        found
    }
}

const fn check_len(what: &'static str, len: usize, expected: usize) -> Result<(), MauError> {
    if len == expected {
        Ok(())
    } else {
        Err(MauError::OutOfRange { what, index: len })
    }
}

#[cfg(test)]
mod tests {
    use super::{ChipVariant, Gress, MauConfig, SimulationConfig};
    use crate::{
        AddressMode, AluKind, AluTiming, BusRoute, LogicalTableConfig, MauError, SramUse,
    };

    #[test]
    fn default_simulation_config_is_strict() {
        let config = SimulationConfig::default();
        assert!(!config.evaluate_all);
        assert!(!config.relax_bus_conflict_check);
        assert!(!config.relax_double_hit_check);
        assert_eq!(config, SimulationConfig::for_chip(ChipVariant::Tofino));
    }

    #[test]
    fn chip_capabilities_split_at_first_generation() {
        assert!(!ChipVariant::Tofino.supports_global_exec());
        assert!(ChipVariant::Tofino2.supports_long_branch());
        assert!(ChipVariant::Tofino3.supports_teop());
    }

    #[test]
    fn ghost_tables_rejected_on_first_generation() {
        let mut config = MauConfig::new(0);
        if let Some(table) = config.table_mut(3) {
            table.gress = Some(Gress::Ghost);
        }
        assert_eq!(
            config.validate(ChipVariant::Tofino),
            Err(MauError::UnsupportedFeature {
                feature: "ghost thread",
                chip: ChipVariant::Tofino,
            })
        );
        assert_eq!(config.validate(ChipVariant::Tofino2), Ok(()));
    }

    #[test]
    fn teop_timing_rejected_on_first_generation() {
        let mut config = MauConfig::new(0);
        config.alus.stats[1].enabled = true;
        config.alus.stats[1].timing = AluTiming::Teop;
        assert!(config.validate(ChipVariant::Tofino).is_err());
        assert!(config.validate(ChipVariant::Tofino2).is_ok());
    }

    #[test]
    fn route_walk_reports_each_later_disagreeing_table() {
        let mut config = MauConfig::new(0);
        for (table, alu) in [(0usize, 0u8), (1, 1), (4, 0), (6, 2)] {
            let mut descriptor = LogicalTableConfig::for_gress(Gress::Ingress);
            descriptor.stats_mode = AddressMode::Indirect;
            descriptor.stats_route = Some(BusRoute { bus: 0, alu });
            config.tables[table] = descriptor;
        }
        // Routed but never addressed: not a driver.
        config.tables[7] = LogicalTableConfig::for_gress(Gress::Ingress);
        config.tables[7].stats_route = Some(BusRoute { bus: 0, alu: 3 });

        let found = config.route_disagreements();
        let tables: Vec<(u8, u8)> = found.iter().map(|d| (d.table, d.alu)).collect();
        assert_eq!(tables, vec![(1, 1), (6, 2)]);
        assert!(found
            .iter()
            .all(|d| d.kind == AluKind::Stats && d.first_table == 0 && d.first_alu == 0));
        assert_eq!(config.validate(ChipVariant::Tofino), Ok(()));
    }

    #[test]
    fn sram_lookup_round_trips() {
        let mut config = MauConfig::new(2);
        let usage = SramUse::ActionData { table: 4, vpn: 7 };
        config.set_sram(5, 9, usage).unwrap();
        assert_eq!(config.sram(5, 9), usage);
        assert_eq!(config.find_sram(usage), Some((5, 9)));
        assert!(config.set_sram(8, 0, usage).is_err());
    }
}
