//! Stats, meter (meter / selector / stateful) and idle-time ALUs.

mod idle;
mod meter;
mod selector;
mod stateful;
mod stats;

pub use idle::{idle_age, idle_hit, idle_sweep, IdleNotification, IDLE_ENTRIES};
pub use meter::{MeterColor, MeterWord};
pub use selector::{select_member, SELECTOR_MEMBERS};
pub use stateful::{execute_stateful, StatefulInstr, StatefulOp, StatefulOutput};
pub use stats::{
    adjusted_bytes, count_stats, entries_to_evict, read_stats, write_stats, StatsCounter,
    StatsFormat, COMPRESSED_EVICT_THRESHOLD,
};

use crate::{AluKind, VpnRange};

/// ALUs of each family.
pub const ALUS_PER_KIND: usize = 4;
/// Buses of each family: four home-row buses then two overflow buses.
pub const BUSES_PER_KIND: usize = 6;

/// End-of-packet event an ALU commits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AluTiming {
    /// Full end of packet.
    #[default]
    Eop,
    /// Truncated end of packet.
    Teop,
}

/// Statistics ALU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StatsAluConfig {
    /// ALU consumes its bus.
    pub enabled: bool,
    /// Word format.
    pub format: StatsFormat,
    /// Signed byte adjustment applied to every packet length.
    pub byte_adjust: i16,
    /// Accepted VPNs.
    pub vpn_range: VpnRange,
    /// Commit event.
    pub timing: AluTiming,
}

/// Role of a meter ALU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MeterAluMode {
    /// Two-rate meter.
    #[default]
    Meter,
    /// Member selection for action profiles.
    Selector {
        /// Hash group.
        hash_group: u8,
        /// First hash bit.
        hash_lsb: u8,
        /// Hash bits used.
        hash_bits: u8,
    },
    /// Register ALU.
    Stateful {
        /// Instructions selected by address op.
        instrs: [StatefulInstr; 4],
    },
}

/// What a table expects of the meter ALU it routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum MeterUse {
    /// Meter.
    #[default]
    Meter,
    /// Selector.
    Selector,
    /// Stateful.
    Stateful,
}

impl MeterAluMode {
    /// Use this mode serves.
    #[must_use]
    pub const fn serves(&self) -> MeterUse {
        match self {
            Self::Meter => MeterUse::Meter,
            Self::Selector { .. } => MeterUse::Selector,
            Self::Stateful { .. } => MeterUse::Stateful,
        }
    }
}

/// Meter ALU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MeterAluConfig {
    /// ALU consumes its bus.
    pub enabled: bool,
    /// Role.
    pub mode: MeterAluMode,
    /// Accepted VPNs.
    pub vpn_range: VpnRange,
    /// Commit event for meter debits.
    pub timing: AluTiming,
}

/// Idle-time ALU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct IdleAluConfig {
    /// ALU consumes its bus.
    pub enabled: bool,
    /// Accepted VPNs.
    pub vpn_range: VpnRange,
    /// Age at which a notification is raised.
    pub max: u8,
}

impl Default for IdleAluConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            vpn_range: VpnRange::full(),
            max: 0xFF,
        }
    }
}

/// Every ALU of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AluConfig {
    /// Statistics ALUs.
    pub stats: [StatsAluConfig; ALUS_PER_KIND],
    /// Meter ALUs.
    pub meter: [MeterAluConfig; ALUS_PER_KIND],
    /// Idle-time ALUs.
    pub idle: [IdleAluConfig; ALUS_PER_KIND],
}

impl AluConfig {
    /// An enabled ALU is timed to TEOP.
    #[must_use]
    pub fn uses_teop(&self) -> bool {
        self.stats
            .iter()
            .any(|alu| alu.enabled && alu.timing == AluTiming::Teop)
            || self
                .meter
                .iter()
                .any(|alu| alu.enabled && alu.timing == AluTiming::Teop)
    }

    /// ALU exists and consumes its bus.
    #[must_use]
    pub fn enabled(&self, kind: AluKind, alu: u8) -> bool {
        let alu = usize::from(alu);
        match kind {
            AluKind::Stats => self.stats.get(alu).is_some_and(|cfg| cfg.enabled),
            AluKind::Meter => self.meter.get(alu).is_some_and(|cfg| cfg.enabled),
            AluKind::Idle => self.idle.get(alu).is_some_and(|cfg| cfg.enabled),
            AluKind::Action => false,
        }
    }

    /// VPN range of an ALU.
    #[must_use]
    pub fn vpn_range(&self, kind: AluKind, alu: u8) -> Option<VpnRange> {
        let alu = usize::from(alu);
        match kind {
            AluKind::Stats => self.stats.get(alu).map(|cfg| cfg.vpn_range),
            AluKind::Meter => self.meter.get(alu).map(|cfg| cfg.vpn_range),
            AluKind::Idle => self.idle.get(alu).map(|cfg| cfg.vpn_range),
            AluKind::Action => None,
        }
    }

    /// Enables or disables an ALU; unknown ALUs are ignored.
    pub fn set_enabled(&mut self, kind: AluKind, alu: u8, enabled: bool) {
        let alu = usize::from(alu);
        match kind {
            AluKind::Stats => {
                if let Some(cfg) = self.stats.get_mut(alu) {
                    cfg.enabled = enabled;
                }
            }
            AluKind::Meter => {
                if let Some(cfg) = self.meter.get_mut(alu) {
                    cfg.enabled = enabled;
                }
            }
            AluKind::Idle => {
                if let Some(cfg) = self.idle.get_mut(alu) {
                    cfg.enabled = enabled;
                }
            }
            AluKind::Action => {}
        }
    }

    /// Replaces the VPN range of an ALU; unknown ALUs are ignored.
    pub fn set_vpn_range(&mut self, kind: AluKind, alu: u8, range: VpnRange) {
        let alu = usize::from(alu);
        let slot = match kind {
            AluKind::Stats => self.stats.get_mut(alu).map(|cfg| &mut cfg.vpn_range),
            AluKind::Meter => self.meter.get_mut(alu).map(|cfg| &mut cfg.vpn_range),
            AluKind::Idle => self.idle.get_mut(alu).map(|cfg| &mut cfg.vpn_range),
            AluKind::Action => None,
        };
        if let Some(slot) = slot {
            *slot = range;
        }
    }

    /// Commit event of a stats or meter ALU; idle ALUs commit at header time.
    #[must_use]
    pub fn timing(&self, kind: AluKind, alu: u8) -> Option<AluTiming> {
        let alu = usize::from(alu);
        match kind {
            AluKind::Stats => self.stats.get(alu).map(|cfg| cfg.timing),
            AluKind::Meter => self.meter.get(alu).map(|cfg| cfg.timing),
            AluKind::Idle | AluKind::Action => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AluConfig, AluTiming, MeterAluMode, MeterUse, StatefulInstr};
    use crate::{AluKind, VpnRange};

    #[test]
    fn queries_by_kind() {
        let mut config = AluConfig::default();
        config.meter[2].enabled = true;
        config.meter[2].vpn_range = VpnRange::new(8, 9);
        assert!(config.enabled(AluKind::Meter, 2));
        assert!(!config.enabled(AluKind::Meter, 4));
        assert!(!config.enabled(AluKind::Stats, 2));
        assert_eq!(config.vpn_range(AluKind::Meter, 2), Some(VpnRange::new(8, 9)));
        assert_eq!(config.timing(AluKind::Idle, 0), None);
        assert!(!config.uses_teop());
        config.meter[2].timing = AluTiming::Teop;
        assert!(config.uses_teop());

        config.set_enabled(AluKind::Idle, 1, true);
        config.set_vpn_range(AluKind::Idle, 1, VpnRange::new(3, 3));
        config.set_enabled(AluKind::Action, 1, true);
        config.set_vpn_range(AluKind::Stats, 9, VpnRange::new(3, 3));
        assert!(config.enabled(AluKind::Idle, 1));
        assert_eq!(config.vpn_range(AluKind::Idle, 1), Some(VpnRange::new(3, 3)));
        assert_eq!(config.stats, AluConfig::default().stats);
    }

    #[test]
    fn modes_map_to_uses() {
        assert_eq!(MeterAluMode::Meter.serves(), MeterUse::Meter);
        let stateful = MeterAluMode::Stateful {
            instrs: [StatefulInstr::default(); 4],
        };
        assert_eq!(stateful.serves(), MeterUse::Stateful);
    }
}
