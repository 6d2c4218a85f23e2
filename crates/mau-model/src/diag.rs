//! Per-table and per-stage diagnostic counters.
//!
//! Recoverable configuration conditions are resolved locally by the component
//! that finds them and reported here as a [`ConfigEvent`]. All counters
//! saturate.

use crate::LOGICAL_TABLES;

/// A recoverable condition attributed to one logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ConfigEvent {
    /// Address VPN fell outside the consumer's configured range.
    VpnRange,
    /// A driven bus had no enabled consumer of the right mode.
    UnconsumedRoute,
    /// Two drivers of one bus named different ALUs.
    DisagreeingDrivers,
    /// A bus conflict was OR-resolved under the relaxed check.
    RelaxedBusConflict,
    /// A double hit was resolved by precedence under the relaxed check.
    RelaxedDoubleHit,
    /// A TCAM chain ran off the array or hit a disabled/foreign TCAM.
    TcamChain,
    /// No RAM backs an address or a way.
    MissingMemory,
    /// Next table pointed backwards or to an earlier stage.
    Branch,
    /// An xbar byte selected a container of another thread.
    GressMismatch,
}

/// Saturating counters for one logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TableDiag {
    /// Lookups of this table that predication activated.
    pub lookups: u32,
    /// Hits among those lookups.
    pub hits: u32,
    /// VPN range rejections.
    pub vpn_range_errors: u32,
    /// Routes dropped for want of a consumer.
    pub unconsumed_routes: u32,
    /// Bus drivers disagreeing on the consuming ALU.
    pub disagreeing_drivers: u32,
    /// Relaxed bus conflicts.
    pub relaxed_bus_conflicts: u32,
    /// Relaxed double hits.
    pub relaxed_double_hits: u32,
    /// TCAM chain errors.
    pub tcam_chain_errors: u32,
    /// Missing memory.
    pub missing_memory: u32,
    /// Branch errors.
    pub branch_errors: u32,
    /// Cross-thread xbar selections.
    pub gress_mismatches: u32,
}

impl TableDiag {
    /// Counts one event.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record(&mut self, event: ConfigEvent) {
        let counter = match event {
            ConfigEvent::VpnRange => &mut self.vpn_range_errors,
            ConfigEvent::UnconsumedRoute => &mut self.unconsumed_routes,
            ConfigEvent::DisagreeingDrivers => &mut self.disagreeing_drivers,
            ConfigEvent::RelaxedBusConflict => &mut self.relaxed_bus_conflicts,
            ConfigEvent::RelaxedDoubleHit => &mut self.relaxed_double_hits,
            ConfigEvent::TcamChain => &mut self.tcam_chain_errors,
            ConfigEvent::MissingMemory => &mut self.missing_memory,
            ConfigEvent::Branch => &mut self.branch_errors,
            ConfigEvent::GressMismatch => &mut self.gress_mismatches,
        };
        *counter = counter.saturating_add(1);
    }

    /// Count for one event kind.
    #[must_use]
    pub const fn count(&self, event: ConfigEvent) -> u32 {
        match event {
            ConfigEvent::VpnRange => self.vpn_range_errors,
            ConfigEvent::UnconsumedRoute => self.unconsumed_routes,
            ConfigEvent::DisagreeingDrivers => self.disagreeing_drivers,
            ConfigEvent::RelaxedBusConflict => self.relaxed_bus_conflicts,
            ConfigEvent::RelaxedDoubleHit => self.relaxed_double_hits,
            ConfigEvent::TcamChain => self.tcam_chain_errors,
            ConfigEvent::MissingMemory => self.missing_memory,
            ConfigEvent::Branch => self.branch_errors,
            ConfigEvent::GressMismatch => self.gress_mismatches,
        }
    }

    /// Sum of every configuration error counter.
    #[must_use]
    pub const fn config_errors(&self) -> u32 {
        self.vpn_range_errors
            .saturating_add(self.unconsumed_routes)
            .saturating_add(self.disagreeing_drivers)
            .saturating_add(self.relaxed_bus_conflicts)
            .saturating_add(self.relaxed_double_hits)
            .saturating_add(self.tcam_chain_errors)
            .saturating_add(self.missing_memory)
            .saturating_add(self.branch_errors)
            .saturating_add(self.gress_mismatches)
    }
}

/// Stage-wide activity counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StageDiag {
    /// Header-time invocations.
    pub packets: u32,
    /// End-of-packet invocations.
    pub eops: u32,
    /// Truncated end-of-packet invocations.
    pub teops: u32,
    /// Sweep words processed.
    pub sweeps: u32,
    /// Sweeps deferred because the ALU served a packet that cycle.
    pub deferred_sweeps: u32,
    /// Cross-thread xbar selections that could not be attributed to a table.
    pub gress_mismatches: u32,
    /// Host queue entries dropped to make room for newer ones.
    pub host_queue_drops: u32,
}

/// All counters for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MauDiag {
    /// Per logical table.
    pub tables: [TableDiag; LOGICAL_TABLES],
    /// Stage-wide.
    pub stage: StageDiag,
}

impl MauDiag {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts an event against `table`; out-of-range tables are ignored.
    pub fn record(&mut self, table: u8, event: ConfigEvent) {
        if let Some(diag) = self.tables.get_mut(usize::from(table)) {
            diag.record(event);
        }
    }

    /// Counters of one table.
    #[must_use]
    pub fn table(&self, table: u8) -> TableDiag {
        self.tables
            .get(usize::from(table))
            .copied()
            .unwrap_or_default()
    }

    /// Total configuration errors across all tables and the stage.
    #[must_use]
    pub fn total_config_errors(&self) -> u32 {
        self.tables
            .iter()
            .fold(self.stage.gress_mismatches, |acc, table| {
                acc.saturating_add(table.config_errors())
            })
    }

    /// Resets all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
