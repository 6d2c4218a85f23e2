//! Diagnostic snapshot capture.
//!
//! A snapshot is armed with a trigger, fills on the first header-time
//! invocation that satisfies it and then holds its capture until taken.
//! Capturing never changes functional state.

use log::debug;

use crate::{
    Distribution, Gress, MauLookupResult, PredicationResult, BUSES_PER_KIND, TABLE_END,
};

/// Condition that fills an armed snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SnapshotTrigger {
    /// The next packet.
    AnyPacket,
    /// The next packet on which this logical table ran and hit.
    TableHit(u8),
}

/// Capture state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SnapshotState {
    /// Not capturing.
    #[default]
    Passive,
    /// Waiting for the trigger.
    Armed(SnapshotTrigger),
    /// Holding a capture.
    Full,
}

/// Captured view of one logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct TableCapture {
    /// Logical table.
    pub table: u8,
    /// Lookup hit.
    pub hit: bool,
    /// Predication held the table off.
    pub inhibited: bool,
    /// Predication ran the table.
    pub executed: bool,
    /// `vpn << 10 | index` of the hit.
    pub match_address: u32,
    /// Resolved next table.
    pub next_table: u8,
}

/// One filled snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SnapshotCapture {
    /// Stage captured.
    pub stage: u8,
    /// Per logical table.
    pub tables: Vec<TableCapture>,
    /// Bus values, `[family][bus]`.
    pub buses: [[Option<u32>; BUSES_PER_KIND]; 3],
    /// Outgoing next table per thread.
    pub next_table: [u8; 3],
}

impl SnapshotCapture {
    /// Capture of one table.
    #[must_use]
    pub fn table(&self, table: u8) -> Option<&TableCapture> {
        self.tables.get(usize::from(table))
    }
}

/// Snapshot logic of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    state: SnapshotState,
    capture: Option<SnapshotCapture>,
}

impl Snapshot {
    /// Passive snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SnapshotState {
        self.state
    }

    /// Arms the snapshot, discarding any held capture.
    pub fn arm(&mut self, trigger: SnapshotTrigger) {
        self.state = SnapshotState::Armed(trigger);
        self.capture = None;
    }

    /// Returns to passive, discarding any held capture.
    pub fn disarm(&mut self) {
        self.state = SnapshotState::Passive;
        self.capture = None;
    }

    /// Held capture.
    #[must_use]
    pub const fn capture(&self) -> Option<&SnapshotCapture> {
        self.capture.as_ref()
    }

    /// Removes the held capture and returns to passive.
    pub fn take(&mut self) -> Option<SnapshotCapture> {
        self.state = SnapshotState::Passive;
        self.capture.take()
    }

    /// Fills an armed snapshot whose trigger the packet satisfies.
    pub fn observe(
        &mut self,
        stage: u8,
        lookups: &[MauLookupResult],
        distribution: &Distribution,
        predication: &PredicationResult,
    ) -> bool {
        let SnapshotState::Armed(trigger) = self.state else {
            return false;
        };
        let fired = match trigger {
            SnapshotTrigger::AnyPacket => true,
            SnapshotTrigger::TableHit(table) => lookups
                .iter()
                .any(|lookup| lookup.table == table && lookup.ran && lookup.hit),
        };
        if !fired {
            return false;
        }
        let tables = lookups
            .iter()
            .map(|lookup| TableCapture {
                table: lookup.table,
                hit: lookup.hit,
                inhibited: !lookup.ran,
                executed: lookup.ran,
                match_address: lookup.match_address,
                next_table: lookup.next_table,
            })
            .collect();
        let next_table = Gress::ALL.map(|gress| {
            predication
                .thread(gress)
                .map_or(TABLE_END, |thread| thread.out.next_table)
        });
        debug!("stage {stage}: snapshot captured ({trigger:?})");
        self.capture = Some(SnapshotCapture {
            stage,
            tables,
            buses: distribution.buses,
            next_table,
        });
        self.state = SnapshotState::Full;
        true
    }
}
