//! One match-action stage: configuration, memories and the entry points that
//! drive the step sequencer.

use std::collections::VecDeque;

use log::{debug, warn};

use crate::{
    execute, ConfigEvent, ConfigField, ConfigListener, Distribution, EndOfPacket, EopAddresses,
    IdleNotification, InputXbar, MaintenanceOp, MaintenanceReply, MatchEngine, MauConfig, MauDiag,
    MauError, MauExecuteState, MauLookupResult, MemAddress, PacketOutputs, PbusValue, Phv,
    PredicationResult, RouteDisagreement, SimulationConfig, Snapshot, SramArray, StashArray,
    StatsEviction, StepTable, SweepOutput, SweepState, TableMove, TcamArray, LOGICAL_TABLES,
};

/// Entries each host queue holds before the oldest are dropped.
pub const HOST_QUEUE_CAPACITY: usize = 4096;

/// Everything a packet produced at header time.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PacketResult {
    /// Lookup of every logical table after predication.
    pub lookups: Vec<MauLookupResult>,
    /// Predication outcome.
    pub predication: PredicationResult,
    /// Bus values and ALU inputs.
    pub distribution: Distribution,
    /// Header-time ALU outputs.
    pub outputs: PacketOutputs,
    /// Addresses to hand back at EOP / TEOP.
    pub eop: EopAddresses,
}

impl PacketResult {
    /// End-of-packet event for this packet.
    #[must_use]
    pub const fn end_of_packet(&self, byte_len: u32, error: bool) -> EndOfPacket {
        EndOfPacket {
            addresses: self.eop,
            byte_len,
            error,
        }
    }

    /// Lookup of one table.
    #[must_use]
    pub fn lookup(&self, table: u8) -> Option<&MauLookupResult> {
        self.lookups.get(usize::from(table))
    }
}

/// One MAU stage.
///
/// Sweeps queue stats evictions and idle notifications for the host. Each
/// queue holds at most [`HOST_QUEUE_CAPACITY`] entries; the host drains them
/// with [`Mau::drain_stats_dump`] and [`Mau::drain_idle_notifications`], and
/// entries that arrive at a full queue push out the oldest ones, counted in
/// `StageDiag::host_queue_drops`.
pub struct Mau {
    pub(crate) sim: SimulationConfig,
    pub(crate) config: MauConfig,
    pub(crate) generation: u64,
    pub(crate) srams: SramArray,
    pub(crate) tcams: TcamArray,
    pub(crate) stash: StashArray,
    pub(crate) xbar: InputXbar,
    pub(crate) engine: MatchEngine,
    pub(crate) diag: MauDiag,
    pub(crate) snapshot: Snapshot,
    pub(crate) sweeps: SweepState,
    pub(crate) moves: [Option<TableMove>; LOGICAL_TABLES],
    stats_dump: VecDeque<StatsEviction>,
    idle_notifications: VecDeque<IdleNotification>,
    pub(crate) steps: StepTable,
    listeners: Vec<Box<dyn ConfigListener>>,
}

impl std::fmt::Debug for Mau {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mau")
            .field("stage", &self.config.stage)
            .field("chip", &self.sim.chip)
            .field("generation", &self.generation)
            .field("engine", &self.engine)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl Mau {
    /// Builds a stage with zeroed memories.
    ///
    /// # Errors
    ///
    /// Returns the first error found by [`MauConfig::validate`].
    pub fn new(config: MauConfig, sim: SimulationConfig) -> Result<Self, MauError> {
        Self::with_engine(config, sim, MatchEngine::new())
    }

    /// Builds a stage over a caller-chosen evaluator set.
    ///
    /// # Errors
    ///
    /// Returns the first error found by [`MauConfig::validate`].
    pub fn with_engine(
        config: MauConfig,
        sim: SimulationConfig,
        engine: MatchEngine,
    ) -> Result<Self, MauError> {
        config.validate(sim.chip)?;
        let mut mau = Self {
            sim,
            config,
            generation: 0,
            srams: SramArray::new(),
            tcams: TcamArray::new(),
            stash: StashArray::new(),
            xbar: InputXbar::new(),
            engine,
            diag: MauDiag::new(),
            snapshot: Snapshot::new(),
            sweeps: SweepState::new(),
            moves: [None; LOGICAL_TABLES],
            stats_dump: VecDeque::new(),
            idle_notifications: VecDeque::new(),
            steps: StepTable::standard()?,
            listeners: Vec::new(),
        };
        mau.record_route_disagreements(&[]);
        Ok(mau)
    }

    /// Stage index.
    #[must_use]
    pub const fn stage(&self) -> u8 {
        self.config.stage
    }

    /// Process switches.
    #[must_use]
    pub const fn sim(&self) -> &SimulationConfig {
        &self.sim
    }

    /// Committed configuration.
    #[must_use]
    pub const fn config(&self) -> &MauConfig {
        &self.config
    }

    /// Configuration generation; bumped by every committed change.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Diagnostic counters.
    #[must_use]
    pub const fn diag(&self) -> &MauDiag {
        &self.diag
    }

    /// Clears every diagnostic counter.
    pub fn reset_diag(&mut self) {
        self.diag.reset();
    }

    /// Snapshot logic.
    #[must_use]
    pub const fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Mutable snapshot logic, for arming and taking captures.
    #[allow(clippy::missing_const_for_fn)]
    pub fn snapshot_mut(&mut self) -> &mut Snapshot {
        &mut self.snapshot
    }

    /// Sweep cursors, locks and cycle count.
    #[must_use]
    pub const fn sweeps(&self) -> &SweepState {
        &self.sweeps
    }

    /// Registered steps.
    #[must_use]
    pub const fn steps(&self) -> &StepTable {
        &self.steps
    }

    /// Pending table move of a table.
    #[must_use]
    pub fn pending_move(&self, table: u8) -> Option<TableMove> {
        self.moves.get(usize::from(table)).copied().flatten()
    }

    /// Registers a configuration listener.
    pub fn add_listener(&mut self, listener: Box<dyn ConfigListener>) {
        self.listeners.push(listener);
    }

    /// Applies `update` to a copy of the configuration and commits it if it
    /// validates.
    ///
    /// # Errors
    ///
    /// Returns the validation error; the committed configuration is unchanged.
    pub fn update_config<F>(&mut self, field: ConfigField, update: F) -> Result<(), MauError>
    where
        F: FnOnce(&mut MauConfig),
    {
        let mut next = self.config.clone();
        update(&mut next);
        next.validate(self.sim.chip)?;
        let previous = self.config.route_disagreements();
        self.config = next;
        self.record_route_disagreements(&previous);
        self.config_changed(field);
        Ok(())
    }

    /// Applies a register-sized change in place.
    ///
    /// The caller has range-checked the new value and the change cannot
    /// affect any other field's validity.
    pub(crate) fn patch_config<F>(&mut self, field: ConfigField, patch: F)
    where
        F: FnOnce(&mut MauConfig),
    {
        patch(&mut self.config);
        self.config_changed(field);
    }

    /// Counts route disagreements the committed configuration introduced.
    fn record_route_disagreements(&mut self, previous: &[RouteDisagreement]) {
        for found in self.config.route_disagreements() {
            if previous.contains(&found) {
                continue;
            }
            warn!(
                "stage {}: {:?} bus {}: table {} routes to alu {}, table {} to alu {}; using alu {}",
                self.config.stage,
                found.kind,
                found.bus,
                found.first_table,
                found.first_alu,
                found.table,
                found.alu,
                found.first_alu
            );
            self.diag.record(found.table, ConfigEvent::DisagreeingDrivers);
        }
    }

    pub(crate) fn config_changed(&mut self, field: ConfigField) {
        self.generation = self.generation.wrapping_add(1);
        if field == ConfigField::Xbar {
            self.xbar.invalidate();
        }
        debug!(
            "stage {}: {field:?} changed, generation {}",
            self.config.stage, self.generation
        );
        for listener in &mut self.listeners {
            listener.config_changed(field);
        }
    }

    /// Runs header-time processing for one packet.
    ///
    /// Predication vectors in `phv` are replaced by this stage's outgoing
    /// vectors. A dropped packet is processed like any other.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error raised by a step; memories written by
    /// earlier steps keep their updates.
    pub fn process_packet(&mut self, phv: &mut Phv) -> Result<PacketResult, MauError> {
        self.diag.stage.packets = self.diag.stage.packets.saturating_add(1);
        let mut state = MauExecuteState::packet(phv);
        execute(self, &mut state)?;
        Ok(PacketResult {
            lookups: state.lookups,
            predication: state.predication,
            distribution: state.distribution,
            outputs: state.outputs,
            eop: state.eop_addresses,
        })
    }

    /// Commits the EOP-timed stats and meter addresses of a packet.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] if a recorded address leaves the array.
    pub fn handle_eop(&mut self, eop: &EndOfPacket) -> Result<(), MauError> {
        self.diag.stage.eops = self.diag.stage.eops.saturating_add(1);
        let mut state = MauExecuteState::end_of_packet(*eop, false);
        execute(self, &mut state)
    }

    /// Commits the TEOP-timed stats and meter addresses of a packet.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::UnsupportedFeature`] on a chip without TEOP.
    pub fn handle_teop(&mut self, eop: &EndOfPacket) -> Result<(), MauError> {
        if !self.sim.chip.supports_teop() {
            return Err(MauError::UnsupportedFeature {
                feature: "teop",
                chip: self.sim.chip,
            });
        }
        self.diag.stage.teops = self.diag.stage.teops.saturating_add(1);
        let mut state = MauExecuteState::end_of_packet(*eop, true);
        execute(self, &mut state)
    }

    /// Runs a control-plane request through the sequencer.
    ///
    /// # Errors
    ///
    /// Returns the error of the request.
    pub fn maintenance(&mut self, op: MaintenanceOp) -> Result<MaintenanceReply, MauError> {
        let mut state = MauExecuteState::control(op);
        execute(self, &mut state)?;
        Ok(state.reply.unwrap_or(MaintenanceReply::Done))
    }

    /// Reads a raw memory word.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] outside the addressed array.
    pub fn pbus_read(&mut self, addr: MemAddress) -> Result<PbusValue, MauError> {
        match self.maintenance(MaintenanceOp::PbusRead { addr })? {
            MaintenanceReply::Read(value) => Ok(value),
            _ => self.raw_read(addr),
        }
    }

    /// Writes a raw memory word.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] outside the addressed array and
    /// [`MauError::PbusMismatch`] when `value` does not fit the target.
    pub fn pbus_write(&mut self, addr: MemAddress, value: PbusValue) -> Result<(), MauError> {
        self.maintenance(MaintenanceOp::PbusWrite { addr, value })
            .map(|_| ())
    }

    /// Runs a stateful or idle dump and returns the page.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::NoMemory`] when no RAM backs the page.
    pub fn dump(&mut self, op: MaintenanceOp) -> Result<Vec<u128>, MauError> {
        match self.maintenance(op)? {
            MaintenanceReply::Words(words) => Ok(words),
            _ => Ok(Vec::new()),
        }
    }

    /// Zeroes the stateful pages `vpn_lo..=vpn_hi` of a meter ALU and returns
    /// the number of words cleared.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] if a usage entry leaves the array.
    pub fn stateful_clear(&mut self, alu: u8, vpn_lo: u8, vpn_hi: u8) -> Result<u32, MauError> {
        let op = MaintenanceOp::StatefulClear {
            alu,
            vpn_lo,
            vpn_hi,
        };
        match self.maintenance(op)? {
            MaintenanceReply::Cleared { words } => Ok(words),
            _ => Ok(0),
        }
    }

    /// Advances one idle cycle, running due sweeps.
    ///
    /// Packets processed since the previous idle cycle count as landing in
    /// this cycle.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] if a usage entry leaves the array.
    pub fn idle_cycle(&mut self) -> Result<SweepOutput, MauError> {
        let mut state = MauExecuteState::sweep();
        execute(self, &mut state)?;
        Ok(state.sweep)
    }

    /// Queues sweep output for the host, dropping the oldest entries past
    /// [`HOST_QUEUE_CAPACITY`].
    pub(crate) fn queue_sweep_output(&mut self, output: &SweepOutput) {
        let dropped = push_capped(&mut self.stats_dump, &output.evictions)
            + push_capped(&mut self.idle_notifications, &output.notifications);
        if dropped > 0 {
            warn!(
                "stage {}: host queues full, dropped {dropped} oldest entries",
                self.config.stage
            );
            let dropped = u32::try_from(dropped).unwrap_or(u32::MAX);
            let stage = &mut self.diag.stage;
            stage.host_queue_drops = stage.host_queue_drops.saturating_add(dropped);
        }
    }

    /// Removes and returns every stats entry evicted by sweeps.
    pub fn drain_stats_dump(&mut self) -> Vec<StatsEviction> {
        self.stats_dump.drain(..).collect()
    }

    /// Removes and returns every idle notification raised by sweeps.
    pub fn drain_idle_notifications(&mut self) -> Vec<IdleNotification> {
        self.idle_notifications.drain(..).collect()
    }
}

fn push_capped<T: Copy>(queue: &mut VecDeque<T>, items: &[T]) -> usize {
    queue.extend(items.iter().copied());
    let excess = queue.len().saturating_sub(HOST_QUEUE_CAPACITY);
    queue.drain(..excess);
    excess
}
