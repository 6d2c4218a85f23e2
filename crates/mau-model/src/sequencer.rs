//! Step registry and per-invocation execution state.
//!
//! Every invocation of a stage (a packet header, an end of packet, a bus
//! access, a sweep) walks the same ordered step list. A step runs when its
//! kinds include the invocation kind and its time window admits the
//! invocation's EOP/TEOP flags.

use log::trace;

use crate::{
    steps, Distribution, EopAddresses, HashResult, MaintenanceOp, MaintenanceReply, MatchInput,
    Mau, MauError, MauLookupResult, MeterColor, Phv, PredicationResult, SweepOutput,
    DeferredLookup, ALUS_PER_KIND, LOGICAL_TABLES,
};

/// What started an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum StepKind {
    /// Header-time packet lookup.
    PhvLookup,
    /// End of packet.
    HandleEop,
    /// Truncated end of packet.
    HandleTeop,
    /// Register bus read.
    PbusRead,
    /// Register bus write.
    PbusWrite,
    /// Memory dump.
    Dump,
    /// Idle-cycle sweep.
    Sweep,
    /// Stateful page clear.
    StatefulClear,
}

impl StepKind {
    /// `(at_eop, at_teop)` of invocations of this kind.
    #[must_use]
    pub const fn flags(self) -> (bool, bool) {
        match self {
            Self::HandleEop => (true, false),
            Self::HandleTeop => (false, true),
            Self::PhvLookup
            | Self::PbusRead
            | Self::PbusWrite
            | Self::Dump
            | Self::Sweep
            | Self::StatefulClear => (false, false),
        }
    }
}

/// Invocation flags a step accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TimeWindow {
    /// Neither EOP nor TEOP.
    HeaderTime,
    /// EOP only.
    EopTime,
    /// TEOP only.
    TeopTime,
    /// Anything but TEOP.
    HeaderAndEopTime,
}

impl TimeWindow {
    /// Window admits an invocation with these flags.
    #[must_use]
    pub const fn admits(self, at_eop: bool, at_teop: bool) -> bool {
        match self {
            Self::HeaderTime => !at_eop && !at_teop,
            Self::EopTime => at_eop && !at_teop,
            Self::TeopTime => at_teop,
            Self::HeaderAndEopTime => !at_teop,
        }
    }
}

/// Body of a step.
pub type StepFn = fn(&mut Mau, &mut MauExecuteState<'_>) -> Result<(), MauError>;

/// One registered step.
#[derive(Clone, Copy)]
pub struct ExecuteStep {
    /// Name used in traces and errors.
    pub name: &'static str,
    /// Invocation kinds the step takes part in.
    pub kinds: &'static [StepKind],
    /// Accepted invocation flags.
    pub window: TimeWindow,
    /// Step reads or writes the PHV.
    pub needs_phv: bool,
    /// Body.
    pub run: StepFn,
}

impl std::fmt::Debug for ExecuteStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteStep")
            .field("name", &self.name)
            .field("kinds", &self.kinds)
            .field("window", &self.window)
            .field("needs_phv", &self.needs_phv)
            .finish_non_exhaustive()
    }
}

impl ExecuteStep {
    /// Step applies to an invocation.
    #[must_use]
    pub fn applies(&self, kind: StepKind, at_eop: bool, at_teop: bool) -> bool {
        self.kinds.contains(&kind) && self.window.admits(at_eop, at_teop)
    }
}

const HEADER: &[StepKind] = &[StepKind::PhvLookup];
const HEADER_AND_EOP: &[StepKind] = &[StepKind::PhvLookup, StepKind::HandleEop];
const TEOP: &[StepKind] = &[StepKind::HandleTeop];
const SWEEP: &[StepKind] = &[StepKind::Sweep];
const CONTROL: &[StepKind] = &[
    StepKind::PbusRead,
    StepKind::PbusWrite,
    StepKind::Dump,
    StepKind::StatefulClear,
];

/// Stage steps in execution order.
pub const MAU_STEPS: [ExecuteStep; 14] = [
    ExecuteStep {
        name: "xbar",
        kinds: HEADER,
        window: TimeWindow::HeaderTime,
        needs_phv: true,
        run: steps::xbar,
    },
    ExecuteStep {
        name: "hash",
        kinds: HEADER,
        window: TimeWindow::HeaderTime,
        needs_phv: false,
        run: steps::hash,
    },
    ExecuteStep {
        name: "match",
        kinds: HEADER,
        window: TimeWindow::HeaderTime,
        needs_phv: true,
        run: steps::lookup,
    },
    ExecuteStep {
        name: "predication",
        kinds: HEADER,
        window: TimeWindow::HeaderTime,
        needs_phv: true,
        run: steps::predication,
    },
    ExecuteStep {
        name: "distribute",
        kinds: HEADER,
        window: TimeWindow::HeaderTime,
        needs_phv: false,
        run: steps::distribute,
    },
    ExecuteStep {
        name: "distribute-teop",
        kinds: HEADER,
        window: TimeWindow::HeaderTime,
        needs_phv: false,
        run: steps::distribute_teop,
    },
    ExecuteStep {
        name: "meter",
        kinds: HEADER_AND_EOP,
        window: TimeWindow::HeaderAndEopTime,
        needs_phv: false,
        run: steps::meter_alus,
    },
    ExecuteStep {
        name: "meter-teop",
        kinds: TEOP,
        window: TimeWindow::TeopTime,
        needs_phv: false,
        run: steps::meter_teop,
    },
    ExecuteStep {
        name: "action-data",
        kinds: HEADER,
        window: TimeWindow::HeaderTime,
        needs_phv: false,
        run: steps::action_data,
    },
    ExecuteStep {
        name: "stats-idle",
        kinds: HEADER_AND_EOP,
        window: TimeWindow::HeaderAndEopTime,
        needs_phv: false,
        run: steps::stats_idle,
    },
    ExecuteStep {
        name: "stats-teop",
        kinds: TEOP,
        window: TimeWindow::TeopTime,
        needs_phv: false,
        run: steps::stats_teop,
    },
    ExecuteStep {
        name: "sweep",
        kinds: SWEEP,
        window: TimeWindow::HeaderTime,
        needs_phv: false,
        run: steps::sweep,
    },
    ExecuteStep {
        name: "maintenance",
        kinds: CONTROL,
        window: TimeWindow::HeaderTime,
        needs_phv: false,
        run: steps::maintenance,
    },
    ExecuteStep {
        name: "snapshot",
        kinds: HEADER,
        window: TimeWindow::HeaderTime,
        needs_phv: false,
        run: steps::snapshot,
    },
];

/// Ordered, validated step list.
#[derive(Debug, Clone, Default)]
pub struct StepTable {
    steps: Vec<ExecuteStep>,
}

impl StepTable {
    /// Empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// The stage steps.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::StepWindow`] if a built-in step is inconsistent.
    pub fn standard() -> Result<Self, MauError> {
        let mut table = Self::new();
        for step in MAU_STEPS {
            table.register(step)?;
        }
        Ok(table)
    }

    /// Appends a step.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::StepWindow`] when the step needs the PHV outside
    /// header time or lists a kind its window can never admit.
    pub fn register(&mut self, step: ExecuteStep) -> Result<(), MauError> {
        let window_error = MauError::StepWindow {
            step: step.name,
            window: step.window,
        };
        if step.needs_phv && step.window != TimeWindow::HeaderTime {
            return Err(window_error);
        }
        let unreachable = step.kinds.iter().any(|kind| {
            let (at_eop, at_teop) = kind.flags();
            !step.window.admits(at_eop, at_teop)
        });
        if unreachable {
            return Err(window_error);
        }
        self.steps.push(step);
        Ok(())
    }

    /// Registered steps in order.
    #[must_use]
    pub fn steps(&self) -> &[ExecuteStep] {
        &self.steps
    }

    /// Step at a position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<ExecuteStep> {
        self.steps.get(index).copied()
    }

    /// Registered steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// No step registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// An end-of-packet event and the addresses its packet recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct EndOfPacket {
    /// Addresses recorded at header time.
    pub addresses: EopAddresses,
    /// Packet length in bytes.
    pub byte_len: u32,
    /// Packet ended in error.
    pub error: bool,
}

/// Header-time ALU outputs of one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PacketOutputs {
    /// Action data word per table.
    pub action_data: [Option<u128>; LOGICAL_TABLES],
    /// Meter color per meter ALU.
    pub meter_colors: [Option<MeterColor>; ALUS_PER_KIND],
    /// Selected member per selector ALU.
    pub selector_members: [Option<u8>; ALUS_PER_KIND],
    /// Output per stateful ALU.
    pub stateful_outputs: [Option<u32>; ALUS_PER_KIND],
}

/// Scratch state of one invocation.
#[derive(Debug)]
pub struct MauExecuteState<'a> {
    /// Invocation kind.
    pub kind: StepKind,
    /// Invocation is an EOP.
    pub at_eop: bool,
    /// Invocation is a TEOP.
    pub at_teop: bool,
    /// Packet header vector.
    pub phv: Option<&'a mut Phv>,
    /// Match buses.
    pub input: Option<MatchInput>,
    /// Hash outputs.
    pub hash: HashResult,
    /// Raw lookups with their held errors.
    pub deferred: Vec<DeferredLookup>,
    /// Lookups after predication.
    pub lookups: Vec<MauLookupResult>,
    /// Predication outcome.
    pub predication: PredicationResult,
    /// Bus values and ALU inputs.
    pub distribution: Distribution,
    /// Addresses recorded for the packet's EOP and TEOP.
    pub eop_addresses: EopAddresses,
    /// Event being handled.
    pub eop: Option<EndOfPacket>,
    /// Header-time ALU outputs.
    pub outputs: PacketOutputs,
    /// Control-plane request.
    pub pending: Option<MaintenanceOp>,
    /// Completion of `pending`.
    pub reply: Option<MaintenanceReply>,
    /// Sweep work.
    pub sweep: SweepOutput,
}

impl<'a> MauExecuteState<'a> {
    fn with_kind(kind: StepKind) -> Self {
        let (at_eop, at_teop) = kind.flags();
        Self {
            kind,
            at_eop,
            at_teop,
            phv: None,
            input: None,
            hash: HashResult::default(),
            deferred: Vec::new(),
            lookups: Vec::new(),
            predication: PredicationResult::default(),
            distribution: Distribution::default(),
            eop_addresses: EopAddresses::default(),
            eop: None,
            outputs: PacketOutputs::default(),
            pending: None,
            reply: None,
            sweep: SweepOutput::default(),
        }
    }

    /// Header-time invocation for a packet.
    #[must_use]
    pub fn packet(phv: &'a mut Phv) -> Self {
        let mut state = Self::with_kind(StepKind::PhvLookup);
        state.phv = Some(phv);
        state
    }

    /// EOP or TEOP invocation.
    #[must_use]
    pub fn end_of_packet(eop: EndOfPacket, truncated: bool) -> Self {
        let kind = if truncated {
            StepKind::HandleTeop
        } else {
            StepKind::HandleEop
        };
        let mut state = Self::with_kind(kind);
        state.eop = Some(eop);
        state
    }

    /// Control-plane invocation.
    #[must_use]
    pub fn control(op: MaintenanceOp) -> Self {
        let mut state = Self::with_kind(op.step_kind());
        state.pending = Some(op);
        state
    }

    /// Idle-cycle invocation.
    #[must_use]
    pub fn sweep() -> Self {
        Self::with_kind(StepKind::Sweep)
    }
}

/// Runs every applicable step of `mau` in order.
///
/// # Errors
///
/// Returns the first step error, or [`MauError::MissingPhv`] when a step
/// needing the PHV applies to an invocation without one.
pub fn execute(mau: &mut Mau, state: &mut MauExecuteState<'_>) -> Result<(), MauError> {
    for index in 0..mau.steps.len() {
        let Some(step) = mau.steps.get(index) else {
            break;
        };
        if !step.applies(state.kind, state.at_eop, state.at_teop) {
            continue;
        }
        if step.needs_phv && state.phv.is_none() {
            return Err(MauError::MissingPhv { step: step.name });
        }
        trace!("stage {} {:?}: {}", mau.config.stage, state.kind, step.name);
        (step.run)(mau, state)?;
    }
    Ok(())
}
