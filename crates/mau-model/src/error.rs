use thiserror::Error;

use crate::{AluKind, ChipVariant, Gress, HitSource, TimeWindow};

/// Error classes used for diagnostics aggregation and halt policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ErrorClass {
    /// Programming error in the stage configuration.
    Configuration,
    /// A required physical resource is missing or exceeded.
    Resource,
    /// Two hardware sources disagree in a way the chip cannot resolve.
    Consistency,
    /// A step was registered or run outside its timing window.
    Timing,
    /// Register bus or memory access to a location that does not exist.
    Access,
}

/// Fatal conditions detected by the match-action core.
///
/// Recoverable conditions never surface as a `MauError`; they are logged and
/// counted in [`crate::TableDiag`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MauError {
    /// An xbar byte selects a PHV container owned by a different thread.
    #[error("xbar byte {byte} selects phv word {word} owned by {owner:?} for {gress:?}")]
    XbarGressMismatch {
        /// Output byte position (ternary bytes offset by the exact width).
        byte: u16,
        /// Selected PHV container.
        word: u8,
        /// Thread that owns the container.
        owner: Gress,
        /// Thread the xbar byte is configured for.
        gress: Gress,
    },
    /// More than one match source hit for one logical table.
    #[error("table {table}: {first:?} and {second:?} both hit")]
    DoubleHit {
        /// Logical table.
        table: u8,
        /// First hit source.
        first: HitSource,
        /// Second hit source.
        second: HitSource,
    },
    /// Two ternary hits with identical priority.
    #[error("table {table}: ternary hits at row {row} col {col} tie at priority {priority}")]
    TcamPriorityTie {
        /// Logical table.
        table: u8,
        /// Head row of the second chain.
        row: u8,
        /// Column of the second chain.
        col: u8,
        /// Shared priority.
        priority: u32,
    },
    /// Two chains of one logical TCAM were configured with the same priority base.
    #[error("logical tcam {tcam}: chains share priority base {priority_base}")]
    DuplicateChainPriority {
        /// Logical TCAM index.
        tcam: u8,
        /// Duplicated base.
        priority_base: u16,
    },
    /// Two tables drove enabled addresses onto one bus in the same cycle.
    #[error("{kind:?} bus {bus} driven by tables {first_table} and {second_table}")]
    BusConflict {
        /// Address kind carried by the bus.
        kind: AluKind,
        /// Bus index.
        bus: u8,
        /// First driver.
        first_table: u8,
        /// Second driver.
        second_table: u8,
    },
    /// A step was registered with a window that can never admit one of its kinds.
    #[error("step `{step}` cannot run in window {window:?}")]
    StepWindow {
        /// Step name.
        step: &'static str,
        /// Declared window.
        window: TimeWindow,
    },
    /// A step needing the PHV ran in an invocation without one.
    #[error("step `{step}` requires a phv")]
    MissingPhv {
        /// Step name.
        step: &'static str,
    },
    /// Register bus access to an unmapped address.
    #[error("no register at address {addr:#010x}")]
    UnknownRegister {
        /// Faulting address.
        addr: u32,
    },
    /// Memory or configuration index outside the physical array.
    #[error("{what} index {index} out of range")]
    OutOfRange {
        /// Array that was indexed.
        what: &'static str,
        /// Faulting index.
        index: usize,
    },
    /// No RAM backs the requested ALU virtual page.
    #[error("no {kind:?} memory for alu {alu} vpn {vpn}")]
    NoMemory {
        /// ALU family.
        kind: AluKind,
        /// ALU index.
        alu: u8,
        /// Virtual page.
        vpn: u8,
    },
    /// A bus write carried a value of the wrong shape for its target.
    #[error("{target} cannot hold a {value} value")]
    PbusMismatch {
        /// Addressed memory.
        target: &'static str,
        /// Supplied value kind.
        value: &'static str,
    },
    /// A table move was popped with none pushed.
    #[error("table {table}: no table move pending")]
    NoPendingMove {
        /// Logical table.
        table: u8,
    },
    /// Feature not present on the selected chip variant.
    #[error("{feature} is not supported on {chip:?}")]
    UnsupportedFeature {
        /// Feature name.
        feature: &'static str,
        /// Selected chip.
        chip: ChipVariant,
    },
}

impl MauError {
    /// Returns the diagnostics class for this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::XbarGressMismatch { .. }
            | Self::DuplicateChainPriority { .. }
            | Self::UnsupportedFeature { .. } => ErrorClass::Configuration,
            Self::DoubleHit { .. } | Self::TcamPriorityTie { .. } | Self::BusConflict { .. } => {
                ErrorClass::Consistency
            }
            Self::StepWindow { .. } | Self::MissingPhv { .. } => ErrorClass::Timing,
            Self::UnknownRegister { .. } | Self::OutOfRange { .. } | Self::PbusMismatch { .. } => {
                ErrorClass::Access
            }
            Self::NoPendingMove { .. } => ErrorClass::Consistency,
            Self::NoMemory { .. } => ErrorClass::Resource,
        }
    }

    /// Logical table the error is attributed to, when there is one.
    #[must_use]
    pub const fn table(&self) -> Option<u8> {
        match self {
            Self::DoubleHit { table, .. }
            | Self::TcamPriorityTie { table, .. }
            | Self::NoPendingMove { table } => Some(*table),
            Self::BusConflict { second_table, .. } => Some(*second_table),
            _ => None,
        }
    }
}

/// A fatal error located at one pipe and stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("pipe {pipe} stage {stage}: {error}")]
pub struct MauFault {
    /// Pipe index.
    pub pipe: u8,
    /// Stage index within the pipe.
    pub stage: u8,
    /// Underlying error.
    #[source]
    pub error: MauError,
}

impl MauFault {
    /// Attaches a pipe/stage location to an error.
    #[must_use]
    pub const fn new(pipe: u8, stage: u8, error: MauError) -> Self {
        Self { pipe, stage, error }
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorClass, MauError, MauFault};
    use crate::{AluKind, Gress, HitSource, TimeWindow};

    #[test]
    fn class_mapping_matches_taxonomy() {
        let gress = MauError::XbarGressMismatch {
            byte: 3,
            word: 7,
            owner: Gress::Egress,
            gress: Gress::Ingress,
        };
        assert_eq!(gress.class(), ErrorClass::Configuration);

        let double = MauError::DoubleHit {
            table: 2,
            first: HitSource::Exact { way: 0 },
            second: HitSource::Stash { entry: 1 },
        };
        assert_eq!(double.class(), ErrorClass::Consistency);
        assert_eq!(double.table(), Some(2));

        let window = MauError::StepWindow {
            step: "xbar",
            window: TimeWindow::EopTime,
        };
        assert_eq!(window.class(), ErrorClass::Timing);

        let conflict = MauError::BusConflict {
            kind: AluKind::Stats,
            bus: 1,
            first_table: 0,
            second_table: 4,
        };
        assert_eq!(conflict.class(), ErrorClass::Consistency);
        assert_eq!(conflict.table(), Some(4));

        assert_eq!(
            MauError::UnknownRegister { addr: 0 }.class(),
            ErrorClass::Access
        );
    }

    #[test]
    fn fault_display_names_pipe_stage_and_site() {
        let fault = MauFault::new(
            1,
            5,
            MauError::TcamPriorityTie {
                table: 3,
                row: 4,
                col: 1,
                priority: 77,
            },
        );
        let text = fault.to_string();
        assert!(text.starts_with("pipe 1 stage 5:"));
        assert!(text.contains("row 4 col 1"));
    }
}
