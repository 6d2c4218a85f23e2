//! Bit-exact behavioral model of one match-action unit stage of a
//! programmable switch pipeline.

mod bits;

/// Fatal error taxonomy and pipeline fault wrapper.
pub mod error;
pub use error::{ErrorClass, MauError, MauFault};

/// Chip profiles, simulation switches and stage configuration.
pub mod config;
pub use config::{
    ChipVariant, Gress, MauConfig, PredicationConfig, RouteDisagreement, SimulationConfig,
};

/// Per-table and per-stage diagnostic counters.
pub mod diag;
pub use diag::{ConfigEvent, MauDiag, StageDiag, TableDiag};

/// Packet header vector containers and predication vectors.
pub mod phv;
pub use phv::{phv_word_width, PhvWidth, Phv, PredicationVector, ThreadState, PHV_WORDS};

/// Memory address layout and VPN ranges.
pub mod address;
pub use address::{AluKind, Address, VpnRange, INDEX_BITS, OP_BITS, SUBWORD_BITS, VPN_BITS};

/// Input crossbar.
pub mod xbar;
pub use xbar::{
    InputXbar, MatchInput, XbarByteConfig, XbarConfig, XbarSource, EXACT_XBAR_BYTES,
    TERNARY_XBAR_BYTES,
};

/// Hash groups.
pub mod hash;
pub use hash::{
    hash, hash_all, hash_input, HashGroupConfig, HashResult, HASH_GROUPS, HASH_INPUT_BITS,
    HASH_OUTPUT_BITS, HASH_STAGE_BITS,
};

/// Unit RAM array.
pub mod sram;
pub use sram::{SramArray, SramUse, SRAM_COLS, SRAM_ROWS, SRAM_WORDS};

/// TCAM array, chains and ternary search.
pub mod tcam;
pub use tcam::{
    LogicalTcamConfig, TcamArray, TcamChain, TcamConfig, TcamWord, TernaryHit, TernarySearch,
    LOGICAL_TCAMS, TCAM_COLS, TCAM_ENTRIES, TCAM_ROWS, TCAM_SLICES, TCAM_SLICE_BITS,
};

/// Exact-match ways and stash.
pub mod exact;
pub use exact::{
    exact_key, key_mask, ExactEntry, ExactWayConfig, StashArray, StashEntry, WayRam,
    EXACT_KEY_BYTES, STASH_ENTRIES, WAY_INDEX_BITS,
};

/// Logical tables and the match engine.
pub mod lookup;
pub use lookup::{
    AddressMode, BusRoute, Candidate, DeferredLookup, EvaluationScratch, ExactEvaluator,
    HitSource, LogicalTableConfig, MatchContext, MatchEngine, MatchEvaluator, MatchPayload,
    MauLookupResult, StashEvaluator, TernaryEvaluator, LOGICAL_TABLES, PAYLOAD_BITS,
};

/// Next-table resolution and table activation.
pub mod predication;
pub use predication::{
    next_table_id, predicate, table_index, table_stage, GressPredication, PredicationResult,
    TABLE_END,
};

/// Address buses into the ALUs.
pub mod distrib;
pub use distrib::{distribute, AluAddresses, BusDelivery, Distribution, EopAddresses, BUS_KINDS};

/// Stats, meter and idle ALUs.
pub mod alu;
pub use alu::{
    adjusted_bytes, count_stats, entries_to_evict, execute_stateful, idle_age, idle_hit,
    idle_sweep, read_stats, select_member, write_stats, AluConfig, AluTiming, IdleAluConfig,
    IdleNotification, MeterAluConfig, MeterAluMode, MeterColor, MeterUse, MeterWord,
    StatefulInstr, StatefulOp, StatefulOutput, StatsAluConfig, StatsCounter, StatsFormat,
    ALUS_PER_KIND, BUSES_PER_KIND, COMPRESSED_EVICT_THRESHOLD, IDLE_ENTRIES, SELECTOR_MEMBERS,
};

/// Background sweeps.
pub mod sweep;
pub use sweep::{StatsEviction, SweepConfig, SweepConfigs, SweepOutput, SweepState};

/// Control-plane memory access.
pub mod maintenance;
pub use maintenance::{
    MaintenanceOp, MaintenanceReply, MemAddress, MoveLocation, PbusValue, TableMove,
};

/// Diagnostic snapshot.
pub mod snapshot;
pub use snapshot::{Snapshot, SnapshotCapture, SnapshotState, SnapshotTrigger, TableCapture};

mod steps;

/// Step table and per-invocation state.
pub mod sequencer;
pub use sequencer::{
    execute, EndOfPacket, ExecuteStep, MauExecuteState, PacketOutputs, StepFn, StepKind,
    StepTable, TimeWindow, MAU_STEPS,
};

/// One stage.
pub mod mau;
pub use mau::{Mau, PacketResult, HOST_QUEUE_CAPACITY};

/// Register bus and configuration listeners.
pub mod csr;
pub use csr::{
    register_address, ConfigField, ConfigListener, RegisterBus, BLOCK_ACTION_VPN, BLOCK_ALU,
    BLOCK_EXACT_XBAR, BLOCK_HASH, BLOCK_HASH_MATRIX, BLOCK_NEXT_TABLE, BLOCK_PHV_THREAD,
    BLOCK_PREDICATION, BLOCK_SNAPSHOT, BLOCK_SWIZZLE, BLOCK_TCAM_MODE, BLOCK_TERNARY_XBAR,
    SNAPSHOT_STATE_INDEX,
};

/// Pipe of stages and its shared handle.
pub mod pipeline;
pub use pipeline::{Pipeline, PipelineHandle, PipelinePacket};

/// Register-write channel.
pub mod dma;
pub use dma::{channel, DmaError, DmaOp, DmaSender, DmaService, DmaStats};

#[cfg(test)]
use env_logger as _;
#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use serde_json as _;
