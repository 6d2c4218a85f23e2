//! Match engine: per-table evaluation of ternary, exact and stash sources and
//! the lookup result handed to predication.
//!
//! Each source is a [`MatchEvaluator`]. The engine collects their candidates,
//! enforces that at most one source hits, and derives the next table and the
//! addresses of the winning entry. Errors are not raised here: they are kept
//! with the result and surface only if predication activates the table.

use log::warn;

use crate::{
    exact_key, Address, AluKind, ConfigEvent, ExactEntry, Gress, HashResult, MatchInput,
    MauConfig, MauError, MeterUse, SimulationConfig, SramArray, SramUse, StashArray, TcamArray,
    VpnRange, TABLE_END,
};

/// Logical tables per stage.
pub const LOGICAL_TABLES: usize = 16;
/// Bits of an encoded [`MatchPayload`].
pub const PAYLOAD_BITS: u32 = 54;

/// Fields returned by a matching entry (or configured for a miss).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MatchPayload {
    /// Index into the table's next-table LUT.
    pub next_index: u8,
    /// Action instruction.
    pub instr: u8,
    /// Action data pointer (subword, index, vpn).
    pub action_ptr: u32,
    /// Indirect resource pointer (subword, index, vpn).
    pub indirect_ptr: u32,
    /// Op for the indirect resource.
    pub indirect_op: u8,
    /// Action pointer enable.
    pub action_pfe: bool,
    /// Indirect pointer enable.
    pub indirect_pfe: bool,
}

impl MatchPayload {
    /// Packs into the 54-bit overhead format.
    #[must_use]
    pub fn to_bits(&self) -> u64 {
        u64::from(self.next_index & 0x7)
            | (u64::from(self.instr & 0x3F) << 3)
            | (u64::from(self.action_ptr & 0xF_FFFF) << 9)
            | (u64::from(self.indirect_ptr & 0xF_FFFF) << 29)
            | (u64::from(self.indirect_op & 0x7) << 49)
            | (u64::from(self.action_pfe) << 52)
            | (u64::from(self.indirect_pfe) << 53)
    }

    /// Unpacks the 54-bit overhead format.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            next_index: (bits & 0x7) as u8,
            instr: ((bits >> 3) & 0x3F) as u8,
            action_ptr: ((bits >> 9) & 0xF_FFFF) as u32,
            indirect_ptr: ((bits >> 29) & 0xF_FFFF) as u32,
            indirect_op: ((bits >> 49) & 0x7) as u8,
            action_pfe: (bits >> 52) & 1 == 1,
            indirect_pfe: (bits >> 53) & 1 == 1,
        }
    }
}

/// How a table addresses one resource family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AddressMode {
    /// Table does not use the resource.
    #[default]
    None,
    /// Address derives from the hit location.
    Direct,
    /// Address is the payload's indirect pointer.
    Indirect,
}

/// Bus and consuming ALU for one address family of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BusRoute {
    /// Bus index: `0..4` home rows, `4..6` overflow.
    pub bus: u8,
    /// Consuming ALU.
    pub alu: u8,
}

/// Descriptor of one logical table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[allow(clippy::struct_excessive_bools)]
pub struct LogicalTableConfig {
    /// Thread the table belongs to; `None` leaves it unused.
    pub gress: Option<Gress>,
    /// Exact-bus bytes forming the key, least significant first.
    pub exact_key_bytes: Vec<u8>,
    /// Key bits compared by exact and stash entries.
    pub exact_match_mask: u64,
    /// Next-table ids indexed by the payload's `next_index`.
    pub next_table_lut: [u8; 8],
    /// Next table on a miss.
    pub miss_next_table: u8,
    /// Forces the next table regardless of the lookup.
    pub next_table_override: Option<u8>,
    /// Payload used on a miss.
    pub miss_payload: MatchPayload,
    /// Table runs whenever its thread is present.
    pub always_run: bool,
    /// Stats addressing.
    pub stats_mode: AddressMode,
    /// Meter, selector or stateful addressing.
    pub meter_mode: AddressMode,
    /// Idle-time addressing.
    pub idle_mode: AddressMode,
    /// Role the meter ALU must be in to consume this table's meter address.
    pub meter_use: MeterUse,
    /// Fire the stats address whenever the table ran, hit or miss.
    pub stats_unconditional: bool,
    /// Stats bus route.
    pub stats_route: Option<BusRoute>,
    /// Meter bus route.
    pub meter_route: Option<BusRoute>,
    /// Idle bus route.
    pub idle_route: Option<BusRoute>,
    /// VPNs accepted for action data.
    pub action_vpn_range: VpnRange,
    /// Global-exec bits contributed on a hit.
    pub global_exec_on_hit: u16,
    /// Global-exec bits contributed on a miss.
    pub global_exec_on_miss: u16,
    /// Long-branch tags set when the table runs.
    pub long_branch_set: u8,
    /// Long-branch tags that wake the table.
    pub long_branch_tags: u8,
}

impl Default for LogicalTableConfig {
    fn default() -> Self {
        Self {
            gress: None,
            exact_key_bytes: Vec::new(),
            exact_match_mask: u64::MAX,
            next_table_lut: [TABLE_END; 8],
            miss_next_table: TABLE_END,
            next_table_override: None,
            miss_payload: MatchPayload::default(),
            always_run: false,
            stats_mode: AddressMode::None,
            meter_mode: AddressMode::None,
            idle_mode: AddressMode::None,
            meter_use: MeterUse::Meter,
            stats_unconditional: false,
            stats_route: None,
            meter_route: None,
            idle_route: None,
            action_vpn_range: VpnRange::full(),
            global_exec_on_hit: 0,
            global_exec_on_miss: 0,
            long_branch_set: 0,
            long_branch_tags: 0,
        }
    }
}

impl LogicalTableConfig {
    /// Table in use for `gress`.
    #[must_use]
    pub fn for_gress(gress: Gress) -> Self {
        Self {
            gress: Some(gress),
            ..Self::default()
        }
    }

    /// Bus route for an address family.
    #[must_use]
    pub const fn route(&self, kind: AluKind) -> Option<BusRoute> {
        match kind {
            AluKind::Stats => self.stats_route,
            AluKind::Meter => self.meter_route,
            AluKind::Idle => self.idle_route,
            AluKind::Action => None,
        }
    }

    /// Bus route of a family the table addresses; `None` when the table
    /// never drives that family.
    #[must_use]
    pub const fn driven_route(&self, kind: AluKind) -> Option<BusRoute> {
        match self.mode(kind) {
            AddressMode::None => None,
            AddressMode::Direct | AddressMode::Indirect => self.route(kind),
        }
    }

    const fn mode(&self, kind: AluKind) -> AddressMode {
        match kind {
            AluKind::Stats => self.stats_mode,
            AluKind::Meter => self.meter_mode,
            AluKind::Idle => self.idle_mode,
            AluKind::Action => AddressMode::Indirect,
        }
    }
}

/// Which source produced a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum HitSource {
    /// A logical TCAM chain.
    Ternary {
        /// Logical TCAM.
        tcam: u8,
        /// Chain within it.
        chain: u8,
    },
    /// A stash entry.
    Stash {
        /// Entry index.
        entry: u8,
    },
    /// An exact way, numbered within its table.
    Exact {
        /// Way number.
        way: u8,
    },
}

/// A hit proposed by one evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Candidate {
    /// Source.
    pub source: HitSource,
    /// Payload.
    pub payload: MatchPayload,
    /// Physical row (SRAM or TCAM head).
    pub row: u8,
    /// Physical column.
    pub col: u8,
    /// VPN for direct addressing.
    pub vpn: u8,
    /// Word or entry index for direct addressing.
    pub index: u16,
}

/// Read-only inputs shared by every evaluator for one packet.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    /// Stage configuration.
    pub config: &'a MauConfig,
    /// Match buses.
    pub input: &'a MatchInput,
    /// Hash outputs.
    pub hash: &'a HashResult,
    /// Per-thread packet versions.
    pub versions: [u8; 3],
    /// SRAM contents.
    pub srams: &'a SramArray,
    /// TCAM contents.
    pub tcams: &'a TcamArray,
    /// Stash contents.
    pub stash: &'a StashArray,
    /// Process switches.
    pub sim: &'a SimulationConfig,
}

/// Candidates and recoverable events collected for one table.
#[derive(Debug, Clone, Default)]
pub struct EvaluationScratch {
    /// Proposed hits.
    pub candidates: Vec<Candidate>,
    /// Recoverable conditions.
    pub events: Vec<ConfigEvent>,
}

/// One match source.
pub trait MatchEvaluator: Send + Sync {
    /// Short name used in traces.
    fn name(&self) -> &'static str;

    /// Proposes hits of `table` for the packet in `ctx`.
    ///
    /// # Errors
    ///
    /// Returns a fatal error found while searching.
    fn evaluate(
        &self,
        ctx: &MatchContext<'_>,
        table: u8,
        gress: Gress,
        scratch: &mut EvaluationScratch,
    ) -> Result<(), MauError>;
}

/// Logical TCAM search.
#[derive(Debug, Clone, Copy, Default)]
pub struct TernaryEvaluator;

impl MatchEvaluator for TernaryEvaluator {
    fn name(&self) -> &'static str {
        "ternary"
    }

    fn evaluate(
        &self,
        ctx: &MatchContext<'_>,
        table: u8,
        gress: Gress,
        scratch: &mut EvaluationScratch,
    ) -> Result<(), MauError> {
        for (index, logical) in ctx.config.logical_tcams.iter().enumerate() {
            if logical.logical_table != Some(table) {
                continue;
            }
            let search = ctx.tcams.search(
                &ctx.config.tcams,
                logical,
                ctx.input,
                gress,
                ctx.sim.relax_tcam_tie_check,
            )?;
            for _ in 0..search.chain_errors {
                scratch.events.push(ConfigEvent::TcamChain);
            }
            if let Some(hit) = search.hit {
                scratch.candidates.push(Candidate {
                    source: HitSource::Ternary {
                        tcam: u8::try_from(index).unwrap_or(u8::MAX),
                        chain: hit.chain,
                    },
                    payload: MatchPayload::from_bits(hit.payload),
                    row: hit.row,
                    col: hit.col,
                    vpn: hit.direct_vpn,
                    index: hit.index,
                });
            }
        }
        Ok(())
    }
}

/// Hash-addressed exact ways.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactEvaluator;

impl MatchEvaluator for ExactEvaluator {
    fn name(&self) -> &'static str {
        "exact"
    }

    fn evaluate(
        &self,
        ctx: &MatchContext<'_>,
        table: u8,
        gress: Gress,
        scratch: &mut EvaluationScratch,
    ) -> Result<(), MauError> {
        let Some(config) = ctx.config.table(table) else {
            return Ok(());
        };
        let key = exact_key(ctx.input, &config.exact_key_bytes);
        let version = ctx.versions[gress.index()];
        let ways = ctx
            .config
            .exact_ways
            .iter()
            .filter(|way| way.table == table);
        for (way_number, way) in ways.enumerate() {
            let (index, select) = way.locate(ctx.hash);
            let Some(ram) = way.ram(select) else {
                continue;
            };
            let (row, col) = (usize::from(ram.row), usize::from(ram.col));
            if ctx.config.sram(row, col) != SramUse::ExactMatch {
                warn!("table {table}: way ram ({row},{col}) is not an exact-match ram");
                scratch.events.push(ConfigEvent::MissingMemory);
                continue;
            }
            let entry = ExactEntry::from_word(ctx.srams.read(row, col, usize::from(index))?);
            if entry.matches(key, config.exact_match_mask, version) {
                scratch.candidates.push(Candidate {
                    source: HitSource::Exact {
                        way: u8::try_from(way_number).unwrap_or(u8::MAX),
                    },
                    payload: entry.payload,
                    row: ram.row,
                    col: ram.col,
                    vpn: ram.vpn,
                    index,
                });
            }
        }
        Ok(())
    }
}

/// Associative stash search.
#[derive(Debug, Clone, Copy, Default)]
pub struct StashEvaluator;

impl MatchEvaluator for StashEvaluator {
    fn name(&self) -> &'static str {
        "stash"
    }

    fn evaluate(
        &self,
        ctx: &MatchContext<'_>,
        table: u8,
        gress: Gress,
        scratch: &mut EvaluationScratch,
    ) -> Result<(), MauError> {
        let Some(config) = ctx.config.table(table) else {
            return Ok(());
        };
        let key = exact_key(ctx.input, &config.exact_key_bytes);
        let version = ctx.versions[gress.index()];
        for (number, stash) in ctx.stash.table(table).iter().enumerate() {
            if !stash.valid {
                continue;
            }
            let entry = ExactEntry::from_word(stash.word);
            if entry.matches(key, config.exact_match_mask, version) {
                scratch.candidates.push(Candidate {
                    source: HitSource::Stash {
                        entry: u8::try_from(number).unwrap_or(u8::MAX),
                    },
                    payload: entry.payload,
                    row: 0,
                    col: 0,
                    vpn: stash.vpn,
                    index: stash.index,
                });
            }
        }
        Ok(())
    }
}

/// Lookup outcome of one logical table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MauLookupResult {
    /// Logical table.
    pub table: u8,
    /// A source hit.
    pub hit: bool,
    /// Winning source.
    pub source: Option<HitSource>,
    /// Physical row of the hit.
    pub row: u8,
    /// Physical column of the hit.
    pub col: u8,
    /// `vpn << 10 | index` of the hit.
    pub match_address: u32,
    /// Resolved next table.
    pub next_table: u8,
    /// Payload in effect (hit payload or miss payload).
    pub payload: MatchPayload,
    /// Action data address.
    pub action: Option<Address>,
    /// Stats address.
    pub stats: Option<Address>,
    /// Meter, selector or stateful address.
    pub meter: Option<Address>,
    /// Idle-time address.
    pub idle: Option<Address>,
    /// Predication activated the table.
    pub ran: bool,
    /// Result exists only because every table was evaluated.
    pub inactive: bool,
}

impl MauLookupResult {
    /// Miss result of a table that has nothing configured.
    #[must_use]
    pub const fn empty(table: u8) -> Self {
        Self {
            table,
            hit: false,
            source: None,
            row: 0,
            col: 0,
            match_address: 0,
            next_table: TABLE_END,
            payload: MatchPayload {
                next_index: 0,
                instr: 0,
                action_ptr: 0,
                indirect_ptr: 0,
                indirect_op: 0,
                action_pfe: false,
                indirect_pfe: false,
            },
            action: None,
            stats: None,
            meter: None,
            idle: None,
            ran: false,
            inactive: true,
        }
    }

    /// Address of one family.
    #[must_use]
    pub const fn address(&self, kind: AluKind) -> Option<Address> {
        match kind {
            AluKind::Action => self.action,
            AluKind::Stats => self.stats,
            AluKind::Meter => self.meter,
            AluKind::Idle => self.idle,
        }
    }
}

/// A lookup result whose error is held until predication decides whether the
/// table ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredLookup {
    /// Result (a miss when `error` is set).
    pub result: MauLookupResult,
    /// Fatal error found while evaluating.
    pub error: Option<MauError>,
    /// Recoverable conditions found while evaluating.
    pub events: Vec<ConfigEvent>,
}

/// The evaluator set of a stage.
pub struct MatchEngine {
    evaluators: Vec<Box<dyn MatchEvaluator>>,
}

impl std::fmt::Debug for MatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.evaluators.iter().map(|eval| eval.name()).collect();
        f.debug_struct("MatchEngine").field("evaluators", &names).finish()
    }
}

impl Default for MatchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchEngine {
    /// Ternary, stash and exact evaluators.
    #[must_use]
    pub fn new() -> Self {
        Self::with_evaluators(vec![
            Box::new(TernaryEvaluator),
            Box::new(StashEvaluator),
            Box::new(ExactEvaluator),
        ])
    }

    /// Engine over a caller-chosen evaluator set.
    #[must_use]
    pub fn with_evaluators(evaluators: Vec<Box<dyn MatchEvaluator>>) -> Self {
        Self { evaluators }
    }

    /// Evaluates every logical table.
    #[must_use]
    pub fn lookup_all(&self, ctx: &MatchContext<'_>) -> Vec<DeferredLookup> {
        (0..LOGICAL_TABLES)
            .map(|table| self.lookup(ctx, u8::try_from(table).unwrap_or(u8::MAX)))
            .collect()
    }

    /// Evaluates one logical table.
    #[must_use]
    pub fn lookup(&self, ctx: &MatchContext<'_>, table: u8) -> DeferredLookup {
        let mut deferred = DeferredLookup {
            result: MauLookupResult::empty(table),
            error: None,
            events: Vec::new(),
        };
        let Some(config) = ctx.config.table(table) else {
            return deferred;
        };
        let Some(gress) = config.gress else {
            return deferred;
        };

        let mut scratch = EvaluationScratch::default();
        for evaluator in &self.evaluators {
            if let Err(error) = evaluator.evaluate(ctx, table, gress, &mut scratch) {
                deferred.error = Some(error);
                break;
            }
        }
        scratch.candidates.sort_by_key(|candidate| candidate.source);

        let winner = match scratch.candidates.as_slice() {
            [] => None,
            [only] => Some(*only),
            [first, second, ..] => {
                let error = MauError::DoubleHit {
                    table,
                    first: first.source,
                    second: second.source,
                };
                if ctx.sim.relax_double_hit_check {
                    warn!("{error}; keeping {:?}", first.source);
                    scratch.events.push(ConfigEvent::RelaxedDoubleHit);
                    Some(*first)
                } else {
                    deferred.error.get_or_insert(error);
                    None
                }
            }
        };
        if deferred.error.is_some() {
            deferred.events = scratch.events;
            return deferred;
        }

        deferred.result = resolve(table, config, winner);
        deferred.events = scratch.events;
        deferred
    }
}

fn resolve(table: u8, config: &LogicalTableConfig, winner: Option<Candidate>) -> MauLookupResult {
    let mut result = MauLookupResult::empty(table);
    result.inactive = false;
    let payload = winner.map_or(config.miss_payload, |hit| hit.payload);
    result.payload = payload;
    result.next_table = winner.map_or(config.miss_next_table, |hit| {
        config.next_table_lut[usize::from(hit.payload.next_index & 0x7)]
    });
    if let Some(forced) = config.next_table_override {
        result.next_table = forced;
    }
    if let Some(hit) = winner {
        result.hit = true;
        result.source = Some(hit.source);
        result.row = hit.row;
        result.col = hit.col;
        result.match_address = (u32::from(hit.vpn) << 10) | u32::from(hit.index & 0x3FF);
    }

    result.action = Some(Address::from_pointer(
        AluKind::Action,
        payload.action_ptr,
        0,
        payload.action_pfe,
    ));
    for kind in [AluKind::Stats, AluKind::Meter, AluKind::Idle] {
        let address = match (config.mode(kind), winner) {
            (AddressMode::Direct, Some(hit)) => Some(Address::new(kind, hit.vpn, hit.index, 0)),
            (AddressMode::Indirect, _) => Some(Address::from_pointer(
                kind,
                payload.indirect_ptr,
                payload.indirect_op,
                payload.indirect_pfe,
            )),
            _ => None,
        };
        match kind {
            AluKind::Stats => result.stats = address,
            AluKind::Meter => result.meter = address,
            AluKind::Idle => result.idle = address,
            AluKind::Action => {}
        }
    }
    result
}
