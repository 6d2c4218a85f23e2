//! Bodies of the stage steps registered in [`crate::MAU_STEPS`].

use log::{trace, warn};

use crate::{
    adjusted_bytes, count_stats, distribute as distribute_buses, execute_stateful, hash_all,
    idle_hit, predicate, select_member, Address, AluAddresses, AluKind, AluTiming, ConfigEvent,
    EndOfPacket, Gress, MatchContext, Mau, MauError, MauExecuteState, MauLookupResult,
    MeterAluMode, MeterWord, SramUse, ALUS_PER_KIND, BUS_KINDS, INDEX_BITS,
};
use crate::bits::mask64;

fn alu_id(alu: usize) -> u8 {
    u8::try_from(alu).unwrap_or(u8::MAX)
}

pub(crate) fn xbar(mau: &mut Mau, state: &mut MauExecuteState<'_>) -> Result<(), MauError> {
    let phv = state
        .phv
        .as_deref()
        .ok_or(MauError::MissingPhv { step: "xbar" })?;
    let input = mau.xbar.calculate(
        &mau.config.xbar,
        phv,
        mau.generation,
        &mau.sim,
        &mut mau.diag,
    )?;
    state.input = Some(input);
    Ok(())
}

pub(crate) fn hash(mau: &mut Mau, state: &mut MauExecuteState<'_>) -> Result<(), MauError> {
    if let Some(input) = &state.input {
        state.hash = hash_all(input, &mau.config.hash);
    }
    Ok(())
}

pub(crate) fn lookup(mau: &mut Mau, state: &mut MauExecuteState<'_>) -> Result<(), MauError> {
    let phv = state
        .phv
        .as_deref()
        .ok_or(MauError::MissingPhv { step: "match" })?;
    let versions = Gress::ALL.map(|gress| phv.thread(gress).version);
    let Some(input) = state.input.as_ref() else {
        return Ok(());
    };
    let ctx = MatchContext {
        config: &mau.config,
        input,
        hash: &state.hash,
        versions,
        srams: &mau.srams,
        tcams: &mau.tcams,
        stash: &mau.stash,
        sim: &mau.sim,
    };
    state.deferred = mau.engine.lookup_all(&ctx);
    Ok(())
}

/// Decides which tables ran, then surfaces the errors and events of those
/// tables (every table when all are evaluated) in ascending table order.
pub(crate) fn predication(mau: &mut Mau, state: &mut MauExecuteState<'_>) -> Result<(), MauError> {
    let raw: Vec<MauLookupResult> = state.deferred.iter().map(|lookup| lookup.result).collect();
    let phv = state
        .phv
        .as_deref_mut()
        .ok_or(MauError::MissingPhv { step: "predication" })?;
    let outcome = predicate(&mau.config, mau.sim.chip, phv, &raw, &mut mau.diag);

    let mut lookups = Vec::with_capacity(raw.len());
    for deferred in &mut state.deferred {
        let table = deferred.result.table;
        let ran = outcome.is_active(table);
        let visible = ran || mau.sim.evaluate_all;
        if visible {
            for event in deferred.events.drain(..) {
                mau.diag.record(table, event);
            }
            if let Some(error) = deferred.error.take() {
                return Err(error);
            }
        }
        let mut result = if visible {
            deferred.result
        } else {
            MauLookupResult::empty(table)
        };
        result.ran = ran;
        result.inactive = !ran;
        if ran {
            if let Some(diag) = mau.diag.tables.get_mut(usize::from(table)) {
                diag.lookups = diag.lookups.saturating_add(1);
                if result.hit {
                    diag.hits = diag.hits.saturating_add(1);
                }
            }
        }
        lookups.push(result);
    }
    outcome.apply(phv);
    state.predication = outcome;
    state.lookups = lookups;
    Ok(())
}

pub(crate) fn distribute(mau: &mut Mau, state: &mut MauExecuteState<'_>) -> Result<(), MauError> {
    state.distribution = distribute_buses(&mau.config, &mau.sim, &state.lookups, &mut mau.diag)?;
    state
        .eop_addresses
        .record(&mau.config.alus, &state.distribution, AluTiming::Eop);
    for kind in BUS_KINDS {
        for (alu, input) in state.distribution.inputs(kind).iter().enumerate() {
            if input.is_some() {
                mau.sweeps.mark_busy(kind, alu_id(alu));
            }
        }
    }
    Ok(())
}

pub(crate) fn distribute_teop(
    mau: &mut Mau,
    state: &mut MauExecuteState<'_>,
) -> Result<(), MauError> {
    if mau.sim.chip.supports_teop() {
        state
            .eop_addresses
            .record(&mau.config.alus, &state.distribution, AluTiming::Teop);
    }
    Ok(())
}

fn drop_eop_address(state: &mut MauExecuteState<'_>, kind: AluKind, alu: usize) {
    for slot in [&mut state.eop_addresses.eop, &mut state.eop_addresses.teop] {
        let target = match kind {
            AluKind::Meter => slot.meter.get_mut(alu),
            _ => slot.stats.get_mut(alu),
        };
        if let Some(target) = target {
            *target = None;
        }
    }
}

pub(crate) fn meter_alus(mau: &mut Mau, state: &mut MauExecuteState<'_>) -> Result<(), MauError> {
    if state.at_eop {
        return match state.eop {
            Some(eop) => debit_meters(mau, &eop.addresses.eop, eop),
            None => Ok(()),
        };
    }
    for alu in 0..ALUS_PER_KIND {
        let Some(delivery) = state.distribution.meter[alu] else {
            continue;
        };
        let Some(mode) = mau.config.alus.meter.get(alu).map(|config| config.mode) else {
            continue;
        };
        let address = delivery.address;
        let (row, col) = match mau.alu_ram(AluKind::Meter, alu_id(alu), address.vpn) {
            Ok(ram) => ram,
            Err(error) => {
                warn!("table {}: {error}", delivery.table);
                mau.diag.record(delivery.table, ConfigEvent::MissingMemory);
                drop_eop_address(state, AluKind::Meter, alu);
                continue;
            }
        };
        let index = usize::from(address.index);
        let word = mau.srams.read(row, col, index)?;
        match mode {
            MeterAluMode::Meter => {
                state.outputs.meter_colors[alu] = Some(MeterWord::from_word(word).color());
            }
            MeterAluMode::Selector {
                hash_group,
                hash_lsb,
                hash_bits,
            } => {
                let hash = state.hash.field(
                    usize::from(hash_group),
                    u32::from(hash_lsb),
                    u32::from(hash_bits),
                );
                let Some(member) = select_member(word, hash) else {
                    trace!("selector alu {alu}: empty group");
                    continue;
                };
                state.outputs.selector_members[alu] = Some(member);
                if let Some(action) = state
                    .distribution
                    .action
                    .get_mut(usize::from(delivery.table))
                    .and_then(Option::as_mut)
                {
                    let index = (u64::from(action.index) + u64::from(member)) & mask64(INDEX_BITS);
                    action.index = u16::try_from(index).unwrap_or(0);
                }
            }
            MeterAluMode::Stateful { instrs } => {
                let instr = instrs[usize::from(address.op & 0x3)];
                let (next, output) = execute_stateful(word, address.subword, instr);
                mau.srams.write(row, col, index, next)?;
                state.outputs.stateful_outputs[alu] = Some(output);
            }
        }
    }
    Ok(())
}

pub(crate) fn meter_teop(mau: &mut Mau, state: &mut MauExecuteState<'_>) -> Result<(), MauError> {
    match state.eop {
        Some(eop) => debit_meters(mau, &eop.addresses.teop, eop),
        None => Ok(()),
    }
}

/// Charges recorded meter addresses; errored packets are not charged.
fn debit_meters(mau: &mut Mau, addresses: &AluAddresses, eop: EndOfPacket) -> Result<(), MauError> {
    if eop.error {
        trace!("stage {}: errored packet, meters not debited", mau.config.stage);
        return Ok(());
    }
    for (alu, raw) in addresses.meter.iter().enumerate() {
        let Some(raw) = raw else {
            continue;
        };
        let address = Address::from_raw(AluKind::Meter, *raw);
        let (row, col) = match mau.alu_ram(AluKind::Meter, alu_id(alu), address.vpn) {
            Ok(ram) => ram,
            Err(error) => {
                warn!("eop: {error}");
                continue;
            }
        };
        let index = usize::from(address.index);
        let word = mau.srams.read(row, col, index)?;
        let next = MeterWord::from_word(word)
            .debit(u64::from(eop.byte_len))
            .to_word();
        mau.srams.write(row, col, index, next)?;
        mau.sweeps.mark_busy(AluKind::Meter, alu_id(alu));
    }
    Ok(())
}

pub(crate) fn action_data(mau: &mut Mau, state: &mut MauExecuteState<'_>) -> Result<(), MauError> {
    for (table, address) in state.distribution.action.iter().enumerate() {
        let Some(address) = address else {
            continue;
        };
        let table = alu_id(table);
        let usage = SramUse::ActionData {
            table,
            vpn: address.vpn,
        };
        let Some((row, col)) = mau.config.find_sram(usage) else {
            warn!("table {table}: no action data ram for vpn {}", address.vpn);
            mau.diag.record(table, ConfigEvent::MissingMemory);
            continue;
        };
        let word = mau.srams.read(row, col, usize::from(address.index))?;
        state.outputs.action_data[usize::from(table)] = Some(word);
    }
    Ok(())
}

pub(crate) fn stats_idle(mau: &mut Mau, state: &mut MauExecuteState<'_>) -> Result<(), MauError> {
    if state.at_eop {
        return match state.eop {
            Some(eop) => count_packet(mau, &eop.addresses.eop, eop),
            None => Ok(()),
        };
    }
    for alu in 0..ALUS_PER_KIND {
        if let Some(delivery) = state.distribution.stats[alu] {
            if let Err(error) = mau.alu_ram(AluKind::Stats, alu_id(alu), delivery.address.vpn) {
                warn!("table {}: {error}", delivery.table);
                mau.diag.record(delivery.table, ConfigEvent::MissingMemory);
                drop_eop_address(state, AluKind::Stats, alu);
            }
        }
        let Some(delivery) = state.distribution.idle[alu] else {
            continue;
        };
        let address = delivery.address;
        let (row, col) = match mau.alu_ram(AluKind::Idle, alu_id(alu), address.vpn) {
            Ok(ram) => ram,
            Err(error) => {
                warn!("table {}: {error}", delivery.table);
                mau.diag.record(delivery.table, ConfigEvent::MissingMemory);
                continue;
            }
        };
        let index = usize::from(address.index);
        let word = mau.srams.read(row, col, index)?;
        mau.srams
            .write(row, col, index, idle_hit(word, address.subword))?;
    }
    Ok(())
}

pub(crate) fn stats_teop(mau: &mut Mau, state: &mut MauExecuteState<'_>) -> Result<(), MauError> {
    match state.eop {
        Some(eop) => count_packet(mau, &eop.addresses.teop, eop),
        None => Ok(()),
    }
}

/// Counts recorded stats addresses; errored packets are still counted.
fn count_packet(mau: &mut Mau, addresses: &AluAddresses, eop: EndOfPacket) -> Result<(), MauError> {
    for (alu, raw) in addresses.stats.iter().enumerate() {
        let Some(raw) = raw else {
            continue;
        };
        let Some(config) = mau.config.alus.stats.get(alu).copied() else {
            continue;
        };
        let address = Address::from_raw(AluKind::Stats, *raw);
        let (row, col) = match mau.alu_ram(AluKind::Stats, alu_id(alu), address.vpn) {
            Ok(ram) => ram,
            Err(error) => {
                warn!("eop: {error}");
                continue;
            }
        };
        let index = usize::from(address.index);
        let word = mau.srams.read(row, col, index)?;
        let bytes = adjusted_bytes(eop.byte_len, config.byte_adjust);
        mau.srams.write(
            row,
            col,
            index,
            count_stats(word, config.format, address.subword, bytes),
        )?;
        mau.sweeps.mark_busy(AluKind::Stats, alu_id(alu));
    }
    Ok(())
}

pub(crate) fn sweep(mau: &mut Mau, state: &mut MauExecuteState<'_>) -> Result<(), MauError> {
    let output = mau
        .sweeps
        .tick(&mau.config, &mut mau.srams, &mut mau.diag)?;
    mau.queue_sweep_output(&output);
    state.sweep = output;
    Ok(())
}

pub(crate) fn maintenance(mau: &mut Mau, state: &mut MauExecuteState<'_>) -> Result<(), MauError> {
    if let Some(op) = state.pending.take() {
        state.reply = Some(mau.apply_maintenance(op)?);
    }
    Ok(())
}

pub(crate) fn snapshot(mau: &mut Mau, state: &mut MauExecuteState<'_>) -> Result<(), MauError> {
    mau.snapshot.observe(
        mau.config.stage,
        &state.lookups,
        &state.distribution,
        &state.predication,
    );
    Ok(())
}
