//! Background sweeps: one RAM word per ALU per sweep interval.
//!
//! Stats sweeps evict compressed entries close to wrapping, meter sweeps
//! refill buckets and idle sweeps age entries. A sweep yields to an ALU that
//! served a packet in the same cycle and is suspended while the ALU is
//! barrier-locked.

use log::trace;

use crate::{
    entries_to_evict, idle_sweep, read_stats, write_stats, AluKind, IdleNotification, MauConfig,
    MauDiag, MauError, MeterAluMode, MeterWord, SramArray, SramUse, StatsCounter, ALUS_PER_KIND,
    SRAM_WORDS,
};

/// Sweep schedule of one ALU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SweepConfig {
    /// Sweeps run.
    pub enabled: bool,
    /// Cycles between processed words; 0 disables.
    pub interval: u32,
    /// First VPN walked.
    pub vpn_lo: u8,
    /// Last VPN walked.
    pub vpn_hi: u8,
    /// VPN skipped by the walk.
    pub hole: Option<u8>,
}

/// Sweep schedules of every ALU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct SweepConfigs {
    /// Stats ALUs.
    pub stats: [SweepConfig; ALUS_PER_KIND],
    /// Meter ALUs.
    pub meter: [SweepConfig; ALUS_PER_KIND],
    /// Idle ALUs.
    pub idle: [SweepConfig; ALUS_PER_KIND],
}

impl SweepConfigs {
    /// Schedule of one ALU.
    #[must_use]
    pub fn get(&self, kind: AluKind, alu: u8) -> Option<&SweepConfig> {
        let alu = usize::from(alu);
        match kind {
            AluKind::Stats => self.stats.get(alu),
            AluKind::Meter => self.meter.get(alu),
            AluKind::Idle => self.idle.get(alu),
            AluKind::Action => None,
        }
    }
}

/// A compressed stats entry moved out of RAM before it wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StatsEviction {
    /// Stats ALU.
    pub alu: u8,
    /// Virtual page.
    pub vpn: u8,
    /// Word within the page.
    pub index: u16,
    /// Entry within the word.
    pub subword: u8,
    /// Counter value at eviction.
    pub counter: StatsCounter,
}

/// Work produced by one sweep cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SweepOutput {
    /// Evicted stats entries.
    pub evictions: Vec<StatsEviction>,
    /// Idle entries that reached their maximum age.
    pub notifications: Vec<IdleNotification>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct SweepCursor {
    vpn: u8,
    index: u16,
}

const SWEPT_KINDS: [AluKind; 3] = [AluKind::Stats, AluKind::Meter, AluKind::Idle];

const fn family(kind: AluKind) -> Option<usize> {
    match kind {
        AluKind::Stats => Some(0),
        AluKind::Meter => Some(1),
        AluKind::Idle => Some(2),
        AluKind::Action => None,
    }
}

/// Cursor, lock and busy state of every swept ALU.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SweepState {
    cursors: [[SweepCursor; ALUS_PER_KIND]; 3],
    locked: [[bool; ALUS_PER_KIND]; 3],
    busy: [[bool; ALUS_PER_KIND]; 3],
    cycle: u64,
}

impl SweepState {
    /// Idle state at cycle 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sweep cycles elapsed.
    #[must_use]
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Notes that an ALU served a packet this cycle.
    pub fn mark_busy(&mut self, kind: AluKind, alu: u8) {
        if let Some(flag) = family(kind)
            .and_then(|family| self.busy.get_mut(family))
            .and_then(|row| row.get_mut(usize::from(alu)))
        {
            *flag = true;
        }
    }

    /// ALU served a packet this cycle.
    #[must_use]
    pub fn is_busy(&self, kind: AluKind, alu: u8) -> bool {
        family(kind)
            .and_then(|family| self.busy.get(family))
            .and_then(|row| row.get(usize::from(alu)))
            .copied()
            .unwrap_or(false)
    }

    /// Sets the barrier lock of an ALU.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] for an ALU that is never swept.
    pub fn set_locked(&mut self, kind: AluKind, alu: u8, lock: bool) -> Result<(), MauError> {
        let flag = family(kind)
            .and_then(|family| self.locked.get_mut(family))
            .and_then(|row| row.get_mut(usize::from(alu)))
            .ok_or(MauError::OutOfRange {
                what: "barrier alu",
                index: usize::from(alu),
            })?;
        *flag = lock;
        Ok(())
    }

    /// ALU is barrier-locked.
    #[must_use]
    pub fn is_locked(&self, kind: AluKind, alu: u8) -> bool {
        family(kind)
            .and_then(|family| self.locked.get(family))
            .and_then(|row| row.get(usize::from(alu)))
            .copied()
            .unwrap_or(false)
    }

    /// Runs one sweep cycle over every ALU, then clears the busy flags.
    ///
    /// # Errors
    ///
    /// Returns [`MauError::OutOfRange`] if a usage entry names a RAM outside
    /// the array.
    pub fn tick(
        &mut self,
        config: &MauConfig,
        srams: &mut SramArray,
        diag: &mut MauDiag,
    ) -> Result<SweepOutput, MauError> {
        let mut output = SweepOutput::default();
        for kind in SWEPT_KINDS {
            for alu in 0..ALUS_PER_KIND {
                let alu = u8::try_from(alu).unwrap_or(u8::MAX);
                let Some(sweep) = config.sweeps.get(kind, alu).copied() else {
                    continue;
                };
                if !sweep.enabled
                    || sweep.interval == 0
                    || self.cycle % u64::from(sweep.interval) != 0
                    || !config.alus.enabled(kind, alu)
                {
                    continue;
                }
                if self.is_locked(kind, alu) {
                    trace!("{kind:?} alu {alu}: sweep suspended by barrier lock");
                    continue;
                }
                if self.is_busy(kind, alu) {
                    trace!("{kind:?} alu {alu}: sweep deferred");
                    diag.stage.deferred_sweeps = diag.stage.deferred_sweeps.saturating_add(1);
                    continue;
                }
                let Some((row, col, vpn, index)) = self.next_word(config, kind, alu, sweep) else {
                    continue;
                };
                sweep_word(config, srams, kind, alu, (row, col, vpn, index), &mut output)?;
                diag.stage.sweeps = diag.stage.sweeps.saturating_add(1);
            }
        }
        self.busy = [[false; ALUS_PER_KIND]; 3];
        self.cycle = self.cycle.wrapping_add(1);
        Ok(output)
    }

    /// Location of the word to process, advancing the cursor past it.
    fn next_word(
        &mut self,
        config: &MauConfig,
        kind: AluKind,
        alu: u8,
        sweep: SweepConfig,
    ) -> Option<(usize, usize, u8, u16)> {
        let vpns: Vec<u8> = (sweep.vpn_lo..=sweep.vpn_hi)
            .filter(|vpn| Some(*vpn) != sweep.hole)
            .filter(|vpn| {
                SramUse::for_alu(kind, alu, *vpn)
                    .and_then(|usage| config.find_sram(usage))
                    .is_some()
            })
            .collect();
        let first = *vpns.first()?;
        let cursor = self
            .cursors
            .get_mut(family(kind)?)?
            .get_mut(usize::from(alu))?;
        if !vpns.contains(&cursor.vpn) {
            cursor.vpn = vpns
                .iter()
                .copied()
                .find(|vpn| *vpn > cursor.vpn)
                .unwrap_or(first);
            cursor.index = 0;
        }
        let current = *cursor;
        let (row, col) = config.find_sram(SramUse::for_alu(kind, alu, current.vpn)?)?;

        cursor.index += 1;
        if usize::from(cursor.index) >= SRAM_WORDS {
            cursor.index = 0;
            cursor.vpn = vpns
                .iter()
                .copied()
                .find(|vpn| *vpn > current.vpn)
                .unwrap_or(first);
        }
        Some((row, col, current.vpn, current.index))
    }
}

fn sweep_word(
    config: &MauConfig,
    srams: &mut SramArray,
    kind: AluKind,
    alu: u8,
    (row, col, vpn, index): (usize, usize, u8, u16),
    output: &mut SweepOutput,
) -> Result<(), MauError> {
    let word = srams.read(row, col, usize::from(index))?;
    let next = match kind {
        AluKind::Stats => {
            let Some(stats) = config.alus.stats.get(usize::from(alu)) else {
                return Ok(());
            };
            let mut next = word;
            for subword in entries_to_evict(word, stats.format) {
                output.evictions.push(StatsEviction {
                    alu,
                    vpn,
                    index,
                    subword,
                    counter: read_stats(word, stats.format, subword),
                });
                next = write_stats(next, stats.format, subword, StatsCounter::default());
            }
            next
        }
        AluKind::Meter => match config.alus.meter.get(usize::from(alu)).map(|m| m.mode) {
            Some(MeterAluMode::Meter) => MeterWord::from_word(word).refill().to_word(),
            _ => word,
        },
        AluKind::Idle => {
            let max = config.alus.idle.get(usize::from(alu)).map_or(0, |idle| idle.max);
            let (next, reached) = idle_sweep(word, max);
            output
                .notifications
                .extend(reached.into_iter().map(|subword| IdleNotification {
                    alu,
                    vpn,
                    index,
                    subword,
                }));
            next
        }
        AluKind::Action => word,
    };
    if next != word {
        srams.write(row, col, usize::from(index), next)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{SweepConfig, SweepState};
    use crate::{
        count_stats, idle_age, write_stats, AluKind, MauConfig, MauDiag, MeterWord, SramArray,
        SramUse, StatsCounter, StatsFormat, COMPRESSED_EVICT_THRESHOLD,
    };

    fn idle_config() -> MauConfig {
        let mut config = MauConfig::new(0);
        config.alus.idle[1].enabled = true;
        config.alus.idle[1].max = 2;
        config.sweeps.idle[1] = SweepConfig {
            enabled: true,
            interval: 1,
            vpn_lo: 3,
            vpn_hi: 6,
            hole: Some(4),
        };
        for (col, vpn) in [(0, 3), (1, 4), (2, 6)] {
            config
                .set_sram(2, col, SramUse::Idle { alu: 1, vpn })
                .expect("sram");
        }
        config
    }

    #[test]
    fn walk_skips_hole_and_missing_pages() {
        let config = idle_config();
        let mut state = SweepState::new();
        let sweep = config.sweeps.idle[1];
        let first = state.next_word(&config, AluKind::Idle, 1, sweep);
        assert_eq!(first, Some((2, 0, 3, 0)));
        state.cursors[2][1].index = 1023;
        let last = state.next_word(&config, AluKind::Idle, 1, sweep);
        assert_eq!(last, Some((2, 0, 3, 1023)));
        let wrapped = state.next_word(&config, AluKind::Idle, 1, sweep);
        assert_eq!(wrapped, Some((2, 2, 6, 0)));
    }

    #[test]
    fn idle_sweep_notifies_at_max() {
        let config = idle_config();
        let mut srams = SramArray::new();
        let mut diag = MauDiag::new();
        let mut state = SweepState::new();
        state.cursors[2][1].vpn = 3;

        let first = state.tick(&config, &mut srams, &mut diag).expect("tick");
        assert!(first.notifications.is_empty());
        state.cursors[2][1].index = 0;
        let second = state.tick(&config, &mut srams, &mut diag).expect("tick");
        assert_eq!(second.notifications.len(), 16);
        assert_eq!(idle_age(srams.read(2, 0, 0).expect("read"), 0), 2);
        assert_eq!(diag.stage.sweeps, 2);
    }

    #[test]
    fn busy_alu_defers_and_locked_alu_skips() {
        let config = idle_config();
        let mut srams = SramArray::new();
        let mut diag = MauDiag::new();
        let mut state = SweepState::new();

        state.mark_busy(AluKind::Idle, 1);
        state.tick(&config, &mut srams, &mut diag).expect("tick");
        assert_eq!(diag.stage.deferred_sweeps, 1);
        assert_eq!(diag.stage.sweeps, 0);
        assert!(!state.is_busy(AluKind::Idle, 1));

        state.set_locked(AluKind::Idle, 1, true).expect("lock");
        state.tick(&config, &mut srams, &mut diag).expect("tick");
        assert_eq!(diag.stage.sweeps, 0);
        assert_eq!(srams.read(2, 0, 0).expect("read"), 0);

        state.set_locked(AluKind::Idle, 1, false).expect("unlock");
        state.tick(&config, &mut srams, &mut diag).expect("tick");
        assert_eq!(diag.stage.sweeps, 1);
        assert!(state.set_locked(AluKind::Action, 0, true).is_err());
    }

    #[test]
    fn interval_spaces_out_sweeps() {
        let mut config = idle_config();
        config.sweeps.idle[1].interval = 3;
        let mut srams = SramArray::new();
        let mut diag = MauDiag::new();
        let mut state = SweepState::new();
        for _ in 0..7 {
            state.tick(&config, &mut srams, &mut diag).expect("tick");
        }
        assert_eq!(state.cycle(), 7);
        assert_eq!(diag.stage.sweeps, 3);
    }

    #[test]
    fn stats_sweep_evicts_near_wrap() {
        let mut config = MauConfig::new(0);
        config.alus.stats[0].enabled = true;
        config.alus.stats[0].format = StatsFormat::Compressed;
        config.sweeps.stats[0] = SweepConfig {
            enabled: true,
            interval: 1,
            vpn_lo: 0,
            vpn_hi: 0,
            hole: None,
        };
        config
            .set_sram(0, 5, SramUse::Stats { alu: 0, vpn: 0 })
            .expect("sram");
        let mut srams = SramArray::new();
        let mut word = write_stats(
            0,
            StatsFormat::Compressed,
            1,
            StatsCounter {
                packets: COMPRESSED_EVICT_THRESHOLD,
                bytes: 99,
            },
        );
        word = count_stats(word, StatsFormat::Compressed, 1, 1);
        srams.write(0, 5, 0, word).expect("write");

        let mut state = SweepState::new();
        let output = state
            .tick(&config, &mut srams, &mut MauDiag::new())
            .expect("tick");
        assert_eq!(output.evictions.len(), 1);
        assert_eq!(output.evictions[0].subword, 1);
        assert_eq!(output.evictions[0].counter.bytes, 100);
        assert_eq!(srams.read(0, 5, 0).expect("read"), 0);
    }

    #[test]
    fn meter_sweep_refills_to_burst() {
        let mut config = MauConfig::new(0);
        config.alus.meter[2].enabled = true;
        config.sweeps.meter[2] = SweepConfig {
            enabled: true,
            interval: 1,
            vpn_lo: 9,
            vpn_hi: 9,
            hole: None,
        };
        config
            .set_sram(7, 11, SramUse::Meter { alu: 2, vpn: 9 })
            .expect("sram");
        let mut srams = SramArray::new();
        let meter = MeterWord {
            committed: -5,
            peak: 95,
            cir: 10,
            pir: 10,
            cbs: 100,
            pbs: 100,
        };
        srams.write(7, 11, 0, meter.to_word()).expect("write");
        SweepState::new()
            .tick(&config, &mut srams, &mut MauDiag::new())
            .expect("tick");
        let refilled = MeterWord::from_word(srams.read(7, 11, 0).expect("read"));
        assert_eq!(refilled.committed, 5);
        assert_eq!(refilled.peak, 100);
    }
}
