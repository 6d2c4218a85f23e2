//! Predication: decides which logical tables run for each present thread and
//! computes the vectors carried to the next stage.

use log::warn;

use crate::{ChipVariant, ConfigEvent, Gress, MauConfig, MauDiag, MauLookupResult, Phv,
    PredicationVector, LOGICAL_TABLES};

/// Next-table id meaning "no further table".
pub const TABLE_END: u8 = 0xFF;

/// Stage part of a next-table id.
#[must_use]
pub const fn table_stage(next_table: u8) -> u8 {
    next_table >> 4
}

/// Logical-table part of a next-table id.
#[must_use]
pub const fn table_index(next_table: u8) -> u8 {
    next_table & 0xF
}

/// Builds a next-table id.
#[must_use]
pub const fn next_table_id(stage: u8, table: u8) -> u8 {
    (stage << 4) | (table & 0xF)
}

/// Predication outcome of one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct GressPredication {
    /// Tables activated before any chaining.
    pub start: u16,
    /// Tables that ran.
    pub active: u16,
    /// Outgoing vector.
    pub out: PredicationVector,
}

/// Predication outcome of every thread; absent threads are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PredicationResult {
    /// Indexed by [`Gress::index`].
    pub threads: [Option<GressPredication>; 3],
}

impl PredicationResult {
    /// Union of active tables across threads.
    #[must_use]
    pub fn active_mask(&self) -> u16 {
        self.threads
            .iter()
            .flatten()
            .fold(0, |acc, thread| acc | thread.active)
    }

    /// Table ran.
    #[must_use]
    pub fn is_active(&self, table: u8) -> bool {
        table < 16 && (self.active_mask() >> table) & 1 == 1
    }

    /// Outcome of one thread.
    #[must_use]
    pub const fn thread(&self, gress: Gress) -> Option<&GressPredication> {
        self.threads[gress.index()].as_ref()
    }

    /// Writes outgoing vectors into the PHV for the next stage.
    pub fn apply(&self, phv: &mut Phv) {
        for gress in Gress::ALL {
            if let Some(thread) = self.thread(gress) {
                phv.set_pred(gress, thread.out);
            }
        }
    }
}

fn gress_tables(config: &MauConfig, gress: Gress) -> u16 {
    config
        .tables
        .iter()
        .take(LOGICAL_TABLES)
        .enumerate()
        .filter(|(_, table)| table.gress == Some(gress))
        .fold(0, |acc, (index, _)| acc | (1 << index))
}

fn start_set(config: &MauConfig, chip: ChipVariant, incoming: PredicationVector, mask: u16) -> u16 {
    let mut start = 0u16;
    if table_stage(incoming.next_table) == config.stage && incoming.next_table != TABLE_END {
        start |= 1 << table_index(incoming.next_table);
    }
    if chip.supports_global_exec() {
        start |= incoming.global_exec;
    }
    for (index, table) in config.tables.iter().take(LOGICAL_TABLES).enumerate() {
        let tagged =
            chip.supports_long_branch() && table.long_branch_tags & incoming.long_branch != 0;
        if table.always_run || tagged {
            start |= 1 << index;
        }
    }
    start & mask
}

/// Runs predication for every present thread.
///
/// Tables are visited in ascending logical order. Only the table reached by
/// the next-table chain steers the outgoing next table; branches backwards or
/// to an earlier stage are counted and end the chain.
#[must_use]
pub fn predicate(
    config: &MauConfig,
    chip: ChipVariant,
    phv: &Phv,
    lookups: &[MauLookupResult],
    diag: &mut MauDiag,
) -> PredicationResult {
    let mut result = PredicationResult::default();
    let stage = config.stage;
    for gress in Gress::ALL {
        if !phv.thread(gress).present {
            continue;
        }
        let incoming = phv.pred(gress);
        let mask = gress_tables(config, gress);
        let start = start_set(config, chip, incoming, mask);

        let mut active = start;
        let mut chain = (table_stage(incoming.next_table) == stage
            && incoming.next_table != TABLE_END)
            .then(|| table_index(incoming.next_table));
        let mut out_next = if incoming.next_table != TABLE_END
            && table_stage(incoming.next_table) > stage
        {
            incoming.next_table
        } else {
            TABLE_END
        };
        let mut global_exec = 0u16;
        let mut long_branch_set = 0u8;

        for table in 0..16u8 {
            if (active >> table) & 1 == 0 {
                continue;
            }
            let Some(lookup) = lookups.get(usize::from(table)) else {
                continue;
            };
            let Some(table_config) = config.table(table) else {
                continue;
            };
            global_exec |= if lookup.hit {
                table_config.global_exec_on_hit
            } else {
                table_config.global_exec_on_miss
            };
            long_branch_set |= table_config.long_branch_set;

            if chain != Some(table) {
                continue;
            }
            chain = None;
            let next = lookup.next_table;
            if next == TABLE_END {
                out_next = TABLE_END;
            } else if table_stage(next) == stage {
                let target = table_index(next);
                if target > table && (mask >> target) & 1 == 1 {
                    active |= 1 << target;
                    chain = Some(target);
                    out_next = TABLE_END;
                } else {
                    warn!("stage {stage} table {table}: branch to {next:#04x} ignored");
                    diag.record(table, ConfigEvent::Branch);
                    out_next = TABLE_END;
                }
            } else if table_stage(next) > stage {
                out_next = next;
            } else {
                warn!("stage {stage} table {table}: branch to earlier stage {next:#04x}");
                diag.record(table, ConfigEvent::Branch);
                out_next = TABLE_END;
            }
        }

        let out = PredicationVector {
            next_table: out_next,
            global_exec: if chip.supports_global_exec() {
                global_exec
            } else {
                0
            },
            long_branch: if chip.supports_long_branch() {
                (incoming.long_branch | long_branch_set) & !config.predication.long_branch_terminate
            } else {
                0
            },
        };
        result.threads[gress.index()] = Some(GressPredication { start, active, out });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::{next_table_id, predicate, TABLE_END};
    use crate::{
        ChipVariant, Gress, LogicalTableConfig, MauConfig, MauDiag, MauLookupResult, Phv,
        PredicationVector,
    };
    use proptest::prelude::*;

    fn lookups(next: &[(u8, u8)]) -> Vec<MauLookupResult> {
        let mut results: Vec<MauLookupResult> = (0..16).map(MauLookupResult::empty).collect();
        for (table, next_table) in next {
            results[usize::from(*table)].next_table = *next_table;
            results[usize::from(*table)].inactive = false;
        }
        results
    }

    fn ingress_stage(stage: u8, tables: &[u8]) -> MauConfig {
        let mut config = MauConfig::new(stage);
        for table in tables {
            config.tables[usize::from(*table)] = LogicalTableConfig::for_gress(Gress::Ingress);
        }
        config
    }

    #[test]
    fn chain_activates_later_tables_only() {
        let config = ingress_stage(2, &[1, 4, 6]);
        let phv = Phv::for_thread(Gress::Ingress, next_table_id(2, 1));
        let results = lookups(&[(1, next_table_id(2, 4)), (4, next_table_id(5, 0))]);
        let mut diag = MauDiag::new();
        let outcome = predicate(&config, ChipVariant::Tofino, &phv, &results, &mut diag);
        let ingress = outcome.thread(Gress::Ingress).unwrap();
        assert_eq!(ingress.active, (1 << 1) | (1 << 4));
        assert_eq!(ingress.out.next_table, next_table_id(5, 0));
        assert!(outcome.thread(Gress::Egress).is_none());
        assert_eq!(diag.total_config_errors(), 0);
    }

    #[test]
    fn backward_branch_is_counted_and_ends_chain() {
        let config = ingress_stage(2, &[1, 4]);
        let phv = Phv::for_thread(Gress::Ingress, next_table_id(2, 4));
        let results = lookups(&[(4, next_table_id(2, 1))]);
        let mut diag = MauDiag::new();
        let outcome = predicate(&config, ChipVariant::Tofino, &phv, &results, &mut diag);
        let ingress = outcome.thread(Gress::Ingress).unwrap();
        assert_eq!(ingress.active, 1 << 4);
        assert_eq!(ingress.out.next_table, TABLE_END);
        assert_eq!(diag.table(4).branch_errors, 1);

        let earlier = lookups(&[(4, next_table_id(1, 0))]);
        let outcome = predicate(&config, ChipVariant::Tofino, &phv, &earlier, &mut diag);
        assert_eq!(outcome.thread(Gress::Ingress).unwrap().out.next_table, TABLE_END);
        assert_eq!(diag.table(4).branch_errors, 2);
    }

    #[test]
    fn later_stage_next_table_passes_through() {
        let config = ingress_stage(2, &[0]);
        let phv = Phv::for_thread(Gress::Ingress, next_table_id(6, 3));
        let outcome = predicate(&config, ChipVariant::Tofino, &phv, &lookups(&[]), &mut MauDiag::new());
        let ingress = outcome.thread(Gress::Ingress).unwrap();
        assert_eq!(ingress.active, 0);
        assert_eq!(ingress.out.next_table, next_table_id(6, 3));
    }

    #[test]
    fn global_exec_and_long_branch_need_second_generation() {
        let mut config = ingress_stage(3, &[2, 5, 7]);
        config.tables[5].long_branch_tags = 0b0100;
        config.tables[2].global_exec_on_miss = 0b1000_0000;
        config.tables[7].long_branch_set = 0b0001;
        config.tables[7].always_run = true;
        config.predication.long_branch_terminate = 0b0100;
        let mut phv = Phv::for_thread(Gress::Ingress, TABLE_END);
        phv.set_pred(
            Gress::Ingress,
            PredicationVector {
                next_table: TABLE_END,
                global_exec: 1 << 2,
                long_branch: 0b0110,
            },
        );
        let results = lookups(&[]);

        let first = predicate(&config, ChipVariant::Tofino, &phv, &results, &mut MauDiag::new());
        assert_eq!(first.thread(Gress::Ingress).unwrap().active, 1 << 7);

        let second = predicate(&config, ChipVariant::Tofino2, &phv, &results, &mut MauDiag::new());
        let ingress = second.thread(Gress::Ingress).unwrap();
        assert_eq!(ingress.active, (1 << 2) | (1 << 5) | (1 << 7));
        assert_eq!(ingress.out.global_exec, 0b1000_0000);
        assert_eq!(ingress.out.long_branch, 0b0011);
    }

    #[test]
    fn tables_of_other_threads_never_run() {
        let mut config = ingress_stage(0, &[0]);
        config.tables[1] = LogicalTableConfig::for_gress(Gress::Egress);
        config.tables[1].always_run = true;
        let phv = Phv::for_thread(Gress::Ingress, next_table_id(0, 1));
        let outcome = predicate(&config, ChipVariant::Tofino, &phv, &lookups(&[]), &mut MauDiag::new());
        assert_eq!(outcome.active_mask(), 0);
    }

    #[test]
    fn apply_writes_vectors_back() {
        let config = ingress_stage(1, &[0]);
        let mut phv = Phv::for_thread(Gress::Ingress, next_table_id(1, 0));
        let results = lookups(&[(0, next_table_id(4, 2))]);
        let outcome = predicate(&config, ChipVariant::Tofino, &phv, &results, &mut MauDiag::new());
        outcome.apply(&mut phv);
        assert_eq!(phv.pred(Gress::Ingress).next_table, next_table_id(4, 2));
    }

    proptest! {
        #[test]
        fn active_tables_are_started_or_chained(
            stage in 0u8..8,
            start in 0u8..16,
            nexts in proptest::collection::vec(any::<u8>(), 16),
            always in any::<u16>(),
        ) {
            let mut config = ingress_stage(stage, &(0..16).collect::<Vec<u8>>());
            for (index, table) in config.tables.iter_mut().enumerate() {
                table.always_run = (always >> index) & 1 == 1;
            }
            let phv = Phv::for_thread(Gress::Ingress, next_table_id(stage, start));
            let results: Vec<MauLookupResult> = (0..16u8)
                .map(|table| MauLookupResult { next_table: nexts[usize::from(table)], ..MauLookupResult::empty(table) })
                .collect();
            let outcome = predicate(&config, ChipVariant::Tofino, &phv, &results, &mut MauDiag::new());
            let ingress = outcome.thread(Gress::Ingress).unwrap();
            let mut reachable = ingress.start;
            for table in 0..16u8 {
                if (ingress.active >> table) & 1 == 1 {
                    let next = results[usize::from(table)].next_table;
                    if next >> 4 == stage && next & 0xF > table {
                        reachable |= 1 << (next & 0xF);
                    }
                }
            }
            prop_assert_eq!(ingress.active & !reachable, 0);
            prop_assert!(ingress.active & ingress.start == ingress.start);
            let out = ingress.out.next_table;
            prop_assert!(out == TABLE_END || out >> 4 > stage);
        }
    }
}
