//! Address distribution: drives the addresses of tables that ran onto the
//! stats, meter and idle buses and hands each bus to its consuming ALU.

use log::{error, warn};

use crate::{
    Address, AluConfig, AluKind, AluTiming, ConfigEvent, MauConfig, MauDiag, MauError,
    MauLookupResult, MeterUse, SimulationConfig, ALUS_PER_KIND, BUSES_PER_KIND, LOGICAL_TABLES,
};

/// Address families carried on buses.
pub const BUS_KINDS: [AluKind; 3] = [AluKind::Stats, AluKind::Meter, AluKind::Idle];

/// An address accepted by an ALU and the table that drove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BusDelivery {
    /// Lowest driving table.
    pub table: u8,
    /// Address as seen by the ALU.
    pub address: Address,
}

#[derive(Debug, Clone, Copy)]
struct Drive {
    table: u8,
    alu: u8,
    raw: u32,
}

/// Per-family bus values and ALU inputs of one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Distribution {
    /// Raw bus values, `[family][bus]`, in [`BUS_KINDS`] order.
    pub buses: [[Option<u32>; BUSES_PER_KIND]; 3],
    /// Stats ALU inputs.
    pub stats: [Option<BusDelivery>; ALUS_PER_KIND],
    /// Meter ALU inputs.
    pub meter: [Option<BusDelivery>; ALUS_PER_KIND],
    /// Idle ALU inputs.
    pub idle: [Option<BusDelivery>; ALUS_PER_KIND],
    /// Action data addresses per table.
    pub action: [Option<Address>; LOGICAL_TABLES],
}

impl Distribution {
    /// Inputs of one family.
    #[must_use]
    pub const fn inputs(&self, kind: AluKind) -> &[Option<BusDelivery>; ALUS_PER_KIND] {
        match kind {
            AluKind::Stats | AluKind::Action => &self.stats,
            AluKind::Meter => &self.meter,
            AluKind::Idle => &self.idle,
        }
    }

    fn inputs_mut(&mut self, kind: AluKind) -> &mut [Option<BusDelivery>; ALUS_PER_KIND] {
        match kind {
            AluKind::Stats | AluKind::Action => &mut self.stats,
            AluKind::Meter => &mut self.meter,
            AluKind::Idle => &mut self.idle,
        }
    }
}

/// Stats and meter addresses for one end-of-packet event, per ALU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AluAddresses {
    /// Raw stats addresses.
    pub stats: [Option<u32>; ALUS_PER_KIND],
    /// Raw meter addresses.
    pub meter: [Option<u32>; ALUS_PER_KIND],
}

impl AluAddresses {
    /// No address recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stats.iter().chain(&self.meter).all(Option::is_none)
    }
}

/// Addresses a packet carries to its end-of-packet events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct EopAddresses {
    /// Committed at EOP.
    pub eop: AluAddresses,
    /// Committed at TEOP.
    pub teop: AluAddresses,
}

impl EopAddresses {
    /// Records the stats and meter-mode meter inputs of ALUs timed to `timing`.
    pub fn record(&mut self, alus: &AluConfig, distribution: &Distribution, timing: AluTiming) {
        let slot = match timing {
            AluTiming::Eop => &mut self.eop,
            AluTiming::Teop => &mut self.teop,
        };
        for (alu, config) in alus.stats.iter().enumerate() {
            if config.timing == timing {
                slot.stats[alu] = distribution.stats[alu].map(|input| input.address.raw());
            }
        }
        for (alu, config) in alus.meter.iter().enumerate() {
            if config.timing == timing && config.mode.serves() == MeterUse::Meter {
                slot.meter[alu] = distribution.meter[alu].map(|input| input.address.raw());
            }
        }
    }
}

/// Drives buses from the lookups of tables that ran and resolves consumers.
///
/// # Errors
///
/// Returns [`MauError::BusConflict`] when two tables drive one bus and the
/// relaxed check is off.
pub fn distribute(
    config: &MauConfig,
    sim: &SimulationConfig,
    lookups: &[MauLookupResult],
    diag: &mut MauDiag,
) -> Result<Distribution, MauError> {
    let mut distribution = Distribution::default();
    for (family, kind) in BUS_KINDS.into_iter().enumerate() {
        let buses = drive_buses(config, sim, lookups, kind, diag)?;
        for (bus, drive) in buses.iter().enumerate() {
            let Some(drive) = drive else {
                continue;
            };
            distribution.buses[family][bus] = Some(drive.raw);
            let Some(delivery) = consume(config, kind, bus, *drive, diag) else {
                continue;
            };
            if let Some(slot) = distribution.inputs_mut(kind).get_mut(usize::from(drive.alu)) {
                if slot.is_some() {
                    warn!("{kind:?} alu {} fed by two buses; keeping the first", drive.alu);
                    diag.record(drive.table, ConfigEvent::DisagreeingDrivers);
                } else {
                    *slot = Some(delivery);
                }
            }
        }
    }

    for lookup in lookups.iter().filter(|lookup| lookup.ran) {
        let Some(address) = lookup.action.filter(|address| address.pfe) else {
            continue;
        };
        let Some(table) = config.table(lookup.table) else {
            continue;
        };
        if !table.action_vpn_range.contains(address.vpn) {
            error!(
                "table {}: action vpn {} outside [{}, {}]",
                lookup.table, address.vpn, table.action_vpn_range.base, table.action_vpn_range.limit
            );
            diag.record(lookup.table, ConfigEvent::VpnRange);
            continue;
        }
        if let Some(slot) = distribution.action.get_mut(usize::from(lookup.table)) {
            *slot = Some(address);
        }
    }
    Ok(distribution)
}

fn drive_buses(
    config: &MauConfig,
    sim: &SimulationConfig,
    lookups: &[MauLookupResult],
    kind: AluKind,
    diag: &mut MauDiag,
) -> Result<[Option<Drive>; BUSES_PER_KIND], MauError> {
    let mut buses = [None; BUSES_PER_KIND];
    for lookup in lookups.iter().filter(|lookup| lookup.ran) {
        let Some(table) = config.table(lookup.table) else {
            continue;
        };
        let Some(mut address) = lookup.address(kind) else {
            continue;
        };
        if kind == AluKind::Stats && table.stats_unconditional {
            address = address.enabled();
        }
        if !address.pfe {
            continue;
        }
        let route = table
            .route(kind)
            .filter(|route| usize::from(route.bus) < BUSES_PER_KIND);
        let Some(route) = route else {
            warn!("table {}: {kind:?} address has no bus", lookup.table);
            diag.record(lookup.table, ConfigEvent::UnconsumedRoute);
            continue;
        };
        let bus = &mut buses[usize::from(route.bus)];
        match bus {
            None => {
                *bus = Some(Drive {
                    table: lookup.table,
                    alu: route.alu,
                    raw: address.raw(),
                });
            }
            Some(previous) => {
                let conflict = MauError::BusConflict {
                    kind,
                    bus: route.bus,
                    first_table: previous.table,
                    second_table: lookup.table,
                };
                if !sim.relax_bus_conflict_check {
                    return Err(conflict);
                }
                warn!("{conflict}; or-ing addresses");
                diag.record(lookup.table, ConfigEvent::RelaxedBusConflict);
                previous.raw |= address.raw();
                if previous.alu != route.alu {
                    warn!(
                        "{kind:?} bus {}: tables {} and {} disagree on alu, using {}",
                        route.bus, previous.table, lookup.table, previous.alu
                    );
                    diag.record(lookup.table, ConfigEvent::DisagreeingDrivers);
                }
            }
        }
    }
    Ok(buses)
}

fn consume(
    config: &MauConfig,
    kind: AluKind,
    bus: usize,
    drive: Drive,
    diag: &mut MauDiag,
) -> Option<BusDelivery> {
    let alus = &config.alus;
    let mode_ok = kind != AluKind::Meter
        || match (
            alus.meter.get(usize::from(drive.alu)),
            config.table(drive.table),
        ) {
            (Some(alu), Some(table)) => alu.mode.serves() == table.meter_use,
            _ => false,
        };
    if !alus.enabled(kind, drive.alu) || !mode_ok {
        warn!(
            "{kind:?} bus {bus} from table {}: alu {} disabled or in another mode",
            drive.table, drive.alu
        );
        diag.record(drive.table, ConfigEvent::UnconsumedRoute);
        return None;
    }
    let address = Address::from_raw(kind, drive.raw);
    let range = alus.vpn_range(kind, drive.alu)?;
    if !range.contains(address.vpn) {
        error!(
            "table {}: {kind:?} vpn {} outside alu {} range [{}, {}]",
            drive.table, address.vpn, drive.alu, range.base, range.limit
        );
        diag.record(drive.table, ConfigEvent::VpnRange);
        return None;
    }
    Some(BusDelivery {
        table: drive.table,
        address,
    })
}

#[cfg(test)]
mod tests {
    use super::{distribute, EopAddresses};
    use crate::{
        Address, AddressMode, AluKind, AluTiming, BusRoute, ConfigEvent, Gress,
        LogicalTableConfig, MauConfig, MauDiag, MauError, MauLookupResult, MeterAluMode,
        SimulationConfig, VpnRange,
    };

    fn ran(table: u8, stats: Option<Address>) -> MauLookupResult {
        MauLookupResult {
            ran: true,
            inactive: false,
            stats,
            ..MauLookupResult::empty(table)
        }
    }

    fn config() -> MauConfig {
        let mut config = MauConfig::new(0);
        for table in [0usize, 1] {
            let mut descriptor = LogicalTableConfig::for_gress(Gress::Ingress);
            descriptor.stats_mode = AddressMode::Indirect;
            descriptor.stats_route = Some(BusRoute {
                bus: u8::try_from(table).unwrap(),
                alu: 1,
            });
            config.tables[table] = descriptor;
        }
        config.alus.stats[1].enabled = true;
        config.alus.stats[1].vpn_range = VpnRange::new(2, 5);
        config
    }

    fn lookups(entries: Vec<MauLookupResult>) -> Vec<MauLookupResult> {
        let mut all: Vec<MauLookupResult> = (0..16).map(MauLookupResult::empty).collect();
        for entry in entries {
            let table = usize::from(entry.table);
            all[table] = entry;
        }
        all
    }

    #[test]
    fn delivers_in_range_address() {
        let address = Address::new(AluKind::Stats, 3, 15, 0);
        let mut diag = MauDiag::new();
        let out = distribute(
            &config(),
            &SimulationConfig::default(),
            &lookups(vec![ran(0, Some(address))]),
            &mut diag,
        )
        .unwrap();
        assert_eq!(out.stats[1].map(|input| input.address), Some(address));
        assert_eq!(out.buses[0][0], Some(address.raw()));
        assert_eq!(diag.total_config_errors(), 0);
    }

    #[test]
    fn inactive_and_disabled_addresses_stay_off_the_bus() {
        let address = Address::new(AluKind::Stats, 3, 15, 0);
        let mut inactive = ran(0, Some(address));
        inactive.ran = false;
        let mut disabled = ran(1, Some(address));
        disabled.stats = Some(Address {
            pfe: false,
            ..address
        });
        let out = distribute(
            &config(),
            &SimulationConfig::default(),
            &lookups(vec![inactive, disabled]),
            &mut MauDiag::new(),
        )
        .unwrap();
        assert_eq!(out.buses[0], [None; 6]);
    }

    #[test]
    fn unconditional_stats_force_enable() {
        let mut config = config();
        config.tables[1].stats_unconditional = true;
        let address = Address {
            pfe: false,
            ..Address::new(AluKind::Stats, 4, 1, 0)
        };
        let out = distribute(
            &config,
            &SimulationConfig::default(),
            &lookups(vec![ran(1, Some(address))]),
            &mut MauDiag::new(),
        )
        .unwrap();
        assert!(out.stats[1].is_some_and(|input| input.address.pfe));
    }

    #[test]
    fn out_of_range_vpn_is_counted_once_and_dropped() {
        let address = Address::new(AluKind::Stats, 9, 0, 0);
        let mut diag = MauDiag::new();
        let out = distribute(
            &config(),
            &SimulationConfig::default(),
            &lookups(vec![ran(0, Some(address))]),
            &mut diag,
        )
        .unwrap();
        assert_eq!(out.stats[1], None);
        assert_eq!(diag.table(0).count(ConfigEvent::VpnRange), 1);
        assert_eq!(diag.total_config_errors(), 1);
    }

    #[test]
    fn shared_bus_conflict_is_fatal_unless_relaxed() {
        let mut config = config();
        config.tables[1].stats_route = Some(BusRoute { bus: 0, alu: 2 });
        let entries = lookups(vec![
            ran(0, Some(Address::new(AluKind::Stats, 2, 1, 0))),
            ran(1, Some(Address::new(AluKind::Stats, 2, 2, 0))),
        ]);
        let strict = distribute(&config, &SimulationConfig::default(), &entries, &mut MauDiag::new());
        assert_eq!(
            strict,
            Err(MauError::BusConflict {
                kind: AluKind::Stats,
                bus: 0,
                first_table: 0,
                second_table: 1,
            })
        );

        let relaxed = SimulationConfig {
            relax_bus_conflict_check: true,
            ..SimulationConfig::default()
        };
        let mut diag = MauDiag::new();
        let out = distribute(&config, &relaxed, &entries, &mut diag).unwrap();
        let input = out.stats[1].unwrap();
        assert_eq!(input.table, 0);
        assert_eq!(input.address.index, 3);
        assert_eq!(diag.table(1).relaxed_bus_conflicts, 1);
        assert_eq!(diag.table(1).disagreeing_drivers, 1);
    }

    #[test]
    fn meter_mode_mismatch_is_unconsumed() {
        let mut config = config();
        config.tables[0].meter_mode = AddressMode::Indirect;
        config.tables[0].meter_route = Some(BusRoute { bus: 0, alu: 0 });
        config.alus.meter[0].enabled = true;
        config.alus.meter[0].mode = MeterAluMode::Selector {
            hash_group: 0,
            hash_lsb: 0,
            hash_bits: 8,
        };
        let mut entry = ran(0, None);
        entry.meter = Some(Address::new(AluKind::Meter, 0, 0, 0));
        let mut diag = MauDiag::new();
        let out = distribute(&config, &SimulationConfig::default(), &lookups(vec![entry]), &mut diag)
            .unwrap();
        assert_eq!(out.meter[0], None);
        assert_eq!(diag.table(0).unconsumed_routes, 1);
    }

    #[test]
    fn action_vpn_checked_against_table_range() {
        let mut config = config();
        config.tables[0].action_vpn_range = VpnRange::new(7, 7);
        let mut entry = ran(0, None);
        entry.action = Some(Address::new(AluKind::Action, 6, 0, 0));
        let mut diag = MauDiag::new();
        let out = distribute(&config, &SimulationConfig::default(), &lookups(vec![entry]), &mut diag)
            .unwrap();
        assert_eq!(out.action[0], None);
        assert_eq!(diag.table(0).vpn_range_errors, 1);
    }

    #[test]
    fn eop_addresses_split_by_timing() {
        let mut config = config();
        config.alus.stats[1].timing = AluTiming::Teop;
        let address = Address::new(AluKind::Stats, 3, 15, 0);
        let out = distribute(
            &config,
            &SimulationConfig::default(),
            &lookups(vec![ran(0, Some(address))]),
            &mut MauDiag::new(),
        )
        .unwrap();
        let mut eop = EopAddresses::default();
        eop.record(&config.alus, &out, AluTiming::Eop);
        assert!(eop.eop.is_empty());
        eop.record(&config.alus, &out, AluTiming::Teop);
        assert_eq!(eop.teop.stats[1], Some(address.raw()));
    }
}
