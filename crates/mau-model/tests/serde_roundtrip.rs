//! Configuration and packet results survive a JSON round trip.

#![allow(clippy::pedantic, clippy::nursery)]

use env_logger as _;
use log as _;
use mau_model as _;
use proptest as _;
#[cfg(not(feature = "serde"))]
use rstest as _;
#[cfg(not(feature = "serde"))]
use serde_json as _;
use thiserror as _;

#[cfg(feature = "serde")]
mod roundtrip {
    use mau_model::{
        AddressMode, BusRoute, ChipVariant, Gress, LogicalTableConfig, LogicalTcamConfig,
        MaintenanceOp, MatchPayload, Mau, MauConfig, MemAddress, MoveLocation, PacketResult, Phv,
        PbusValue, SimulationConfig, SnapshotCapture, SnapshotTrigger, SramUse, TcamChain,
        TcamConfig, TcamWord, XbarByteConfig,
    };
    use rstest::rstest;
    use serde as _;

    fn config() -> MauConfig {
        let mut config = MauConfig::new(3);
        config.xbar.ternary[0] = XbarByteConfig::phv(1, 0, Gress::Ingress);
        config.tcams[0] = TcamConfig {
            enabled: true,
            gress: Gress::Ingress,
            input_slice: 0,
        };
        config.logical_tcams[0] = LogicalTcamConfig {
            logical_table: Some(2),
            chains: vec![TcamChain {
                col: 0,
                head_row: 0,
                width: 1,
                priority_base: 0,
                direct_vpn: 5,
            }],
        };
        let mut table = LogicalTableConfig::for_gress(Gress::Ingress);
        table.next_table_lut[1] = 0x42;
        table.stats_mode = AddressMode::Direct;
        table.stats_route = Some(BusRoute { bus: 0, alu: 0 });
        config.tables[2] = table;
        config.alus.stats[0].enabled = true;
        config.hash[1].seed = 0xA5A5;
        config.hash[1].matrix[7] = 0x000F_0000_0000_0001;
        config
            .set_sram(4, 0, SramUse::Stats { alu: 0, vpn: 5 })
            .expect("stats ram");
        config
    }

    fn hit(mau: &mut Mau) -> (Phv, PacketResult) {
        mau.maintenance(MaintenanceOp::TcamWrite {
            row: 0,
            col: 0,
            index: 9,
            word: TcamWord::new(0x42, 0xFF),
        })
        .expect("tcam write");
        let payload = MatchPayload {
            next_index: 1,
            ..MatchPayload::default()
        };
        mau.pbus_write(
            MemAddress::Tind { row: 0, col: 0, index: 9 },
            PbusValue::Tind(payload.to_bits()),
        )
        .expect("tind write");
        let mut phv = Phv::for_thread(Gress::Ingress, 0x32);
        phv.set(1, 0x42);
        let result = mau.process_packet(&mut phv).expect("packet");
        (phv, result)
    }

    #[test]
    fn stage_configuration_round_trips() {
        let config = config();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: MauConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, config);
        assert!(Mau::new(back, SimulationConfig::default()).is_ok());
    }

    #[rstest]
    #[case(ChipVariant::Tofino)]
    #[case(ChipVariant::Tofino2)]
    #[case(ChipVariant::Tofino3)]
    fn simulation_switches_round_trip(#[case] chip: ChipVariant) {
        let sim = SimulationConfig {
            relax_double_hit_check: true,
            ..SimulationConfig::for_chip(chip)
        };
        let json = serde_json::to_value(sim).expect("serialize");
        let back: SimulationConfig = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, sim);
    }

    #[test]
    fn packet_results_replay_identically() {
        let mut mau = Mau::new(config(), SimulationConfig::default()).expect("stage");
        let (phv, result) = hit(&mut mau);
        assert_eq!(phv.pred(Gress::Ingress).next_table, 0x42);

        let json = serde_json::to_string(&(phv.clone(), result.clone())).expect("serialize");
        let (phv_back, result_back): (Phv, PacketResult) =
            serde_json::from_str(&json).expect("deserialize");
        assert_eq!(phv_back, phv);
        assert_eq!(result_back, result);

        // The replayed result carries the same end-of-packet work.
        mau.handle_eop(&result_back.end_of_packet(64, false))
            .expect("eop");
        assert_eq!(mau.diag().stage.eops, 1);
    }

    #[test]
    fn snapshot_captures_round_trip() {
        let mut mau = Mau::new(config(), SimulationConfig::default()).expect("stage");
        mau.snapshot_mut().arm(SnapshotTrigger::TableHit(2));
        hit(&mut mau);
        let capture = mau.snapshot_mut().take().expect("captured");
        let json = serde_json::to_string_pretty(&capture).expect("serialize");
        let back: SnapshotCapture = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, capture);
        assert!(back.table(2).is_some_and(|table| table.hit));
    }

    #[test]
    fn control_plane_requests_round_trip() {
        let ops = [
            MaintenanceOp::TcamWrite {
                row: 1,
                col: 0,
                index: 77,
                word: TcamWord::new(0x1234, 0xFF00),
            },
            MaintenanceOp::PushTableMove {
                table: 4,
                src: MoveLocation { vpn: 2, index: 9 },
                dst: MoveLocation { vpn: 3, index: 0 },
            },
            MaintenanceOp::PopTableMove { table: 4 },
        ];
        for op in ops {
            let json = serde_json::to_string(&op).expect("serialize");
            let back: MaintenanceOp = serde_json::from_str(&json).expect("deserialize");
            assert_eq!(back, op);
        }
    }
}
