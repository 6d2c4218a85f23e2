//! Deterministic packet-replay fingerprint used for cross-host comparison.

use log as _;
use mau_model::{
    AddressMode, BusRoute, ChipVariant, Gress, HitSource, LogicalTableConfig, LogicalTcamConfig,
    MaintenanceOp, MatchPayload, Mau, MauConfig, MemAddress, Pipeline, PbusValue, Phv,
    SimulationConfig, SramUse, TcamChain, TcamConfig, TcamWord, XbarByteConfig,
};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use serde_json as _;
use thiserror as _;

const TABLE: u8 = 1;

fn stage_config(stage: u8) -> MauConfig {
    let mut config = MauConfig::new(stage);
    config.xbar.ternary[0] = XbarByteConfig::phv(4, 0, Gress::Ingress);
    config.tcams[0] = TcamConfig {
        enabled: true,
        gress: Gress::Ingress,
        input_slice: 0,
    };
    config.logical_tcams[0] = LogicalTcamConfig {
        logical_table: Some(TABLE),
        chains: vec![TcamChain {
            col: 0,
            head_row: 0,
            width: 1,
            priority_base: 0,
            direct_vpn: 2,
        }],
    };
    let mut table = LogicalTableConfig::for_gress(Gress::Ingress);
    table.next_table_lut[1] = ((stage + 1) << 4) | TABLE;
    table.miss_next_table = ((stage + 1) << 4) | TABLE;
    table.stats_mode = AddressMode::Direct;
    table.stats_route = Some(BusRoute { bus: 0, alu: 0 });
    config.tables[usize::from(TABLE)] = table;
    config.alus.stats[0].enabled = true;
    config
        .set_sram(0, 0, SramUse::Stats { alu: 0, vpn: 2 })
        .expect("stats ram");
    config
}

fn install(mau: &mut Mau, index: u16, key: u8, mask: u8) {
    mau.maintenance(MaintenanceOp::TcamWrite {
        row: 0,
        col: 0,
        index,
        word: TcamWord::new(u64::from(key), u64::from(mask)),
    })
    .expect("tcam write");
    let payload = MatchPayload {
        next_index: 1,
        ..MatchPayload::default()
    };
    mau.pbus_write(
        MemAddress::Tind { row: 0, col: 0, index },
        PbusValue::Tind(payload.to_bits()),
    )
    .expect("tind write");
}

fn hash_bytes(hash: &mut u64, bytes: &[u8]) {
    for byte in bytes {
        *hash ^= u64::from(*byte);
        *hash = hash.wrapping_mul(0x1000_0000_01B3);
    }
}

fn fingerprint() -> String {
    let configs = (0..4).map(stage_config).collect();
    let mut pipeline = Pipeline::new(0, SimulationConfig::for_chip(ChipVariant::Tofino2), configs)
        .expect("pipeline should build");
    for stage in 0..4 {
        let mau = pipeline.stage_mut(stage).expect("stage");
        install(mau, 3, 0x00, 0x01);
        install(mau, 40 + u16::try_from(stage).expect("small"), 0x80, 0xC0);
    }

    let mut hash = 0xcbf2_9ce4_8422_2325_u64;
    let mut seed = 0x2545_f491_u32;
    for _ in 0..256 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let mut phv = Phv::for_thread(Gress::Ingress, TABLE);
        phv.set(4, seed >> 8);
        let packet = pipeline.process(&mut phv).expect("packet should run");
        for result in &packet.stages {
            let lookup = result.lookup(TABLE).expect("table");
            let source = match lookup.source {
                Some(HitSource::Ternary { tcam, chain }) => [0x10, tcam, chain],
                Some(HitSource::Exact { way }) => [0x11, way, 0],
                Some(HitSource::Stash { entry }) => [0x12, entry, 0],
                None => [0x13, 0, 0],
            };
            hash_bytes(&mut hash, &source);
            hash_bytes(&mut hash, &lookup.match_address.to_le_bytes());
            hash_bytes(&mut hash, &[lookup.next_table]);
        }
        hash_bytes(&mut hash, &[phv.pred(Gress::Ingress).next_table]);
        let len = 64 + (seed & 0x3FF);
        pipeline
            .end_of_packet(&packet, len, false)
            .expect("eop should apply");
    }

    for stage in 0..4 {
        let mau = pipeline.stage_mut(stage).expect("stage");
        for index in 0..64 {
            if let Ok(PbusValue::Word(word)) =
                mau.pbus_read(MemAddress::Sram { row: 0, col: 0, word: index })
            {
                hash_bytes(&mut hash, &word.to_le_bytes());
            }
        }
        let diag = mau.diag();
        hash_bytes(&mut hash, &diag.stage.packets.to_le_bytes());
        hash_bytes(&mut hash, &diag.stage.eops.to_le_bytes());
        hash_bytes(&mut hash, &diag.tables[usize::from(TABLE)].hits.to_le_bytes());
    }

    format!("{hash:016x}")
}

fn main() {
    env_logger::init();
    println!("{}", fingerprint());
}
