#![no_main]

use libfuzzer_sys::fuzz_target;
use mau_model::{
    hash, Gress, HashGroupConfig, Mau, MauConfig, Phv, RegisterBus, SimulationConfig,
    EXACT_XBAR_BYTES, HASH_OUTPUT_BITS,
};

fuzz_target!(|data: &[u8]| {
    if data.len() < 16 {
        return;
    }

    // Register writes from the front of the input, 8 bytes each.
    let (writes, rest) = data.split_at(data.len() / 2);
    let mut mau = match Mau::new(MauConfig::new(0), SimulationConfig::default()) {
        Ok(mau) => mau,
        Err(_) => return,
    };
    for chunk in writes.chunks_exact(8) {
        let addr = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let value = u32::from_be_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
        let _ = mau.write(addr, value);
        let _ = mau.read(addr);
    }

    let mut phv = Phv::for_thread(Gress::Ingress, rest[0]);
    for (word, chunk) in rest[1..].chunks(4).enumerate() {
        let mut bytes = [0u8; 4];
        bytes[..chunk.len()].copy_from_slice(chunk);
        phv.set(word, u32::from_le_bytes(bytes));
    }
    if let Ok(result) = mau.process_packet(&mut phv) {
        let _ = mau.handle_eop(&result.end_of_packet(u32::from(rest[0]), false));
    }
    let _ = mau.idle_cycle();

    // With every byte valid the hash is affine in its input.
    let mut group = HashGroupConfig::default();
    group.seed = u64::from_le_bytes([rest[0], rest[1], rest[2], rest[3], 0, 0, 0, 0]);
    for (bit, column) in group.matrix.iter_mut().enumerate() {
        let salt = rest[bit % rest.len()];
        *column = (u64::from(salt) << (bit % 44)) & ((1 << HASH_OUTPUT_BITS) - 1);
    }
    let a: Vec<u8> = (0..EXACT_XBAR_BYTES).map(|i| writes[i % writes.len()]).collect();
    let b: Vec<u8> = (0..EXACT_XBAR_BYTES).map(|i| rest[i % rest.len()]).collect();
    let both: Vec<u8> = a.iter().zip(&b).map(|(x, y)| x ^ y).collect();
    let valid = vec![true; EXACT_XBAR_BYTES];
    assert_eq!(
        hash(&both, &valid, &group),
        hash(&a, &valid, &group) ^ hash(&b, &valid, &group) ^ group.seed
    );
});
