//! Fuzz target: `pack_chunk` / `WirelessTransfer::next_chunk`
//!
//! Builds a dataset and a payload bound from the input, then streams it
//! chunk by chunk. Every chunk must fit the bound and every point must go
//! out exactly once.
//!
//! cargo fuzz run fuzz_chunk_packer

#![no_main]

use impedance_node::sweep::{Point, SweepDataset};
use impedance_node::transfer::wireless::{MIN_PAYLOAD, TRANSFER_COMPLETE, WirelessTransfer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&bound, rest)) = data.split_first() else {
        return;
    };
    let max_payload = MIN_PAYLOAD + bound as usize;

    let mut ds = SweepDataset::default();
    for (i, c) in rest.chunks_exact(4).enumerate() {
        ds.push(Point {
            freq: i as u32,
            real: i16::from_le_bytes([c[0], c[1]]),
            imag: i16::from_le_bytes([c[2], c[3]]),
        });
    }
    if ds.is_empty() {
        return;
    }

    let mut t = WirelessTransfer::new();
    t.stage(1, 0, ds.clone());
    let mut sent = 0usize;
    loop {
        let chunk = t.next_chunk(max_payload).expect("staged");
        assert!(chunk.bytes.len() <= max_payload);
        assert!(chunk.bytes[0] > 0);
        for p in chunk.bytes[1..].chunks_exact(8) {
            let freq = u32::from_le_bytes([p[0], p[1], p[2], p[3]]);
            assert_eq!(freq as usize, sent);
            sent += 1;
        }
        if chunk.status == TRANSFER_COMPLETE {
            break;
        }
    }
    assert_eq!(sent, ds.len());
});
