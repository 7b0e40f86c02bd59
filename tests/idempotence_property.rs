//! Property-based coverage of the idempotence invariant: canonicalizing an
//! already-canonical message must reproduce it exactly, for arbitrary
//! byte-list payloads.

use capnp_canonicalize::canonicalize::canonicalize;
use capnp_canonicalize::segment::Segments;
use capnp_canonicalize::ZeroPointerPolicy;
use quickcheck::{QuickCheck, TestResult};

/// Packs a byte slice into 64-bit little-endian words, the same layout an
/// 8-bit `IntList` uses for its elements.
fn pack_bytes(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf[..chunk.len()].copy_from_slice(chunk);
            u64::from_le_bytes(buf)
        })
        .collect()
}

fn unpack_bytes(words: &[u64], count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count);
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.truncate(count);
    out
}

fn message_for(bytes: &[u8]) -> Segments {
    let element_kind = 2u64; // 8-bit elements
    let list_ptr: u64 = 1 | (element_kind << 32) | ((bytes.len() as u64) << 35);
    let mut segment = vec![list_ptr];
    segment.extend(pack_bytes(bytes));
    Segments::new(vec![segment])
}

fn prop_byte_list_round_trips_and_is_idempotent(bytes: Vec<u8>) -> TestResult {
    if bytes.len() >= (1 << 29) {
        return TestResult::discard();
    }

    let once = canonicalize(&message_for(&bytes), ZeroPointerPolicy::AlwaysMinusOne).unwrap();
    let recovered = unpack_bytes(&once[1..], bytes.len());
    if recovered != bytes {
        return TestResult::failed();
    }

    // `once` is itself a valid single-segment message: its word 0 is the
    // root list pointer. Re-canonicalizing it must reproduce it exactly.
    let twice = canonicalize(
        &Segments::new(vec![once.clone()]),
        ZeroPointerPolicy::AlwaysMinusOne,
    );
    TestResult::from_bool(twice.is_ok() && twice.unwrap() == once)
}

#[test]
fn byte_list_round_trips_and_is_idempotent() {
    QuickCheck::new()
        .tests(200)
        .quickcheck(prop_byte_list_round_trips_and_is_idempotent as fn(Vec<u8>) -> TestResult);
}
