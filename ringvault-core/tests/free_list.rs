//! Supplements `dir_manager`'s in-module unit tests: drives the free list
//! through many set/overwrite cycles and confirms every invariant from
//! invariant cluster #2 (no hanging entries, no double-use of a slot)
//! continues to hold under sustained churn, including concurrent writers
//! that hash into different segments.

use ringvault_core::digest::Md5Digest;
use ringvault_core::dir_manager::DirManager;
use std::sync::Arc;
use std::thread;

#[test]
fn churn_across_many_keys_never_leaves_hanging_entries() {
    let mgr = DirManager::init_empty(2_000);
    let digest = Md5Digest;

    for round in 0..5u32 {
        for i in 0..1_500u32 {
            let key = format!("k{round}-{i}");
            mgr.set(key.as_bytes(), (round * 1000 + i) as u64, 256, &digest);
        }
    }

    for s in 0..mgr.seg.segments as usize {
        assert!(mgr.hanging_used_entries(s).is_empty());
        assert!(mgr.hanging_free_entries(s).is_empty());
    }
}

#[test]
fn repeated_overwrite_of_the_same_key_does_not_leak_free_slots() {
    let mgr = DirManager::init_empty(40);
    let digest = Md5Digest;
    for i in 0..10_000u64 {
        mgr.set(b"stable-key", i, 1, &digest);
    }
    let (_, entry) = mgr.get(b"stable-key", &digest).unwrap();
    assert_eq!(entry.offset(), Some(9_999));
}

#[test]
fn concurrent_writers_in_different_segments_all_land() {
    // buckets = desired/4 must exceed MAX_BUCKETS_PER_SEGMENT (16_384) to
    // force at least two segments; 100_000 desired entries -> 25_000 buckets.
    let mgr = Arc::new(DirManager::init_empty(100_000));
    assert!(mgr.seg.segments >= 2, "test requires multiple segments to exercise per-segment locking");

    let mut handles = Vec::new();
    for t in 0..4u32 {
        let mgr = Arc::clone(&mgr);
        handles.push(thread::spawn(move || {
            let digest = Md5Digest;
            for i in 0..200u32 {
                let key = format!("t{t}-k{i}");
                mgr.set(key.as_bytes(), i as u64, 64, &digest);
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let digest = Md5Digest;
    for t in 0..4u32 {
        for i in 0..200u32 {
            let key = format!("t{t}-k{i}");
            assert!(mgr.get(key.as_bytes(), &digest).is_some(), "missing {key}");
        }
    }
}
