//! Dispatch behavior tests: bucket routing, sentinels, realloc semantics,
//! and fallback delegation, all through the public `Allocator` API.

use std::collections::HashSet;
use std::ptr;

use poolmalloc::Allocator;

// ---------------------------------------------------------------------------
// Bucket routing and LIFO reuse
// ---------------------------------------------------------------------------

#[test]
fn small_request_lands_in_its_size_class() {
    let a = Allocator::new(8, 4096).unwrap();

    let p = a.alloc(24, 8);
    assert!(!p.is_null());
    assert!(a.is_pool_allocation(p));
    // 24 bytes -> 32-byte class
    assert_eq!(a.bucket_index(p), 1);
    unsafe {
        assert_eq!(a.usable_size(p), 32);
        a.free(p);
    }

    // The freelist is LIFO: the same slot comes back immediately.
    let q = a.alloc(24, 8);
    assert_eq!(q, p);
    unsafe { a.free(q) };
}

#[test]
fn class_boundaries_route_exactly() {
    let a = Allocator::new(8, 4096).unwrap();

    for (size, expected) in [(1usize, 0i32), (16, 0), (17, 1), (32, 1), (33, 2), (128, 7)] {
        let p = a.alloc(size, 8);
        assert!(!p.is_null());
        assert_eq!(a.bucket_index(p), expected, "size {}", size);
        unsafe { a.free(p) };
    }
}

#[test]
fn sub16_alignment_is_folded_into_the_size() {
    let a = Allocator::new(8, 4096).unwrap();

    // 8 bytes at alignment 16 must still come from the 16-byte class.
    let p = a.alloc(8, 16);
    assert_eq!(a.bucket_index(p), 0);
    assert_eq!(p as usize % 16, 0);
    unsafe { a.free(p) };
}

#[test]
fn pool_pointers_are_16_byte_aligned() {
    let a = Allocator::new(16, 4096).unwrap();

    for size in [1usize, 7, 16, 17, 31, 48, 100, 200, 255] {
        let p = a.alloc(size, 1);
        assert!(a.is_pool_allocation(p), "size {}", size);
        assert_eq!(p as usize % 16, 0, "size {}", size);
        unsafe { a.free(p) };
    }
}

#[test]
fn live_allocations_are_distinct() {
    let a = Allocator::new(4, 1024).unwrap();

    // Drain bucket 0 completely: 64 slots of 16 bytes.
    let mut ptrs = Vec::new();
    for _ in 0..64 {
        let p = a.alloc(16, 16);
        assert_eq!(a.bucket_index(p), 0);
        ptrs.push(p);
    }
    let unique: HashSet<usize> = ptrs.iter().map(|p| *p as usize).collect();
    assert_eq!(unique.len(), ptrs.len());

    for p in ptrs {
        unsafe { a.free(p) };
    }
}

#[test]
fn alloc_free_cycles_do_not_leak_slots() {
    let a = Allocator::new(2, 256).unwrap();

    let first = a.alloc(16, 16);
    unsafe { a.free(first) };
    for _ in 0..10_000 {
        let p = a.alloc(16, 16);
        assert_eq!(p, first);
        unsafe { a.free(p) };
    }
}

// ---------------------------------------------------------------------------
// Exhaustion overflows into larger buckets
// ---------------------------------------------------------------------------

#[test]
fn drained_bucket_overflows_to_next_class() {
    // Bucket 0 holds exactly two 16-byte slots.
    let a = Allocator::new(2, 32).unwrap();

    let p0 = a.alloc(16, 16);
    let p1 = a.alloc(16, 16);
    assert_eq!(a.bucket_index(p0), 0);
    assert_eq!(a.bucket_index(p1), 0);

    // Third request is served from the 32-byte class.
    let p2 = a.alloc(16, 16);
    assert!(!p2.is_null());
    assert_eq!(a.bucket_index(p2), 1);
    unsafe {
        assert_eq!(a.usable_size(p2), 32);
        a.free(p0);
        a.free(p1);
        a.free(p2);
    }
}

#[test]
fn fully_drained_arena_falls_back_to_system() {
    let a = Allocator::new(1, 64).unwrap();

    let p0 = a.alloc(16, 16);
    let p1 = a.alloc(16, 16);
    let p2 = a.alloc(16, 16);
    let p3 = a.alloc(16, 16);
    let overflow = a.alloc(16, 16);
    assert!(!overflow.is_null());
    assert!(!a.is_pool_allocation(overflow));
    assert_eq!(a.bucket_index(overflow), -1);
    unsafe {
        for p in [p0, p1, p2, p3, overflow] {
            a.free(p);
        }
    }
}

// ---------------------------------------------------------------------------
// Zero-size sentinel
// ---------------------------------------------------------------------------

#[test]
fn zero_size_returns_the_alignment_as_sentinel() {
    let a = Allocator::new(8, 4096).unwrap();

    for alignment in [1usize, 8, 64, 1024, 16384] {
        let p = a.alloc(0, alignment);
        assert_eq!(p as usize, alignment);
        assert_eq!(a.bucket_index(p), -1);
        unsafe {
            assert_eq!(a.usable_size(p), 0);
            // Must be a no-op.
            a.free(p);
        }
    }
}

#[test]
fn free_null_is_noop() {
    let a = Allocator::new(8, 4096).unwrap();
    unsafe { a.free(ptr::null_mut()) };
}

// ---------------------------------------------------------------------------
// Oversize and over-aligned requests delegate to the fallback
// ---------------------------------------------------------------------------

#[test]
fn oversize_request_is_delegated() {
    let a = Allocator::new(8, 4096).unwrap();

    let size = 10 * 4096;
    let p = a.alloc(size, 16);
    assert!(!p.is_null());
    assert!(!a.is_pool_allocation(p));
    assert_eq!(a.bucket_index(p), -1);
    unsafe {
        assert!(a.usable_size(p) >= size);
        ptr::write_bytes(p, 0xAB, size);
        assert_eq!(*p, 0xAB);
        a.free(p);
    }
}

#[test]
fn over_aligned_request_is_delegated_and_aligned() {
    let a = Allocator::new(8, 4096).unwrap();

    for alignment in [32usize, 256, 4096, 16384] {
        let p = a.alloc(100, alignment);
        assert!(!p.is_null());
        assert_eq!(p as usize % alignment, 0);
        assert!(!a.is_pool_allocation(p));
        unsafe { a.free(p) };
    }
}

#[test]
fn usable_size_is_at_least_requested() {
    let a = Allocator::new(8, 4096).unwrap();

    for size in [1usize, 16, 24, 100, 128, 5000, 100_000] {
        let p = a.alloc(size, 16);
        assert!(!p.is_null());
        unsafe {
            assert!(a.usable_size(p) >= size, "size {}", size);
            a.free(p);
        }
    }
}

// ---------------------------------------------------------------------------
// Realloc
// ---------------------------------------------------------------------------

#[test]
fn realloc_null_acts_as_alloc() {
    let a = Allocator::new(8, 4096).unwrap();
    let p = unsafe { a.realloc(ptr::null_mut(), 64, 16) };
    assert!(!p.is_null());
    assert_eq!(a.bucket_index(p), 3);
    unsafe { a.free(p) };
}

#[test]
fn realloc_within_slot_is_in_place() {
    let a = Allocator::new(8, 4096).unwrap();

    let p = a.alloc(100, 16);
    assert_eq!(a.bucket_index(p), 6); // 112-byte class
    unsafe {
        // Anything up to the slot size keeps the same address.
        let q = a.realloc(p, 112, 16);
        assert_eq!(q, p);
    }
}

#[test]
fn realloc_growth_preserves_slot_contents() {
    let a = Allocator::new(32, 4096).unwrap();

    let p = a.alloc(16, 16);
    unsafe {
        for i in 0..16 {
            p.add(i).write(i as u8);
        }
        let q = a.realloc(p, 500, 16);
        assert!(!q.is_null());
        assert_ne!(q, p);
        // 500 bytes fits the 512-byte class with 32 buckets configured.
        assert_eq!(a.bucket_index(q), 31);
        for i in 0..16 {
            assert_eq!(q.add(i).read(), i as u8, "offset {}", i);
        }
        // The old slot went back to its pool.
        let r = a.alloc(16, 16);
        assert_eq!(r, p);
        a.free(r);
        a.free(q);
    }
}

#[test]
fn realloc_growth_out_of_the_arena() {
    let a = Allocator::new(4, 4096).unwrap();

    let p = a.alloc(48, 16);
    unsafe {
        ptr::write_bytes(p, 0x5A, 48);
        let q = a.realloc(p, 64 * 1024, 16);
        assert!(!q.is_null());
        assert!(!a.is_pool_allocation(q));
        for i in 0..48 {
            assert_eq!(q.add(i).read(), 0x5A);
        }
        a.free(q);
    }
}

#[test]
fn realloc_of_sentinel_allocates_fresh() {
    let a = Allocator::new(8, 4096).unwrap();

    let sentinel = a.alloc(0, 16);
    assert_eq!(sentinel as usize, 16);
    unsafe {
        let p = a.realloc(sentinel, 100, 16);
        assert!(!p.is_null());
        ptr::write_bytes(p, 0x77, 100);
        a.free(p);

        // Sentinel to zero size stays a sentinel.
        let s2 = a.realloc(a.alloc(0, 32), 0, 32);
        assert_eq!(s2 as usize, 32);
    }
}

#[test]
fn realloc_fallback_pointer_grows_in_place_or_moves() {
    let a = Allocator::new(4, 4096).unwrap();

    let size = 32 * 1024;
    let p = a.alloc(size, 16);
    assert!(!a.is_pool_allocation(p));
    unsafe {
        for i in 0..256 {
            p.add(i).write(i as u8);
        }
        let q = a.realloc(p, 2 * size, 16);
        assert!(!q.is_null());
        for i in 0..256 {
            assert_eq!(q.add(i).read(), i as u8);
        }

        // Shrinking a fallback pointer to zero frees it and yields a sentinel.
        let s = a.realloc(q, 0, 16);
        assert_eq!(s as usize, 16);
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

#[cfg(feature = "stats")]
#[test]
fn counters_track_pool_traffic() {
    let a = Allocator::new(2, 32).unwrap();

    let p = a.alloc(16, 16);
    unsafe { a.free(p) };
    let stats = a.bucket_stats(0).unwrap();
    assert_eq!(stats.pool_hits(), 1);
    assert_eq!(stats.frees(), 1);
    assert_eq!(a.global_miss_count(), 0);

    // Drain both buckets, then one more: misses on both classes plus a
    // global miss for the fallback allocation.
    let mut held = vec![a.alloc(16, 16), a.alloc(16, 16), a.alloc(16, 16)];
    let overflow = a.alloc(16, 16);
    assert!(!a.is_pool_allocation(overflow));
    assert!(a.bucket_stats(0).unwrap().pool_misses() >= 1);
    assert!(a.bucket_stats(1).unwrap().pool_misses() >= 1);
    assert_eq!(a.global_miss_count(), 1);

    held.push(overflow);
    for p in held {
        unsafe { a.free(p) };
    }
}
