#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;

use poolmalloc::Allocator;

// Fuzz target that exercises size boundaries and alignment.
// Interprets input as a series of (size, alignment_shift) pairs, allocates,
// writes to the full extent, verifies alignment and usable size, and frees.

fn allocator() -> &'static Allocator {
    static ALLOCATOR: OnceLock<Allocator> = OnceLock::new();
    ALLOCATOR.get_or_init(|| Allocator::new(64, 64 * 1024).expect("allocator create failed"))
}

fuzz_target!(|data: &[u8]| {
    let a = allocator();

    let mut i = 0;
    while i + 4 <= data.len() {
        let raw_size = u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        i += 4;

        // Cap size to prevent OOM; alignment from the top bits, capped at
        // the allocator's 16384 maximum.
        let size = (raw_size as usize) % (1024 * 1024);
        let alignment = 1usize << ((raw_size >> 28) % 15);

        let p = a.alloc(size, alignment);
        if size == 0 {
            // Zero-size requests return the alignment value as a sentinel.
            assert_eq!(p as usize, alignment);
            unsafe { a.free(p) };
            continue;
        }

        if p.is_null() {
            continue; // OOM is ok
        }

        assert_eq!(
            (p as usize) % alignment.min(16),
            0,
            "alloc({}, {}) returned unaligned pointer {:p}",
            size,
            alignment,
            p
        );
        if alignment > 16 {
            // Over-aligned requests are delegated and must be fully aligned.
            assert_eq!((p as usize) % alignment, 0);
            assert!(!a.is_pool_allocation(p));
        }

        unsafe {
            std::ptr::write_bytes(p, 0xBB, size);
            for j in (0..size).step_by(997) {
                assert_eq!(*p.add(j), 0xBB);
            }

            let usable = a.usable_size(p);
            assert!(
                usable >= size,
                "usable_size({}) = {} < requested {}",
                size,
                usable,
                size
            );

            a.free(p);
        }
    }
});
