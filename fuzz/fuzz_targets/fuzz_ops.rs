#![no_main]

use libfuzzer_sys::fuzz_target;
use std::sync::OnceLock;

use poolmalloc::Allocator;

/// Fuzz target that interprets a byte slice as a sequence of allocator
/// operations against one shared allocator.
///
/// Each operation is encoded as:
///   byte 0: opcode (0=alloc, 1=free, 2=realloc, 3=msize)
///   byte 1-2: size (little-endian u16)
///   byte 3: low nibble = slot index, high nibble = alignment selector
///
/// We track up to 16 live pointers.
const MAX_SLOTS: usize = 16;

const ALIGNMENTS: [usize; 6] = [1, 8, 16, 64, 1024, 16384];

fn allocator() -> &'static Allocator {
    static ALLOCATOR: OnceLock<Allocator> = OnceLock::new();
    ALLOCATOR.get_or_init(|| Allocator::new(32, 64 * 1024).expect("allocator create failed"))
}

fuzz_target!(|data: &[u8]| {
    let a = allocator();
    let mut slots: [*mut u8; MAX_SLOTS] = [std::ptr::null_mut(); MAX_SLOTS];

    let mut i = 0;
    while i + 4 <= data.len() {
        let opcode = data[i] & 0x03;
        let size = u16::from_le_bytes([data[i + 1], data[i + 2]]) as usize;
        let slot = (data[i + 3] & 0x0F) as usize % MAX_SLOTS;
        let alignment = ALIGNMENTS[(data[i + 3] >> 4) as usize % ALIGNMENTS.len()];
        i += 4;

        match opcode {
            0 => {
                // alloc
                if !slots[slot].is_null() {
                    unsafe { a.free(slots[slot]) };
                }
                let p = a.alloc(size, alignment);
                if size == 0 {
                    // Zero-size sentinel: the alignment value itself.
                    assert_eq!(p as usize, alignment);
                } else if !p.is_null() && p as usize > 16384 {
                    unsafe {
                        std::ptr::write_bytes(p, 0xAA, size.min(256));
                    }
                }
                slots[slot] = p;
            }
            1 => {
                // free (sentinels and null are both fine to pass)
                unsafe { a.free(slots[slot]) };
                slots[slot] = std::ptr::null_mut();
            }
            2 => {
                // realloc
                let p = slots[slot];
                // A pool block that still fits its slot shrinks in place: the
                // slot goes back to the pool and must not be freed again.
                let shrinks_in_pool = a.is_pool_allocation(p)
                    && size <= unsafe { a.usable_size(p) };
                let q = unsafe { a.realloc(p, size, alignment) };
                if shrinks_in_pool {
                    assert_eq!(q, p);
                    slots[slot] = std::ptr::null_mut();
                } else if q.is_null() {
                    // Growth failed; the old block is still owned.
                    unsafe { a.free(p) };
                    slots[slot] = std::ptr::null_mut();
                } else {
                    slots[slot] = q;
                    if size > 0 && q as usize > 16384 {
                        unsafe {
                            std::ptr::write_bytes(q, 0xBB, size.min(256));
                        }
                    }
                }
            }
            3 => {
                // msize
                let p = slots[slot];
                let usable = unsafe { a.usable_size(p) };
                if p as usize <= 16384 {
                    assert_eq!(usable, 0);
                } else if a.is_pool_allocation(p) {
                    let index = a.bucket_index(p);
                    assert!(index >= 0);
                    assert_eq!(usable, (index as usize + 1) * 16);
                }
            }
            _ => unreachable!(),
        }
    }

    // Cleanup
    for slot in &mut slots {
        unsafe { a.free(*slot) };
        *slot = std::ptr::null_mut();
    }
});
