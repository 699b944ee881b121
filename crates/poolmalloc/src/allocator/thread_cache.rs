//! Per-thread two-level cache sitting in front of the pool buckets.
//!
//! Each thread that opts in owns one record per bucket. A record buffers slot
//! offsets at two levels: L0, a tiny inline array for hot reuse, and L1, a
//! heap array sized at cache creation. Pops and pushes touch no atomics at
//! all; only when L1 overflows does half of it go back to the bucket as a
//! single pre-linked chain, amortizing the freelist CAS over many frees.
//!
//! Records are plain data owned by exactly one thread. The TLS holder flushes
//! everything back to the buckets when the thread exits.

use core::cell::UnsafeCell;
use core::mem;
use core::ptr;

use crate::allocator::CacheWarmup;
use crate::fallback::GenericAllocator;
use crate::pool::{PoolBucket, TaggedIndex};
use crate::util::{CACHE_LINE_SIZE, MAX_BUCKET_COUNT};

/// L0 capacity, sized so the whole record stays within one cache line.
pub(crate) const L0_CACHE_CAPACITY: usize = 7;

/// Tag nonce used for intermediate links of a flush chain. Only the head tag,
/// assigned by the bucket, participates in ABA defense.
const FLUSH_LOCAL_TAG: u32 = 0xFF_FFFF;

/// Per-(thread, bucket) cache record.
#[repr(C)]
pub(crate) struct TlsBucket {
    /// Copy of the bucket's sub-region base, for offset arithmetic.
    bucket_data: *mut u8,
    /// L1 storage, `max_elements` offsets, owned by this record.
    storage_l1: *mut u32,
    /// Bucket this record feeds from and flushes to. Null when detached.
    bucket: *const PoolBucket,
    storage_l0: [u32; L0_CACHE_CAPACITY],
    max_elements: u32,
    len_l1: u32,
    len_l0: u8,
}

const _: () = assert!(mem::size_of::<TlsBucket>() <= CACHE_LINE_SIZE);

impl TlsBucket {
    pub(crate) const fn empty() -> Self {
        TlsBucket {
            bucket_data: ptr::null_mut(),
            storage_l1: ptr::null_mut(),
            bucket: ptr::null(),
            storage_l0: [0; L0_CACHE_CAPACITY],
            max_elements: 0,
            len_l1: 0,
            len_l0: 0,
        }
    }

    #[inline(always)]
    pub(crate) fn is_attached(&self) -> bool {
        !self.bucket.is_null()
    }

    #[inline(always)]
    pub(crate) fn bucket_ptr(&self) -> *const PoolBucket {
        self.bucket
    }

    /// Wire this record to a bucket and optionally pre-fill L1.
    ///
    /// Warmup is best-effort: filling stops as soon as the bucket drains.
    /// A null `storage_l1` (capacity 0 or storage OOM) leaves the record
    /// attached but inert: pushes refuse, pops miss.
    ///
    /// # Safety
    /// `storage_l1` must be null or point to `max_elements` writable u32s
    /// owned by this record. The bucket must outlive the record's attachment.
    pub(crate) unsafe fn init(
        &mut self,
        storage_l1: *mut u32,
        max_elements: u32,
        warmup: CacheWarmup,
        bucket: &PoolBucket,
    ) {
        self.bucket_data = bucket.data();
        self.storage_l1 = storage_l1;
        self.bucket = bucket;
        self.max_elements = if storage_l1.is_null() { 0 } else { max_elements };
        self.len_l0 = 0;
        self.len_l1 = 0;

        let target = match warmup {
            CacheWarmup::Cold => 0,
            CacheWarmup::Warm => self.max_elements / 2,
            CacheWarmup::Hot => self.max_elements,
        };
        while self.len_l1 < target {
            let p = bucket.alloc();
            if p.is_null() {
                break;
            }
            let offset = (p as usize - self.bucket_data as usize) as u32;
            self.storage_l1.add(self.len_l1 as usize).write(offset);
            self.len_l1 += 1;
        }
    }

    /// Pop a cached slot: L0 first, then L1. Null on miss.
    #[inline]
    pub(crate) fn pop(&mut self) -> *mut u8 {
        if self.len_l0 > 0 {
            self.len_l0 -= 1;
            let offset = self.storage_l0[self.len_l0 as usize];
            return unsafe { self.bucket_data.add(offset as usize) };
        }
        if self.len_l1 > 0 {
            self.len_l1 -= 1;
            let offset = unsafe { *self.storage_l1.add(self.len_l1 as usize) };
            return unsafe { self.bucket_data.add(offset as usize) };
        }
        ptr::null_mut()
    }

    /// Buffer a freed slot: L0 if room, else L1, flushing half of L1 to the
    /// bucket first when it is full. Returns false only when the record has no
    /// capacity at all, in which case the caller frees to the bucket directly.
    #[inline]
    pub(crate) fn push(&mut self, p: *mut u8) -> bool {
        if self.max_elements == 0 {
            return false;
        }
        debug_assert!(unsafe { (*self.bucket).contains(p) });

        let offset = (p as usize - self.bucket_data as usize) as u32;

        if (self.len_l0 as usize) < L0_CACHE_CAPACITY {
            self.storage_l0[self.len_l0 as usize] = offset;
            self.len_l0 += 1;
            return true;
        }

        if self.len_l1 < self.max_elements {
            unsafe { self.storage_l1.add(self.len_l1 as usize).write(offset) };
            self.len_l1 += 1;
            return true;
        }

        // L1 full: return half (at least one, so a capacity-1 cache cannot
        // overflow) and keep the rest for the next burst.
        let half = (self.len_l1 / 2).max(1);
        unsafe {
            self.flush_to_bucket(half);
            self.storage_l1.add(self.len_l1 as usize).write(offset);
        }
        self.len_l1 += 1;
        true
    }

    /// Return the `count` most recent L1 entries to the bucket as one
    /// pre-linked chain ending in a single `free_interval` CAS.
    ///
    /// # Safety
    /// The record must be attached and its bucket still alive.
    pub(crate) unsafe fn flush_to_bucket(&mut self, count: u32) {
        if count == 0 || self.len_l1 == 0 {
            return;
        }
        let count = count.min(self.len_l1);
        let bucket = &*self.bucket;

        let first = (self.len_l1 - count) as usize;
        let mut offset = *self.storage_l1.add(first);
        let chain_head = self.bucket_data.add(offset as usize);

        let mut prev = chain_head;
        let mut local_tag = FLUSH_LOCAL_TAG;
        for i in (first + 1)..self.len_l1 as usize {
            offset = *self.storage_l1.add(i);
            (prev as *mut u64).write(TaggedIndex::new(local_tag, offset).raw());
            local_tag = local_tag.wrapping_add(1);
            prev = self.bucket_data.add(offset as usize);
        }

        bucket.free_interval(chain_head, prev);
        self.len_l1 -= count;
    }

    /// Flush everything back to the bucket and detach. Returns the L1 storage
    /// for the caller to release to the generic allocator.
    ///
    /// # Safety
    /// The record's bucket, if attached, must still be alive.
    pub(crate) unsafe fn destroy(&mut self) -> *mut u32 {
        if !self.is_attached() {
            return ptr::null_mut();
        }

        // Drain L0 through L1 so everything funnels into the chain flush.
        while self.len_l0 > 0 {
            self.len_l0 -= 1;
            let offset = self.storage_l0[self.len_l0 as usize];
            if self.len_l1 == self.max_elements {
                self.flush_to_bucket((self.len_l1 / 2).max(1));
            }
            self.storage_l1.add(self.len_l1 as usize).write(offset);
            self.len_l1 += 1;
        }
        self.flush_to_bucket(self.len_l1);

        let storage = self.storage_l1;
        *self = TlsBucket::empty();
        storage
    }
}

// ============================================================================
// TLS registry
// ============================================================================

struct TlsCache {
    records: UnsafeCell<[TlsBucket; MAX_BUCKET_COUNT]>,
}

impl TlsCache {
    const fn new() -> Self {
        const EMPTY: TlsBucket = TlsBucket::empty();
        TlsCache {
            records: UnsafeCell::new([EMPTY; MAX_BUCKET_COUNT]),
        }
    }
}

impl Drop for TlsCache {
    // Thread exit: every still-attached record flushes its slots back to its
    // bucket and releases L1 storage. The buckets must still be alive, which
    // is the documented teardown contract on `Allocator`.
    fn drop(&mut self) {
        let records = self.records.get_mut();
        for record in records.iter_mut() {
            if record.is_attached() {
                unsafe {
                    let storage = record.destroy();
                    if !storage.is_null() {
                        GenericAllocator::create().free(storage as *mut u8);
                    }
                }
            }
        }
    }
}

thread_local! {
    static TLS_CACHE: TlsCache = const { TlsCache::new() };
}

/// Run `f` on this thread's record for bucket `index`. Returns `None` while
/// TLS is unavailable (thread teardown), which callers treat as a cache miss.
#[inline]
pub(crate) fn with_tls_record<R>(index: usize, f: impl FnOnce(&mut TlsBucket) -> R) -> Option<R> {
    debug_assert!(index < MAX_BUCKET_COUNT);
    TLS_CACHE
        .try_with(|cache| {
            // SAFETY: records are only touched by their owning thread and the
            // closure never re-enters this accessor.
            unsafe { f(&mut (*cache.records.get())[index]) }
        })
        .ok()
}
