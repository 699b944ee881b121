//! Top-level allocator: owns the arena and its buckets, routes every request
//! between thread cache, pool freelists, and the generic fallback.

pub(crate) mod thread_cache;

use core::mem;
use core::ptr;

#[cfg(feature = "stats")]
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config;
use crate::fallback::GenericAllocator;
use crate::pool::{size_class, PoolBucket};
#[cfg(feature = "stats")]
use crate::stats::BucketStats;
use crate::util::{align_up, CACHE_LINE_SIZE, MAX_BUCKET_COUNT, MAX_VALID_ALIGNMENT, MIN_ALIGN};

/// How much of a freshly created thread cache is pre-filled from the buckets.
/// Best-effort: filling stops early if a bucket is already drained.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CacheWarmup {
    Cold = 0,
    Warm = 1,
    Hot = 2,
}

/// Pointer values at or below [`MAX_VALID_ALIGNMENT`] are sentinels (the
/// zero-size return among them) and must never be dereferenced. Comparing
/// against the one bound covers null as well.
#[inline(always)]
fn is_readable(p: *const u8) -> bool {
    p as usize > MAX_VALID_ALIGNMENT
}

/// Size-class segregated pool allocator.
///
/// Requests up to `buckets_count * 16` bytes are served from pre-carved pools
/// with lock-free freelists; anything beyond that, and any alignment above 16,
/// is delegated to the system allocator. Threads may opt in to a two-level
/// cache with [`Allocator::create_thread_cache`].
pub struct Allocator {
    buckets_count: usize,
    bucket_size_in_bytes: usize,
    arena: *mut u8,
    arena_end: *mut u8,
    buckets_data: [*mut u8; MAX_BUCKET_COUNT],
    buckets: [PoolBucket; MAX_BUCKET_COUNT],
    generic: GenericAllocator,
    #[cfg(feature = "stats")]
    global_miss: AtomicUsize,
}

// The buckets synchronize internally; the arena pointers are immutable after
// construction.
unsafe impl Send for Allocator {}
unsafe impl Sync for Allocator {}

impl Allocator {
    /// Build an allocator with `buckets_count` size classes (16, 32, ...,
    /// `buckets_count * 16` bytes), each owning `bucket_size_in_bytes` bytes
    /// of a single contiguous arena.
    ///
    /// `bucket_size_in_bytes` is rounded up to the 16-byte granularity.
    /// Returns `None` when the parameters are out of range (`buckets_count`
    /// outside `1..=64`, a bucket size that cannot be offset-addressed in 32
    /// bits) or the arena cannot be allocated.
    pub fn new(buckets_count: usize, bucket_size_in_bytes: usize) -> Option<Allocator> {
        if buckets_count == 0 || buckets_count > MAX_BUCKET_COUNT {
            return None;
        }
        if bucket_size_in_bytes == 0 || bucket_size_in_bytes > u32::MAX as usize {
            return None;
        }
        let bucket_size = align_up(bucket_size_in_bytes, MIN_ALIGN);
        if bucket_size > u32::MAX as usize {
            return None;
        }

        let generic = GenericAllocator::create();
        let arena_size = buckets_count.checked_mul(bucket_size)?;
        let arena = generic.alloc(arena_size, CACHE_LINE_SIZE);
        if arena.is_null() {
            return None;
        }

        const BUCKET: PoolBucket = PoolBucket::new();
        let mut allocator = Allocator {
            buckets_count,
            bucket_size_in_bytes: bucket_size,
            arena,
            arena_end: unsafe { arena.add(arena_size) },
            buckets_data: [ptr::null_mut(); MAX_BUCKET_COUNT],
            buckets: [BUCKET; MAX_BUCKET_COUNT],
            generic,
            #[cfg(feature = "stats")]
            global_miss: AtomicUsize::new(0),
        };

        for index in 0..buckets_count {
            let data = unsafe { arena.add(index * bucket_size) };
            allocator.buckets_data[index] = data;
            let element_size = size_class::bucket_element_size(index);
            let element_count = size_class::bucket_elements_count(index, bucket_size);
            unsafe { allocator.buckets[index].attach(data, element_size, element_count) };
        }

        Some(allocator)
    }

    /// Allocate `bytes_count` bytes aligned to `alignment`.
    ///
    /// `alignment` must be a power of two no larger than
    /// [`MAX_VALID_ALIGNMENT`]. A zero-size request returns the integer value
    /// of `alignment` as a non-null sentinel pointer that must not be read;
    /// [`Allocator::free`] recognizes and ignores it. Returns null only when
    /// the generic fallback is exhausted.
    pub fn alloc(&self, bytes_count: usize, alignment: usize) -> *mut u8 {
        debug_assert!(alignment.is_power_of_two());
        debug_assert!(alignment <= MAX_VALID_ALIGNMENT);

        if bytes_count == 0 {
            return alignment as *mut u8;
        }

        // Pool slots only guarantee 16-byte alignment; stricter requests go
        // straight to the generic allocator.
        if alignment > MIN_ALIGN {
            #[cfg(feature = "stats")]
            self.global_miss.fetch_add(1, Ordering::Relaxed);
            return self.generic.alloc(bytes_count, alignment);
        }

        // Folding the alignment into the size keeps small alignments exact:
        // slots are 16-aligned and sizes are multiples of 16.
        let effective = bytes_count.max(alignment);
        let mut index = size_class::bucket_index_for_size(effective);

        if index < self.buckets_count {
            let bucket = &self.buckets[index];
            let hit = thread_cache::with_tls_record(index, |record| {
                if ptr::eq(record.bucket_ptr(), bucket) {
                    record.pop()
                } else {
                    ptr::null_mut()
                }
            })
            .unwrap_or(ptr::null_mut());
            if !hit.is_null() {
                #[cfg(feature = "stats")]
                bucket.stats.note_cache_hit();
                return hit;
            }
        }

        // Drained buckets overflow into the next size class: wasted bytes,
        // but the request stays in the arena.
        while index < self.buckets_count {
            let p = self.buckets[index].alloc();
            if !p.is_null() {
                #[cfg(feature = "stats")]
                self.buckets[index].stats.note_pool_hit();
                return p;
            }
            #[cfg(feature = "stats")]
            self.buckets[index].stats.note_pool_miss();
            index += 1;
        }

        #[cfg(feature = "stats")]
        self.global_miss.fetch_add(1, Ordering::Relaxed);
        self.generic.alloc(bytes_count, alignment)
    }

    /// Release an allocation. Sentinel values (null included) are ignored;
    /// arena pointers return to their bucket, preferably through the thread
    /// cache; everything else goes to the generic fallback. Never fails.
    ///
    /// # Safety
    /// `p` must be a value previously returned by this allocator (or a
    /// sentinel) that has not been freed since.
    pub unsafe fn free(&self, p: *mut u8) {
        if !is_readable(p) {
            return;
        }

        if let Some(index) = self.find_bucket(p) {
            let bucket = &self.buckets[index];
            #[cfg(feature = "stats")]
            bucket.stats.note_free();

            let cached = thread_cache::with_tls_record(index, |record| {
                if ptr::eq(record.bucket_ptr(), bucket) {
                    record.push(p)
                } else {
                    false
                }
            })
            .unwrap_or(false);
            if !cached {
                bucket.free_interval(p, p);
            }
            return;
        }

        self.generic.free(p);
    }

    /// Resize an allocation.
    ///
    /// An arena-owned block that still fits its slot is returned as-is
    /// (shrink-in-place, slot handed back to the pool). On growth the whole
    /// slot is copied, which may include bytes the caller never wrote; slots
    /// are plain bytes, so this is harmless. A null result means the new
    /// block could not be allocated and `p` is still owned by the caller.
    ///
    /// # Safety
    /// `p` must be null, a sentinel, or a live allocation from this
    /// allocator.
    pub unsafe fn realloc(&self, p: *mut u8, bytes_count: usize, alignment: usize) -> *mut u8 {
        if p.is_null() {
            return self.alloc(bytes_count, alignment);
        }

        if let Some(index) = self.find_bucket(p) {
            let element_size = size_class::bucket_element_size(index);
            if bytes_count <= element_size {
                self.free(p);
                return p;
            }

            let fresh = self.alloc(bytes_count, alignment);
            if fresh.is_null() {
                return ptr::null_mut();
            }
            ptr::copy_nonoverlapping(p, fresh, element_size);
            self.free(p);
            return fresh;
        }

        if bytes_count == 0 {
            if is_readable(p) {
                self.generic.free(p);
            }
            return alignment as *mut u8;
        }
        if !is_readable(p) {
            return self.generic.alloc(bytes_count, alignment);
        }
        self.generic.realloc(p, bytes_count, alignment)
    }

    /// Usable size of an allocation: 0 for sentinels, the slot size for arena
    /// pointers, whatever the system reports otherwise.
    ///
    /// # Safety
    /// `p` must be null, a sentinel, or a live allocation from this
    /// allocator.
    pub unsafe fn usable_size(&self, p: *mut u8) -> usize {
        if !is_readable(p) {
            return 0;
        }
        if let Some(index) = self.find_bucket(p) {
            return size_class::bucket_element_size(index);
        }
        self.generic.usable_size(p)
    }

    /// Bucket serving `p`, or -1 when `p` is not arena-owned.
    pub fn bucket_index(&self, p: *const u8) -> i32 {
        match self.find_bucket(p) {
            Some(index) => index as i32,
            None => -1,
        }
    }

    /// Whether `p` points into the arena.
    pub fn is_pool_allocation(&self, p: *const u8) -> bool {
        self.find_bucket(p).is_some()
    }

    pub fn buckets_count(&self) -> usize {
        self.buckets_count
    }

    /// Slot size of bucket `index`.
    pub fn bucket_element_size(&self, index: usize) -> usize {
        size_class::bucket_element_size(index)
    }

    /// Number of slots bucket `index` holds; 0 for an out-of-range index.
    pub fn bucket_elements_count(&self, index: usize) -> usize {
        if index >= self.buckets_count {
            return 0;
        }
        size_class::bucket_elements_count(index, self.bucket_size_in_bytes)
    }

    /// Attach a two-level cache to the calling thread, one record per bucket,
    /// with L1 capacity `cache_size` clamped per bucket to its slot count.
    /// A cache already attached on this thread is flushed and replaced.
    /// Honors the `POOLMALLOC_NO_THREAD_CACHE` kill-switch.
    ///
    /// Teardown contract: a thread with a live cache must call
    /// [`Allocator::destroy_thread_cache`] or exit before this allocator is
    /// dropped; the exit-time flush writes into the allocator's buckets.
    pub fn create_thread_cache(&self, warmup: CacheWarmup, cache_size: usize) {
        let cfg = config::cache_config();
        if cfg.disable_thread_cache {
            return;
        }
        let cache_size = match cfg.max_cache_size {
            Some(cap) => cache_size.min(cap),
            None => cache_size,
        };

        for index in 0..self.buckets_count {
            let capacity = cache_size.min(self.bucket_elements_count(index)) as u32;
            let storage = if capacity == 0 {
                ptr::null_mut()
            } else {
                self.generic
                    .alloc(capacity as usize * mem::size_of::<u32>(), MIN_ALIGN)
                    as *mut u32
            };
            let bucket = &self.buckets[index];
            let installed = thread_cache::with_tls_record(index, |record| unsafe {
                if record.is_attached() {
                    let old = record.destroy();
                    if !old.is_null() {
                        self.generic.free(old as *mut u8);
                    }
                }
                record.init(storage, capacity, warmup, bucket);
            });
            if installed.is_none() && !storage.is_null() {
                // TLS already torn down on this thread; nothing to attach to.
                unsafe { self.generic.free(storage as *mut u8) };
            }
        }
    }

    /// Flush and detach the calling thread's cache records, returning every
    /// buffered slot to its bucket. A no-op on threads without a cache.
    pub fn destroy_thread_cache(&self) {
        for index in 0..MAX_BUCKET_COUNT {
            thread_cache::with_tls_record(index, |record| unsafe {
                if record.is_attached() {
                    let storage = record.destroy();
                    if !storage.is_null() {
                        self.generic.free(storage as *mut u8);
                    }
                }
            });
        }
    }

    /// Counters for bucket `index`. `None` when out of range.
    #[cfg(feature = "stats")]
    pub fn bucket_stats(&self, index: usize) -> Option<&BucketStats> {
        if index < self.buckets_count {
            Some(&self.buckets[index].stats)
        } else {
            None
        }
    }

    /// Requests that bypassed the pools entirely (oversize, over-aligned, or
    /// every bucket drained).
    #[cfg(feature = "stats")]
    pub fn global_miss_count(&self) -> usize {
        self.global_miss.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn find_bucket(&self, p: *const u8) -> Option<usize> {
        let addr = p as usize;
        let base = self.buckets_data[0] as usize;
        if addr < base || addr >= self.arena_end as usize {
            return None;
        }
        Some((addr - base) / self.bucket_size_in_bytes)
    }
}

impl Drop for Allocator {
    fn drop(&mut self) {
        // Thread caches must already be flushed (see create_thread_cache).
        unsafe { self.generic.free(self.arena) };
    }
}
