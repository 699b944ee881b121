//! Allocation counters, compiled in with the `stats` feature.
//!
//! All counters use relaxed ordering: they are diagnostics, not
//! synchronization, and must not slow down the hot path.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Per-bucket counters.
pub struct BucketStats {
    cache_hits: AtomicUsize,
    pool_hits: AtomicUsize,
    pool_misses: AtomicUsize,
    frees: AtomicUsize,
}

impl BucketStats {
    pub(crate) const fn new() -> Self {
        BucketStats {
            cache_hits: AtomicUsize::new(0),
            pool_hits: AtomicUsize::new(0),
            pool_misses: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        }
    }

    #[inline(always)]
    pub(crate) fn note_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn note_pool_hit(&self) {
        self.pool_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn note_pool_miss(&self) {
        self.pool_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn note_free(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    /// Allocations served from this thread's cache.
    pub fn cache_hits(&self) -> usize {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Allocations served from the bucket's freelist.
    pub fn pool_hits(&self) -> usize {
        self.pool_hits.load(Ordering::Relaxed)
    }

    /// Pop attempts that found the bucket empty.
    pub fn pool_misses(&self) -> usize {
        self.pool_misses.load(Ordering::Relaxed)
    }

    /// Frees routed back into this bucket (cached or not).
    pub fn frees(&self) -> usize {
        self.frees.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let stats = BucketStats::new();
        assert_eq!(stats.cache_hits(), 0);
        assert_eq!(stats.pool_hits(), 0);
        assert_eq!(stats.pool_misses(), 0);
        assert_eq!(stats.frees(), 0);
    }

    #[test]
    fn counters_accumulate() {
        let stats = BucketStats::new();
        stats.note_pool_hit();
        stats.note_pool_hit();
        stats.note_free();
        assert_eq!(stats.pool_hits(), 2);
        assert_eq!(stats.frees(), 1);
    }
}
