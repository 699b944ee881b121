//! Pool bucket: one size class backed by a contiguous sub-region of the arena
//! and a lock-free LIFO freelist.
//!
//! Free slots store their "next" link in their own first 8 bytes, so the
//! freelist costs no side storage. The head carries a 32-bit tag that is
//! bumped on every push; a popper holding a stale head/next pair fails its CAS
//! once any push lands in between, which defeats ABA on recycled slots.
//!
//! This module is the unsafe core of the crate. Everything above it deals in
//! whole slots handed out and taken back through the methods here.

use core::ptr;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[cfg(feature = "stats")]
use crate::stats::BucketStats;

/// Freelist link: `{ tag: low 32 bits, offset: high 32 bits }` packed into a
/// u64 so the head can be swapped with a single CAS. `offset` is a byte offset
/// into the bucket's sub-region; `u64::MAX` is the empty sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(transparent)]
pub(crate) struct TaggedIndex(u64);

impl TaggedIndex {
    pub(crate) const EMPTY: TaggedIndex = TaggedIndex(u64::MAX);

    #[inline(always)]
    pub(crate) fn new(tag: u32, offset: u32) -> Self {
        TaggedIndex(((offset as u64) << 32) | tag as u64)
    }

    #[inline(always)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        TaggedIndex(raw)
    }

    #[inline(always)]
    pub(crate) const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub(crate) fn offset(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[allow(dead_code)]
    #[inline(always)]
    pub(crate) fn tag(self) -> u32 {
        self.0 as u32
    }

    #[inline(always)]
    pub(crate) fn is_empty(self) -> bool {
        self.0 == u64::MAX
    }
}

/// One size class: `[data, buffer_end)` divided into equal slots, plus the
/// freelist head and the push tag counter.
pub(crate) struct PoolBucket {
    head: AtomicU64,
    /// Tag source for pushes. A nonce, not a synchronization variable.
    global_tag: AtomicU32,
    data: *mut u8,
    buffer_end: *mut u8,
    #[cfg(feature = "stats")]
    pub(crate) stats: BucketStats,
}

// The raw pointers only name the sub-region; all mutation of shared state goes
// through the atomics.
unsafe impl Send for PoolBucket {}
unsafe impl Sync for PoolBucket {}

impl PoolBucket {
    pub(crate) const fn new() -> Self {
        PoolBucket {
            head: AtomicU64::new(TaggedIndex::EMPTY.raw()),
            global_tag: AtomicU32::new(0),
            data: ptr::null_mut(),
            buffer_end: ptr::null_mut(),
            #[cfg(feature = "stats")]
            stats: BucketStats::new(),
        }
    }

    /// Take ownership of a sub-region and link all its slots into the
    /// freelist, slot 0 at the head.
    ///
    /// # Safety
    /// `data` must point to at least `element_size * element_count` writable
    /// bytes, 16-byte aligned, exclusively owned by this bucket for its whole
    /// lifetime. `element_size * element_count` must fit in a u32.
    pub(crate) unsafe fn attach(
        &mut self,
        data: *mut u8,
        element_size: usize,
        element_count: usize,
    ) {
        debug_assert!(element_size * element_count <= u32::MAX as usize);

        self.data = data;
        self.buffer_end = data.add(element_size * element_count);

        for i in 0..element_count {
            let link = if i + 1 == element_count {
                TaggedIndex::EMPTY
            } else {
                TaggedIndex::new(i as u32, ((i + 1) * element_size) as u32)
            };
            (data.add(i * element_size) as *mut u64).write(link.raw());
        }

        let head = if element_count == 0 {
            TaggedIndex::EMPTY
        } else {
            TaggedIndex::new(0, 0)
        };
        self.head.store(head.raw(), Ordering::SeqCst);
        self.global_tag.store(0, Ordering::Relaxed);
    }

    /// Pop the head slot. Returns null when the bucket is empty.
    pub(crate) fn alloc(&self) -> *mut u8 {
        let mut head = self.head.load(Ordering::SeqCst);
        loop {
            if TaggedIndex::from_raw(head).is_empty() {
                return ptr::null_mut();
            }

            let p = unsafe { self.data.add(TaggedIndex::from_raw(head).offset() as usize) };
            // The link word may be concurrently rewritten if another thread
            // pops this slot and the user scribbles on it. The value is only
            // trusted when the CAS below confirms `head` did not move, and the
            // tag bump on every push invalidates stale pairs.
            let next = unsafe { (*(p as *const AtomicU64)).load(Ordering::SeqCst) };

            match self
                .head
                .compare_exchange(head, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return p,
                Err(observed) => head = observed,
            }
        }
    }

    /// Prepend a pre-linked chain `[chain_head ..= chain_tail]` of freed slots
    /// onto the freelist with one CAS.
    ///
    /// # Safety
    /// Every slot in the chain must lie inside this bucket's sub-region and be
    /// owned by the caller. Each slot except `chain_tail` must already store a
    /// tagged index naming the next slot in the chain; `chain_tail`'s first 8
    /// bytes are overwritten here. Single-slot frees pass the same pointer for
    /// head and tail.
    pub(crate) unsafe fn free_interval(&self, chain_head: *mut u8, chain_tail: *mut u8) {
        debug_assert!(self.contains(chain_head));
        debug_assert!(self.contains(chain_tail));

        let tag = self.global_tag.fetch_add(1, Ordering::Relaxed);
        let node = TaggedIndex::new(tag, (chain_head as usize - self.data as usize) as u32);
        let tail_link = &*(chain_tail as *const AtomicU64);

        let mut head = self.head.load(Ordering::SeqCst);
        loop {
            tail_link.store(head, Ordering::SeqCst);
            match self
                .head
                .compare_exchange(head, node.raw(), Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return,
                Err(observed) => head = observed,
            }
        }
    }

    #[inline(always)]
    pub(crate) fn contains(&self, p: *const u8) -> bool {
        p as usize >= self.data as usize && (p as usize) < self.buffer_end as usize
    }

    #[inline(always)]
    pub(crate) fn data(&self) -> *mut u8 {
        self.data
    }
}
