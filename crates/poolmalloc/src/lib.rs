//! poolmalloc: a size-class segregated pool allocator with per-thread caches.
//!
//! Built for latency-sensitive interactive workloads (games, real-time media)
//! whose allocation traffic is dominated by many small, short-lived blocks.
//! Requests up to a configurable maximum are served from pre-carved pools;
//! anything larger falls through to the system allocator.
//!
//! Three tiers, fastest first:
//! - Per-thread two-level cache (L0/L1) — no synchronization at all
//! - Per-bucket lock-free LIFO freelist — one CAS, ABA-defeated by a tag
//! - Generic fallback — the system allocator, for oversize requests and the
//!   arena itself
//!
//! # Usage
//!
//! ```ignore
//! let allocator = poolmalloc::Allocator::new(16, 1 << 20).unwrap();
//! allocator.create_thread_cache(poolmalloc::CacheWarmup::Warm, 256);
//!
//! let p = allocator.alloc(24, 8);
//! unsafe { allocator.free(p) };
//!
//! allocator.destroy_thread_cache();
//! ```
//!
//! A C façade over an opaque handle is exported from [`api`].

pub mod allocator;
pub mod api;
pub mod config;
pub mod fallback;
mod pool;
#[cfg(feature = "stats")]
pub mod stats;
pub mod util;

pub use allocator::{Allocator, CacheWarmup};
pub use fallback::GenericAllocator;
