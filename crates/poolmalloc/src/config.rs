//! Environment-driven configuration, read once on first use.
//!
//! Knobs:
//! - `POOLMALLOC_NO_THREAD_CACHE` — kill-switch; `create_thread_cache` becomes
//!   a no-op so cache behavior can be ruled out in the field without a rebuild.
//! - `POOLMALLOC_MAX_CACHE_SIZE` — caps the per-bucket L1 capacity requested
//!   through `create_thread_cache`.

use std::sync::OnceLock;

pub struct CacheConfig {
    pub disable_thread_cache: bool,
    pub max_cache_size: Option<usize>,
}

static CONFIG: OnceLock<CacheConfig> = OnceLock::new();

pub fn cache_config() -> &'static CacheConfig {
    CONFIG.get_or_init(|| CacheConfig {
        disable_thread_cache: env_flag("POOLMALLOC_NO_THREAD_CACHE"),
        max_cache_size: env_usize("POOLMALLOC_MAX_CACHE_SIZE"),
    })
}

fn env_flag(key: &str) -> bool {
    std::env::var_os(key).is_some_and(|v| v != "0")
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}
