//! C-style entry points over an opaque allocator handle.
//!
//! The handle returned by [`pm_allocator_create`] is a boxed [`Allocator`];
//! every other entry point tolerates a null handle so a failed create can be
//! threaded through without crashing.

use core::ffi::c_void;
use core::ptr;

use crate::allocator::{Allocator, CacheWarmup};

#[no_mangle]
pub unsafe extern "C" fn pm_allocator_create(
    buckets_count: u32,
    bucket_size_in_bytes: usize,
) -> *mut Allocator {
    match Allocator::new(buckets_count as usize, bucket_size_in_bytes) {
        Some(allocator) => Box::into_raw(Box::new(allocator)),
        None => ptr::null_mut(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn pm_allocator_destroy(allocator: *mut Allocator) {
    if allocator.is_null() {
        return;
    }
    drop(Box::from_raw(allocator));
}

#[no_mangle]
pub unsafe extern "C" fn pm_allocator_thread_cache_create(
    allocator: *mut Allocator,
    warmup: CacheWarmup,
    cache_size: usize,
) {
    if allocator.is_null() {
        return;
    }
    (*allocator).create_thread_cache(warmup, cache_size);
}

#[no_mangle]
pub unsafe extern "C" fn pm_allocator_thread_cache_destroy(allocator: *mut Allocator) {
    if allocator.is_null() {
        return;
    }
    (*allocator).destroy_thread_cache();
}

#[no_mangle]
pub unsafe extern "C" fn pm_malloc(
    allocator: *mut Allocator,
    bytes_count: usize,
    alignment: usize,
) -> *mut c_void {
    if allocator.is_null() {
        return ptr::null_mut();
    }
    (*allocator).alloc(bytes_count, alignment) as *mut c_void
}

#[no_mangle]
pub unsafe extern "C" fn pm_free(allocator: *mut Allocator, p: *mut c_void) {
    if allocator.is_null() {
        return;
    }
    (*allocator).free(p as *mut u8);
}

#[no_mangle]
pub unsafe extern "C" fn pm_realloc(
    allocator: *mut Allocator,
    p: *mut c_void,
    bytes_count: usize,
    alignment: usize,
) -> *mut c_void {
    if allocator.is_null() {
        return ptr::null_mut();
    }
    (*allocator).realloc(p as *mut u8, bytes_count, alignment) as *mut c_void
}

#[no_mangle]
pub unsafe extern "C" fn pm_msize(allocator: *mut Allocator, p: *mut c_void) -> usize {
    if allocator.is_null() {
        return 0;
    }
    (*allocator).usable_size(p as *mut u8)
}

#[no_mangle]
pub unsafe extern "C" fn pm_mbucket(allocator: *mut Allocator, p: *mut c_void) -> i32 {
    if allocator.is_null() {
        return -1;
    }
    (*allocator).bucket_index(p as *const u8)
}
