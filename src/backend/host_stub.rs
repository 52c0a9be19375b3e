//! Host-backed stand-in for the HIP allocation calls.
//!
//! Compiled when the `rocm` feature is disabled. Memory comes from the
//! system allocator with the same alignment guarantee `hipMalloc` gives, and
//! streams are inert heap tokens. The function surface matches `ffi.rs`
//! exactly, so the resources compile identically against either module.

#![allow(non_snake_case)]

use std::alloc::{alloc, dealloc, Layout};
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{Mutex, PoisonError};

use once_cell::sync::Lazy;

/// HIP success code
pub const HIP_SUCCESS: i32 = 0;

/// hipErrorInvalidValue
pub const HIP_ERROR_INVALID_VALUE: i32 = 1;

/// hipErrorOutOfMemory
pub const HIP_ERROR_OUT_OF_MEMORY: i32 = 2;

/// hipMemAttachGlobal: managed memory accessible from any stream
pub const HIP_MEM_ATTACH_GLOBAL: u32 = 0x1;

/// Default flags for pinned host allocation
pub const HIP_HOST_MALLOC_DEFAULT: u32 = 0x0;

/// Alignment matching what hipMalloc guarantees on real hardware.
const HOST_ALIGNMENT: usize = 256;

/// Layouts of live allocations, so the free calls can recover them and
/// reject unknown pointers the way the HIP runtime does.
static LIVE: Lazy<Mutex<HashMap<usize, Layout>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn malloc_common(ptr: *mut *mut c_void, size: usize) -> i32 {
    let layout = match Layout::from_size_align(size.max(1), HOST_ALIGNMENT) {
        Ok(layout) => layout,
        Err(_) => return HIP_ERROR_INVALID_VALUE,
    };
    let raw = unsafe { alloc(layout) };
    if raw.is_null() {
        return HIP_ERROR_OUT_OF_MEMORY;
    }
    LIVE.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(raw as usize, layout);
    unsafe { *ptr = raw as *mut c_void };
    HIP_SUCCESS
}

fn free_common(ptr: *mut c_void) -> i32 {
    if ptr.is_null() {
        // hipFree(nullptr) is a no-op success
        return HIP_SUCCESS;
    }
    let layout = LIVE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&(ptr as usize));
    match layout {
        Some(layout) => {
            unsafe { dealloc(ptr as *mut u8, layout) };
            HIP_SUCCESS
        }
        None => HIP_ERROR_INVALID_VALUE,
    }
}

pub unsafe fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32 {
    malloc_common(ptr, size)
}

pub unsafe fn hipFree(ptr: *mut c_void) -> i32 {
    free_common(ptr)
}

pub unsafe fn hipMallocManaged(ptr: *mut *mut c_void, size: usize, _flags: u32) -> i32 {
    malloc_common(ptr, size)
}

pub unsafe fn hipHostMalloc(ptr: *mut *mut c_void, size: usize, _flags: u32) -> i32 {
    malloc_common(ptr, size)
}

pub unsafe fn hipHostFree(ptr: *mut c_void) -> i32 {
    free_common(ptr)
}

pub unsafe fn hipMallocAsync(ptr: *mut *mut c_void, size: usize, _stream: *mut c_void) -> i32 {
    malloc_common(ptr, size)
}

pub unsafe fn hipFreeAsync(ptr: *mut c_void, _stream: *mut c_void) -> i32 {
    free_common(ptr)
}

pub unsafe fn hipStreamCreate(stream: *mut *mut c_void) -> i32 {
    let token = Box::into_raw(Box::new(0u8));
    *stream = token as *mut c_void;
    HIP_SUCCESS
}

pub unsafe fn hipStreamDestroy(stream: *mut c_void) -> i32 {
    if stream.is_null() {
        return HIP_ERROR_INVALID_VALUE;
    }
    drop(Box::from_raw(stream as *mut u8));
    HIP_SUCCESS
}

pub unsafe fn hipStreamSynchronize(_stream: *mut c_void) -> i32 {
    HIP_SUCCESS
}
