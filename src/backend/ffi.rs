//! HIP FFI bindings
//!
//! Only the allocation and stream entry points the resources actually call
//! are declared here. The dead_code allowance is needed because FFI symbols
//! appear unused to the compiler (they're only called through unsafe blocks).

use std::ffi::c_void;

#[link(name = "amdhip64")]
#[allow(dead_code)]
extern "C" {
    pub fn hipMalloc(ptr: *mut *mut c_void, size: usize) -> i32;
    pub fn hipFree(ptr: *mut c_void) -> i32;
    pub fn hipMallocManaged(ptr: *mut *mut c_void, size: usize, flags: u32) -> i32;
    pub fn hipHostMalloc(ptr: *mut *mut c_void, size: usize, flags: u32) -> i32;
    pub fn hipHostFree(ptr: *mut c_void) -> i32;
    pub fn hipMallocAsync(ptr: *mut *mut c_void, size: usize, stream: *mut c_void) -> i32;
    pub fn hipFreeAsync(ptr: *mut c_void, stream: *mut c_void) -> i32;
    pub fn hipStreamCreate(stream: *mut *mut c_void) -> i32;
    pub fn hipStreamDestroy(stream: *mut c_void) -> i32;
    pub fn hipStreamSynchronize(stream: *mut c_void) -> i32;
}

/// HIP success code
pub const HIP_SUCCESS: i32 = 0;

/// hipMemAttachGlobal: managed memory accessible from any stream
pub const HIP_MEM_ATTACH_GLOBAL: u32 = 0x1;

/// Default flags for pinned host allocation
pub const HIP_HOST_MALLOC_DEFAULT: u32 = 0x0;
