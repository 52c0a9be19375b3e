//! Primitive resources: thin wrappers over the platform allocation calls
//!
//! Each of these forwards a request straight to one HIP call pair and does
//! no suballocation of its own. They sit at the bottom of every resource
//! stack.

use std::any::Any;
use std::ffi::c_void;
use std::ptr;

use crate::backend::{ffi, Stream};
use crate::error::{MemError, MemResult};
use crate::resource::{
    DevicePtr, MemoryKind, MemoryResource, StreamOrderedResource, DEFAULT_ALIGNMENT,
};

/// The primitive calls guarantee 256-byte alignment; anything beyond that
/// cannot be honored at this layer and is a caller error.
fn check_alignment(alignment: usize) -> MemResult<()> {
    if !alignment.is_power_of_two() {
        return Err(MemError::ContractViolation(format!(
            "alignment must be a power of two, got {}",
            alignment
        )));
    }
    if alignment > DEFAULT_ALIGNMENT {
        return Err(MemError::ContractViolation(format!(
            "alignment {} exceeds the {}-byte guarantee of the primitive allocator",
            alignment, DEFAULT_ALIGNMENT
        )));
    }
    Ok(())
}

/// Device-memory resource backed directly by `hipMalloc`/`hipFree`.
///
/// Memory is accessible only from kernels running on the device.
///
/// The allocation calls always target the runtime's current device; the
/// ordinal held here is an equality-domain tag, not a device selector.
/// Callers are responsible for making `device_id` current before using a
/// resource tagged with it.
#[derive(Debug)]
pub struct DeviceResource {
    device_id: i32,
}

impl DeviceResource {
    /// Resource for the default device.
    pub fn new() -> Self {
        Self::with_device(0)
    }

    /// Resource tagged with a specific device ordinal.
    ///
    /// Tagging does not switch devices: allocation still goes to whatever
    /// device is current, and resources with different tags compare unequal
    /// so their allocations are never released through each other.
    pub fn with_device(device_id: i32) -> Self {
        DeviceResource { device_id }
    }

    pub fn device_id(&self) -> i32 {
        self.device_id
    }
}

impl Default for DeviceResource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResource for DeviceResource {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Device
    }

    fn allocate(&self, bytes: usize, alignment: usize) -> MemResult<DevicePtr> {
        check_alignment(alignment)?;
        let mut raw: *mut c_void = ptr::null_mut();
        // hipMalloc(0) may legally return null; a zero-byte request still
        // has to yield a distinct, freeable pointer
        let result = unsafe { ffi::hipMalloc(&mut raw, bytes.max(1)) };
        if result != ffi::HIP_SUCCESS || raw.is_null() {
            tracing::error!("hipMalloc failed with code {} for {} bytes", result, bytes);
            return Err(MemError::OutOfMemory {
                bytes,
                kind: self.kind(),
            });
        }
        tracing::trace!("device allocate: {} bytes at {:?}", bytes, raw);
        Ok(DevicePtr::from_raw(raw))
    }

    fn deallocate(&self, ptr: DevicePtr, bytes: usize, _alignment: usize) {
        let result = unsafe { ffi::hipFree(ptr.as_ptr()) };
        if result != ffi::HIP_SUCCESS {
            tracing::error!(
                "hipFree failed with code {} for {} bytes at {:?}",
                result,
                bytes,
                ptr.as_ptr()
            );
            debug_assert!(false, "hipFree of unrecognized pointer");
        }
    }

    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        other
            .as_any()
            .downcast_ref::<DeviceResource>()
            .is_some_and(|o| o.device_id == self.device_id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Unified-memory resource backed by `hipMallocManaged`/`hipFree`.
///
/// Memory is coherently accessible from both host and device.
#[derive(Debug, Default)]
pub struct ManagedResource;

impl ManagedResource {
    pub fn new() -> Self {
        ManagedResource
    }
}

impl MemoryResource for ManagedResource {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Unified
    }

    fn allocate(&self, bytes: usize, alignment: usize) -> MemResult<DevicePtr> {
        check_alignment(alignment)?;
        let mut raw: *mut c_void = ptr::null_mut();
        let result =
            unsafe { ffi::hipMallocManaged(&mut raw, bytes.max(1), ffi::HIP_MEM_ATTACH_GLOBAL) };
        if result != ffi::HIP_SUCCESS || raw.is_null() {
            tracing::error!(
                "hipMallocManaged failed with code {} for {} bytes",
                result,
                bytes
            );
            return Err(MemError::OutOfMemory {
                bytes,
                kind: self.kind(),
            });
        }
        tracing::trace!("managed allocate: {} bytes at {:?}", bytes, raw);
        Ok(DevicePtr::from_raw(raw))
    }

    fn deallocate(&self, ptr: DevicePtr, bytes: usize, _alignment: usize) {
        let result = unsafe { ffi::hipFree(ptr.as_ptr()) };
        if result != ffi::HIP_SUCCESS {
            tracing::error!(
                "hipFree failed with code {} for {} managed bytes",
                result,
                bytes
            );
            debug_assert!(false, "hipFree of unrecognized pointer");
        }
    }

    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        other.as_any().downcast_ref::<ManagedResource>().is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Pinned host-memory resource backed by `hipHostMalloc`/`hipHostFree`.
///
/// Page-locked memory accessible from both sides without staging copies.
#[derive(Debug, Default)]
pub struct PinnedResource;

impl PinnedResource {
    pub fn new() -> Self {
        PinnedResource
    }
}

impl MemoryResource for PinnedResource {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Pinned
    }

    fn allocate(&self, bytes: usize, alignment: usize) -> MemResult<DevicePtr> {
        check_alignment(alignment)?;
        let mut raw: *mut c_void = ptr::null_mut();
        let result =
            unsafe { ffi::hipHostMalloc(&mut raw, bytes.max(1), ffi::HIP_HOST_MALLOC_DEFAULT) };
        if result != ffi::HIP_SUCCESS || raw.is_null() {
            tracing::error!(
                "hipHostMalloc failed with code {} for {} bytes",
                result,
                bytes
            );
            return Err(MemError::OutOfMemory {
                bytes,
                kind: self.kind(),
            });
        }
        tracing::trace!("pinned allocate: {} bytes at {:?}", bytes, raw);
        Ok(DevicePtr::from_raw(raw))
    }

    fn deallocate(&self, ptr: DevicePtr, bytes: usize, _alignment: usize) {
        let result = unsafe { ffi::hipHostFree(ptr.as_ptr()) };
        if result != ffi::HIP_SUCCESS {
            tracing::error!(
                "hipHostFree failed with code {} for {} bytes",
                result,
                bytes
            );
            debug_assert!(false, "hipHostFree of unrecognized pointer");
        }
    }

    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        other.as_any().downcast_ref::<PinnedResource>().is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Stream-ordered device resource over `hipMallocAsync`/`hipFreeAsync`.
///
/// The async pair is the real implementation; the synchronous contract is
/// satisfied by enqueueing on the resource's own stream and synchronizing
/// it, per [`StreamOrderedResource`].
#[derive(Debug)]
pub struct AsyncDeviceResource {
    default_stream: Stream,
}

impl AsyncDeviceResource {
    /// Create a resource with its own freshly created default stream.
    pub fn new() -> MemResult<Self> {
        Ok(AsyncDeviceResource {
            default_stream: Stream::new()?,
        })
    }

    /// Create a resource that uses `stream` as its default stream.
    pub fn with_stream(stream: Stream) -> Self {
        AsyncDeviceResource {
            default_stream: stream,
        }
    }
}

impl MemoryResource for AsyncDeviceResource {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Device
    }

    fn allocate(&self, bytes: usize, alignment: usize) -> MemResult<DevicePtr> {
        self.allocate_blocking(bytes, alignment)
    }

    fn deallocate(&self, ptr: DevicePtr, bytes: usize, alignment: usize) {
        self.deallocate_blocking(ptr, bytes, alignment);
    }

    // All instances draw from the device's default memory pool, so any of
    // them can release memory allocated by another.
    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        other.as_any().downcast_ref::<AsyncDeviceResource>().is_some()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_stream_ordered(&self) -> Option<&dyn StreamOrderedResource> {
        Some(self)
    }
}

impl StreamOrderedResource for AsyncDeviceResource {
    fn allocate_async(
        &self,
        bytes: usize,
        alignment: usize,
        stream: &Stream,
    ) -> MemResult<DevicePtr> {
        check_alignment(alignment)?;
        let mut raw: *mut c_void = ptr::null_mut();
        let result = unsafe { ffi::hipMallocAsync(&mut raw, bytes.max(1), stream.as_ptr()) };
        if result != ffi::HIP_SUCCESS || raw.is_null() {
            tracing::error!(
                "hipMallocAsync failed with code {} for {} bytes",
                result,
                bytes
            );
            return Err(MemError::OutOfMemory {
                bytes,
                kind: self.kind(),
            });
        }
        tracing::trace!(
            "async device allocate: {} bytes at {:?} on stream {:?}",
            bytes,
            raw,
            stream.as_ptr()
        );
        Ok(DevicePtr::from_raw(raw))
    }

    fn deallocate_async(&self, ptr: DevicePtr, bytes: usize, _alignment: usize, stream: &Stream) {
        let result = unsafe { ffi::hipFreeAsync(ptr.as_ptr(), stream.as_ptr()) };
        if result != ffi::HIP_SUCCESS {
            tracing::error!(
                "hipFreeAsync failed with code {} for {} bytes at {:?}",
                result,
                bytes,
                ptr.as_ptr()
            );
            debug_assert!(false, "hipFreeAsync of unrecognized pointer");
        }
    }

    fn default_stream(&self) -> &Stream {
        &self.default_stream
    }
}
