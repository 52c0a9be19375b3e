//! Memory resources: the allocator contract and its composable layers
//!
//! A resource either satisfies requests from memory it already reserved
//! (pool, fixed-size, binning) or forwards them to the primitive platform
//! calls (device, managed, pinned). Resources stack arbitrarily: every layer
//! holds a shared reference to its upstream, so an upstream outlives any
//! segment or slab it granted.

pub mod binning;
pub mod fixed;
pub mod logging;
pub mod pool;
pub mod primitive;
pub mod registry;

pub use binning::BinningResource;
pub use fixed::FixedSizeResource;
pub use logging::{LogAction, LoggingResource};
pub use pool::{PoolOptions, PoolResource};
pub use primitive::{AsyncDeviceResource, DeviceResource, ManagedResource, PinnedResource};

use std::any::Any;
use std::ffi::c_void;
use std::fmt;

use crate::backend::Stream;
use crate::error::MemResult;

/// Alignment guaranteed by the primitive allocation calls; also the default
/// for requests that do not specify one.
pub const DEFAULT_ALIGNMENT: usize = 256;

/// Where memory allocated by a resource may be accessed.
///
/// Every concrete resource declares exactly one kind; callers must not
/// access memory outside its declared accessibility without synchronization
/// appropriate to that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    /// Device memory accessible only from kernels
    Device,
    /// Unified memory coherent between host and device
    Unified,
    /// Page-locked host memory accessible from both sides
    Pinned,
    /// Ordinary host memory
    Host,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoryKind::Device => "device",
            MemoryKind::Unified => "unified",
            MemoryKind::Pinned => "pinned",
            MemoryKind::Host => "host",
        };
        f.write_str(name)
    }
}

/// Address of a device allocation.
///
/// Carries the raw address as an integer so the suballocators can do
/// offset/length bookkeeping on it without raw pointer arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(usize);

impl DevicePtr {
    pub(crate) fn from_raw(ptr: *mut c_void) -> Self {
        DevicePtr(ptr as usize)
    }

    pub(crate) fn from_addr(addr: usize) -> Self {
        DevicePtr(addr)
    }

    /// Numeric address, for bookkeeping and log records.
    pub fn addr(&self) -> usize {
        self.0
    }

    /// Raw pointer, for handing the allocation to FFI.
    pub fn as_ptr(&self) -> *mut c_void {
        self.0 as *mut c_void
    }
}

/// Round `value` up to a multiple of `alignment` (a power of two).
pub(crate) fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Polymorphic allocation contract.
///
/// Contract: every pointer returned by [`allocate`](Self::allocate) must be
/// released through [`deallocate`](Self::deallocate) on a resource that
/// [`is_equal`](Self::is_equal) to the one that produced it, with the same
/// size and alignment. This implementation detects violations where it can
/// and reports them as [`MemError::ContractViolation`] on the allocate path;
/// the free path logs and debug-asserts instead, because deallocation has no
/// failure mode.
///
/// [`MemError::ContractViolation`]: crate::error::MemError::ContractViolation
pub trait MemoryResource: fmt::Debug + Send + Sync {
    /// Memory kind every allocation of this resource belongs to.
    fn kind(&self) -> MemoryKind;

    /// Allocate at least `bytes` bytes aligned to `alignment`.
    ///
    /// Zero-byte requests are legal and return a distinct pointer that must
    /// still be deallocated (with size 0).
    fn allocate(&self, bytes: usize, alignment: usize) -> MemResult<DevicePtr>;

    /// Release memory previously obtained from an equal resource.
    fn deallocate(&self, ptr: DevicePtr, bytes: usize, alignment: usize);

    /// Whether memory allocated by `self` may be released through `other`.
    ///
    /// Identity for the suballocators; primitives compare equal per device,
    /// and adaptors forward to the wrapped resource so composition is
    /// transparent to equality-based protocols.
    fn is_equal(&self, other: &dyn MemoryResource) -> bool;

    /// Downcasting support for the equality and log-flush protocols.
    fn as_any(&self) -> &dyn Any;

    /// Stream-ordered capability probe; `None` for purely synchronous
    /// resources.
    fn as_stream_ordered(&self) -> Option<&dyn StreamOrderedResource> {
        None
    }
}

/// Identity comparison, the default meaning of `is_equal`.
pub(crate) fn same_instance(a: &dyn MemoryResource, b: &dyn MemoryResource) -> bool {
    std::ptr::addr_eq(a as *const dyn MemoryResource, b as *const dyn MemoryResource)
}

/// Stream-ordered extension of the allocation contract.
///
/// Memory returned by [`allocate_async`](Self::allocate_async) on a stream
/// may be accessed on that stream without synchronization; other streams
/// must first be ordered after it. Memory passed to
/// [`deallocate_async`](Self::deallocate_async) on a stream becomes eligible
/// for reuse by later allocations on the same stream, while work already
/// enqueued there may still legally touch it.
///
/// The synchronous half of the contract comes for free: the provided
/// `*_blocking` methods enqueue on [`default_stream`](Self::default_stream)
/// and synchronize it, so a concrete implementation only writes the async
/// pair.
pub trait StreamOrderedResource: MemoryResource {
    /// Enqueue an allocation in stream order; returns as soon as it is
    /// enqueued.
    fn allocate_async(
        &self,
        bytes: usize,
        alignment: usize,
        stream: &Stream,
    ) -> MemResult<DevicePtr>;

    /// Enqueue a deallocation in stream order.
    fn deallocate_async(&self, ptr: DevicePtr, bytes: usize, alignment: usize, stream: &Stream);

    /// Stream used to satisfy the synchronous allocation contract.
    fn default_stream(&self) -> &Stream;

    /// Synchronous allocate in terms of the async pair.
    fn allocate_blocking(&self, bytes: usize, alignment: usize) -> MemResult<DevicePtr> {
        let ptr = self.allocate_async(bytes, alignment, self.default_stream())?;
        self.default_stream().synchronize()?;
        Ok(ptr)
    }

    /// Synchronous deallocate in terms of the async pair.
    fn deallocate_blocking(&self, ptr: DevicePtr, bytes: usize, alignment: usize) {
        self.deallocate_async(ptr, bytes, alignment, self.default_stream());
        if let Err(err) = self.default_stream().synchronize() {
            tracing::error!("stream synchronization failed during deallocate: {}", err);
        }
    }
}
