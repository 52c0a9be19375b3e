//! hipmempool - composable device-memory allocators for ROCm/HIP
//!
//! High-throughput accelerator workloads cannot afford a `hipMalloc` per
//! tensor: the calls are expensive and fragmentation on some architectures
//! is pathological. This crate layers interchangeable allocation strategies
//! between application code and the primitive platform calls:
//!
//! - [`DeviceResource`] / [`ManagedResource`] / [`PinnedResource`]: thin
//!   wrappers over the raw device, unified and pinned allocation calls
//! - [`AsyncDeviceResource`]: stream-ordered allocation over
//!   `hipMallocAsync`
//! - [`PoolResource`]: coalescing best-fit suballocation from a growable
//!   arena
//! - [`FixedSizeResource`]: preallocated same-size block free list
//! - [`BinningResource`]: routes requests to fixed-size pools by size class
//! - [`LoggingResource`]: records allocation events, wraps any resource
//!
//! Resources stack arbitrarily, and a process-wide default
//! ([`set_default`]/[`get_default`]) serves callers that don't pick one
//! explicitly.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hipmempool::{DeviceResource, MemoryResource, PoolOptions, PoolResource};
//!
//! # fn main() -> hipmempool::MemResult<()> {
//! let upstream = Arc::new(DeviceResource::new());
//! let pool = PoolResource::try_new(upstream, PoolOptions::new(64 << 20))?;
//! let ptr = pool.allocate(4096, 256)?;
//! pool.deallocate(ptr, 4096, 256);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod resource;

pub use backend::Stream;
pub use error::{MemError, MemResult};
pub use resource::registry::{flush_default_logs, get_default, is_initialized, set_default};
pub use resource::{
    AsyncDeviceResource, BinningResource, DevicePtr, DeviceResource, FixedSizeResource, LogAction,
    LoggingResource, ManagedResource, MemoryKind, MemoryResource, PinnedResource, PoolOptions,
    PoolResource, StreamOrderedResource, DEFAULT_ALIGNMENT,
};
