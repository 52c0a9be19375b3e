//! Size-binning dispatcher
//!
//! Routes each request to the first fixed-size pool whose bin bound can hold
//! it, falling back to the upstream resource for anything larger. Bin pools
//! are constructed lazily on first use, so configuring many bins costs
//! nothing until they serve traffic.

use std::any::Any;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::{MemError, MemResult};
use crate::resource::fixed::FixedSizeResource;
use crate::resource::{same_instance, DevicePtr, MemoryKind, MemoryResource};

#[derive(Debug)]
struct Bin {
    max_size: usize,
    pool: OnceCell<Arc<FixedSizeResource>>,
}

/// Dispatcher over an ascending sequence of fixed-size pools.
///
/// Deallocation routes by the caller-preserved size, so it reaches the exact
/// bin (or upstream) that served the allocation; the dispatcher never
/// re-derives ownership from the pointer.
#[derive(Debug)]
pub struct BinningResource {
    upstream: Arc<dyn MemoryResource>,
    bins: Vec<Bin>,
}

impl BinningResource {
    /// Dispatcher with no bins; every request goes upstream until bins are
    /// added.
    pub fn new(upstream: Arc<dyn MemoryResource>) -> Self {
        BinningResource {
            upstream,
            bins: Vec::new(),
        }
    }

    /// Dispatcher with one bin per entry of `bin_sizes`, which must be
    /// strictly increasing.
    pub fn try_new(upstream: Arc<dyn MemoryResource>, bin_sizes: &[usize]) -> MemResult<Self> {
        let mut resource = Self::new(upstream);
        for &max_size in bin_sizes {
            resource.add_bin(max_size)?;
        }
        Ok(resource)
    }

    /// Append a bin serving requests up to `max_size` bytes. Bins must be
    /// added in strictly increasing size order.
    pub fn add_bin(&mut self, max_size: usize) -> MemResult<()> {
        if max_size == 0 {
            return Err(MemError::ConfigurationError(
                "bin size cannot be zero".to_string(),
            ));
        }
        if let Some(last) = self.bins.last() {
            if max_size <= last.max_size {
                return Err(MemError::ConfigurationError(format!(
                    "bins must be added in increasing size order ({} after {})",
                    max_size, last.max_size
                )));
            }
        }
        self.bins.push(Bin {
            max_size,
            pool: OnceCell::new(),
        });
        Ok(())
    }

    pub fn bin_count(&self) -> usize {
        self.bins.len()
    }

    /// Bound of the bin that would serve a request of `bytes`, or `None`
    /// when it would go upstream.
    pub fn bin_for(&self, bytes: usize) -> Option<usize> {
        self.route(bytes).map(|bin| bin.max_size)
    }

    fn route(&self, bytes: usize) -> Option<&Bin> {
        self.bins.iter().find(|bin| bin.max_size >= bytes)
    }

    // The returned reference borrows from the bin, not from self.
    fn bin_pool<'a>(&self, bin: &'a Bin) -> MemResult<&'a Arc<FixedSizeResource>> {
        bin.pool.get_or_try_init(|| {
            tracing::debug!("constructing fixed-size pool for bin <= {} bytes", bin.max_size);
            FixedSizeResource::try_new(
                Arc::clone(&self.upstream),
                bin.max_size,
                FixedSizeResource::DEFAULT_BLOCKS_PER_SLAB,
            )
            .map(Arc::new)
        })
    }
}

impl MemoryResource for BinningResource {
    fn kind(&self) -> MemoryKind {
        self.upstream.kind()
    }

    fn allocate(&self, bytes: usize, alignment: usize) -> MemResult<DevicePtr> {
        match self.route(bytes) {
            Some(bin) => self.bin_pool(bin)?.allocate(bytes, alignment),
            None => self.upstream.allocate(bytes, alignment),
        }
    }

    fn deallocate(&self, ptr: DevicePtr, bytes: usize, alignment: usize) {
        match self.route(bytes) {
            Some(bin) => match bin.pool.get() {
                Some(pool) => pool.deallocate(ptr, bytes, alignment),
                None => {
                    tracing::error!(
                        "deallocate of {} bytes routed to a bin that never allocated",
                        bytes
                    );
                    debug_assert!(false, "deallocate routed to an unused bin");
                }
            },
            None => self.upstream.deallocate(ptr, bytes, alignment),
        }
    }

    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        same_instance(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
