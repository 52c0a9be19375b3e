//! Fixed-size block pool
//!
//! Preallocates slabs of equal-size blocks from an upstream resource and
//! serves every request from a free list. Blocks are never returned
//! upstream individually; whole slabs go back when the pool is dropped.

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{MemError, MemResult};
use crate::resource::{
    align_up, same_instance, DevicePtr, MemoryKind, MemoryResource, DEFAULT_ALIGNMENT,
};

#[derive(Debug, Default)]
struct FixedState {
    /// Free block addresses, popped from the back.
    free: Vec<usize>,
    /// Slabs obtained from upstream as (base, size).
    slabs: Vec<(usize, usize)>,
    issued: usize,
}

/// Pool of preallocated same-size blocks.
///
/// Serving a request larger than the block size is a caller contract
/// violation, reported as an error in this checked implementation.
#[derive(Debug)]
pub struct FixedSizeResource {
    upstream: Arc<dyn MemoryResource>,
    block_size: usize,
    blocks_per_slab: usize,
    state: Mutex<FixedState>,
}

impl FixedSizeResource {
    /// Default block capacity of each slab.
    pub const DEFAULT_BLOCKS_PER_SLAB: usize = 128;

    /// Create a pool and preallocate its first slab of
    /// `blocks_to_preallocate` blocks. The block size is rounded up to the
    /// allocation granularity so every block stays properly aligned.
    pub fn try_new(
        upstream: Arc<dyn MemoryResource>,
        block_size: usize,
        blocks_to_preallocate: usize,
    ) -> MemResult<Self> {
        if block_size == 0 {
            return Err(MemError::ConfigurationError(
                "fixed-size block size cannot be zero".to_string(),
            ));
        }
        if blocks_to_preallocate == 0 {
            return Err(MemError::ConfigurationError(
                "fixed-size pool must preallocate at least one block".to_string(),
            ));
        }

        let resource = FixedSizeResource {
            upstream,
            block_size: align_up(block_size, DEFAULT_ALIGNMENT),
            blocks_per_slab: blocks_to_preallocate,
            state: Mutex::new(FixedState::default()),
        };
        {
            let mut state = resource.state.lock()?;
            resource.grow(&mut state)?;
        }
        Ok(resource)
    }

    /// Size every issued block actually occupies.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of slabs obtained from upstream so far.
    pub fn slab_count(&self) -> usize {
        self.lock_state().slabs.len()
    }

    /// Blocks currently on the free list.
    pub fn free_blocks(&self) -> usize {
        self.lock_state().free.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, FixedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Obtain one more slab from upstream and push its blocks, highest
    /// address first so blocks are issued in ascending order.
    fn grow(&self, state: &mut FixedState) -> MemResult<()> {
        let slab_size = self.block_size * self.blocks_per_slab;
        let base = self
            .upstream
            .allocate(slab_size, DEFAULT_ALIGNMENT)?
            .addr();
        state.slabs.push((base, slab_size));
        for i in (0..self.blocks_per_slab).rev() {
            state.free.push(base + i * self.block_size);
        }
        tracing::debug!(
            "fixed-size pool added a slab of {} blocks ({} bytes)",
            self.blocks_per_slab,
            slab_size
        );
        Ok(())
    }
}

impl MemoryResource for FixedSizeResource {
    fn kind(&self) -> MemoryKind {
        self.upstream.kind()
    }

    fn allocate(&self, bytes: usize, alignment: usize) -> MemResult<DevicePtr> {
        if bytes > self.block_size {
            return Err(MemError::ContractViolation(format!(
                "request of {} bytes exceeds the fixed block size {}",
                bytes, self.block_size
            )));
        }
        if !alignment.is_power_of_two() || alignment > DEFAULT_ALIGNMENT {
            return Err(MemError::ContractViolation(format!(
                "fixed-size blocks are {}-byte aligned, cannot honor alignment {}",
                DEFAULT_ALIGNMENT, alignment
            )));
        }

        let mut state = self.state.lock()?;
        if state.free.is_empty() {
            self.grow(&mut state)?;
        }
        let Some(addr) = state.free.pop() else {
            return Err(MemError::OutOfMemory {
                bytes,
                kind: self.kind(),
            });
        };
        state.issued += 1;
        tracing::trace!("fixed-size allocate: {} bytes at {:#x}", bytes, addr);
        Ok(DevicePtr::from_addr(addr))
    }

    fn deallocate(&self, ptr: DevicePtr, bytes: usize, _alignment: usize) {
        debug_assert!(
            bytes <= self.block_size,
            "deallocate size exceeds the fixed block size"
        );
        let mut state = self.lock_state();
        state.issued = state.issued.saturating_sub(1);
        state.free.push(ptr.addr());
        tracing::trace!("fixed-size deallocate: {} bytes at {:#x}", bytes, ptr.addr());
    }

    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        same_instance(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for FixedSizeResource {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if state.issued > 0 {
            tracing::warn!(
                "fixed-size pool dropped with {} outstanding blocks",
                state.issued
            );
        }
        for (base, size) in state.slabs.drain(..) {
            self.upstream
                .deallocate(DevicePtr::from_addr(base), size, DEFAULT_ALIGNMENT);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::primitive::DeviceResource;

    fn fixed(block_size: usize, count: usize) -> FixedSizeResource {
        FixedSizeResource::try_new(Arc::new(DeviceResource::new()), block_size, count).unwrap()
    }

    #[test]
    fn blocks_are_issued_in_ascending_order() {
        let pool = fixed(1024, 4);
        let a = pool.allocate(1024, 256).unwrap();
        let b = pool.allocate(1024, 256).unwrap();
        assert_eq!(b.addr(), a.addr() + 1024);
        pool.deallocate(a, 1024, 256);
        pool.deallocate(b, 1024, 256);
    }

    #[test]
    fn freed_blocks_are_reused() {
        let pool = fixed(512, 2);
        let a = pool.allocate(512, 256).unwrap();
        pool.deallocate(a, 512, 256);
        let b = pool.allocate(512, 256).unwrap();
        assert_eq!(a, b);
        pool.deallocate(b, 512, 256);
    }

    #[test]
    fn oversize_request_is_a_contract_violation() {
        let pool = fixed(1024, 2);
        let err = pool.allocate(1025, 256).unwrap_err();
        assert!(matches!(err, MemError::ContractViolation(_)));
    }

    #[test]
    fn block_size_is_rounded_to_granularity() {
        let pool = fixed(300, 2);
        assert_eq!(pool.block_size(), 512);
        // 300-byte request fits a rounded block
        let a = pool.allocate(300, 256).unwrap();
        pool.deallocate(a, 300, 256);
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let err =
            FixedSizeResource::try_new(Arc::new(DeviceResource::new()), 0, 4).unwrap_err();
        assert!(matches!(err, MemError::ConfigurationError(_)));
    }
}
