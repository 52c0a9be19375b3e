//! Coalescing best-fit pool suballocator
//!
//! Reserves large arena segments from an upstream resource and carves
//! requests out of a free-block index. Freed blocks are merged with their
//! address-adjacent neighbors immediately, so fragmentation stays bounded by
//! coalescing alone; compaction is impossible without relocating live
//! pointers and is out of scope.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{MemError, MemResult};
use crate::resource::{
    align_up, same_instance, DevicePtr, MemoryKind, MemoryResource, DEFAULT_ALIGNMENT,
};

/// Every reserved block is a multiple of this, so any split remainder can be
/// reinserted as a valid free block and coalescing stays exact.
pub const ALLOCATION_GRANULARITY: usize = DEFAULT_ALIGNMENT;

/// Growth policy for a [`PoolResource`] arena.
///
/// The exhaustion policy is doubling-with-cap by default: the first grow
/// reserves `initial_size` bytes, each subsequent grow multiplies the
/// increment by `growth_factor`, and `maximum_size` caps the total reserved
/// from upstream.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Size of the segment reserved at construction; also the first growth
    /// increment.
    pub initial_size: usize,
    /// Upper bound on total bytes reserved from upstream; `None` leaves
    /// growth uncapped.
    pub maximum_size: Option<usize>,
    /// Multiplier applied to the growth increment after each grow.
    pub growth_factor: usize,
}

impl PoolOptions {
    pub fn new(initial_size: usize) -> Self {
        PoolOptions {
            initial_size,
            maximum_size: None,
            growth_factor: 2,
        }
    }

    pub fn with_maximum(mut self, maximum_size: usize) -> Self {
        self.maximum_size = Some(maximum_size);
        self
    }

    pub fn with_growth_factor(mut self, growth_factor: usize) -> Self {
        self.growth_factor = growth_factor;
        self
    }
}

/// A contiguous arena region obtained from upstream, owned by the pool until
/// the pool itself is dropped.
#[derive(Debug, Clone, Copy)]
struct Segment {
    base: usize,
    size: usize,
}

impl Segment {
    fn end(&self) -> usize {
        self.base + self.size
    }

    fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end()
    }
}

#[derive(Debug, Default)]
struct PoolState {
    /// Arena segments sorted by base address.
    segments: Vec<Segment>,
    /// Free blocks keyed by address; values are sizes. Adjacency detection
    /// runs on this ordering.
    free_by_addr: BTreeMap<usize, usize>,
    /// Best-fit index as (size, addr); equal sizes issue the lowest address
    /// for determinism.
    free_by_size: BTreeSet<(usize, usize)>,
    /// Issued blocks keyed by address, recording the reserved size so a
    /// deallocate reinserts exactly what the allocate carved out.
    issued: HashMap<usize, usize>,
    /// Total bytes reserved from upstream.
    reserved: usize,
    /// Segment size for the next grow.
    next_increment: usize,
}

/// Coalescing best-fit suballocator over a growable arena.
///
/// All state lives behind one mutex, so concurrent allocate/deallocate calls
/// on the same pool are serialized internally.
#[derive(Debug)]
pub struct PoolResource {
    upstream: Arc<dyn MemoryResource>,
    options: PoolOptions,
    state: Mutex<PoolState>,
}

impl PoolResource {
    /// Create a pool and reserve its initial segment from `upstream`.
    pub fn try_new(upstream: Arc<dyn MemoryResource>, options: PoolOptions) -> MemResult<Self> {
        if options.initial_size == 0 {
            return Err(MemError::ConfigurationError(
                "pool initial size cannot be zero".to_string(),
            ));
        }
        if options.growth_factor < 2 {
            return Err(MemError::ConfigurationError(format!(
                "pool growth factor must be at least 2, got {}",
                options.growth_factor
            )));
        }
        let initial = align_up(options.initial_size, ALLOCATION_GRANULARITY);
        if let Some(max) = options.maximum_size {
            if max < initial {
                return Err(MemError::ConfigurationError(format!(
                    "pool maximum size {} is below the initial size {}",
                    max, initial
                )));
            }
        }

        let pool = PoolResource {
            upstream,
            options,
            state: Mutex::new(PoolState::default()),
        };
        {
            let mut state = pool.state.lock()?;
            state.next_increment = initial;
            pool.grow_for(&mut state, initial)?;
        }
        Ok(pool)
    }

    /// Total bytes currently free across all segments.
    pub fn free_bytes(&self) -> usize {
        self.lock_state().free_by_addr.values().sum()
    }

    /// Number of free blocks in the index. With full coalescing this is one
    /// per segment once everything has been deallocated.
    pub fn free_block_count(&self) -> usize {
        self.lock_state().free_by_addr.len()
    }

    /// Number of arena segments obtained from upstream.
    pub fn segment_count(&self) -> usize {
        self.lock_state().segments.len()
    }

    /// Total bytes reserved from upstream.
    pub fn reserved_bytes(&self) -> usize {
        self.lock_state().reserved
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserved size of a request: at least one granule, so zero-byte
    /// requests get a unique address, and always a granule multiple.
    fn reserved_size(bytes: usize) -> usize {
        align_up(bytes.max(1), ALLOCATION_GRANULARITY)
    }

    fn insert_free(state: &mut PoolState, addr: usize, size: usize) {
        state.free_by_addr.insert(addr, size);
        state.free_by_size.insert((size, addr));
    }

    fn take_free(state: &mut PoolState, addr: usize) -> Option<usize> {
        let size = state.free_by_addr.remove(&addr)?;
        state.free_by_size.remove(&(size, addr));
        Some(size)
    }

    /// Smallest free block that can hold `size` bytes at `alignment`, ties
    /// broken by lowest address. Returns (block addr, block size, aligned
    /// issue addr).
    fn find_best_fit(
        state: &PoolState,
        size: usize,
        alignment: usize,
    ) -> Option<(usize, usize, usize)> {
        for &(block_size, addr) in state.free_by_size.range((size, 0)..) {
            let aligned = align_up(addr, alignment);
            let padding = aligned - addr;
            if block_size >= padding && block_size - padding >= size {
                return Some((addr, block_size, aligned));
            }
        }
        None
    }

    /// Obtain one more segment from upstream, sized at least `at_least`
    /// (which must already be a granule multiple), honoring the growth
    /// increment and the configured maximum.
    fn grow_for(&self, state: &mut PoolState, at_least: usize) -> MemResult<()> {
        let mut want = at_least.max(state.next_increment);
        if let Some(max) = self.options.maximum_size {
            let headroom = max.saturating_sub(state.reserved);
            if headroom < at_least {
                tracing::warn!(
                    "pool exhausted: need {} bytes but only {} below the configured maximum",
                    at_least,
                    headroom
                );
                return Err(MemError::OutOfMemory {
                    bytes: at_least,
                    kind: self.kind(),
                });
            }
            want = want.min(headroom);
        }
        let size = align_up(want, ALLOCATION_GRANULARITY);

        let base = self.upstream.allocate(size, ALLOCATION_GRANULARITY)?;
        let segment = Segment {
            base: base.addr(),
            size,
        };
        let pos = state.segments.partition_point(|s| s.base < segment.base);
        state.segments.insert(pos, segment);
        Self::insert_free(state, segment.base, segment.size);
        state.reserved += size;

        state.next_increment = state
            .next_increment
            .saturating_mul(self.options.growth_factor);
        if let Some(max) = self.options.maximum_size {
            state.next_increment = state.next_increment.min(max);
        }

        tracing::debug!(
            "pool grew by {} bytes ({} segments, {} bytes reserved)",
            size,
            state.segments.len(),
            state.reserved
        );
        Ok(())
    }

    /// Re-insert a freed block, merging with any address-adjacent free
    /// neighbor inside the same segment.
    fn insert_and_coalesce(state: &mut PoolState, mut addr: usize, mut size: usize) {
        let segment = state.segments.iter().copied().find(|s| s.contains(addr));
        let Some(segment) = segment else {
            debug_assert!(false, "freed block outside every segment");
            tracing::error!("pool freed block at {:#x} outside every segment", addr);
            Self::insert_free(state, addr, size);
            return;
        };

        let prev = state
            .free_by_addr
            .range(..addr)
            .next_back()
            .map(|(&a, &s)| (a, s));
        if let Some((prev_addr, prev_size)) = prev {
            if prev_addr + prev_size == addr && prev_addr >= segment.base {
                Self::take_free(state, prev_addr);
                addr = prev_addr;
                size += prev_size;
            }
        }

        let next = state
            .free_by_addr
            .range(addr + size..)
            .next()
            .map(|(&a, &s)| (a, s));
        if let Some((next_addr, next_size)) = next {
            if addr + size == next_addr && next_addr < segment.end() {
                Self::take_free(state, next_addr);
                size += next_size;
            }
        }

        Self::insert_free(state, addr, size);
    }
}

impl MemoryResource for PoolResource {
    fn kind(&self) -> MemoryKind {
        self.upstream.kind()
    }

    fn allocate(&self, bytes: usize, alignment: usize) -> MemResult<DevicePtr> {
        if !alignment.is_power_of_two() {
            return Err(MemError::ContractViolation(format!(
                "alignment must be a power of two, got {}",
                alignment
            )));
        }
        let reserved = Self::reserved_size(bytes);
        let alignment = alignment.max(ALLOCATION_GRANULARITY);

        let mut state = self.state.lock()?;

        let fit = match Self::find_best_fit(&state, reserved, alignment) {
            Some(fit) => fit,
            None => {
                // over-aligned requests may need padding inside the new
                // segment, so reserve slack for it
                let want = if alignment > ALLOCATION_GRANULARITY {
                    reserved + alignment
                } else {
                    reserved
                };
                self.grow_for(&mut state, want)?;
                Self::find_best_fit(&state, reserved, alignment).ok_or(MemError::OutOfMemory {
                    bytes,
                    kind: self.kind(),
                })?
            }
        };

        let (addr, block_size, aligned) = fit;
        let taken = Self::take_free(&mut state, addr);
        debug_assert_eq!(taken, Some(block_size));

        let padding = aligned - addr;
        let remainder = block_size - padding - reserved;
        if padding > 0 {
            Self::insert_free(&mut state, addr, padding);
        }
        if remainder > 0 {
            Self::insert_free(&mut state, aligned + reserved, remainder);
        }
        state.issued.insert(aligned, reserved);

        tracing::trace!(
            "pool allocate: {} bytes ({} reserved) at {:#x}",
            bytes,
            reserved,
            aligned
        );
        Ok(DevicePtr::from_addr(aligned))
    }

    fn deallocate(&self, ptr: DevicePtr, bytes: usize, _alignment: usize) {
        let mut state = self.lock_state();
        let addr = ptr.addr();
        let Some(reserved) = state.issued.remove(&addr) else {
            tracing::error!(
                "pool deallocate of unknown pointer {:#x} ({} bytes)",
                addr,
                bytes
            );
            debug_assert!(false, "pool deallocate of unknown pointer");
            return;
        };
        debug_assert!(
            Self::reserved_size(bytes) <= reserved,
            "deallocate size disagrees with the allocation"
        );

        Self::insert_and_coalesce(&mut state, addr, reserved);
        tracing::trace!("pool deallocate: {} bytes at {:#x}", bytes, addr);
    }

    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        same_instance(self, other)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for PoolResource {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.issued.is_empty() {
            tracing::warn!(
                "pool dropped with {} outstanding allocations",
                state.issued.len()
            );
        }
        for segment in state.segments.drain(..) {
            self.upstream.deallocate(
                DevicePtr::from_addr(segment.base),
                segment.size,
                ALLOCATION_GRANULARITY,
            );
        }
    }
}
