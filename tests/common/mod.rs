//! Shared test helpers

#![allow(dead_code)]

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};

use hipmempool::{DevicePtr, DeviceResource, MemError, MemResult, MemoryKind, MemoryResource};

/// Upstream wrapper that counts primitive requests, so tests can assert
/// exactly when a layer contacts its upstream.
#[derive(Debug)]
pub struct CountingResource {
    inner: DeviceResource,
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    last_alloc_size: AtomicUsize,
}

impl CountingResource {
    pub fn new() -> Self {
        CountingResource {
            inner: DeviceResource::new(),
            allocations: AtomicUsize::new(0),
            deallocations: AtomicUsize::new(0),
            last_alloc_size: AtomicUsize::new(0),
        }
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn deallocations(&self) -> usize {
        self.deallocations.load(Ordering::SeqCst)
    }

    pub fn last_alloc_size(&self) -> usize {
        self.last_alloc_size.load(Ordering::SeqCst)
    }
}

impl MemoryResource for CountingResource {
    fn kind(&self) -> MemoryKind {
        self.inner.kind()
    }

    fn allocate(&self, bytes: usize, alignment: usize) -> MemResult<DevicePtr> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        self.last_alloc_size.store(bytes, Ordering::SeqCst);
        self.inner.allocate(bytes, alignment)
    }

    fn deallocate(&self, ptr: DevicePtr, bytes: usize, alignment: usize) {
        self.deallocations.fetch_add(1, Ordering::SeqCst);
        self.inner.deallocate(ptr, bytes, alignment);
    }

    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        other
            .as_any()
            .downcast_ref::<CountingResource>()
            .is_some_and(|o| std::ptr::eq(self, o))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Upstream that refuses every request, for failure-path tests.
#[derive(Debug)]
pub struct FailingResource;

impl MemoryResource for FailingResource {
    fn kind(&self) -> MemoryKind {
        MemoryKind::Device
    }

    fn allocate(&self, bytes: usize, _alignment: usize) -> MemResult<DevicePtr> {
        Err(MemError::OutOfMemory {
            bytes,
            kind: self.kind(),
        })
    }

    fn deallocate(&self, _ptr: DevicePtr, _bytes: usize, _alignment: usize) {
        panic!("FailingResource never allocates, so nothing should be freed through it");
    }

    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        other
            .as_any()
            .downcast_ref::<FailingResource>()
            .is_some_and(|o| std::ptr::eq(self, o))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
