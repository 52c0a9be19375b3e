//! Fixed-size block pool integration tests

mod common;

use std::sync::Arc;

use common::CountingResource;
use hipmempool::{FixedSizeResource, MemError, MemoryResource};

const MIB: usize = 1 << 20;

#[test]
fn preallocated_blocks_never_contact_upstream() {
    let upstream = Arc::new(CountingResource::new());
    let pool = FixedSizeResource::try_new(Arc::clone(&upstream) as Arc<dyn MemoryResource>, MIB, 128).unwrap();
    assert_eq!(upstream.allocations(), 1, "one slab at construction");

    let ptrs: Vec<_> = (0..128).map(|_| pool.allocate(MIB, 256).unwrap()).collect();
    assert_eq!(upstream.allocations(), 1, "first 128 blocks come from the slab");

    // the 129th allocation triggers exactly one additional upstream request
    let extra = pool.allocate(MIB, 256).unwrap();
    assert_eq!(upstream.allocations(), 2);
    assert_eq!(pool.slab_count(), 2);

    pool.deallocate(extra, MIB, 256);
    for ptr in ptrs {
        pool.deallocate(ptr, MIB, 256);
    }
}

#[test]
fn round_trip_restores_the_free_list() {
    let pool =
        FixedSizeResource::try_new(Arc::new(CountingResource::new()), 4096, 8).unwrap();
    let before = pool.free_blocks();
    let ptr = pool.allocate(100, 256).unwrap();
    assert_eq!(pool.free_blocks(), before - 1);
    pool.deallocate(ptr, 100, 256);
    assert_eq!(pool.free_blocks(), before);
}

#[test]
fn oversize_request_is_rejected_not_undefined() {
    let pool =
        FixedSizeResource::try_new(Arc::new(CountingResource::new()), 4096, 8).unwrap();
    let err = pool.allocate(4097, 256).unwrap_err();
    assert!(matches!(err, MemError::ContractViolation(_)));
}

#[test]
fn slabs_return_upstream_only_at_drop() {
    let upstream = Arc::new(CountingResource::new());
    {
        let pool = FixedSizeResource::try_new(Arc::clone(&upstream) as Arc<dyn MemoryResource>, 4096, 4).unwrap();
        // deallocating a block never hands it back upstream
        let ptr = pool.allocate(4096, 256).unwrap();
        pool.deallocate(ptr, 4096, 256);
        assert_eq!(upstream.deallocations(), 0);
    }
    assert_eq!(upstream.allocations(), upstream.deallocations());
    assert_eq!(upstream.deallocations(), 1);
}
