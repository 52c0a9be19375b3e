//! Unified error handling for hipmempool
//!
//! Allocation failure is always reported with the requested size and the
//! memory kind that failed. Deallocation has no failure mode: contract
//! violations on the free path are logged and asserted in debug builds
//! rather than propagated.

use std::sync::PoisonError;

use thiserror::Error;

use crate::resource::MemoryKind;

/// Error type shared by every resource in the crate.
#[derive(Error, Debug, Clone)]
pub enum MemError {
    /// No resource in the chain could satisfy the request, growth included.
    #[error("out of memory: failed to allocate {bytes} bytes of {kind} memory")]
    OutOfMemory { bytes: usize, kind: MemoryKind },

    /// The underlying platform call failed for a reason other than exhaustion.
    #[error("device error: {0}")]
    DeviceError(String),

    /// A resource was composed with invalid parameters.
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// The caller broke the allocator contract (oversize fixed-block request,
    /// unsupported alignment, mismatched deallocate arguments).
    #[error("allocator contract violation: {0}")]
    ContractViolation(String),

    /// The allocation log could not be written. Logging is best effort, so
    /// this only surfaces through `LoggingResource::flush`.
    #[error("log sink failure: {0}")]
    LogSink(String),

    #[error("internal lock poisoned - this indicates a bug: {0}")]
    LockPoisoned(String),
}

impl<T> From<PoisonError<T>> for MemError {
    fn from(err: PoisonError<T>) -> Self {
        MemError::LockPoisoned(format!("lock poisoned: {}", err))
    }
}

/// Result type shared by every resource in the crate.
pub type MemResult<T> = Result<T, MemError>;
