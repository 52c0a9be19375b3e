//! Process-wide default-resource registry
//!
//! One slot holds the resource used by callers that don't specify one
//! explicitly. The slot is shared-ownership: replacing the default never
//! destroys the previous resource while anything still holds it, so
//! in-flight allocations remain valid to deallocate through the resource
//! that produced them.

use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;

use crate::error::MemResult;
use crate::resource::logging::LoggingResource;
use crate::resource::primitive::DeviceResource;
use crate::resource::MemoryResource;

static DEFAULT_RESOURCE: Lazy<RwLock<Option<Arc<dyn MemoryResource>>>> =
    Lazy::new(|| RwLock::new(None));

/// Install `resource` as the process-wide default, returning the previous
/// one. Safe to call concurrently with readers; observers see either the old
/// or the new resource, never a torn state.
pub fn set_default(resource: Arc<dyn MemoryResource>) -> Option<Arc<dyn MemoryResource>> {
    let mut slot = DEFAULT_RESOURCE
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    tracing::debug!("default resource replaced ({} kind)", resource.kind());
    slot.replace(resource)
}

/// The current default resource. Lazily installs a plain device resource on
/// first use when nothing has been set.
pub fn get_default() -> Arc<dyn MemoryResource> {
    {
        let slot = DEFAULT_RESOURCE
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(resource) = slot.as_ref() {
            return Arc::clone(resource);
        }
    }
    let mut slot = DEFAULT_RESOURCE
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(slot.get_or_insert_with(|| {
        tracing::debug!("installing device resource as the lazy default");
        Arc::new(DeviceResource::new())
    }))
}

/// Whether a default resource has been installed (explicitly or lazily).
pub fn is_initialized() -> bool {
    DEFAULT_RESOURCE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}

/// Flush the default resource's allocation log when it is a logging
/// adaptor; a non-logging default is a no-op.
pub fn flush_default_logs() -> MemResult<()> {
    let resource = {
        let slot = DEFAULT_RESOURCE
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        slot.as_ref().map(Arc::clone)
    };
    match resource {
        Some(resource) => match resource.as_any().downcast_ref::<LoggingResource>() {
            Some(logging) => logging.flush(),
            None => Ok(()),
        },
        None => Ok(()),
    }
}
