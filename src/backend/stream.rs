//! HIP stream wrapper

use std::ptr;

use crate::backend::ffi;
use crate::error::{MemError, MemResult};

// SAFETY: Stream is Send+Sync because it only contains a raw pointer and the
// HIP runtime permits stream handles to be used from any thread.
// NOTE: Stream does NOT implement Clone because cloning the raw handle would
// cause a double-destroy when both instances are dropped.
unsafe impl Send for Stream {}
unsafe impl Sync for Stream {}

/// HIP stream wrapper.
///
/// A stream is the ordering domain for stream-ordered allocation: memory
/// returned by an async allocate on a stream may be used on that stream
/// without further synchronization.
///
/// `Stream::new` creates an owned stream destroyed on drop; `Stream::null`
/// refers to the legacy default stream and owns nothing.
#[derive(Debug)]
pub struct Stream {
    stream: *mut std::ffi::c_void,
    owned: bool,
}

impl Stream {
    /// Create a new HIP stream.
    pub fn new() -> MemResult<Self> {
        let mut stream: *mut std::ffi::c_void = ptr::null_mut();

        let result = unsafe { ffi::hipStreamCreate(&mut stream) };
        if result != ffi::HIP_SUCCESS {
            return Err(MemError::DeviceError(format!(
                "hipStreamCreate failed with code {}",
                result
            )));
        }
        if stream.is_null() {
            return Err(MemError::DeviceError(
                "hipStreamCreate returned null pointer".to_string(),
            ));
        }

        tracing::debug!("Stream::new: created HIP stream {:?}", stream);
        Ok(Stream { stream, owned: true })
    }

    /// The legacy default stream.
    pub fn null() -> Self {
        Stream {
            stream: ptr::null_mut(),
            owned: false,
        }
    }

    /// Whether this handle refers to the default stream.
    pub fn is_default(&self) -> bool {
        self.stream.is_null()
    }

    /// Block until all work enqueued on this stream has completed.
    pub fn synchronize(&self) -> MemResult<()> {
        let result = unsafe { ffi::hipStreamSynchronize(self.stream) };
        if result != ffi::HIP_SUCCESS {
            return Err(MemError::DeviceError(format!(
                "hipStreamSynchronize failed with code {}",
                result
            )));
        }
        Ok(())
    }

    /// Get raw stream handle for FFI calls.
    pub fn as_ptr(&self) -> *mut std::ffi::c_void {
        self.stream
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.owned && !self.stream.is_null() {
            unsafe {
                ffi::hipStreamDestroy(self.stream);
            }
        }
    }
}
