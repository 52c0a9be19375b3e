//! Primitive HIP allocation backend
//!
//! Exposes the small set of coarse-grained platform calls everything else is
//! built on: raw device allocation, managed/unified allocation, pinned host
//! allocation, and stream management.
//!
//! With the `rocm` feature the real HIP runtime is linked. Without it a
//! host-backed stand-in with the same surface is compiled instead, so the
//! suballocation algorithms and the test suite run without a GPU.

#[cfg(feature = "rocm")]
pub(crate) mod ffi;
#[cfg(not(feature = "rocm"))]
#[path = "host_stub.rs"]
pub(crate) mod ffi;

mod stream;

pub use stream::Stream;
