//! Logging adaptor
//!
//! Wraps exactly one upstream resource and appends a line-oriented record
//! for every allocation event. Logging is best effort: a sink that cannot be
//! written never fails the forwarded call, and the deferred write error
//! surfaces through [`LoggingResource::flush`] instead.
//!
//! Record format, one event per line:
//!
//! ```text
//! timestamp_micros,thread,action,pointer,bytes,alignment
//! ```

use std::any::Any;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{MemError, MemResult};
use crate::resource::{same_instance, DevicePtr, MemoryKind, MemoryResource};

/// Environment variable consulted when no explicit log path is given.
pub const LOG_FILE_ENV: &str = "HIPMEMPOOL_LOG_FILE";

/// Kind of event captured by a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAction {
    Allocate,
    Deallocate,
    AllocateFailure,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::Allocate => "allocate",
            LogAction::Deallocate => "deallocate",
            LogAction::AllocateFailure => "allocate_failure",
        }
    }
}

#[derive(Debug)]
struct LogSink {
    writer: BufWriter<std::fs::File>,
    deferred_error: Option<String>,
}

/// Adaptor that records every allocation event of the resource it wraps.
///
/// Appends are serialized by an internal mutex, so records from concurrent
/// callers never interleave within a line.
#[derive(Debug)]
pub struct LoggingResource {
    upstream: Arc<dyn MemoryResource>,
    sink: Mutex<LogSink>,
}

impl LoggingResource {
    /// Wrap `upstream`, writing records to `path`. When `path` is `None`
    /// the `HIPMEMPOOL_LOG_FILE` environment variable supplies the
    /// destination; neither being set is a configuration error, never a
    /// silent no-op.
    pub fn try_new(upstream: Arc<dyn MemoryResource>, path: Option<PathBuf>) -> MemResult<Self> {
        let path = match path {
            Some(path) => path,
            None => std::env::var_os(LOG_FILE_ENV)
                .map(PathBuf::from)
                .ok_or_else(|| {
                    MemError::ConfigurationError(format!(
                        "no log destination: pass a path or set {}",
                        LOG_FILE_ENV
                    ))
                })?,
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| {
                MemError::ConfigurationError(format!(
                    "cannot open log file {}: {}",
                    path.display(),
                    err
                ))
            })?;
        tracing::debug!("allocation log opened at {}", path.display());
        Ok(LoggingResource {
            upstream,
            sink: Mutex::new(LogSink {
                writer: BufWriter::new(file),
                deferred_error: None,
            }),
        })
    }

    /// The resource this adaptor wraps.
    pub fn upstream(&self) -> &Arc<dyn MemoryResource> {
        &self.upstream
    }

    /// Flush buffered records to the sink. Reports any write error deferred
    /// since the last flush; the forwarded allocations themselves were not
    /// affected by it.
    pub fn flush(&self) -> MemResult<()> {
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = sink.writer.flush() {
            return Err(MemError::LogSink(err.to_string()));
        }
        if let Some(err) = sink.deferred_error.take() {
            return Err(MemError::LogSink(err));
        }
        Ok(())
    }

    fn record(&self, action: LogAction, ptr: Option<DevicePtr>, bytes: usize, alignment: usize) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros())
            .unwrap_or(0);
        let thread = std::thread::current().id();
        let addr = ptr.map_or(0, |p| p.addr());

        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        let outcome = writeln!(
            sink.writer,
            "{},{:?},{},{:#x},{},{}",
            timestamp,
            thread,
            action.as_str(),
            addr,
            bytes,
            alignment
        );
        if let Err(err) = outcome {
            // keep the first failure; the allocation already succeeded
            if sink.deferred_error.is_none() {
                sink.deferred_error = Some(err.to_string());
            }
        }
    }
}

impl MemoryResource for LoggingResource {
    fn kind(&self) -> MemoryKind {
        self.upstream.kind()
    }

    fn allocate(&self, bytes: usize, alignment: usize) -> MemResult<DevicePtr> {
        match self.upstream.allocate(bytes, alignment) {
            Ok(ptr) => {
                self.record(LogAction::Allocate, Some(ptr), bytes, alignment);
                Ok(ptr)
            }
            Err(err) => {
                self.record(LogAction::AllocateFailure, None, bytes, alignment);
                Err(err)
            }
        }
    }

    fn deallocate(&self, ptr: DevicePtr, bytes: usize, alignment: usize) {
        self.upstream.deallocate(ptr, bytes, alignment);
        self.record(LogAction::Deallocate, Some(ptr), bytes, alignment);
    }

    /// Two logging adaptors are interchangeable exactly when the resources
    /// they wrap are, so logging stays transparent to equality-based
    /// protocols.
    fn is_equal(&self, other: &dyn MemoryResource) -> bool {
        match other.as_any().downcast_ref::<LoggingResource>() {
            Some(other) => self.upstream.is_equal(other.upstream.as_ref()),
            None => same_instance(self, other),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for LoggingResource {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::error!("failed to flush allocation log on drop: {}", err);
        }
    }
}
