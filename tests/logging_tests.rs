//! Logging adaptor integration tests

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::FailingResource;
use hipmempool::resource::logging::LOG_FILE_ENV;
use hipmempool::{DeviceResource, LoggingResource, MemError, MemoryResource};
use serial_test::serial;

fn log_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("alloc.log")
}

fn read_records(path: &PathBuf) -> Vec<Vec<String>> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect()
}

#[test]
fn n_round_trips_produce_2n_records_in_call_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir);
    let logging =
        LoggingResource::try_new(Arc::new(DeviceResource::new()), Some(path.clone())).unwrap();

    let n = 5;
    let ptrs: Vec<_> = (0..n)
        .map(|i| logging.allocate(1024 * (i + 1), 256).unwrap())
        .collect();
    for (i, ptr) in ptrs.iter().enumerate() {
        logging.deallocate(*ptr, 1024 * (i + 1), 256);
    }
    logging.flush().unwrap();

    let records = read_records(&path);
    assert_eq!(records.len(), 2 * n);
    for (i, record) in records.iter().enumerate() {
        // timestamp,thread,action,pointer,bytes,alignment
        let action = &record[2];
        if i < n {
            assert_eq!(action, "allocate");
            assert_eq!(record[4], format!("{}", 1024 * (i + 1)));
        } else {
            assert_eq!(action, "deallocate");
            assert_eq!(record[4], format!("{}", 1024 * (i - n + 1)));
        }
    }
}

#[test]
fn concurrent_callers_never_tear_log_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir);
    let logging = Arc::new(
        LoggingResource::try_new(Arc::new(DeviceResource::new()), Some(path.clone())).unwrap(),
    );

    let threads = 8;
    let rounds = 50;
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let logging = Arc::clone(&logging);
            std::thread::spawn(move || {
                for _ in 0..rounds {
                    let ptr = logging.allocate(1024, 256).unwrap();
                    logging.deallocate(ptr, 1024, 256);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    logging.flush().unwrap();

    let records = read_records(&path);
    assert_eq!(records.len(), 2 * threads * rounds);
    for record in &records {
        // a torn or interleaved line would break the field count
        assert_eq!(record.len(), 6);
        assert!(matches!(record[2].as_str(), "allocate" | "deallocate"));
        assert_eq!(record[4], "1024");
        assert_eq!(record[5], "256");
    }
}

#[test]
fn flush_makes_records_durable_before_drop() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir);
    let logging =
        LoggingResource::try_new(Arc::new(DeviceResource::new()), Some(path.clone())).unwrap();

    let ptr = logging.allocate(4096, 256).unwrap();
    logging.flush().unwrap();
    assert_eq!(read_records(&path).len(), 1, "record visible after flush");

    logging.deallocate(ptr, 4096, 256);
    drop(logging);
    assert_eq!(read_records(&path).len(), 2, "drop flushes the rest");
}

#[test]
fn failed_allocations_are_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir);
    let logging = LoggingResource::try_new(Arc::new(FailingResource), Some(path.clone())).unwrap();

    let err = logging.allocate(1 << 30, 256).unwrap_err();
    assert!(matches!(err, MemError::OutOfMemory { .. }));
    logging.flush().unwrap();

    let records = read_records(&path);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0][2], "allocate_failure");
    assert_eq!(records[0][4], format!("{}", 1 << 30));
}

#[test]
fn adaptors_over_equal_upstreams_compare_equal() {
    let dir = tempfile::tempdir().unwrap();
    // DeviceResource instances for the same device compare equal, so the
    // adaptors over them must too
    let a = LoggingResource::try_new(
        Arc::new(DeviceResource::new()),
        Some(dir.path().join("a.log")),
    )
    .unwrap();
    let b = LoggingResource::try_new(
        Arc::new(DeviceResource::new()),
        Some(dir.path().join("b.log")),
    )
    .unwrap();
    assert!(a.is_equal(&b));
    assert!(b.is_equal(&a));

    let c = LoggingResource::try_new(
        Arc::new(DeviceResource::with_device(1)),
        Some(dir.path().join("c.log")),
    )
    .unwrap();
    assert!(!a.is_equal(&c));
}

#[test]
fn logging_is_transparent_to_kind() {
    let dir = tempfile::tempdir().unwrap();
    let logging =
        LoggingResource::try_new(Arc::new(DeviceResource::new()), Some(log_path(&dir))).unwrap();
    assert_eq!(logging.kind(), hipmempool::MemoryKind::Device);
}

#[test]
#[serial]
fn env_variable_supplies_the_destination() {
    let dir = tempfile::tempdir().unwrap();
    let path = log_path(&dir);
    std::env::set_var(LOG_FILE_ENV, &path);
    let logging = LoggingResource::try_new(Arc::new(DeviceResource::new()), None).unwrap();
    std::env::remove_var(LOG_FILE_ENV);

    let ptr = logging.allocate(256, 256).unwrap();
    logging.deallocate(ptr, 256, 256);
    logging.flush().unwrap();
    assert_eq!(read_records(&path).len(), 2);
}

#[test]
#[serial]
fn missing_destination_is_a_configuration_error() {
    std::env::remove_var(LOG_FILE_ENV);
    let err = LoggingResource::try_new(Arc::new(DeviceResource::new()), None).unwrap_err();
    assert!(matches!(err, MemError::ConfigurationError(_)));
}
