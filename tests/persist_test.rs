//! Persistence pump tests: batch triggers, last-wins coalescing,
//! drop-on-full.
//!
//! Run with: cargo test --test persist_test

use std::time::Duration;
use talon::config::PersistenceConfig;
use talon::persist::{MemorySink, PersistencePump, StorageSink};
use talon::types::DeviceKind;
use talon::Device;

fn device(mac: &str, rssi: i8) -> Device {
    let mut d = Device::new(mac.parse().unwrap());
    d.kind = DeviceKind::Station;
    d.rssi = rssi;
    d
}

fn cfg(batch: usize, interval_secs: u64, buffer: usize) -> PersistenceConfig {
    PersistenceConfig {
        enabled: true,
        batch_size: batch,
        interval: interval_secs,
        buffer_size: buffer,
    }
}

// =============================================================================
// BATCH FLUSH
// =============================================================================

#[tokio::test]
async fn test_flush_triggers_exactly_at_batch_size() {
    let sink = MemorySink::new();
    // Interval of an hour: only the batch size can trigger a flush.
    let pump = PersistencePump::new(sink.clone(), &cfg(5, 3600, 100));

    for i in 1..=4 {
        pump.persist(device(&format!("00:00:00:00:00:0{i}"), -40));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.batches(), 0, "no flush below the batch size");
    assert_eq!(sink.device_count(), 0);

    pump.persist(device("00:00:00:00:00:05", -40));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.batches(), 1);
    assert_eq!(sink.device_count(), 5);

    pump.shutdown().await;
}

#[tokio::test]
async fn test_same_mac_coalesces_to_latest() {
    let sink = MemorySink::new();
    let pump = PersistencePump::new(sink.clone(), &cfg(2, 3600, 100));

    pump.persist(device("00:00:00:00:00:01", -40));
    pump.persist(device("00:00:00:00:00:01", -70));
    tokio::time::sleep(Duration::from_millis(50)).await;
    // Two sends, one distinct MAC: still below the batch threshold.
    assert_eq!(sink.batches(), 0);

    pump.persist(device("00:00:00:00:00:02", -50));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.batches(), 1);
    assert_eq!(sink.device_count(), 2);

    let stored = sink.get("00:00:00:00:00:01".parse().unwrap()).unwrap().unwrap();
    assert_eq!(stored.rssi, -70, "sink must receive the latest value only");

    pump.shutdown().await;
}

#[tokio::test]
async fn test_interval_flush_without_full_batch() {
    let sink = MemorySink::new();
    let pump = PersistencePump::new(sink.clone(), &cfg(1000, 1, 100));

    pump.persist(device("00:00:00:00:00:01", -40));
    tokio::time::sleep(Duration::from_millis(1400)).await;
    assert_eq!(sink.device_count(), 1, "interval flush must fire");

    pump.shutdown().await;
}

// =============================================================================
// HOT-PATH PROTECTION
// =============================================================================

#[tokio::test]
async fn test_overflow_drops_instead_of_blocking() {
    let sink = MemorySink::new();
    // Tiny queue, huge batch: the worker will not keep up on purpose.
    let pump = PersistencePump::new(sink.clone(), &cfg(100_000, 3600, 4));

    let start = std::time::Instant::now();
    for i in 0..10_000u32 {
        let mac = format!(
            "00:00:00:{:02X}:{:02X}:{:02X}",
            (i >> 16) & 0xff,
            (i >> 8) & 0xff,
            i & 0xff
        );
        pump.persist(device(&mac, -40));
    }
    let elapsed = start.elapsed();

    // 10k try-sends must complete quickly — persist never blocks.
    assert!(
        elapsed < Duration::from_millis(500),
        "persist blocked the hot path: {elapsed:?}"
    );
    assert!(pump.dropped() > 0, "expected overflow drops");

    pump.shutdown().await;
}

#[tokio::test]
async fn test_disabled_is_noop_and_toggleable() {
    let sink = MemorySink::new();
    let mut config = cfg(1, 3600, 100);
    config.enabled = false;
    let pump = PersistencePump::new(sink.clone(), &config);

    pump.persist(device("00:00:00:00:00:01", -40));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.device_count(), 0);

    pump.set_enabled(true);
    pump.persist(device("00:00:00:00:00:02", -40));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.device_count(), 1);

    pump.shutdown().await;
}
