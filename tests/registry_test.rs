//! Registry concurrency tests: merge serialization under parallel
//! intake.
//!
//! Run with: cargo test --test registry_test

use std::sync::Arc;
use talon::registry::DeviceRegistry;
use talon::types::DeviceKind;
use talon::Device;

fn observation(mac: &str, packets: u64) -> Device {
    let mut d = Device::new(mac.parse().unwrap());
    d.kind = DeviceKind::Station;
    d.packets = packets;
    d
}

// =============================================================================
// SERIALIZED MERGES
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_process_loses_no_counter_updates() {
    let registry = Arc::new(DeviceRegistry::new());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    registry.process(observation("00:11:22:33:44:55", 1));
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let device = registry.get("00:11:22:33:44:55".parse().unwrap()).unwrap();
    assert_eq!(device.packets, 800, "monotonic counter lost updates");
    assert_eq!(registry.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_distinct_macs_land_in_shards() {
    let registry = Arc::new(DeviceRegistry::new());

    let tasks: Vec<_> = (0..8u8)
        .map(|worker| {
            let registry = registry.clone();
            tokio::spawn(async move {
                for i in 0..50u8 {
                    let mac = format!("00:11:22:33:{worker:02X}:{i:02X}");
                    registry.process(observation(&mac, 1));
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(registry.len(), 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handshake_flag_survives_concurrent_merges() {
    let registry = Arc::new(DeviceRegistry::new());

    let mut with_handshake = observation("00:11:22:33:44:55", 0);
    with_handshake.handshake_captured = true;
    registry.process(with_handshake);

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    registry.process(observation("00:11:22:33:44:55", 1));
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let device = registry.get("00:11:22:33:44:55".parse().unwrap()).unwrap();
    assert!(device.handshake_captured, "handshake flag must be monotonic");
    assert!(device.first_seen <= device.last_packet);
    assert!(device.last_packet <= device.last_seen);
}
