//! Coordinator tests: enrichment, smart targeting, auditing.
//!
//! Run with: cargo test --test coordinator_test

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use talon::attack::{
    AttackCoordinator, AttackError, DeauthConfig, DeauthEngine, DeauthType, EngineCore,
    InterfaceInfo, InterfaceProvider,
};
use talon::audit::AuditLog;
use talon::radio::{Injector, MonitorEvent, RadioError};
use talon::registry::DeviceRegistry;
use talon::types::{now, DeviceKind, MacAddr};
use talon::Device;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct RecordingInjector {
    interface: String,
    sent: AtomicU64,
    frames: Mutex<Vec<Vec<u8>>>,
}

impl Injector for RecordingInjector {
    fn interface(&self) -> &str {
        &self.interface
    }
    fn inject(&self, frame: &[u8]) -> Result<(), RadioError> {
        self.frames.lock().push(frame.to_vec());
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
    fn injected(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
    fn inject_errors(&self) -> u64 {
        0
    }
    fn close(&self) {}
    fn optimize_for_injection(&self) {}
    fn start_monitor(&self, _: CancellationToken, _: MacAddr, _: mpsc::Sender<MonitorEvent>) {}
    fn sniff_sequence_number(&self, _: MacAddr, _: Duration) -> u16 {
        0x0200
    }
}

struct StubProvider {
    infos: Vec<InterfaceInfo>,
}

impl InterfaceProvider for StubProvider {
    fn interfaces(&self) -> Vec<InterfaceInfo> {
        self.infos.clone()
    }
}

const AP: &str = "AA:BB:CC:DD:EE:FF";
const STATION: &str = "11:22:33:44:55:66";

fn seeded_registry() -> Arc<DeviceRegistry> {
    let registry = Arc::new(DeviceRegistry::new());

    let mut ap = Device::new(AP.parse().unwrap());
    ap.kind = DeviceKind::AccessPoint;
    ap.ssid = "corp".into();
    ap.channel = 6;
    registry.process(ap);

    let mut station = Device::new(STATION.parse().unwrap());
    station.kind = DeviceKind::Station;
    station.connected_bssid = Some(AP.parse().unwrap());
    station.last_packet = now();
    registry.process(station);

    // An older station on the same AP must lose the recency contest.
    let mut old = Device::new("77:88:99:AA:BB:CC".parse().unwrap());
    old.kind = DeviceKind::Station;
    old.connected_bssid = Some(AP.parse().unwrap());
    old.first_seen = 1;
    old.last_seen = 1;
    old.last_packet = 1;
    registry.load(old);

    registry
}

fn coordinator(registry: Arc<DeviceRegistry>, audit: Arc<AuditLog>) -> AttackCoordinator {
    let injector = Arc::new(RecordingInjector {
        interface: "wlan0".into(),
        sent: AtomicU64::new(0),
        frames: Mutex::new(Vec::new()),
    });
    let deauth = DeauthEngine::new(
        EngineCore::new("deauth", 5, None, None, Some(injector)),
        false,
    );
    let provider = Arc::new(StubProvider {
        infos: vec![InterfaceInfo {
            name: "wlan0".into(),
            channels: (1..=11).collect(),
        }],
    });
    AttackCoordinator::new(registry, audit, Some(provider), Some(deauth), None, None)
}

#[tokio::test]
async fn test_smart_targeting_upgrades_broadcast() {
    let registry = seeded_registry();
    let audit = Arc::new(AuditLog::new());
    let coordinator = coordinator(registry, audit.clone());

    let id = coordinator
        .start_deauth(DeauthConfig {
            target: AP.parse().unwrap(),
            deauth_type: DeauthType::Broadcast,
            channel: 6,
            packet_count: 2,
            packet_interval_ms: 5,
            ..Default::default()
        })
        .await
        .unwrap();

    // The dispatched config was upgraded to target the live client.
    let snap = coordinator.deauth_status(id).unwrap();
    assert_eq!(snap.config["deauth-type"], "targeted");
    assert_eq!(snap.config["client"], STATION);
    assert_eq!(snap.config["channel"], 6);

    assert!(audit.contains("Upgraded Broadcast -> Targeted"));
    assert!(audit.contains("Deauth started against"));

    coordinator.stop_all();
}

#[tokio::test]
async fn test_channel_autofill_from_registry() {
    let registry = seeded_registry();
    let audit = Arc::new(AuditLog::new());
    let coordinator = coordinator(registry, audit);

    let id = coordinator
        .start_deauth(DeauthConfig {
            target: AP.parse().unwrap(),
            deauth_type: DeauthType::Unicast,
            client: Some(STATION.parse().unwrap()),
            channel: 0, // to be filled from the registry
            packet_count: 1,
            packet_interval_ms: 5,
            ..Default::default()
        })
        .await
        .unwrap();

    let snap = coordinator.deauth_status(id).unwrap();
    assert_eq!(snap.config["channel"], 6);
    assert_eq!(snap.config["interface"], "wlan0");
    coordinator.stop_all();
}

#[tokio::test]
async fn test_unknown_target_with_no_channel_is_rejected() {
    let registry = Arc::new(DeviceRegistry::new());
    let audit = Arc::new(AuditLog::new());
    let coordinator = coordinator(registry, audit.clone());

    let err = coordinator
        .start_deauth(DeauthConfig {
            target: "00:DE:AD:BE:EF:00".parse().unwrap(),
            deauth_type: DeauthType::Broadcast,
            channel: 0,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AttackError::NotFound(_)));
    // Rejected starts are not audited as started.
    assert!(!audit.contains("Deauth started"));
}

#[tokio::test]
async fn test_missing_engine_is_guarded() {
    let registry = seeded_registry();
    let audit = Arc::new(AuditLog::new());
    let coordinator = AttackCoordinator::new(registry, audit, None, None, None, None);

    let err = coordinator
        .start_deauth(DeauthConfig {
            target: AP.parse().unwrap(),
            channel: 6,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AttackError::EngineNotInitialized("deauth")));

    let err = coordinator
        .start_wps(talon::attack::WpsConfig {
            target: AP.parse().unwrap(),
            channel: 6,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AttackError::EngineNotInitialized(_)));
}

#[tokio::test]
async fn test_stop_is_audited_with_force_flag() {
    let registry = seeded_registry();
    let audit = Arc::new(AuditLog::new());
    let coordinator = coordinator(registry, audit.clone());

    let id = coordinator
        .start_deauth(DeauthConfig {
            target: AP.parse().unwrap(),
            deauth_type: DeauthType::Unicast,
            client: Some(STATION.parse().unwrap()),
            channel: 6,
            packet_count: 0,
            packet_interval_ms: 20,
            ..Default::default()
        })
        .await
        .unwrap();

    coordinator.stop_deauth(id, true).unwrap();
    assert!(audit.contains("force=true"));
}
