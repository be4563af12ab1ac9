//! Attack engine tests: burst sequences, cancellation bounds, the
//! controller contract.
//!
//! Run with: cargo test --test attack_test

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use talon::attack::{
    AttackError, AttackStatus, AuthFloodConfig, AuthFloodEngine, AuthFloodType, DeauthConfig,
    DeauthEngine, DeauthType, EngineCore,
};
use talon::radio::frames::{kind_of, FrameKind, RADIOTAP_LEN};
use talon::radio::{Injector, MonitorEvent, RadioError};
use talon::types::MacAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Injector fake that records every frame it is asked to transmit.
struct RecordingInjector {
    interface: String,
    frames: Mutex<Vec<Vec<u8>>>,
    sent: AtomicU64,
}

impl RecordingInjector {
    fn new(interface: &str) -> Arc<Self> {
        Arc::new(Self {
            interface: interface.to_string(),
            frames: Mutex::new(Vec::new()),
            sent: AtomicU64::new(0),
        })
    }

    fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }
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

    fn start_monitor(
        &self,
        _token: CancellationToken,
        _target: MacAddr,
        _events: mpsc::Sender<MonitorEvent>,
    ) {
    }

    fn sniff_sequence_number(&self, _target: MacAddr, _window: Duration) -> u16 {
        0x0100
    }
}

fn deauth_engine(injector: Arc<RecordingInjector>, max: usize) -> Arc<DeauthEngine> {
    DeauthEngine::new(
        EngineCore::new("deauth", max, None, None, Some(injector)),
        false,
    )
}

async fn wait_terminal(engine: &DeauthEngine, id: Uuid) -> AttackStatus {
    for _ in 0..200 {
        let snap = engine.status(id).unwrap();
        if snap.status.is_terminal() {
            return snap.status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("attack {id} never reached a terminal state");
}

fn seq_of(frame: &[u8]) -> u16 {
    u16::from_le_bytes([frame[RADIOTAP_LEN + 22], frame[RADIOTAP_LEN + 23]]) >> 4
}

// =============================================================================
// BURST SEQUENCE
// =============================================================================

#[tokio::test]
async fn test_broadcast_burst_frame_sequence() {
    let injector = RecordingInjector::new("wlan0");
    let engine = deauth_engine(injector.clone(), 5);

    let id = engine
        .start(DeauthConfig {
            target: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            deauth_type: DeauthType::Broadcast,
            packet_count: 6,
            packet_interval_ms: 5,
            reason_code: 7,
            ..Default::default()
        })
        .await
        .unwrap();

    let status = wait_terminal(&engine, id).await;
    assert_eq!(status, AttackStatus::Success);

    let frames = injector.frames();
    assert_eq!(frames.len(), 6);

    let kinds: Vec<FrameKind> = frames.iter().map(|f| kind_of(f).unwrap()).collect();
    assert_eq!(
        kinds,
        vec![
            FrameKind::Csa,
            FrameKind::Deauth,
            FrameKind::Deauth,
            FrameKind::Disassoc,
            FrameKind::Deauth,
            FrameKind::Deauth,
        ]
    );

    for frame in &frames {
        // Every destination is broadcast, every source the BSSID.
        assert_eq!(&frame[RADIOTAP_LEN + 4..RADIOTAP_LEN + 10], &[0xff; 6]);
        assert_eq!(
            &frame[RADIOTAP_LEN + 10..RADIOTAP_LEN + 16],
            "AA:BB:CC:DD:EE:FF".parse::<MacAddr>().unwrap().as_bytes()
        );
        // Deauth/disassoc carry the configured reason.
        if kind_of(frame) != Some(FrameKind::Csa) {
            assert_eq!(&frame[frame.len() - 2..], &[7, 0]);
        }
    }

    // Sequence numbers strictly increase (modulo the 12-bit wrap).
    for pair in frames.windows(2) {
        let step = (u32::from(seq_of(&pair[1])) + 4096 - u32::from(seq_of(&pair[0]))) % 4096;
        assert!(step >= 1 && step <= 8, "non-monotonic sequence step {step}");
    }

    assert_eq!(engine.status(id).unwrap().packets_sent, 6);
    assert!(engine.status(id).unwrap().ended_at.is_some());
}

#[tokio::test]
async fn test_targeted_burst_emits_pairs() {
    let injector = RecordingInjector::new("wlan0");
    let engine = deauth_engine(injector.clone(), 5);

    let id = engine
        .start(DeauthConfig {
            target: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            client: Some("11:22:33:44:55:66".parse().unwrap()),
            deauth_type: DeauthType::Targeted,
            packet_count: 3,
            packet_interval_ms: 5,
            ..Default::default()
        })
        .await
        .unwrap();
    wait_terminal(&engine, id).await;

    // Iteration 0 is a single CSA, 1 and 2 are deauth pairs: 5 frames.
    let frames = injector.frames();
    assert_eq!(frames.len(), 5);
    assert_eq!(kind_of(&frames[0]), Some(FrameKind::Csa));
    assert_eq!(engine.status(id).unwrap().packets_sent, 5);
}

// =============================================================================
// CANCELLATION
// =============================================================================

#[tokio::test]
async fn test_continuous_attack_stops_within_bound() {
    let injector = RecordingInjector::new("wlan0");
    let engine = deauth_engine(injector.clone(), 5);

    let interval_ms = 50u64;
    let id = engine
        .start(DeauthConfig {
            target: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            deauth_type: DeauthType::Broadcast,
            packet_count: 0,
            packet_interval_ms: interval_ms,
            ..Default::default()
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(injector.injected() >= 2);
    engine.stop(id, false).unwrap();

    // Within 2 × interval + 100 ms the worker must have gone quiet.
    tokio::time::sleep(Duration::from_millis(2 * interval_ms + 100)).await;
    let settled = injector.injected();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(injector.injected(), settled, "injections after cancellation");

    let snap = engine.status(id).unwrap();
    assert_eq!(snap.status, AttackStatus::Stopped);
    assert!(snap.ended_at.is_some());
    assert_eq!(snap.error.as_deref(), Some("Stopped by user"));
}

// =============================================================================
// ENGINE CONTRACT
// =============================================================================

#[tokio::test]
async fn test_max_concurrent_enforced() {
    let injector = RecordingInjector::new("wlan0");
    let engine = deauth_engine(injector.clone(), 1);

    let cfg = DeauthConfig {
        target: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
        deauth_type: DeauthType::Broadcast,
        packet_count: 0,
        packet_interval_ms: 20,
        ..Default::default()
    };
    let id = engine.start(cfg.clone()).await.unwrap();

    match engine.start(cfg.clone()).await {
        Err(AttackError::ResourceExhausted { limit }) => assert_eq!(limit, 1),
        other => panic!("expected ResourceExhausted, got {other:?}"),
    }

    engine.stop(id, false).unwrap();
    wait_terminal(&engine, id).await;
    // Terminal attacks do not hold a slot.
    let id2 = engine.start(cfg).await.unwrap();
    engine.stop(id2, false).unwrap();
}

#[tokio::test]
async fn test_stop_all_and_sweep() {
    let injector = RecordingInjector::new("wlan0");
    let engine = deauth_engine(injector.clone(), 5);

    let cfg = DeauthConfig {
        target: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
        deauth_type: DeauthType::Broadcast,
        packet_count: 0,
        packet_interval_ms: 20,
        ..Default::default()
    };
    let a = engine.start(cfg.clone()).await.unwrap();
    let b = engine.start(cfg).await.unwrap();

    engine.stop_all();
    wait_terminal(&engine, a).await;
    wait_terminal(&engine, b).await;

    assert_eq!(engine.list().len(), 2);
    assert_eq!(engine.sweep_finished(), 2);
    assert!(engine.list().is_empty());
    assert!(matches!(engine.status(a), Err(AttackError::NotFound(_))));
}

#[tokio::test]
async fn test_unknown_id_is_not_found() {
    let injector = RecordingInjector::new("wlan0");
    let engine = deauth_engine(injector, 5);
    assert!(matches!(engine.status(Uuid::new_v4()), Err(AttackError::NotFound(_))));
    assert!(matches!(engine.stop(Uuid::new_v4(), true), Err(AttackError::NotFound(_))));
}

// =============================================================================
// AUTH FLOOD
// =============================================================================

#[tokio::test]
async fn test_auth_flood_burst_uses_fresh_sources() {
    let injector = RecordingInjector::new("wlan0");
    let engine = AuthFloodEngine::new(EngineCore::new(
        "authflood",
        5,
        None,
        None,
        Some(injector.clone()),
    ));

    let id = engine
        .start(AuthFloodConfig {
            target: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            flood_type: AuthFloodType::Auth,
            packet_count: 8,
            packet_interval_ms: 2,
            ..Default::default()
        })
        .await
        .unwrap();

    for _ in 0..200 {
        if engine.status(id).unwrap().status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(engine.status(id).unwrap().status, AttackStatus::Success);

    let frames = injector.frames();
    assert_eq!(frames.len(), 8);

    // Every frame advertises a distinct forged station.
    let sources: std::collections::HashSet<Vec<u8>> = frames
        .iter()
        .map(|f| f[RADIOTAP_LEN + 10..RADIOTAP_LEN + 16].to_vec())
        .collect();
    assert_eq!(sources.len(), 8);

    // Open-system auth, transaction 1.
    for frame in &frames {
        assert_eq!(frame[RADIOTAP_LEN], 0xB0);
        assert_eq!(&frame[RADIOTAP_LEN + 24..], &[0, 0, 1, 0, 0, 0]);
    }
}

#[tokio::test]
async fn test_assoc_flood_requires_ssid() {
    let injector = RecordingInjector::new("wlan0");
    let engine = AuthFloodEngine::new(EngineCore::new("authflood", 5, None, None, Some(injector)));

    let err = engine
        .start(AuthFloodConfig {
            target: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            flood_type: AuthFloodType::Assoc,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AttackError::ConfigInvalid(_)));
}
