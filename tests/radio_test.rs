//! Radio layer tests: hopper state machine, locker reference counting.
//!
//! Run with: cargo test --test radio_test

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use talon::radio::{ChannelHopper, ChannelLocker, ChannelSwitcher, HopperState, RadioError};

/// Switcher fake that records every tune.
#[derive(Default)]
struct RecordingSwitcher {
    tunes: Mutex<Vec<(String, u16)>>,
}

impl RecordingSwitcher {
    fn count(&self) -> usize {
        self.tunes.lock().len()
    }

    fn last(&self) -> Option<(String, u16)> {
        self.tunes.lock().last().cloned()
    }
}

impl ChannelSwitcher for RecordingSwitcher {
    fn set_channel(&self, interface: &str, channel: u16) -> Result<(), RadioError> {
        self.tunes.lock().push((interface.to_string(), channel));
        Ok(())
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(40)).await;
}

// =============================================================================
// LOCKER REFERENCE COUNTING
// =============================================================================

#[tokio::test]
async fn test_locker_refcount_lifecycle() {
    let sw = Arc::new(RecordingSwitcher::default());
    let locker = Arc::new(ChannelLocker::new(sw.clone()));
    let hopper = ChannelHopper::new(
        "wlan0",
        vec![1, 6, 11],
        Duration::from_millis(100),
        sw.clone(),
    );
    locker.register_hopper(hopper.clone());
    hopper.start();
    settle().await;
    assert_eq!(hopper.state(), HopperState::Hopping);

    // First lock pauses the hopper and asserts the channel.
    locker.lock("wlan0", 6).unwrap();
    settle().await;
    assert_eq!(hopper.state(), HopperState::Locked);
    assert_eq!(hopper.locked_channel(), Some(6));
    assert_eq!(locker.ref_count("wlan0"), 1);
    assert_eq!(sw.last(), Some(("wlan0".to_string(), 6)));

    // Same channel shares the lock.
    locker.lock("wlan0", 6).unwrap();
    assert_eq!(locker.ref_count("wlan0"), 2);

    // A different channel is refused and the count is untouched.
    match locker.lock("wlan0", 1) {
        Err(RadioError::ChannelBusy { held, .. }) => assert_eq!(held, 6),
        other => panic!("expected ChannelBusy, got {other:?}"),
    }
    assert_eq!(locker.ref_count("wlan0"), 2);

    // First unlock keeps the lock held.
    locker.unlock("wlan0");
    assert_eq!(locker.ref_count("wlan0"), 1);
    assert_eq!(hopper.state(), HopperState::Locked);

    // Last unlock resumes hopping.
    locker.unlock("wlan0");
    settle().await;
    assert_eq!(locker.ref_count("wlan0"), 0);
    assert_eq!(hopper.state(), HopperState::Hopping);
}

#[tokio::test]
async fn test_lock_unlock_round_trip_restores_state() {
    let sw = Arc::new(RecordingSwitcher::default());
    let locker = Arc::new(ChannelLocker::new(sw.clone()));
    let hopper = ChannelHopper::new("wlan0", vec![1, 6], Duration::from_millis(50), sw.clone());
    locker.register_hopper(hopper.clone());
    hopper.start();
    settle().await;

    let before = hopper.state();
    locker.lock("wlan0", 6).unwrap();
    locker.unlock("wlan0");
    settle().await;
    assert_eq!(hopper.state(), before);

    // Double lock/unlock on the same channel is equivalent to single.
    locker.lock("wlan0", 6).unwrap();
    locker.lock("wlan0", 6).unwrap();
    locker.unlock("wlan0");
    locker.unlock("wlan0");
    settle().await;
    assert_eq!(hopper.state(), HopperState::Hopping);
    assert_eq!(locker.ref_count("wlan0"), 0);
}

#[tokio::test]
async fn test_guard_releases_on_drop_and_cancel() {
    let sw = Arc::new(RecordingSwitcher::default());
    let locker = Arc::new(ChannelLocker::new(sw.clone()));

    {
        let _guard = locker.acquire("wlan0", 6).unwrap();
        assert_eq!(locker.held_channel("wlan0"), Some(6));
    }
    assert_eq!(locker.held_channel("wlan0"), None);

    // A cancelled future inside execute_with_lock still releases.
    let locker2 = locker.clone();
    let task = tokio::spawn(async move {
        locker2
            .execute_with_lock("wlan0", 11, async {
                tokio::time::sleep(Duration::from_secs(30)).await;
            })
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(locker.held_channel("wlan0"), Some(11));
    task.abort();
    let _ = task.await;
    settle().await;
    assert_eq!(locker.held_channel("wlan0"), None);
}

#[tokio::test]
async fn test_execute_with_lock_runs_action_under_lock() {
    let sw = Arc::new(RecordingSwitcher::default());
    let locker = Arc::new(ChannelLocker::new(sw));

    let locker_inner = locker.clone();
    let value = locker
        .execute_with_lock("wlan0", 6, async move {
            assert_eq!(locker_inner.held_channel("wlan0"), Some(6));
            42
        })
        .await
        .unwrap();
    assert_eq!(value, 42);
    assert_eq!(locker.held_channel("wlan0"), None);
}

// =============================================================================
// HOPPER
// =============================================================================

#[tokio::test]
async fn test_hopper_pause_suspends_tuning() {
    let sw = Arc::new(RecordingSwitcher::default());
    let hopper = ChannelHopper::new("wlan0", vec![1], Duration::from_millis(10), sw.clone());
    hopper.start();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(sw.count() >= 1, "expected at least one tune before pause");

    hopper.pause(Duration::from_millis(150));
    // Let any in-flight tick drain, then observe quiescence.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(hopper.state(), HopperState::Paused);
    let at_pause = sw.count();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sw.count(), at_pause, "no tunes may happen while paused");

    // Auto-resume after the pause elapses.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(hopper.state(), HopperState::Hopping);
    assert!(sw.count() > at_pause, "tuning must resume after the pause");
}

#[tokio::test]
async fn test_hopper_round_robin_over_channel_list() {
    let sw = Arc::new(RecordingSwitcher::default());
    let hopper = ChannelHopper::new("wlan0", vec![1, 6, 11], Duration::from_millis(5), sw.clone());
    hopper.start();
    tokio::time::sleep(Duration::from_millis(100)).await;
    hopper.stop();

    let tunes = sw.tunes.lock().clone();
    assert!(tunes.len() >= 6);
    for (i, (iface, ch)) in tunes.iter().enumerate() {
        assert_eq!(iface, "wlan0");
        assert_eq!(*ch, [1u16, 6, 11][i % 3]);
    }
}

#[tokio::test]
async fn test_hopper_set_channels_resets_rotation() {
    let sw = Arc::new(RecordingSwitcher::default());
    let hopper = ChannelHopper::new("wlan0", vec![1, 6], Duration::from_millis(10), sw.clone());
    assert_eq!(hopper.get_channels(), vec![1, 6]);

    hopper.set_channels(vec![36, 40, 44]);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(hopper.get_channels(), vec![36, 40, 44]);

    // The returned list is a defensive copy.
    let mut copy = hopper.get_channels();
    copy.push(161);
    assert_eq!(hopper.get_channels(), vec![36, 40, 44]);

    hopper.start();
    tokio::time::sleep(Duration::from_millis(25)).await;
    hopper.stop();
    let first = sw.tunes.lock().first().cloned();
    assert_eq!(first, Some(("wlan0".to_string(), 36)));
}

#[tokio::test]
async fn test_hopper_stop_is_terminal() {
    let sw = Arc::new(RecordingSwitcher::default());
    let hopper = ChannelHopper::new("wlan0", vec![1], Duration::from_millis(10), sw.clone());
    hopper.start();
    tokio::time::sleep(Duration::from_millis(20)).await;
    hopper.stop();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(hopper.state(), HopperState::Stopped);

    let stopped_count = sw.count();
    hopper.start();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(hopper.state(), HopperState::Stopped);
    assert_eq!(sw.count(), stopped_count);
}

#[tokio::test]
async fn test_failing_switcher_counts_errors() {
    struct FailingSwitcher;
    impl ChannelSwitcher for FailingSwitcher {
        fn set_channel(&self, interface: &str, channel: u16) -> Result<(), RadioError> {
            Err(RadioError::ChannelSetFailed {
                interface: interface.to_string(),
                channel,
                reason: "radio gone".into(),
            })
        }
    }

    let hopper = ChannelHopper::new(
        "wlan0",
        vec![1, 6],
        Duration::from_millis(5),
        Arc::new(FailingSwitcher),
    );
    hopper.start();
    tokio::time::sleep(Duration::from_millis(60)).await;
    hopper.stop();
    assert!(hopper.tune_errors() >= 5);
}
