//! Reference-counted channel locks.
//!
//! At most one channel may be locked per interface at any moment;
//! concurrent attacks on the same (interface, channel) share the lock by
//! reference count. On the 0→1 transition the interface's hopper is
//! parked in its Locked state (which tunes the channel once); on 1→0 the
//! hopper resumes. Interfaces without a registered hopper (dedicated
//! attack radios) are tuned directly through the switcher.
//!
//! Lock state lives under a plain mutex; no locker operation awaits or
//! runs caller code while holding it.

use super::hopper::ChannelHopper;
use super::switcher::ChannelSwitcher;
use super::RadioError;
use crate::types::MAX_CHANNEL;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

struct LockEntry {
    channel: u16,
    refs: usize,
}

pub struct ChannelLocker {
    switcher: Arc<dyn ChannelSwitcher>,
    hoppers: Mutex<HashMap<String, ChannelHopper>>,
    locks: Mutex<HashMap<String, LockEntry>>,
}

impl ChannelLocker {
    pub fn new(switcher: Arc<dyn ChannelSwitcher>) -> Self {
        Self {
            switcher,
            hoppers: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Register the hopper responsible for an interface. The locker only
    /// ever talks to it through its command handle.
    pub fn register_hopper(&self, hopper: ChannelHopper) {
        self.hoppers.lock().insert(hopper.interface().to_string(), hopper);
    }

    /// Acquire (or share) the lock for (interface, channel).
    ///
    /// Fails with [`RadioError::ChannelBusy`] when a different channel is
    /// already held on the interface. Every successful `lock` must be
    /// paired with an `unlock`; prefer [`Self::acquire`] or
    /// [`Self::execute_with_lock`], which guarantee the pairing.
    pub fn lock(&self, interface: &str, channel: u16) -> Result<(), RadioError> {
        if channel == 0 || channel > MAX_CHANNEL {
            return Err(RadioError::InvalidChannel(channel));
        }

        // Decide under the mutex, act on the radio after releasing it.
        let first_holder = {
            let mut locks = self.locks.lock();
            match locks.get_mut(interface) {
                Some(entry) if entry.channel == channel => {
                    entry.refs += 1;
                    debug!(
                        "Shared lock on {} channel {} (refs={})",
                        interface, channel, entry.refs
                    );
                    false
                }
                Some(entry) => {
                    return Err(RadioError::ChannelBusy {
                        interface: interface.to_string(),
                        held: entry.channel,
                    });
                }
                None => {
                    locks.insert(interface.to_string(), LockEntry { channel, refs: 1 });
                    true
                }
            }
        };

        if first_holder {
            debug!("Locked {} on channel {}", interface, channel);
            let hopper = self.hoppers.lock().get(interface).cloned();
            match hopper {
                // The hopper tunes once on lock entry and then holds.
                Some(h) => h.lock(channel),
                None => {
                    if let Err(e) = self.switcher.set_channel(interface, channel) {
                        warn!("Failed to assert channel {} on {}: {}", channel, interface, e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Release one reference. On the last release the hopper resumes.
    pub fn unlock(&self, interface: &str) {
        let released = {
            let mut locks = self.locks.lock();
            match locks.get_mut(interface) {
                Some(entry) => {
                    entry.refs = entry.refs.saturating_sub(1);
                    if entry.refs == 0 {
                        locks.remove(interface);
                        true
                    } else {
                        false
                    }
                }
                None => {
                    warn!("Unlock of {} without a lock held", interface);
                    false
                }
            }
        };

        if released {
            debug!("Released lock on {}", interface);
            let hopper = self.hoppers.lock().get(interface).cloned();
            if let Some(h) = hopper {
                h.unlock();
            }
        }
    }

    /// Channel currently held on an interface, if any.
    pub fn held_channel(&self, interface: &str) -> Option<u16> {
        self.locks.lock().get(interface).map(|e| e.channel)
    }

    /// Current reference count for an interface's lock.
    pub fn ref_count(&self, interface: &str) -> usize {
        self.locks.lock().get(interface).map_or(0, |e| e.refs)
    }

    /// Acquire a lock as an RAII guard. The guard releases on drop, so
    /// the lock cannot leak past a panic or a cancelled future.
    pub fn acquire(
        self: &Arc<Self>,
        interface: &str,
        channel: u16,
    ) -> Result<ChannelGuard, RadioError> {
        self.lock(interface, channel)?;
        Ok(ChannelGuard {
            locker: self.clone(),
            interface: interface.to_string(),
        })
    }

    /// Run `action` with (interface, channel) locked. Release is
    /// guaranteed on every exit path: normal return, error, panic and
    /// cancellation of the surrounding future.
    pub async fn execute_with_lock<F, T>(
        self: &Arc<Self>,
        interface: &str,
        channel: u16,
        action: F,
    ) -> Result<T, RadioError>
    where
        F: std::future::Future<Output = T>,
    {
        let _guard = self.acquire(interface, channel)?;
        Ok(action.await)
    }
}

/// RAII lock guard; see [`ChannelLocker::acquire`].
pub struct ChannelGuard {
    locker: Arc<ChannelLocker>,
    interface: String,
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        self.locker.unlock(&self.interface);
    }
}
