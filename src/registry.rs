//! Sharded device registry with an SSID index.
//!
//! MAC -> Device, partitioned into [`SHARD_COUNT`] independently locked
//! shards so intake workers contend only when they hash to the same
//! shard. Shard mutexes guard short, purely in-memory critical sections;
//! nothing awaits while holding one. All reads return owned snapshots.

use crate::device::Device;
use crate::types::{now, ConnectionState, MacAddr, SecurityMode, SHARD_COUNT};
use parking_lot::Mutex;
use rand::Rng;
use siphasher::sip::SipHasher24;
use std::collections::HashMap;
use std::hash::Hasher;
use tracing::debug;

/// One SSID as seen from any AP advertising it.
#[derive(Debug, Clone)]
pub struct SsidEntry {
    pub security: Option<SecurityMode>,
    pub last_seen: u64,
}

/// Registry statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub devices: usize,
    pub access_points: usize,
    pub stations: usize,
    pub ssids: usize,
}

pub struct DeviceRegistry {
    /// Random key for shard assignment, same keyed-hash discipline as a
    /// bucketed address table: an outside observer cannot aim traffic at
    /// one shard.
    key: [u8; 16],
    shards: Vec<Mutex<HashMap<MacAddr, Device>>>,
    ssid_index: Mutex<HashMap<String, SsidEntry>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let mut key = [0u8; 16];
        rand::thread_rng().fill(&mut key);
        Self {
            key,
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            ssid_index: Mutex::new(HashMap::new()),
        }
    }

    fn shard_for(&self, mac: MacAddr) -> &Mutex<HashMap<MacAddr, Device>> {
        let mut hasher = SipHasher24::new_with_key(&self.key);
        hasher.write(mac.as_bytes());
        let idx = (hasher.finish() as usize) % SHARD_COUNT;
        &self.shards[idx]
    }

    /// Merge an observation into the registry.
    ///
    /// Returns the merged snapshot and a discovery flag: true when the
    /// device's IE signature changed (or a new device arrived already
    /// carrying one), prompting re-fingerprinting downstream.
    pub fn process(&self, mut incoming: Device) -> (Device, bool) {
        incoming.normalize();
        let mac = incoming.mac;
        let shard = self.shard_for(mac);

        let (merged, discovery) = {
            let mut guard = shard.lock();
            match guard.get_mut(&mac) {
                Some(existing) => {
                    let changed = existing.merge(&incoming);
                    (existing.clone(), changed)
                }
                None => {
                    let fresh_signature = !incoming.ie_signature.is_empty();
                    guard.insert(mac, incoming.clone());
                    (incoming, fresh_signature)
                }
            }
        };

        if merged.is_ap() && !merged.ssid.is_empty() {
            self.update_ssid(&merged.ssid, merged.security, merged.last_seen);
        }

        (merged, discovery)
    }

    /// Hydrate a device from persistent storage. Unlike `process` this
    /// does not touch first-seen or the counters of an already-live
    /// device; a live entry wins over the stored one.
    pub fn load(&self, mut device: Device) {
        device.normalize();
        let shard = self.shard_for(device.mac);
        let mut guard = shard.lock();
        guard.entry(device.mac).or_insert(device);
    }

    pub fn get(&self, mac: MacAddr) -> Option<Device> {
        self.shard_for(mac).lock().get(&mac).cloned()
    }

    pub fn get_all(&self) -> Vec<Device> {
        let mut out = Vec::new();
        for shard in &self.shards {
            let guard = shard.lock();
            out.extend(guard.values().cloned());
        }
        out
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.lock().is_empty())
    }

    /// Drop devices whose last packet is older than `ttl_secs`.
    /// Idempotent for a fixed clock: a second call deletes nothing new.
    pub fn prune(&self, ttl_secs: u64) -> usize {
        let horizon = now().saturating_sub(ttl_secs);
        let mut deleted = 0;
        let mut dropped_ssids: Vec<String> = Vec::new();

        for shard in &self.shards {
            let mut guard = shard.lock();
            guard.retain(|_, dev| {
                let keep = dev.last_packet >= horizon;
                if !keep {
                    deleted += 1;
                    if dev.is_ap() && !dev.ssid.is_empty() {
                        dropped_ssids.push(dev.ssid.clone());
                    }
                }
                keep
            });
        }

        // Keep the SSID index consistent: forget SSIDs whose last
        // advertising AP just aged out.
        if !dropped_ssids.is_empty() {
            let survivors: std::collections::HashSet<String> = self
                .get_all()
                .into_iter()
                .filter(|d| d.is_ap())
                .map(|d| d.ssid)
                .collect();
            let mut index = self.ssid_index.lock();
            for ssid in dropped_ssids {
                if !survivors.contains(&ssid) {
                    index.remove(&ssid);
                }
            }
        }

        if deleted > 0 {
            debug!("Pruned {} stale devices", deleted);
        }
        deleted
    }

    /// Mark connections idle for longer than `ttl_secs` as disconnected.
    pub fn cleanup_stale_connections(&self, ttl_secs: u64) -> usize {
        let horizon = now().saturating_sub(ttl_secs);
        let mut transitioned = 0;
        for shard in &self.shards {
            let mut guard = shard.lock();
            for dev in guard.values_mut() {
                if dev.connection.state != ConnectionState::Disconnected
                    && dev.last_packet < horizon
                {
                    dev.connection.state = ConnectionState::Disconnected;
                    transitioned += 1;
                }
            }
        }
        transitioned
    }

    /// Wipe all shards and the SSID index.
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
        self.ssid_index.lock().clear();
    }

    // -------------------------------------------------------------------------
    // SSID index
    // -------------------------------------------------------------------------

    /// Record an SSID sighting. Empty (hidden) SSIDs are excluded.
    pub fn update_ssid(&self, ssid: &str, security: Option<SecurityMode>, seen: u64) {
        if ssid.is_empty() {
            return;
        }
        let mut index = self.ssid_index.lock();
        let entry = index
            .entry(ssid.to_string())
            .or_insert(SsidEntry { security: None, last_seen: 0 });
        if security.is_some() {
            entry.security = security;
        }
        if seen > entry.last_seen {
            entry.last_seen = seen;
        }
    }

    pub fn ssid_security(&self, ssid: &str) -> Option<SecurityMode> {
        self.ssid_index.lock().get(ssid).and_then(|e| e.security)
    }

    pub fn all_ssids(&self) -> Vec<(String, SsidEntry)> {
        self.ssid_index
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for shard in &self.shards {
            let guard = shard.lock();
            for dev in guard.values() {
                stats.devices += 1;
                match dev.kind {
                    crate::types::DeviceKind::AccessPoint => stats.access_points += 1,
                    crate::types::DeviceKind::Station => stats.stations += 1,
                    crate::types::DeviceKind::Unknown => {}
                }
            }
        }
        stats.ssids = self.ssid_index.lock().len();
        stats
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
