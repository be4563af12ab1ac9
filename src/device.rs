//! Per-device state and merge semantics.
//!
//! The registry owns `Device` values; everything outside receives clones.
//! Merging is written so that any interleaving of concurrent `process`
//! calls (serialized per shard) is equivalent to some serial order:
//! counters accumulate, "latest wins" fields overwrite, and flags like
//! `handshake_captured` are monotonic.

use crate::types::{now, ConnectionState, DeviceKind, MacAddr, SecurityMode, WpsState};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::collections::HashMap;

/// EMA weight given to the previous probe-interval estimate.
const PROBE_EMA_OLD_WEIGHT: f64 = 0.7;

/// EMA weight given to the newest observation.
const PROBE_EMA_NEW_WEIGHT: f64 = 0.3;

/// Probing faster than one request per this many seconds reads as scanner
/// behavior in the anomaly score.
const FAST_PROBE_SECS: f64 = 2.0;

/// A station probing for this many distinct SSIDs saturates the
/// SSID-spread term of the anomaly score.
const SSID_SPREAD_CAP: u32 = 20;

/// Behavioral fingerprint built up from probe timing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BehaviorProfile {
    /// Exponential moving average of probe inter-arrival, seconds.
    /// Zero until two observations exist.
    pub probe_interval_ema: f64,
    /// Number of distinct SSIDs ever probed.
    pub unique_ssid_count: u32,
    /// 0.0 (nominal) .. 1.0 (screaming).
    pub anomaly_score: f64,
    /// Bitmap of UTC hours (bit 0 = 00:00-00:59) in which the device
    /// has been active.
    pub active_hours: u32,
}

impl BehaviorProfile {
    /// Fold a new activity timestamp into the profile.
    pub fn observe(&mut self, prev_packet: u64, new_packet: u64, unique_ssids: u32) {
        if prev_packet > 0 && new_packet > prev_packet {
            let interval = (new_packet - prev_packet) as f64;
            self.probe_interval_ema = if self.probe_interval_ema == 0.0 {
                interval
            } else {
                PROBE_EMA_OLD_WEIGHT * self.probe_interval_ema
                    + PROBE_EMA_NEW_WEIGHT * interval
            };
        }
        self.unique_ssid_count = unique_ssids;
        if new_packet > 0 {
            let hour = (new_packet / 3600) % 24;
            self.active_hours |= 1 << hour;
        }
    }

    /// Recompute the anomaly score. The exact formula is a heuristic:
    /// fast probing and a wide SSID spread both push toward 1.0, a
    /// randomized MAC adds a fixed bump.
    pub fn rescore(&mut self, randomized_mac: bool) {
        let rate_term = if self.probe_interval_ema > 0.0 {
            (FAST_PROBE_SECS / self.probe_interval_ema).min(1.0)
        } else {
            0.0
        };
        let spread_term =
            f64::from(self.unique_ssid_count.min(SSID_SPREAD_CAP)) / f64::from(SSID_SPREAD_CAP);
        let random_term = if randomized_mac { 0.2 } else { 0.0 };
        self.anomaly_score = (0.5 * rate_term + 0.3 * spread_term + random_term).min(1.0);
    }
}

/// Station association state with its target and last failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectionInfo {
    pub state: ConnectionState,
    /// BSSID the station is connected (or trying to connect) to.
    pub bssid: Option<MacAddr>,
    /// Error code/text from the last failed transition, kept across a
    /// disconnect so the graph can label "auth failed" edges.
    pub last_error: Option<String>,
}

/// Everything known about one radio device, keyed by MAC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub mac: MacAddr,
    pub kind: DeviceKind,
    /// Vendor name derived from the OUI by the capture subsystem.
    pub vendor: String,

    // Radio
    /// Most recent signal strength, dBm.
    pub rssi: i8,
    pub channel: u16,
    /// Center frequency, MHz.
    pub frequency: u32,
    pub width_mhz: u16,
    /// Standard tag such as "802.11ax".
    pub standard: String,
    pub security: Option<SecurityMode>,
    pub wps: WpsState,
    /// Hex digest of the information-element tag sequence; the device's
    /// fingerprint. A change prompts re-fingerprinting.
    pub ie_signature: String,

    // Identity
    pub ssid: String,
    pub connected_bssid: Option<MacAddr>,
    pub model: String,
    pub os: String,

    // Traffic (monotonic)
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub packets: u64,
    pub retries: u64,

    // Behavior
    pub behavior: BehaviorProfile,
    /// Probed SSID -> last time it was probed (unix seconds).
    pub probed_ssids: HashMap<String, u64>,
    pub randomized_mac: bool,
    /// Monotonic: once a handshake is captured it stays captured.
    pub handshake_captured: bool,

    pub connection: ConnectionInfo,

    // Lifecycle
    pub first_seen: u64,
    pub last_seen: u64,
    pub last_packet: u64,
}

impl Device {
    pub fn new(mac: MacAddr) -> Self {
        let ts = now();
        let mut dev = Self {
            mac,
            kind: DeviceKind::Unknown,
            vendor: String::new(),
            rssi: 0,
            channel: 0,
            frequency: 0,
            width_mhz: 0,
            standard: String::new(),
            security: None,
            wps: WpsState::Absent,
            ie_signature: String::new(),
            ssid: String::new(),
            connected_bssid: None,
            model: String::new(),
            os: String::new(),
            tx_bytes: 0,
            rx_bytes: 0,
            packets: 0,
            retries: 0,
            behavior: BehaviorProfile::default(),
            probed_ssids: HashMap::new(),
            randomized_mac: false,
            handshake_captured: false,
            connection: ConnectionInfo::default(),
            first_seen: ts,
            last_seen: ts,
            last_packet: ts,
        };
        dev.normalize();
        dev
    }

    pub fn is_ap(&self) -> bool {
        self.kind == DeviceKind::AccessPoint
    }

    /// Enforce the invariants that hold regardless of what the capture
    /// subsystem handed us.
    pub fn normalize(&mut self) {
        if self.mac.is_locally_administered() && !self.mac.is_multicast() {
            self.randomized_mac = true;
        }
        if self.last_packet < self.first_seen {
            self.last_packet = self.first_seen;
        }
        if self.last_seen < self.last_packet {
            self.last_seen = self.last_packet;
        }
    }

    /// Merge an incoming observation into this device.
    ///
    /// Returns true when the IE signature changed (both sides non-empty),
    /// which prompts re-fingerprinting downstream.
    pub fn merge(&mut self, incoming: &Device) -> bool {
        let prev_packet = self.last_packet;

        // Counters accumulate; they are deltas per observation.
        self.packets += incoming.packets;
        self.retries += incoming.retries;
        self.tx_bytes += incoming.tx_bytes;
        self.rx_bytes += incoming.rx_bytes;

        // Most-recent wins.
        self.rssi = incoming.rssi;

        // Overwrite-if-set fields.
        if incoming.kind != DeviceKind::Unknown {
            self.kind = incoming.kind;
        }
        overwrite_if_set(&mut self.vendor, &incoming.vendor);
        overwrite_if_set(&mut self.model, &incoming.model);
        overwrite_if_set(&mut self.os, &incoming.os);
        overwrite_if_set(&mut self.ssid, &incoming.ssid);
        overwrite_if_set(&mut self.standard, &incoming.standard);
        if incoming.connected_bssid.is_some() {
            self.connected_bssid = incoming.connected_bssid;
        }
        if incoming.security.is_some() {
            self.security = incoming.security;
        }
        if incoming.wps != WpsState::Absent {
            self.wps = incoming.wps;
        }
        if incoming.channel != 0 {
            self.channel = incoming.channel;
        }
        if incoming.frequency != 0 {
            self.frequency = incoming.frequency;
        }
        if incoming.width_mhz != 0 {
            self.width_mhz = incoming.width_mhz;
        }

        let signature_changed = !incoming.ie_signature.is_empty()
            && !self.ie_signature.is_empty()
            && incoming.ie_signature != self.ie_signature;
        overwrite_if_set(&mut self.ie_signature, &incoming.ie_signature);

        // Probed SSIDs union, latest timestamp per SSID.
        for (ssid, &ts) in &incoming.probed_ssids {
            let entry = self.probed_ssids.entry(ssid.clone()).or_insert(0);
            if ts > *entry {
                *entry = ts;
            }
        }

        // Monotonic flags.
        self.handshake_captured |= incoming.handshake_captured;
        if incoming.randomized_mac {
            self.randomized_mac = true;
        }

        // Connection state: accept the incoming transition; keep the
        // error only when the incoming disconnect carries one.
        self.connection.state = incoming.connection.state;
        if incoming.connection.bssid.is_some() {
            self.connection.bssid = incoming.connection.bssid;
        }
        if incoming.connection.state == ConnectionState::Disconnected {
            if incoming.connection.last_error.is_some() {
                self.connection.last_error = incoming.connection.last_error.clone();
            }
        } else {
            self.connection.last_error = incoming.connection.last_error.clone();
        }

        // Timestamps: first-seen preserved, the rest ratchet forward.
        self.last_seen = self.last_seen.max(incoming.last_seen);
        self.last_packet = self.last_packet.max(incoming.last_packet);

        self.behavior.observe(
            prev_packet,
            incoming.last_packet,
            self.probed_ssids.len() as u32,
        );
        self.behavior.rescore(self.randomized_mac);
        self.normalize();

        signature_changed
    }

    /// Fingerprint a raw information-element tag sequence into the hex
    /// digest stored in `ie_signature`. The capture subsystem calls
    /// this when it assembles an observation.
    pub fn ie_signature_from_tags(tags: &[u8]) -> String {
        hex::encode(Sha3_256::digest(tags))
    }

    /// Digest of the sorted probed-SSID set. Randomized aliases of one
    /// physical device keep probing the same remembered networks, so a
    /// matching digest is a correlation signal. None when the device has
    /// probed fewer than two SSIDs (too weak to correlate).
    pub fn probe_set_digest(&self) -> Option<[u8; 32]> {
        if self.probed_ssids.len() < 2 {
            return None;
        }
        let mut ssids: Vec<&str> = self.probed_ssids.keys().map(String::as_str).collect();
        ssids.sort_unstable();
        let mut hasher = Sha3_256::new();
        for ssid in ssids {
            hasher.update(ssid.as_bytes());
            hasher.update([0u8]);
        }
        Some(hasher.finalize().into())
    }
}

fn overwrite_if_set(dst: &mut String, src: &str) {
    if !src.is_empty() {
        dst.clear();
        dst.push_str(src);
    }
}
