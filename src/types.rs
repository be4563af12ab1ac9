// Talon Core — Constants and Types
// Distributed under the MIT software license.

//! Shared constants and types for the Talon radio-control core.
//!
//! # Design Goals
//!
//! 1. **Bounded memory usage** — every in-memory collection (alert feed,
//!    WPS log buffer, persistence queue) has an explicit cap. A noisy
//!    radio environment cannot exhaust memory.
//!
//! 2. **Hot-path latency** — the capture subsystem feeds devices at frame
//!    rate; nothing on the intake path blocks longer than one shard mutex
//!    or one channel try-send.
//!
//! 3. **Radio-channel correctness** — a radio interface is a singleton
//!    mutable resource. It is tuned only through the switcher, gated by
//!    the locker, so a hopping capture and a channel-locked attack can
//!    never fight over the dial.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in seconds.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// CHANNELS
// =============================================================================

/// Highest channel number we will ever tune (4.9 GHz public-safety band).
pub const MAX_CHANNEL: u16 = 196;

/// Default 2.4 GHz hop list when no channel map is persisted.
pub const DEFAULT_CHANNELS: [u16; 11] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

/// Default dwell per channel while hopping, in milliseconds.
pub const DEFAULT_DWELL_MS: u64 = 250;

/// Convert a channel number to its center frequency in MHz.
/// Returns 0 for channels outside the 2.4/5/4.9 GHz plans.
pub fn channel_to_frequency(channel: u16) -> u32 {
    match channel {
        1..=13 => 2407 + 5 * channel as u32,
        14 => 2484,
        36..=177 => 5000 + 5 * channel as u32,
        183..=196 => 4000 + 5 * channel as u32,
        _ => 0,
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Number of independently locked registry shards.
/// A power of two so the shard mask is a cheap AND; 32 keeps worst-case
/// contention to 1/32 of the intake workers on a pathological MAC mix.
pub const SHARD_COUNT: usize = 32;

/// Default age (seconds since last packet) after which prune drops a device.
pub const DEFAULT_DEVICE_TTL_SECS: u64 = 15 * 60;

/// Default age after which an idle connection is marked disconnected.
pub const DEFAULT_STALE_CONNECTION_TTL_SECS: u64 = 5 * 60;

// =============================================================================
// ATTACKS
// =============================================================================

/// Default cap on concurrently running attacks per engine.
pub const DEFAULT_MAX_CONCURRENT_ATTACKS: usize = 5;

/// Rotating deauthentication reason codes used when fuzzing is enabled.
/// Drawn from the codes real APs emit (unspecified, prev-auth-invalid,
/// leaving, inactivity, class-2, class-3).
pub const REASON_FUZZ: [u16; 6] = [1, 2, 3, 4, 6, 7];

/// In continuous deauth mode, a CSA frame is interleaved every this many
/// iterations to shake stations that ignore plain deauthentication.
pub const CSA_EVERY: u64 = 50;

/// Jitter applied to the inter-packet interval when enabled: ±20%.
pub const JITTER_PERCENT: u64 = 20;

/// Default inter-packet interval for flood loops, in milliseconds.
pub const DEFAULT_PACKET_INTERVAL_MS: u64 = 100;

// =============================================================================
// WPS
// =============================================================================

/// Default wall-clock budget for a WPS PIN recovery run.
pub const DEFAULT_WPS_TIMEOUT_SECS: u64 = 300;

/// Default EAPOL timeout handed to the external tool (-t).
pub const DEFAULT_EAPOL_TIMEOUT_SECS: u64 = 7;

/// Cap on the in-memory buffer of child-tool output. The tool can emit
/// carriage-return progress spam for hours; keep the last half megabyte.
pub const WPS_LOG_BUFFER_CAP: usize = 500_000;

// =============================================================================
// PERSISTENCE
// =============================================================================

/// Default capacity of the device persistence queue. When full, updates
/// are dropped rather than blocking the intake workers.
pub const DEFAULT_PERSIST_BUFFER: usize = 10_000;

/// Default number of buffered devices that triggers a flush.
pub const DEFAULT_PERSIST_BATCH: usize = 100;

/// Default flush interval in seconds when the batch never fills.
pub const DEFAULT_PERSIST_INTERVAL_SECS: u64 = 5;

// =============================================================================
// GRAPH
// =============================================================================

/// How long a built graph projection is served from cache.
pub const GRAPH_CACHE_TTL_MS: u64 = 2_000;

/// RSSI above this is rendered as a healthy (green) connection edge.
pub const RSSI_GREEN_DBM: i8 = -65;

/// RSSI above this (but below green) is rendered yellow; below is red.
pub const RSSI_YELLOW_DBM: i8 = -80;

// =============================================================================
// ALERTS
// =============================================================================

/// Cap on the in-memory alert feed.
pub const ALERT_FEED_CAP: usize = 2_000;

// =============================================================================
// MAC ADDRESS
// =============================================================================

/// 48-bit MAC address, canonicalized as upper-hex colon-separated text.
///
/// Serializes as a string so persisted and projected records stay
/// human-readable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    /// Fully random unicast, locally administered address.
    pub fn random_local() -> Self {
        let mut bytes: [u8; 6] = rand::random();
        bytes[0] = (bytes[0] | 0x02) & !0x01;
        MacAddr(bytes)
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == [0xff; 6]
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    /// Locally-administered bit — set on randomized station addresses.
    pub fn is_locally_administered(&self) -> bool {
        self.0[0] & 0x02 != 0
    }

    /// First three bytes, registered to a vendor.
    pub fn oui(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

/// Error parsing a textual MAC address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address: {0}")]
pub struct MacParseError(pub String);

impl FromStr for MacAddr {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut count = 0;
        for part in s.split([':', '-']) {
            if count == 6 || part.len() != 2 {
                return Err(MacParseError(s.to_string()));
            }
            bytes[count] =
                u8::from_str_radix(part, 16).map_err(|_| MacParseError(s.to_string()))?;
            count += 1;
        }
        if count != 6 {
            return Err(MacParseError(s.to_string()));
        }
        Ok(MacAddr(bytes))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// DEVICE CLASSIFICATION
// =============================================================================

/// What role a device plays in the radio environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceKind {
    AccessPoint,
    Station,
    #[default]
    Unknown,
}

/// Advertised security mode of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecurityMode {
    Open,
    Wep,
    Wpa,
    Wpa2,
    Wpa3,
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SecurityMode::Open => "OPEN",
            SecurityMode::Wep => "WEP",
            SecurityMode::Wpa => "WPA",
            SecurityMode::Wpa2 => "WPA2",
            SecurityMode::Wpa3 => "WPA3",
        };
        f.write_str(s)
    }
}

/// WPS advertisement state of an access point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WpsState {
    #[default]
    Absent,
    Configured,
    Unconfigured,
}

/// Station association lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Authenticating,
    Associating,
    Handshake,
    Connected,
}

// =============================================================================
// ALERTS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// An alert produced by the capture subsystem (rogue AP, karma attack,
/// deauth storm observed, ...). The core only stores and projects these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub kind: String,
    pub severity: AlertSeverity,
    pub device: MacAddr,
    pub timestamp: u64,
    pub message: String,
}

// =============================================================================
// VULNERABILITIES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VulnStatus {
    Active,
    Confirmed,
    Ignored,
    Fixed,
}

/// A vulnerability attached to a device. Upserted by stable id through
/// the storage sink; status transitions carry a timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    /// Stable identifier, unique across the store.
    pub id: String,
    pub device: MacAddr,
    pub name: String,
    /// 1 (informational) .. 10 (critical).
    pub severity: u8,
    /// 0.0 .. 1.0
    pub confidence: f32,
    pub status: VulnStatus,
    pub first_seen: chrono::DateTime<chrono::Utc>,
    pub last_seen: chrono::DateTime<chrono::Utc>,
    /// When the status last changed.
    pub status_changed: chrono::DateTime<chrono::Utc>,
    pub notes: String,
    pub evidence: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_roundtrip() {
        let mac: MacAddr = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        assert_eq!(mac.to_string(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(mac.oui(), [0xaa, 0xbb, 0xcc]);

        let dashed: MacAddr = "00-11-22-33-44-55".parse().unwrap();
        assert_eq!(dashed.to_string(), "00:11:22:33:44:55");
    }

    #[test]
    fn test_mac_rejects_garbage() {
        assert!("".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:dd:ee".parse::<MacAddr>().is_err());
        assert!("aa:bb:cc:dd:ee:ff:00".parse::<MacAddr>().is_err());
        assert!("zz:bb:cc:dd:ee:ff".parse::<MacAddr>().is_err());
        assert!("aabb:cc:dd:ee:ff".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_random_local_is_unicast_and_local() {
        for _ in 0..64 {
            let mac = MacAddr::random_local();
            assert!(!mac.is_multicast());
            assert!(mac.is_locally_administered());
        }
    }

    #[test]
    fn test_channel_frequency_plan() {
        assert_eq!(channel_to_frequency(1), 2412);
        assert_eq!(channel_to_frequency(6), 2437);
        assert_eq!(channel_to_frequency(11), 2462);
        assert_eq!(channel_to_frequency(14), 2484);
        assert_eq!(channel_to_frequency(36), 5180);
        assert_eq!(channel_to_frequency(0), 0);
    }

    #[test]
    fn test_mac_serde_as_string() {
        let mac: MacAddr = "AA:BB:CC:00:11:22".parse().unwrap();
        let json = serde_json::to_string(&mac).unwrap();
        assert_eq!(json, "\"AA:BB:CC:00:11:22\"");
        let back: MacAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mac);
    }
}
