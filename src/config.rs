//! Runtime configuration and the persisted channel map.

use crate::types::{
    DEFAULT_DEVICE_TTL_SECS, DEFAULT_DWELL_MS, DEFAULT_MAX_CONCURRENT_ATTACKS,
    DEFAULT_PERSIST_BATCH, DEFAULT_PERSIST_BUFFER, DEFAULT_PERSIST_INTERVAL_SECS,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// File name of the channel map inside the data directory.
pub const CHANNEL_MAP_FILE: &str = "channels.json";

/// Top-level configuration, loadable from a JSON document.
/// Every field has a sane default so a missing config file still boots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Radio interface names to hop on (monitor mode expected).
    pub interfaces: Vec<String>,
    /// Hop dwell time in milliseconds.
    pub dwell_time: u64,
    /// Per-engine cap on concurrently running attacks.
    pub max_concurrent_attacks: usize,
    pub persistence: PersistenceConfig,
    pub registry: RegistryConfig,
    pub wps: WpsToolConfig,
    pub monitoring: MonitoringConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            dwell_time: DEFAULT_DWELL_MS,
            max_concurrent_attacks: DEFAULT_MAX_CONCURRENT_ATTACKS,
            persistence: PersistenceConfig::default(),
            registry: RegistryConfig::default(),
            wps: WpsToolConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Config {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PersistenceConfig {
    pub enabled: bool,
    /// Buffered devices that trigger a flush.
    pub batch_size: usize,
    /// Flush interval in seconds when the batch never fills.
    pub interval: u64,
    /// Queue capacity; overflow is dropped, never blocking intake.
    pub buffer_size: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: DEFAULT_PERSIST_BATCH,
            interval: DEFAULT_PERSIST_INTERVAL_SECS,
            buffer_size: DEFAULT_PERSIST_BUFFER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RegistryConfig {
    /// Device age (seconds since last packet) after which prune drops it.
    pub ttl: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { ttl: DEFAULT_DEVICE_TTL_SECS }
    }
}

/// Paths to the external WPS tools. When unset, the engine searches PATH
/// for the default binary names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WpsToolConfig {
    pub reaver_path: Option<PathBuf>,
    pub pixiewps_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MonitoringConfig {
    /// Gate for the post-injection effectiveness monitor.
    pub enabled: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// =============================================================================
// CHANNEL MAP
// =============================================================================

/// Persisted hop lists, one per interface: `{"wlan0": [1, 6, 11]}`.
pub type ChannelMap = HashMap<String, Vec<u16>>;

/// Load the channel map from the data directory. A missing file yields
/// an empty map; a corrupt file is an error (the operator should know).
pub fn load_channel_map(data_dir: &Path) -> Result<ChannelMap, std::io::Error> {
    let path = data_dir.join(CHANNEL_MAP_FILE);
    if !path.exists() {
        return Ok(ChannelMap::new());
    }
    let data = std::fs::read(path)?;
    serde_json::from_slice(&data)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Persist the channel map. Written atomically via a temp file so a
/// crash mid-write cannot corrupt the document.
pub fn save_channel_map(data_dir: &Path, map: &ChannelMap) -> Result<(), std::io::Error> {
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join(CHANNEL_MAP_FILE);
    let tmp = data_dir.join(format!("{CHANNEL_MAP_FILE}.tmp"));
    let data = serde_json::to_vec_pretty(map)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(&tmp, data)?;
    std::fs::rename(tmp, path)
}
