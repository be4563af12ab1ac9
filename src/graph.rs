//! Graph projection: devices and SSIDs as nodes, relationships as
//! edges, with passive vulnerability flags attached.
//!
//! `build` is pure over a registry snapshot. The service wraps it in a
//! short-TTL double-checked cache: readers share the last build, the
//! first reader past the TTL rebuilds under the write lock.

use crate::device::Device;
use crate::registry::{DeviceRegistry, SsidEntry};
use crate::types::{
    now, DeviceKind, MacAddr, SecurityMode, WpsState, GRAPH_CACHE_TTL_MS, RSSI_GREEN_DBM,
    RSSI_YELLOW_DBM,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// SSID substrings that mark factory-default network names.
const DEFAULT_SSID_MARKERS: [&str; 8] =
    ["linksys", "dlink", "d-link", "netgear", "tp-link", "tplink", "default", "dir-"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeGroup {
    Ap,
    Station,
    Network,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Probe,
    Connection,
    Correlation,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub group: NodeGroup,
    /// Referenced but never directly observed (stub AP).
    pub stale: bool,
    pub rssi: Option<i8>,
    pub channel: Option<u16>,
    pub vulnerabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    pub dashed: bool,
    pub color: Option<&'static str>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub generated_at: u64,
}

fn ssid_node_id(ssid: &str) -> String {
    format!("ssid:{ssid}")
}

/// RSSI band color for a live connection edge.
fn rssi_color(rssi: i8) -> &'static str {
    if rssi > RSSI_GREEN_DBM {
        "green"
    } else if rssi > RSSI_YELLOW_DBM {
        "yellow"
    } else {
        "red"
    }
}

/// Weaknesses visible from passive capture alone.
pub fn passive_vulnerabilities(device: &Device) -> Vec<String> {
    let mut flags = Vec::new();
    if !device.is_ap() {
        return flags;
    }
    match device.security {
        None | Some(SecurityMode::Open) => flags.push("open-network".to_string()),
        Some(SecurityMode::Wep) => flags.push("wep".to_string()),
        Some(SecurityMode::Wpa) => flags.push("wpa1-legacy".to_string()),
        // No WPA3 transition: every handshake is offline-crackable and
        // clients are KRACK-exposed.
        Some(SecurityMode::Wpa2) => flags.push("wpa2-only".to_string()),
        Some(SecurityMode::Wpa3) => {}
    }
    if matches!(device.wps, WpsState::Configured | WpsState::Unconfigured) {
        flags.push("wps-enabled".to_string());
    }
    let ssid = device.ssid.to_lowercase();
    if DEFAULT_SSID_MARKERS.iter().any(|m| ssid.contains(m)) {
        flags.push("default-ssid".to_string());
    }
    flags
}

/// Build the projection from a registry snapshot.
pub fn build(devices: &[Device], ssids: &[(String, SsidEntry)]) -> Graph {
    let mut graph = Graph { generated_at: now(), ..Default::default() };
    let known: HashMap<MacAddr, &Device> = devices.iter().map(|d| (d.mac, d)).collect();
    let mut ssid_nodes: HashSet<String> = HashSet::new();
    let mut stub_aps: HashSet<MacAddr> = HashSet::new();

    // Device nodes.
    for dev in devices {
        let group = match dev.kind {
            DeviceKind::AccessPoint => NodeGroup::Ap,
            DeviceKind::Station | DeviceKind::Unknown => NodeGroup::Station,
        };
        graph.nodes.push(GraphNode {
            id: dev.mac.to_string(),
            label: if dev.is_ap() && !dev.ssid.is_empty() {
                dev.ssid.clone()
            } else {
                dev.mac.to_string()
            },
            group,
            stale: false,
            rssi: Some(dev.rssi),
            channel: (dev.channel > 0).then_some(dev.channel),
            vulnerabilities: passive_vulnerabilities(dev),
        });
    }

    // Network nodes from the SSID index.
    for (ssid, _) in ssids {
        if ssid_nodes.insert(ssid.clone()) {
            graph.nodes.push(network_node(ssid));
        }
    }

    for dev in devices {
        // Connection edges, with stub APs for unseen targets.
        if let Some(bssid) = dev.connected_bssid
            && !dev.is_ap()
        {
            if !known.contains_key(&bssid) && stub_aps.insert(bssid) {
                graph.nodes.push(GraphNode {
                    id: bssid.to_string(),
                    label: bssid.to_string(),
                    group: NodeGroup::Ap,
                    stale: true,
                    rssi: None,
                    channel: None,
                    vulnerabilities: Vec::new(),
                });
            }
            let auth_failed = dev
                .connection
                .last_error
                .as_deref()
                .is_some_and(|e| e.to_lowercase().contains("auth"));
            graph.edges.push(GraphEdge {
                from: dev.mac.to_string(),
                to: bssid.to_string(),
                kind: EdgeKind::Connection,
                dashed: false,
                color: Some(if auth_failed { "red" } else { rssi_color(dev.rssi) }),
                label: auth_failed.then(|| "auth failed".to_string()),
            });
        }

        // Probe edges: station → every probed SSID it is not on.
        for probed in dev.probed_ssids.keys() {
            if probed.is_empty() || *probed == dev.ssid {
                continue;
            }
            if ssid_nodes.insert(probed.clone()) {
                graph.nodes.push(network_node(probed));
            }
            graph.edges.push(GraphEdge {
                from: dev.mac.to_string(),
                to: ssid_node_id(probed),
                kind: EdgeKind::Probe,
                dashed: true,
                color: None,
                label: None,
            });
        }

        // AP → its own SSID, solid.
        if dev.is_ap() && !dev.ssid.is_empty() {
            if ssid_nodes.insert(dev.ssid.clone()) {
                graph.nodes.push(network_node(&dev.ssid));
            }
            graph.edges.push(GraphEdge {
                from: dev.mac.to_string(),
                to: ssid_node_id(&dev.ssid),
                kind: EdgeKind::Probe,
                dashed: false,
                color: None,
                label: None,
            });
        }
    }

    // Correlation: randomized aliases sharing a probe-set digest are
    // likely one physical device.
    let mut by_digest: HashMap<[u8; 32], Vec<&Device>> = HashMap::new();
    for dev in devices {
        if dev.is_ap() {
            continue;
        }
        if let Some(digest) = dev.probe_set_digest() {
            by_digest.entry(digest).or_default().push(dev);
        }
    }
    for group in by_digest.values() {
        if group.len() < 2 || !group.iter().any(|d| d.randomized_mac) {
            continue;
        }
        for pair in group.windows(2) {
            graph.edges.push(GraphEdge {
                from: pair[0].mac.to_string(),
                to: pair[1].mac.to_string(),
                kind: EdgeKind::Correlation,
                dashed: true,
                color: None,
                label: Some("same device?".to_string()),
            });
        }
    }

    graph
}

fn network_node(ssid: &str) -> GraphNode {
    GraphNode {
        id: ssid_node_id(ssid),
        label: ssid.to_string(),
        group: NodeGroup::Network,
        stale: false,
        rssi: None,
        channel: None,
        vulnerabilities: Vec::new(),
    }
}

// =============================================================================
// CACHED SERVICE
// =============================================================================

struct CachedGraph {
    built_at: Instant,
    graph: Arc<Graph>,
}

pub struct GraphService {
    registry: Arc<DeviceRegistry>,
    ttl: Duration,
    cache: RwLock<Option<CachedGraph>>,
}

impl GraphService {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self::with_ttl(registry, Duration::from_millis(GRAPH_CACHE_TTL_MS))
    }

    pub fn with_ttl(registry: Arc<DeviceRegistry>, ttl: Duration) -> Self {
        Self { registry, ttl, cache: RwLock::new(None) }
    }

    /// Current projection, rebuilt at most once per TTL.
    pub fn graph(&self) -> Arc<Graph> {
        if let Some(cached) = self.cache.read().as_ref()
            && cached.built_at.elapsed() < self.ttl
        {
            return cached.graph.clone();
        }

        let mut slot = self.cache.write();
        // Someone may have rebuilt while we waited for the write lock.
        if let Some(cached) = slot.as_ref()
            && cached.built_at.elapsed() < self.ttl
        {
            return cached.graph.clone();
        }

        let graph = Arc::new(build(&self.registry.get_all(), &self.registry.all_ssids()));
        *slot = Some(CachedGraph { built_at: Instant::now(), graph: graph.clone() });
        graph
    }

    /// Drop the cache so the next read rebuilds.
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }
}
