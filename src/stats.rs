//! Alert feed and aggregate system statistics.

use crate::registry::DeviceRegistry;
use crate::types::{Alert, ALERT_FEED_CAP};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Bounded in-memory window of alerts from the capture subsystem.
pub struct AlertFeed {
    alerts: Mutex<VecDeque<Alert>>,
    cap: usize,
}

impl AlertFeed {
    pub fn new() -> Self {
        Self::with_capacity(ALERT_FEED_CAP)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { alerts: Mutex::new(VecDeque::new()), cap }
    }

    pub fn push(&self, alert: Alert) {
        let mut alerts = self.alerts.lock();
        if alerts.len() >= self.cap {
            alerts.pop_front();
        }
        alerts.push_back(alert);
    }

    pub fn list(&self) -> Vec<Alert> {
        self.alerts.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }
}

impl Default for AlertFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate snapshot for the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub devices: usize,
    pub access_points: usize,
    pub stations: usize,
    pub alerts: usize,
    /// Mean retries-per-packet across devices that sent anything.
    pub avg_retry_rate: f64,
    pub vendors: HashMap<String, u64>,
    pub security: HashMap<String, u64>,
}

pub fn system_stats(registry: &DeviceRegistry, alerts: &AlertFeed) -> SystemStats {
    let devices = registry.get_all();
    let reg_stats = registry.stats();

    let mut vendors: HashMap<String, u64> = HashMap::new();
    let mut security: HashMap<String, u64> = HashMap::new();
    let mut retry_sum = 0.0;
    let mut retry_samples = 0u64;

    for dev in &devices {
        if !dev.vendor.is_empty() {
            *vendors.entry(dev.vendor.clone()).or_insert(0) += 1;
        }
        if let Some(sec) = dev.security {
            *security.entry(sec.to_string()).or_insert(0) += 1;
        }
        if dev.packets > 0 {
            retry_sum += dev.retries as f64 / dev.packets as f64;
            retry_samples += 1;
        }
    }

    SystemStats {
        devices: reg_stats.devices,
        access_points: reg_stats.access_points,
        stations: reg_stats.stations,
        alerts: alerts.len(),
        avg_retry_rate: if retry_samples > 0 { retry_sum / retry_samples as f64 } else { 0.0 },
        vendors,
        security,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::types::{AlertSeverity, DeviceKind, SecurityMode};

    #[test]
    fn test_alert_feed_bounded() {
        let feed = AlertFeed::with_capacity(3);
        for i in 0..5 {
            feed.push(Alert {
                kind: "test".into(),
                severity: AlertSeverity::Info,
                device: "00:00:00:00:00:01".parse().unwrap(),
                timestamp: i,
                message: format!("alert {i}"),
            });
        }
        let alerts = feed.list();
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].timestamp, 2);
    }

    #[test]
    fn test_system_stats_histograms() {
        let reg = DeviceRegistry::new();
        let mut ap = Device::new("AA:00:00:00:00:01".parse().unwrap());
        ap.kind = DeviceKind::AccessPoint;
        ap.vendor = "Acme".into();
        ap.security = Some(SecurityMode::Wpa2);
        ap.packets = 10;
        ap.retries = 5;
        reg.process(ap);

        let mut sta = Device::new("00:11:22:33:44:55".parse().unwrap());
        sta.kind = DeviceKind::Station;
        sta.vendor = "Acme".into();
        sta.packets = 4;
        sta.retries = 1;
        reg.process(sta);

        let feed = AlertFeed::new();
        let stats = system_stats(&reg, &feed);
        assert_eq!(stats.devices, 2);
        assert_eq!(stats.access_points, 1);
        assert_eq!(stats.stations, 1);
        assert_eq!(stats.vendors["Acme"], 2);
        assert_eq!(stats.security["WPA2"], 1);
        assert!((stats.avg_retry_rate - 0.375).abs() < 1e-9);
    }
}
