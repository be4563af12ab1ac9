//! Asynchronous persistence pump and the storage sink contract.
//!
//! Intake workers hand merged devices to [`PersistencePump::persist`],
//! which is a single bounded try-send: when the queue is full the update
//! is dropped, never blocking the packet-processing path. A single
//! background worker coalesces updates per MAC (last wins) and flushes a
//! batch when it fills or the interval elapses. The sink is swappable at
//! runtime; buffered items always flush to whichever sink is installed
//! at flush time.

use crate::config::PersistenceConfig;
use crate::device::Device;
use crate::types::{MacAddr, VulnStatus, Vulnerability};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend: {0}")]
    Backend(String),

    #[error("serialization: {0}")]
    Serialize(String),

    #[error("store is closed")]
    Closed,
}

/// The asynchronous storage sink contract. Implementations only need
/// "accept-or-error" semantics; transactions are their business.
pub trait StorageSink: Send + Sync {
    fn save_batch(&self, devices: &[Device]) -> Result<(), StoreError>;
    fn save(&self, device: &Device) -> Result<(), StoreError>;
    fn get(&self, mac: MacAddr) -> Result<Option<Device>, StoreError>;
    fn get_all(&self) -> Result<Vec<Device>, StoreError>;
    fn save_vulnerability(&self, vuln: &Vulnerability) -> Result<(), StoreError>;
    fn get_vulnerabilities(&self, device: Option<MacAddr>) -> Result<Vec<Vulnerability>, StoreError>;
    fn update_vulnerability_status(
        &self,
        id: &str,
        status: VulnStatus,
        notes: &str,
    ) -> Result<(), StoreError>;
    fn close(&self) -> Result<(), StoreError>;
}

// =============================================================================
// PUMP
// =============================================================================

pub struct PersistencePump {
    tx: mpsc::Sender<Device>,
    enabled: AtomicBool,
    sink: Arc<Mutex<Arc<dyn StorageSink>>>,
    dropped: AtomicU64,
    token: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PersistencePump {
    pub fn new(sink: Arc<dyn StorageSink>, cfg: &PersistenceConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(cfg.buffer_size.max(1));
        let sink = Arc::new(Mutex::new(sink));
        let token = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            rx,
            sink.clone(),
            cfg.batch_size.max(1),
            Duration::from_secs(cfg.interval.max(1)),
            token.clone(),
        ));

        Arc::new(Self {
            tx,
            enabled: AtomicBool::new(cfg.enabled),
            sink,
            dropped: AtomicU64::new(0),
            token,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a device for storage. No-op when disabled; silent drop when
    /// the queue is full.
    pub fn persist(&self, device: Device) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        if self.tx.try_send(device).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped.is_power_of_two() {
                debug!("Persistence queue full; {} updates dropped so far", dropped);
            }
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        info!("Persistence {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Swap the sink. Already-buffered items flush to the new sink.
    pub fn swap_sink(&self, sink: Arc<dyn StorageSink>) {
        *self.sink.lock() = sink;
        info!("Storage sink swapped");
    }

    /// Drain the queue, flush the buffer and stop the worker.
    pub async fn shutdown(&self) {
        self.token.cancel();
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Device>,
    sink: Arc<Mutex<Arc<dyn StorageSink>>>,
    batch_size: usize,
    interval: Duration,
    token: CancellationToken,
) {
    let mut buffer: HashMap<MacAddr, Device> = HashMap::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.reset(); // skip the immediate first tick

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            device = rx.recv() => match device {
                Some(device) => {
                    buffer.insert(device.mac, device);
                    if buffer.len() >= batch_size {
                        flush(&sink, &mut buffer);
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&sink, &mut buffer);
                }
            }
        }
    }

    // Shutdown: drain whatever is still queued, then one final flush.
    while let Ok(device) = rx.try_recv() {
        buffer.insert(device.mac, device);
    }
    flush(&sink, &mut buffer);
    debug!("Persistence worker exited");
}

fn flush(sink: &Arc<Mutex<Arc<dyn StorageSink>>>, buffer: &mut HashMap<MacAddr, Device>) {
    if buffer.is_empty() {
        return;
    }
    let devices: Vec<Device> = buffer.drain().map(|(_, d)| d).collect();
    let sink = sink.lock().clone();
    match sink.save_batch(&devices) {
        Ok(()) => debug!("Flushed {} devices", devices.len()),
        Err(e) => warn!("Batch flush of {} devices failed: {}", devices.len(), e),
    }
}

// =============================================================================
// MEMORY SINK
// =============================================================================

/// In-memory sink for tests and dry runs.
#[derive(Default)]
pub struct MemorySink {
    devices: Mutex<HashMap<MacAddr, Device>>,
    vulns: Mutex<HashMap<String, Vulnerability>>,
    batches: AtomicU64,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of save_batch calls (test observability).
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn device_count(&self) -> usize {
        self.devices.lock().len()
    }
}

impl StorageSink for MemorySink {
    fn save_batch(&self, devices: &[Device]) -> Result<(), StoreError> {
        self.batches.fetch_add(1, Ordering::Relaxed);
        let mut map = self.devices.lock();
        for device in devices {
            map.insert(device.mac, device.clone());
        }
        Ok(())
    }

    fn save(&self, device: &Device) -> Result<(), StoreError> {
        self.devices.lock().insert(device.mac, device.clone());
        Ok(())
    }

    fn get(&self, mac: MacAddr) -> Result<Option<Device>, StoreError> {
        Ok(self.devices.lock().get(&mac).cloned())
    }

    fn get_all(&self) -> Result<Vec<Device>, StoreError> {
        Ok(self.devices.lock().values().cloned().collect())
    }

    fn save_vulnerability(&self, vuln: &Vulnerability) -> Result<(), StoreError> {
        self.vulns.lock().insert(vuln.id.clone(), vuln.clone());
        Ok(())
    }

    fn get_vulnerabilities(&self, device: Option<MacAddr>) -> Result<Vec<Vulnerability>, StoreError> {
        Ok(self
            .vulns
            .lock()
            .values()
            .filter(|v| device.is_none_or(|mac| v.device == mac))
            .cloned()
            .collect())
    }

    fn update_vulnerability_status(
        &self,
        id: &str,
        status: VulnStatus,
        notes: &str,
    ) -> Result<(), StoreError> {
        let mut vulns = self.vulns.lock();
        let vuln = vulns
            .get_mut(id)
            .ok_or_else(|| StoreError::Backend(format!("unknown vulnerability {id}")))?;
        vuln.status = status;
        vuln.notes = notes.to_string();
        vuln.status_changed = chrono::Utc::now();
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

// =============================================================================
// SLED SINK
// =============================================================================

/// Default on-disk sink: one tree for devices, one for vulnerabilities,
/// bincode values (local storage only — nothing untrusted lands here).
pub struct SledSink {
    db: sled::Db,
    devices: sled::Tree,
    vulns: sled::Tree,
}

impl SledSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::Backend(e.to_string()))?;
        let devices = db.open_tree("devices").map_err(|e| StoreError::Backend(e.to_string()))?;
        let vulns = db.open_tree("vulns").map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { db, devices, vulns })
    }

    fn put_device(&self, device: &Device) -> Result<(), StoreError> {
        let value = bincode::serialize(device).map_err(|e| StoreError::Serialize(e.to_string()))?;
        self.devices
            .insert(device.mac.to_string().as_bytes(), value)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}

impl StorageSink for SledSink {
    fn save_batch(&self, devices: &[Device]) -> Result<(), StoreError> {
        for device in devices {
            self.put_device(device)?;
        }
        self.db.flush().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn save(&self, device: &Device) -> Result<(), StoreError> {
        self.put_device(device)?;
        self.db.flush().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn get(&self, mac: MacAddr) -> Result<Option<Device>, StoreError> {
        let value = self
            .devices
            .get(mac.to_string().as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        value
            .map(|v| bincode::deserialize(&v).map_err(|e| StoreError::Serialize(e.to_string())))
            .transpose()
    }

    fn get_all(&self) -> Result<Vec<Device>, StoreError> {
        let mut out = Vec::new();
        for item in self.devices.iter() {
            let (_, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            out.push(
                bincode::deserialize(&value).map_err(|e| StoreError::Serialize(e.to_string()))?,
            );
        }
        Ok(out)
    }

    fn save_vulnerability(&self, vuln: &Vulnerability) -> Result<(), StoreError> {
        let value = bincode::serialize(vuln).map_err(|e| StoreError::Serialize(e.to_string()))?;
        self.vulns
            .insert(vuln.id.as_bytes(), value)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    fn get_vulnerabilities(&self, device: Option<MacAddr>) -> Result<Vec<Vulnerability>, StoreError> {
        let mut out = Vec::new();
        for item in self.vulns.iter() {
            let (_, value) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            let vuln: Vulnerability =
                bincode::deserialize(&value).map_err(|e| StoreError::Serialize(e.to_string()))?;
            if device.is_none_or(|mac| vuln.device == mac) {
                out.push(vuln);
            }
        }
        Ok(out)
    }

    fn update_vulnerability_status(
        &self,
        id: &str,
        status: VulnStatus,
        notes: &str,
    ) -> Result<(), StoreError> {
        let value = self
            .vulns
            .get(id.as_bytes())
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .ok_or_else(|| StoreError::Backend(format!("unknown vulnerability {id}")))?;
        let mut vuln: Vulnerability =
            bincode::deserialize(&value).map_err(|e| StoreError::Serialize(e.to_string()))?;
        vuln.status = status;
        vuln.notes = notes.to_string();
        vuln.status_changed = chrono::Utc::now();
        self.save_vulnerability(&vuln)
    }

    fn close(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }
}
