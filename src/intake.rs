//! Device intake fan-out.
//!
//! The capture subsystem pushes typed `Device` observations into a
//! bounded channel; N workers (CPU count by default) drain it, merge
//! into the registry and hand the merged snapshot to the persistence
//! pump. Workers never block on I/O other than the channel itself —
//! `PersistencePump::persist` is a non-blocking try-send.

use crate::device::Device;
use crate::persist::PersistencePump;
use crate::registry::DeviceRegistry;
use crate::types::MacAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default capacity of the intake channel.
pub const INTAKE_QUEUE_CAP: usize = 4_096;

pub struct IntakeWorkers {
    handles: Vec<JoinHandle<()>>,
    token: CancellationToken,
}

impl IntakeWorkers {
    /// Spawn `workers` consumers (0 = CPU count) on `rx`.
    ///
    /// Signature-change discoveries are forwarded on `discovery_tx` when
    /// provided; a full discovery channel is not worth blocking intake,
    /// so those sends are try-sends too.
    pub fn spawn(
        registry: Arc<DeviceRegistry>,
        pump: Arc<PersistencePump>,
        rx: mpsc::Receiver<Device>,
        workers: usize,
        discovery_tx: Option<mpsc::Sender<MacAddr>>,
    ) -> Self {
        let workers = if workers == 0 { num_cpus::get() } else { workers };
        let token = CancellationToken::new();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        info!("Starting {} intake workers", workers);

        let handles = (0..workers)
            .map(|_| {
                let registry = registry.clone();
                let pump = pump.clone();
                let rx = rx.clone();
                let discovery_tx = discovery_tx.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    loop {
                        let device = tokio::select! {
                            _ = token.cancelled() => break,
                            dev = async { rx.lock().await.recv().await } => match dev {
                                Some(d) => d,
                                None => break,
                            },
                        };
                        let (merged, discovery) = registry.process(device);
                        if discovery
                            && let Some(tx) = &discovery_tx
                            && tx.try_send(merged.mac).is_err()
                        {
                            debug!("Discovery channel full, dropping {}", merged.mac);
                        }
                        pump.persist(merged);
                    }
                })
            })
            .collect();

        Self { handles, token }
    }

    /// Stop the workers. In-flight devices finish processing; queued
    /// ones are abandoned with the channel.
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
