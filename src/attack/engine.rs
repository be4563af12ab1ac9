//! Shared engine plumbing: the controller map, concurrency gate,
//! injector resolution and the common operational contract
//! (stop / status / list / stop_all / sweep).

use super::controller::{AttackController, ControllerSnapshot};
use super::{AttackError, AttackStatus};
use crate::radio::{ChannelLocker, ChannelSwitcher, Injector, RawInjector};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct EngineCore {
    name: &'static str,
    active: Mutex<HashMap<Uuid, Arc<AttackController>>>,
    max_concurrent: usize,
    pub locker: Option<Arc<ChannelLocker>>,
    pub switcher: Option<Arc<dyn ChannelSwitcher>>,
    pub default_injector: Option<Arc<dyn Injector>>,
}

impl EngineCore {
    pub fn new(
        name: &'static str,
        max_concurrent: usize,
        locker: Option<Arc<ChannelLocker>>,
        switcher: Option<Arc<dyn ChannelSwitcher>>,
        default_injector: Option<Arc<dyn Injector>>,
    ) -> Self {
        Self {
            name,
            active: Mutex::new(HashMap::new()),
            max_concurrent,
            locker,
            switcher,
            default_injector,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a fresh controller, enforcing the concurrency cap.
    /// Only non-terminal controllers count against the cap, so a map
    /// full of finished-but-unswept attacks does not starve new ones.
    pub fn register(&self, controller: Arc<AttackController>) -> Result<(), AttackError> {
        let mut active = self.active.lock();
        let running = active.values().filter(|c| c.status().is_active()).count();
        if running >= self.max_concurrent {
            return Err(AttackError::ResourceExhausted { limit: self.max_concurrent });
        }
        active.insert(controller.id, controller);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<AttackController>, AttackError> {
        self.active
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| AttackError::NotFound(format!("attack {id}")))
    }

    /// Stop one attack. Without `force`, only running or paused attacks
    /// may be stopped.
    pub fn stop(&self, id: Uuid, force: bool) -> Result<(), AttackError> {
        let controller = self.get(id)?;
        let status = controller.status();
        if !force && !matches!(status, AttackStatus::Running | AttackStatus::Paused) {
            return Err(AttackError::IllegalState(format!(
                "attack {id} is {status:?}, not stoppable without force"
            )));
        }
        info!("{}: stopping attack {} (force={})", self.name, id, force);
        controller.stop_with_note("Stopped by user");
        controller.cancel();
        controller.close_dedicated_injector();
        Ok(())
    }

    pub fn status(&self, id: Uuid) -> Result<ControllerSnapshot, AttackError> {
        Ok(self.get(id)?.snapshot())
    }

    /// Live status stream for one attack.
    pub fn subscribe(&self, id: Uuid) -> Result<watch::Receiver<ControllerSnapshot>, AttackError> {
        Ok(self.get(id)?.subscribe())
    }

    pub fn list(&self) -> Vec<ControllerSnapshot> {
        self.active.lock().values().map(|c| c.snapshot()).collect()
    }

    /// Cancel every active controller (service shutdown path).
    pub fn stop_all(&self) {
        let controllers: Vec<_> = self.active.lock().values().cloned().collect();
        for controller in controllers {
            if controller.status().is_active() {
                controller.stop_with_note("Service shutdown");
                controller.cancel();
                controller.close_dedicated_injector();
            }
        }
    }

    /// Delete controllers that reached a terminal state. Safe to call
    /// concurrently; a second sweep finds nothing left to delete.
    pub fn sweep_finished(&self) -> usize {
        let mut active = self.active.lock();
        let before = active.len();
        active.retain(|_, c| c.status().is_active());
        let removed = before - active.len();
        if removed > 0 {
            info!("{}: swept {} finished attacks", self.name, removed);
        }
        removed
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().values().filter(|c| c.status().is_active()).count()
    }

    /// Resolve the injector for an attack.
    ///
    /// Empty interface inherits the engine default; a matching interface
    /// reuses it; anything else gets a dedicated injector the attack
    /// owns for its lifetime, with the configured channel asserted first.
    /// Returns (injector, dedicated).
    pub fn resolve_injector(
        &self,
        interface: &str,
        channel: u16,
    ) -> Result<(Arc<dyn Injector>, bool), AttackError> {
        if interface.is_empty() {
            return self
                .default_injector
                .clone()
                .map(|i| (i, false))
                .ok_or_else(|| AttackError::Hardware("no default injector".into()));
        }

        if let Some(default) = &self.default_injector
            && default.interface() == interface
        {
            return Ok((default.clone(), false));
        }

        if channel > 0
            && let Some(switcher) = &self.switcher
            && let Err(e) = switcher.set_channel(interface, channel)
        {
            warn!("{}: failed to pre-tune {} to {}: {}", self.name, interface, channel, e);
        }

        let injector = RawInjector::new(interface)?;
        injector.optimize_for_injection();
        Ok((Arc::new(injector), true))
    }

    /// Run a worker under panic supervision: a panicking worker marks
    /// its attack failed with the panic message and the engine keeps
    /// serving the others.
    pub fn supervise<F>(&self, controller: Arc<AttackController>, worker: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = self.name;
        let handle = tokio::spawn(worker);
        tokio::spawn(async move {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_panic() => {
                    let msg = match e.into_panic().downcast::<String>() {
                        Ok(s) => *s,
                        Err(p) => match p.downcast::<&'static str>() {
                            Ok(s) => (*s).to_string(),
                            Err(_) => "unknown panic".to_string(),
                        },
                    };
                    error!("{}: attack {} worker panicked: {}", name, controller.id, msg);
                    controller.fail(format!("worker panic: {msg}"));
                }
                Err(_) => {
                    // Cancelled at runtime shutdown.
                }
            }
            // Whatever happened, the attack must end terminal.
            if controller.status().is_active() {
                controller.set_status(AttackStatus::Stopped);
            }
            controller.close_dedicated_injector();
        });
    }
}
