//! Per-attack controller state.
//!
//! A controller is created by an engine at start, lives in the engine's
//! active map until a finished-sweep collects it, and owns its cancel
//! token plus any dedicated injector. Status transitions are serialized
//! by the controller's own mutex; external observers get snapshots, live
//! ones via the watch stream.

use super::{AttackKind, AttackStatus};
use crate::radio::Injector;
use crate::types::{now, WPS_LOG_BUFFER_CAP};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Inner {
    status: AttackStatus,
    error: Option<String>,
    /// Kind-specific progress note (e.g. WPS phase).
    phase: Option<String>,
    pin: Option<String>,
    psk: Option<String>,
    handshake_captured: bool,
    started_at: u64,
    ended_at: Option<u64>,
    log: String,
}

/// Owned snapshot of a controller, safe to hand to any consumer.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub id: Uuid,
    pub kind: AttackKind,
    pub status: AttackStatus,
    pub packets_sent: u64,
    pub error: Option<String>,
    pub phase: Option<String>,
    pub pin: Option<String>,
    pub psk: Option<String>,
    pub handshake_captured: bool,
    pub started_at: u64,
    pub ended_at: Option<u64>,
    /// Config as captured at start.
    pub config: serde_json::Value,
}

pub struct AttackController {
    pub id: Uuid,
    pub kind: AttackKind,
    config: serde_json::Value,
    inner: Mutex<Inner>,
    packets_sent: AtomicU64,
    cancel: CancellationToken,
    status_tx: watch::Sender<ControllerSnapshot>,
    dedicated: Mutex<Option<Arc<dyn Injector>>>,
}

impl AttackController {
    pub fn new(kind: AttackKind, config: serde_json::Value) -> Arc<Self> {
        let id = Uuid::new_v4();
        let snapshot = ControllerSnapshot {
            id,
            kind,
            status: AttackStatus::Pending,
            packets_sent: 0,
            error: None,
            phase: None,
            pin: None,
            psk: None,
            handshake_captured: false,
            started_at: now(),
            ended_at: None,
            config: config.clone(),
        };
        let (status_tx, _) = watch::channel(snapshot);
        Arc::new(Self {
            id,
            kind,
            config,
            inner: Mutex::new(Inner {
                status: AttackStatus::Pending,
                error: None,
                phase: None,
                pin: None,
                psk: None,
                handshake_captured: false,
                started_at: now(),
                ended_at: None,
                log: String::new(),
            }),
            packets_sent: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            status_tx,
            dedicated: Mutex::new(None),
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Live status stream; one snapshot per transition or counter batch.
    pub fn subscribe(&self) -> watch::Receiver<ControllerSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let g = self.inner.lock();
        ControllerSnapshot {
            id: self.id,
            kind: self.kind,
            status: g.status,
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            error: g.error.clone(),
            phase: g.phase.clone(),
            pin: g.pin.clone(),
            psk: g.psk.clone(),
            handshake_captured: g.handshake_captured,
            started_at: g.started_at,
            ended_at: g.ended_at,
            config: self.config.clone(),
        }
    }

    pub fn status(&self) -> AttackStatus {
        self.inner.lock().status
    }

    /// Transition the status. Terminal states stamp the end time once;
    /// later transitions out of a terminal state are ignored so a
    /// worker's epilogue cannot overwrite an operator's stop.
    pub fn set_status(&self, status: AttackStatus) -> bool {
        let changed = {
            let mut g = self.inner.lock();
            if g.status.is_terminal() {
                false
            } else {
                g.status = status;
                if status.is_terminal() && g.ended_at.is_none() {
                    g.ended_at = Some(now());
                }
                true
            }
        };
        if changed {
            self.publish();
        }
        changed
    }

    pub fn fail(&self, error: impl Into<String>) -> bool {
        let error = error.into();
        {
            let mut g = self.inner.lock();
            if g.status.is_terminal() {
                return false;
            }
            g.error = Some(error);
        }
        self.set_status(AttackStatus::Failed)
    }

    /// Terminal stop with a cause note ("Stopped by user", "Service
    /// shutdown", ...).
    pub fn stop_with_note(&self, note: impl Into<String>) -> bool {
        {
            let mut g = self.inner.lock();
            if g.status.is_terminal() {
                return false;
            }
            g.error = Some(note.into());
        }
        self.set_status(AttackStatus::Stopped)
    }

    pub fn add_packets(&self, n: u64) {
        self.packets_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    /// Push the current counters to status-stream subscribers.
    pub fn publish(&self) {
        let _ = self.status_tx.send(self.snapshot());
    }

    pub fn set_phase(&self, phase: impl Into<String>) {
        self.inner.lock().phase = Some(phase.into());
        self.publish();
    }

    pub fn set_pin(&self, pin: impl Into<String>) {
        self.inner.lock().pin = Some(pin.into());
    }

    pub fn set_psk(&self, psk: impl Into<String>) {
        self.inner.lock().psk = Some(psk.into());
    }

    pub fn mark_handshake(&self) {
        self.inner.lock().handshake_captured = true;
        self.publish();
    }

    pub fn handshake_captured(&self) -> bool {
        self.inner.lock().handshake_captured
    }

    /// Append a line of child-tool output, bounded; the oldest half is
    /// shed when the cap is hit.
    pub fn append_log(&self, line: &str) {
        let mut g = self.inner.lock();
        if g.log.len() + line.len() + 1 > WPS_LOG_BUFFER_CAP {
            let keep_from = g.log.len().saturating_sub(WPS_LOG_BUFFER_CAP / 2);
            // Shed on a char boundary.
            let keep_from = (keep_from..g.log.len())
                .find(|&i| g.log.is_char_boundary(i))
                .unwrap_or(g.log.len());
            g.log.drain(..keep_from);
        }
        g.log.push_str(line);
        g.log.push('\n');
    }

    pub fn log(&self) -> String {
        self.inner.lock().log.clone()
    }

    /// Hand the controller exclusive ownership of a dedicated injector.
    pub fn set_dedicated_injector(&self, injector: Arc<dyn Injector>) {
        *self.dedicated.lock() = Some(injector);
    }

    /// Close and drop the dedicated injector, if any. Idempotent.
    pub fn close_dedicated_injector(&self) {
        if let Some(injector) = self.dedicated.lock().take() {
            injector.close();
        }
    }
}
