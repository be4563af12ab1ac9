//! Attack coordinator: the single entry point for start/stop/status.
//!
//! Enriches every request before dispatch — fills the channel from the
//! registry, picks an interface from the sniffer's inventory, upgrades
//! broadcast deauths to targeted ones when a live client is known — and
//! audits every operation.

use super::authflood::{AuthFloodConfig, AuthFloodEngine};
use super::controller::ControllerSnapshot;
use super::deauth::{DeauthConfig, DeauthEngine, DeauthType};
use super::wps::{WpsConfig, WpsEngine};
use super::AttackError;
use crate::audit::{AuditKind, AuditLog};
use crate::registry::DeviceRegistry;
use crate::types::MacAddr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// One radio interface as reported by the capture subsystem, with the
/// channels it can tune.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub channels: Vec<u16>,
}

/// Sniffer-side inventory of usable radios. External collaborator; the
/// coordinator only reads it.
pub trait InterfaceProvider: Send + Sync {
    fn interfaces(&self) -> Vec<InterfaceInfo>;
}

pub struct AttackCoordinator {
    registry: Arc<DeviceRegistry>,
    audit: Arc<AuditLog>,
    provider: Option<Arc<dyn InterfaceProvider>>,
    deauth: Option<Arc<DeauthEngine>>,
    authflood: Option<Arc<AuthFloodEngine>>,
    wps: Option<Arc<WpsEngine>>,
}

impl AttackCoordinator {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        audit: Arc<AuditLog>,
        provider: Option<Arc<dyn InterfaceProvider>>,
        deauth: Option<Arc<DeauthEngine>>,
        authflood: Option<Arc<AuthFloodEngine>>,
        wps: Option<Arc<WpsEngine>>,
    ) -> Self {
        Self { registry, audit, provider, deauth, authflood, wps }
    }

    fn deauth_engine(&self) -> Result<&Arc<DeauthEngine>, AttackError> {
        self.deauth.as_ref().ok_or(AttackError::EngineNotInitialized("deauth"))
    }

    fn authflood_engine(&self) -> Result<&Arc<AuthFloodEngine>, AttackError> {
        self.authflood.as_ref().ok_or(AttackError::EngineNotInitialized("auth flood"))
    }

    fn wps_engine(&self) -> Result<&Arc<WpsEngine>, AttackError> {
        self.wps.as_ref().ok_or(AttackError::EngineNotInitialized("wps"))
    }

    /// Fill in channel (from the registry) and interface (from the
    /// sniffer inventory) when the caller left them blank.
    fn enrich(&self, target: MacAddr, channel: &mut u16, interface: &mut String) -> Result<(), AttackError> {
        if *channel == 0 {
            let device = self
                .registry
                .get(target)
                .ok_or_else(|| AttackError::NotFound(format!("device {target} not in registry")))?;
            if device.channel == 0 {
                return Err(AttackError::ConfigInvalid(format!(
                    "channel unknown for {target}; specify one"
                )));
            }
            *channel = device.channel;
        }

        if interface.is_empty()
            && let Some(provider) = &self.provider
        {
            let available = provider.interfaces();
            let chosen = available
                .iter()
                .find(|i| i.channels.contains(channel))
                .or_else(|| available.first());
            if let Some(info) = chosen {
                *interface = info.name.clone();
            }
        }
        Ok(())
    }

    /// For a broadcast deauth, find the most recently active station
    /// connected to the target and upgrade to a targeted attack on it.
    /// Ties on last-packet time fall to the first candidate seen.
    fn smart_target(&self, cfg: &mut DeauthConfig) {
        if cfg.deauth_type != DeauthType::Broadcast {
            return;
        }
        let candidate = self
            .registry
            .get_all()
            .into_iter()
            .filter(|d| d.connected_bssid == Some(cfg.target))
            .max_by_key(|d| d.last_packet);

        if let Some(client) = candidate {
            info!(
                "Smart targeting: {} has live client {}, upgrading",
                cfg.target, client.mac
            );
            self.audit.record(
                AuditKind::SmartTargeting,
                Some(cfg.target),
                None,
                format!(
                    "Smart Targeting: Upgraded Broadcast -> Targeted (client {})",
                    client.mac
                ),
            );
            cfg.deauth_type = DeauthType::Targeted;
            cfg.client = Some(client.mac);
        }
    }

    // -------------------------------------------------------------------------
    // Deauth
    // -------------------------------------------------------------------------

    pub async fn start_deauth(&self, mut cfg: DeauthConfig) -> Result<Uuid, AttackError> {
        let engine = self.deauth_engine()?;
        self.enrich(cfg.target, &mut cfg.channel, &mut cfg.interface)?;
        self.smart_target(&mut cfg);

        let target = cfg.target;
        let id = engine.start(cfg).await.map_err(|e| {
            info!("Deauth start against {} rejected: {}", target, e);
            e
        })?;
        self.audit.record(
            AuditKind::DeauthStart,
            Some(target),
            Some(id),
            format!("Deauth started against {target}"),
        );
        Ok(id)
    }

    pub fn stop_deauth(&self, id: Uuid, force: bool) -> Result<(), AttackError> {
        self.deauth_engine()?.stop(id, force)?;
        self.audit.record(
            AuditKind::DeauthStop,
            None,
            Some(id),
            format!("Deauth {id} stopped (force={force})"),
        );
        Ok(())
    }

    pub fn deauth_status(&self, id: Uuid) -> Result<ControllerSnapshot, AttackError> {
        self.deauth_engine()?.status(id)
    }

    // -------------------------------------------------------------------------
    // Auth flood
    // -------------------------------------------------------------------------

    pub async fn start_authflood(&self, mut cfg: AuthFloodConfig) -> Result<Uuid, AttackError> {
        let engine = self.authflood_engine()?;
        self.enrich(cfg.target, &mut cfg.channel, &mut cfg.interface)?;

        let target = cfg.target;
        let id = engine.start(cfg).await?;
        self.audit.record(
            AuditKind::AuthFloodStart,
            Some(target),
            Some(id),
            format!("Auth flood started against {target}"),
        );
        Ok(id)
    }

    pub fn stop_authflood(&self, id: Uuid, force: bool) -> Result<(), AttackError> {
        self.authflood_engine()?.stop(id, force)?;
        self.audit.record(
            AuditKind::AuthFloodStop,
            None,
            Some(id),
            format!("Auth flood {id} stopped (force={force})"),
        );
        Ok(())
    }

    pub fn authflood_status(&self, id: Uuid) -> Result<ControllerSnapshot, AttackError> {
        self.authflood_engine()?.status(id)
    }

    // -------------------------------------------------------------------------
    // WPS
    // -------------------------------------------------------------------------

    pub async fn start_wps(&self, mut cfg: WpsConfig) -> Result<Uuid, AttackError> {
        let engine = self.wps_engine()?;
        self.enrich(cfg.target, &mut cfg.channel, &mut cfg.interface)?;

        let target = cfg.target;
        let id = engine.start(cfg).await?;
        self.audit.record(
            AuditKind::WpsStart,
            Some(target),
            Some(id),
            format!("WPS recovery started against {target}"),
        );
        Ok(id)
    }

    pub fn stop_wps(&self, id: Uuid, force: bool) -> Result<(), AttackError> {
        self.wps_engine()?.stop(id, force)?;
        self.audit.record(
            AuditKind::WpsStop,
            None,
            Some(id),
            format!("WPS {id} stopped (force={force})"),
        );
        Ok(())
    }

    pub fn wps_status(&self, id: Uuid) -> Result<ControllerSnapshot, AttackError> {
        self.wps_engine()?.status(id)
    }

    // -------------------------------------------------------------------------
    // Cross-engine
    // -------------------------------------------------------------------------

    /// Snapshot every attack across every initialized engine.
    pub fn list_all(&self) -> Vec<ControllerSnapshot> {
        let mut all = Vec::new();
        if let Some(e) = &self.deauth {
            all.extend(e.list());
        }
        if let Some(e) = &self.authflood {
            all.extend(e.list());
        }
        if let Some(e) = &self.wps {
            all.extend(e.list());
        }
        all
    }

    /// Service-shutdown path: cancel everything everywhere.
    pub fn stop_all(&self) {
        if let Some(e) = &self.deauth {
            e.stop_all();
        }
        if let Some(e) = &self.authflood {
            e.stop_all();
        }
        if let Some(e) = &self.wps {
            e.stop_all();
        }
    }

    /// Collect finished controllers in every engine.
    pub fn sweep_finished(&self) -> usize {
        let mut swept = 0;
        if let Some(e) = &self.deauth {
            swept += e.sweep_finished();
        }
        if let Some(e) = &self.authflood {
            swept += e.sweep_finished();
        }
        if let Some(e) = &self.wps {
            swept += e.sweep_finished();
        }
        swept
    }
}
