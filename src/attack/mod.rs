//! Attack orchestration: per-kind engines, controllers, the
//! effectiveness monitor and the coordinator facade.

pub mod authflood;
pub mod controller;
pub mod coordinator;
pub mod deauth;
pub mod engine;
pub mod monitor;
pub mod wps;

pub use authflood::{AuthFloodConfig, AuthFloodEngine, AuthFloodType};
pub use controller::{AttackController, ControllerSnapshot};
pub use coordinator::{AttackCoordinator, InterfaceInfo, InterfaceProvider};
pub use deauth::{DeauthConfig, DeauthEngine, DeauthType};
pub use engine::EngineCore;
pub use wps::{WpsConfig, WpsEngine, WpsPhase};

use crate::radio::RadioError;
use serde::{Deserialize, Serialize};

/// What kind of attack a controller runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackKind {
    Deauth,
    AuthFlood,
    Wps,
}

/// Controller lifecycle status.
///
/// Active statuses never carry an end timestamp; terminal statuses
/// always do. Transitions out of a terminal status are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackStatus {
    Pending,
    Running,
    Paused,
    Stopped,
    Failed,
    Success,
    Timeout,
}

impl AttackStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttackStatus::Stopped
                | AttackStatus::Failed
                | AttackStatus::Success
                | AttackStatus::Timeout
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

/// Errors surfaced by attack start/stop/status operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AttackError {
    /// Missing or malformed configuration field.
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("maximum of {limit} concurrent attacks reached")]
    ResourceExhausted { limit: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("interface {interface} is locked on channel {held}")]
    ChannelBusy { interface: String, held: u16 },

    #[error("hardware failure: {0}")]
    Hardware(String),

    #[error("external tool missing: {0}")]
    ExternalToolMissing(String),

    #[error("{0} engine not initialized")]
    EngineNotInitialized(&'static str),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RadioError> for AttackError {
    fn from(e: RadioError) -> Self {
        match e {
            RadioError::ChannelBusy { interface, held } => {
                AttackError::ChannelBusy { interface, held }
            }
            RadioError::InvalidChannel(ch) => {
                AttackError::ConfigInvalid(format!("invalid channel {ch}"))
            }
            other => AttackError::Hardware(other.to_string()),
        }
    }
}
