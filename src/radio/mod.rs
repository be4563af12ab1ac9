//! Radio control layer: channel switching, hopping, locking, frame
//! synthesis and raw injection.

pub mod frames;
pub mod hopper;
pub mod injector;
pub mod locker;
pub mod switcher;

pub use frames::{FrameBuilder, FrameKind, SequenceCounter};
pub use hopper::{ChannelHopper, HopperState};
pub use injector::{Injector, MonitorEvent, RawInjector};
pub use locker::{ChannelGuard, ChannelLocker};
pub use switcher::{set_with_retry, ChannelSwitcher, IwSwitcher};

/// Errors from the radio layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RadioError {
    /// Channel values are 1-based; 0 and out-of-plan values fail fast.
    #[error("invalid channel {0}")]
    InvalidChannel(u16),

    #[error("failed to set {interface} to channel {channel}: {reason}")]
    ChannelSetFailed {
        interface: String,
        channel: u16,
        reason: String,
    },

    /// The locker already holds a different channel on this interface.
    #[error("interface {interface} is locked on channel {held}")]
    ChannelBusy { interface: String, held: u16 },

    #[error("failed to open injector on {interface}: {reason}")]
    InjectorOpenFailed { interface: String, reason: String },

    #[error("injection failed on {interface}: {reason}")]
    InjectFailed { interface: String, reason: String },

    #[error("injector on {interface} is closed")]
    InjectorClosed { interface: String },
}
