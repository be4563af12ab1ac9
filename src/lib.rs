pub mod attack;
pub mod audit;
pub mod config;
pub mod device;
pub mod graph;
pub mod intake;
pub mod persist;
pub mod radio;
pub mod registry;
pub mod stats;
pub mod types;

pub use attack::{
    AttackController, AttackCoordinator, AttackError, AttackKind, AttackStatus,
    AuthFloodConfig, AuthFloodEngine, ControllerSnapshot, DeauthConfig, DeauthEngine,
    EngineCore, InterfaceInfo, InterfaceProvider, WpsConfig, WpsEngine,
};
pub use audit::{AuditEntry, AuditKind, AuditLog};
pub use config::Config;
pub use device::Device;
pub use graph::{Graph, GraphService};
pub use intake::IntakeWorkers;
pub use persist::{MemorySink, PersistencePump, SledSink, StorageSink};
pub use radio::{
    ChannelHopper, ChannelLocker, ChannelSwitcher, FrameBuilder, HopperState, Injector,
    IwSwitcher, RadioError, RawInjector,
};
pub use registry::DeviceRegistry;
pub use stats::{system_stats, AlertFeed, SystemStats};
pub use types::*;
