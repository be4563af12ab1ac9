//! Talon — wireless reconnaissance and attack orchestration service.
//!
//! Boots the radio layer (hoppers + locker + injector), the device
//! registry with its intake workers, the persistence pump and the attack
//! engines, then idles until the capture subsystem feeds it or an
//! operator drives the coordinator. Ctrl-C tears everything down in
//! order: attacks, hoppers, intake, persistence.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use talon::attack::{AuthFloodEngine, DeauthEngine, WpsEngine};
use talon::config::{load_channel_map, save_channel_map, Config};
use talon::radio::{ChannelHopper, ChannelLocker, ChannelSwitcher, IwSwitcher, RawInjector};
use talon::types::DEFAULT_CHANNELS;
use talon::{
    system_stats, AlertFeed, AttackCoordinator, AuditLog, DeviceRegistry, EngineCore, Injector,
    IntakeWorkers, PersistencePump, SledSink, StorageSink,
};
use tracing::{error, info, warn};

/// Talon version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "talon", version, about = "Talon: 802.11 recon and attack orchestration")]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Radio interfaces (overrides the config)
    #[arg(short, long)]
    interface: Vec<String>,

    /// Data directory
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Hop dwell time in milliseconds (overrides the config)
    #[arg(long)]
    dwell: Option<u64>,

    /// Disable the persistence pump
    #[arg(long)]
    no_persist: bool,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("talon=info".parse().expect("static directive")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!("Failed to load config {}: {}", path.display(), e);
                return;
            }
        },
        None => Config::default(),
    };
    if !args.interface.is_empty() {
        config.interfaces = args.interface.clone();
    }
    if let Some(dwell) = args.dwell {
        config.dwell_time = dwell;
    }
    if args.no_persist {
        config.persistence.enabled = false;
    }

    info!("════════════════════════════════════════════════════════════");
    info!("  Talon v{} — radio control core", VERSION);
    info!("════════════════════════════════════════════════════════════");
    if config.interfaces.is_empty() {
        warn!("No radio interfaces configured; hopping disabled");
    } else {
        info!("Interfaces: {:?} | dwell {}ms", config.interfaces, config.dwell_time);
    }

    if let Err(e) = std::fs::create_dir_all(&args.data_dir) {
        error!("Cannot create data dir {}: {}", args.data_dir.display(), e);
        return;
    }

    // Storage + persistence pump.
    let sink = match SledSink::open(args.data_dir.join("store")) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            error!("Failed to open store: {}", e);
            return;
        }
    };
    let pump = PersistencePump::new(sink.clone(), &config.persistence);

    // Registry, intake, projections.
    let registry = Arc::new(DeviceRegistry::new());

    // Hydrate from the previous run without disturbing first-seen.
    match sink.get_all() {
        Ok(stored) => {
            let count = stored.len();
            for device in stored {
                registry.load(device);
            }
            if count > 0 {
                info!("Hydrated {} devices from storage", count);
            }
        }
        Err(e) => warn!("Could not hydrate registry: {}", e),
    }
    let alerts = Arc::new(AlertFeed::new());
    let audit = Arc::new(AuditLog::new());

    // The capture subsystem (external) clones this sender and feeds
    // typed Device records; workers fan the merge out across cores.
    let (_device_tx, device_rx) = tokio::sync::mpsc::channel(talon::intake::INTAKE_QUEUE_CAP);
    let intake = IntakeWorkers::spawn(registry.clone(), pump.clone(), device_rx, 0, None);

    // Radio layer: one hopper per interface, all gated by one locker.
    let switcher: Arc<dyn ChannelSwitcher> = Arc::new(IwSwitcher::new());
    let locker = Arc::new(ChannelLocker::new(switcher.clone()));

    let mut channel_map = match load_channel_map(&args.data_dir) {
        Ok(map) => map,
        Err(e) => {
            error!("Corrupt channel map: {}", e);
            return;
        }
    };
    let mut hoppers = Vec::new();
    for iface in &config.interfaces {
        let channels = channel_map
            .entry(iface.clone())
            .or_insert_with(|| DEFAULT_CHANNELS.to_vec())
            .clone();
        let hopper = ChannelHopper::new(
            iface.clone(),
            channels,
            Duration::from_millis(config.dwell_time.max(10)),
            switcher.clone(),
        );
        locker.register_hopper(hopper.clone());
        hopper.start();
        hoppers.push(hopper);
    }
    if !config.interfaces.is_empty()
        && let Err(e) = save_channel_map(&args.data_dir, &channel_map)
    {
        warn!("Could not persist channel map: {}", e);
    }

    // Shared injector on the first interface; attacks on other radios
    // create their own.
    let default_injector: Option<Arc<dyn Injector>> = match config.interfaces.first() {
        Some(iface) => match RawInjector::new(iface) {
            Ok(injector) => {
                injector.optimize_for_injection();
                Some(Arc::new(injector))
            }
            Err(e) => {
                warn!("No default injector on {}: {}", iface, e);
                None
            }
        },
        None => None,
    };

    // Attack engines behind the coordinator.
    let deauth = DeauthEngine::new(
        EngineCore::new(
            "deauth",
            config.max_concurrent_attacks,
            Some(locker.clone()),
            Some(switcher.clone()),
            default_injector.clone(),
        ),
        config.monitoring.enabled,
    );
    let authflood = AuthFloodEngine::new(EngineCore::new(
        "authflood",
        config.max_concurrent_attacks,
        Some(locker.clone()),
        Some(switcher.clone()),
        default_injector.clone(),
    ));
    let wps = WpsEngine::new(
        EngineCore::new(
            "wps",
            config.max_concurrent_attacks,
            Some(locker.clone()),
            Some(switcher.clone()),
            None,
        ),
        config.wps.clone(),
    );
    let coordinator = Arc::new(AttackCoordinator::new(
        registry.clone(),
        audit.clone(),
        None,
        Some(deauth),
        Some(authflood),
        Some(wps),
    ));

    // Maintenance: prune, stale-connection cleanup, finished-sweep.
    let maintenance_registry = registry.clone();
    let maintenance_coordinator = coordinator.clone();
    let registry_ttl = config.registry.ttl;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            maintenance_registry.prune(registry_ttl);
            maintenance_registry.cleanup_stale_connections(registry_ttl / 2);
            maintenance_coordinator.sweep_finished();
        }
    });

    // Status printer
    let status_registry = registry.clone();
    let status_alerts = alerts.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let stats = system_stats(&status_registry, &status_alerts);
            info!(
                "Status: {} devices ({} APs, {} stations) | {} alerts",
                stats.devices, stats.access_points, stats.stations, stats.alerts
            );
        }
    });

    info!("Talon running. Waiting for capture input...");

    // Wait for shutdown
    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down...");
    coordinator.stop_all();
    for hopper in &hoppers {
        hopper.stop();
    }
    intake.shutdown().await;
    pump.shutdown().await;
    if let Err(e) = sink.close() {
        warn!("Store close failed: {}", e);
    }
}
