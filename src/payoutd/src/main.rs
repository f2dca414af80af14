// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod bus;
mod cash_task;
mod config;
mod dispatcher;
mod error;
mod handlers;
mod publisher;

use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use payout_app::{init_logging, load_backend_plugins};
use payout_backend::{
    check_serial_device, register_builtin_backends_on, DeviceTarget, RegistrationContext,
    TransportAccess,
};
use payout_core::{DeviceRole, DeviceSession, DynResult, SspTransport};

use bus::BusConnections;
use cash_task::{CashTaskConfig, DeviceRequest};
use config::{BusConfig, PayoutdConfig};
use dispatcher::Dispatcher;
use handlers::HandlerSettings;
use publisher::Publisher;

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - cash peripheral daemon");
const DEVICE_CHANNEL_BUFFER: usize = 32;
const EXIT_BUS_UNAVAILABLE: i32 = 1;
const EXIT_PROTOCOL_FAILURE: i32 = 3;

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
    disable_help_flag = true,
)]
struct Cli {
    /// Message bus host
    #[arg(short = 'h', long = "host")]
    host: Option<String>,
    /// Message bus port
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    /// Serial device shared by hopper and validator
    #[arg(short = 'd', long = "device")]
    device: Option<String>,
    /// Transport backend (e.g. sim, or one added by a plugin)
    #[arg(short = 'b', long = "backend")]
    backend: Option<String>,
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Print help
    #[arg(long = "help", action = ArgAction::Help)]
    help: Option<bool>,
}

/// Resolved configuration after merging config file and CLI arguments.
struct ResolvedConfig {
    backend: String,
    access: TransportAccess,
    bus: BusConfig,
}

fn resolve_config(
    cli: &Cli,
    cfg: &PayoutdConfig,
    registry: &RegistrationContext,
) -> DynResult<ResolvedConfig> {
    let backend = cli
        .backend
        .clone()
        .unwrap_or_else(|| cfg.transport.backend.clone());
    if !registry.is_backend_registered(&backend) {
        return Err(format!(
            "Unknown transport backend: {} (available: {})",
            backend,
            registry.registered_backends().join(", ")
        )
        .into());
    }

    let access = if registry.needs_serial_device(&backend) {
        TransportAccess::Serial {
            path: cli
                .device
                .clone()
                .unwrap_or_else(|| cfg.transport.device.clone()),
            baud: cfg.transport.baud,
            timeout_ms: cfg.transport.timeout_ms,
            retry_level: cfg.transport.retry_level,
        }
    } else {
        TransportAccess::Simulated
    };

    let mut bus = cfg.bus.clone();
    if let Some(host) = &cli.host {
        bus.host = host.clone();
    }
    if let Some(port) = cli.port {
        bus.port = port;
    }

    Ok(ResolvedConfig {
        backend,
        access,
        bus,
    })
}

fn make_transport(
    registry: &RegistrationContext,
    resolved: &ResolvedConfig,
    target: DeviceTarget,
) -> Option<Box<dyn SspTransport>> {
    match registry.build_transport(&resolved.backend, &resolved.access, target) {
        Ok(transport) => Some(transport),
        Err(e) => {
            error!("{}: creating transport failed: {}", target.role, e);
            None
        }
    }
}

/// Build both sessions. A session without a transport stays not ready and
/// answers every command with `hardware unavailable`.
fn build_sessions(
    registry: &RegistrationContext,
    resolved: &ResolvedConfig,
    cfg: &PayoutdConfig,
) -> (DeviceSession, DeviceSession) {
    let hardware = match &resolved.access {
        TransportAccess::Serial { path, .. } => match check_serial_device(path) {
            Ok(()) => true,
            Err(e) => {
                warn!("{}; hardware unavailable", e);
                false
            }
        },
        TransportAccess::Simulated => true,
    };

    let transport = |role: DeviceRole, address: u8, enabled: bool| {
        if !enabled {
            info!("{}: disabled in configuration", role);
            return None;
        }
        if !hardware {
            return None;
        }
        make_transport(registry, resolved, DeviceTarget { role, address })
    };

    let hopper = DeviceSession::new(
        DeviceRole::Hopper,
        cfg.hopper.profile(),
        transport(DeviceRole::Hopper, cfg.hopper.address, cfg.hopper.enabled),
    );
    let validator = DeviceSession::new(
        DeviceRole::Validator,
        cfg.validator.profile(),
        transport(
            DeviceRole::Validator,
            cfg.validator.address,
            cfg.validator.enabled,
        ),
    );
    (hopper, validator)
}

pub(crate) async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    if *shutdown_rx.borrow() {
        return;
    }
    while shutdown_rx.changed().await.is_ok() {
        if *shutdown_rx.borrow() {
            break;
        }
    }
}

/// Raise the shutdown flag on SIGINT or SIGTERM.
async fn watch_signals(shutdown_tx: Arc<watch::Sender<bool>>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};
        match unix_signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Ctrl+C received, shutting down"),
                    _ = terminate.recv() => info!("SIGTERM received, shutting down"),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                let _ = signal::ctrl_c().await;
                info!("Ctrl+C received, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down");
    }
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let mut bootstrap_ctx = RegistrationContext::new();
    register_builtin_backends_on(&mut bootstrap_ctx);

    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", PayoutdConfig::example_toml());
        return Ok(());
    }

    let (cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = PayoutdConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        PayoutdConfig::load_from_default_paths()?
    };
    cfg.validate()
        .map_err(|e| format!("Invalid payoutd configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    let bootstrap_ctx_ptr = NonNull::from(&mut bootstrap_ctx).cast();
    let _plugin_libs = load_backend_plugins(bootstrap_ctx_ptr);

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let resolved = resolve_config(&cli, &cfg, &bootstrap_ctx)?;
    match &resolved.access {
        TransportAccess::Serial { path, baud, .. } => info!(
            "Starting payoutd {} built {} (backend: {}, device: {} @ {} baud)",
            env!("CARGO_PKG_VERSION"),
            env!("PAYOUTD_BUILD_DATE"),
            resolved.backend,
            path,
            baud
        ),
        TransportAccess::Simulated => info!(
            "Starting payoutd {} built {} (backend: {}, simulated devices)",
            env!("CARGO_PKG_VERSION"),
            env!("PAYOUTD_BUILD_DATE"),
            resolved.backend
        ),
    }

    let BusConnections {
        subscriber,
        publisher: bus_conn,
    } = match bus::connect(&resolved.bus).await {
        Ok(connections) => connections,
        Err(e) => {
            error!("Connecting to bus at {} failed: {}", resolved.bus.url(), e);
            std::process::exit(EXIT_BUS_UNAVAILABLE);
        }
    };

    let (hopper, validator) = build_sessions(&bootstrap_ctx, &resolved, &cfg);

    let (publisher, outbound_rx) = Publisher::channel();
    let (device_tx, device_rx) = mpsc::channel::<DeviceRequest>(DEVICE_CHANNEL_BUFFER);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let mut task_handles: Vec<JoinHandle<()>> = Vec::new();

    task_handles.push(tokio::spawn(bus::run_publisher(bus_conn, outbound_rx)));
    task_handles.push(tokio::spawn(watch_signals(shutdown_tx.clone())));

    let cash_config = CashTaskConfig {
        hopper,
        validator,
        init: cfg.init_options(),
        poll_interval: Duration::from_millis(cfg.behavior.poll_interval_ms),
        settle_delay: Duration::from_millis(cfg.behavior.settle_delay_ms),
        settings: HandlerSettings {
            currency: cfg.currency,
            level_fields: cfg.compat.denomination_level_fields,
        },
    };
    let mut cash_handle = tokio::spawn(cash_task::run_cash_task(
        cash_config,
        device_rx,
        publisher.clone(),
        shutdown_rx.clone(),
    ));

    let dispatcher = Dispatcher::new(
        publisher,
        device_tx,
        cfg.compat.command_matching,
        shutdown_tx.clone(),
    );
    let sub_shutdown_rx = shutdown_rx.clone();
    let sub_shutdown_tx = shutdown_tx.clone();
    task_handles.push(tokio::spawn(async move {
        if let Err(e) = bus::run_subscriber(subscriber, dispatcher, sub_shutdown_rx).await {
            error!("Bus subscriber error: {}", e);
            let _ = sub_shutdown_tx.send(true);
        }
    }));

    // The flag is only looked at here; handlers just raise it.
    let mut liveness = tokio::time::interval(Duration::from_millis(
        cfg.behavior.quit_check_interval_ms,
    ));
    let mut cash_result = None;
    loop {
        tokio::select! {
            _ = liveness.tick() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            joined = &mut cash_handle => {
                cash_result = Some(joined);
                break;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    // The cash task finishes the device operation in flight before it stops.
    let cash_result = match cash_result {
        Some(joined) => joined,
        None => cash_handle.await,
    };
    tokio::time::sleep(Duration::from_millis(400)).await;

    for handle in &task_handles {
        if !handle.is_finished() {
            handle.abort();
        }
    }
    for handle in task_handles {
        let _ = handle.await;
    }

    match cash_result {
        Ok(Ok(())) => {
            info!("payoutd stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            error!("Cash task failed: {}", e);
            std::process::exit(EXIT_PROTOCOL_FAILURE);
        }
        Err(e) => Err(format!("Cash task aborted: {}", e).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_date_is_a_calendar_date() {
        let date = env!("PAYOUTD_BUILD_DATE");
        let parts: Vec<u32> = date
            .split('-')
            .map(|part| part.parse().expect("numeric date part"))
            .collect();
        assert_eq!(parts.len(), 3, "{}", date);
        assert!(parts[0] >= 1970);
        assert!((1..=12).contains(&parts[1]));
        assert!((1..=31).contains(&parts[2]));
    }

    #[test]
    fn test_cli_overrides_bus_and_backend() {
        let mut registry = RegistrationContext::new();
        register_builtin_backends_on(&mut registry);
        let cli = Cli::parse_from(["payoutd", "-h", "bus.local", "-p", "6380", "-b", "SIM"]);
        let resolved =
            resolve_config(&cli, &PayoutdConfig::default(), &registry).expect("sim is built in");
        assert_eq!(resolved.bus.url(), "redis://bus.local:6380/");
        assert_eq!(resolved.access, TransportAccess::Simulated);

        let cli = Cli::parse_from(["payoutd", "--backend", "itl"]);
        assert!(resolve_config(&cli, &PayoutdConfig::default(), &registry).is_err());
    }
}
