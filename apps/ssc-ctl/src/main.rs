//! ssc-ctl - discover and control SSC audio devices from the command line.
//!
//! Discovery browses the local network for a bounded time and prints devices
//! as they appear. The other commands talk to one device by address, or, for
//! `volume`, to every device listed in the configuration file.

mod config;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::Value;
use ssc_core::{
    Capabilities, Capability, Device, DeviceSession, DiscoveryDeps, DiscoveryEngine,
    LoggingEventEmitter, NetworkConnector, VolumeForwarder,
};
use tokio::signal;

use crate::config::CliConfig;

/// ssc-ctl - discover and control SSC audio devices.
#[derive(Parser, Debug)]
#[command(name = "ssc-ctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "warn", env = "SSC_LOG_LEVEL", global = true)]
    log_level: log::LevelFilter,

    /// SSC port (overrides config file).
    #[arg(short = 'p', long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

/// Transport selection for single-device commands.
#[derive(clap::Args, Debug)]
struct TransportArgs {
    /// Use TCP.
    #[arg(long, conflicts_with = "udp")]
    tcp: bool,

    /// Use UDP.
    #[arg(long)]
    udp: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Browse for devices and print them as they are found.
    Discover {
        /// How long to browse (milliseconds). Defaults to the configured timeout.
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Print the final device table as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Read vendor, product and name of a device.
    Identify {
        address: String,
        #[command(flatten)]
        transport: TransportArgs,
    },
    /// Read the value at a path.
    Get {
        address: String,
        path: String,
        #[command(flatten)]
        transport: TransportArgs,
    },
    /// Write a value at a path. The value is parsed as JSON, or sent as a string.
    Set {
        address: String,
        path: String,
        value: String,
        #[command(flatten)]
        transport: TransportArgs,
    },
    /// Measure round-trip time with osc.ping.
    Ping {
        address: String,
        /// Number of pings.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        #[command(flatten)]
        transport: TransportArgs,
    },
    /// List every leaf path of the device configuration.
    Schema {
        address: String,
        /// Also read the limits of every path.
        #[arg(long)]
        limits: bool,
        #[command(flatten)]
        transport: TransportArgs,
    },
    /// Read the limits of one path.
    Limits {
        address: String,
        path: String,
        #[command(flatten)]
        transport: TransportArgs,
    },
    /// Map CURRENT/MAX onto the configured range and write it to the configured devices.
    Volume { current: u32, max: u32 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("ssc-ctl v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        CliConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.ssc_port = port;
    }
    let core = config.to_core_config()?;

    match args.command {
        Command::Discover { timeout_ms, json } => {
            let run_for = timeout_ms.map_or_else(|| core.discovery_timeout(), Duration::from_millis);
            discover(core, run_for, json).await
        }
        Command::Identify { address, transport } => {
            let session = open_session(&config, &core, &address, &transport);
            let device = session.retrieve_identity().await.context("Identity lookup failed")?;
            print_json(&device)
        }
        Command::Get {
            address,
            path,
            transport,
        } => {
            let session = open_session(&config, &core, &address, &transport);
            let value = session
                .get_value(&path)
                .await
                .with_context(|| format!("Failed to read {}", path))?;
            print_json(&value)
        }
        Command::Set {
            address,
            path,
            value,
            transport,
        } => {
            let session = open_session(&config, &core, &address, &transport);
            let value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            let echoed = session
                .set_value(&path, value)
                .await
                .with_context(|| format!("Failed to write {}", path))?;
            print_json(&echoed)
        }
        Command::Ping {
            address,
            count,
            transport,
        } => {
            let session = open_session(&config, &core, &address, &transport);
            for seq in 1..=count {
                let rtt = session.ping().await.context("Ping failed")?;
                println!("{}: seq={} time={:.2}ms", address, seq, rtt.as_secs_f64() * 1000.0);
            }
            Ok(())
        }
        Command::Schema {
            address,
            limits,
            transport,
        } => {
            let session = open_session(&config, &core, &address, &transport);
            let paths = session
                .expand_schema()
                .await
                .context("Schema expansion failed")?;
            if !limits {
                for path in &paths {
                    println!("{}", path);
                }
                return Ok(());
            }
            let records = session
                .limits_for_schema(&paths)
                .await
                .context("Reading limits failed")?;
            let mut table = serde_json::Map::new();
            for (path, record) in records {
                table.insert(path, serde_json::to_value(record)?);
            }
            print_json(&table)
        }
        Command::Limits {
            address,
            path,
            transport,
        } => {
            let session = open_session(&config, &core, &address, &transport);
            let limits = session
                .limits(&path)
                .await
                .with_context(|| format!("Failed to read limits of {}", path))?;
            print_json(&limits)
        }
        Command::Volume { current, max } => volume(&config, core, current, max).await,
    }
}

/// Builds a session for one device, choosing the transport from flags or config.
fn open_session(
    config: &CliConfig,
    core: &ssc_core::Config,
    address: &str,
    transport: &TransportArgs,
) -> DeviceSession {
    let capabilities = if transport.tcp {
        Capability::Tcp.into()
    } else if transport.udp {
        Capability::Udp.into()
    } else {
        config
            .capabilities_of(address)
            .unwrap_or_else(|| Capability::Tcp.into())
    };
    let connector = Arc::new(NetworkConnector::new(core));
    DeviceSession::new(&Device::new(address, capabilities), connector, core)
}

async fn discover(core: ssc_core::Config, run_for: Duration, json: bool) -> Result<()> {
    let engine = DiscoveryEngine::new(core.clone(), DiscoveryDeps::network(&core));
    let mut running = engine.subscribe_running();
    let mut updates = engine.device_stream();
    engine
        .start(run_for)
        .context("Failed to start discovery")?;
    eprintln!("Discovering for {}ms, Ctrl+C to stop early", run_for.as_millis());

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut printed: HashMap<String, Device> = HashMap::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Shutdown signal received, stopping discovery");
                break;
            }
            changed = running.changed() => {
                if changed.is_err() || !*running.borrow() {
                    break;
                }
            }
            Some(devices) = updates.next() => {
                for device in devices {
                    if !json && printed.get(&device.address).map_or(true, |seen| !same_listing(seen, &device)) {
                        println!("{}", describe(&device));
                    }
                    printed.insert(device.address.clone(), device);
                }
            }
        }
    }

    engine.shutdown();
    let devices = engine.devices();
    if json {
        print_json(&devices)?;
    } else {
        eprintln!("{} device(s) found", devices.len());
    }
    Ok(())
}

fn same_listing(a: &Device, b: &Device) -> bool {
    a.capabilities == b.capabilities && a.identity == b.identity
}

fn describe(device: &Device) -> String {
    let Capabilities {
        supports_tcp,
        supports_udp,
    } = device.capabilities;
    let transports = match (supports_tcp, supports_udp) {
        (true, true) => "tcp+udp",
        (true, false) => "tcp",
        (false, true) => "udp",
        (false, false) => "-",
    };
    match &device.identity {
        Some(identity) => format!(
            "{:<40} {:<8} {} ({} {})",
            device.address, transports, identity.name, identity.vendor, identity.product
        ),
        None => format!("{:<40} {:<8}", device.address, transports),
    }
}

async fn volume(config: &CliConfig, core: ssc_core::Config, current: u32, max: u32) -> Result<()> {
    if config.devices.is_empty() {
        bail!("No devices configured; add them under `devices:` in the config file");
    }
    let forwarder = VolumeForwarder::new(
        core.clone(),
        Arc::new(NetworkConnector::new(&core)),
        Arc::new(LoggingEventEmitter),
        config.volume.clone(),
    );
    forwarder.set_devices(&config.devices);
    let result = forwarder
        .apply(current, max)
        .await
        .context("Volume forwarding failed")?;
    for (address, error) in &result.failures {
        eprintln!("{}: {}", address, error);
    }
    print_json(&result)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
