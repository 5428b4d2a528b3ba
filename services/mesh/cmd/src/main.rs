//! halo: control HALO Home lights over the Avi-on BLE mesh.
//!
//! Network state (devices, groups, network key) is fetched from the HALO Home
//! cloud once and cached locally; commands then go straight to the mesh over
//! Bluetooth, with no cloud round trip.

use anyhow::Context;
use clap::{Parser, Subcommand};
use halo_cloud::{AvionClient, CloudApi};
use halo_controller::{MeshController, MeshError};
use halo_session::{BleTransport, SimulatedMesh};
use halo_storage::open_cache;
use halo_topology::TopologySnapshot;
use halo_wire::{Address, NetworkCredentials};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[macro_use]
mod logging;
mod config;

use config::HaloConfig;
use logging::HaloLogFormatter;

/// Crates whose log level follows `--log-level`
const LOG_TARGETS: &[&str] = &[
    "halo",
    "halo_wire",
    "halo_topology",
    "halo_storage",
    "halo_cloud",
    "halo_session",
    "halo_controller",
];

/// Control HALO Home lights over the Avi-on BLE mesh
#[derive(Parser, Debug)]
#[command(name = "halo", version, about = "Control HALO Home lights over the Avi-on BLE mesh")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "halo.yaml")]
    config: PathBuf,

    /// Network id to control (defaults to the first network)
    #[arg(long)]
    network: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Use an in-process simulated mesh instead of the Bluetooth radio
    #[arg(long)]
    simulate: bool,

    /// How long to scan for relays, e.g. 3s
    #[arg(long)]
    scan_duration: Option<humantime::Duration>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the account's networks
    Networks,
    /// Fetch devices and groups from the cloud and update the cache
    Refresh,
    /// List devices in the network
    Devices,
    /// List groups in the network
    Groups,
    /// Scan for relays in range, strongest first
    Scan,
    /// Set brightness (0 is off)
    Level {
        /// `device:<avid>` or `group:<avid>`
        target: Address,
        /// Brightness, 0-255
        level: u8,
    },
    /// Set color temperature
    ColorTemp {
        /// `device:<avid>` or `group:<avid>`
        target: Address,
        /// Color temperature in kelvin
        kelvin: u16,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut env_filter = EnvFilter::new("warn");
    for target in LOG_TARGETS {
        env_filter = env_filter.add_directive(format!("{}={}", target, args.log_level).parse()?);
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .event_format(HaloLogFormatter::new("halo"))
        .init();

    component_debug!("cli", "halo v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args).await {
        match e.downcast_ref::<MeshError>() {
            Some(mesh_error) => {
                component_error!("cli", "{} ({})", mesh_error, mesh_error.kind());
                eprintln!("error: {}", mesh_error);
                eprintln!("hint: {}", mesh_error.remedy());
            }
            None => {
                component_error!("cli", "{:#}", e);
                eprintln!("error: {:#}", e);
            }
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = HaloConfig::load_from_file(&args.config)?;
    if let Some(network) = args.network {
        config.mesh.network_id = Some(network);
    }
    if let Some(duration) = args.scan_duration {
        config.mesh.scan_duration = duration.into();
    }

    let cloud = Arc::new(AvionClient::new(config.client_config())?);
    let cache = open_cache(config.cache_mode()).await?;

    if let Command::Networks = args.command {
        return list_networks(&config, cloud.as_ref(), cache.as_ref()).await;
    }

    let simulated = args
        .simulate
        .then(|| SimulatedMesh::new(NetworkCredentials::from_passphrase("simulated", "")));
    let transport: Arc<dyn BleTransport> = match &simulated {
        Some(mesh) => Arc::new(mesh.clone()),
        None => radio().await?,
    };

    let mut controller = MeshController::new(transport, cloud, cache, config.controller_config());
    if let Some(account) = config.account() {
        controller = controller.with_account(account);
    }

    let result = execute(&controller, args.command, simulated.as_ref()).await;
    controller.close().await;
    result
}

async fn execute(
    controller: &MeshController,
    command: Command,
    simulated: Option<&SimulatedMesh>,
) -> anyhow::Result<()> {
    if let Some(mesh) = simulated {
        let topology = controller.topology().await?;
        populate_simulation(mesh, &topology);
    }

    match command {
        Command::Networks => unreachable!("handled before the controller is built"),
        Command::Refresh => {
            let topology = controller.refresh().await?;
            let stats = topology.stats();
            println!(
                "{} ({}): {} devices, {} groups, fetched {}",
                topology.network_name,
                topology.network_id,
                stats.total_devices,
                stats.total_groups,
                topology.fetched_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
            );
        }
        Command::Devices => print_devices(&*controller.topology().await?),
        Command::Groups => print_groups(&*controller.topology().await?),
        Command::Scan => {
            let candidates = controller.discover().await?;
            if candidates.is_empty() {
                println!("No relays in range");
            }
            for candidate in candidates {
                println!(
                    "{:>6}  {:>4} dBm  {}",
                    candidate.avid, candidate.signal_strength, candidate.ble_address
                );
            }
        }
        Command::Level { target, level } => {
            let ack = controller.set_level(target, level).await?;
            component_info!("cli", "{} set to level {} (seq={})", target, level, ack.sequence);
            println!("{}: level {}", describe(target), level);
        }
        Command::ColorTemp { target, kelvin } => {
            let ack = controller.set_color_temp(target, kelvin).await?;
            component_info!("cli", "{} set to {}K (seq={})", target, kelvin, ack.sequence);
            println!("{}: {}K", describe(target), kelvin);
        }
    }

    Ok(())
}

async fn list_networks(
    config: &HaloConfig,
    cloud: &AvionClient,
    cache: &dyn halo_storage::TopologyCache,
) -> anyhow::Result<()> {
    let account = config
        .account()
        .context("HALO Home account not configured (set api.email/api.password or HALO_EMAIL/HALO_PASSWORD)")?;

    cloud.authenticate(&account).await?;
    let cached = cache.cached_networks().await.unwrap_or_default();

    for network in cloud.list_networks().await? {
        let marker = if cached.contains(&network.id) { " (cached)" } else { "" };
        println!("{:>8}  {}{}", network.id, network.name, marker);
    }
    Ok(())
}

#[cfg(feature = "ble")]
async fn radio() -> anyhow::Result<Arc<dyn BleTransport>> {
    let transport = halo_session::BtleplugTransport::new()
        .await
        .context("opening Bluetooth adapter")?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "ble"))]
async fn radio() -> anyhow::Result<Arc<dyn BleTransport>> {
    anyhow::bail!("built without Bluetooth support; rebuild with `--features ble` or pass --simulate")
}

/// Make every device in the topology advertise on the simulated mesh
fn populate_simulation(mesh: &SimulatedMesh, topology: &TopologySnapshot) {
    mesh.set_credentials(topology.credentials());

    let mut count = 0;
    for device in &topology.devices {
        if let Some(ble_address) = &device.ble_address {
            let signal_strength = (-40 - 5 * count as i16).max(-100);
            mesh.add_device(ble_address, signal_strength);
            count += 1;
        }
    }

    if count == 0 {
        component_warn!("sim", "No device in network {} has a BLE address", topology.network_id);
    } else {
        component_info!("sim", "Simulating {} devices of network {}", count, topology.network_id);
    }
}

fn describe(target: Address) -> String {
    match target {
        Address::Device(avid) => format!("device {}", avid),
        Address::Group(avid) => format!("group {}", avid),
    }
}

fn print_devices(topology: &TopologySnapshot) {
    println!("{} ({})", topology.network_name, topology.network_id);
    for device in &topology.devices {
        println!(
            "{:>8}  mesh {:>5}  {:<17}  {}",
            device.avid,
            device.mesh_address,
            device.ble_address.as_deref().unwrap_or("-"),
            device.name
        );
    }
}

fn print_groups(topology: &TopologySnapshot) {
    println!("{} ({})", topology.network_name, topology.network_id);
    for group in &topology.groups {
        let members: Vec<String> = group.member_avids.iter().map(|a| a.to_string()).collect();
        println!("{:>8}  {:<24}  [{}]", group.avid, group.name, members.join(", "));
    }
}
