//! CLI command definitions and handlers.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use tabled::{Table, Tabled};
use weft_common::{HostPaths, WeftResult};
use weft_net::{
    BridgeConfig, DiscoveredDevice, Host, Iptables, NetlinkTable, OvsDatapath, ProcNamespaces,
};

/// Weft - host network plumbing for the overlay
#[derive(Parser)]
#[command(name = "weft")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// TOML file with bridge settings
    #[arg(long, global = true, env = "WEFT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Overrides applied on top of the config file.
    #[command(flatten)]
    pub bridge: BridgeArgs,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Bridge settings that can be given on the command line.
#[derive(Args, Debug, Default)]
pub struct BridgeArgs {
    /// Overlay bridge device name
    #[arg(long, global = true, env = "WEFT_BRIDGE")]
    pub bridge_name: Option<String>,

    /// Fast datapath device name
    #[arg(long, global = true)]
    pub datapath_name: Option<String>,

    /// Container engine bridge
    #[arg(long, global = true, env = "WEFT_CONTAINER_BRIDGE")]
    pub container_bridge: Option<String>,

    /// Never use the kernel fast datapath
    #[arg(long, global = true)]
    pub no_fastdp: bool,

    /// Use the fast datapath without a bridge in front of it
    #[arg(long, global = true)]
    pub no_bridged_fastdp: bool,

    /// MTU for created devices
    #[arg(long, global = true)]
    pub mtu: Option<u32>,

    /// Overlay control-plane port
    #[arg(long, global = true)]
    pub port: Option<u16>,
}

impl BridgeArgs {
    /// Apply the given flags to `config`.
    #[must_use]
    pub fn apply(&self, mut config: BridgeConfig) -> BridgeConfig {
        if let Some(name) = &self.bridge_name {
            config.overlay_bridge.clone_from(name);
        }
        if let Some(name) = &self.datapath_name {
            config.datapath.clone_from(name);
        }
        if let Some(name) = &self.container_bridge {
            config.container_bridge.clone_from(name);
        }
        config.disable_fastdp |= self.no_fastdp;
        config.disable_bridged_fastdp |= self.no_bridged_fastdp;
        if self.mtu.is_some() {
            config.mtu = self.mtu;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config
    }
}

/// Helper commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create the overlay bridge, or bring an existing one up
    CreateBridge,

    /// Print the current overlay topology
    DetectBridge,

    /// Show the overlay bridge device and its addresses
    BridgeDevices {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show a container's interfaces attached to the overlay bridge
    ContainerDevices {
        /// Process ID of any process in the container
        pid: i32,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Give a bridge an explicit MAC unless one was already set
    EnforceAddrAssign {
        /// Bridge device name
        bridge: String,
    },
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "MAC")]
    mac: String,
    #[tabled(rename = "CIDRS")]
    cidrs: String,
}

impl From<&DiscoveredDevice> for DeviceRow {
    fn from(device: &DiscoveredDevice) -> Self {
        Self {
            name: device.name.clone(),
            mac: device
                .mac
                .map_or_else(|| "-".to_string(), |mac| mac.to_string()),
            cidrs: device
                .cidrs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Read bridge settings from `path`, or use defaults when none is given.
pub fn load_config(path: Option<&Path>) -> WeftResult<BridgeConfig> {
    let Some(path) = path else {
        return Ok(BridgeConfig::default());
    };
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

impl Cli {
    /// Execute the CLI command.
    pub fn execute(self) -> Result<()> {
        let config = load_config(self.config.as_deref())
            .map(|config| self.bridge.apply(config))
            .wrap_err("Failed to load bridge configuration")?;
        let paths = HostPaths::new();
        tracing::debug!(?config, "Loaded configuration");

        match self.command {
            Commands::CreateBridge => {
                let links = NetlinkTable::connect()?;
                let datapaths = OvsDatapath::new();
                let rules = Iptables::new();
                let host = Host {
                    links: &links,
                    datapaths: &datapaths,
                    rules: &rules,
                    paths: &paths,
                };
                let topology = weft_net::create_topology(&host, &config)?;
                println!("{topology}");
                Ok(())
            }

            Commands::DetectBridge => {
                let links = NetlinkTable::connect()?;
                println!("{}", weft_net::detect_topology(&links, &config));
                Ok(())
            }

            Commands::BridgeDevices { json } => {
                let namespaces = ProcNamespaces::new(paths);
                let devices = weft_net::find_bridge_device(&namespaces, &config.overlay_bridge)?;
                print_devices(&devices, json)
            }

            Commands::ContainerDevices { pid, json } => {
                let namespaces = ProcNamespaces::new(paths);
                let links = NetlinkTable::connect()?;
                let devices = weft_net::find_overlay_attached_devices(
                    &namespaces,
                    &links,
                    &config.overlay_bridge,
                    pid,
                )?;
                print_devices(&devices, json)
            }

            Commands::EnforceAddrAssign { bridge } => {
                let links = NetlinkTable::connect()?;
                if weft_net::enforce_addr_assign_type(&paths, &links, &bridge)? {
                    println!("Assigned explicit MAC to {bridge}");
                }
                Ok(())
            }
        }
    }
}

fn print_devices(devices: &[DiscoveredDevice], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(devices)?);
    } else if devices.is_empty() {
        println!("No devices found");
    } else {
        let rows: Vec<DeviceRow> = devices.iter().map(DeviceRow::from).collect();
        println!("{}", Table::new(rows));
    }
    Ok(())
}
