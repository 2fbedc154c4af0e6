//! Overlay topology provisioning.
//!
//! [`create_topology`] is safe to call on every daemon start: when either
//! device already exists nothing is created and only the bring-up steps run.
//!
//! Creation is not transactional. If a step fails, devices and rules created
//! by earlier steps stay on the host and the error says which topology was
//! being built; cleanup is left to the operator.

use weft_common::{HostPaths, WeftResult};

use crate::config::BridgeConfig;
use crate::datapath::{DatapathControl, DatapathSupport};
use crate::firewall::{self, RuleTable};
use crate::link::LinkTable;
use crate::topology::{BridgeTopology, detect_topology};
use crate::{mac, tuning};

/// MTU of a freshly created classic bridge when none is configured.
pub const MAX_BRIDGE_MTU: u32 = 65535;

/// Default fast datapath MTU.
///
/// GCE has the lowest underlay MTU commonly seen on a local network, 1460.
/// VXLAN encapsulation costs 20 (outer IPv4) + 8 (UDP) + 8 (VXLAN) + 14
/// (inner Ethernet) bytes.
pub const DEFAULT_DATAPATH_MTU: u32 = 1460 - 20 - 8 - 8 - 14;

/// Bridge end of the cable between bridge and datapath.
pub const BRIDGE_VETH: &str = "vethwe-bridge";

/// Datapath end of the cable between bridge and datapath.
pub const DATAPATH_VETH: &str = "vethwe-datapath";

/// Kernel-facing collaborators used while provisioning.
#[derive(Clone, Copy)]
pub struct Host<'a> {
    /// Host link table.
    pub links: &'a dyn LinkTable,
    /// Fast datapath control.
    pub datapaths: &'a dyn DatapathControl,
    /// Firewall tables.
    pub rules: &'a dyn RuleTable,
    /// sysfs/procfs locations.
    pub paths: &'a HostPaths,
}

/// Bring the host to the overlay topology described by `config`.
///
/// Returns the topology in place afterwards. An `Inconsistent` host is not
/// repaired; it only gets the bring-up steps.
pub fn create_topology(host: &Host<'_>, config: &BridgeConfig) -> WeftResult<BridgeTopology> {
    let mut topology = detect_topology(host.links, config);
    let mut effective = config.clone();

    match topology {
        BridgeTopology::Absent => {
            topology = choose_topology(host, &mut effective)?;
            tracing::info!(%topology, bridge = %effective.overlay_bridge, "Creating overlay topology");

            build(host, &effective, topology).map_err(|e| e.during(topology))?;
            firewall::configure_firewall(host.links, host.rules, &effective)
                .map_err(|e| e.during(topology))?;
        }
        BridgeTopology::Inconsistent => {
            tracing::warn!(
                bridge = %config.overlay_bridge,
                datapath = %config.datapath,
                "Overlay devices are in an inconsistent state, bringing them up as found"
            );
        }
        existing => {
            tracing::debug!(topology = %existing, "Overlay topology already present");
        }
    }

    bring_up(host, &effective, topology).map_err(|e| e.during(topology))?;
    Ok(topology)
}

/// Decide what to build and create the datapath if one is wanted.
fn choose_topology(host: &Host<'_>, config: &mut BridgeConfig) -> WeftResult<BridgeTopology> {
    if config.disable_fastdp {
        return Ok(BridgeTopology::ClassicBridge);
    }

    let mut wanted = BridgeTopology::BridgedFastpath;
    if config.disable_bridged_fastdp {
        wanted = BridgeTopology::FastpathOnly;
        config.datapath.clone_from(&config.overlay_bridge);
    }

    match host
        .datapaths
        .create_datapath(&config.datapath)
        .map_err(|e| e.during(wanted))?
    {
        DatapathSupport::Supported => Ok(wanted),
        DatapathSupport::Unsupported => {
            tracing::info!(
                datapath = %config.datapath,
                "Fast datapath not supported by the kernel, falling back to a classic bridge"
            );
            Ok(BridgeTopology::ClassicBridge)
        }
    }
}

fn build(host: &Host<'_>, config: &BridgeConfig, topology: BridgeTopology) -> WeftResult<()> {
    match topology {
        BridgeTopology::ClassicBridge => init_bridge(host, config),
        BridgeTopology::FastpathOnly => init_fastdp(host, config),
        BridgeTopology::BridgedFastpath => init_bridged_fastdp(host, config),
        // never chosen for creation
        BridgeTopology::Absent | BridgeTopology::Inconsistent => Ok(()),
    }
}

fn init_bridge(host: &Host<'_>, config: &BridgeConfig) -> WeftResult<()> {
    let address = mac::bridge_mac(host.paths)?;
    let mtu = config.mtu.unwrap_or(MAX_BRIDGE_MTU);
    host.links.add_bridge(&config.overlay_bridge, address, mtu)
}

fn init_fastdp(host: &Host<'_>, config: &BridgeConfig) -> WeftResult<()> {
    let datapath = host.links.require_link(&config.datapath)?;
    let mtu = config.mtu.unwrap_or(DEFAULT_DATAPATH_MTU);
    host.links.set_mtu(datapath.index, mtu)
}

fn init_bridged_fastdp(host: &Host<'_>, config: &BridgeConfig) -> WeftResult<()> {
    init_fastdp(host, config)?;
    init_bridge(host, config)?;

    host.links.add_veth(BRIDGE_VETH, DATAPATH_VETH, config.mtu)?;

    let bridge = host.links.require_link(&config.overlay_bridge)?;
    let bridge_end = host.links.require_link(BRIDGE_VETH)?;
    host.links.set_master(bridge_end.index, bridge.index)?;

    let datapath = host.links.require_link(&config.datapath)?;
    host.datapaths.add_interface(datapath.index, DATAPATH_VETH)?;

    host.links.set_up(bridge_end.index)?;
    host.links.set_up_by_name(DATAPATH_VETH)?;
    host.links.set_up(datapath.index)
}

fn bring_up(host: &Host<'_>, config: &BridgeConfig, topology: BridgeTopology) -> WeftResult<()> {
    if topology == BridgeTopology::ClassicBridge {
        host.links.disable_tx_offload(&config.overlay_bridge)?;
    }
    host.links.set_up_by_name(&config.overlay_bridge)?;
    tuning::configure_arp_cache(host.paths, &config.overlay_bridge)
}
