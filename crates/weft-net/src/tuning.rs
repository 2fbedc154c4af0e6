//! Per-device kernel knobs: neighbour cache timing and address assignment.

use weft_common::{HostPaths, WeftResult};

use crate::link::LinkTable;
use crate::mac;

/// `NET_ADDR_SET` from `linux/netdevice.h`: address set by userspace.
const NET_ADDR_SET: &str = "3";

/// Make the IPv4 neighbour cache of `device` recover quickly from stale entries.
///
/// Overlay peers move MACs between hosts, so entries are re-probed after a
/// few seconds and a single unicast probe is sent before falling back to
/// broadcast.
pub fn configure_arp_cache(paths: &HostPaths, device: &str) -> WeftResult<()> {
    let neigh = paths.neigh_conf(device);
    tracing::debug!(device, path = %neigh.display(), "Tuning ARP cache");

    std::fs::write(neigh.join("base_reachable_time"), "5")?;
    std::fs::write(neigh.join("delay_first_probe_time"), "2")?;

    // Not present on older kernels.
    let ucast_solicit = neigh.join("ucast_solicit");
    if ucast_solicit.exists() {
        std::fs::write(ucast_solicit, "1")?;
    }
    Ok(())
}

/// Pin the container bridge's MAC so enslaving devices cannot change it.
///
/// A bridge takes the lowest MAC of its ports unless its address was set
/// explicitly. When `addr_assign_type` is anything other than `NET_ADDR_SET`
/// a random address is assigned. Returns whether the address was changed.
pub fn enforce_addr_assign_type(
    paths: &HostPaths,
    links: &dyn LinkTable,
    bridge: &str,
) -> WeftResult<bool> {
    let assign_type = std::fs::read_to_string(paths.addr_assign_type(bridge))?;
    if assign_type.trim() == NET_ADDR_SET {
        return Ok(false);
    }

    let link = links.require_link(bridge)?;
    let address = mac::random_mac()?;
    links.set_address(link.index, address)?;
    tracing::info!(bridge, %address, "Assigned explicit bridge MAC");
    Ok(true)
}
