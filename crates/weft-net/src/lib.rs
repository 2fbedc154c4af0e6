//! # weft-net
//!
//! Host network plumbing for the Weft overlay.
//!
//! The crate detects and provisions the overlay bridge in one of three
//! layouts (classic Linux bridge, Open vSwitch fast datapath, or a bridge
//! cabled to a datapath), installs the firewall rules that protect the
//! overlay control plane, and lists overlay interfaces inside container
//! network namespaces.
//!
//! Every operation blocks until the kernel answers. Kernel access goes
//! through three seams, [`LinkTable`], [`DatapathControl`] and
//! [`RuleTable`], with live implementations in [`NetlinkTable`],
//! [`OvsDatapath`] and [`Iptables`].

#![warn(missing_docs)]

pub mod config;
pub mod datapath;
pub mod devices;
pub mod ethtool;
pub mod firewall;
pub mod link;
pub mod mac;
pub mod netlink;
pub mod netns;
pub mod provision;
pub mod topology;
pub mod tuning;

#[cfg(test)]
mod testing;

pub use config::BridgeConfig;
pub use datapath::{DatapathControl, DatapathSupport, OvsDatapath};
pub use devices::{find_bridge_device, find_overlay_attached_devices};
pub use firewall::{Iptables, RuleTable, configure_firewall};
pub use link::{HardwareAddr, LinkKind, LinkTable, NetworkLink};
pub use netlink::NetlinkTable;
pub use netns::{DiscoveredDevice, NamespaceProbe, ProcNamespaces};
pub use provision::{Host, create_topology};
pub use topology::{BridgeTopology, detect_topology};
pub use tuning::{configure_arp_cache, enforce_addr_assign_type};
