//! Kernel link model and the link table seam.
//!
//! [`NetworkLink`] is a snapshot of one interface as reported by the kernel.
//! [`LinkTable`] is implemented by [`crate::netlink::NetlinkTable`] against the
//! live kernel, and by an in-memory fake in tests.

use std::fmt;
use std::str::FromStr;

use ipnet::Ipv4Net;
use serde::{Serialize, Serializer};
use weft_common::{WeftError, WeftResult};

/// Link kind reported in `IFLA_INFO_KIND`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    /// Linux bridge.
    Bridge,
    /// One end of a veth pair.
    Veth,
    /// Open vSwitch datapath port (`openvswitch`).
    Datapath,
    /// Link without a kind attribute (physical NICs, some datapath ports).
    Device,
    /// Any other kind, kept verbatim.
    Other(String),
}

impl LinkKind {
    /// Kind name as the kernel spells it.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Bridge => "bridge",
            Self::Veth => "veth",
            Self::Datapath => "openvswitch",
            Self::Device => "device",
            Self::Other(kind) => kind,
        }
    }

    /// Whether a link of this kind can act as the fast datapath.
    #[must_use]
    pub const fn is_datapath(&self) -> bool {
        matches!(self, Self::Datapath | Self::Device)
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareAddr(pub [u8; 6]);

impl HardwareAddr {
    /// Take the first six bytes of a kernel address attribute.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let octets: [u8; 6] = bytes.get(..6)?.try_into().ok()?;
        Some(Self(octets))
    }

    /// Raw octets.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Clear the multicast bit and set the locally administered bit.
    #[must_use]
    pub const fn into_local_unicast(mut self) -> Self {
        self.0[0] = (self.0[0] & !0x01) | 0x02;
        self
    }

    /// Whether this is a unicast, locally administered address.
    #[must_use]
    pub const fn is_local_unicast(&self) -> bool {
        self.0[0] & 0x01 == 0 && self.0[0] & 0x02 != 0
    }
}

impl fmt::Display for HardwareAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for HardwareAddr {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WeftError::Config {
            message: format!("invalid hardware address: {s}"),
        };
        let bytes = hex::decode(s.replace(':', "")).map_err(|_| invalid())?;
        if bytes.len() != 6 {
            return Err(invalid());
        }
        Self::from_slice(&bytes).ok_or_else(invalid)
    }
}

impl Serialize for HardwareAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Snapshot of one kernel network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkLink {
    /// Interface name.
    pub name: String,
    /// Link kind.
    pub kind: LinkKind,
    /// Interface index.
    pub index: u32,
    /// Index of the peer/parent link (`IFLA_LINK`), 0 when not exposed.
    pub parent_index: u32,
    /// Index of the bridge this link is enslaved to, 0 when none.
    pub master_index: u32,
    /// Hardware address, if the link has an Ethernet-sized one.
    pub address: Option<HardwareAddr>,
    /// MTU.
    pub mtu: u32,
    /// Administratively up (`IFF_UP`).
    pub up: bool,
}

/// Operations on the link table of one network namespace.
///
/// Every call blocks until the kernel answers. Nothing here is transactional:
/// a failed call leaves whatever earlier calls created in place.
pub trait LinkTable {
    /// Look up a link by name. `Ok(None)` means the link does not exist.
    fn link_by_name(&self, name: &str) -> WeftResult<Option<NetworkLink>>;

    /// List every link in the namespace.
    fn links(&self) -> WeftResult<Vec<NetworkLink>>;

    /// IPv4 prefixes assigned to a link.
    fn ipv4_prefixes(&self, index: u32) -> WeftResult<Vec<Ipv4Net>>;

    /// Create a bridge with the given hardware address and MTU.
    fn add_bridge(&self, name: &str, address: HardwareAddr, mtu: u32) -> WeftResult<()>;

    /// Create a veth pair.
    fn add_veth(&self, name: &str, peer: &str, mtu: Option<u32>) -> WeftResult<()>;

    /// Set a link's MTU.
    fn set_mtu(&self, index: u32, mtu: u32) -> WeftResult<()>;

    /// Enslave a link to a bridge.
    fn set_master(&self, index: u32, master: u32) -> WeftResult<()>;

    /// Bring a link administratively up.
    fn set_up(&self, index: u32) -> WeftResult<()>;

    /// Replace a link's hardware address.
    fn set_address(&self, index: u32, address: HardwareAddr) -> WeftResult<()>;

    /// Turn off transmit checksum and segmentation offload.
    fn disable_tx_offload(&self, name: &str) -> WeftResult<()>;

    /// Look up a link that must exist.
    fn require_link(&self, name: &str) -> WeftResult<NetworkLink> {
        self.link_by_name(name)?
            .ok_or_else(|| WeftError::LinkNotFound {
                name: name.to_string(),
            })
    }

    /// Bring a link up by name. Links that are already up are left alone.
    fn set_up_by_name(&self, name: &str) -> WeftResult<()> {
        let link = self.require_link(name)?;
        if link.up {
            return Ok(());
        }
        tracing::debug!(name, "Bringing link up");
        self.set_up(link.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardware_addr_display_and_parse() {
        let addr = HardwareAddr([0x02, 0x42, 0xac, 0x11, 0x00, 0x0f]);
        assert_eq!(addr.to_string(), "02:42:ac:11:00:0f");
        assert_eq!("02:42:ac:11:00:0f".parse::<HardwareAddr>().unwrap(), addr);
    }

    #[test]
    fn hardware_addr_rejects_bad_input() {
        assert!("02:42:ac".parse::<HardwareAddr>().is_err());
        assert!("zz:42:ac:11:00:0f".parse::<HardwareAddr>().is_err());
    }

    #[test]
    fn local_unicast_bits() {
        let addr = HardwareAddr([0xff; 6]).into_local_unicast();
        assert_eq!(addr.0[0], 0xfe);
        assert!(addr.is_local_unicast());
        assert!(!HardwareAddr([0x01, 0, 0, 0, 0, 0]).is_local_unicast());
    }

    #[test]
    fn datapath_kinds() {
        assert!(LinkKind::Datapath.is_datapath());
        assert!(LinkKind::Device.is_datapath());
        assert!(!LinkKind::Bridge.is_datapath());
        assert!(!LinkKind::Other("vxlan".into()).is_datapath());
    }

    #[test]
    fn from_slice_needs_six_bytes() {
        assert!(HardwareAddr::from_slice(&[1, 2, 3, 4]).is_none());
        assert_eq!(
            HardwareAddr::from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]),
            Some(HardwareAddr([1, 2, 3, 4, 5, 6]))
        );
    }

    #[test]
    fn serializes_as_string() {
        let addr = HardwareAddr([0x0a, 0, 0, 0, 0, 1]);
        assert_eq!(serde_json::to_string(&addr).unwrap(), "\"0a:00:00:00:00:01\"");
    }
}
