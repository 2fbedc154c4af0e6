//! rtnetlink-backed [`LinkTable`].
//!
//! The netlink socket belongs to whichever network namespace the calling
//! thread was in when [`NetlinkTable::connect`] ran. Requests are driven on a
//! private current-thread runtime, so every method blocks until the kernel
//! replies.

use std::future::Future;
use std::net::IpAddr;

use futures::TryStreamExt;
use ipnet::Ipv4Net;
use netlink_packet_route::AddressFamily;
use netlink_packet_route::address::AddressAttribute;
use netlink_packet_route::link::{InfoKind, LinkAttribute, LinkFlags, LinkInfo, LinkMessage};
use rtnetlink::{Handle, LinkBridge, LinkUnspec, LinkVeth};
use tokio::runtime::{Builder, Runtime};
use weft_common::{WeftError, WeftResult};

use crate::ethtool;
use crate::link::{HardwareAddr, LinkKind, LinkTable, NetworkLink};

/// Link table of the namespace the connection was opened in.
pub struct NetlinkTable {
    runtime: Runtime,
    handle: Handle,
}

impl NetlinkTable {
    /// Open a netlink connection in the calling thread's network namespace.
    pub fn connect() -> WeftResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (connection, handle, _) = {
            let _enter = runtime.enter();
            rtnetlink::new_connection()?
        };
        runtime.spawn(connection);
        Ok(Self { runtime, handle })
    }

    fn run<T, E, F>(&self, operation: impl FnOnce() -> String, request: F) -> WeftResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.runtime
            .block_on(request)
            .map_err(|e| WeftError::netlink(operation(), e))
    }

    fn set(&self, operation: impl FnOnce() -> String, message: LinkMessage) -> WeftResult<()> {
        self.run(operation, self.handle.link().set(message).execute())
    }
}

impl LinkTable for NetlinkTable {
    fn link_by_name(&self, name: &str) -> WeftResult<Option<NetworkLink>> {
        let lookup = self.runtime.block_on(
            self.handle
                .link()
                .get()
                .match_name(name.to_string())
                .execute()
                .try_next(),
        );
        match lookup {
            Ok(message) => Ok(message.as_ref().map(parse_link)),
            Err(e) if is_no_such_device(&e) => Ok(None),
            Err(e) => Err(WeftError::netlink(format!("link get {name}"), e)),
        }
    }

    fn links(&self) -> WeftResult<Vec<NetworkLink>> {
        let messages: Vec<LinkMessage> = self.run(
            || "link list".to_string(),
            self.handle.link().get().execute().try_collect(),
        )?;
        Ok(messages.iter().map(parse_link).collect())
    }

    fn ipv4_prefixes(&self, index: u32) -> WeftResult<Vec<Ipv4Net>> {
        let messages: Vec<_> = self.run(
            || format!("address list {index}"),
            self.handle
                .address()
                .get()
                .set_link_index_filter(index)
                .execute()
                .try_collect(),
        )?;

        let mut prefixes = Vec::new();
        for message in messages {
            if message.header.family != AddressFamily::Inet {
                continue;
            }
            for attr in &message.attributes {
                if let AddressAttribute::Address(IpAddr::V4(addr)) = attr {
                    let prefix = Ipv4Net::new(*addr, message.header.prefix_len)
                        .map_err(|e| WeftError::netlink(format!("address list {index}"), e))?;
                    prefixes.push(prefix);
                }
            }
        }
        Ok(prefixes)
    }

    fn add_bridge(&self, name: &str, address: HardwareAddr, mtu: u32) -> WeftResult<()> {
        tracing::debug!(name, %address, mtu, "Creating bridge");
        let message = LinkBridge::new(name)
            .address(address.octets().to_vec())
            .mtu(mtu)
            .build();
        self.run(
            || format!("link add bridge {name}"),
            self.handle.link().add(message).execute(),
        )
    }

    fn add_veth(&self, name: &str, peer: &str, mtu: Option<u32>) -> WeftResult<()> {
        tracing::debug!(name, peer, ?mtu, "Creating veth pair");
        let mut builder = LinkVeth::new(name, peer);
        if let Some(mtu) = mtu {
            builder = builder.mtu(mtu);
        }
        self.run(
            || format!("link add veth {name} peer {peer}"),
            self.handle.link().add(builder.build()).execute(),
        )
    }

    fn set_mtu(&self, index: u32, mtu: u32) -> WeftResult<()> {
        tracing::debug!(index, mtu, "Setting MTU");
        self.set(
            || format!("link set {index} mtu {mtu}"),
            LinkUnspec::new_with_index(index).mtu(mtu).build(),
        )
    }

    fn set_master(&self, index: u32, master: u32) -> WeftResult<()> {
        tracing::debug!(index, master, "Attaching link to bridge");
        self.set(
            || format!("link set {index} master {master}"),
            LinkUnspec::new_with_index(index).controller(master).build(),
        )
    }

    fn set_up(&self, index: u32) -> WeftResult<()> {
        self.set(
            || format!("link set {index} up"),
            LinkUnspec::new_with_index(index).up().build(),
        )
    }

    fn set_address(&self, index: u32, address: HardwareAddr) -> WeftResult<()> {
        tracing::debug!(index, %address, "Setting hardware address");
        self.set(
            || format!("link set {index} address {address}"),
            LinkUnspec::new_with_index(index)
                .address(address.octets().to_vec())
                .build(),
        )
    }

    fn disable_tx_offload(&self, name: &str) -> WeftResult<()> {
        ethtool::disable_tx_offload(name)
    }
}

fn is_no_such_device(err: &rtnetlink::Error) -> bool {
    matches!(
        err,
        rtnetlink::Error::NetlinkError(message)
            if message.code.is_some_and(|code| code.get() == -libc::ENODEV)
    )
}

/// Convert a kernel link message into a [`NetworkLink`].
pub(crate) fn parse_link(message: &LinkMessage) -> NetworkLink {
    let mut link = NetworkLink {
        name: String::new(),
        kind: LinkKind::Device,
        index: message.header.index,
        parent_index: 0,
        master_index: 0,
        address: None,
        mtu: 0,
        up: message.header.flags.contains(LinkFlags::Up),
    };

    for attr in &message.attributes {
        match attr {
            LinkAttribute::IfName(name) => link.name.clone_from(name),
            LinkAttribute::Address(bytes) => link.address = HardwareAddr::from_slice(bytes),
            LinkAttribute::Mtu(mtu) => link.mtu = *mtu,
            LinkAttribute::Link(parent) => link.parent_index = *parent,
            LinkAttribute::Controller(master) => link.master_index = *master,
            LinkAttribute::LinkInfo(infos) => {
                if let Some(kind) = infos.iter().find_map(|info| match info {
                    LinkInfo::Kind(kind) => Some(kind),
                    _ => None,
                }) {
                    link.kind = link_kind(kind);
                }
            }
            _ => {}
        }
    }

    link
}

fn link_kind(kind: &InfoKind) -> LinkKind {
    match kind {
        InfoKind::Bridge => LinkKind::Bridge,
        InfoKind::Veth => LinkKind::Veth,
        InfoKind::Other(name) if name == "openvswitch" => LinkKind::Datapath,
        other => LinkKind::Other(other.to_string()),
    }
}
