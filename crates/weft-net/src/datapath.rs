//! Open vSwitch kernel datapath control over generic netlink.
//!
//! Only the two requests provisioning needs are implemented: create a
//! datapath (`OVS_DP_CMD_NEW`) and attach an existing netdev to it as a vport
//! (`OVS_VPORT_CMD_NEW`). Flow programming belongs to the overlay daemon.

use std::io;

use netlink_packet_core::{
    DecodeError, Emitable, NLM_F_ACK, NLM_F_CREATE, NLM_F_EXCL, NLM_F_REQUEST, NetlinkHeader,
    NetlinkMessage, NetlinkPayload, Nla, ParseableParametrized,
};
use netlink_packet_generic::ctrl::nlas::GenlCtrlAttrs;
use netlink_packet_generic::ctrl::{GenlCtrl, GenlCtrlCmd};
use netlink_packet_generic::{GenlFamily, GenlHeader, GenlMessage};
use netlink_sys::protocols::NETLINK_GENERIC;
use netlink_sys::{Socket, SocketAddr};
use weft_common::{WeftError, WeftResult};

const OVS_DATAPATH_FAMILY: &str = "ovs_datapath";
const OVS_DATAPATH_VERSION: u8 = 2;
const OVS_DP_CMD_NEW: u8 = 1;
const OVS_DP_ATTR_NAME: u16 = 1;
const OVS_DP_ATTR_UPCALL_PID: u16 = 2;

const OVS_VPORT_FAMILY: &str = "ovs_vport";
const OVS_VPORT_VERSION: u8 = 1;
const OVS_VPORT_CMD_NEW: u8 = 1;
const OVS_VPORT_ATTR_TYPE: u16 = 2;
const OVS_VPORT_ATTR_NAME: u16 = 3;
const OVS_VPORT_ATTR_UPCALL_PID: u16 = 5;
const OVS_VPORT_TYPE_NETDEV: u32 = 1;

/// Outcome of asking the kernel for a datapath.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatapathSupport {
    /// The datapath exists (it was created, or was already there).
    Supported,
    /// The kernel has no Open vSwitch datapath support.
    Unsupported,
}

/// Control of the in-kernel fast datapath.
pub trait DatapathControl {
    /// Create the named datapath, reporting whether the kernel supports it.
    ///
    /// Kernel errors other than missing support are returned as `Err`.
    fn create_datapath(&self, name: &str) -> WeftResult<DatapathSupport>;

    /// Attach the netdev `interface` to the datapath whose device index is
    /// `datapath_index`.
    fn add_interface(&self, datapath_index: u32, interface: &str) -> WeftResult<()>;
}

/// [`DatapathControl`] talking to the `openvswitch` kernel module.
#[derive(Debug, Default, Clone, Copy)]
pub struct OvsDatapath;

impl OvsDatapath {
    /// Create a datapath controller.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DatapathControl for OvsDatapath {
    fn create_datapath(&self, name: &str) -> WeftResult<DatapathSupport> {
        let socket = open_socket().map_err(datapath_error("open generic netlink socket"))?;
        let Some(family) = resolve_family(&socket, OVS_DATAPATH_FAMILY)
            .map_err(datapath_error("resolve ovs_datapath family"))?
        else {
            tracing::info!("Kernel lacks Open vSwitch datapath support");
            return Ok(DatapathSupport::Unsupported);
        };

        tracing::debug!(name, "Creating datapath");
        let request = DatapathRequest {
            cmd: OVS_DP_CMD_NEW,
            dp_ifindex: 0,
            attrs: vec![
                OvsAttr::Name(OVS_DP_ATTR_NAME, name.to_string()),
                OvsAttr::U32(OVS_DP_ATTR_UPCALL_PID, 0),
            ],
        };
        match transact(&socket, family, request, NLM_F_CREATE | NLM_F_EXCL) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                tracing::debug!(name, "Datapath already exists");
            }
            Err(e) => {
                return Err(WeftError::Datapath {
                    message: format!("create datapath {name}: {e}"),
                });
            }
        }
        Ok(DatapathSupport::Supported)
    }

    fn add_interface(&self, datapath_index: u32, interface: &str) -> WeftResult<()> {
        let socket = open_socket().map_err(datapath_error("open generic netlink socket"))?;
        let family = resolve_family(&socket, OVS_VPORT_FAMILY)
            .map_err(datapath_error("resolve ovs_vport family"))?
            .ok_or_else(|| WeftError::Datapath {
                message: "kernel lacks the ovs_vport family".to_string(),
            })?;

        tracing::debug!(datapath_index, interface, "Adding datapath interface");
        let dp_ifindex = i32::try_from(datapath_index).map_err(|_| WeftError::Datapath {
            message: format!("datapath index {datapath_index} out of range"),
        })?;
        let request = VportRequest {
            cmd: OVS_VPORT_CMD_NEW,
            dp_ifindex,
            attrs: vec![
                OvsAttr::U32(OVS_VPORT_ATTR_TYPE, OVS_VPORT_TYPE_NETDEV),
                OvsAttr::Name(OVS_VPORT_ATTR_NAME, interface.to_string()),
                OvsAttr::U32(OVS_VPORT_ATTR_UPCALL_PID, 0),
            ],
        };
        transact(&socket, family, request, NLM_F_CREATE | NLM_F_EXCL).map_err(|e| {
            WeftError::Datapath {
                message: format!("add interface {interface}: {e}"),
            }
        })
    }
}

fn datapath_error(context: &'static str) -> impl Fn(io::Error) -> WeftError {
    move |e| WeftError::Datapath {
        message: format!("{context}: {e}"),
    }
}

fn open_socket() -> io::Result<Socket> {
    let mut socket = Socket::new(NETLINK_GENERIC)?;
    socket.bind_auto()?;
    socket.connect(&SocketAddr::new(0, 0))?;
    Ok(socket)
}

/// Look up a generic netlink family id. `Ok(None)` when the family is unknown.
fn resolve_family(socket: &Socket, name: &str) -> io::Result<Option<u16>> {
    let request = GenlMessage::from_payload(GenlCtrl {
        cmd: GenlCtrlCmd::GetFamily,
        nlas: vec![GenlCtrlAttrs::FamilyName(name.to_string())],
    });
    send(socket, request, 0)?;

    let mut family = None;
    let outcome = receive(socket, |reply: GenlMessage<GenlCtrl>| {
        for nla in reply.payload.nlas {
            if let GenlCtrlAttrs::FamilyId(id) = nla {
                family = Some(id);
            }
        }
    });
    match outcome {
        Ok(()) => Ok(family),
        Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(None),
        Err(e) => Err(e),
    }
}

fn transact<F>(socket: &Socket, family: u16, payload: F, flags: u16) -> io::Result<()>
where
    F: GenlFamily + Emitable + ParseableParametrized<[u8], GenlHeader> + std::fmt::Debug,
{
    let mut message = GenlMessage::from_payload(payload);
    message.set_resolved_family_id(family);
    send(socket, message, flags)?;
    receive(socket, |_: GenlMessage<F>| {})
}

fn send<F>(socket: &Socket, message: GenlMessage<F>, flags: u16) -> io::Result<()>
where
    F: GenlFamily + Emitable + std::fmt::Debug,
{
    let mut header = NetlinkHeader::default();
    header.flags = NLM_F_REQUEST | NLM_F_ACK | flags;
    let mut packet = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(message));
    packet.finalize();

    let mut buffer = vec![0; packet.buffer_len()];
    packet.serialize(&mut buffer);
    socket.send(&buffer, 0)?;
    Ok(())
}

/// Read replies until the kernel acknowledges or rejects the request.
fn receive<F>(socket: &Socket, mut on_reply: impl FnMut(GenlMessage<F>)) -> io::Result<()>
where
    F: GenlFamily + Emitable + ParseableParametrized<[u8], GenlHeader> + std::fmt::Debug,
{
    loop {
        let (buffer, _) = socket.recv_from_full()?;
        let mut offset = 0;
        while offset < buffer.len() {
            let packet = NetlinkMessage::<GenlMessage<F>>::deserialize(&buffer[offset..])
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            let length = packet.header.length as usize;
            match packet.payload {
                NetlinkPayload::Error(error) => {
                    return match error.code {
                        None => Ok(()),
                        Some(code) => Err(io::Error::from_raw_os_error(-code.get())),
                    };
                }
                NetlinkPayload::Done(_) => return Ok(()),
                NetlinkPayload::InnerMessage(reply) => on_reply(reply),
                _ => {}
            }
            if length == 0 {
                break;
            }
            offset += length;
        }
    }
}

/// Attribute of an Open vSwitch request.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OvsAttr {
    Name(u16, String),
    U32(u16, u32),
}

impl Nla for OvsAttr {
    fn value_len(&self) -> usize {
        match self {
            Self::Name(_, name) => name.len() + 1,
            Self::U32(..) => 4,
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::Name(kind, _) | Self::U32(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::Name(_, name) => {
                buffer[..name.len()].copy_from_slice(name.as_bytes());
                buffer[name.len()] = 0;
            }
            Self::U32(_, value) => buffer[..4].copy_from_slice(&value.to_ne_bytes()),
        }
    }
}

macro_rules! ovs_request {
    ($name:ident, $family:expr, $version:expr) => {
        /// Request carrying an `ovs_header` followed by attributes.
        #[derive(Debug, Clone, PartialEq, Eq)]
        struct $name {
            cmd: u8,
            dp_ifindex: i32,
            attrs: Vec<OvsAttr>,
        }

        impl GenlFamily for $name {
            fn family_name() -> &'static str {
                $family
            }

            fn command(&self) -> u8 {
                self.cmd
            }

            fn version(&self) -> u8 {
                $version
            }
        }

        impl Emitable for $name {
            fn buffer_len(&self) -> usize {
                4 + self.attrs.as_slice().buffer_len()
            }

            fn emit(&self, buffer: &mut [u8]) {
                buffer[..4].copy_from_slice(&self.dp_ifindex.to_ne_bytes());
                self.attrs.as_slice().emit(&mut buffer[4..]);
            }
        }

        impl ParseableParametrized<[u8], GenlHeader> for $name {
            fn parse_with_param(buffer: &[u8], header: GenlHeader) -> Result<Self, DecodeError> {
                let bytes: [u8; 4] = buffer
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .ok_or_else(|| DecodeError::from("truncated ovs_header"))?;
                Ok(Self {
                    cmd: header.cmd,
                    dp_ifindex: i32::from_ne_bytes(bytes),
                    attrs: Vec::new(),
                })
            }
        }
    };
}

ovs_request!(DatapathRequest, OVS_DATAPATH_FAMILY, OVS_DATAPATH_VERSION);
ovs_request!(VportRequest, OVS_VPORT_FAMILY, OVS_VPORT_VERSION);
