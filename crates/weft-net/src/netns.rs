//! Listing devices inside another process's network namespace.
//!
//! `setns(2)` switches the namespace of the calling OS thread only. Each
//! enumeration therefore runs on its own scoped thread that enters the
//! target namespace, opens a fresh netlink connection there and switches
//! back before returning.

use std::fs::File;
use std::io;
use std::os::fd::AsFd;
use std::path::Path;

use ipnet::Ipv4Net;
use rustix::thread::{LinkNameSpaceType, move_into_link_name_space};
use serde::Serialize;
use weft_common::{HostPaths, WeftError, WeftResult};

use crate::link::{HardwareAddr, LinkTable, NetworkLink};
use crate::netlink::NetlinkTable;

/// Identity of a network namespace: device and inode of its nsfs file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceId {
    /// Device number.
    pub dev: u64,
    /// Inode number.
    pub ino: u64,
}

/// A device found in some namespace. Holds no kernel handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// Interface name.
    pub name: String,
    /// Hardware address.
    pub mac: Option<HardwareAddr>,
    /// IPv4 prefixes assigned to the interface.
    pub cidrs: Vec<Ipv4Net>,
}

impl DiscoveredDevice {
    /// Snapshot a link together with its addresses.
    #[must_use]
    pub fn new(link: &NetworkLink, cidrs: Vec<Ipv4Net>) -> Self {
        Self {
            name: link.name.clone(),
            mac: link.address,
            cidrs,
        }
    }
}

/// Link filter run inside the target namespace.
pub type LinkPredicate<'a> = &'a (dyn Fn(&NetworkLink) -> bool + Sync);

/// Access to other processes' network namespaces.
pub trait NamespaceProbe {
    /// Namespace identity of `pid`, `None` if the process is gone.
    fn namespace_id(&self, pid: i32) -> WeftResult<Option<NamespaceId>>;

    /// Devices in the namespace of `pid` accepted by `predicate`.
    ///
    /// A process that does not exist yields an empty list.
    fn find_devices(&self, pid: i32, predicate: LinkPredicate<'_>)
    -> WeftResult<Vec<DiscoveredDevice>>;
}

/// [`NamespaceProbe`] over `/proc`.
#[derive(Debug, Clone, Default)]
pub struct ProcNamespaces {
    paths: HostPaths,
}

impl ProcNamespaces {
    /// Probe namespaces through the given procfs root.
    #[must_use]
    pub const fn new(paths: HostPaths) -> Self {
        Self { paths }
    }
}

impl NamespaceProbe for ProcNamespaces {
    fn namespace_id(&self, pid: i32) -> WeftResult<Option<NamespaceId>> {
        match rustix::fs::stat(self.paths.netns_of(pid)) {
            Ok(stat) => Ok(Some(NamespaceId {
                dev: u64::from(stat.st_dev),
                ino: u64::from(stat.st_ino),
            })),
            Err(rustix::io::Errno::NOENT) => Ok(None),
            Err(e) => Err(namespace_error(pid, format!("stat netns: {e}"))),
        }
    }

    fn find_devices(
        &self,
        pid: i32,
        predicate: LinkPredicate<'_>,
    ) -> WeftResult<Vec<DiscoveredDevice>> {
        let target = match File::open(self.paths.netns_of(pid)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(pid, "Process has no network namespace, nothing to list");
                return Ok(Vec::new());
            }
            Err(e) => return Err(namespace_error(pid, format!("open netns: {e}"))),
        };
        let origin = self.paths.current_thread_netns();

        std::thread::scope(|scope| {
            scope
                .spawn(|| enumerate_in(pid, &origin, &target, predicate))
                .join()
                .map_err(|_| namespace_error(pid, "enumeration thread panicked"))?
        })
    }
}

fn namespace_error(pid: i32, message: impl Into<String>) -> WeftError {
    WeftError::Namespace {
        pid,
        message: message.into(),
    }
}

/// Runs on a thread that is discarded afterwards.
fn enumerate_in(
    pid: i32,
    origin: &Path,
    target: &File,
    predicate: LinkPredicate<'_>,
) -> WeftResult<Vec<DiscoveredDevice>> {
    let guard = NetnsGuard::enter(pid, origin, target)?;
    let result = list_matching(predicate);

    match (result, guard.restore()) {
        (Ok(devices), Ok(())) => Ok(devices),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), restored) => {
            if let Err(restore) = restored {
                tracing::warn!(pid, error = %restore, "Failed to restore network namespace");
            }
            Err(e)
        }
    }
}

fn list_matching(predicate: LinkPredicate<'_>) -> WeftResult<Vec<DiscoveredDevice>> {
    let table = NetlinkTable::connect()?;
    let mut found = Vec::new();
    for link in table.links()? {
        if predicate(&link) {
            let cidrs = table.ipv4_prefixes(link.index)?;
            found.push(DiscoveredDevice::new(&link, cidrs));
        }
    }
    Ok(found)
}

/// Keeps the thread's original namespace and switches back to it on drop.
struct NetnsGuard {
    pid: i32,
    origin: Option<File>,
}

impl NetnsGuard {
    fn enter(pid: i32, origin: &Path, target: &File) -> WeftResult<Self> {
        let origin = File::open(origin)
            .map_err(|e| namespace_error(pid, format!("open {}: {e}", origin.display())))?;
        move_into_link_name_space(target.as_fd(), Some(LinkNameSpaceType::Network))
            .map_err(|e| namespace_error(pid, format!("setns into target: {e}")))?;
        tracing::trace!(pid, "Entered network namespace");
        Ok(Self {
            pid,
            origin: Some(origin),
        })
    }

    fn restore(mut self) -> WeftResult<()> {
        match self.origin.take() {
            Some(origin) => switch_to(self.pid, &origin),
            None => Ok(()),
        }
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Some(origin) = self.origin.take() {
            if let Err(e) = switch_to(self.pid, &origin) {
                tracing::warn!(pid = self.pid, error = %e, "Failed to restore network namespace");
            }
        }
    }
}

fn switch_to(pid: i32, origin: &File) -> WeftResult<()> {
    move_into_link_name_space(origin.as_fd(), Some(LinkNameSpaceType::Network))
        .map_err(|e| namespace_error(pid, format!("setns back to origin: {e}")))
}
