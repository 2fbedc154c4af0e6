//! Locating overlay interfaces from the host's point of view.

use std::collections::HashSet;

use weft_common::{WeftError, WeftResult};

use crate::link::{LinkKind, LinkTable};
use crate::netns::{DiscoveredDevice, NamespaceProbe};

/// Process whose namespace is the host's root network namespace.
pub const ROOT_PID: i32 = 1;

/// The overlay bridge as seen in the root namespace.
pub fn find_bridge_device(
    namespaces: &dyn NamespaceProbe,
    bridge: &str,
) -> WeftResult<Vec<DiscoveredDevice>> {
    namespaces.find_devices(ROOT_PID, &|link| link.name == bridge)
}

/// Container-side interfaces of `pid` cabled to the overlay bridge.
///
/// `root_links` must be the root namespace's link table. A process in the
/// root namespace, or one that has already exited, yields an empty list.
pub fn find_overlay_attached_devices(
    namespaces: &dyn NamespaceProbe,
    root_links: &dyn LinkTable,
    bridge: &str,
    pid: i32,
) -> WeftResult<Vec<DiscoveredDevice>> {
    let root = namespaces
        .namespace_id(ROOT_PID)?
        .ok_or_else(|| WeftError::Namespace {
            pid: ROOT_PID,
            message: "root network namespace is not visible".to_string(),
        })?;
    let Some(target) = namespaces.namespace_id(pid)? else {
        tracing::debug!(pid, "Process is gone");
        return Ok(Vec::new());
    };
    if target == root {
        tracing::debug!(pid, "Process runs in the root namespace");
        return Ok(Vec::new());
    }

    let peers = bridge_port_peers(root_links, bridge)?;
    tracing::debug!(pid, bridge, peers = peers.len(), "Looking up container-side peers");
    namespaces.find_devices(pid, &|link| {
        link.kind == LinkKind::Veth && peers.contains(&link.index)
    })
}

/// Peer indices of everything enslaved to `bridge`.
///
/// Kernels that do not report `IFLA_LINK` give 0 for the parent; veth
/// peers are then assumed to have consecutive indices.
fn bridge_port_peers(links: &dyn LinkTable, bridge: &str) -> WeftResult<HashSet<u32>> {
    let bridge = links.require_link(bridge)?;
    Ok(links
        .links()?
        .into_iter()
        .filter(|link| link.master_index == bridge.index)
        .map(|link| match link.parent_index {
            0 => link.index.saturating_sub(1),
            parent => parent,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netns::NamespaceId;
    use crate::testing::{self, FakeHost, FakeNamespaces};

    const ROOT_NS: NamespaceId = NamespaceId { dev: 4, ino: 4_026_531_840 };
    const CONTAINER_NS: NamespaceId = NamespaceId { dev: 4, ino: 4_026_532_301 };
    const CONTAINER: i32 = 4242;

    /// Root namespace with `weave` and one port cabled to index 20 inside
    /// the container.
    fn fixture() -> (FakeHost, FakeNamespaces) {
        let host = FakeHost::new();
        let weave = host.insert_link("weave", LinkKind::Bridge);
        host.insert_link("vethwepl4242", LinkKind::Veth);
        host.update_link("vethwepl4242", |link| {
            link.master_index = weave;
            link.parent_index = 20;
        });

        let namespaces = FakeNamespaces::new();
        namespaces.add_process(ROOT_PID, ROOT_NS);
        namespaces.add_link(ROOT_PID, testing::link("weave", LinkKind::Bridge, weave), vec![
            "10.32.0.1/12".parse().unwrap(),
        ]);
        namespaces.add_process(CONTAINER, CONTAINER_NS);
        namespaces.add_link(CONTAINER, testing::link("lo", LinkKind::Device, 1), vec![]);
        namespaces.add_link(CONTAINER, testing::link("ethwe", LinkKind::Veth, 20), vec![
            "10.32.0.7/12".parse().unwrap(),
        ]);
        namespaces.add_link(CONTAINER, testing::link("eth0", LinkKind::Veth, 22), vec![
            "172.17.0.3/16".parse().unwrap(),
        ]);
        (host, namespaces)
    }

    #[test]
    fn finds_peer_of_bridge_port() {
        let (host, namespaces) = fixture();
        let devices =
            find_overlay_attached_devices(&namespaces, &host, "weave", CONTAINER).unwrap();

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "ethwe");
        assert_eq!(devices[0].cidrs, vec!["10.32.0.7/12".parse().unwrap()]);
    }

    #[test]
    fn falls_back_to_consecutive_index() {
        let (host, namespaces) = fixture();
        host.insert_link("vethwepl4243", LinkKind::Veth);
        let weave = host.link("weave").unwrap().index;
        host.update_link("vethwepl4243", |link| {
            link.master_index = weave;
            link.index = 23;
        });
        let devices =
            find_overlay_attached_devices(&namespaces, &host, "weave", CONTAINER).unwrap();

        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["ethwe", "eth0"]);
    }

    #[test]
    fn only_veths_match() {
        let (host, namespaces) = fixture();
        namespaces.add_link(CONTAINER, testing::link("vxlan0", LinkKind::Device, 20), vec![]);
        let devices =
            find_overlay_attached_devices(&namespaces, &host, "weave", CONTAINER).unwrap();
        assert!(devices.iter().all(|d| d.name == "ethwe"));
    }

    #[test]
    fn root_namespace_process_is_empty() {
        let (host, namespaces) = fixture();
        namespaces.add_process(77, ROOT_NS);
        assert!(
            find_overlay_attached_devices(&namespaces, &host, "weave", 77)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn exited_process_is_empty() {
        let (host, namespaces) = fixture();
        assert!(
            find_overlay_attached_devices(&namespaces, &host, "weave", 9999)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn missing_bridge_is_an_error() {
        let (host, namespaces) = fixture();
        assert!(matches!(
            find_overlay_attached_devices(&namespaces, &host, "ovr0", CONTAINER),
            Err(WeftError::LinkNotFound { .. })
        ));
    }

    #[test]
    fn bridge_device_by_name() {
        let (_, namespaces) = fixture();
        let devices = find_bridge_device(&namespaces, "weave").unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].cidrs, vec!["10.32.0.1/12".parse().unwrap()]);
        assert!(find_bridge_device(&namespaces, "ovr0").unwrap().is_empty());
    }
}
