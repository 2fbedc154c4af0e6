//! Bridge topology detection.

use std::fmt;

use crate::config::BridgeConfig;
use crate::link::{LinkKind, LinkTable};

/// How the overlay bridge and fast datapath are currently laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BridgeTopology {
    /// Neither device exists.
    Absent,
    /// A Linux bridge, no datapath.
    ClassicBridge,
    /// The overlay device is itself a datapath.
    FastpathOnly,
    /// A Linux bridge cabled to a datapath.
    BridgedFastpath,
    /// Any other combination.
    Inconsistent,
}

impl BridgeTopology {
    /// Name understood by the overlay daemon's scripts.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "none",
            Self::ClassicBridge => "bridge",
            Self::FastpathOnly => "fastdp",
            Self::BridgedFastpath => "bridged_fastdp",
            Self::Inconsistent => "inconsistent",
        }
    }

    /// Classify from the kinds of the overlay bridge and datapath links.
    #[must_use]
    pub fn classify(bridge: Option<&LinkKind>, datapath: Option<&LinkKind>) -> Self {
        match (bridge, datapath) {
            (None, None) => Self::Absent,
            (Some(LinkKind::Bridge), None) => Self::ClassicBridge,
            (Some(kind), None) if kind.is_datapath() => Self::FastpathOnly,
            (Some(LinkKind::Bridge), Some(kind)) if kind.is_datapath() => Self::BridgedFastpath,
            _ => Self::Inconsistent,
        }
    }
}

impl fmt::Display for BridgeTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inspect the host and classify the overlay topology.
///
/// Lookup failures count as absence. Nothing is cached: every call reads the
/// kernel again.
pub fn detect_topology(links: &dyn LinkTable, config: &BridgeConfig) -> BridgeTopology {
    let lookup = |name: &str| match links.link_by_name(name) {
        Ok(link) => link,
        Err(e) => {
            tracing::debug!(name, error = %e, "Link lookup failed, treating as absent");
            None
        }
    };
    let bridge = lookup(&config.overlay_bridge);
    let datapath = lookup(&config.datapath);

    let topology = BridgeTopology::classify(
        bridge.as_ref().map(|link| &link.kind),
        datapath.as_ref().map(|link| &link.kind),
    );
    tracing::debug!(
        bridge = %config.overlay_bridge,
        datapath = %config.datapath,
        %topology,
        "Detected bridge topology"
    );
    topology
}
