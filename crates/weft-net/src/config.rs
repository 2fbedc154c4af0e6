//! Bridge provisioning configuration.

use serde::{Deserialize, Serialize};

/// Default overlay daemon control-plane port.
pub const DEFAULT_PORT: u16 = 6783;

/// What to build on the host, and how the firewall should treat it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BridgeConfig {
    /// Bridge the container engine attaches containers to.
    pub container_bridge: String,
    /// Overlay bridge device name.
    pub overlay_bridge: String,
    /// Fast datapath device name.
    pub datapath: String,
    /// Never use the kernel fast datapath.
    pub disable_fastdp: bool,
    /// Use the fast datapath directly instead of behind a bridge.
    pub disable_bridged_fastdp: bool,
    /// MTU override for created devices.
    pub mtu: Option<u32>,
    /// Overlay control-plane port.
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            container_bridge: "docker0".to_string(),
            overlay_bridge: "weave".to_string(),
            datapath: "datapath".to_string(),
            disable_fastdp: false,
            disable_bridged_fastdp: false,
            mtu: None,
            port: DEFAULT_PORT,
        }
    }
}

impl BridgeConfig {
    /// Config for the given overlay bridge and datapath, other fields default.
    #[must_use]
    pub fn new(overlay_bridge: &str, datapath: &str) -> Self {
        Self {
            overlay_bridge: overlay_bridge.to_string(),
            datapath: datapath.to_string(),
            ..Self::default()
        }
    }

    /// Disable the fast datapath.
    #[must_use]
    pub const fn without_fastdp(mut self) -> Self {
        self.disable_fastdp = true;
        self
    }

    /// Disable the bridge in front of the fast datapath.
    #[must_use]
    pub const fn without_bridged_fastdp(mut self) -> Self {
        self.disable_bridged_fastdp = true;
        self
    }

    /// Set the MTU override.
    #[must_use]
    pub const fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Set the container bridge.
    #[must_use]
    pub fn with_container_bridge(mut self, name: &str) -> Self {
        self.container_bridge = name.to_string();
        self
    }
}
