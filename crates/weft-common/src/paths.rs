//! Host filesystem paths consulted by Weft.

use std::path::PathBuf;

use once_cell::sync::Lazy;

/// Default sysfs mount point.
pub static WEFT_SYS_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("WEFT_SYS_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/sys"))
});

/// Default procfs mount point.
pub static WEFT_PROC_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var("WEFT_PROC_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/proc"))
});

/// sysfs and procfs locations used for identifiers, sysctls and namespaces.
#[derive(Debug, Clone)]
pub struct HostPaths {
    /// sysfs root (default: /sys).
    pub sys: PathBuf,
    /// procfs root (default: /proc).
    pub proc: PathBuf,
}

impl HostPaths {
    /// Create paths with default locations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create paths rooted under a custom directory (`<root>/sys`, `<root>/proc`).
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            sys: root.join("sys"),
            proc: root.join("proc"),
        }
    }

    /// Firmware (DMI) system UUID.
    #[must_use]
    pub fn product_uuid(&self) -> PathBuf {
        self.sys.join("class/dmi/id/product_uuid")
    }

    /// Hypervisor-provided UUID.
    #[must_use]
    pub fn hypervisor_uuid(&self) -> PathBuf {
        self.sys.join("hypervisor/uuid")
    }

    /// `addr_assign_type` attribute of a network device.
    #[must_use]
    pub fn addr_assign_type(&self, device: &str) -> PathBuf {
        self.sys.join("class/net").join(device).join("addr_assign_type")
    }

    /// IPv4 neighbour table settings of a device.
    #[must_use]
    pub fn neigh_conf(&self, device: &str) -> PathBuf {
        self.proc.join("sys/net/ipv4/neigh").join(device)
    }

    /// Network namespace handle of a process.
    #[must_use]
    pub fn netns_of(&self, pid: i32) -> PathBuf {
        self.proc.join(pid.to_string()).join("ns/net")
    }

    /// Network namespace handle of the calling thread.
    #[must_use]
    pub fn current_thread_netns(&self) -> PathBuf {
        self.proc.join("thread-self/ns/net")
    }
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            sys: WEFT_SYS_ROOT.clone(),
            proc: WEFT_PROC_ROOT.clone(),
        }
    }
}
