//! Common error types for Weft.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`WeftError`].
pub type WeftResult<T> = Result<T, WeftError>;

/// Errors raised while inspecting or mutating host network state.
#[derive(Error, Diagnostic, Debug)]
pub enum WeftError {
    /// A netlink request was rejected by the kernel.
    #[error("netlink {operation} failed: {message}")]
    #[diagnostic(code(weft::netlink))]
    Netlink {
        /// The request that failed, e.g. `link add bridge weave`.
        operation: String,
        /// Kernel error text.
        message: String,
    },

    /// An ethtool ioctl failed.
    #[error("ethtool {operation} on {device} failed: {message}")]
    #[diagnostic(code(weft::ethtool))]
    Ethtool {
        /// The ethtool command, e.g. `tx-checksum off`.
        operation: String,
        /// Device name.
        device: String,
        /// Kernel error text.
        message: String,
    },

    /// A named link does not exist.
    #[error("Link not found: {name}")]
    #[diagnostic(code(weft::link::not_found))]
    LinkNotFound {
        /// Name of the missing link.
        name: String,
    },

    /// Entering, leaving or identifying a network namespace failed.
    #[error("Network namespace error for pid {pid}: {message}")]
    #[diagnostic(code(weft::netns))]
    Namespace {
        /// Process whose namespace was being used.
        pid: i32,
        /// The error message.
        message: String,
    },

    /// An iptables invocation failed.
    #[error("iptables {command} failed: {stderr}")]
    #[diagnostic(
        code(weft::firewall),
        help("Rules installed before this one are left in place")
    )]
    Firewall {
        /// Arguments passed to iptables.
        command: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The Open vSwitch kernel datapath rejected a request.
    #[error("Datapath error: {message}")]
    #[diagnostic(code(weft::datapath))]
    Datapath {
        /// The error message.
        message: String,
    },

    /// No random bytes could be obtained for a hardware address.
    #[error("Entropy source unavailable: {message}")]
    #[diagnostic(code(weft::mac::entropy))]
    Entropy {
        /// The error message.
        message: String,
    },

    /// A device carries no IPv4 address where one is required.
    #[error("Device {device} has no IPv4 address")]
    #[diagnostic(
        code(weft::device::no_ipv4),
        help("The container bridge needs an address before firewall rules can be installed")
    )]
    NoIpv4Address {
        /// Device name.
        device: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(weft::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(weft::io))]
    Io(#[from] std::io::Error),

    /// Provisioning a topology failed part-way.
    #[error("Failed to provision {topology} topology: {source}")]
    #[diagnostic(
        code(weft::provision),
        help("Devices and rules created before the failure are left on the host and may need manual cleanup")
    )]
    Provision {
        /// The topology that was being set up.
        topology: String,
        /// The underlying failure.
        #[source]
        source: Box<WeftError>,
    },
}

impl WeftError {
    /// Build a [`WeftError::Netlink`] from any displayable kernel error.
    pub fn netlink(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Netlink {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    /// Wrap this error with the topology being provisioned.
    #[must_use]
    pub fn during(self, topology: impl std::fmt::Display) -> Self {
        match self {
            already @ Self::Provision { .. } => already,
            other => Self::Provision {
                topology: topology.to_string(),
                source: Box::new(other),
            },
        }
    }
}

impl From<toml::de::Error> for WeftError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}
