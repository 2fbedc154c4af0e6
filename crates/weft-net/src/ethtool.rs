//! Offload toggling through the `SIOCETHTOOL` ioctl.
//!
//! Transmit checksum offload on a Linux bridge corrupts encapsulated overlay
//! traffic on some drivers, so a classic bridge gets it turned off.

#![allow(unsafe_code)]

use std::os::fd::AsRawFd;

use rustix::net::{AddressFamily, SocketType, socket};
use weft_common::{WeftError, WeftResult};

const ETHTOOL_STXCSUM: u32 = 0x17;
const ETHTOOL_STSO: u32 = 0x1f;

/// `struct ethtool_value` from `linux/ethtool.h`.
#[repr(C)]
struct EthtoolValue {
    cmd: u32,
    data: u32,
}

/// Disable tx checksum offload, then TCP segmentation offload, on `device`.
pub fn disable_tx_offload(device: &str) -> WeftResult<()> {
    tracing::debug!(device, "Disabling tx offload");
    set_feature(device, ETHTOOL_STXCSUM, "tx-checksum off")?;
    set_feature(device, ETHTOOL_STSO, "tso off")
}

fn set_feature(device: &str, cmd: u32, operation: &str) -> WeftResult<()> {
    let fail = |message: String| WeftError::Ethtool {
        operation: operation.to_string(),
        device: device.to_string(),
        message,
    };

    if device.is_empty() || device.len() >= libc::IFNAMSIZ {
        return Err(fail("invalid interface name".to_string()));
    }

    let fd = socket(AddressFamily::INET, SocketType::DGRAM, None)
        .map_err(|e| fail(format!("socket: {e}")))?;

    let mut value = EthtoolValue { cmd, data: 0 };
    // SAFETY: ifreq is plain old data; all-zero is a valid value.
    let mut request: libc::ifreq = unsafe { std::mem::zeroed() };
    for (dst, src) in request.ifr_name.iter_mut().zip(device.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    request.ifr_ifru.ifru_data = (&raw mut value).cast();

    // SAFETY: request points at a NUL-terminated name and a live ethtool_value
    // that outlives the call.
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), libc::SIOCETHTOOL as _, &raw mut request) };
    if rc < 0 {
        return Err(fail(std::io::Error::last_os_error().to_string()));
    }
    Ok(())
}
