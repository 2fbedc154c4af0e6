//! Hardware address derivation for the overlay bridge.
//!
//! The bridge MAC is derived from the firmware system UUID or, failing that,
//! the hypervisor UUID. Both survive reboots and differ between VMs cloned
//! from the same image, unlike `/etc/machine-id`. The overlay daemon derives
//! its peer name from the bridge MAC, so a recreated bridge must come back
//! with the same address. When neither identifier is readable a random
//! address is used.

use std::path::Path;

use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use weft_common::{HostPaths, WeftError, WeftResult};

use crate::link::HardwareAddr;

const MAC_SALT: &[u8] = b"weft-bridge-mac:";

/// Derive a stable address from the identifier stored at `path`.
///
/// Fails if the file cannot be read or holds only whitespace.
pub fn persistent_mac(path: &Path) -> WeftResult<HardwareAddr> {
    let contents = std::fs::read(path)?;
    let id = contents.trim_ascii();
    if id.is_empty() {
        return Err(WeftError::Config {
            message: format!("{} is empty", path.display()),
        });
    }
    Ok(derive_mac(id))
}

/// Hash an identifier into a locally administered unicast address.
#[must_use]
pub fn derive_mac(id: &[u8]) -> HardwareAddr {
    let mut hasher = Sha256::new();
    hasher.update(MAC_SALT);
    hasher.update(id);
    let digest = hasher.finalize();

    let mut octets = [0u8; 6];
    octets.copy_from_slice(&digest[..6]);
    HardwareAddr(octets).into_local_unicast()
}

/// A random locally administered unicast address.
pub fn random_mac() -> WeftResult<HardwareAddr> {
    let mut octets = [0u8; 6];
    OsRng
        .try_fill_bytes(&mut octets)
        .map_err(|e| WeftError::Entropy {
            message: e.to_string(),
        })?;
    Ok(HardwareAddr(octets).into_local_unicast())
}

/// Pick the address for a freshly created bridge.
///
/// Sources are tried in order: product UUID, hypervisor UUID, randomness.
pub fn bridge_mac(paths: &HostPaths) -> WeftResult<HardwareAddr> {
    for source in [paths.product_uuid(), paths.hypervisor_uuid()] {
        match persistent_mac(&source) {
            Ok(mac) => {
                tracing::debug!(source = %source.display(), %mac, "Derived bridge MAC");
                return Ok(mac);
            }
            Err(e) => tracing::debug!(source = %source.display(), error = %e, "MAC source unavailable"),
        }
    }

    let mac = random_mac()?;
    tracing::info!(%mac, "No stable host identifier, using random bridge MAC");
    Ok(mac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn product_uuid_is_deterministic() {
        let temp = tempdir().unwrap();
        let paths = HostPaths::with_root(temp.path());
        write(&paths.product_uuid(), "4C4C4544-0042-3510-8052-B4C04F4E4D32\n");

        let first = bridge_mac(&paths).unwrap();
        let second = bridge_mac(&paths).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, derive_mac(b"4C4C4544-0042-3510-8052-B4C04F4E4D32"));
        assert!(first.is_local_unicast());
    }

    #[test]
    fn falls_back_to_hypervisor_uuid() {
        let temp = tempdir().unwrap();
        let paths = HostPaths::with_root(temp.path());
        write(&paths.product_uuid(), "  \n");
        write(&paths.hypervisor_uuid(), "ec2d3f6c-0e7a-4b11-9c2f-1a2b3c4d5e6f");

        assert_eq!(
            bridge_mac(&paths).unwrap(),
            derive_mac(b"ec2d3f6c-0e7a-4b11-9c2f-1a2b3c4d5e6f")
        );
    }

    #[test]
    fn product_uuid_wins_over_hypervisor() {
        let temp = tempdir().unwrap();
        let paths = HostPaths::with_root(temp.path());
        write(&paths.product_uuid(), "product");
        write(&paths.hypervisor_uuid(), "hypervisor");

        assert_eq!(bridge_mac(&paths).unwrap(), derive_mac(b"product"));
    }

    #[test]
    fn random_without_sources() {
        let temp = tempdir().unwrap();
        let paths = HostPaths::with_root(temp.path());

        let first = bridge_mac(&paths).unwrap();
        let second = bridge_mac(&paths).unwrap();
        assert_ne!(first, second);
        assert!(first.is_local_unicast());
        assert!(second.is_local_unicast());
    }

    #[test]
    fn empty_source_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("uuid");
        std::fs::write(&path, "").unwrap();
        assert!(persistent_mac(&path).is_err());
    }

    proptest! {
        #[test]
        fn derived_addresses_are_local_unicast(id in proptest::collection::vec(any::<u8>(), 1..64)) {
            let mac = derive_mac(&id);
            prop_assert!(mac.is_local_unicast());
            prop_assert_eq!(mac, derive_mac(&id));
        }
    }
}
