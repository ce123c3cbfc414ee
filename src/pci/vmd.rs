//! VMD / PCIe-hotplug-slot transport
//!
//! Intel VMD re-parents NVMe hotplug slots under a synthetic PCI domain.
//! The LED lives on the hotplug slot, not the drive: the block device's
//! sysfs path is walked up to the endpoint directly below the `nvme`
//! segment, the `.function` suffix is stripped to obtain the slot address,
//! and the matching `/sys/bus/pci/slots/<n>/attention` attribute is written
//! as a decimal attention nibble.

use std::fs;
use std::path::{Path, PathBuf};

use crate::ibpi::Ibpi;
use crate::status::Status;
use crate::sysfs;

/// Derive the hotplug slot address from a block device sysfs path
///
/// The component right before the `nvme` segment is the endpoint BDF;
/// dropping its `.function` suffix yields the slot address string sysfs
/// stores in the slot's `address` attribute.
pub fn slot_address(block_path: &Path) -> Option<String> {
    let components: Vec<&str> = block_path
        .iter()
        .filter_map(|c| c.to_str())
        .collect();
    let nvme_pos = components
        .iter()
        .position(|c| c.starts_with("nvme"))?;
    if nvme_pos == 0 {
        return None;
    }
    let endpoint = components[nvme_pos - 1];
    let (address, _function) = endpoint.rsplit_once('.')?;
    Some(address.to_string())
}

/// Synthetic PCI domain a VMD controller spawned
///
/// The VMD endpoint re-parents its children under a `pci<domain>:<bus>`
/// directory; the domain part is what distinguishes VMD-owned hotplug slots
/// from ordinary PCIe ones.
pub fn vmd_domain(cntrl_path: &Path) -> Option<String> {
    for child in sysfs::list_dir(cntrl_path) {
        let Some(name) = child.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(rest) = name.strip_prefix("pci") {
            if let Some((domain, _bus)) = rest.split_once(':') {
                return Some(domain.to_string());
            }
        }
    }
    None
}

/// Find the hotplug slot directory whose `address` matches
///
/// `slots_root` is `/sys/bus/pci/slots` on a live system. Only slots inside
/// the given VMD domain qualify; a matching address in another domain is an
/// ordinary PCIe hotplug slot and is skipped.
pub fn find_slot(slots_root: &Path, address: &str, domain: &str) -> Option<PathBuf> {
    if !address.starts_with(&format!("{domain}:")) {
        return None;
    }
    for slot in sysfs::list_dir(slots_root) {
        if sysfs::read_text(&slot.join("address")).as_deref() == Some(address) {
            return Some(slot);
        }
    }
    None
}

/// Write an indication to a hotplug slot's `attention` attribute
pub fn write_attention(slot_path: &Path, ibpi: Ibpi) -> Result<(), Status> {
    let Some(nibble) = ibpi.vmd_nibble() else {
        log::debug!(
            "vmd: {}: no attention encoding for {}",
            slot_path.display(),
            ibpi
        );
        return Err(Status::InvalidState);
    };
    fs::write(slot_path.join("attention"), format!("{nibble}"))
        .map_err(|_| Status::FileWriteError)
}

/// Read the indication currently set on a hotplug slot
pub fn read_attention(slot_path: &Path) -> Option<Ibpi> {
    let value = sysfs::read_int(&slot_path.join("attention"))?;
    Some(Ibpi::from_vmd_nibble(value as u8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn slot_address_strips_function() {
        let path = Path::new(
            "/sys/devices/pci0000:5d/0000:5d:05.5/pci10000:00/10000:00:02.0/10000:01:00.0/nvme/nvme0/nvme0n1",
        );
        assert_eq!(slot_address(path).as_deref(), Some("10000:01:00"));

        // No nvme segment, no slot
        assert_eq!(slot_address(Path::new("/sys/devices/pci0000:00/sda")), None);
    }

    #[test]
    fn domain_from_child_bus_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("pci10000:00")).unwrap();
        fs::create_dir(dir.path().join("msi_irqs")).unwrap();
        assert_eq!(vmd_domain(dir.path()).as_deref(), Some("10000"));
    }

    #[test]
    fn slot_lookup_honors_domain() {
        let dir = TempDir::new().unwrap();
        let slot = dir.path().join("5");
        fs::create_dir(&slot).unwrap();
        fs::write(slot.join("address"), "10000:01:00\n").unwrap();

        assert_eq!(
            find_slot(dir.path(), "10000:01:00", "10000"),
            Some(slot.clone())
        );
        // Same address under a non-VMD domain is rejected
        assert_eq!(find_slot(dir.path(), "10000:01:00", "0000"), None);
    }

    #[test]
    fn attention_round_trip() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("attention"), "15").unwrap();

        write_attention(dir.path(), Ibpi::Rebuild).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("attention")).unwrap(),
            "5"
        );
        assert_eq!(read_attention(dir.path()), Some(Ibpi::Rebuild));

        assert_eq!(
            write_attention(dir.path(), Ibpi::Hotspare),
            Err(Status::InvalidState)
        );
    }
}
