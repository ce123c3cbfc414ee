//! PCI config-space access through sysfs
//!
//! Controllers are identified by their sysfs device directory
//! (`/sys/bus/pci/devices/<bdf>`); the `config` attribute inside it exposes
//! the raw configuration space, with the extended region from offset 0x100
//! readable on PCIe devices.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::str::FromStr;

pub mod npem;
pub mod vmd;

/// Start of the PCIe extended configuration space
pub const PCI_EXT_CAP_BASE: u16 = 0x100;

/// NPEM extended capability ID
pub const PCI_EXT_CAP_ID_NPEM: u16 = 0x29;

/// PCI Bus/Device/Function identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PciAddress {
    pub domain: u32,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl FromStr for PciAddress {
    type Err = ();

    /// Parse the sysfs spelling `dddd:bb:dd.f`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let domain = parts.next().ok_or(())?;
        let bus = parts.next().ok_or(())?;
        let devfn = parts.next().ok_or(())?;
        if parts.next().is_some() {
            return Err(());
        }
        let (device, function) = devfn.split_once('.').ok_or(())?;
        Ok(PciAddress {
            domain: u32::from_str_radix(domain, 16).map_err(|_| ())?,
            bus: u8::from_str_radix(bus, 16).map_err(|_| ())?,
            device: u8::from_str_radix(device, 16).map_err(|_| ())?,
            function: u8::from_str_radix(function, 16).map_err(|_| ())?,
        })
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

/// Open the `config` attribute of a PCI device directory
fn open_config(cntrl_path: &Path, writable: bool) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(writable)
        .open(cntrl_path.join("config"))
}

/// Read a 32-bit little-endian word from config space
pub fn read_config_u32(cntrl_path: &Path, offset: u16) -> io::Result<u32> {
    let file = open_config(cntrl_path, false)?;
    let mut buf = [0u8; 4];
    file.read_exact_at(&mut buf, u64::from(offset))?;
    Ok(u32::from_le_bytes(buf))
}

/// Write a 32-bit little-endian word to config space
pub fn write_config_u32(cntrl_path: &Path, offset: u16, value: u32) -> io::Result<()> {
    let file = open_config(cntrl_path, true)?;
    file.write_all_at(&value.to_le_bytes(), u64::from(offset))
}

/// Walk the extended capability list for `cap_id`
///
/// Returns the capability base offset. The chain is bounded: extended
/// capability headers live at dword-aligned offsets in 0x100..0x1000, so at
/// most (0x1000 - 0x100) / 4 links are followed before giving up on a
/// malformed list.
pub fn find_ext_cap(cntrl_path: &Path, cap_id: u16) -> Option<u16> {
    let mut offset = PCI_EXT_CAP_BASE;
    for _ in 0..((0x1000 - 0x100) / 4) {
        let header = read_config_u32(cntrl_path, offset).ok()?;
        if header == 0 || header == u32::MAX {
            return None;
        }
        if (header & 0xFFFF) as u16 == cap_id {
            return Some(offset);
        }
        offset = ((header >> 20) & 0xFFC) as u16;
        if offset < PCI_EXT_CAP_BASE {
            return None;
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Build a fake PCI device directory with a `config` blob
    pub(crate) fn fake_device(config: &[u8]) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config"), config).unwrap();
        dir
    }

    /// 4 KiB config space with an NPEM capability at 0x140
    pub(crate) fn config_with_npem(cap: u32, ctrl: u32, status: u32) -> Vec<u8> {
        let mut config = vec![0u8; 4096];
        // First extended capability: vendor-specific (0x0B), next = 0x140
        config[0x100..0x104].copy_from_slice(&(0x000B_u32 | (0x140 << 20)).to_le_bytes());
        // NPEM capability header, end of list
        config[0x140..0x144].copy_from_slice(&(PCI_EXT_CAP_ID_NPEM as u32).to_le_bytes());
        config[0x144..0x148].copy_from_slice(&cap.to_le_bytes());
        config[0x148..0x14C].copy_from_slice(&ctrl.to_le_bytes());
        config[0x14C..0x150].copy_from_slice(&status.to_le_bytes());
        config
    }

    #[test]
    fn bdf_parse_and_format() {
        let addr: PciAddress = "10000:01:00.0".parse().unwrap();
        assert_eq!(addr.domain, 0x10000);
        assert_eq!(addr.bus, 1);
        assert_eq!(addr.to_string(), "10000:01:00.0");
        assert!("0000:3b:00".parse::<PciAddress>().is_err());
    }

    #[test]
    fn ext_cap_walk_finds_npem() {
        let dir = fake_device(&config_with_npem(0x1, 0, 0));
        assert_eq!(find_ext_cap(dir.path(), PCI_EXT_CAP_ID_NPEM), Some(0x140));
        assert_eq!(find_ext_cap(dir.path(), 0x10), None);
    }

    #[test]
    fn ext_cap_walk_survives_malformed_chains() {
        // Header pointing back at itself
        let mut config = vec![0u8; 4096];
        config[0x100..0x104].copy_from_slice(&(0x000B_u32 | (0x100 << 20)).to_le_bytes());
        let dir = fake_device(&config);
        assert_eq!(find_ext_cap(dir.path(), PCI_EXT_CAP_ID_NPEM), None);
    }
}
