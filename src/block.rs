//! Block device model
//!
//! One entry per enumerated block device, borrowing its controller (and,
//! for SAS drives behind an enclosure, its enclosure slot) by registry
//! index. The three indication fields implement the write-skip and
//! one-shot rules: `desired` is what the monitor wants, `previous_written`
//! is what last reached hardware, and a write only happens when they
//! differ.

use std::path::{Path, PathBuf};

use crate::ibpi::Ibpi;
use crate::pci::PciAddress;
use crate::sysfs;

/// One enumerated block device
#[derive(Debug)]
pub struct BlockDevice {
    /// Canonical device directory in sysfs
    pub sysfs_path: PathBuf,
    /// Device node basename (`sda`, `nvme0n1`, ...)
    pub name: String,
    /// Owning controller, registry index
    pub cntrl_idx: usize,
    /// Enclosure the drive sits in, registry index
    pub encl_idx: Option<usize>,
    /// Element index inside the enclosure, -1 without an enclosure
    pub encl_slot: i32,
    /// SAS phy the drive hangs off (SGPIO addressing)
    pub phy_index: u32,
    /// Endpoint PCI address (NPEM, VMD and Dell addressing)
    pub bdf: Option<PciAddress>,
    /// Indication currently observed for the device
    pub ibpi_current: Ibpi,
    /// Indication the monitor wants shown
    pub ibpi_desired: Ibpi,
    /// Indication last delivered to hardware
    pub ibpi_previous_written: Ibpi,
}

impl BlockDevice {
    pub fn new(sysfs_path: PathBuf, cntrl_idx: usize) -> BlockDevice {
        let name = sysfs_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bdf = endpoint_bdf(&sysfs_path);
        BlockDevice {
            sysfs_path,
            name,
            cntrl_idx,
            encl_idx: None,
            encl_slot: -1,
            phy_index: 0,
            bdf,
            ibpi_current: Ibpi::Unknown,
            ibpi_desired: Ibpi::Unknown,
            ibpi_previous_written: Ibpi::Unknown,
        }
    }
}

/// SAS-device attribute path for a block device
///
/// The device path names its end device; the attribute lives under
/// `/sys/class/sas_end_device/<ed>/device/sas_device/<ed>/<attr>`.
fn sas_device_attr(block_path: &Path, sys_root: &Path, attr: &str) -> Option<PathBuf> {
    let end_device = block_path
        .iter()
        .filter_map(|c| c.to_str())
        .find(|c| c.starts_with("end_device-"))?;
    Some(
        sys_root
            .join("class/sas_end_device")
            .join(end_device)
            .join("device/sas_device")
            .join(end_device)
            .join(attr),
    )
}

/// SAS address of a block device, 0 when it has none
pub fn sas_address(block_path: &Path, sys_root: &Path) -> u64 {
    sas_device_attr(block_path, sys_root, "sas_address")
        .and_then(|path| sysfs::read_u64(&path))
        .unwrap_or(0)
}

/// SAS phy identifier of a block device, 0 when unknown
pub fn phy_index(block_path: &Path, sys_root: &Path) -> u32 {
    sas_device_attr(block_path, sys_root, "phy_identifier")
        .and_then(|path| sysfs::read_int(&path))
        .map(|value| value as u32)
        .unwrap_or(0)
}

/// Endpoint PCI address embedded in a device path
///
/// The last path component that parses as a BDF is the endpoint the drive
/// answers on.
fn endpoint_bdf(block_path: &Path) -> Option<PciAddress> {
    block_path
        .iter()
        .filter_map(|c| c.to_str())
        .filter_map(|c| c.parse::<PciAddress>().ok())
        .next_back()
}
