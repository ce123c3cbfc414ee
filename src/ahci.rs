//! AHCI enclosure-management transport
//!
//! Intel AHCI controllers with the EMS capability accept LED messages
//! through the SCSI host's `em_message` sysfs attribute; libahci turns the
//! 32-bit message into SGPIO traffic on the backplane. The attribute sits
//! next to the port's SCSI host, so the path is derived by walking the
//! block device's sysfs path up to its `hostN` component.

use std::fs;
use std::path::{Path, PathBuf};

use crate::ibpi::Ibpi;
use crate::status::Status;

/// Locate the `em_message` attribute for a block device
///
/// `/sys/devices/.../ataX/hostN/...` maps to
/// `/sys/devices/.../ataX/hostN/scsi_host/hostN/em_message`.
pub fn em_message_path(block_path: &Path) -> Option<PathBuf> {
    let mut prefix = PathBuf::new();
    for comp in block_path.iter() {
        prefix.push(comp);
        let Some(name) = comp.to_str() else { continue };
        if let Some(digits) = name.strip_prefix("host") {
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                return Some(prefix.join("scsi_host").join(name).join("em_message"));
            }
        }
    }
    None
}

/// Write an indication as an enclosure-management message
///
/// Patterns without an EM encoding are downgraded to `Normal` (logged).
pub fn write(block_path: &Path, ibpi: Ibpi) -> Result<(), Status> {
    let em_path = em_message_path(block_path).ok_or(Status::InvalidPath)?;
    let message = match ibpi.ahci_message() {
        Some(message) => message,
        None => {
            log::info!(
                "ahci: {}: pattern {} not supported, writing normal",
                block_path.display(),
                ibpi
            );
            Ibpi::Normal.ahci_message().unwrap()
        }
    };
    fs::write(&em_path, format!("{message}")).map_err(|err| {
        log::warn!("ahci: {}: write failed: {}", em_path.display(), err);
        Status::FileWriteError
    })
}
