//! NPEM transport (PCIe Native Enclosure Management)
//!
//! NPEM is PCIe extended capability 0x29: a capability register advertising
//! the indications the enclosure can render, a control register carrying the
//! requested indication, and a status register whose Command Completed bit
//! is RW1C. Reference: PCIe Base spec, Native PCIe Enclosure Management.

use std::io;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::ibpi::{Ibpi, NPEM_CAP};
use crate::pci::{self, PCI_EXT_CAP_ID_NPEM};

/// Capability register offset from the capability base
const NPEM_CAP_REG: u16 = 0x04;
/// Control register offset from the capability base
const NPEM_CTRL_REG: u16 = 0x08;
/// Status register offset from the capability base
const NPEM_STATUS_REG: u16 = 0x0C;

/// Command Completed, RW1C
const NPEM_STATUS_CC: u32 = 0x01;

/// Indication bits occupy the low 12 bits of the control register
const NPEM_CTRL_MASK: u32 = 0xFFF;

/// Command-completion poll budget, one wall-clock second
const CC_POLL_BUDGET: Duration = Duration::from_secs(1);

/// Single poll step
const CC_POLL_STEP: Duration = Duration::from_millis(10);

/// Check whether a controller carries an enabled NPEM capability
pub fn is_npem_capable(cntrl_path: &Path) -> bool {
    let Some(base) = pci::find_ext_cap(cntrl_path, PCI_EXT_CAP_ID_NPEM) else {
        return false;
    };
    match pci::read_config_u32(cntrl_path, base + NPEM_CAP_REG) {
        Ok(cap) => cap & NPEM_CAP != 0,
        Err(_) => false,
    }
}

/// Write an indication to an NPEM controller
///
/// A pattern the capability register does not advertise is downgraded to
/// `Normal` (logged, so the substitution is visible). After the control
/// write, the status register is polled for Command Completed for up to one
/// second and the bit is cleared once observed; an expired budget surfaces
/// as `EAGAIN` so the caller can retry on its next tick.
pub fn write(cntrl_path: &Path, ibpi: Ibpi) -> io::Result<()> {
    let base = pci::find_ext_cap(cntrl_path, PCI_EXT_CAP_ID_NPEM)
        .ok_or_else(|| io::Error::from_raw_os_error(libc::ENODEV))?;

    let cap = pci::read_config_u32(cntrl_path, base + NPEM_CAP_REG)?;
    let mask = match ibpi.npem_mask() {
        Some(mask) if cap & mask != 0 => mask,
        _ => {
            log::info!(
                "npem: {}: pattern {} not supported, writing normal",
                cntrl_path.display(),
                ibpi
            );
            Ibpi::Normal.npem_mask().unwrap()
        }
    };

    let ctrl = pci::read_config_u32(cntrl_path, base + NPEM_CTRL_REG)?;
    let ctrl = (ctrl & !NPEM_CTRL_MASK) | NPEM_CAP | mask;
    pci::write_config_u32(cntrl_path, base + NPEM_CTRL_REG, ctrl)?;

    wait_command_completed(cntrl_path, base)
}

/// Poll the status register for Command Completed and clear it
fn wait_command_completed(cntrl_path: &Path, base: u16) -> io::Result<()> {
    let deadline = Instant::now() + CC_POLL_BUDGET;
    loop {
        let status = pci::read_config_u32(cntrl_path, base + NPEM_STATUS_REG)?;
        if status & NPEM_STATUS_CC != 0 {
            pci::write_config_u32(cntrl_path, base + NPEM_STATUS_REG, NPEM_STATUS_CC)?;
            return Ok(());
        }
        if Instant::now() >= deadline {
            log::debug!(
                "npem: {}: command completion poll expired",
                cntrl_path.display()
            );
            return Err(io::Error::from_raw_os_error(libc::EAGAIN));
        }
        thread::sleep(CC_POLL_STEP);
    }
}

/// Read the indication currently requested in the control register
pub fn get(cntrl_path: &Path) -> io::Result<Ibpi> {
    let base = pci::find_ext_cap(cntrl_path, PCI_EXT_CAP_ID_NPEM)
        .ok_or_else(|| io::Error::from_raw_os_error(libc::ENODEV))?;
    let ctrl = pci::read_config_u32(cntrl_path, base + NPEM_CTRL_REG)?;
    Ok(Ibpi::from_npem(ctrl))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ibpi::{NPEM_LOCATE, NPEM_OK, NPEM_REBUILD};
    use crate::pci::tests::{config_with_npem, fake_device};

    #[test]
    fn capability_detection() {
        let dir = fake_device(&config_with_npem(NPEM_CAP | NPEM_OK, 0, 0));
        assert!(is_npem_capable(dir.path()));

        let dir = fake_device(&config_with_npem(NPEM_OK, 0, 0));
        assert!(!is_npem_capable(dir.path()));
    }

    #[test]
    fn set_supported_pattern() {
        // Status preloaded with CC so the poll completes immediately
        let caps = NPEM_CAP | NPEM_OK | NPEM_LOCATE | NPEM_REBUILD;
        let dir = fake_device(&config_with_npem(caps, 0, NPEM_STATUS_CC));

        write(dir.path(), Ibpi::Locate).unwrap();

        let ctrl = pci::read_config_u32(dir.path(), 0x140 + NPEM_CTRL_REG).unwrap();
        assert_eq!(ctrl & NPEM_CTRL_MASK, NPEM_CAP | NPEM_LOCATE);
        assert_eq!(get(dir.path()).unwrap(), Ibpi::Locate);
    }

    #[test]
    fn unsupported_pattern_downgrades_to_normal() {
        let caps = NPEM_CAP | NPEM_OK;
        let dir = fake_device(&config_with_npem(caps, 0, NPEM_STATUS_CC));

        write(dir.path(), Ibpi::Locate).unwrap();

        let ctrl = pci::read_config_u32(dir.path(), 0x140 + NPEM_CTRL_REG).unwrap();
        assert_eq!(ctrl & NPEM_CTRL_MASK, NPEM_CAP | NPEM_OK);
        assert_eq!(get(dir.path()).unwrap(), Ibpi::Normal);
    }

    #[test]
    fn stale_control_bits_are_cleared() {
        let caps = NPEM_CAP | NPEM_OK | NPEM_LOCATE;
        let ctrl = NPEM_CAP | NPEM_LOCATE;
        let dir = fake_device(&config_with_npem(caps, ctrl, NPEM_STATUS_CC));

        write(dir.path(), Ibpi::Normal).unwrap();

        let ctrl = pci::read_config_u32(dir.path(), 0x140 + NPEM_CTRL_REG).unwrap();
        assert_eq!(ctrl & NPEM_CTRL_MASK, NPEM_CAP | NPEM_OK);
    }

    #[test]
    fn missing_cc_times_out_with_eagain() {
        let caps = NPEM_CAP | NPEM_OK;
        let dir = fake_device(&config_with_npem(caps, 0, 0));

        let err = write(dir.path(), Ibpi::Normal).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EAGAIN));
    }
}
