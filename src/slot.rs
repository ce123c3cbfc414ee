//! Slot model
//!
//! A slot is a LED-bearing position independent of whether a drive sits in
//! it. The three variants carry everything their protocol needs, so a slot
//! can get and set its state on its own: PCI hotplug slots through the
//! `attention` attribute, SES slots through a one-shot control-page write,
//! NPEM slots through the controller's capability registers.

use std::path::PathBuf;

use crate::ibpi::Ibpi;
use crate::pci::{npem, vmd};
use crate::scsi::ses::Enclosure;
use crate::status::Status;

/// One LED-bearing slot
#[derive(Debug, Clone)]
pub enum Slot {
    /// PCIe hotplug slot with an `attention` attribute
    Pci {
        /// Slot directory under `/sys/bus/pci/slots`
        slot_path: PathBuf,
        /// Slot address string (`domain:bus:device`)
        address: String,
    },
    /// SES enclosure slot
    Ses {
        /// Enclosure device directory in sysfs
        sysfs_path: PathBuf,
        /// bsg node of the enclosure
        bsg_path: PathBuf,
        /// Element index within the enclosure
        element_index: i32,
    },
    /// NPEM controller (one slot per controller)
    Npem {
        /// Controller device directory in sysfs
        cntrl_path: PathBuf,
    },
}

impl Slot {
    /// Stable identifier for listings
    pub fn id(&self) -> String {
        match self {
            Slot::Pci { address, .. } => format!("pci:{address}"),
            Slot::Ses {
                bsg_path,
                element_index,
                ..
            } => format!(
                "ses:{}/{}",
                bsg_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                element_index
            ),
            Slot::Npem { cntrl_path } => format!(
                "npem:{}",
                cntrl_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ),
        }
    }

    /// Indication the slot currently shows
    pub fn get_state(&self) -> Result<Ibpi, Status> {
        match self {
            Slot::Pci { slot_path, .. } => {
                vmd::read_attention(slot_path).ok_or(Status::FileReadError)
            }
            Slot::Ses {
                sysfs_path,
                bsg_path,
                element_index,
            } => {
                let mut encl = Enclosure::new(sysfs_path.clone(), bsg_path.clone());
                encl.get_ibpi(*element_index)
            }
            Slot::Npem { cntrl_path } => npem::get(cntrl_path).map_err(Status::from),
        }
    }

    /// Set the slot's indication
    ///
    /// SES slots stage and flush in one step here; batched delivery is the
    /// registry's business, this path serves the one-shot CLI.
    pub fn set_state(&self, ibpi: Ibpi) -> Result<(), Status> {
        match self {
            Slot::Pci { slot_path, .. } => vmd::write_attention(slot_path, ibpi),
            Slot::Ses {
                sysfs_path,
                bsg_path,
                element_index,
            } => {
                let mut encl = Enclosure::new(sysfs_path.clone(), bsg_path.clone());
                encl.write_ibpi(*element_index, ibpi)?;
                encl.flush()
            }
            Slot::Npem { cntrl_path } => npem::write(cntrl_path, ibpi).map_err(Status::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn slot_ids_name_their_protocol() {
        let pci = Slot::Pci {
            slot_path: PathBuf::from("/sys/bus/pci/slots/5"),
            address: "10000:01:00".into(),
        };
        assert_eq!(pci.id(), "pci:10000:01:00");

        let ses = Slot::Ses {
            sysfs_path: PathBuf::from("/sys/devices/.../0:0:9:0"),
            bsg_path: PathBuf::from("/dev/bsg/0:0:9:0"),
            element_index: 4,
        };
        assert_eq!(ses.id(), "ses:0:0:9:0/4");

        let npem = Slot::Npem {
            cntrl_path: PathBuf::from("/sys/bus/pci/devices/0000:3b:00.0"),
        };
        assert_eq!(npem.id(), "npem:0000:3b:00.0");
    }

    #[test]
    fn pci_slot_state_round_trips() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("attention"), "15").unwrap();
        let slot = Slot::Pci {
            slot_path: dir.path().to_path_buf(),
            address: "10000:01:00".into(),
        };

        assert_eq!(slot.get_state().unwrap(), Ibpi::Normal);
        slot.set_state(Ibpi::Locate).unwrap();
        assert_eq!(slot.get_state().unwrap(), Ibpi::Locate);
    }
}
