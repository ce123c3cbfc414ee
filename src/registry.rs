//! Device registry
//!
//! Cross-indexes controllers, enclosures and block devices. The registry is
//! rebuilt in full on every scan; block devices borrow their controller and
//! enclosure by index, so there are no reference cycles and teardown is a
//! plain drop. Lookups are linear scans, fine for the device counts a
//! single host carries.

use std::path::{Path, PathBuf};

use crate::ahci;
use crate::block::{self, BlockDevice};
use crate::cntrl::{Cntrl, CntrlType};
use crate::config::Config;
use crate::ibpi::Ibpi;
use crate::ipmi::dell::DellBackplane;
use crate::pci::{npem, vmd};
use crate::scsi::ses::{self, Enclosure};
use crate::slot::Slot;
use crate::status::Status;

/// The device registry
pub struct Registry {
    sys_root: PathBuf,
    dev_root: PathBuf,
    /// Admitted controllers
    pub cntrls: Vec<Cntrl>,
    /// Discovered SES enclosures
    pub enclosures: Vec<Enclosure>,
    /// Enumerated block devices
    pub devices: Vec<BlockDevice>,
    /// BMC link, opened on the first Dell write
    dell: Option<DellBackplane>,
}

impl Registry {
    /// Registry over the live system
    pub fn new() -> Registry {
        Registry::with_roots(PathBuf::from("/sys"), PathBuf::from("/dev"))
    }

    /// Registry over the given roots (tests use throwaway trees)
    pub fn with_roots(sys_root: PathBuf, dev_root: PathBuf) -> Registry {
        Registry {
            sys_root,
            dev_root,
            cntrls: Vec::new(),
            enclosures: Vec::new(),
            devices: Vec::new(),
            dell: None,
        }
    }

    /// Sysfs root the registry scans under
    pub fn sys_root(&self) -> &Path {
        &self.sys_root
    }

    /// Rebuild the registry from scratch
    pub fn scan(&mut self, config: &Config) -> Result<(), Status> {
        self.cntrls.clear();
        self.enclosures.clear();
        self.devices.clear();

        self.scan_cntrls(config);
        if self.cntrls.is_empty() {
            log::warn!("registry: no supported controllers found");
        }
        self.scan_enclosures();
        self.scan_devices();

        log::info!(
            "registry: {} controllers, {} enclosures, {} block devices",
            self.cntrls.len(),
            self.enclosures.len(),
            self.devices.len()
        );
        Ok(())
    }

    /// Enumerate and classify PCI storage controllers
    fn scan_cntrls(&mut self, config: &Config) {
        for entry in crate::sysfs::list_dir(&self.sys_root.join("bus/pci/devices")) {
            let path = crate::sysfs::read_link(&entry).unwrap_or(entry);
            if let Some(mut cntrl) = Cntrl::new(path, &self.sys_root, &self.dev_root, config) {
                cntrl.init_smp(&self.sys_root, &self.dev_root);
                self.cntrls.push(cntrl);
            }
        }
    }

    /// Discover SES enclosures and build their slot tables
    fn scan_enclosures(&mut self) {
        for entry in crate::sysfs::list_dir(&self.sys_root.join("class/enclosure")) {
            let Some(encl_dir) = crate::sysfs::read_link(&entry) else {
                continue;
            };
            // The enclosure class device sits under the SCSI device that
            // answers the diagnostic pages; that device names the bsg node.
            let Some(scsi_dev) = encl_dir.parent().and_then(Path::parent) else {
                continue;
            };
            let Some(bsg_path) = ses::bsg_path_for(scsi_dev, &self.dev_root) else {
                continue;
            };
            let mut enclosure = Enclosure::new(scsi_dev.to_path_buf(), bsg_path);
            if let Err(status) = enclosure.discover_slots() {
                log::warn!(
                    "registry: {}: slot discovery failed: {}",
                    enclosure.bsg_path.display(),
                    status
                );
            }
            self.enclosures.push(enclosure);
        }
    }

    /// Enumerate block devices and attach them to controllers
    fn scan_devices(&mut self) {
        for entry in crate::sysfs::list_dir(&self.sys_root.join("block")) {
            let Some(dev_path) = crate::sysfs::read_link(&entry) else {
                continue;
            };
            if dev_path.to_string_lossy().contains("/virtual/") {
                continue;
            }
            let Some(cntrl_idx) = self
                .cntrls
                .iter()
                .position(|c| dev_path.starts_with(&c.path))
            else {
                log::debug!("registry: {}: no owning controller", dev_path.display());
                continue;
            };

            let mut dev = BlockDevice::new(dev_path, cntrl_idx);
            if self.cntrls[cntrl_idx].cntrl_type == CntrlType::Scsi {
                self.bind_enclosure_slot(&mut dev);
            }
            self.devices.push(dev);
        }
    }

    /// Bind a SAS drive to its enclosure slot by SAS address
    fn bind_enclosure_slot(&self, dev: &mut BlockDevice) {
        dev.phy_index = block::phy_index(&dev.sysfs_path, &self.sys_root);
        let sas_address = block::sas_address(&dev.sysfs_path, &self.sys_root);
        for (idx, enclosure) in self.enclosures.iter().enumerate() {
            if let Some(slot) = enclosure.slot_for_sas(sas_address) {
                dev.encl_idx = Some(idx);
                dev.encl_slot = slot;
                return;
            }
        }
    }

    /// Find a device by its sysfs path
    pub fn device_by_path(&self, path: &Path) -> Option<usize> {
        self.devices.iter().position(|d| d.sysfs_path == path)
    }

    /// Find a device by its node basename
    pub fn device_by_name(&self, name: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.name == name)
    }

    /// Find a slot by its identifier
    pub fn slot_by_id(&self, id: &str) -> Option<Slot> {
        self.slots().into_iter().find(|s| s.id() == id)
    }

    /// Deliver an indication to one block device
    ///
    /// Consecutive writes of the same indication are free: nothing touches
    /// the bus until the desired state changes. `OneshotNormal` writes a
    /// plain `Normal` but is recorded as itself, which is exactly the
    /// quiesce rule.
    pub fn write_ibpi(&mut self, dev_idx: usize, ibpi: Ibpi) -> Result<(), Status> {
        if self.devices[dev_idx].ibpi_previous_written == ibpi {
            return Ok(());
        }
        let wire_ibpi = if ibpi == Ibpi::OneshotNormal {
            Ibpi::Normal
        } else {
            ibpi
        };

        let cntrl_idx = self.devices[dev_idx].cntrl_idx;
        let cntrl_type = self.cntrls[cntrl_idx].cntrl_type;
        let dev_path = self.devices[dev_idx].sysfs_path.clone();

        let result = match cntrl_type {
            CntrlType::Scsi => self.write_scsi(dev_idx, cntrl_idx, wire_ibpi),
            CntrlType::Ahci => ahci::write(&dev_path, wire_ibpi),
            CntrlType::Vmd => self.write_vmd(cntrl_idx, &dev_path, wire_ibpi),
            CntrlType::Npem => {
                let cntrl_path = self.cntrls[cntrl_idx].path.clone();
                npem::write(&cntrl_path, wire_ibpi).map_err(Status::from)
            }
            CntrlType::Dellssd => self.write_dell(dev_idx, wire_ibpi),
            CntrlType::Amd | CntrlType::Unknown => Err(Status::NotSupported),
        };

        if result.is_ok() {
            let dev = &mut self.devices[dev_idx];
            dev.ibpi_previous_written = ibpi;
            dev.ibpi_current = wire_ibpi;
        }
        result
    }

    /// SCSI delivery: SES slot when bound, SGPIO phy otherwise
    fn write_scsi(&mut self, dev_idx: usize, cntrl_idx: usize, ibpi: Ibpi) -> Result<(), Status> {
        let (encl_idx, encl_slot, phy_index, dev_path) = {
            let dev = &self.devices[dev_idx];
            (
                dev.encl_idx,
                dev.encl_slot,
                dev.phy_index,
                dev.sysfs_path.clone(),
            )
        };

        if let Some(encl_idx) = encl_idx {
            return self.enclosures[encl_idx].write_ibpi(encl_slot, ibpi);
        }

        // SGPIO path: the support mask is the indication model's business,
        // so downgrade here and let the transport refuse true unknowns.
        let ibpi = if ibpi.sgpio_byte().is_none() {
            log::info!(
                "smp: {}: pattern {} not supported, writing normal",
                dev_path.display(),
                ibpi
            );
            Ibpi::Normal
        } else {
            ibpi
        };
        let Some(host) = self.cntrls[cntrl_idx].host_for_path(&dev_path) else {
            log::debug!("smp: {}: no SAS host port", dev_path.display());
            return Err(Status::NotSupported);
        };
        host.write_ibpi(phy_index, ibpi)
    }

    /// VMD delivery through the hotplug slot's attention attribute
    fn write_vmd(&mut self, cntrl_idx: usize, dev_path: &Path, ibpi: Ibpi) -> Result<(), Status> {
        let address = vmd::slot_address(dev_path).ok_or(Status::InvalidPath)?;
        let domain =
            vmd::vmd_domain(&self.cntrls[cntrl_idx].path).ok_or(Status::InvalidPath)?;
        let slot = vmd::find_slot(&self.sys_root.join("bus/pci/slots"), &address, &domain)
            .ok_or(Status::SlotsListError)?;
        vmd::write_attention(&slot, ibpi)
    }

    /// Dell delivery through the BMC, opening it on first use
    fn write_dell(&mut self, dev_idx: usize, ibpi: Ibpi) -> Result<(), Status> {
        let bdf = self.devices[dev_idx].bdf.ok_or(Status::InvalidPath)?;
        if self.dell.is_none() {
            self.dell = Some(DellBackplane::open(&self.dev_root)?);
        }
        self.dell.as_mut().unwrap().write(bdf, ibpi)
    }

    /// Flush every enclosure with staged writes
    pub fn flush_enclosures(&mut self) {
        for enclosure in &mut self.enclosures {
            if !enclosure.pending_changes() {
                continue;
            }
            if let Err(status) = enclosure.flush() {
                log::warn!(
                    "registry: {}: enclosure flush failed: {}",
                    enclosure.bsg_path.display(),
                    status
                );
            }
        }
    }

    /// Enumerate every LED-bearing slot the registry knows about
    pub fn slots(&self) -> Vec<Slot> {
        let mut slots = Vec::new();

        for cntrl in &self.cntrls {
            match cntrl.cntrl_type {
                CntrlType::Vmd => {
                    let Some(domain) = vmd::vmd_domain(&cntrl.path) else {
                        continue;
                    };
                    for slot_dir in crate::sysfs::list_dir(&self.sys_root.join("bus/pci/slots")) {
                        let Some(address) = crate::sysfs::read_text(&slot_dir.join("address"))
                        else {
                            continue;
                        };
                        if address.starts_with(&format!("{domain}:")) {
                            slots.push(Slot::Pci {
                                slot_path: slot_dir,
                                address,
                            });
                        }
                    }
                }
                CntrlType::Npem => slots.push(Slot::Npem {
                    cntrl_path: cntrl.path.clone(),
                }),
                _ => {}
            }
        }

        for enclosure in &self.enclosures {
            for entry in &enclosure.slots {
                slots.push(Slot::Ses {
                    sysfs_path: enclosure.sysfs_path.clone(),
                    bsg_path: enclosure.bsg_path.clone(),
                    element_index: entry.index,
                });
            }
        }

        slots
    }

    /// Registry invariants, checked after a scan in debug builds
    #[cfg(debug_assertions)]
    pub fn check_invariants(&self) {
        for dev in &self.devices {
            debug_assert!(dev.cntrl_idx < self.cntrls.len());
            debug_assert!(self.cntrls[dev.cntrl_idx].cntrl_type != CntrlType::Unknown);
            debug_assert_eq!(dev.encl_idx.is_none(), dev.encl_slot == -1);
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}
