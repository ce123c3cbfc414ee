//! Storage controller model and protocol classification
//!
//! Every block device is reached through exactly one controller, and the
//! controller's classification decides which transport delivers its LED
//! indications. Classification is a fixed decision tree over PCI ids,
//! driver names and capability probes, evaluated in order with the first
//! match winning.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::pci::npem;
use crate::scsi::smp::{self, SmpHost};
use crate::sysfs;

/// Dell/Micron OEM SSD vendor id
const DELL_VENDOR_MICRON: i64 = 0x1344;
/// Dell/Micron OEM SSD device id
const DELL_DEVICE_P5150: i64 = 0x5150;
/// Dell subsystem vendor id
const DELL_SUBSYS_VENDOR: i64 = 0x1028;
/// NVMe I/O controller class code
const CLASS_NVME: i64 = 0x010802;
/// Mass storage base class
const CLASS_MASS_STORAGE: i64 = 0x01;
/// Intel vendor id
const VENDOR_INTEL: i64 = 0x8086;

/// Protocol family a controller speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CntrlType {
    /// Intel AHCI with enclosure-management messages
    Ahci,
    /// SCSI/SAS: SES enclosures and SGPIO host phys
    Scsi,
    /// Intel Volume Management Device
    Vmd,
    /// Native PCIe Enclosure Management
    Npem,
    /// Dell BMC-attached backplane
    Dellssd,
    /// AMD SGPIO (reserved; nothing classifies to it yet)
    Amd,
    /// Unrecognized; never enters the registry
    Unknown,
}

impl fmt::Display for CntrlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CntrlType::Ahci => "AHCI",
            CntrlType::Scsi => "SCSI",
            CntrlType::Vmd => "VMD",
            CntrlType::Npem => "NPEM",
            CntrlType::Dellssd => "DELLSSD",
            CntrlType::Amd => "AMD",
            CntrlType::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// One storage controller
///
/// Created during a scan, immutable afterwards (the SAS host list is filled
/// once by `init_smp` and only its TX caches change).
#[derive(Debug)]
pub struct Cntrl {
    /// Canonical device directory in sysfs
    pub path: PathBuf,
    /// Classified protocol family
    pub cntrl_type: CntrlType,
    /// SAS host ports with their TX register caches (SCSI only)
    pub hosts: Vec<SmpHost>,
}

impl Cntrl {
    /// Classify and admit a controller
    ///
    /// Returns `None` for unrecognized controllers and for paths the
    /// allow/deny filter rejects.
    pub fn new(path: PathBuf, sys_root: &Path, dev_root: &Path, config: &Config) -> Option<Cntrl> {
        let cntrl_type = classify(&path, sys_root, dev_root);
        if cntrl_type == CntrlType::Unknown {
            log::debug!("cntrl: {}: no enclosure management", path.display());
            return None;
        }
        if !config.cntrl_allowed(&path.to_string_lossy()) {
            log::info!("cntrl: {}: excluded by filter", path.display());
            return None;
        }
        log::debug!("cntrl: {}: {}", path.display(), cntrl_type);
        Some(Cntrl {
            path,
            cntrl_type,
            hosts: Vec::new(),
        })
    }

    /// Discover and initialize the controller's SAS host ports
    pub fn init_smp(&mut self, sys_root: &Path, dev_root: &Path) {
        if self.cntrl_type != CntrlType::Scsi {
            return;
        }
        self.hosts = smp::discover_hosts(&self.path, sys_root, dev_root);
        for host in &mut self.hosts {
            log::debug!(
                "cntrl: {}: host{} with {} ports",
                self.path.display(),
                host.host_id,
                host.ports
            );
            if let Err(status) = host.init() {
                log::warn!(
                    "cntrl: {}: host{} SGPIO init failed: {}",
                    self.path.display(),
                    host.host_id,
                    status
                );
            }
        }
    }

    /// Host port whose device directory contains the given path
    pub fn host_for_path(&mut self, dev_path: &Path) -> Option<&mut SmpHost> {
        self.hosts
            .iter_mut()
            .find(|host| dev_path.starts_with(&host.host_path))
    }
}

/// Name of the bound kernel driver
fn driver_name(path: &Path) -> Option<String> {
    let target = sysfs::read_link(&path.join("driver"))?;
    Some(target.file_name()?.to_str()?.to_string())
}

/// Whether any enclosure device hangs off this controller
fn has_enclosure(path: &Path, sys_root: &Path) -> bool {
    sysfs::list_dir(&sys_root.join("class/enclosure"))
        .iter()
        .filter_map(|entry| sysfs::read_link(entry))
        .any(|target| target.starts_with(path))
}

/// AHCI enclosure-management gate
///
/// The `ahci_em_messages` libahci parameter must not be disabled, and the
/// controller's driver must be listed as a holder of libahci. An absent
/// parameter or holders directory counts as enabled.
fn ahci_em_enabled(driver: &str, sys_root: &Path) -> bool {
    let param = sys_root.join("module/libahci/parameters/ahci_em_messages");
    let enabled = match sysfs::read_int(&param) {
        Some(value) => value != 0,
        None => sysfs::read_bool(&param).unwrap_or(true),
    };
    if !enabled {
        return false;
    }

    let holders = sys_root.join("module/libahci/holders");
    if !holders.is_dir() {
        return true;
    }
    sysfs::list_dir(&holders)
        .iter()
        .any(|entry| entry.file_name().is_some_and(|name| name == driver))
}

/// Whether a SAS host under the controller answers SMP GPIO reads
fn smp_probe(path: &Path, sys_root: &Path, dev_root: &Path) -> bool {
    smp::discover_hosts(path, sys_root, dev_root)
        .iter()
        .any(|host| smp::probe(&host.bsg_path))
}

/// The classification decision tree
pub fn classify(path: &Path, sys_root: &Path, dev_root: &Path) -> CntrlType {
    let driver = driver_name(path).unwrap_or_default();
    let vendor = sysfs::read_int(&path.join("vendor")).unwrap_or(0);
    let device = sysfs::read_int(&path.join("device")).unwrap_or(0);
    let subsys_vendor = sysfs::read_int(&path.join("subsystem_vendor")).unwrap_or(0);
    let class = sysfs::read_int(&path.join("class")).unwrap_or(0);

    if driver == "vmd" {
        return CntrlType::Vmd;
    }

    if (vendor == DELL_VENDOR_MICRON && device == DELL_DEVICE_P5150)
        || (subsys_vendor == DELL_SUBSYS_VENDOR && class == CLASS_NVME)
    {
        return CntrlType::Dellssd;
    }

    if class >> 16 == CLASS_MASS_STORAGE {
        if driver == "ahci" && vendor == VENDOR_INTEL {
            if ahci_em_enabled(&driver, sys_root) {
                return CntrlType::Ahci;
            }
            return CntrlType::Unknown;
        }
        if driver == "isci" || has_enclosure(path, sys_root) || smp_probe(path, sys_root, dev_root)
        {
            return CntrlType::Scsi;
        }
    }

    if npem::is_npem_capable(path) {
        return CntrlType::Npem;
    }

    CntrlType::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    /// Fake /sys with one PCI device directory
    struct FakeSys {
        root: TempDir,
        cntrl: PathBuf,
    }

    impl FakeSys {
        fn new(driver: &str, vendor: &str, device: &str, subsys: &str, class: &str) -> FakeSys {
            let root = TempDir::new().unwrap();
            let cntrl = root.path().join("devices/pci0000:00/0000:00:17.0");
            fs::create_dir_all(&cntrl).unwrap();
            fs::write(cntrl.join("vendor"), vendor).unwrap();
            fs::write(cntrl.join("device"), device).unwrap();
            fs::write(cntrl.join("subsystem_vendor"), subsys).unwrap();
            fs::write(cntrl.join("class"), class).unwrap();
            let drivers = root.path().join("bus/pci/drivers").join(driver);
            fs::create_dir_all(&drivers).unwrap();
            symlink(&drivers, cntrl.join("driver")).unwrap();
            FakeSys { root, cntrl }
        }

        fn sys(&self) -> &Path {
            self.root.path()
        }

        fn enable_ahci_em(&self, value: &str, holder: Option<&str>) {
            let params = self.sys().join("module/libahci/parameters");
            fs::create_dir_all(&params).unwrap();
            fs::write(params.join("ahci_em_messages"), value).unwrap();
            if let Some(holder) = holder {
                let holders = self.sys().join("module/libahci/holders");
                fs::create_dir_all(holders.join(holder)).unwrap();
            }
        }

        fn attach_enclosure(&self) {
            let class = self.sys().join("class/enclosure");
            fs::create_dir_all(&class).unwrap();
            let device = self.cntrl.join("host0/target0:0:9/0:0:9:0/enclosure/0:0:9:0");
            fs::create_dir_all(&device).unwrap();
            symlink(&device, class.join("0:0:9:0")).unwrap();
        }

        fn classify(&self) -> CntrlType {
            classify(&self.cntrl, self.sys(), Path::new("/nonexistent-dev"))
        }
    }

    #[test]
    fn vmd_wins_first() {
        let sys = FakeSys::new("vmd", "0x8086", "0x201d", "0x8086", "0x010400");
        assert_eq!(sys.classify(), CntrlType::Vmd);
    }

    #[test]
    fn dell_oem_table() {
        let sys = FakeSys::new("nvme", "0x1344", "0x5150", "0x0000", "0x010802");
        assert_eq!(sys.classify(), CntrlType::Dellssd);

        let sys = FakeSys::new("nvme", "0x8086", "0x0a54", "0x1028", "0x010802");
        assert_eq!(sys.classify(), CntrlType::Dellssd);
    }

    #[test]
    fn intel_ahci_with_em_gate_open() {
        let sys = FakeSys::new("ahci", "0x8086", "0xa182", "0x8086", "0x010601");
        sys.enable_ahci_em("1", Some("ahci"));
        assert_eq!(sys.classify(), CntrlType::Ahci);
    }

    #[test]
    fn ahci_em_messages_disabled_filters_controller() {
        let sys = FakeSys::new("ahci", "0x8086", "0xa182", "0x8086", "0x010601");
        sys.enable_ahci_em("0", Some("ahci"));
        assert_eq!(sys.classify(), CntrlType::Unknown);
    }

    #[test]
    fn ahci_gate_defaults_open_without_module_tree() {
        let sys = FakeSys::new("ahci", "0x8086", "0xa182", "0x8086", "0x010601");
        assert_eq!(sys.classify(), CntrlType::Ahci);
    }

    #[test]
    fn ahci_gate_requires_holder_entry() {
        let sys = FakeSys::new("ahci", "0x8086", "0xa182", "0x8086", "0x010601");
        sys.enable_ahci_em("1", Some("acard-ahci"));
        assert_eq!(sys.classify(), CntrlType::Unknown);
    }

    #[test]
    fn isci_driver_is_scsi() {
        let sys = FakeSys::new("isci", "0x8086", "0x1d68", "0x8086", "0x010700");
        assert_eq!(sys.classify(), CntrlType::Scsi);
    }

    #[test]
    fn foreign_vendor_with_enclosure_is_scsi() {
        let sys = FakeSys::new("mpt3sas", "0x1000", "0x0097", "0x1000", "0x010700");
        sys.attach_enclosure();
        assert_eq!(sys.classify(), CntrlType::Scsi);
    }

    #[test]
    fn npem_capability_classifies_nvme() {
        use crate::ibpi::{NPEM_CAP, NPEM_OK};
        let sys = FakeSys::new("nvme", "0x144d", "0xa808", "0x144d", "0x010802");
        fs::write(
            sys.cntrl.join("config"),
            crate::pci::tests::config_with_npem(NPEM_CAP | NPEM_OK, 0, 0),
        )
        .unwrap();
        assert_eq!(sys.classify(), CntrlType::Npem);
    }

    #[test]
    fn plain_sata_is_unknown() {
        let sys = FakeSys::new("ahci", "0x1022", "0x7901", "0x1022", "0x010601");
        assert_eq!(sys.classify(), CntrlType::Unknown);
    }

    #[test]
    fn filter_rejects_controller() {
        let sys = FakeSys::new("isci", "0x8086", "0x1d68", "0x8086", "0x010700");
        let mut config = Config::default();
        config.blacklist = vec!["*00:17.0".into()];
        assert!(
            Cntrl::new(sys.cntrl.clone(), sys.sys(), Path::new("/dev"), &config).is_none()
        );
    }
}
