//! SGPIO over SMP: LED control for SAS host phys
//!
//! Hosts driven by the isci/SAS stack expose no enclosure; their backplane
//! LEDs hang off the host's SGPIO bus instead. The GPIO registers are
//! reached with SMP READ/WRITE GPIO frames submitted through the host's
//! `/dev/bsg/sas_hostN` node. One TX register covers four phys, one byte
//! each, so every write re-reads the register, patches the target byte and
//! transmits the whole word back. Reference: SFF-8485, SAS-2 SMP.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::ibpi::Ibpi;
use crate::scsi;
use crate::status::Status;
use crate::sysfs;

/// SMP request frame type
const SMP_FRAME_TYPE_REQUEST: u8 = 0x40;

/// SMP response frame type
const SMP_FRAME_TYPE_RESPONSE: u8 = 0x41;

/// READ GPIO REGISTER function
const SMP_FUNC_READ_GPIO: u8 = 0x02;

/// WRITE GPIO REGISTER function
const SMP_FUNC_WRITE_GPIO: u8 = 0x82;

/// SMP function result: accepted
const SMP_RESULT_ACCEPTED: u8 = 0x00;

/// GPIO configuration register bank
const GPIO_REG_TYPE_CFG: u8 = 0x00;

/// GPIO receive register bank
#[allow(dead_code)]
const GPIO_REG_TYPE_RX: u8 = 0x01;

/// GPIO transmit register bank
const GPIO_REG_TYPE_TX: u8 = 0x03;

/// SGPIO enable bit in CFG register 0
const GPIO_CFG0_ENABLE: u8 = 0x80;

/// Phys covered by one TX register
const PHYS_PER_TX_REG: u32 = 4;

/// Fixed header of every SMP GPIO request frame
///
/// Data words follow the header; the trailing CRC word is filled in by the
/// driver and stays zero here.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct GpioRequestHeader {
    frame_type: u8,
    function: u8,
    register_type: u8,
    register_index: u8,
    register_count: u8,
    reserved: [u8; 3],
}

impl GpioRequestHeader {
    fn new(function: u8, register_type: u8, register_index: u8, register_count: u8) -> Self {
        GpioRequestHeader {
            frame_type: SMP_FRAME_TYPE_REQUEST,
            function,
            register_type,
            register_index,
            register_count,
            reserved: [0; 3],
        }
    }
}

/// Build a READ GPIO request frame
fn build_read_request(register_type: u8, register_index: u8, register_count: u8) -> Vec<u8> {
    let header = GpioRequestHeader::new(
        SMP_FUNC_READ_GPIO,
        register_type,
        register_index,
        register_count,
    );
    let mut frame = header.as_bytes().to_vec();
    frame.extend_from_slice(&[0u8; 4]); // CRC, owned by the driver
    frame
}

/// Build a WRITE GPIO request frame carrying whole register words
fn build_write_request(register_type: u8, register_index: u8, data: &[u8]) -> Vec<u8> {
    debug_assert_eq!(data.len() % 4, 0);
    let header = GpioRequestHeader::new(
        SMP_FUNC_WRITE_GPIO,
        register_type,
        register_index,
        (data.len() / 4) as u8,
    );
    let mut frame = header.as_bytes().to_vec();
    frame.extend_from_slice(data);
    frame.extend_from_slice(&[0u8; 4]); // CRC, owned by the driver
    frame
}

/// Check an SMP response header and return the data area
fn response_data(response: &[u8]) -> io::Result<&[u8]> {
    if response.len() < 4 || response[0] != SMP_FRAME_TYPE_RESPONSE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "short or malformed SMP response",
        ));
    }
    if response[2] != SMP_RESULT_ACCEPTED {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("SMP function result {:#04x}", response[2]),
        ));
    }
    Ok(&response[4..])
}

/// Read one GPIO register word
fn gpio_read(file: &File, register_type: u8, register_index: u8) -> io::Result<[u8; 4]> {
    let request = build_read_request(register_type, register_index, 1);
    let mut response = [0u8; 4 + 4 + 4];
    scsi::smp_request(file, &request, &mut response)?;
    let data = response_data(&response)?;
    let mut word = [0u8; 4];
    word.copy_from_slice(&data[..4]);
    Ok(word)
}

/// Write one GPIO register word
fn gpio_write(file: &File, register_type: u8, register_index: u8, word: &[u8; 4]) -> io::Result<()> {
    let request = build_write_request(register_type, register_index, word);
    let mut response = [0u8; 4 + 4];
    scsi::smp_request(file, &request, &mut response)?;
    response_data(&response)?;
    Ok(())
}

/// Byte slot of a phy inside the 4-byte TX register
///
/// Phy 0 occupies byte 3; the register transmits high byte first.
fn tx_byte_slot(phy_index: u32) -> usize {
    (PHYS_PER_TX_REG - 1 - phy_index) as usize
}

/// One SAS host port with its outbound TX register cache
#[derive(Debug)]
pub struct SmpHost {
    /// Host device directory in sysfs
    pub host_path: PathBuf,
    /// Host number (the N of `hostN`)
    pub host_id: u32,
    /// bsg node the SMP frames are submitted through
    pub bsg_path: PathBuf,
    /// Number of phy children; may be 0 on an idle host
    pub ports: usize,
    /// Cached outbound TX register 0
    pub tx_cache: [u8; 4],
    /// Cache modified since the last successful register write
    pub dirty: bool,
}

impl SmpHost {
    fn open(&self) -> io::Result<File> {
        File::options().read(true).write(true).open(&self.bsg_path)
    }

    /// One-time host initialization
    ///
    /// Enables the SGPIO bus, seeds the TX cache from hardware (an
    /// unreadable register falls back to the all-normal pattern) and pushes
    /// the seed back out so cache and hardware agree.
    pub fn init(&mut self) -> Result<(), Status> {
        let file = self.open().map_err(|_| Status::FileOpenError)?;

        let cfg = [0, 0, GPIO_CFG0_ENABLE, 0];
        gpio_write(&file, GPIO_REG_TYPE_CFG, 0, &cfg).map_err(|err| {
            log::warn!("smp: {}: enabling SGPIO failed: {}", self.bsg_path.display(), err);
            Status::FileWriteError
        })?;

        self.tx_cache = match gpio_read(&file, GPIO_REG_TYPE_TX, 0) {
            Ok(word) => word,
            Err(err) => {
                log::debug!(
                    "smp: {}: TX readback failed ({}), seeding all-normal",
                    self.bsg_path.display(),
                    err
                );
                let byte = Ibpi::OneshotNormal.sgpio_byte().unwrap().to_byte();
                [byte; 4]
            }
        };

        gpio_write(&file, GPIO_REG_TYPE_TX, 0, &self.tx_cache)
            .map_err(|_| Status::FileWriteError)?;
        self.dirty = false;
        Ok(())
    }

    /// Patch one phy's byte in the cached TX register
    fn stage(&mut self, phy_index: u32, ibpi: Ibpi) -> Result<(), Status> {
        let byte = ibpi.sgpio_byte().ok_or(Status::NotSupported)?;
        if phy_index >= PHYS_PER_TX_REG {
            return Err(Status::OutOfRange);
        }
        self.tx_cache[tx_byte_slot(phy_index)] = byte.to_byte();
        self.dirty = true;
        Ok(())
    }

    /// Deliver an indication to one phy
    ///
    /// The register is re-read first so a byte some other agent changed is
    /// not clobbered, then the patched word is transmitted whole. Patterns
    /// outside the SGPIO support mask are refused with `NotSupported`; the
    /// caller downgrades to `Normal` if it wants a best-effort write.
    pub fn write_ibpi(&mut self, phy_index: u32, ibpi: Ibpi) -> Result<(), Status> {
        let file = self.open().map_err(|_| Status::FileOpenError)?;

        match gpio_read(&file, GPIO_REG_TYPE_TX, 0) {
            Ok(word) => self.tx_cache = word,
            Err(err) => log::debug!(
                "smp: {}: TX re-read failed ({}), using cache",
                self.bsg_path.display(),
                err
            ),
        }

        self.stage(phy_index, ibpi)?;

        gpio_write(&file, GPIO_REG_TYPE_TX, 0, &self.tx_cache)
            .map_err(|_| Status::FileWriteError)?;
        self.dirty = false;
        Ok(())
    }
}

/// Probe a host for a working SMP GPIO path
pub fn probe(bsg_path: &Path) -> bool {
    let Ok(file) = File::options().read(true).write(true).open(bsg_path) else {
        return false;
    };
    gpio_read(&file, GPIO_REG_TYPE_TX, 0).is_ok()
}

/// Discover the SAS hosts belonging to a controller
///
/// Scans `<sys_root>/class/sas_host` for entries whose device sits under
/// the controller path and counts their phy children from
/// `<sys_root>/class/sas_phy`.
pub fn discover_hosts(cntrl_path: &Path, sys_root: &Path, dev_root: &Path) -> Vec<SmpHost> {
    let mut hosts = Vec::new();
    for entry in sysfs::list_dir(&sys_root.join("class/sas_host")) {
        let Some(name) = entry.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let device = sysfs::read_link(&entry).unwrap_or_else(|| entry.clone());
        if !device.starts_with(cntrl_path) {
            continue;
        }
        let Some(host_id) = name.strip_prefix("host").and_then(|n| n.parse().ok()) else {
            continue;
        };

        let ports = sysfs::list_dir(&sys_root.join("class/sas_phy"))
            .iter()
            .filter_map(|phy| sysfs::read_link(phy))
            .filter(|target| target.starts_with(&device))
            .count();

        hosts.push(SmpHost {
            host_path: device,
            host_id,
            bsg_path: dev_root.join("bsg").join(format!("sas_{name}")),
            ports,
            tx_cache: [0; 4],
            dirty: false,
        });
    }
    hosts.sort_by_key(|h| h.host_id);
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_frame_layout() {
        let frame = build_read_request(GPIO_REG_TYPE_TX, 0, 1);
        assert_eq!(
            frame,
            [SMP_FRAME_TYPE_REQUEST, SMP_FUNC_READ_GPIO, 0x03, 0, 1, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn write_request_carries_register_words() {
        let frame = build_write_request(GPIO_REG_TYPE_TX, 0, &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(frame[0], SMP_FRAME_TYPE_REQUEST);
        assert_eq!(frame[1], SMP_FUNC_WRITE_GPIO);
        assert_eq!(frame[4], 1, "register count");
        assert_eq!(&frame[8..12], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(&frame[12..16], &[0, 0, 0, 0], "CRC left to the driver");
    }

    #[test]
    fn response_result_is_checked() {
        assert!(response_data(&[SMP_FRAME_TYPE_RESPONSE, SMP_FUNC_READ_GPIO, 0, 0, 1, 2, 3, 4]).is_ok());
        assert!(response_data(&[SMP_FRAME_TYPE_RESPONSE, SMP_FUNC_READ_GPIO, 0x02, 0]).is_err());
        assert!(response_data(&[0u8; 2]).is_err());
    }

    fn host() -> SmpHost {
        SmpHost {
            host_path: PathBuf::from("/sys/devices/pci0000:00/0000:00:05.0/host2"),
            host_id: 2,
            bsg_path: PathBuf::from("/dev/bsg/sas_host2"),
            ports: 4,
            tx_cache: [0; 4],
            dirty: false,
        }
    }

    #[test]
    fn phy_zero_lands_in_byte_three() {
        let mut host = host();
        host.stage(0, Ibpi::Locate).unwrap();
        assert_eq!(host.tx_cache, [0, 0, 0, 0x08]);
        assert!(host.dirty);
    }

    #[test]
    fn staging_leaves_other_phys_alone() {
        let mut host = host();
        host.tx_cache = [0x01, 0x02, 0x03, 0x04];
        host.stage(1, Ibpi::FailedDrive).unwrap();
        assert_eq!(host.tx_cache, [0x01, 0x02, 0x01, 0x04]);
    }

    #[test]
    fn unsupported_patterns_are_refused() {
        let mut host = host();
        assert_eq!(host.stage(0, Ibpi::Pfa), Err(Status::NotSupported));
        assert_eq!(host.stage(7, Ibpi::Locate), Err(Status::OutOfRange));
        assert!(!host.dirty);
    }
}
