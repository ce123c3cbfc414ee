//! Dell backplane transport (BMC OEM commands)
//!
//! PowerEdge backplanes hang off the BMC: a drive is addressed by the
//! bay:slot pair the BMC derives from its PCI bus/device/function, and the
//! LED state is a 16-bit mask of backplane flags. The OEM sub-command codes
//! shifted between server generations, so the generation is read once via
//! GetSystemInfo and cached.

use std::path::Path;

use crate::ibpi::Ibpi;
use crate::ipmi::IpmiIntf;
use crate::pci::PciAddress;
use crate::status::Status;

/// Application netfn (GetSystemInfo)
const IPMI_NETFN_APP: u8 = 0x06;
/// GetSystemInfo command
const CMD_GET_SYSTEM_INFO: u8 = 0x59;
/// Dell OEM netfn
const IPMI_NETFN_DELL_OEM: u8 = 0x30;
/// Dell OEM backplane command
const CMD_DELL_OEM: u8 = 0xD5;

/// GetSystemInfo parameter holding the platform id
const SYSINFO_PARAM_PLATFORM: u8 = 0xDD;
/// Platform id selector
const SYSINFO_SELECTOR: u8 = 0x02;

/// 12G monolithic platform code
const GEN_12G_MONOLITHIC: u8 = 0x10;
/// 12G modular platform code
const GEN_12G_MODULAR: u8 = 0x11;
/// 13G monolithic platform code
const GEN_13G_MONOLITHIC: u8 = 0x20;
/// 13G modular platform code
const GEN_13G_MODULAR: u8 = 0x21;
/// 14G monolithic platform code
const GEN_14G_MONOLITHIC: u8 = 0x30;
/// 14G modular platform code
const GEN_14G_MODULAR: u8 = 0x31;

/// Bay or slot value the BMC reports for an unmapped drive
const BAY_SLOT_INVALID: u8 = 0xFF;

/// PowerEdge server generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    Gen12,
    Gen13,
    Gen14,
}

impl Generation {
    /// OEM sub-command pair `(GET_DRIVE_MAP, SET_DRIVE_STATUS)`
    fn subcmds(self) -> (u8, u8) {
        match self {
            Generation::Gen12 => (0x07, 0x04),
            Generation::Gen13 => (0x17, 0x14),
            Generation::Gen14 => (0x37, 0x34),
        }
    }
}

/// Decode the platform id out of a GetSystemInfo response
///
/// The generation code is the tenth byte of the response payload.
pub fn parse_generation(resp: &[u8]) -> Option<Generation> {
    match resp.get(9)? {
        &GEN_12G_MONOLITHIC | &GEN_12G_MODULAR => Some(Generation::Gen12),
        &GEN_13G_MONOLITHIC | &GEN_13G_MODULAR => Some(Generation::Gen13),
        &GEN_14G_MONOLITHIC | &GEN_14G_MODULAR => Some(Generation::Gen14),
        _ => None,
    }
}

/// Build the GET_DRIVE_MAP request for a drive's BDF
pub fn build_drive_map_request(generation: Generation, bdf: PciAddress) -> [u8; 8] {
    let (get_map, _) = generation.subcmds();
    [
        0x01,
        get_map,
        0x00,
        0x00,
        bdf.bus,
        (bdf.device << 3) | (bdf.function & 0x7),
        0x00,
        0x00,
    ]
}

/// Extract the bay:slot pair from a GET_DRIVE_MAP response
///
/// `None` when the BMC does not know the drive (either byte 0xFF).
pub fn parse_drive_map(resp: &[u8]) -> Option<(u8, u8)> {
    let bay = *resp.get(7)?;
    let slot = *resp.get(8)?;
    if bay == BAY_SLOT_INVALID || slot == BAY_SLOT_INVALID {
        return None;
    }
    Some((bay, slot))
}

/// Build the SET_DRIVE_STATUS request
///
/// The state mask travels little-endian in the last two bytes.
pub fn build_set_status_request(generation: Generation, bay: u8, slot: u8, state: u16) -> [u8; 7] {
    let (_, set_status) = generation.subcmds();
    [
        0x00,
        set_status,
        0x0E,
        bay,
        slot,
        (state & 0xFF) as u8,
        (state >> 8) as u8,
    ]
}

/// Open Dell backplane interface
pub struct DellBackplane {
    intf: IpmiIntf,
    generation: Generation,
}

impl DellBackplane {
    /// Open the BMC and identify the server generation
    pub fn open(dev_root: &Path) -> Result<DellBackplane, Status> {
        let mut intf = IpmiIntf::open(dev_root).map_err(|_| Status::FileOpenError)?;
        let resp = intf
            .request(
                IPMI_NETFN_APP,
                CMD_GET_SYSTEM_INFO,
                &[0x00, SYSINFO_PARAM_PLATFORM, SYSINFO_SELECTOR, 0x00],
            )
            .map_err(|err| {
                log::debug!("dell: GetSystemInfo failed: {}", err);
                Status::NotSupported
            })?;
        let generation = parse_generation(&resp).ok_or_else(|| {
            log::debug!("dell: unrecognized platform id");
            Status::NotSupported
        })?;
        log::debug!("dell: {:?} backplane commands", generation);
        Ok(DellBackplane { intf, generation })
    }

    /// Deliver an indication for the drive at the given BDF
    ///
    /// An unmapped drive and a BMC timeout are both skips, not failures:
    /// the tick carries on and nothing is retried until the desired state
    /// changes again.
    pub fn write(&mut self, bdf: PciAddress, ibpi: Ibpi) -> Result<(), Status> {
        let map_req = build_drive_map_request(self.generation, bdf);
        let resp = match self.intf.request(IPMI_NETFN_DELL_OEM, CMD_DELL_OEM, &map_req) {
            Ok(resp) => resp,
            Err(err) if err.raw_os_error() == Some(libc::ETIMEDOUT) => {
                log::debug!("dell: {}: drive map timed out", bdf);
                return Ok(());
            }
            Err(err) => {
                log::warn!("dell: {}: drive map failed: {}", bdf, err);
                return Err(Status::DataError);
            }
        };

        let Some((bay, slot)) = parse_drive_map(&resp) else {
            log::error!("dell: {}: no bay/slot mapping, skipping", bdf);
            return Ok(());
        };

        let state = ibpi.bp_mask().bits();
        let set_req = build_set_status_request(self.generation, bay, slot, state);
        match self.intf.request(IPMI_NETFN_DELL_OEM, CMD_DELL_OEM, &set_req) {
            Ok(_) => Ok(()),
            Err(err) if err.raw_os_error() == Some(libc::ETIMEDOUT) => {
                log::debug!("dell: {}: set status timed out", bdf);
                Ok(())
            }
            Err(err) => {
                log::warn!("dell: {}: set status failed: {}", bdf, err);
                Err(Status::DataError)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_codes() {
        let mut resp = [0u8; 12];
        resp[9] = GEN_13G_MODULAR;
        assert_eq!(parse_generation(&resp), Some(Generation::Gen13));
        resp[9] = GEN_14G_MONOLITHIC;
        assert_eq!(parse_generation(&resp), Some(Generation::Gen14));
        resp[9] = 0x42;
        assert_eq!(parse_generation(&resp), None);
        assert_eq!(parse_generation(&[0u8; 4]), None);
    }

    #[test]
    fn generation_selects_subcommands() {
        assert_eq!(Generation::Gen12.subcmds(), (0x07, 0x04));
        assert_eq!(Generation::Gen13.subcmds(), (0x17, 0x14));
        assert_eq!(Generation::Gen14.subcmds(), (0x37, 0x34));
    }

    #[test]
    fn drive_map_request_packs_bdf() {
        let bdf: PciAddress = "0000:3b:1f.7".parse().unwrap();
        let req = build_drive_map_request(Generation::Gen14, bdf);
        assert_eq!(req[1], 0x37);
        assert_eq!(req[4], 0x3B);
        assert_eq!(req[5], (0x1F << 3) | 0x7);
    }

    #[test]
    fn unmapped_drive_is_detected() {
        let mut resp = [0u8; 9];
        resp[7] = 2;
        resp[8] = 5;
        assert_eq!(parse_drive_map(&resp), Some((2, 5)));

        resp[7] = BAY_SLOT_INVALID;
        assert_eq!(parse_drive_map(&resp), None);
        resp[7] = 2;
        resp[8] = BAY_SLOT_INVALID;
        assert_eq!(parse_drive_map(&resp), None);
    }

    #[test]
    fn set_status_is_little_endian() {
        let state = Ibpi::FailedArray.bp_mask().bits();
        let req = build_set_status_request(Generation::Gen12, 1, 3, state);
        assert_eq!(req[1], 0x04);
        assert_eq!(req[3], 1);
        assert_eq!(req[4], 3);
        assert_eq!(u16::from_le_bytes([req[5], req[6]]), 0x0401);
    }
}
