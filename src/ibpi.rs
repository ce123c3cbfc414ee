//! IBPI indication model
//!
//! The canonical vocabulary of drive indications (International Blinking
//! Pattern Interpretation) and the translation tables from an indication to
//! each protocol's encoding: SES-2 request codes, NPEM capability bits, VMD
//! attention nibbles, Dell backplane masks, SGPIO TX bytes and AHCI
//! enclosure-management messages.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;

/// Canonical drive indication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ibpi {
    /// State could not be determined
    #[default]
    Unknown,
    /// Write NORMAL once, then quiesce until the next non-normal transition
    OneshotNormal,
    /// Drive is online and healthy
    Normal,
    /// Drive is a member of a degraded array
    Degraded,
    /// Drive is rebuilding
    Rebuild,
    /// Drive is a member of a failed array
    FailedArray,
    /// Drive is a hot spare
    Hotspare,
    /// Predicted failure analysis tripped
    Pfa,
    /// Drive has failed
    FailedDrive,
    /// Locate request active
    Locate,
    /// Clear a previous locate request
    LocateOff,
}

impl fmt::Display for Ibpi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Ibpi::Unknown => "unknown",
            Ibpi::OneshotNormal => "oneshot_normal",
            Ibpi::Normal => "normal",
            Ibpi::Degraded => "degraded",
            Ibpi::Rebuild => "rebuild",
            Ibpi::FailedArray => "failed_array",
            Ibpi::Hotspare => "hotspare",
            Ibpi::Pfa => "pfa",
            Ibpi::FailedDrive => "failure",
            Ibpi::Locate => "locate",
            Ibpi::LocateOff => "locate_off",
        };
        f.write_str(name)
    }
}

impl FromStr for Ibpi {
    type Err = ();

    /// Parse a pattern name from the command line, including the historical
    /// aliases (`off`, `ica`, `ifa`, `disk_failed`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" | "off" => Ok(Ibpi::Normal),
            "locate" => Ok(Ibpi::Locate),
            "locate_off" => Ok(Ibpi::LocateOff),
            "degraded" | "ica" => Ok(Ibpi::Degraded),
            "rebuild" => Ok(Ibpi::Rebuild),
            "failed_array" | "ifa" => Ok(Ibpi::FailedArray),
            "hotspare" => Ok(Ibpi::Hotspare),
            "pfa" => Ok(Ibpi::Pfa),
            "failure" | "failed_drive" | "disk_failed" => Ok(Ibpi::FailedDrive),
            _ => Err(()),
        }
    }
}

// ============================================================================
// SES-2 request codes
// ============================================================================

/// SES-2 element control request
///
/// The raw request vocabulary of the device-slot and array-device-slot
/// control elements (SES-2, clause 7.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SesRequest {
    Abort,
    Rebuild,
    Ifa,
    Ica,
    ConsCheck,
    Hotspare,
    RsvdDev,
    Ok,
    Ident,
    Rm,
    Ins,
    Missing,
    Dnr,
    Active,
    EnBb,
    EnBa,
    DevOff,
    Fault,
    Prdfail,
}

impl Ibpi {
    /// SES request code for this indication
    ///
    /// `LocateOff` maps to `Ok` here; the SES transport special-cases it to
    /// clear the IDENT bit without imposing a fresh pattern.
    pub fn ses_request(self) -> SesRequest {
        match self {
            Ibpi::Unknown | Ibpi::OneshotNormal | Ibpi::Normal | Ibpi::LocateOff => SesRequest::Ok,
            Ibpi::Degraded => SesRequest::Ica,
            Ibpi::Rebuild => SesRequest::Rebuild,
            Ibpi::FailedArray => SesRequest::Ifa,
            Ibpi::Hotspare => SesRequest::Hotspare,
            Ibpi::Pfa => SesRequest::Prdfail,
            Ibpi::FailedDrive => SesRequest::Fault,
            Ibpi::Locate => SesRequest::Ident,
        }
    }

    /// Indication a SES request code reads back as
    pub fn from_ses_request(req: SesRequest) -> Ibpi {
        match req {
            SesRequest::Ok => Ibpi::Normal,
            SesRequest::Ident => Ibpi::Locate,
            SesRequest::Rebuild => Ibpi::Rebuild,
            SesRequest::Fault => Ibpi::FailedDrive,
            SesRequest::Hotspare => Ibpi::Hotspare,
            SesRequest::Prdfail => Ibpi::Pfa,
            SesRequest::Ica => Ibpi::Degraded,
            SesRequest::Ifa => Ibpi::FailedArray,
            _ => Ibpi::Unknown,
        }
    }
}

// ============================================================================
// NPEM capability bits (PCIe extended capability 0x29)
// ============================================================================

/// NPEM capable / enable (bit 0 of capability and control registers)
pub const NPEM_CAP: u32 = 0x001;
/// NPEM OK indication
pub const NPEM_OK: u32 = 0x004;
/// NPEM Locate indication
pub const NPEM_LOCATE: u32 = 0x008;
/// NPEM Fail indication
pub const NPEM_FAIL: u32 = 0x010;
/// NPEM Rebuild indication
pub const NPEM_REBUILD: u32 = 0x020;
/// NPEM Predicted Failure Analysis indication
pub const NPEM_PFA: u32 = 0x040;
/// NPEM Hot Spare indication
pub const NPEM_HOTSPARE: u32 = 0x080;
/// NPEM In a Critical Array indication
pub const NPEM_ICA: u32 = 0x100;
/// NPEM In a Failed Array indication
pub const NPEM_IFA: u32 = 0x200;

/// IBPI to NPEM indication bit, in get-priority order
///
/// `npem_ibpi` scans this table front to back, so the first entry whose bit
/// is set in the control register wins.
pub const NPEM_TABLE: [(Ibpi, u32); 8] = [
    (Ibpi::Normal, NPEM_OK),
    (Ibpi::Locate, NPEM_LOCATE),
    (Ibpi::FailedDrive, NPEM_FAIL),
    (Ibpi::Rebuild, NPEM_REBUILD),
    (Ibpi::Pfa, NPEM_PFA),
    (Ibpi::Hotspare, NPEM_HOTSPARE),
    (Ibpi::Degraded, NPEM_ICA),
    (Ibpi::FailedArray, NPEM_IFA),
];

impl Ibpi {
    /// NPEM indication bit for this pattern, `None` when NPEM has no encoding
    pub fn npem_mask(self) -> Option<u32> {
        match self {
            Ibpi::OneshotNormal | Ibpi::LocateOff => Some(NPEM_OK),
            Ibpi::Unknown => None,
            other => NPEM_TABLE
                .iter()
                .find(|(ibpi, _)| *ibpi == other)
                .map(|&(_, mask)| mask),
        }
    }

    /// Indication encoded in an NPEM control register value
    pub fn from_npem(control: u32) -> Ibpi {
        NPEM_TABLE
            .iter()
            .find(|&&(_, mask)| control & mask != 0)
            .map(|&(ibpi, _)| ibpi)
            .unwrap_or(Ibpi::Unknown)
    }
}

// ============================================================================
// VMD attention nibbles
// ============================================================================

/// PCIe hotplug attention state: all indications off
pub const VMD_OFF: u8 = 0xF;
/// PCIe hotplug attention state: locate
pub const VMD_LOCATE: u8 = 0x7;
/// PCIe hotplug attention state: rebuild
pub const VMD_REBUILD: u8 = 0x5;
/// PCIe hotplug attention state: failure
pub const VMD_FAILURE: u8 = 0xD;

impl Ibpi {
    /// VMD attention nibble, `None` for patterns the slot cannot express
    pub fn vmd_nibble(self) -> Option<u8> {
        match self {
            Ibpi::Unknown | Ibpi::OneshotNormal | Ibpi::Normal | Ibpi::LocateOff => Some(VMD_OFF),
            Ibpi::Locate => Some(VMD_LOCATE),
            Ibpi::Rebuild => Some(VMD_REBUILD),
            Ibpi::FailedDrive => Some(VMD_FAILURE),
            _ => None,
        }
    }

    /// Indication encoded in a VMD attention nibble
    pub fn from_vmd_nibble(nibble: u8) -> Ibpi {
        match nibble {
            VMD_OFF => Ibpi::Normal,
            VMD_LOCATE => Ibpi::Locate,
            VMD_REBUILD => Ibpi::Rebuild,
            VMD_FAILURE => Ibpi::FailedDrive,
            _ => Ibpi::Unknown,
        }
    }
}

// ============================================================================
// Dell backplane masks
// ============================================================================

bitflags! {
    /// Dell backplane drive-status mask
    ///
    /// Composable bit flags carried in the 16-bit little-endian state field
    /// of the SET_DRIVE_STATUS OEM command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BpFlags: u16 {
        const ONLINE        = 0x0001;
        const HOTSPARE      = 0x0002;
        const IDENTIFY      = 0x0004;
        const REBUILDING    = 0x0008;
        const FAULT         = 0x0010;
        const PREDICT       = 0x0020;
        const CRITICALARRAY = 0x0200;
        const FAILEDARRAY   = 0x0400;
    }
}

impl Ibpi {
    /// Dell backplane mask for this indication
    pub fn bp_mask(self) -> BpFlags {
        match self {
            Ibpi::Unknown | Ibpi::OneshotNormal | Ibpi::Normal | Ibpi::LocateOff => BpFlags::ONLINE,
            Ibpi::Locate => BpFlags::IDENTIFY,
            Ibpi::FailedDrive => BpFlags::FAULT,
            Ibpi::Rebuild => BpFlags::ONLINE.union(BpFlags::REBUILDING),
            Ibpi::Hotspare => BpFlags::HOTSPARE,
            Ibpi::Pfa => BpFlags::ONLINE.union(BpFlags::PREDICT),
            Ibpi::Degraded => BpFlags::ONLINE.union(BpFlags::CRITICALARRAY),
            Ibpi::FailedArray => BpFlags::ONLINE.union(BpFlags::FAILEDARRAY),
        }
    }
}

// ============================================================================
// SGPIO TX bytes
// ============================================================================

/// One SGPIO TX register byte
///
/// Bit layout, LSB first: `activity:3 | locate:2 | error:3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SgpioByte {
    pub error: u8,
    pub locate: u8,
    pub activity: u8,
}

impl SgpioByte {
    const fn new(error: u8, locate: u8, activity: u8) -> Self {
        SgpioByte {
            error,
            locate,
            activity,
        }
    }

    /// Pack the fields into the wire byte
    pub fn to_byte(self) -> u8 {
        (self.activity & 0x7) | ((self.locate & 0x3) << 3) | ((self.error & 0x7) << 5)
    }
}

impl Ibpi {
    /// SGPIO TX byte for this indication, `None` when the pattern is not in
    /// the SGPIO support mask
    ///
    /// Mapping unsupported patterns back to `Normal` is the caller's job;
    /// the SMP transport refuses them outright.
    pub fn sgpio_byte(self) -> Option<SgpioByte> {
        match self {
            Ibpi::OneshotNormal | Ibpi::Normal | Ibpi::LocateOff => Some(SgpioByte::new(0, 0, 0)),
            Ibpi::Locate => Some(SgpioByte::new(0, 1, 0)),
            Ibpi::Rebuild => Some(SgpioByte::new(0, 1, 1)),
            Ibpi::FailedDrive => Some(SgpioByte::new(0, 0, 1)),
            _ => None,
        }
    }
}

// ============================================================================
// AHCI enclosure-management messages
// ============================================================================

impl Ibpi {
    /// AHCI EM LED message word for this indication
    ///
    /// Written as decimal text to the SCSI host's `em_message` attribute.
    /// Patterns outside the table read back `None` and are downgraded to
    /// `Normal` by the transport.
    pub fn ahci_message(self) -> Option<u32> {
        match self {
            Ibpi::Unknown => None,
            Ibpi::OneshotNormal | Ibpi::Normal | Ibpi::LocateOff => Some(0x0000_0000),
            Ibpi::Degraded => Some(0x0020_0000),
            Ibpi::Rebuild => Some(0x0048_0000),
            Ibpi::FailedArray => Some(0x0028_0000),
            Ibpi::Hotspare => Some(0x0180_0000),
            Ibpi::Pfa => Some(0x0140_0000),
            Ibpi::FailedDrive => Some(0x0040_0000),
            Ibpi::Locate => Some(0x0008_0000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SES_ROUND_TRIP: [Ibpi; 8] = [
        Ibpi::Normal,
        Ibpi::Locate,
        Ibpi::Rebuild,
        Ibpi::FailedDrive,
        Ibpi::Hotspare,
        Ibpi::Pfa,
        Ibpi::Degraded,
        Ibpi::FailedArray,
    ];

    #[test]
    fn ses_request_round_trip() {
        for ibpi in SES_ROUND_TRIP {
            assert_eq!(Ibpi::from_ses_request(ibpi.ses_request()), ibpi);
        }
    }

    #[test]
    fn npem_round_trip_covers_whole_table() {
        for (ibpi, mask) in NPEM_TABLE {
            assert_eq!(ibpi.npem_mask(), Some(mask));
            assert_eq!(Ibpi::from_npem(mask), ibpi);
        }
        assert_eq!(Ibpi::from_npem(0), Ibpi::Unknown);
    }

    #[test]
    fn vmd_round_trip() {
        for ibpi in [Ibpi::Normal, Ibpi::Locate, Ibpi::Rebuild, Ibpi::FailedDrive] {
            assert_eq!(Ibpi::from_vmd_nibble(ibpi.vmd_nibble().unwrap()), ibpi);
        }
        // LOCATE_OFF collapses onto NORMAL
        assert_eq!(
            Ibpi::from_vmd_nibble(Ibpi::LocateOff.vmd_nibble().unwrap()),
            Ibpi::Normal
        );
        assert_eq!(Ibpi::Hotspare.vmd_nibble(), None);
    }

    #[test]
    fn sgpio_byte_layout() {
        // activity in bits 0-2, locate in bits 3-4, error in bits 5-7
        assert_eq!(Ibpi::Locate.sgpio_byte().unwrap().to_byte(), 0x08);
        assert_eq!(Ibpi::Rebuild.sgpio_byte().unwrap().to_byte(), 0x09);
        assert_eq!(Ibpi::FailedDrive.sgpio_byte().unwrap().to_byte(), 0x01);
        assert_eq!(Ibpi::Normal.sgpio_byte().unwrap().to_byte(), 0x00);
        assert_eq!(Ibpi::Pfa.sgpio_byte(), None);
    }

    #[test]
    fn dell_masks_compose() {
        assert_eq!(
            Ibpi::Degraded.bp_mask(),
            BpFlags::ONLINE | BpFlags::CRITICALARRAY
        );
        assert_eq!(Ibpi::Hotspare.bp_mask(), BpFlags::HOTSPARE);
        assert_eq!(Ibpi::Locate.bp_mask().bits(), 0x0004);
    }

    #[test]
    fn pattern_names_parse() {
        assert_eq!("locate".parse(), Ok(Ibpi::Locate));
        assert_eq!("ica".parse(), Ok(Ibpi::Degraded));
        assert_eq!("disk_failed".parse(), Ok(Ibpi::FailedDrive));
        assert_eq!("off".parse(), Ok(Ibpi::Normal));
        assert!("blink".parse::<Ibpi>().is_err());
    }
}
