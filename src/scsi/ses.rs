//! SES-2 enclosure transport
//!
//! Drives status LEDs through SCSI Enclosure Services diagnostic pages:
//! page 0x01 (configuration) describes the element layout, page 0x02
//! (enclosure control/status) carries the per-slot request bits, page 0x0A
//! (additional element status) links slots to SAS addresses. Writes are
//! batched: request bits accumulate in the cached control page and a single
//! SEND DIAGNOSTIC per enclosure transmits them; the pages are then released
//! so the next write starts from fresh device state.
//!
//! Reference: SES-2 (T10/1559-D), clauses 6.1.2, 6.1.3 and 6.1.13.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::ibpi::{Ibpi, SesRequest};
use crate::scsi;
use crate::status::Status;

/// Configuration diagnostic page
pub const PAGE_CONFIG: u8 = 0x01;

/// Enclosure control/status diagnostic page
pub const PAGE_CONTROL: u8 = 0x02;

/// Additional element status diagnostic page
pub const PAGE_ADD_ELEM_STATUS: u8 = 0x0A;

/// Device slot element type
pub const ELEM_DEVICE_SLOT: u8 = 0x01;

/// Array device slot element type
pub const ELEM_ARRAY_DEVICE_SLOT: u8 = 0x17;

/// Diagnostic page transfer size
const PAGE_BUF_SIZE: usize = 4096;

// ============================================================================
// Control element bits (SES-2 device slot / array device slot)
// ============================================================================

/// common control byte 0: SELECT
const CTRL_SELECT: u8 = 0x80;
/// common control byte 0: PRDFAIL
const CTRL_PRDFAIL: u8 = 0x40;

/// array request byte 1: RQST OK
const CTRL1_OK: u8 = 0x80;
/// array request byte 1: RQST RSVD DEVICE
const CTRL1_RSVD_DEV: u8 = 0x40;
/// array request byte 1: RQST HOT SPARE
const CTRL1_HOTSPARE: u8 = 0x20;
/// array request byte 1: RQST CONS CHECK
const CTRL1_CONS_CHECK: u8 = 0x10;
/// array request byte 1: RQST IN CRIT ARRAY
const CTRL1_ICA: u8 = 0x08;
/// array request byte 1: RQST IN FAILED ARRAY
const CTRL1_IFA: u8 = 0x04;
/// array request byte 1: RQST REBUILD/REMAP
const CTRL1_REBUILD: u8 = 0x02;
/// array request byte 1: RQST R/R ABORT
const CTRL1_ABORT: u8 = 0x01;

/// request byte 2: RQST ACTIVE
const CTRL2_ACTIVE: u8 = 0x80;
/// request byte 2: DO NOT REMOVE
const CTRL2_DNR: u8 = 0x40;
/// request byte 2: RQST MISSING
const CTRL2_MISSING: u8 = 0x10;
/// request byte 2: RQST INSERT
const CTRL2_INSERT: u8 = 0x08;
/// request byte 2: RQST REMOVE
const CTRL2_RM: u8 = 0x04;
/// request byte 2: RQST IDENT
const CTRL2_IDENT: u8 = 0x02;

/// request byte 3: RQST FAULT
const CTRL3_FAULT: u8 = 0x20;
/// request byte 3: DEVICE OFF
const CTRL3_DEV_OFF: u8 = 0x10;
/// request byte 3: ENABLE BYP A
const CTRL3_EN_BA: u8 = 0x08;
/// request byte 3: ENABLE BYP B
const CTRL3_EN_BB: u8 = 0x04;

/// Bits of request byte 2 that exist in the control encoding; everything
/// else is status-only and must not be echoed back
const CTRL2_VALID: u8 =
    CTRL2_ACTIVE | CTRL2_DNR | CTRL2_MISSING | CTRL2_INSERT | CTRL2_RM | CTRL2_IDENT;

/// Bits of request byte 3 that exist in the control encoding
const CTRL3_VALID: u8 = CTRL3_FAULT | CTRL3_DEV_OFF | CTRL3_EN_BA | CTRL3_EN_BB;

// ============================================================================
// Configuration page model
// ============================================================================

/// One type descriptor header from the configuration page
#[derive(Debug, Clone, Copy)]
pub struct TypeDescHeader {
    /// Element type code
    pub element_type: u8,
    /// Number of possible individual elements of this type
    pub num_of_elements: u8,
    /// Sub-enclosure the elements belong to
    pub subenclosure_id: u8,
    /// Length of the descriptor text for this type
    pub text_len: u8,
}

impl TypeDescHeader {
    fn is_slot(&self) -> bool {
        self.element_type == ELEM_DEVICE_SLOT || self.element_type == ELEM_ARRAY_DEVICE_SLOT
    }
}

/// Parse the type descriptor headers out of a configuration page
///
/// Layout: byte 1 holds the sub-enclosure count minus one; the enclosure
/// descriptors start at offset 8, each `buf[3] + 4` bytes long and naming
/// its own type-descriptor-header count in byte 2; the 4-byte headers
/// follow the last descriptor.
pub fn parse_type_desc_headers(page1: &[u8]) -> Result<Vec<TypeDescHeader>, Status> {
    if page1.len() < 8 || page1[0] != PAGE_CONFIG {
        return Err(Status::DataError);
    }

    let num_enclosures = page1[1] as usize + 1;
    let mut offset = 8;
    let mut num_headers = 0usize;
    for _ in 0..num_enclosures {
        if offset + 4 > page1.len() {
            return Err(Status::DataError);
        }
        num_headers += page1[offset + 2] as usize;
        offset += page1[offset + 3] as usize + 4;
    }

    if offset + num_headers * 4 > page1.len() {
        return Err(Status::DataError);
    }

    let mut headers = Vec::with_capacity(num_headers);
    for i in 0..num_headers {
        let hdr = &page1[offset + i * 4..offset + i * 4 + 4];
        headers.push(TypeDescHeader {
            element_type: hdr[0],
            num_of_elements: hdr[1],
            subenclosure_id: hdr[2],
            text_len: hdr[3],
        });
    }
    Ok(headers)
}

/// Total number of slot elements
///
/// Slot headers always come first in the header list; the count stops at
/// the first non-slot header.
pub fn slot_count(headers: &[TypeDescHeader]) -> usize {
    headers
        .iter()
        .take_while(|h| h.is_slot())
        .map(|h| h.num_of_elements as usize)
        .sum()
}

// ============================================================================
// Additional element status page model
// ============================================================================

/// One slot from the additional element status page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotEntry {
    /// Element index within the slot sections
    pub index: i32,
    /// SAS address of the attached device, 0 when none
    pub sas_address: u64,
}

/// Build the slot table from an additional element status page
///
/// Entries are variably sized (`ai[1] + 2` bytes). Only SAS-protocol
/// entries (`ai[0] & 0xF == 6`) contribute: the element index comes from
/// `ai[3]` when the EIP bit is set, the positional index otherwise, and the
/// SAS address is the 8-byte big-endian word at offset 12 of the PHY-0
/// descriptor (which starts 4 bytes later when EIP is set).
pub fn build_slot_table(page10: &[u8], max_slots: usize) -> Vec<SlotEntry> {
    let mut slots = Vec::new();
    if page10.len() < 8 || page10[0] != PAGE_ADD_ELEM_STATUS {
        return slots;
    }

    let mut offset = 8;
    let mut position = 0i32;
    while offset + 2 <= page10.len() && slots.len() < max_slots {
        let ai = &page10[offset..];
        let entry_len = ai[1] as usize + 2;
        if offset + entry_len > page10.len() {
            break;
        }

        let protocol = ai[0] & 0x0F;
        let eip = ai[0] & 0x10 != 0;
        if protocol == 6 {
            let phy0 = if eip { 8 } else { 4 };
            let addr_off = phy0 + 12;
            if entry_len >= addr_off + 8 {
                let mut addr_bytes = [0u8; 8];
                addr_bytes.copy_from_slice(&ai[addr_off..addr_off + 8]);
                let index = if eip { ai[3] as i32 } else { position };
                slots.push(SlotEntry {
                    index,
                    sas_address: u64::from_be_bytes(addr_bytes),
                });
            }
        }

        position += 1;
        offset += entry_len;
    }
    slots
}

// ============================================================================
// Control page editing
// ============================================================================

/// Byte offset of the control element for slot `index`
///
/// Walks the header list preferring the highest-numbered slot element type
/// that still covers `index`; within that section the individual elements
/// start one element after the overall element.
pub fn control_element_offset(
    headers: &[TypeDescHeader],
    index: usize,
) -> Option<(usize, u8)> {
    let mut chosen: Option<(usize, u8)> = None;
    let mut section_start = 8usize;
    for hdr in headers {
        if hdr.is_slot() && (hdr.num_of_elements as usize) > index {
            let offset = section_start + 4 * (1 + index);
            match chosen {
                Some((_, ty)) if ty >= hdr.element_type => {}
                _ => chosen = Some((offset, hdr.element_type)),
            }
        }
        section_start += 4 * (1 + hdr.num_of_elements as usize);
    }
    chosen
}

/// Request bits for one indication, applied to a 4-byte control element
///
/// The element holds the bytes read back from the status page. The common
/// control byte keeps only PRDFAIL and gains SELECT; `LocateOff` clears
/// IDENT and sanitizes status-only bits without imposing a fresh pattern;
/// everything else writes its request bit over a cleared request area. The
/// array request byte is only meaningful on array device slots and is
/// zeroed otherwise.
pub fn apply_ibpi(elem: &mut [u8], element_type: u8, ibpi: Ibpi) {
    elem[0] = CTRL_SELECT | (elem[0] & CTRL_PRDFAIL);

    if ibpi == Ibpi::LocateOff {
        elem[1] &= if element_type == ELEM_ARRAY_DEVICE_SLOT {
            0xFF
        } else {
            0x00
        };
        elem[2] &= CTRL2_VALID & !CTRL2_IDENT;
        elem[3] &= CTRL3_VALID;
        return;
    }

    elem[1] = 0;
    elem[2] = 0;
    elem[3] = 0;

    match ibpi.ses_request() {
        SesRequest::Ok => {}
        SesRequest::Ident => elem[2] |= CTRL2_IDENT,
        SesRequest::Fault => elem[3] |= CTRL3_FAULT,
        SesRequest::Rebuild => elem[1] |= CTRL1_REBUILD,
        SesRequest::Ica => elem[1] |= CTRL1_ICA,
        SesRequest::Ifa => elem[1] |= CTRL1_IFA,
        SesRequest::Hotspare => elem[1] |= CTRL1_HOTSPARE,
        SesRequest::Prdfail => elem[0] |= CTRL_PRDFAIL,
        SesRequest::Abort => elem[1] |= CTRL1_ABORT,
        SesRequest::ConsCheck => elem[1] |= CTRL1_CONS_CHECK,
        SesRequest::RsvdDev => elem[1] |= CTRL1_RSVD_DEV,
        SesRequest::Rm => elem[2] |= CTRL2_RM,
        SesRequest::Ins => elem[2] |= CTRL2_INSERT,
        SesRequest::Missing => elem[2] |= CTRL2_MISSING,
        SesRequest::Dnr => elem[2] |= CTRL2_DNR,
        SesRequest::Active => elem[2] |= CTRL2_ACTIVE,
        SesRequest::EnBa => elem[3] |= CTRL3_EN_BA,
        SesRequest::EnBb => elem[3] |= CTRL3_EN_BB,
        SesRequest::DevOff => elem[3] |= CTRL3_DEV_OFF,
    }

    if element_type != ELEM_ARRAY_DEVICE_SLOT {
        elem[1] = 0;
    }
}

/// Indication encoded in a 4-byte slot element
pub fn element_ibpi(elem: &[u8]) -> Ibpi {
    if elem[2] & CTRL2_IDENT != 0 {
        Ibpi::Locate
    } else if elem[3] & CTRL3_FAULT != 0 {
        Ibpi::FailedDrive
    } else if elem[1] & CTRL1_REBUILD != 0 {
        Ibpi::Rebuild
    } else if elem[1] & CTRL1_ICA != 0 {
        Ibpi::Degraded
    } else if elem[1] & CTRL1_IFA != 0 {
        Ibpi::FailedArray
    } else if elem[1] & CTRL1_HOTSPARE != 0 {
        Ibpi::Hotspare
    } else if elem[1] & CTRL1_OK != 0 {
        Ibpi::Normal
    } else if elem[0] & CTRL_PRDFAIL != 0 {
        Ibpi::Pfa
    } else {
        Ibpi::Normal
    }
}

// ============================================================================
// Enclosure
// ============================================================================

/// Cached diagnostic pages for one flush cycle
struct SesPages {
    page2: Vec<u8>,
    headers: Vec<TypeDescHeader>,
}

/// One SES enclosure
pub struct Enclosure {
    /// Enclosure device directory in sysfs
    pub sysfs_path: PathBuf,
    /// bsg character device carrying the diagnostic traffic
    pub bsg_path: PathBuf,
    /// Slot table built from the additional element status page
    pub slots: Vec<SlotEntry>,
    /// Pages held between a write and the flush
    pages: Option<SesPages>,
    /// Writes staged in the cached control page
    changes: u32,
}

impl Enclosure {
    pub fn new(sysfs_path: PathBuf, bsg_path: PathBuf) -> Enclosure {
        Enclosure {
            sysfs_path,
            bsg_path,
            slots: Vec::new(),
            pages: None,
            changes: 0,
        }
    }

    fn open(&self) -> io::Result<File> {
        File::options().read(true).write(true).open(&self.bsg_path)
    }

    /// Receive one diagnostic page, truncated to its advertised length
    fn receive_page(&self, file: &File, page_code: u8) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; PAGE_BUF_SIZE];
        scsi::receive_diagnostic(file, page_code, &mut buf)?;
        let len = (u16::from_be_bytes([buf[2], buf[3]]) as usize + 4).min(buf.len());
        buf.truncate(len);
        Ok(buf)
    }

    /// Discover the slot table (pages 1 and 10)
    ///
    /// Called once per scan; the result outlives the page cache.
    pub fn discover_slots(&mut self) -> Result<(), Status> {
        let file = self.open().map_err(|_| Status::FileOpenError)?;
        let page1 = self
            .receive_page(&file, PAGE_CONFIG)
            .map_err(|_| Status::FileReadError)?;
        let headers = parse_type_desc_headers(&page1)?;
        let max_slots = slot_count(&headers);
        let page10 = self
            .receive_page(&file, PAGE_ADD_ELEM_STATUS)
            .map_err(|_| Status::FileReadError)?;
        self.slots = build_slot_table(&page10, max_slots);
        log::debug!(
            "ses: {}: {} slots, {} descriptors",
            self.bsg_path.display(),
            max_slots,
            self.slots.len()
        );
        Ok(())
    }

    /// Element index of the slot holding the given SAS address
    pub fn slot_for_sas(&self, sas_address: u64) -> Option<i32> {
        if sas_address == 0 {
            return None;
        }
        self.slots
            .iter()
            .find(|s| s.sas_address == sas_address)
            .map(|s| s.index)
    }

    /// Load pages 1 and 2 for a write cycle
    fn load_pages(&mut self) -> Result<&mut SesPages, Status> {
        if self.pages.is_none() {
            let file = self.open().map_err(|_| Status::FileOpenError)?;
            let page1 = self
                .receive_page(&file, PAGE_CONFIG)
                .map_err(|_| Status::FileReadError)?;
            let headers = parse_type_desc_headers(&page1)?;
            let page2 = self
                .receive_page(&file, PAGE_CONTROL)
                .map_err(|_| Status::FileReadError)?;
            self.pages = Some(SesPages { page2, headers });
        }
        Ok(self.pages.as_mut().unwrap())
    }

    /// Stage an indication for the slot at `encl_index`
    ///
    /// The control page is edited in place; nothing reaches the wire until
    /// `flush`.
    pub fn write_ibpi(&mut self, encl_index: i32, ibpi: Ibpi) -> Result<(), Status> {
        if encl_index < 0 {
            return Err(Status::InvalidState);
        }
        let pages = self.load_pages()?;
        let (offset, element_type) =
            control_element_offset(&pages.headers, encl_index as usize)
                .ok_or(Status::OutOfRange)?;
        if offset + 4 > pages.page2.len() {
            return Err(Status::DataError);
        }
        apply_ibpi(&mut pages.page2[offset..offset + 4], element_type, ibpi);
        self.changes += 1;
        Ok(())
    }

    /// Indication currently shown for the slot at `encl_index`
    pub fn get_ibpi(&mut self, encl_index: i32) -> Result<Ibpi, Status> {
        if encl_index < 0 {
            return Err(Status::InvalidState);
        }
        let pages = self.load_pages()?;
        let (offset, _) = control_element_offset(&pages.headers, encl_index as usize)
            .ok_or(Status::OutOfRange)?;
        if offset + 4 > pages.page2.len() {
            return Err(Status::DataError);
        }
        Ok(element_ibpi(&pages.page2[offset..offset + 4]))
    }

    /// Whether staged writes are waiting for a flush
    pub fn pending_changes(&self) -> bool {
        self.changes > 0
    }

    /// Transmit the staged control page and release the cache
    ///
    /// A no-op when nothing was staged. The pages are released either way a
    /// transmission was attempted, so the next write re-reads device state.
    pub fn flush(&mut self) -> Result<(), Status> {
        if self.changes == 0 {
            return Ok(());
        }
        let pages = self.pages.take().ok_or(Status::InvalidState)?;
        self.changes = 0;

        let file = self.open().map_err(|_| Status::FileOpenError)?;
        scsi::send_diagnostic(&file, &pages.page2).map_err(|err| {
            log::warn!("ses: {}: flush failed: {}", self.bsg_path.display(), err);
            Status::FileWriteError
        })
    }
}

/// Derive the bsg node path for an enclosure device directory
///
/// The SCSI id doubles as the bsg device name, so `/dev/bsg/<basename>`.
pub fn bsg_path_for(encl_device: &Path, dev_root: &Path) -> Option<PathBuf> {
    let name = encl_device.file_name()?;
    Some(dev_root.join("bsg").join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Configuration page: one enclosure, array slots + device slots + fans
    fn sample_page1() -> Vec<u8> {
        let mut page = vec![0u8; 48];
        page[0] = PAGE_CONFIG;
        page[1] = 0; // one enclosure
        // enclosure descriptor at 8: 3 type descriptor headers, length 36
        page[8 + 2] = 3;
        page[8 + 3] = 36 - 4;
        // headers at 8 + 36 = 44... keep page large enough
        page.resize(44 + 12, 0);
        let headers = [
            [ELEM_ARRAY_DEVICE_SLOT, 4, 0, 0],
            [ELEM_DEVICE_SLOT, 2, 0, 0],
            [0x03, 2, 0, 0], // cooling, terminates the slot scan
        ];
        for (i, hdr) in headers.iter().enumerate() {
            page[44 + i * 4..44 + i * 4 + 4].copy_from_slice(hdr);
        }
        // page length covers everything past byte 3
        let len = (page.len() - 4) as u16;
        page[2..4].copy_from_slice(&len.to_be_bytes());
        page
    }

    /// Additional element status page with two SAS entries (EIP set)
    fn sample_page10(addr0: u64, addr1: u64) -> Vec<u8> {
        let mut page = vec![0u8; 8];
        page[0] = PAGE_ADD_ELEM_STATUS;
        for (index, addr) in [(0u8, addr0), (1u8, addr1)] {
            let mut entry = vec![0u8; 2 + 6 + 28];
            entry[0] = 0x16; // EIP | SAS protocol
            entry[1] = (entry.len() - 2) as u8;
            entry[3] = index;
            // PHY-0 descriptor at 8, SAS address at its offset 12
            entry[8 + 12..8 + 20].copy_from_slice(&addr.to_be_bytes());
            page.extend_from_slice(&entry);
        }
        let len = (page.len() - 4) as u16;
        page[2..4].copy_from_slice(&len.to_be_bytes());
        page
    }

    #[test]
    fn config_page_headers() {
        let headers = parse_type_desc_headers(&sample_page1()).unwrap();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].element_type, ELEM_ARRAY_DEVICE_SLOT);
        assert_eq!(headers[0].num_of_elements, 4);
        assert_eq!(slot_count(&headers), 6);
    }

    #[test]
    fn malformed_config_page_is_rejected() {
        assert!(parse_type_desc_headers(&[0u8; 4]).is_err());
        let mut page = sample_page1();
        page[8 + 2] = 200; // more headers than the page can hold
        assert!(parse_type_desc_headers(&page).is_err());
    }

    #[test]
    fn slot_table_from_page10() {
        let page10 = sample_page10(0x5000_C500_0000_0001, 0x5000_C500_0000_0002);
        let slots = build_slot_table(&page10, 6);
        assert_eq!(
            slots,
            [
                SlotEntry {
                    index: 0,
                    sas_address: 0x5000_C500_0000_0001
                },
                SlotEntry {
                    index: 1,
                    sas_address: 0x5000_C500_0000_0002
                },
            ]
        );
    }

    #[test]
    fn slot_table_positional_index_without_eip() {
        let mut page = vec![0u8; 8];
        page[0] = PAGE_ADD_ELEM_STATUS;
        let mut entry = vec![0u8; 2 + 2 + 28];
        entry[0] = 0x06; // SAS, no EIP
        entry[1] = (entry.len() - 2) as u8;
        // PHY-0 descriptor at 4 when EIP is clear
        entry[4 + 12..4 + 20].copy_from_slice(&0xABCDu64.to_be_bytes());
        page.extend_from_slice(&entry);
        let len = (page.len() - 4) as u16;
        page[2..4].copy_from_slice(&len.to_be_bytes());

        let slots = build_slot_table(&page, 6);
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].index, 0);
        assert_eq!(slots[0].sas_address, 0xABCD);
    }

    #[test]
    fn invariant_slot_count_covers_indices() {
        let headers = parse_type_desc_headers(&sample_page1()).unwrap();
        let page10 = sample_page10(1, 2);
        let slots = build_slot_table(&page10, slot_count(&headers));
        for slot in &slots {
            assert!((slot.index as usize) < slot_count(&headers));
        }
    }

    #[test]
    fn control_offset_prefers_array_slots() {
        let headers = parse_type_desc_headers(&sample_page1()).unwrap();
        // index 0: array section starts at 8, individuals at 12
        assert_eq!(
            control_element_offset(&headers, 0),
            Some((12, ELEM_ARRAY_DEVICE_SLOT))
        );
        // index 3: still inside the 4-element array section
        assert_eq!(
            control_element_offset(&headers, 3),
            Some((24, ELEM_ARRAY_DEVICE_SLOT))
        );
        // index 5: beyond all slot sections
        assert_eq!(control_element_offset(&headers, 5), None);
    }

    #[test]
    fn requests_round_trip_through_control_bits() {
        for ibpi in [
            Ibpi::Normal,
            Ibpi::Locate,
            Ibpi::Rebuild,
            Ibpi::FailedDrive,
            Ibpi::Hotspare,
            Ibpi::Pfa,
            Ibpi::Degraded,
            Ibpi::FailedArray,
        ] {
            let mut elem = [0u8; 4];
            apply_ibpi(&mut elem, ELEM_ARRAY_DEVICE_SLOT, ibpi);
            assert_eq!(element_ibpi(&elem), ibpi, "pattern {ibpi}");
            assert_eq!(elem[0] & CTRL_SELECT, CTRL_SELECT);
        }
    }

    #[test]
    fn locate_off_clears_ident_only() {
        // Prior state: LOCATE plus a status-only bit the device reported
        let mut elem = [0u8; 4];
        apply_ibpi(&mut elem, ELEM_ARRAY_DEVICE_SLOT, Ibpi::Locate);
        elem[2] |= 0x01; // status-only REPORT bit
        elem[3] |= 0x02; // status-only BYPASSED bit

        apply_ibpi(&mut elem, ELEM_ARRAY_DEVICE_SLOT, Ibpi::LocateOff);

        assert_eq!(elem[2] & CTRL2_IDENT, 0);
        assert_eq!(elem[2] & 0x01, 0, "status-only bits sanitized");
        assert_eq!(elem[3] & 0x02, 0, "status-only bits sanitized");
        assert_eq!(element_ibpi(&elem), Ibpi::Normal);
    }

    #[test]
    fn plain_device_slot_zeroes_array_requests() {
        let mut elem = [0u8; 4];
        apply_ibpi(&mut elem, ELEM_DEVICE_SLOT, Ibpi::Rebuild);
        assert_eq!(elem[1], 0);

        let mut elem = [0u8; 4];
        apply_ibpi(&mut elem, ELEM_DEVICE_SLOT, Ibpi::Locate);
        assert_eq!(elem[2] & CTRL2_IDENT, CTRL2_IDENT);
    }

    #[test]
    fn prdfail_is_preserved_across_other_requests() {
        let mut elem = [0u8; 4];
        apply_ibpi(&mut elem, ELEM_ARRAY_DEVICE_SLOT, Ibpi::Pfa);
        assert_eq!(elem[0] & CTRL_PRDFAIL, CTRL_PRDFAIL);

        apply_ibpi(&mut elem, ELEM_ARRAY_DEVICE_SLOT, Ibpi::Locate);
        assert_eq!(elem[0] & CTRL_PRDFAIL, CTRL_PRDFAIL);
        assert_eq!(elem[2] & CTRL2_IDENT, CTRL2_IDENT);
    }
}
