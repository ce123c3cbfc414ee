//! SCSI and SMP command submission over the bsg driver
//!
//! Both the SES diagnostic pages and the SMP GPIO frames travel through the
//! `SG_IO` ioctl on `/dev/bsg` character devices, using the v4 header
//! (`guard = 'Q'`). SES enclosures use the SCSI-command subprotocol with a
//! 6-byte cdb; SAS hosts use the SCSI-transport subprotocol carrying a raw
//! SMP frame. Reference: include/uapi/linux/bsg.h.

use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub mod ses;
pub mod smp;

/// SG_IO ioctl request number
const SG_IO: libc::c_ulong = 0x2285;

/// v4 header guard byte
const BSG_GUARD: i32 = 'Q' as i32;

/// bsg protocol: SCSI
const BSG_PROTOCOL_SCSI: u32 = 0;

/// bsg subprotocol: SCSI command
const BSG_SUB_PROTOCOL_SCSI_CMD: u32 = 0;

/// bsg subprotocol: SCSI transport (SMP passthrough)
const BSG_SUB_PROTOCOL_SCSI_TRANSPORT: u32 = 2;

/// Device timeout for a single SG_IO transaction, milliseconds
const SG_IO_TIMEOUT_MS: u32 = 5000;

/// SEND DIAGNOSTIC opcode
const SEND_DIAGNOSTIC: u8 = 0x1D;

/// RECEIVE DIAGNOSTIC RESULTS opcode
const RECEIVE_DIAGNOSTIC_RESULTS: u8 = 0x1C;

/// Attempts per RECEIVE DIAGNOSTIC RESULTS before giving up
const RECEIVE_DIAG_RETRIES: u32 = 3;

/// `struct sg_io_v4` from include/uapi/linux/bsg.h
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SgIoV4 {
    pub guard: i32,
    pub protocol: u32,
    pub subprotocol: u32,
    pub request_len: u32,
    pub request: u64,
    pub request_tag: u64,
    pub request_attr: u32,
    pub request_priority: u32,
    pub request_extra: u32,
    pub max_response_len: u32,
    pub response: u64,
    pub dout_iovec_count: u32,
    pub dout_xfer_len: u32,
    pub din_iovec_count: u32,
    pub din_xfer_len: u32,
    pub dout_xferp: u64,
    pub din_xferp: u64,
    pub timeout: u32,
    pub flags: u32,
    pub usr_ptr: u64,
    pub spare_in: u32,
    pub driver_status: u32,
    pub transport_status: u32,
    pub device_status: u32,
    pub retry_delay: u32,
    pub info: u32,
    pub duration: u32,
    pub response_len: u32,
    pub din_resid: i32,
    pub dout_resid: i32,
    pub generated_tag: u64,
    pub spare_out: u32,
    pub padding: u32,
}

/// Submit one v4 header and check the three status words
fn sg_io(file: &File, hdr: &mut SgIoV4) -> io::Result<()> {
    // SAFETY: hdr is a valid, exclusively borrowed sg_io_v4 and every
    // pointer field inside it outlives the ioctl.
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), SG_IO, hdr as *mut SgIoV4) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    if hdr.device_status != 0 || hdr.transport_status != 0 || hdr.driver_status != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "sg_io failed: device={:#x} transport={:#x} driver={:#x}",
                hdr.device_status, hdr.transport_status, hdr.driver_status
            ),
        ));
    }
    Ok(())
}

/// Run a SCSI command with an optional single data transfer
fn scsi_cmd(file: &File, cdb: &[u8], din: Option<&mut [u8]>, dout: Option<&[u8]>) -> io::Result<()> {
    let mut sense = [0u8; 64];
    let mut hdr = SgIoV4 {
        guard: BSG_GUARD,
        protocol: BSG_PROTOCOL_SCSI,
        subprotocol: BSG_SUB_PROTOCOL_SCSI_CMD,
        request_len: cdb.len() as u32,
        request: cdb.as_ptr() as u64,
        max_response_len: sense.len() as u32,
        response: sense.as_mut_ptr() as u64,
        timeout: SG_IO_TIMEOUT_MS,
        ..Default::default()
    };
    if let Some(buf) = din {
        hdr.din_xfer_len = buf.len() as u32;
        hdr.din_xferp = buf.as_mut_ptr() as u64;
    }
    if let Some(buf) = dout {
        hdr.dout_xfer_len = buf.len() as u32;
        hdr.dout_xferp = buf.as_ptr() as u64;
    }
    sg_io(file, &mut hdr)
}

/// SEND DIAGNOSTIC with the page-format bit set
pub fn send_diagnostic(file: &File, page: &[u8]) -> io::Result<()> {
    let len = page.len() as u16;
    let cdb = [
        SEND_DIAGNOSTIC,
        0x10, // PF: the data is a diagnostic page
        0x00,
        (len >> 8) as u8,
        (len & 0xFF) as u8,
        0x00,
    ];
    scsi_cmd(file, &cdb, None, Some(page))
}

/// RECEIVE DIAGNOSTIC RESULTS for one page, retried up to 3 times
pub fn receive_diagnostic(file: &File, page_code: u8, buf: &mut [u8]) -> io::Result<()> {
    let len = buf.len() as u16;
    let cdb = [
        RECEIVE_DIAGNOSTIC_RESULTS,
        0x01, // PCV: page_code selects the page
        page_code,
        (len >> 8) as u8,
        (len & 0xFF) as u8,
        0x00,
    ];
    let mut last_err = None;
    for attempt in 1..=RECEIVE_DIAG_RETRIES {
        match scsi_cmd(file, &cdb, Some(buf), None) {
            Ok(()) => return Ok(()),
            Err(err) => {
                log::debug!(
                    "receive diagnostic page {:#04x}: attempt {}/{} failed: {}",
                    page_code,
                    attempt,
                    RECEIVE_DIAG_RETRIES,
                    err
                );
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap())
}

/// Submit a raw SMP frame and read back the response frame
pub fn smp_request(file: &File, request: &[u8], response: &mut [u8]) -> io::Result<()> {
    let mut hdr = SgIoV4 {
        guard: BSG_GUARD,
        protocol: BSG_PROTOCOL_SCSI,
        subprotocol: BSG_SUB_PROTOCOL_SCSI_TRANSPORT,
        dout_xfer_len: request.len() as u32,
        dout_xferp: request.as_ptr() as u64,
        din_xfer_len: response.len() as u32,
        din_xferp: response.as_mut_ptr() as u64,
        timeout: SG_IO_TIMEOUT_MS,
        ..Default::default()
    };
    sg_io(file, &mut hdr)
}
