//! IPMI BMC request/response over the kernel ipmi device
//!
//! Requests go to the system interface (BMC channel) through
//! `IPMICTL_SEND_COMMAND`; the response is picked up with poll +
//! `IPMICTL_RECEIVE_MSG_TRUNC` and matched by message id.
//! Reference: include/uapi/linux/ipmi.h.

use std::fs::File;
use std::io;
use std::mem;
use std::os::fd::AsRawFd;
use std::path::Path;

pub mod dell;

/// IPMI address type: system interface
const IPMI_SYSTEM_INTERFACE_ADDR_TYPE: i32 = 0x0C;

/// Channel the BMC itself answers on
const IPMI_BMC_CHANNEL: i16 = 0xF;

/// recv_type of a command response
const IPMI_RESPONSE_RECV_TYPE: i32 = 1;

/// Response wait budget, milliseconds
const IPMI_TIMEOUT_MS: i32 = 1000;

/// `struct ipmi_system_interface_addr`
#[repr(C)]
#[derive(Clone, Copy)]
struct IpmiSystemInterfaceAddr {
    addr_type: i32,
    channel: i16,
    lun: u8,
}

/// `struct ipmi_msg`
#[repr(C)]
struct IpmiMsg {
    netfn: u8,
    cmd: u8,
    data_len: u16,
    data: *mut u8,
}

/// `struct ipmi_req`
#[repr(C)]
struct IpmiReq {
    addr: *mut u8,
    addr_len: u32,
    msgid: i64,
    msg: IpmiMsg,
}

/// `struct ipmi_recv`
#[repr(C)]
struct IpmiRecv {
    recv_type: i32,
    addr: *mut u8,
    addr_len: u32,
    msgid: i64,
    msg: IpmiMsg,
}

const IOC_WRITE: libc::c_ulong = 1;
const IOC_READ: libc::c_ulong = 2;

/// Linux `_IOC` encoding
const fn ioc(dir: libc::c_ulong, ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    (dir << 30) | ((size as libc::c_ulong) << 16) | ((ty as libc::c_ulong) << 8) | nr as libc::c_ulong
}

fn ipmictl_send_command() -> libc::c_ulong {
    ioc(IOC_READ, b'i', 13, mem::size_of::<IpmiReq>())
}

fn ipmictl_receive_msg_trunc() -> libc::c_ulong {
    ioc(IOC_READ | IOC_WRITE, b'i', 11, mem::size_of::<IpmiRecv>())
}

/// Open BMC interface
pub struct IpmiIntf {
    file: File,
    msgid: i64,
}

impl IpmiIntf {
    /// Open the first kernel ipmi device (`<dev_root>/ipmi0`)
    pub fn open(dev_root: &Path) -> io::Result<IpmiIntf> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(dev_root.join("ipmi0"))?;
        Ok(IpmiIntf { file, msgid: 1 })
    }

    /// Issue one request and wait for its response
    ///
    /// The returned buffer starts after the completion code; a non-zero
    /// completion code is an `InvalidData` error.
    pub fn request(&mut self, netfn: u8, cmd: u8, data: &[u8]) -> io::Result<Vec<u8>> {
        let fd = self.file.as_raw_fd();
        self.msgid += 1;
        let msgid = self.msgid;

        let mut addr = IpmiSystemInterfaceAddr {
            addr_type: IPMI_SYSTEM_INTERFACE_ADDR_TYPE,
            channel: IPMI_BMC_CHANNEL,
            lun: 0,
        };

        let mut req_data = data.to_vec();
        let mut req = IpmiReq {
            addr: (&mut addr as *mut IpmiSystemInterfaceAddr).cast(),
            addr_len: mem::size_of::<IpmiSystemInterfaceAddr>() as u32,
            msgid,
            msg: IpmiMsg {
                netfn,
                cmd,
                data_len: req_data.len() as u16,
                data: req_data.as_mut_ptr(),
            },
        };

        // SAFETY: req and every pointer inside it stay alive across the call.
        let ret = unsafe { libc::ioctl(fd, ipmictl_send_command(), &mut req as *mut IpmiReq) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: pollfd is a valid, exclusively borrowed array of one.
        let ret = unsafe { libc::poll(&mut pollfd, 1, IPMI_TIMEOUT_MS) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        if ret == 0 {
            return Err(io::Error::from_raw_os_error(libc::ETIMEDOUT));
        }

        let mut addr_buf = [0u8; 64];
        let mut resp_data = vec![0u8; 64];
        let mut recv = IpmiRecv {
            recv_type: 0,
            addr: addr_buf.as_mut_ptr(),
            addr_len: addr_buf.len() as u32,
            msgid: 0,
            msg: IpmiMsg {
                netfn: 0,
                cmd: 0,
                data_len: resp_data.len() as u16,
                data: resp_data.as_mut_ptr(),
            },
        };

        // SAFETY: recv and its buffers stay alive across the call.
        let ret =
            unsafe { libc::ioctl(fd, ipmictl_receive_msg_trunc(), &mut recv as *mut IpmiRecv) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        if recv.recv_type != IPMI_RESPONSE_RECV_TYPE || recv.msgid != msgid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unexpected IPMI message",
            ));
        }

        resp_data.truncate(recv.msg.data_len as usize);
        match resp_data.split_first() {
            Some((0x00, rest)) => Ok(rest.to_vec()),
            Some((cc, _)) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("IPMI completion code {cc:#04x}"),
            )),
            None => Err(io::Error::new(io::ErrorKind::InvalidData, "empty IPMI response")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ioctl_numbers_match_kernel_abi() {
        // 64-bit layout: ipmi_req is 40 bytes, ipmi_recv is 48
        assert_eq!(mem::size_of::<IpmiReq>(), 40);
        assert_eq!(mem::size_of::<IpmiRecv>(), 48);
        assert_eq!(ipmictl_send_command(), 0x8028_690D);
        assert_eq!(ipmictl_receive_msg_trunc(), 0xC030_690B);
    }
}
