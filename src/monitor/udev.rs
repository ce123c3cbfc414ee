//! Kernel uevent subscription
//!
//! Hot-plug notifications arrive on a NETLINK_KOBJECT_UEVENT socket bound
//! to the kernel multicast group. Messages are NUL-separated:
//! `action@devpath` followed by `KEY=VALUE` pairs. The socket is
//! non-blocking; the monitor drains it once per tick.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

/// Kernel uevent multicast group
const UEVENT_KERNEL_GROUP: u32 = 1;

/// Receive buffer, large enough for any uevent
const RECV_BUF_SIZE: usize = 8192;

/// Hot-plug action of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugAction {
    Add,
    Remove,
}

/// One parsed block-device uevent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotplugEvent {
    pub action: HotplugAction,
    /// Kernel device path (`/devices/...`)
    pub devpath: String,
    /// Device node basename, when the event names one
    pub devname: Option<String>,
}

/// Parse one uevent datagram; `None` for anything but block add/remove
pub fn parse_uevent(data: &[u8]) -> Option<HotplugEvent> {
    let mut parts = data.split(|&b| b == 0).filter_map(|p| std::str::from_utf8(p).ok());

    let header = parts.next()?;
    let (action, devpath) = header.split_once('@')?;
    let action = match action {
        "add" => HotplugAction::Add,
        "remove" => HotplugAction::Remove,
        _ => return None,
    };

    let mut devname = None;
    let mut subsystem = None;
    for part in parts {
        if let Some(value) = part.strip_prefix("DEVNAME=") {
            devname = Some(value.to_string());
        } else if let Some(value) = part.strip_prefix("SUBSYSTEM=") {
            subsystem = Some(value.to_string());
        }
    }

    if subsystem.as_deref() != Some("block") {
        return None;
    }

    Some(HotplugEvent {
        action,
        devpath: devpath.to_string(),
        devname,
    })
}

/// Open uevent subscription
pub struct UdevMonitor {
    fd: OwnedFd,
}

impl UdevMonitor {
    /// Subscribe to kernel uevents
    pub fn open() -> io::Result<UdevMonitor> {
        // SAFETY: plain socket syscall; the fd is checked before wrapping.
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                libc::NETLINK_KOBJECT_UEVENT,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: fd is a freshly created, owned socket.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        // SAFETY: sockaddr_nl is plain-old-data; zeroing is its null state.
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        addr.nl_groups = UEVENT_KERNEL_GROUP;

        // SAFETY: addr is a valid sockaddr_nl for the length passed.
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&addr as *const libc::sockaddr_nl).cast(),
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(UdevMonitor { fd })
    }

    /// Drain all pending events
    ///
    /// Returns immediately; an empty vector means the socket had nothing.
    pub fn drain(&self) -> Vec<HotplugEvent> {
        let mut events = Vec::new();
        let mut buf = [0u8; RECV_BUF_SIZE];
        loop {
            // SAFETY: buf is a valid, exclusively borrowed receive buffer.
            let len = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                    0,
                )
            };
            if len < 0 {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::WouldBlock {
                    log::debug!("udev: recv failed: {}", err);
                }
                break;
            }
            if len == 0 {
                break;
            }
            if let Some(event) = parse_uevent(&buf[..len as usize]) {
                events.push(event);
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_add_event_parses() {
        let raw = b"add@/devices/pci0000:00/0000:00:17.0/ata3/host2/target2:0:0/2:0:0:0/block/sdb\0\
                    ACTION=add\0DEVNAME=sdb\0SUBSYSTEM=block\0SEQNUM=4711\0";
        let event = parse_uevent(raw).unwrap();
        assert_eq!(event.action, HotplugAction::Add);
        assert_eq!(event.devname.as_deref(), Some("sdb"));
        assert!(event.devpath.ends_with("block/sdb"));
    }

    #[test]
    fn non_block_and_other_actions_are_ignored() {
        assert_eq!(
            parse_uevent(b"add@/devices/x\0SUBSYSTEM=usb\0DEVNAME=bus/usb/001/002\0"),
            None
        );
        assert_eq!(
            parse_uevent(b"change@/devices/x/block/sdb\0SUBSYSTEM=block\0DEVNAME=sdb\0"),
            None
        );
        assert_eq!(parse_uevent(b"garbage"), None);
    }
}
