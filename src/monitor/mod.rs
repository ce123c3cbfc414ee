//! Monitor loop
//!
//! Single-threaded cooperative loop: each tick refreshes the desired
//! indication of every block device from RAID state, folds in pending
//! hot-plug events, dispatches the devices whose desired indication
//! changed, flushes the batched enclosure pages and sleeps. SIGINT and
//! SIGTERM finish the running tick before the loop returns, so a partially
//! staged enclosure page is always flushed or dropped whole.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::ibpi::Ibpi;
use crate::raid;
use crate::registry::Registry;
use crate::status::Status;

pub mod udev;

use self::udev::UdevMonitor;

/// Set by the signal handler, checked between ticks
static TERMINATE: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_signum: libc::c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
}

/// Install SIGINT/SIGTERM handlers that request a clean shutdown
pub fn install_signal_handlers() -> Result<(), Status> {
    // SAFETY: sigaction is plain-old-data; zeroing is its null state.
    let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
    action.sa_sigaction = handle_signal as usize;
    for signum in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: action stays valid for the duration of the call and the
        // handler only touches an atomic.
        let ret = unsafe { libc::sigaction(signum, &action, std::ptr::null_mut()) };
        if ret != 0 {
            return Err(Status::LedmonInit);
        }
    }
    Ok(())
}

/// Whether a shutdown was requested
pub fn terminating() -> bool {
    TERMINATE.load(Ordering::SeqCst)
}

/// The monitor
pub struct Monitor {
    registry: Registry,
    config: Config,
    udev: Option<UdevMonitor>,
}

impl Monitor {
    pub fn new(registry: Registry, config: Config) -> Monitor {
        Monitor {
            registry,
            config,
            udev: None,
        }
    }

    /// Run until a termination signal arrives
    pub fn run(&mut self) -> Result<(), Status> {
        install_signal_handlers()?;

        match UdevMonitor::open() {
            Ok(monitor) => self.udev = Some(monitor),
            Err(err) => {
                log::warn!("monitor: uevent subscription failed ({}), polling only", err);
            }
        }

        let interval = Duration::from_secs(self.config.interval);
        log::info!("monitor: started, interval {}s", self.config.interval);

        while !terminating() {
            let started = Instant::now();
            self.tick();
            self.sleep_until(started + interval);
        }

        // The udev socket closes with the monitor; staged pages were
        // flushed by the last tick.
        self.udev = None;
        log::info!("monitor: stopped");
        Ok(())
    }

    /// One monitor tick
    pub fn tick(&mut self) {
        // 1. Desired indications from RAID state
        let members = raid::scan(self.registry.sys_root());

        // 2. Pending hot-plug events force a rescan
        let events = match &self.udev {
            Some(udev) => udev.drain(),
            None => Vec::new(),
        };
        if !events.is_empty() {
            for event in &events {
                log::info!(
                    "monitor: {:?} {}",
                    event.action,
                    event.devname.as_deref().unwrap_or(&event.devpath)
                );
            }
            if let Err(status) = self.registry.scan(&self.config) {
                log::warn!("monitor: rescan failed: {}", status);
            }
        }

        // 3. Dispatch devices whose desired indication changed
        for idx in 0..self.registry.devices.len() {
            let name = self.registry.devices[idx].name.clone();
            let desired = members
                .iter()
                .find(|m| m.block_name == name)
                .map(|m| m.ibpi)
                .unwrap_or(Ibpi::OneshotNormal);
            self.registry.devices[idx].ibpi_desired = desired;

            if desired == self.registry.devices[idx].ibpi_previous_written {
                continue;
            }
            if let Err(status) = self.registry.write_ibpi(idx, desired) {
                log::warn!("monitor: {}: write {} failed: {}", name, desired, status);
            }
        }

        // 4. One SEND DIAGNOSTIC per touched enclosure
        self.registry.flush_enclosures();
    }

    /// Sleep to the next tick, waking early on a termination request
    fn sleep_until(&self, deadline: Instant) {
        while !terminating() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(200)));
        }
    }

    /// The registry, for inspection
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
