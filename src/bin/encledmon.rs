//! encledmon - LED monitor daemon
//!
//! Long-running counterpart of `encledctl`: follows RAID state and block
//! device hot-plug events, reconciling every drive's LED each tick.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Result, anyhow};
use clap::Parser;

use encled::config::{Config, DEFAULT_CONFIG_PATH, MIN_INTERVAL};
use encled::monitor::Monitor;
use encled::registry::Registry;
use encled::status::Status;
use encled::{check_privileges, logger};

/// Pidfile guarding against a second monitor
const PIDFILE: &str = "/var/run/encledmon.pid";

#[derive(Parser)]
#[command(name = "encledmon", version, about = "Storage enclosure LED monitor")]
struct Args {
    /// Log file path
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,

    /// Verbosity: quiet, error, warning, info, debug, all
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Seconds between ticks (minimum 5)
    #[arg(long, value_name = "SECONDS")]
    interval: Option<u64>,

    /// Stay in the foreground
    #[arg(long)]
    foreground: bool,

    /// Config file path
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Refuse to start when another monitor holds the pidfile
fn claim_pidfile(path: &Path) -> Result<(), Status> {
    if let Some(pid) = encled::sysfs::read_int(path) {
        // SAFETY: signal 0 only probes for existence.
        if pid > 0 && unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
            log::error!("another monitor is running (pid {})", pid);
            return Err(Status::LedmonRunning);
        }
    }
    fs::write(path, format!("{}\n", process::id())).map_err(|_| Status::FileWriteError)
}

fn run(args: Args) -> Result<()> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = Config::load(&config_path, args.config.is_some())
        .map_err(|status| anyhow!(status).context("reading config file"))?;

    if let Some(interval) = args.interval {
        config.interval = interval.max(MIN_INTERVAL);
    }

    let level = match &args.log_level {
        Some(name) => logger::parse_level(name)
            .ok_or_else(|| anyhow!(Status::CmdlineError).context("bad --log-level"))?,
        None => config.log_level.unwrap_or(log::LevelFilter::Warn),
    };
    let log_path = args.log.clone().or_else(|| config.log_path.clone());
    logger::init(log_path.as_deref(), level).map_err(|status| anyhow!(status))?;

    check_privileges().map_err(|status| anyhow!(status))?;
    claim_pidfile(Path::new(PIDFILE)).map_err(|status| anyhow!(status))?;

    if !args.foreground {
        // SAFETY: no other threads are running this early.
        if unsafe { libc::daemon(0, 0) } != 0 {
            let _ = fs::remove_file(PIDFILE);
            return Err(anyhow!(Status::LedmonInit).context("daemonizing failed"));
        }
        // The pid changed across the fork
        let _ = fs::write(PIDFILE, format!("{}\n", process::id()));
    }

    let mut registry = Registry::new();
    registry.scan(&config).map_err(|status| anyhow!(status))?;

    let mut monitor = Monitor::new(registry, config);
    let result = monitor.run();

    let _ = fs::remove_file(PIDFILE);
    result.map_err(|status| anyhow!(status))
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("encledmon: {err:#}");
        let code = err
            .downcast_ref::<Status>()
            .map(|status| status.exit_code())
            .unwrap_or(1);
        process::exit(code);
    }
}
