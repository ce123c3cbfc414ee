//! encledctl - apply LED indications one-shot
//!
//! `encledctl locate=/dev/sdb` and friends: scans the system once, applies
//! the requested indications through the matching transports and exits.

use std::env;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Result, anyhow};
use clap::Parser;

use encled::config::{Config, DEFAULT_CONFIG_PATH};
use encled::ibpi::Ibpi;
use encled::registry::Registry;
use encled::status::Status;
use encled::{check_privileges, logger};

/// Environment variable listing slot-id substrings to skip in listings
const SLOT_FILTER_ENV: &str = "LEDMONTEST_SLOT_FILTER";

#[derive(Parser)]
#[command(name = "encledctl", version, about = "Storage enclosure LED control")]
struct Args {
    /// Indications to apply, as pattern=device[,device...]
    #[arg(value_name = "PATTERN=DEVICE[,DEVICE...]")]
    assignments: Vec<String>,

    /// Log file path
    #[arg(long, value_name = "PATH")]
    log: Option<PathBuf>,

    /// Verbosity: quiet, error, warning, info, debug, all
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Config file path
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// List recognized controllers and exit
    #[arg(long)]
    list_controllers: bool,

    /// List LED-bearing slots with their current state and exit
    #[arg(long)]
    list_slots: bool,

    /// Set one slot directly, as slot-id=pattern
    #[arg(long, value_name = "SLOT=PATTERN")]
    set_slot: Option<String>,
}

/// One parsed pattern=devices assignment
struct Assignment {
    ibpi: Ibpi,
    devices: Vec<String>,
}

fn parse_assignment(raw: &str) -> Result<Assignment> {
    let (pattern, devices) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!(Status::CmdlineError).context(format!("not pattern=device: {raw:?}")))?;
    let ibpi: Ibpi = pattern
        .parse()
        .map_err(|_| anyhow!(Status::CmdlineError).context(format!("unknown pattern {pattern:?}")))?;
    let devices = devices
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    if devices.is_empty() {
        return Err(anyhow!(Status::CmdlineError).context(format!("no device in {raw:?}")));
    }
    Ok(Assignment { ibpi, devices })
}

/// Resolve a CLI device spec against the registry
fn resolve_device(registry: &Registry, spec: &str) -> Option<usize> {
    let path = Path::new(spec);
    if let Some(idx) = registry.device_by_path(path) {
        return Some(idx);
    }
    let name = path.file_name()?.to_str()?;
    registry.device_by_name(name)
}

fn list_slots(registry: &Registry) {
    let filters: Vec<String> = env::var(SLOT_FILTER_ENV)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    for slot in registry.slots() {
        let id = slot.id();
        if filters.iter().any(|f| id.contains(f.as_str())) {
            continue;
        }
        match slot.get_state() {
            Ok(state) => println!("{id}\t{state}"),
            Err(status) => println!("{id}\t({status})"),
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load(&config_path, args.config.is_some())
        .map_err(|status| anyhow!(status).context("reading config file"))?;

    let level = match &args.log_level {
        Some(name) => logger::parse_level(name)
            .ok_or_else(|| anyhow!(Status::CmdlineError).context("bad --log-level"))?,
        None => config.log_level.unwrap_or(log::LevelFilter::Warn),
    };
    let log_path = args.log.clone().or_else(|| config.log_path.clone());
    logger::init(log_path.as_deref(), level).map_err(|status| anyhow!(status))?;

    check_privileges().map_err(|status| anyhow!(status))?;

    let mut registry = Registry::new();
    registry.scan(&config).map_err(|status| anyhow!(status))?;

    if args.list_controllers {
        for cntrl in &registry.cntrls {
            println!("{}\t{}", cntrl.path.display(), cntrl.cntrl_type);
        }
        return Ok(());
    }
    if args.list_slots {
        list_slots(&registry);
        return Ok(());
    }
    if let Some(raw) = &args.set_slot {
        let (id, pattern) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!(Status::CmdlineError).context("not slot-id=pattern"))?;
        let ibpi: Ibpi = pattern
            .parse()
            .map_err(|_| anyhow!(Status::CmdlineError).context(format!("unknown pattern {pattern:?}")))?;
        let slot = registry
            .slot_by_id(id)
            .ok_or_else(|| anyhow!(Status::SlotsListError).context(format!("no slot {id:?}")))?;
        slot.set_state(ibpi).map_err(|status| anyhow!(status))?;
        return Ok(());
    }

    if args.assignments.is_empty() {
        return Err(anyhow!(Status::CmdlineError).context("nothing to do"));
    }

    let mut failed = false;
    for raw in &args.assignments {
        let assignment = parse_assignment(raw)?;
        for spec in &assignment.devices {
            let Some(idx) = resolve_device(&registry, spec) else {
                log::error!("{}: device not found", spec);
                failed = true;
                continue;
            };
            if let Err(status) = registry.write_ibpi(idx, assignment.ibpi) {
                log::error!("{}: {} failed: {}", spec, assignment.ibpi, status);
                failed = true;
            }
        }
    }
    registry.flush_enclosures();

    if failed {
        return Err(anyhow!(Status::IbpiDetermineError).context("some indications failed"));
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("encledctl: {err:#}");
        let code = err
            .downcast_ref::<Status>()
            .map(|status| status.exit_code())
            .unwrap_or(1);
        process::exit(code);
    }
}
