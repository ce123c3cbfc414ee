//! RAID state provider
//!
//! The monitor's source of desired indications: md arrays under
//! `/sys/block/md*/md` expose the array health (`array_state`, `degraded`,
//! `sync_action`) and per-member state flags (`dev-*/state`). Each member
//! maps to one indication; drives that are members of nothing fall back to
//! the one-shot normal pulse in the monitor.

use std::path::Path;

use crate::ibpi::Ibpi;
use crate::sysfs;

/// One RAID member with its desired indication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidMember {
    /// Block device basename (`sdb`, `nvme0n1`, ...)
    pub block_name: String,
    /// Indication the member's state calls for
    pub ibpi: Ibpi,
}

/// Indication for one member given the array and member state
///
/// `state` is the comma-separated flag list from `md/dev-*/state`.
fn member_ibpi(state: &str, array_state: &str, degraded: i64, sync_action: &str) -> Ibpi {
    let flags: Vec<&str> = state.split(',').map(str::trim).collect();

    if flags.contains(&"faulty") {
        return Ibpi::FailedDrive;
    }
    if flags.contains(&"spare") {
        if matches!(sync_action, "recover" | "resync") {
            return Ibpi::Rebuild;
        }
        return Ibpi::Hotspare;
    }
    if array_state == "broken" || array_state == "inactive" {
        return Ibpi::FailedArray;
    }
    if degraded > 0 {
        return Ibpi::Degraded;
    }
    Ibpi::Normal
}

/// Scan every md array and compute member indications
pub fn scan(sys_root: &Path) -> Vec<RaidMember> {
    let mut members = Vec::new();

    for entry in sysfs::list_dir(&sys_root.join("block")) {
        let array_dir = sysfs::read_link(&entry).unwrap_or(entry).join("md");
        if !array_dir.is_dir() {
            continue;
        }

        let array_state = sysfs::read_text(&array_dir.join("array_state")).unwrap_or_default();
        let degraded = sysfs::read_int(&array_dir.join("degraded")).unwrap_or(0);
        let sync_action = sysfs::read_text(&array_dir.join("sync_action")).unwrap_or_default();

        for member_dir in sysfs::list_dir(&array_dir) {
            let Some(name) = member_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(block_name) = name.strip_prefix("dev-") else {
                continue;
            };
            let state = sysfs::read_text(&member_dir.join("state")).unwrap_or_default();
            let ibpi = member_ibpi(&state, &array_state, degraded, &sync_action);
            log::debug!("raid: {}: {} ({})", block_name, ibpi, state);
            members.push(RaidMember {
                block_name: block_name.to_string(),
                ibpi,
            });
        }
    }

    members
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn member_states_map_to_indications() {
        assert_eq!(member_ibpi("in_sync", "clean", 0, "idle"), Ibpi::Normal);
        assert_eq!(member_ibpi("faulty", "clean", 0, "idle"), Ibpi::FailedDrive);
        assert_eq!(member_ibpi("in_sync", "clean", 1, "idle"), Ibpi::Degraded);
        assert_eq!(member_ibpi("spare", "clean", 1, "recover"), Ibpi::Rebuild);
        assert_eq!(member_ibpi("spare", "clean", 0, "idle"), Ibpi::Hotspare);
        assert_eq!(member_ibpi("in_sync", "broken", 0, "idle"), Ibpi::FailedArray);
        assert_eq!(
            member_ibpi("in_sync,write_mostly", "active", 0, "idle"),
            Ibpi::Normal
        );
    }

    #[test]
    fn scan_reads_md_member_tree() {
        let sys = TempDir::new().unwrap();
        let md = sys.path().join("block/md0/md");
        fs::create_dir_all(md.join("dev-sdb")).unwrap();
        fs::create_dir_all(md.join("dev-sdc")).unwrap();
        fs::write(md.join("array_state"), "clean\n").unwrap();
        fs::write(md.join("degraded"), "1\n").unwrap();
        fs::write(md.join("sync_action"), "recover\n").unwrap();
        fs::write(md.join("dev-sdb/state"), "in_sync\n").unwrap();
        fs::write(md.join("dev-sdc/state"), "spare\n").unwrap();
        // A plain disk next to the array
        fs::create_dir_all(sys.path().join("block/sda")).unwrap();

        let mut members = scan(sys.path());
        members.sort_by(|a, b| a.block_name.cmp(&b.block_name));
        assert_eq!(
            members,
            [
                RaidMember {
                    block_name: "sdb".into(),
                    ibpi: Ibpi::Degraded
                },
                RaidMember {
                    block_name: "sdc".into(),
                    ibpi: Ibpi::Rebuild
                },
            ]
        );
    }
}
