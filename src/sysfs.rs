//! Platform probe: total reads over the kernel device tree
//!
//! Every function here is total: an absent node, an unreadable attribute or
//! a malformed value yields the caller's default (`None` / empty vector),
//! never a panic. Sysfs attributes are owned by the kernel and may vanish
//! between the moment a directory is listed and the moment it is read, so
//! all failures are treated as "attribute not there".

use std::fs;
use std::path::{Component, Path, PathBuf};

/// Read a text attribute, trimming the trailing newline
pub fn read_text(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    Some(raw.trim_end_matches('\n').to_string())
}

/// Read a small integer attribute
///
/// Accepts decimal and `0x`-prefixed hexadecimal, the two forms sysfs uses
/// for numeric attributes. An optional leading `-` is honored for module
/// parameters that default to -1.
pub fn read_int(path: &Path) -> Option<i64> {
    let text = read_text(path)?;
    let text = text.trim();
    let (sign, text) = match text.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, text),
    };
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok()?,
        None => text.parse::<i64>().ok()?,
    };
    Some(sign * value)
}

/// Read a 64-bit attribute (e.g. a SAS address)
pub fn read_u64(path: &Path) -> Option<u64> {
    let text = read_text(path)?;
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse::<u64>().ok(),
    }
}

/// Read a boolean attribute
///
/// Module parameters come in two spellings: `Y`/`N` for bool parameters and
/// `0`/`1` for integer ones. Both are accepted.
pub fn read_bool(path: &Path) -> Option<bool> {
    let text = read_text(path)?;
    match text.trim() {
        "Y" | "y" | "1" => Some(true),
        "N" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Enumerate directory children as full paths
///
/// Entries are returned sorted so scans are deterministic. Symlinked entries
/// are returned as the symlink path itself; nothing is resolved here.
pub fn list_dir(path: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = match fs::read_dir(path) {
        Ok(iter) => iter.filter_map(|e| e.ok().map(|e| e.path())).collect(),
        Err(_) => Vec::new(),
    };
    entries.sort();
    entries
}

/// Resolve a symlink to an absolute, lexically normalized target
///
/// Only the named link is followed; `..` components in the target are
/// collapsed without touching the filesystem, so no other symlink on the
/// path is traversed.
pub fn read_link(path: &Path) -> Option<PathBuf> {
    let target = fs::read_link(path).ok()?;
    let absolute = if target.is_absolute() {
        target
    } else {
        path.parent()?.join(target)
    };
    Some(normalize(&absolute))
}

/// Collapse `.` and `..` components lexically
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn text_trims_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "model", "INTEL SSD\n");
        assert_eq!(read_text(&path).as_deref(), Some("INTEL SSD"));
        assert_eq!(read_text(&dir.path().join("missing")), None);
    }

    #[test]
    fn int_accepts_decimal_and_hex() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_int(&write(&dir, "a", "42\n")), Some(42));
        assert_eq!(read_int(&write(&dir, "b", "0x8086\n")), Some(0x8086));
        assert_eq!(read_int(&write(&dir, "c", "-1\n")), Some(-1));
        assert_eq!(read_int(&write(&dir, "d", "junk\n")), None);
    }

    #[test]
    fn u64_reads_sas_addresses() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "sas_address", "0x5000c50012345678\n");
        assert_eq!(read_u64(&path), Some(0x5000_c500_1234_5678));
    }

    #[test]
    fn bool_accepts_both_spellings() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read_bool(&write(&dir, "a", "Y\n")), Some(true));
        assert_eq!(read_bool(&write(&dir, "b", "0\n")), Some(false));
        assert_eq!(read_bool(&write(&dir, "c", "maybe\n")), None);
    }

    #[test]
    fn list_dir_is_sorted_and_total() {
        let dir = TempDir::new().unwrap();
        write(&dir, "b", "");
        write(&dir, "a", "");
        let names: Vec<_> = list_dir(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_owned())
            .collect();
        assert_eq!(names, ["a", "b"]);
        assert!(list_dir(&dir.path().join("missing")).is_empty());
    }

    #[test]
    fn link_resolution_is_lexical() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("devices/pci0000:00/0000:00:17.0")).unwrap();
        symlink(
            "../devices/pci0000:00/0000:00:17.0",
            dir.path().join("card"),
        )
        .unwrap();
        let resolved = read_link(&dir.path().join("card")).unwrap();
        assert_eq!(resolved, dir.path().join("devices/pci0000:00/0000:00:17.0"));
    }
}
