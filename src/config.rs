//! Configuration file and controller filtering
//!
//! The config file is line-oriented `KEY = VALUE`, `#` starts a comment.
//! Recognized keys: `INTERVAL`, `LOG_LEVEL`, `LOG_PATH`, `WHITELIST`,
//! `BLACKLIST`. The two list keys hold comma-separated shell-style glob
//! patterns matched against controller paths: a non-empty whitelist admits
//! only matching controllers, otherwise the blacklist excludes matches.

use std::fs;
use std::path::{Path, PathBuf};

use log::LevelFilter;

use crate::logger;
use crate::status::Status;

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/encled.conf";

/// Monitor sleep interval floor, seconds
pub const MIN_INTERVAL: u64 = 5;

/// Monitor sleep interval default, seconds
pub const DEFAULT_INTERVAL: u64 = 10;

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Monitor tick interval in seconds (clamped to `MIN_INTERVAL`)
    pub interval: u64,
    /// Log verbosity, when set in the file
    pub log_level: Option<LevelFilter>,
    /// Log file path, when set in the file
    pub log_path: Option<PathBuf>,
    /// Controller path globs to admit (wins over the blacklist when non-empty)
    pub whitelist: Vec<String>,
    /// Controller path globs to exclude
    pub blacklist: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interval: DEFAULT_INTERVAL,
            log_level: None,
            log_path: None,
            whitelist: Vec::new(),
            blacklist: Vec::new(),
        }
    }
}

impl Config {
    /// Load the config file at `path`
    ///
    /// A missing file is only an error when `required` is set (the user
    /// named the path explicitly); the default path is allowed to be absent.
    pub fn load(path: &Path, required: bool) -> Result<Config, Status> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) if !required => return Ok(Config::default()),
            Err(_) => return Err(Status::ConfigFileError),
        };
        Self::parse(&raw)
    }

    /// Parse config file contents
    pub fn parse(raw: &str) -> Result<Config, Status> {
        let mut config = Config::default();

        for line in raw.lines() {
            let line = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                log::error!("config: malformed line: {:?}", line);
                return Err(Status::ConfigFileError);
            };
            let key = key.trim().to_ascii_uppercase();
            let value = value.trim();

            match key.as_str() {
                "INTERVAL" => {
                    let seconds: u64 =
                        value.parse().map_err(|_| Status::ConfigFileError)?;
                    config.interval = seconds.max(MIN_INTERVAL);
                }
                "LOG_LEVEL" => {
                    config.log_level =
                        Some(logger::parse_level(value).ok_or(Status::ConfigFileError)?);
                }
                "LOG_PATH" => config.log_path = Some(PathBuf::from(value)),
                "WHITELIST" => config.whitelist = split_list(value),
                "BLACKLIST" => config.blacklist = split_list(value),
                other => log::warn!("config: unknown key {:?} ignored", other),
            }
        }

        Ok(config)
    }

    /// Apply the whitelist/blacklist to a controller path
    pub fn cntrl_allowed(&self, path: &str) -> bool {
        if !self.whitelist.is_empty() {
            return self.whitelist.iter().any(|pat| glob_match(pat, path));
        }
        !self.blacklist.iter().any(|pat| glob_match(pat, path))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Shell-style glob match: `*`, `?` and `[...]` classes
///
/// Iterative with single-star backtracking, the classic fnmatch shape.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < txt.len() {
        if p < pat.len() {
            match pat[p] {
                '*' => {
                    star = Some((p, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next_p)) = class_match(&pat, p, txt[t]) {
                        if matched {
                            p = next_p;
                            t += 1;
                            continue;
                        }
                    }
                }
                c if c == txt[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
        }
        // Mismatch: retry after the last star, consuming one more character
        match star {
            Some((sp, st)) => {
                p = sp + 1;
                t = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

/// Match one `[...]` class at `pat[start]`; returns (matched, index past `]`)
fn class_match(pat: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negated = matches!(pat.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < pat.len() {
        if pat[i] == ']' && !first {
            return Some((matched != negated, i + 1));
        }
        first = false;
        if i + 2 < pat.len() && pat[i + 1] == '-' && pat[i + 2] != ']' {
            if pat[i] <= c && c <= pat[i + 2] {
                matched = true;
            }
            i += 3;
        } else {
            if pat[i] == c {
                matched = true;
            }
            i += 1;
        }
    }
    // Unterminated class never matches
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn globs() {
        assert!(glob_match("*", "/sys/devices/pci0000:00/0000:00:17.0"));
        assert!(glob_match("*0000:00:17.0", "/sys/devices/pci0000:00/0000:00:17.0"));
        assert!(glob_match("/sys/*/pci*", "/sys/devices/pci0000:00"));
        assert!(glob_match("host?", "host3"));
        assert!(!glob_match("host?", "host12"));
        assert!(glob_match("sd[a-c]", "sdb"));
        assert!(!glob_match("sd[a-c]", "sdd"));
        assert!(glob_match("sd[!a-c]", "sdd"));
        assert!(!glob_match("sd[", "sdd"));
    }

    #[test]
    fn parse_accepts_documented_keys() {
        let config = Config::parse(
            "# comment\n\
             INTERVAL = 30\n\
             LOG_LEVEL = debug\n\
             LOG_PATH = /var/log/encled.log\n\
             WHITELIST = *:00:17.0, *isci*\n",
        )
        .unwrap();
        assert_eq!(config.interval, 30);
        assert_eq!(config.log_level, Some(LevelFilter::Debug));
        assert_eq!(config.log_path.as_deref(), Some(Path::new("/var/log/encled.log")));
        assert_eq!(config.whitelist.len(), 2);
    }

    #[test]
    fn interval_is_clamped() {
        let config = Config::parse("INTERVAL = 1\n").unwrap();
        assert_eq!(config.interval, MIN_INTERVAL);
    }

    #[test]
    fn malformed_line_is_an_error() {
        assert_eq!(
            Config::parse("INTERVAL 30\n").unwrap_err(),
            Status::ConfigFileError
        );
        assert_eq!(
            Config::parse("LOG_LEVEL = verbose\n").unwrap_err(),
            Status::ConfigFileError
        );
    }

    #[test]
    fn whitelist_wins_over_blacklist() {
        let mut config = Config::default();
        config.blacklist = vec!["*ahci*".into()];
        assert!(!config.cntrl_allowed("/sys/devices/ahci0"));
        assert!(config.cntrl_allowed("/sys/devices/isci0"));

        config.whitelist = vec!["*isci*".into()];
        assert!(config.cntrl_allowed("/sys/devices/isci0"));
        assert!(!config.cntrl_allowed("/sys/devices/other0"));
    }
}
