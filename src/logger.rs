//! Logging infrastructure
//!
//! This module provides logging via the `log` crate, outputting to stderr
//! and, when configured, to a log file. The stderr sink uses ANSI-colored
//! level tags; the file sink stays plain so the log remains greppable.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

use log::{Level, LevelFilter, Metadata, Record};

use crate::status::Status;

/// Combined stderr + file logger
struct CombinedLogger {
    /// Instant the logger was installed, for relative timestamps
    start: Mutex<Option<Instant>>,
    /// Log file sink, if one was configured
    file: Mutex<Option<File>>,
}

impl CombinedLogger {
    /// Milliseconds since the logger was installed
    fn elapsed_ms(&self) -> u128 {
        match *self.start.lock().unwrap() {
            Some(start) => start.elapsed().as_millis(),
            None => 0,
        }
    }
}

impl log::Log for CombinedLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Level strings for stderr (with ANSI colors)
        let level_str_tty = match record.level() {
            Level::Error => "\x1b[31mERROR\x1b[0m",
            Level::Warn => "\x1b[33mWARN\x1b[0m ",
            Level::Info => "\x1b[32mINFO\x1b[0m ",
            Level::Debug => "\x1b[34mDEBUG\x1b[0m",
            Level::Trace => "\x1b[35mTRACE\x1b[0m",
        };

        // Level strings without ANSI colors (for the log file)
        let level_str_plain = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        let ts = self.elapsed_ms();

        eprintln!("[{:>10}] [{}] {}", ts, level_str_tty, record.args());

        if let Some(file) = self.file.lock().unwrap().as_mut() {
            let _ = writeln!(file, "[{:>10}] [{}] {}", ts, level_str_plain, record.args());
        }
    }

    fn flush(&self) {
        if let Some(file) = self.file.lock().unwrap().as_mut() {
            let _ = file.flush();
        }
    }
}

static LOGGER: CombinedLogger = CombinedLogger {
    start: Mutex::new(None),
    file: Mutex::new(None),
};

/// Initialize the logging subsystem
///
/// Opens `path` for appending when given; an unopenable path is
/// `Status::LogFileError`. Calling `init` twice is an error from
/// `log::set_logger` and reported the same way.
pub fn init(path: Option<&Path>, level: LevelFilter) -> Result<(), Status> {
    if let Some(path) = path {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|_| Status::LogFileError)?;
        *LOGGER.file.lock().unwrap() = Some(file);
    }

    *LOGGER.start.lock().unwrap() = Some(Instant::now());

    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(level))
        .map_err(|_| Status::LogFileError)
}

/// Set the maximum log level
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

/// Parse a verbosity name from the CLI or the config file
///
/// Accepted names: `quiet`, `error`, `warning`, `info`, `debug`, `all`.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.to_ascii_lowercase().as_str() {
        "quiet" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warning" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "all" => Some(LevelFilter::Trace),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names() {
        assert_eq!(parse_level("quiet"), Some(LevelFilter::Off));
        assert_eq!(parse_level("WARNING"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("all"), Some(LevelFilter::Trace));
        assert_eq!(parse_level("verbose"), None);
    }
}
