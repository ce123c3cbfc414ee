//! Status code taxonomy
//!
//! Every fallible operation in the crate reports one of these codes. The
//! binaries map them directly onto process exit codes, so the set and the
//! numbering are stable.

use std::io;

use thiserror::Error;

/// Result alias used throughout the library.
pub type LedResult<T> = Result<T, Status>;

/// Closed set of status codes.
///
/// The discriminants double as process exit codes (`Status::exit_code`).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
    #[error("success")]
    Success = 0,
    #[error("buffer overflow")]
    BufferOverflow = 1,
    #[error("null pointer")]
    NullPointer = 2,
    #[error("out of memory")]
    OutOfMemory = 3,
    #[error("out of range")]
    OutOfRange = 4,
    #[error("invalid node")]
    InvalidNode = 5,
    #[error("data error")]
    DataError = 6,
    #[error("unable to determine IBPI pattern")]
    IbpiDetermineError = 7,
    #[error("invalid path")]
    InvalidPath = 8,
    #[error("invalid subopton")]
    InvalidSuboption = 9,
    #[error("invalid state")]
    InvalidState = 10,
    #[error("size error")]
    SizeError = 11,
    #[error("file open error")]
    FileOpenError = 12,
    #[error("file read error")]
    FileReadError = 13,
    #[error("file write error")]
    FileWriteError = 14,
    #[error("file lock error")]
    FileLockError = 15,
    #[error("directory open error")]
    DirOpenError = 16,
    #[error("sysfs path error")]
    SysfsPathError = 17,
    #[error("sysfs init error")]
    SysfsInitError = 18,
    #[error("sysfs scan error")]
    SysfsScanError = 19,
    #[error("sysfs reset error")]
    SysfsResetError = 20,
    #[error("list is empty")]
    ListEmpty = 21,
    #[error("list init error")]
    ListInitError = 22,
    #[error("block device list error")]
    BlockListError = 23,
    #[error("volume list error")]
    VolumeListError = 24,
    #[error("controller list error")]
    CntrlListError = 25,
    #[error("slave device list error")]
    SlaveListError = 26,
    #[error("container list error")]
    CntnrListError = 27,
    #[error("invalid format")]
    InvalidFormat = 28,
    #[error("monitor initialization error")]
    LedmonInit = 29,
    #[error("monitor already running")]
    LedmonRunning = 30,
    #[error("on-exit handler error")]
    OnexitError = 31,
    #[error("invalid controller")]
    InvalidController = 32,
    #[error("not supported")]
    NotSupported = 33,
    #[error("stat error")]
    StatError = 34,
    #[error("command line error")]
    CmdlineError = 35,
    #[error("not a privileged user")]
    NotAPrivilegedUser = 36,
    #[error("enclosure list error")]
    EncloListError = 37,
    #[error("slot list error")]
    SlotsListError = 38,
    #[error("configuration file error")]
    ConfigFileError = 39,
    #[error("log file error")]
    LogFileError = 40,
}

impl Status {
    /// Process exit code for this status.
    pub fn exit_code(self) -> i32 {
        self as i32
    }
}

impl From<io::Error> for Status {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Status::InvalidPath,
            io::ErrorKind::PermissionDenied => Status::FileOpenError,
            io::ErrorKind::InvalidData => Status::DataError,
            io::ErrorKind::UnexpectedEof => Status::SizeError,
            // EAGAIN-style conditions: the caller retries on the next tick.
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Status::DataError,
            _ => Status::FileReadError,
        }
    }
}
