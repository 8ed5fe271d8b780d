//! Error types for the disktest core library

use disktest_platform::{classify_io_error, IoErrorClass, PlatformError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for disktest operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid size, path or pattern selection
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// File index outside the filename budget
    #[error("File index {index} out of range (maximum {max})")]
    IndexOutOfRange {
        /// Requested 0-based index
        index: usize,
        /// Largest accepted index
        max: usize,
    },

    /// Not enough capacity for the requested run
    #[error("Insufficient space: {required} bytes requested, {available} bytes available")]
    InsufficientSpace {
        /// Bytes the run needs
        required: u64,
        /// Free bytes plus bytes of files that would be overwritten
        available: u64,
    },

    /// The free-space query failed
    #[error("Cannot query free space at {}: {source}", path.display())]
    SpaceQuery {
        /// Path that was queried
        path: PathBuf,
        /// Underlying platform error
        #[source]
        source: PlatformError,
    },

    /// Session file exists but cannot be used
    #[error("Session file {} is corrupt: {reason}", path.display())]
    SessionCorrupt {
        /// Session file path
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// A session already exists for the target directory
    #[error("A session already exists at {}; resume it or discard it first", path.display())]
    SessionActive {
        /// Session file path
        path: PathBuf,
    },

    /// Write failed for a reason that does not end the run
    #[error("Write failed on {} at offset {offset}: {source}", path.display())]
    IoWrite {
        /// File being written
        path: PathBuf,
        /// Byte offset within the file
        offset: u64,
        /// Underlying error
        source: std::io::Error,
    },

    /// Read failed for a reason that does not end the run
    #[error("Read failed on {} at offset {offset}: {source}", path.display())]
    IoRead {
        /// File being read
        path: PathBuf,
        /// Byte offset within the file
        offset: u64,
        /// Underlying error
        source: std::io::Error,
    },

    /// Fewer bytes came back than were requested
    #[error(
        "Short read on {} at offset {offset}: expected {expected} bytes, got {actual}",
        path.display()
    )]
    ShortRead {
        /// File being read
        path: PathBuf,
        /// Byte offset within the file
        offset: u64,
        /// Bytes requested
        expected: usize,
        /// Bytes returned
        actual: usize,
    },

    /// The filesystem ran out of space
    #[error("Disk full while writing {} at offset {offset}", path.display())]
    DiskFull {
        /// File being written
        path: PathBuf,
        /// Byte offset within the file
        offset: u64,
        /// Underlying error
        source: std::io::Error,
    },

    /// The drive reported an I/O error or disappeared
    #[error("Drive unavailable while accessing {} at offset {offset}: {source}", path.display())]
    DriveUnavailable {
        /// File being accessed
        path: PathBuf,
        /// Byte offset within the file
        offset: u64,
        /// Underlying error
        source: std::io::Error,
    },

    /// Data read back differs from the pattern that was written
    #[error(
        "Verification mismatch in {} at offset {offset}: expected 0x{expected:02X}, got 0x{actual:02X}",
        path.display()
    )]
    VerificationMismatch {
        /// File being verified
        path: PathBuf,
        /// Byte offset within the file of the first differing byte
        offset: u64,
        /// Expected byte value
        expected: u8,
        /// Actual byte value
        actual: u8,
    },

    /// Platform layer error
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// IO error outside the run loop
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Persistent settings error
    #[error("Settings error: {0}")]
    Settings(#[from] crate::settings::SettingsError),
}

impl Error {
    /// Whether this error ends the run.
    ///
    /// Out-of-space and drive failures abort; everything else is recorded and
    /// the run moves on to the next chunk or file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::DiskFull { .. } | Error::DriveUnavailable { .. })
    }
}

/// Classify an error returned while writing a test file
pub fn classify_write_error(path: &Path, offset: u64, source: std::io::Error) -> Error {
    let path = path.to_path_buf();
    match classify_io_error(&source) {
        IoErrorClass::StorageFull => Error::DiskFull {
            path,
            offset,
            source,
        },
        IoErrorClass::DeviceGone => Error::DriveUnavailable {
            path,
            offset,
            source,
        },
        IoErrorClass::Other => Error::IoWrite {
            path,
            offset,
            source,
        },
    }
}

/// Classify an error returned while reading a test file back
pub fn classify_read_error(path: &Path, offset: u64, source: std::io::Error) -> Error {
    let path = path.to_path_buf();
    match classify_io_error(&source) {
        IoErrorClass::DeviceGone => Error::DriveUnavailable {
            path,
            offset,
            source,
        },
        IoErrorClass::StorageFull | IoErrorClass::Other => Error::IoRead {
            path,
            offset,
            source,
        },
    }
}

/// Result type alias using the disktest error type
pub type Result<T> = std::result::Result<T, Error>;
