//! # Disktest Platform
//!
//! Platform adapters for the parts of a filesystem-level media test that the
//! standard library cannot express portably:
//!
//! - opening a test file so reads bypass the OS page cache
//!   (`O_DIRECT` on Linux, `F_NOCACHE` on macOS, `FILE_FLAG_NO_BUFFERING` on Windows)
//! - dropping cached pages of a file that was just written (`posix_fadvise`)
//! - probing how much of a file is still resident in the page cache (`mincore`)
//! - querying free space on the filesystem holding the test directory
//! - classifying OS error codes into "storage full" and "device gone"
//!
//! The run loop only talks to [`ReadBackFile`], which picks the uncached path
//! first and falls back to a buffered read after an explicit cache drop.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod readback;

#[cfg(unix)]
mod unix;

pub use readback::ReadBackFile;

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Access to the file or directory was denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// File or directory not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation not supported on this platform or filesystem
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Alignment error for direct I/O
    #[error("Alignment error: {0}")]
    AlignmentError(String),

    /// Free-space query failed
    #[error("Cannot query free space at {}: {source}", path.display())]
    SpaceQuery {
        /// Path that was queried
        path: PathBuf,
        /// Underlying OS error
        source: std::io::Error,
    },
}

/// Result type for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Alignment used for uncached reads when nothing better is known
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Options for opening a file for read-back
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Try to bypass the page cache
    pub direct_io: bool,

    /// Alignment for offsets, lengths and buffers (typically 512 or 4096)
    pub block_size: usize,

    /// Largest single read the caller will request
    pub buffer_size: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            direct_io: true,
            block_size: DEFAULT_BLOCK_SIZE,
            buffer_size: 4 * 1024 * 1024,
        }
    }
}

impl OpenOptions {
    /// Create new options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set direct I/O mode
    pub fn direct_io(mut self, direct: bool) -> Self {
        self.direct_io = direct;
        self
    }

    /// Set block size for alignment
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Set the size of the read buffer
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }
}

/// How a read-back file avoids returning pages cached by the preceding write
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CacheStrategy {
    /// Uncached handle; reads go to the media
    Direct,

    /// Buffered handle after flushing and dropping the file's cached pages.
    /// `resident` is the fraction of pages still cached after the drop, when
    /// the platform can measure it.
    DroppedCache {
        /// Fraction of probed pages still resident (0.0 to 1.0)
        resident: Option<f64>,
    },

    /// Plain buffered reads; the cache could not be dropped
    Buffered,
}

impl CacheStrategy {
    /// Whether reads are expected to reach the media
    pub fn bypasses_cache(&self) -> bool {
        match self {
            CacheStrategy::Direct => true,
            CacheStrategy::DroppedCache { resident } => resident.is_none_or(|r| r < 0.01),
            CacheStrategy::Buffered => false,
        }
    }
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStrategy::Direct => write!(f, "direct I/O"),
            CacheStrategy::DroppedCache {
                resident: Some(fraction),
            } => write!(
                f,
                "cache dropped ({:.1}% still resident)",
                fraction * 100.0
            ),
            CacheStrategy::DroppedCache { resident: None } => write!(f, "cache dropped"),
            CacheStrategy::Buffered => write!(f, "buffered"),
        }
    }
}

/// Coarse classification of an OS I/O error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoErrorClass {
    /// No space left on the filesystem (or quota exceeded)
    StorageFull,

    /// Device I/O error or the device disappeared
    DeviceGone,

    /// Anything else
    Other,
}

/// Classify an I/O error by its OS error code
pub fn classify_io_error(err: &io::Error) -> IoErrorClass {
    if err.kind() == io::ErrorKind::StorageFull {
        return IoErrorClass::StorageFull;
    }
    match err.raw_os_error() {
        Some(code) => classify_os_code(code),
        None => IoErrorClass::Other,
    }
}

#[cfg(unix)]
fn classify_os_code(code: i32) -> IoErrorClass {
    match code {
        libc::ENOSPC | libc::EDQUOT => IoErrorClass::StorageFull,
        libc::EIO | libc::ENODEV | libc::ENXIO => IoErrorClass::DeviceGone,
        _ => IoErrorClass::Other,
    }
}

#[cfg(windows)]
fn classify_os_code(code: i32) -> IoErrorClass {
    const ERROR_NOT_READY: i32 = 21;
    const ERROR_CRC: i32 = 23;
    const ERROR_HANDLE_DISK_FULL: i32 = 39;
    const ERROR_DEV_NOT_EXIST: i32 = 55;
    const ERROR_DISK_FULL: i32 = 112;
    const ERROR_IO_DEVICE: i32 = 1117;
    const ERROR_DEVICE_NOT_CONNECTED: i32 = 1167;

    match code {
        ERROR_DISK_FULL | ERROR_HANDLE_DISK_FULL => IoErrorClass::StorageFull,
        ERROR_NOT_READY | ERROR_CRC | ERROR_DEV_NOT_EXIST | ERROR_IO_DEVICE
        | ERROR_DEVICE_NOT_CONNECTED => IoErrorClass::DeviceGone,
        _ => IoErrorClass::Other,
    }
}

#[cfg(not(any(unix, windows)))]
fn classify_os_code(_code: i32) -> IoErrorClass {
    IoErrorClass::Other
}

/// Platform operations interface
pub trait PlatformOps {
    /// Open a file read-only with the page cache bypassed
    fn open_uncached(path: &Path) -> Result<File>;

    /// Flush a file's dirty pages and ask the OS to evict its cached pages
    fn drop_cache(file: &File) -> Result<()>;

    /// Fraction of the first `len` bytes of a file that is resident in the page cache
    fn resident_fraction(file: &File, len: u64) -> Option<f64>;

    /// Free bytes available to the current user on the filesystem holding `path`
    fn free_space(path: &Path) -> Result<u64>;

    /// Preferred I/O block size of the filesystem holding `path`
    fn block_size(path: &Path) -> Result<u32>;
}

/// Map an error from opening a file to a platform error
pub(crate) fn map_open_error(path: &Path, err: io::Error) -> PlatformError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            PlatformError::PermissionDenied(format!("{}: {}", path.display(), err))
        }
        io::ErrorKind::NotFound => PlatformError::NotFound(path.display().to_string()),
        io::ErrorKind::InvalidInput => PlatformError::NotSupported(format!(
            "uncached open of {} rejected: {}",
            path.display(),
            err
        )),
        _ => PlatformError::Io(err),
    }
}

/// Align a value up to the given alignment
#[inline]
pub fn align_up(value: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}

/// Align a value down to the given alignment
#[inline]
pub fn align_down(value: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return value;
    }
    value & !(alignment - 1)
}

/// Check if a value is aligned to the given alignment
#[allow(clippy::manual_is_multiple_of)]
#[inline]
pub fn is_aligned(value: usize, alignment: usize) -> bool {
    if alignment == 0 {
        return true;
    }
    value % alignment == 0
}

/// Heap buffer whose usable region starts on an aligned address.
///
/// Allocates `capacity + alignment` bytes and hands out the aligned window.
/// The backing `Vec` is never resized, so the window stays valid.
pub struct AlignedBuffer {
    data: Vec<u8>,
    offset: usize,
    capacity: usize,
}

impl AlignedBuffer {
    /// Allocate a zeroed buffer of `capacity` usable bytes aligned to `alignment`
    pub fn new(capacity: usize, alignment: usize) -> Self {
        let alignment = alignment.max(1);
        let data = vec![0u8; capacity + alignment];
        let base = data.as_ptr() as usize;
        let offset = align_up(base, alignment) - base;
        Self {
            data,
            offset,
            capacity,
        }
    }

    /// Usable size in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The first `len` usable bytes (clamped to capacity)
    pub fn as_slice(&self, len: usize) -> &[u8] {
        let len = len.min(self.capacity);
        &self.data[self.offset..self.offset + len]
    }

    /// The first `len` usable bytes, mutably (clamped to capacity)
    pub fn as_mut_slice(&mut self, len: usize) -> &mut [u8] {
        let len = len.min(self.capacity);
        &mut self.data[self.offset..self.offset + len]
    }
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod linux;
        pub use linux::LinuxPlatform as Platform;
    } else if #[cfg(target_os = "macos")] {
        mod macos;
        pub use macos::MacOSPlatform as Platform;
    } else if #[cfg(target_os = "windows")] {
        mod windows;
        pub use windows::WindowsPlatform as Platform;
    } else if #[cfg(unix)] {
        pub use unix::GenericUnixPlatform as Platform;
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(unix, target_os = "windows"))] {
        /// Open a file read-only with the page cache bypassed
        pub fn open_uncached(path: &Path) -> Result<File> {
            Platform::open_uncached(path)
        }

        /// Flush a file and evict its pages from the page cache
        pub fn drop_cache(file: &File) -> Result<()> {
            Platform::drop_cache(file)
        }

        /// Fraction of a file's first `len` bytes that is still cached
        pub fn resident_fraction(file: &File, len: u64) -> Option<f64> {
            Platform::resident_fraction(file, len)
        }

        /// Free bytes available on the filesystem holding `path`
        pub fn free_space(path: &Path) -> Result<u64> {
            Platform::free_space(path)
        }

        /// Preferred I/O block size of the filesystem holding `path`
        pub fn block_size(path: &Path) -> Result<u32> {
            Platform::block_size(path)
        }
    } else {
        /// Open a file uncached (unsupported platform)
        pub fn open_uncached(_path: &Path) -> Result<File> {
            Err(PlatformError::NotSupported("Platform not supported".to_string()))
        }

        /// Drop cached pages (unsupported platform): flushes only
        pub fn drop_cache(file: &File) -> Result<()> {
            file.sync_all()?;
            Err(PlatformError::NotSupported("Platform not supported".to_string()))
        }

        /// Residency probe (unsupported platform)
        pub fn resident_fraction(_file: &File, _len: u64) -> Option<f64> {
            None
        }

        /// Free space (unsupported platform)
        pub fn free_space(_path: &Path) -> Result<u64> {
            Err(PlatformError::NotSupported("Platform not supported".to_string()))
        }

        /// Block size (unsupported platform)
        pub fn block_size(_path: &Path) -> Result<u32> {
            Ok(DEFAULT_BLOCK_SIZE as u32)
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
