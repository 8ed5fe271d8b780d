//! Linux platform implementation
//!
//! Uses O_DIRECT for uncached reads and posix_fadvise(DONTNEED) to evict
//! pages left behind by the write phase.

use crate::{map_open_error, unix, PlatformError, PlatformOps, Result};
use std::fs::{File, OpenOptions as StdOpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Linux platform implementation
pub struct LinuxPlatform;

impl PlatformOps for LinuxPlatform {
    fn open_uncached(path: &Path) -> Result<File> {
        StdOpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECT)
            .open(path)
            .map_err(|e| map_open_error(path, e))
    }

    fn drop_cache(file: &File) -> Result<()> {
        // Dirty pages cannot be evicted; write them back first.
        file.sync_data()?;

        // SAFETY: posix_fadvise is called with a valid fd owned by `file`;
        // offset 0 / len 0 covers the whole file.
        #[allow(unsafe_code)]
        let rc = unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_DONTNEED) };
        if rc != 0 {
            return Err(PlatformError::Io(std::io::Error::from_raw_os_error(rc)));
        }
        Ok(())
    }

    fn resident_fraction(file: &File, len: u64) -> Option<f64> {
        unix::resident_fraction(file, len)
    }

    fn free_space(path: &Path) -> Result<u64> {
        unix::free_space(path)
    }

    fn block_size(path: &Path) -> Result<u32> {
        unix::block_size(path)
    }
}
