//! macOS platform implementation
//!
//! macOS has no O_DIRECT; F_NOCACHE on the descriptor turns off data caching
//! for reads through it. There is no per-file eviction call, so the fallback
//! path does a full flush (F_FULLFSYNC) and then sets F_NOCACHE on the buffered handle.

use crate::{map_open_error, unix, PlatformError, PlatformOps, Result};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// macOS platform implementation
pub struct MacOSPlatform;

impl PlatformOps for MacOSPlatform {
    fn open_uncached(path: &Path) -> Result<File> {
        let file = File::open(path).map_err(|e| map_open_error(path, e))?;
        set_nocache(&file)?;
        Ok(file)
    }

    fn drop_cache(file: &File) -> Result<()> {
        full_fsync(file)?;
        set_nocache(file)
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

/// Set F_NOCACHE on a file descriptor
fn set_nocache(file: &File) -> Result<()> {
    // SAFETY: fcntl with F_NOCACHE takes an int argument and a valid fd
    // owned by `file`.
    #[allow(unsafe_code)]
    let result = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_NOCACHE, 1) };
    if result == -1 {
        Err(PlatformError::Io(std::io::Error::last_os_error()))
    } else {
        Ok(())
    }
}

/// Flush all the way to the media; fsync alone stops at the drive cache
fn full_fsync(file: &File) -> Result<()> {
    // SAFETY: fcntl with F_FULLFSYNC takes no argument and a valid fd.
    #[allow(unsafe_code)]
    let result = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_FULLFSYNC) };
    if result == -1 {
        // Some filesystems (e.g. network shares) reject F_FULLFSYNC.
        file.sync_all()?;
    }
    Ok(())
}
