//! Helpers shared by the unix platforms
//!
//! `statvfs` for free space and block size, `mmap` + `mincore` for page-cache
//! residency. Also the fallback platform for unixes without an uncached open.

use crate::{PlatformError, Result};
use std::ffi::CString;
use std::fs::File;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Largest prefix of a file probed for residency (keeps the `mincore` vector small)
const RESIDENCY_PROBE_LIMIT: u64 = 1024 * 1024 * 1024;

fn statvfs(path: &Path) -> std::io::Result<libc::statvfs> {
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Invalid path for CString: {}", e),
        )
    })?;

    // SAFETY: statvfs is plain old data; all-zero is a valid bit pattern.
    #[allow(unsafe_code)]
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };

    // SAFETY: c_path is a valid NUL-terminated string and stat is a valid,
    // writable statvfs for the duration of the call.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(stat)
}

/// Free bytes available to unprivileged users
#[allow(clippy::unnecessary_cast)]
pub(crate) fn free_space(path: &Path) -> Result<u64> {
    let stat = statvfs(path).map_err(|source| PlatformError::SpaceQuery {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

/// Preferred I/O block size
#[allow(clippy::unnecessary_cast)]
pub(crate) fn block_size(path: &Path) -> Result<u32> {
    let stat = statvfs(path)?;
    Ok(stat.f_bsize as u32)
}

/// Fraction of the first `len` bytes of `file` resident in the page cache
pub(crate) fn resident_fraction(file: &File, len: u64) -> Option<f64> {
    let len = usize::try_from(len.min(RESIDENCY_PROBE_LIMIT)).ok()?;
    if len == 0 {
        return Some(0.0);
    }

    // SAFETY: sysconf has no preconditions.
    #[allow(unsafe_code)]
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page <= 0 {
        return None;
    }
    let pages = len.div_ceil(page as usize);
    let mut residency = vec![0u8; pages];

    // SAFETY: maps `len` bytes of a valid fd read-only; the mapping is only
    // inspected with mincore (never dereferenced) and unmapped below.
    #[allow(unsafe_code)]
    let addr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return None;
    }

    // SAFETY: addr/len describe the live mapping created above and
    // `residency` holds one entry per page of that range.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::mincore(addr, len, residency.as_mut_ptr().cast()) };

    // SAFETY: addr/len are exactly the mapping returned by mmap.
    #[allow(unsafe_code)]
    unsafe {
        libc::munmap(addr, len);
    }

    if rc != 0 {
        return None;
    }
    let resident = residency.iter().filter(|&&b| b & 1 != 0).count();
    Some(resident as f64 / pages as f64)
}

/// Platform for unixes without a known uncached open
#[allow(dead_code)]
pub struct GenericUnixPlatform;

impl crate::PlatformOps for GenericUnixPlatform {
    fn open_uncached(_path: &Path) -> Result<File> {
        Err(PlatformError::NotSupported(
            "uncached reads are not available on this platform".to_string(),
        ))
    }

    fn drop_cache(file: &File) -> Result<()> {
        file.sync_all()?;
        Err(PlatformError::NotSupported(
            "page cache eviction is not available on this platform".to_string(),
        ))
    }

    fn resident_fraction(file: &File, len: u64) -> Option<f64> {
        resident_fraction(file, len)
    }

    fn free_space(path: &Path) -> Result<u64> {
        free_space(path)
    }

    fn block_size(path: &Path) -> Result<u32> {
        block_size(path)
    }
}
