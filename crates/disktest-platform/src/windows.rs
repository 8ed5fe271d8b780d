//! Windows platform implementation
//!
//! FILE_FLAG_NO_BUFFERING gives uncached reads (sector-aligned buffers,
//! offsets and lengths required). Windows exposes no per-file cache
//! eviction, so the fallback only flushes the file buffers.

use crate::{map_open_error, PlatformError, PlatformOps, Result, DEFAULT_BLOCK_SIZE};
use std::fs::{File, OpenOptions as StdOpenOptions};
use std::os::windows::ffi::OsStrExt;
use std::os::windows::fs::OpenOptionsExt;
use std::path::Path;
use windows_sys::Win32::Storage::FileSystem::{GetDiskFreeSpaceExW, FILE_FLAG_NO_BUFFERING};

/// Windows platform implementation
pub struct WindowsPlatform;

impl PlatformOps for WindowsPlatform {
    fn open_uncached(path: &Path) -> Result<File> {
        StdOpenOptions::new()
            .read(true)
            .custom_flags(FILE_FLAG_NO_BUFFERING)
            .open(path)
            .map_err(|e| map_open_error(path, e))
    }

    fn drop_cache(file: &File) -> Result<()> {
        file.sync_all()?;
        Err(PlatformError::NotSupported(
            "Windows cannot evict cached pages of a single file".to_string(),
        ))
    }

    fn resident_fraction(_file: &File, _len: u64) -> Option<f64> {
        None
    }

    fn free_space(path: &Path) -> Result<u64> {
        let mut wide: Vec<u16> = path.as_os_str().encode_wide().collect();
        wide.push(0);

        let mut free_to_caller: u64 = 0;
        // SAFETY: `wide` is NUL-terminated and outlives the call; the output
        // pointer refers to a live u64, the two optional outputs are null.
        #[allow(unsafe_code)]
        let ok = unsafe {
            GetDiskFreeSpaceExW(
                wide.as_ptr(),
                &mut free_to_caller,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(PlatformError::SpaceQuery {
                path: path.to_path_buf(),
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(free_to_caller)
    }

    fn block_size(_path: &Path) -> Result<u32> {
        Ok(DEFAULT_BLOCK_SIZE as u32)
    }
}
