//! Read-back handle used by the verify phase

use crate::{
    align_up, drop_cache, is_aligned, map_open_error, open_uncached, resident_fraction,
    AlignedBuffer, CacheStrategy, OpenOptions, Result,
};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// A test file opened for verification with the page cache bypassed where possible.
///
/// The uncached handle is tried first. If the platform or filesystem refuses it
/// (tmpfs, some network filesystems), the file is opened buffered, flushed and
/// its cached pages are evicted before the first read.
pub struct ReadBackFile {
    file: File,
    path: PathBuf,
    strategy: CacheStrategy,
    block_size: usize,
    buffer: AlignedBuffer,
}

impl ReadBackFile {
    /// Open `path` for read-back
    pub fn open(path: &Path, options: &OpenOptions) -> Result<Self> {
        let block_size = options.block_size.max(512);
        let capacity = align_up(options.buffer_size.max(block_size), block_size);

        if options.direct_io {
            match open_uncached(path) {
                Ok(file) => {
                    tracing::debug!("Opened {} with direct I/O", path.display());
                    return Ok(Self {
                        file,
                        path: path.to_path_buf(),
                        strategy: CacheStrategy::Direct,
                        block_size,
                        buffer: AlignedBuffer::new(capacity, block_size),
                    });
                }
                Err(e) => {
                    tracing::debug!(
                        "Direct I/O unavailable for {}: {}; falling back to cache drop",
                        path.display(),
                        e
                    );
                }
            }
        }

        let file = File::open(path).map_err(|e| map_open_error(path, e))?;
        let strategy = match drop_cache(&file) {
            Ok(()) => {
                let len = file.metadata().map(|m| m.len()).unwrap_or(0);
                CacheStrategy::DroppedCache {
                    resident: resident_fraction(&file, len),
                }
            }
            Err(e) => {
                tracing::warn!("Could not drop cache for {}: {}", path.display(), e);
                CacheStrategy::Buffered
            }
        };

        Ok(Self {
            file,
            path: path.to_path_buf(),
            strategy,
            block_size,
            buffer: AlignedBuffer::new(capacity, block_size),
        })
    }

    /// How this handle avoids cached pages
    pub fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    /// Path of the open file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the file in bytes
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Whether the file is empty
    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Read up to `len` bytes at `offset`.
    ///
    /// Returns the bytes actually read. A slice shorter than `len` means the
    /// file ended early; the caller decides whether that is an error.
    pub fn read_chunk(&mut self, offset: u64, len: usize) -> io::Result<&[u8]> {
        if len > self.buffer.capacity() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "read of {} bytes exceeds buffer of {} bytes",
                    len,
                    self.buffer.capacity()
                ),
            ));
        }

        let direct = self.strategy == CacheStrategy::Direct;
        if direct && !is_aligned(offset as usize, self.block_size) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "offset {} is not aligned to block size {}",
                    offset, self.block_size
                ),
            ));
        }

        // Uncached reads must cover whole blocks; the tail past `len` is discarded.
        let request = if direct {
            align_up(len, self.block_size)
        } else {
            len
        };

        self.file.seek(SeekFrom::Start(offset))?;
        let buf = self.buffer.as_mut_slice(request);
        let mut filled = 0;
        while filled < len {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => {
                    filled += n;
                    if direct && !is_aligned(filled, self.block_size) {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(self.buffer.as_slice(filled.min(len)))
    }
}
