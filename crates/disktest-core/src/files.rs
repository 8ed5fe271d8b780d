//! Test file naming and management
//!
//! Test files live directly in the target directory as `disktest_NNN.dat`,
//! where `NNN` is the 1-based index padded to three digits. Everything inside
//! the crate uses the 0-based index; only [`file_name`] and
//! [`parse_file_index`] cross between the two.

use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Filename prefix of every test file
pub const FILE_PREFIX: &str = "disktest_";

/// Filename extension of every test file
pub const FILE_EXTENSION: &str = "dat";

/// Largest accepted 0-based file index
pub const MAX_FILE_INDEX: usize = 999;

/// Largest accepted per-file size (10 TiB)
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024 * 1024 * 1024;

/// Largest accepted total run size (100 TiB)
pub const MAX_TOTAL_SIZE: u64 = 100 * 1024 * 1024 * 1024 * 1024;

/// Filename for 0-based index `index`
pub fn file_name(index: usize) -> String {
    format!("{}{:03}.{}", FILE_PREFIX, index + 1, FILE_EXTENSION)
}

/// Parse a test filename back to its 0-based index.
///
/// Returns `None` for anything that is not a test file, including the
/// never-issued `disktest_000.dat`.
pub fn parse_file_index(name: &str) -> Option<usize> {
    let digits = name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_EXTENSION)?
        .strip_suffix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let display: usize = digits.parse().ok()?;
    display.checked_sub(1)
}

/// A test file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFileEntry {
    /// 0-based index
    pub index: usize,
    /// Full path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
}

/// Maps file indices to paths and manages the test files of one directory
#[derive(Debug, Clone)]
pub struct FileManager {
    dir: PathBuf,
    file_size: u64,
}

impl FileManager {
    /// Create a manager for `dir` with the given per-file size
    pub fn new(dir: impl Into<PathBuf>, file_size: u64) -> Result<Self> {
        if file_size == 0 || file_size > MAX_FILE_SIZE {
            return Err(Error::InvalidConfig(format!(
                "file size must be between 1 byte and 10 TiB, got {} bytes",
                file_size
            )));
        }
        Ok(Self {
            dir: dir.into(),
            file_size,
        })
    }

    /// Target directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Per-file size in bytes
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Number of files needed for `total_size`: `max(1, floor(total / file_size))`
    pub fn file_count_for(&self, total_size: u64) -> Result<usize> {
        if total_size == 0 || total_size > MAX_TOTAL_SIZE {
            return Err(Error::InvalidConfig(format!(
                "total size must be between 1 byte and 100 TiB, got {} bytes",
                total_size
            )));
        }
        let count = (total_size / self.file_size).max(1);
        if count > (MAX_FILE_INDEX + 1) as u64 {
            return Err(Error::InvalidConfig(format!(
                "{} files requested, at most {} are supported; increase the file size",
                count,
                MAX_FILE_INDEX + 1
            )));
        }
        Ok(count as usize)
    }

    /// Path of the file with 0-based `index`
    pub fn path_for(&self, index: usize) -> Result<PathBuf> {
        if index > MAX_FILE_INDEX {
            return Err(Error::IndexOutOfRange {
                index,
                max: MAX_FILE_INDEX,
            });
        }
        Ok(self.dir.join(file_name(index)))
    }

    /// All test files in the directory, sorted by index.
    ///
    /// A missing directory yields an empty list.
    pub fn list_files(&self) -> Result<Vec<TestFileEntry>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(index) = name.to_str().and_then(parse_file_index) else {
                continue;
            };
            match entry.metadata() {
                Ok(meta) if meta.is_file() => files.push(TestFileEntry {
                    index,
                    path: entry.path(),
                    size: meta.len(),
                }),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Cannot stat {}: {}", entry.path().display(), e);
                }
            }
        }
        files.sort_by_key(|f| f.index);
        Ok(files)
    }

    /// Total size of every test file in the directory
    pub fn existing_files_size(&self) -> Result<u64> {
        Ok(self.list_files()?.iter().map(|f| f.size).sum())
    }

    /// Total size of the files a run over `file_count` files would overwrite
    pub fn relevant_files_size(&self, file_count: usize) -> Result<u64> {
        Ok(self
            .list_files()?
            .iter()
            .filter(|f| f.index < file_count)
            .map(|f| f.size)
            .sum())
    }

    /// Whether any test file exists
    pub fn has_files(&self) -> bool {
        self.list_files().is_ok_and(|files| !files.is_empty())
    }

    /// Delete every test file. Returns `(deleted, failed)` and never errors.
    pub fn delete_all(&self) -> (usize, usize) {
        let files = match self.list_files() {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!("Cannot list {}: {}", self.dir.display(), e);
                return (0, 1);
            }
        };

        let mut deleted = 0;
        let mut failed = 0;
        for file in files {
            match fs::remove_file(&file.path) {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::warn!("Failed to delete {}: {}", file.path.display(), e);
                    failed += 1;
                }
            }
        }
        tracing::info!("Deleted {} test files ({} failed)", deleted, failed);
        (deleted, failed)
    }
}
