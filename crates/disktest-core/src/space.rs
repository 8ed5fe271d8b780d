//! Disk-space accounting for run preflight
//!
//! Fresh starts and resumes with a larger total size go through the same
//! [`SpaceAccountant::ensure`] call, so both paths accept or reject a request
//! identically: `available = free + size of files the run would overwrite`.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Source of OS free-space figures
pub trait FreeSpace {
    /// Free bytes on the filesystem holding `path`
    fn free_bytes(&self, path: &Path) -> Result<u64>;
}

/// Free space as reported by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemFreeSpace;

impl FreeSpace for SystemFreeSpace {
    fn free_bytes(&self, path: &Path) -> Result<u64> {
        // The target directory may not exist yet; ask its nearest ancestor.
        let probe = nearest_existing(path);
        disktest_platform::free_space(&probe).map_err(|source| Error::SpaceQuery {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn nearest_existing(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.to_path_buf())
}

/// Breakdown of the capacity available to a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceReport {
    /// OS-reported free bytes
    pub free: u64,
    /// Bytes held by test files the run will overwrite
    pub reusable: u64,
    /// `free + reusable`
    pub available: u64,
}

/// Computes available capacity for a prospective run
#[derive(Debug, Clone, Default)]
pub struct SpaceAccountant<F = SystemFreeSpace> {
    source: F,
}

impl SpaceAccountant<SystemFreeSpace> {
    /// Accountant backed by the OS free-space query
    pub fn new() -> Self {
        Self {
            source: SystemFreeSpace,
        }
    }
}

impl<F: FreeSpace> SpaceAccountant<F> {
    /// Accountant backed by a custom free-space source
    pub fn with_source(source: F) -> Self {
        Self { source }
    }

    /// Capacity at `path` given `existing_relevant` bytes of overwritable files
    pub fn available(&self, path: &Path, existing_relevant: u64) -> Result<SpaceReport> {
        let free = self.source.free_bytes(path)?;
        Ok(SpaceReport {
            free,
            reusable: existing_relevant,
            available: free.saturating_add(existing_relevant),
        })
    }

    /// Fail with `InsufficientSpace` unless `requested` bytes fit
    pub fn ensure(&self, path: &Path, existing_relevant: u64, requested: u64) -> Result<SpaceReport> {
        let report = self.available(path, existing_relevant)?;
        if requested > report.available {
            return Err(Error::InsufficientSpace {
                required: requested,
                available: report.available,
            });
        }
        tracing::debug!(
            "Space check passed: {} requested, {} free + {} reusable",
            requested,
            report.free,
            report.reusable
        );
        Ok(report)
    }
}

impl<F: FreeSpace + ?Sized> FreeSpace for &F {
    fn free_bytes(&self, path: &Path) -> Result<u64> {
        (**self).free_bytes(path)
    }
}

impl<F: FreeSpace + ?Sized> FreeSpace for Box<F> {
    fn free_bytes(&self, path: &Path) -> Result<u64> {
        (**self).free_bytes(path)
    }
}
