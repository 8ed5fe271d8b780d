//! Run configuration

use crate::files::{MAX_FILE_INDEX, MAX_FILE_SIZE, MAX_TOTAL_SIZE};
use crate::pattern::{canonical_order, PatternKind};
use crate::session::SessionState;
use crate::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default chunk size (32 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024 * 1024;

/// Chunk sizes must be a multiple of this (4 KiB)
pub const CHUNK_ALIGNMENT: usize = 4 * 1024;

/// Largest accepted chunk size (256 MiB)
pub const MAX_CHUNK_SIZE: usize = 256 * 1024 * 1024;

/// Default per-file size (1 GiB)
pub const DEFAULT_FILE_SIZE: u64 = 1024 * 1024 * 1024;

/// Progress events are emitted every this many chunks
pub const PROGRESS_INTERVAL_CHUNKS: u64 = 4;

/// Chunks slower than this produce a warning
pub const DEFAULT_SLOW_IO_THRESHOLD: Duration = Duration::from_secs(30);

/// Longest time between two session checkpoints inside a file
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration of one test run. Immutable once the engine is built.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Directory that receives the test files
    pub target_dir: PathBuf,

    /// Size of each test file in bytes
    pub file_size: u64,

    /// Total requested size in bytes
    pub total_size: u64,

    /// Selected patterns, canonical order, no duplicates
    pub patterns: Vec<PatternKind>,

    /// Chunk size in bytes
    pub chunk_size: usize,

    /// Continue from the session stored in the target directory
    pub resume: bool,

    /// Session to continue from instead of the stored one
    pub session: Option<SessionState>,

    /// Seed for the random pattern of a fresh run (drawn when `None`)
    pub seed: Option<u64>,

    /// Try uncached reads during verification
    pub direct_io: bool,

    /// Chunk duration that triggers a slow I/O warning
    pub slow_io_threshold: Duration,

    /// Longest time between checkpoints inside a file
    pub checkpoint_interval: Duration,
}

impl TestConfig {
    /// Configuration for `target_dir` with defaults: one 1 GiB file, every pattern
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            file_size: DEFAULT_FILE_SIZE,
            total_size: DEFAULT_FILE_SIZE,
            patterns: PatternKind::ALL.to_vec(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            resume: false,
            session: None,
            seed: None,
            direct_io: true,
            slow_io_threshold: DEFAULT_SLOW_IO_THRESHOLD,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }

    /// Set the per-file size
    pub fn file_size(mut self, size: u64) -> Self {
        self.file_size = size;
        self
    }

    /// Set the total requested size
    pub fn total_size(mut self, size: u64) -> Self {
        self.total_size = size;
        self
    }

    /// Set the pattern selection (sorted and deduplicated)
    pub fn patterns(mut self, patterns: &[PatternKind]) -> Self {
        self.patterns = canonical_order(patterns);
        self
    }

    /// Set the chunk size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Resume from the stored session
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Resume from an explicit session
    pub fn session(mut self, session: SessionState) -> Self {
        self.session = Some(session);
        self.resume = true;
        self
    }

    /// Continue from a session rebuilt from files left without one.
    ///
    /// The total size grows to the session's when that is larger, so files
    /// found past the configured count stay part of the run.
    pub fn recovered_session(mut self, session: SessionState) -> Self {
        self.total_size = self.total_size.max(session.total_size);
        self.session(session)
    }

    /// Fix the random seed of a fresh run
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Enable or disable uncached reads
    pub fn direct_io(mut self, direct: bool) -> Self {
        self.direct_io = direct;
        self
    }

    /// Set the slow I/O warning threshold
    pub fn slow_io_threshold(mut self, threshold: Duration) -> Self {
        self.slow_io_threshold = threshold;
        self
    }

    /// Set the longest interval between checkpoints
    pub fn checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Reject configurations that cannot start a run
    pub fn validate(&self) -> Result<()> {
        if self.target_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("target directory is empty".to_string()));
        }
        if self.file_size == 0 || self.file_size > MAX_FILE_SIZE {
            return Err(Error::InvalidConfig(format!(
                "file size must be between 1 byte and 10 TiB, got {} bytes",
                self.file_size
            )));
        }
        if self.total_size > MAX_TOTAL_SIZE {
            return Err(Error::InvalidConfig(format!(
                "total size must not exceed 100 TiB, got {} bytes",
                self.total_size
            )));
        }
        if self.total_size < self.file_size {
            return Err(Error::InvalidConfig(format!(
                "total size ({} bytes) is smaller than the file size ({} bytes)",
                self.total_size, self.file_size
            )));
        }
        if self.patterns.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one pattern must be selected".to_string(),
            ));
        }
        if self.chunk_size == 0
            || self.chunk_size % CHUNK_ALIGNMENT != 0
            || self.chunk_size > MAX_CHUNK_SIZE
        {
            return Err(Error::InvalidConfig(format!(
                "chunk size must be a multiple of 4 KiB between 4 KiB and 256 MiB, got {} bytes",
                self.chunk_size
            )));
        }
        self.file_count().map(|_| ())
    }

    /// Number of files in the run: `max(1, floor(total / file_size))`
    pub fn file_count(&self) -> Result<usize> {
        if self.file_size == 0 {
            return Err(Error::InvalidConfig("file size must be positive".to_string()));
        }
        let count = (self.total_size / self.file_size).max(1);
        if count > (MAX_FILE_INDEX + 1) as u64 {
            return Err(Error::InvalidConfig(format!(
                "{} files requested, at most {} are supported; increase the file size",
                count,
                MAX_FILE_INDEX + 1
            )));
        }
        Ok(count as usize)
    }

    /// Chunks needed to cover one file
    pub fn chunks_per_file(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size.max(1) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_config_default() {
        let config = TestConfig::new("/mnt/usb");
        assert_eq!(config.file_size, DEFAULT_FILE_SIZE);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.patterns.len(), 5);
        assert!(!config.resume);
        assert!(config.direct_io);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = TestConfig::new("/mnt/usb")
            .file_size(64 * MIB)
            .total_size(640 * MIB)
            .patterns(&[PatternKind::Random, PatternKind::Zero, PatternKind::Random])
            .chunk_size(4 * 1024 * 1024)
            .seed(7)
            .direct_io(false);

        assert_eq!(config.file_count().unwrap(), 10);
        assert_eq!(config.chunks_per_file(), 16);
        assert_eq!(config.patterns, vec![PatternKind::Zero, PatternKind::Random]);
        assert_eq!(config.seed, Some(7));
        assert!(!config.direct_io);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chunk_size_validation() {
        let base = TestConfig::new("/mnt/usb");
        assert!(base.clone().chunk_size(0).validate().is_err());
        assert!(base.clone().chunk_size(1000).validate().is_err());
        assert!(base.clone().chunk_size(MAX_CHUNK_SIZE + CHUNK_ALIGNMENT).validate().is_err());
        assert!(base.clone().chunk_size(CHUNK_ALIGNMENT).validate().is_ok());
        assert!(base.chunk_size(MAX_CHUNK_SIZE).validate().is_ok());
    }

    #[test]
    fn test_size_validation() {
        let base = TestConfig::new("/mnt/usb");
        assert!(base.clone().file_size(0).validate().is_err());
        assert!(base.clone().file_size(2 * MIB).total_size(MIB).validate().is_err());
        assert!(base.clone().patterns(&[]).validate().is_err());
        assert!(base.file_size(1).total_size(1001).validate().is_err());
        assert!(TestConfig::new("").validate().is_err());
    }

    #[test]
    fn test_file_count_floor() {
        let config = TestConfig::new("/mnt/usb")
            .file_size(100 * MIB)
            .total_size(250 * MIB);
        assert_eq!(config.file_count().unwrap(), 2);
    }

    #[test]
    fn test_recovered_session_grows_total_size() {
        let base = TestConfig::new("/mnt/usb")
            .file_size(100 * MIB)
            .total_size(200 * MIB);
        let mut session = SessionState::new(&base, 1).unwrap();
        session.total_size = 400 * MIB;
        session.file_count = 4;

        let grown = base.clone().recovered_session(session.clone());
        assert_eq!(grown.file_count().unwrap(), 4);
        assert!(grown.resume);

        // A larger configured size is kept
        let larger = base.total_size(600 * MIB).recovered_session(session);
        assert_eq!(larger.file_count().unwrap(), 6);
    }

    #[test]
    fn test_chunks_per_file_rounds_up() {
        let config = TestConfig::new("/mnt/usb")
            .file_size(10 * 4096 + 1)
            .chunk_size(4096);
        assert_eq!(config.chunks_per_file(), 11);
    }
}
