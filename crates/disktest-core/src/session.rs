//! Durable run progress
//!
//! A [`SessionState`] records where a run stands: pattern, phase, file and
//! chunk, plus the random seed and every recorded error. [`SessionStore`]
//! persists it as versioned JSON next to the test files. A save writes a
//! temporary file, syncs it, and renames it over the session file, so a crash
//! leaves either the previous session or the new one on disk.
//!
//! # Example
//!
//! ```ignore
//! use disktest_core::{SessionStore, SessionState, TestConfig};
//!
//! let config = TestConfig::new("/mnt/usb").total_size(8 << 30);
//! let store = SessionStore::for_dir(&config.target_dir);
//! let state = SessionState::new(&config, 42)?;
//! store.save(&state)?;
//! assert!(store.load()?.is_some());
//! ```

use crate::config::TestConfig;
use crate::pattern::PatternKind;
use crate::progress::{format_duration, WorkModel};
use crate::{Error, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Current version of the session format
pub const SESSION_VERSION: u32 = 1;

/// Session file name inside the target directory
pub const SESSION_FILE_NAME: &str = "disktest_session.json";

/// The two passes made over every file for each pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Files are being written
    Write,
    /// Files are being read back and compared
    Verify,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Write => f.write_str("Write"),
            Phase::Verify => f.write_str("Verify"),
        }
    }
}

/// One recorded problem. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// File name (e.g. `disktest_003.dat`)
    pub file: String,
    /// 0-based file index
    pub file_index: usize,
    /// Pattern in effect
    pub pattern: PatternKind,
    /// Phase in effect
    pub phase: Phase,
    /// Absolute byte offset within the file
    pub offset: Option<u64>,
    /// Byte offset within the chunk
    pub chunk_offset: Option<u64>,
    /// Expected byte value
    pub expected: Option<u8>,
    /// Byte value found
    pub actual: Option<u8>,
    /// Number of differing bytes in the chunk
    pub mismatched_bytes: Option<u64>,
    /// Human-readable cause
    pub cause: String,
    /// Whether this error ended the run
    pub fatal: bool,
    /// When the error was recorded
    pub timestamp: DateTime<Local>,
}

impl ErrorEntry {
    /// Entry without offset or byte detail
    pub fn new(
        file: impl Into<String>,
        file_index: usize,
        pattern: PatternKind,
        phase: Phase,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            file_index,
            pattern,
            phase,
            offset: None,
            chunk_offset: None,
            expected: None,
            actual: None,
            mismatched_bytes: None,
            cause: cause.into(),
            fatal: false,
            timestamp: Local::now(),
        }
    }

    /// Set the absolute and chunk-relative offsets
    pub fn at(mut self, offset: u64, chunk_offset: u64) -> Self {
        self.offset = Some(offset);
        self.chunk_offset = Some(chunk_offset);
        self
    }

    /// Set the expected and actual byte values
    pub fn bytes(mut self, expected: u8, actual: u8) -> Self {
        self.expected = Some(expected);
        self.actual = Some(actual);
        self
    }

    /// Set the number of differing bytes
    pub fn mismatched(mut self, count: u64) -> Self {
        self.mismatched_bytes = Some(count);
        self
    }

    /// Mark the entry as fatal
    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} {}]",
            self.file,
            self.pattern.short_name(),
            self.phase
        )?;
        if let Some(offset) = self.offset {
            write!(f, " @ {}", offset)?;
        }
        if let (Some(expected), Some(actual)) = (self.expected, self.actual) {
            write!(f, " expected 0x{:02X} got 0x{:02X}", expected, actual)?;
        }
        if let Some(count) = self.mismatched_bytes {
            write!(f, " ({} bytes differ)", count)?;
        }
        write!(f, ": {}", self.cause)
    }
}

/// Durable record of a run's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Session format version
    pub version: u32,

    // ── Run shape ───────────────────────────────────────────────────────────
    /// Directory holding the test files
    pub target_path: PathBuf,

    /// Bytes per file
    pub file_size: u64,

    /// Total requested bytes
    pub total_size: u64,

    /// Number of files per phase
    pub file_count: usize,

    /// Bytes per chunk
    pub chunk_size: usize,

    /// Selected patterns in canonical order
    pub selected_patterns: Vec<PatternKind>,

    // ── Position ────────────────────────────────────────────────────────────
    /// Pattern in progress, by identity
    pub current_pattern: PatternKind,

    /// 0-based file index in progress
    pub current_file_index: usize,

    /// Phase in progress
    pub current_phase: Phase,

    /// Next chunk to process within the current file
    pub current_chunk: u64,

    /// Patterns whose verify phase has finished
    pub completed_patterns: BTreeSet<PatternKind>,

    // ── Random pattern ──────────────────────────────────────────────────────
    /// Seed of the random pattern
    pub seed: u64,

    // ── Timing ──────────────────────────────────────────────────────────────
    /// Time spent running, across all sessions
    pub elapsed_seconds: f64,

    /// When the run was first started
    pub start_time: DateTime<Local>,

    /// When the session was last saved
    pub last_update: DateTime<Local>,

    /// Number of times the run was resumed
    #[serde(default)]
    pub resume_count: u32,

    // ── Errors ──────────────────────────────────────────────────────────────
    /// Every recorded error, in order
    pub errors: Vec<ErrorEntry>,
}

impl SessionState {
    /// Fresh session positioned at the first selected pattern
    pub fn new(config: &TestConfig, seed: u64) -> Result<Self> {
        let first = config
            .patterns
            .first()
            .copied()
            .ok_or_else(|| Error::InvalidConfig("no pattern selected".to_string()))?;
        let now = Local::now();
        Ok(Self {
            version: SESSION_VERSION,
            target_path: config.target_dir.clone(),
            file_size: config.file_size,
            total_size: config.total_size,
            file_count: config.file_count()?,
            chunk_size: config.chunk_size,
            selected_patterns: config.patterns.clone(),
            current_pattern: first,
            current_file_index: 0,
            current_phase: Phase::Write,
            current_chunk: 0,
            completed_patterns: BTreeSet::new(),
            seed,
            elapsed_seconds: 0.0,
            start_time: now,
            last_update: now,
            resume_count: 0,
            errors: Vec::new(),
        })
    }

    /// Chunks needed to cover one file
    pub fn chunks_per_file(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size.max(1) as u64)
    }

    /// Check the structural invariants of a loaded session
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.version != SESSION_VERSION {
            return Err(format!(
                "unsupported session version {} (expected {})",
                self.version, SESSION_VERSION
            ));
        }
        if self.file_size == 0 || self.chunk_size == 0 || self.file_count == 0 {
            return Err("file size, chunk size and file count must be positive".to_string());
        }
        if self.selected_patterns.is_empty() {
            return Err("no patterns selected".to_string());
        }
        if !self.selected_patterns.contains(&self.current_pattern) {
            return Err(format!(
                "current pattern {} is not among the selected patterns",
                self.current_pattern.short_name()
            ));
        }
        if self.current_file_index >= self.file_count {
            return Err(format!(
                "current file index {} is not below the file count {}",
                self.current_file_index, self.file_count
            ));
        }
        if self.current_chunk >= self.chunks_per_file() {
            return Err(format!(
                "current chunk {} is not below the chunks per file {}",
                self.current_chunk,
                self.chunks_per_file()
            ));
        }
        Ok(())
    }

    /// Work model over the current selection
    pub fn work_model(&self) -> WorkModel {
        WorkModel {
            pattern_count: self.selected_patterns.len(),
            file_count: self.file_count,
            file_size: self.file_size,
            chunk_size: self.chunk_size as u64,
        }
    }

    /// Selected patterns already completed
    pub fn completed_selected(&self) -> usize {
        self.selected_patterns
            .iter()
            .filter(|p| self.completed_patterns.contains(p))
            .count()
    }

    /// First selected pattern not yet completed, in canonical order
    pub fn first_pending_pattern(&self) -> Option<PatternKind> {
        self.selected_patterns
            .iter()
            .copied()
            .find(|p| !self.completed_patterns.contains(p))
    }

    /// Whether every selected pattern is complete
    pub fn is_finished(&self) -> bool {
        self.first_pending_pattern().is_none()
    }

    /// Bytes done at the saved position
    pub fn bytes_done(&self) -> u64 {
        let model = self.work_model();
        let completed = self.completed_selected();
        if self.completed_patterns.contains(&self.current_pattern) {
            return model.bytes_done(completed, Phase::Write, 0, 0);
        }
        let into_file = self.current_chunk * self.chunk_size as u64;
        model.bytes_done(
            completed,
            self.current_phase,
            self.current_file_index,
            into_file,
        )
    }

    /// Fraction of the run done, in `[0.0, 1.0]`
    pub fn progress_fraction(&self) -> f64 {
        self.work_model().fraction(self.bytes_done())
    }

    /// Summary for display
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            target: self.target_path.clone(),
            pattern: self.current_pattern.display_name().to_string(),
            phase: self.current_phase,
            file: format!("{}/{}", self.current_file_index + 1, self.file_count),
            completed_patterns: self.completed_selected(),
            total_patterns: self.selected_patterns.len(),
            error_count: self.errors.len(),
            elapsed: format_duration(self.elapsed_seconds as u64),
            started: self.start_time.format("%Y-%m-%d %H:%M:%S").to_string(),
            percentage: self.progress_fraction() * 100.0,
            resume_count: self.resume_count,
        }
    }

    /// Stamp the last update time and elapsed total
    pub fn touch(&mut self, elapsed_seconds: f64) {
        self.elapsed_seconds = elapsed_seconds;
        self.last_update = Local::now();
    }
}

/// Display summary of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Target directory
    pub target: PathBuf,
    /// Display name of the current pattern
    pub pattern: String,
    /// Current phase
    pub phase: Phase,
    /// Current file as `n/N` (1-based)
    pub file: String,
    /// Completed selected patterns
    pub completed_patterns: usize,
    /// Selected patterns
    pub total_patterns: usize,
    /// Recorded errors
    pub error_count: usize,
    /// Time spent running
    pub elapsed: String,
    /// Start time
    pub started: String,
    /// Percent complete
    pub percentage: f64,
    /// Times resumed
    pub resume_count: u32,
}

/// Reads and writes the session file of one target directory
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Store for the session file inside `dir`
    pub fn for_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(SESSION_FILE_NAME),
        }
    }

    /// Store for an explicit session file path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Session file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Whether a session file exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Persist `state` atomically
    pub fn save(&self, state: &SessionState) -> Result<()> {
        let temp_path = self.temp_path();

        let file = fs::File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, state).map_err(|e| {
            Error::Io(std::io::Error::other(format!(
                "Failed to serialize session: {}",
                e
            )))
        })?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        sync_parent_dir(&self.path);

        tracing::debug!("Saved session to {}", self.path.display());
        Ok(())
    }

    /// Load the session. `Ok(None)` when there is none.
    pub fn load(&self) -> Result<Option<SessionState>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let state: SessionState =
            serde_json::from_reader(BufReader::new(file)).map_err(|e| Error::SessionCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        state.validate().map_err(|reason| Error::SessionCorrupt {
            path: self.path.clone(),
            reason,
        })?;

        Ok(Some(state))
    }

    /// Remove the session file and any leftover temporary file
    pub fn delete(&self) -> Result<()> {
        for path in [self.path.clone(), self.temp_path()] {
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::File::open(parent).and_then(|dir| dir.sync_all()) {
            tracing::debug!("Could not sync {}: {}", parent.display(), e);
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

/// Result of checking a session against a new configuration
#[derive(Debug, Clone, Default)]
pub struct SessionValidation {
    /// Whether the session can be resumed
    pub is_valid: bool,
    /// Differences that do not block resuming
    pub warnings: Vec<String>,
    /// Differences that block resuming
    pub errors: Vec<String>,
}

impl SessionValidation {
    /// A passing result
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Add a warning
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Add an error and mark as invalid
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.is_valid = false;
        self.errors.push(error.into());
        self
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Check whether `session` can be resumed under `config`
pub fn validate_session(session: &SessionState, config: &TestConfig) -> SessionValidation {
    let mut result = SessionValidation::valid();

    if !same_dir(&session.target_path, &config.target_dir) {
        result = result.with_error(format!(
            "Target mismatch: session is for '{}', current is '{}'",
            session.target_path.display(),
            config.target_dir.display()
        ));
    }

    if session.file_size != config.file_size {
        result = result.with_error(format!(
            "File size changed: session has {} bytes, current is {} bytes",
            session.file_size, config.file_size
        ));
    }

    if session.chunk_size != config.chunk_size {
        result = result.with_error(format!(
            "Chunk size changed: session has {} bytes, current is {} bytes",
            session.chunk_size, config.chunk_size
        ));
    }

    match config.file_count() {
        Ok(count) if count <= session.current_file_index => {
            result = result.with_error(format!(
                "File count {} is too small: the session is at file {}",
                count,
                session.current_file_index + 1
            ));
        }
        Ok(_) => {}
        Err(e) => result = result.with_error(e.to_string()),
    }

    if session.selected_patterns != config.patterns {
        let names = |p: &[PatternKind]| {
            p.iter()
                .map(|k| k.short_name())
                .collect::<Vec<_>>()
                .join(",")
        };
        result = result.with_warning(format!(
            "Pattern selection changed: session has [{}], current is [{}]",
            names(&session.selected_patterns),
            names(&config.patterns)
        ));
    }

    if session.total_size != config.total_size {
        result = result.with_warning(format!(
            "Total size changed: session has {} bytes, current is {} bytes",
            session.total_size, config.total_size
        ));
    }

    result
}
