//! Orphan file analysis and recovery
//!
//! Test files left behind without a session (a crash before the first save,
//! a deleted session file) are inspected here before a new run reuses them.
//! Detection samples 1 KiB at the start and at the end of each file. A
//! sample made of one constant byte matching a fixed pattern is that pattern.
//! Otherwise a sample with more than ten distinct byte values is taken to be
//! the random pattern. A file is consistent when both samples agree.
//!
//! Nothing here returns an error to the caller for a bad file: unreadable
//! files are classified [`FileStatus::CorruptOrIncomplete`] and reported.

use crate::config::TestConfig;
use crate::files::{FileManager, TestFileEntry, MAX_FILE_INDEX};
use crate::pattern::{generate_seed, PatternGenerator, PatternKind};
use crate::session::{Phase, SessionState, SessionStore};
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Bytes sampled at each end of a file
pub const SAMPLE_SIZE: usize = 1024;

/// A sample with more distinct byte values than this is random
pub const RANDOM_UNIQUE_THRESHOLD: usize = 10;

/// Write size used when growing or creating files
const FILL_CHUNK: usize = 16 * 1024 * 1024;

/// Classification of one orphan file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    /// Full size and a recognisable pattern
    Complete,
    /// Recognisable pattern but shorter than the file size
    TooSmallButConsistent,
    /// Unreadable, empty, or no consistent pattern
    CorruptOrIncomplete,
}

/// Result of inspecting one file
#[derive(Debug, Clone, PartialEq)]
pub struct FileAnalysis {
    /// 0-based index
    pub index: usize,
    /// Full path
    pub path: PathBuf,
    /// Size on disk
    pub size: u64,
    /// Pattern detected consistently at both ends
    pub pattern: Option<PatternKind>,
    /// Classification
    pub status: FileStatus,
}

/// Analyses grouped by status
#[derive(Debug, Clone, Default)]
pub struct Categorized {
    /// Full-size, consistent files
    pub complete: Vec<FileAnalysis>,
    /// Consistent files that can be expanded
    pub too_small: Vec<FileAnalysis>,
    /// Files that cannot be reused as they are
    pub corrupt: Vec<FileAnalysis>,
}

/// Outcome of filling index gaps
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GapFillReport {
    /// Indices of files created
    pub created: Vec<usize>,
    /// Indices that could not be created, with the reason
    pub failed: Vec<(usize, String)>,
}

/// Detected pattern counts over a set of analyses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternSummary {
    /// Files per detected pattern
    pub counts: BTreeMap<PatternKind, usize>,
    /// Files with no consistent pattern
    pub undetectable: usize,
}

/// Outcome of [`FileAnalyzer::recover`]
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    /// Pattern used for repairs
    pub pattern: Option<PatternKind>,
    /// Indices of files grown to full size
    pub expanded: Vec<usize>,
    /// Indices that could not be grown, with the reason
    pub expand_failed: Vec<(usize, String)>,
    /// Gap filling outcome
    pub gaps: GapFillReport,
    /// Analyses taken after the repairs
    pub analyses: Vec<FileAnalysis>,
}

/// Inspects and repairs the test files of one directory
#[derive(Debug, Clone)]
pub struct FileAnalyzer {
    files: FileManager,
}

impl FileAnalyzer {
    /// Analyzer over the files managed by `files`
    pub fn new(files: FileManager) -> Self {
        Self { files }
    }

    /// Whether test files exist without a session
    pub fn has_orphans(&self, store: &SessionStore) -> bool {
        !store.exists() && self.files.has_files()
    }

    /// Classify one sample
    pub fn detect_sample(sample: &[u8]) -> Option<PatternKind> {
        let (&first, rest) = sample.split_first()?;
        if rest.iter().all(|&b| b == first) {
            if let Some(kind) = PatternKind::from_fill_byte(first) {
                return Some(kind);
            }
        }
        let unique: BTreeSet<u8> = sample.iter().copied().collect();
        (unique.len() > RANDOM_UNIQUE_THRESHOLD).then_some(PatternKind::Random)
    }

    /// Detect the pattern at the start of a file
    pub fn detect_pattern(&self, path: &Path) -> Option<PatternKind> {
        match read_sample(path, 0) {
            Ok(sample) => Self::detect_sample(&sample),
            Err(e) => {
                tracing::warn!("Cannot sample {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Inspect one file
    pub fn analyze_file(&self, entry: &TestFileEntry) -> FileAnalysis {
        let pattern = match self.consistent_pattern(&entry.path, entry.size) {
            Ok(pattern) => pattern,
            Err(e) => {
                tracing::warn!("Cannot sample {}: {}", entry.path.display(), e);
                None
            }
        };
        let status = match pattern {
            None => FileStatus::CorruptOrIncomplete,
            Some(_) if entry.size >= self.files.file_size() => FileStatus::Complete,
            Some(_) => FileStatus::TooSmallButConsistent,
        };
        FileAnalysis {
            index: entry.index,
            path: entry.path.clone(),
            size: entry.size,
            pattern,
            status,
        }
    }

    fn consistent_pattern(&self, path: &Path, size: u64) -> io::Result<Option<PatternKind>> {
        let head = Self::detect_sample(&read_sample(path, 0)?);
        if size <= SAMPLE_SIZE as u64 {
            return Ok(head);
        }
        let tail = Self::detect_sample(&read_sample(path, size - SAMPLE_SIZE as u64)?);
        Ok(if head == tail { head } else { None })
    }

    /// Inspect every test file in the directory
    pub fn analyze_all(&self) -> Vec<FileAnalysis> {
        match self.files.list_files() {
            Ok(entries) => entries.iter().map(|e| self.analyze_file(e)).collect(),
            Err(e) => {
                tracing::warn!("Cannot list {}: {}", self.files.dir().display(), e);
                Vec::new()
            }
        }
    }

    /// Group analyses by status
    pub fn categorize(analyses: &[FileAnalysis]) -> Categorized {
        let mut result = Categorized::default();
        for analysis in analyses {
            let bucket = match analysis.status {
                FileStatus::Complete => &mut result.complete,
                FileStatus::TooSmallButConsistent => &mut result.too_small,
                FileStatus::CorruptOrIncomplete => &mut result.corrupt,
            };
            bucket.push(analysis.clone());
        }
        result
    }

    /// Missing indices between the lowest and highest index present
    pub fn find_gaps(analyses: &[FileAnalysis]) -> Vec<usize> {
        let present: BTreeSet<usize> = analyses.iter().map(|a| a.index).collect();
        let (Some(&min), Some(&max)) = (present.first(), present.last()) else {
            return Vec::new();
        };
        (min..=max).filter(|i| !present.contains(i)).collect()
    }

    /// Grow an undersized file to `target_size` with the stream the engine writes.
    ///
    /// Returns the number of bytes appended.
    pub fn expand(
        &self,
        analysis: &FileAnalysis,
        target_size: u64,
        pattern: PatternKind,
        seed: Option<u64>,
    ) -> Result<u64> {
        let seed = seed_for(pattern, seed)?;
        let mut file = OpenOptions::new().write(true).open(&analysis.path)?;
        let current = file.metadata()?.len();
        if current >= target_size {
            return Ok(0);
        }
        file.seek(SeekFrom::Start(current))?;

        let mut generator = PatternGenerator::for_file(pattern, seed, analysis.index);
        generator.skip(current);
        let appended = write_stream(&mut file, &mut generator, target_size - current)?;
        file.sync_all()?;

        tracing::info!(
            "Expanded {} from {} to {} bytes",
            analysis.path.display(),
            current,
            target_size
        );
        Ok(appended)
    }

    /// Create full-size files for every gap. Existing files are never touched.
    pub fn fill_gaps(
        &self,
        analyses: &[FileAnalysis],
        pattern: PatternKind,
        seed: Option<u64>,
    ) -> GapFillReport {
        let mut report = GapFillReport::default();
        for index in Self::find_gaps(analyses) {
            match self.create_file(index, pattern, seed) {
                Ok(()) => report.created.push(index),
                Err(e) => {
                    tracing::warn!("Cannot fill gap at index {}: {}", index, e);
                    report.failed.push((index, e.to_string()));
                }
            }
        }
        report
    }

    fn create_file(&self, index: usize, pattern: PatternKind, seed: Option<u64>) -> Result<()> {
        let seed = seed_for(pattern, seed)?;
        let path = self.files.path_for(index)?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        let mut generator = PatternGenerator::for_file(pattern, seed, index);
        write_stream(&mut file, &mut generator, self.files.file_size())?;
        file.sync_all()?;
        tracing::info!("Created {}", path.display());
        Ok(())
    }

    /// Most common pattern among complete files; later patterns win ties
    pub fn estimate_current_pattern(analyses: &[FileAnalysis]) -> Option<PatternKind> {
        let complete: Vec<&FileAnalysis> = analyses
            .iter()
            .filter(|a| a.status == FileStatus::Complete)
            .collect();
        let pool: Vec<&FileAnalysis> = if complete.is_empty() {
            analyses.iter().collect()
        } else {
            complete
        };

        let mut counts: BTreeMap<PatternKind, usize> = BTreeMap::new();
        for kind in pool.iter().filter_map(|a| a.pattern) {
            *counts.entry(kind).or_default() += 1;
        }
        // max_by_key keeps the last maximum, and the map iterates in canonical order
        counts
            .into_iter()
            .max_by_key(|&(_, count)| count)
            .map(|(kind, _)| kind)
    }

    /// Count files per detected pattern
    pub fn pattern_summary(analyses: &[FileAnalysis]) -> PatternSummary {
        let mut summary = PatternSummary::default();
        for analysis in analyses {
            match analysis.pattern {
                Some(kind) => *summary.counts.entry(kind).or_default() += 1,
                None => summary.undetectable += 1,
            }
        }
        summary
    }

    /// Build a session that continues the write phase of the detected pattern.
    ///
    /// Returns `None` when no usable pattern is found, when it is the random
    /// pattern (its seed is unknown, so it could never verify), or when it is
    /// not part of the configured selection.
    pub fn reconstruct_session(
        &self,
        analyses: &[FileAnalysis],
        config: &TestConfig,
    ) -> Option<SessionState> {
        let pattern = Self::estimate_current_pattern(analyses)?;
        if pattern.is_random() || !config.patterns.contains(&pattern) {
            return None;
        }

        let done: BTreeSet<usize> = analyses
            .iter()
            .filter(|a| a.status == FileStatus::Complete && a.pattern == Some(pattern))
            .map(|a| a.index)
            .collect();
        let next = (0..).find(|i| !done.contains(i)).unwrap_or(0);

        let observed = analyses.iter().map(|a| a.index + 1).max().unwrap_or(0);
        let file_count = config.file_count().ok()?.max(observed);
        if file_count > MAX_FILE_INDEX + 1 {
            return None;
        }

        let mut session = SessionState::new(config, generate_seed()).ok()?;
        session.file_count = file_count;
        session.total_size = config.total_size.max(file_count as u64 * config.file_size);
        session.current_pattern = pattern;
        if next < file_count {
            session.current_phase = Phase::Write;
            session.current_file_index = next;
        } else {
            session.current_phase = Phase::Verify;
            session.current_file_index = 0;
        }
        session.current_chunk = 0;
        session.completed_patterns = config
            .patterns
            .iter()
            .copied()
            .filter(|p| *p < pattern)
            .collect();
        Some(session)
    }

    /// Analyze, expand undersized files, fill gaps, and analyze again
    pub fn recover(&self, pattern: Option<PatternKind>, seed: Option<u64>) -> RecoveryReport {
        let analyses = self.analyze_all();
        let Some(pattern) = pattern.or_else(|| Self::estimate_current_pattern(&analyses)) else {
            tracing::warn!("No recognisable pattern in {}", self.files.dir().display());
            return RecoveryReport {
                analyses,
                ..RecoveryReport::default()
            };
        };

        let mut report = RecoveryReport {
            pattern: Some(pattern),
            ..RecoveryReport::default()
        };

        for analysis in &analyses {
            if analysis.status != FileStatus::TooSmallButConsistent
                || analysis.pattern != Some(pattern)
            {
                continue;
            }
            match self.expand(analysis, self.files.file_size(), pattern, seed) {
                Ok(_) => report.expanded.push(analysis.index),
                Err(e) => {
                    tracing::warn!("Cannot expand {}: {}", analysis.path.display(), e);
                    report.expand_failed.push((analysis.index, e.to_string()));
                }
            }
        }

        report.gaps = self.fill_gaps(&analyses, pattern, seed);
        report.analyses = self.analyze_all();
        report
    }
}

fn seed_for(pattern: PatternKind, seed: Option<u64>) -> Result<u64> {
    match (pattern.is_random(), seed) {
        (true, None) => Err(Error::InvalidConfig(
            "the random pattern cannot be regenerated without its seed".to_string(),
        )),
        (_, seed) => Ok(seed.unwrap_or(0)),
    }
}

fn read_sample(path: &Path, offset: u64) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut sample = Vec::with_capacity(SAMPLE_SIZE);
    file.take(SAMPLE_SIZE as u64).read_to_end(&mut sample)?;
    Ok(sample)
}

fn write_stream(file: &mut File, generator: &mut PatternGenerator, len: u64) -> io::Result<u64> {
    let mut buf = vec![0u8; FILL_CHUNK.min(len as usize)];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(buf.len() as u64) as usize;
        generator.fill(&mut buf[..n]);
        file.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    Ok(len)
}
