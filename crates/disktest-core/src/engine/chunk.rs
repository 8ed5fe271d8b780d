//! Chunk arithmetic, comparison, read-back checks and the seed spot-check

use crate::pattern::{PatternGenerator, PatternKind};
use disktest_platform::{CacheStrategy, DEFAULT_BLOCK_SIZE};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Bytes sampled per file by the seed spot-check
pub(crate) const SPOT_CHECK_SIZE: usize = 4096;

/// A sampled file counts as inconsistent above this share of differing bytes
pub(crate) const SPOT_CHECK_THRESHOLD: f64 = 0.9;

/// Length of chunk `chunk` in a file of `file_size` bytes
pub(crate) fn chunk_len(file_size: u64, chunk_size: usize, chunk: u64) -> usize {
    let start = chunk * chunk_size as u64;
    file_size.saturating_sub(start).min(chunk_size as u64) as usize
}

/// First difference between two equal-length buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Mismatch {
    /// Index of the first differing byte
    pub index: usize,
    /// Expected byte at `index`
    pub expected: u8,
    /// Actual byte at `index`
    pub actual: u8,
    /// Number of differing bytes
    pub count: u64,
}

/// Compare `actual` against `expected`
pub(crate) fn compare(expected: &[u8], actual: &[u8]) -> Option<Mismatch> {
    if expected == actual {
        return None;
    }
    let mut first = None;
    let mut count = 0u64;
    for (i, (&e, &a)) in expected.iter().zip(actual).enumerate() {
        if e != a {
            count += 1;
            first.get_or_insert((i, e, a));
        }
    }
    first.map(|(index, expected, actual)| Mismatch {
        index,
        expected,
        actual,
        count,
    })
}

/// Alignment for uncached reads.
///
/// The filesystem's preferred block size is used when it is a power of two
/// of at least 512 bytes that divides the chunk size, so every chunk offset
/// stays aligned. Anything else falls back to [`DEFAULT_BLOCK_SIZE`].
pub(crate) fn read_alignment(reported: Option<u32>, chunk_size: usize) -> usize {
    match reported.map(|size| size as usize) {
        Some(size) if size >= 512 && size.is_power_of_two() && chunk_size % size == 0 => size,
        _ => DEFAULT_BLOCK_SIZE,
    }
}

/// Warning for a read-back handle whose reads may be served from the page cache
pub(crate) fn cache_warning(name: &str, strategy: CacheStrategy) -> Option<String> {
    if strategy.bypasses_cache() {
        return None;
    }
    Some(format!(
        "{} may be verified from the page cache ({}); a pass does not prove the data reached the media",
        name, strategy
    ))
}

/// Up to three distinct file indices spread over `start..end`
pub(crate) fn spot_check_indices(start: usize, end: usize) -> Vec<usize> {
    if start >= end {
        return Vec::new();
    }
    let mut picks = vec![start, start + (end - 1 - start) / 2, end - 1];
    picks.dedup();
    picks
}

fn read_prefix(path: &Path, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < len {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Share of bytes at the start of `path` that differ from the file's stream
pub(crate) fn sample_disagreement(
    path: &Path,
    pattern: PatternKind,
    seed: u64,
    file_index: usize,
) -> Option<f64> {
    let actual = match read_prefix(path, SPOT_CHECK_SIZE) {
        Ok(actual) if !actual.is_empty() => actual,
        Ok(_) => return None,
        Err(e) => {
            tracing::debug!("Spot-check read of {} failed: {}", path.display(), e);
            return None;
        }
    };
    let expected = PatternGenerator::for_file(pattern, seed, file_index).generate_chunk(actual.len());
    let differing = compare(&expected, &actual).map_or(0, |m| m.count);
    Some(differing as f64 / actual.len() as f64)
}

/// Whether every sampled file disagrees with its expected stream.
///
/// Needs at least two readable samples; a single bad file is left to the
/// per-chunk comparison.
pub(crate) fn seed_inconsistent(
    dir_files: &[(usize, std::path::PathBuf)],
    pattern: PatternKind,
    seed: u64,
) -> bool {
    let shares: Vec<f64> = dir_files
        .iter()
        .filter_map(|(index, path)| sample_disagreement(path, pattern, seed, *index))
        .collect();
    shares.len() >= 2 && shares.iter().all(|&s| s > SPOT_CHECK_THRESHOLD)
}
