//! Progress model and speed tracking
//!
//! Total work is `patterns × 2 phases × file_count × file_size` bytes, with the
//! pattern count taken from the current selection. A run that resumes with a
//! different selection therefore recomputes its total instead of assuming
//! every pattern is present.

use crate::pattern::PatternKind;
use crate::session::Phase;
use std::time::{Duration, Instant};

/// Work-unit model shared by the engine and saved sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkModel {
    /// Selected pattern count
    pub pattern_count: usize,
    /// Files per phase
    pub file_count: usize,
    /// Bytes per file
    pub file_size: u64,
    /// Bytes per chunk
    pub chunk_size: u64,
}

impl WorkModel {
    /// Bytes covered by one phase of one pattern
    pub fn phase_bytes(&self) -> u64 {
        self.file_count as u64 * self.file_size
    }

    /// Bytes covered by the whole run
    pub fn total_bytes(&self) -> u64 {
        self.pattern_count as u64 * 2 * self.phase_bytes()
    }

    /// Chunk-granular work units of the whole run
    pub fn total_units(&self) -> u64 {
        let chunks_per_file = self.file_size.div_ceil(self.chunk_size.max(1));
        self.pattern_count as u64 * 2 * self.file_count as u64 * chunks_per_file
    }

    /// Bytes done at a position in the run
    pub fn bytes_done(
        &self,
        completed_patterns: usize,
        phase: Phase,
        file_index: usize,
        bytes_into_file: u64,
    ) -> u64 {
        let mut done = completed_patterns as u64 * 2 * self.phase_bytes();
        if phase == Phase::Verify {
            done += self.phase_bytes();
        }
        done += file_index as u64 * self.file_size + bytes_into_file.min(self.file_size);
        done.min(self.total_bytes())
    }

    /// Fraction done in `[0.0, 1.0]`
    pub fn fraction(&self, bytes_done: u64) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            return 1.0;
        }
        (bytes_done as f64 / total as f64).min(1.0)
    }
}

/// Progress snapshot carried by progress events
#[derive(Debug, Clone)]
pub struct Progress {
    /// Bytes done over the whole run, including work from earlier sessions
    pub bytes_done: u64,

    /// Bytes in the whole run
    pub bytes_total: u64,

    /// Smoothed throughput in bytes per second
    pub speed_bps: u64,

    /// Pattern being processed
    pub pattern: PatternKind,

    /// 0-based position of the pattern in the selection
    pub pattern_index: usize,

    /// Number of selected patterns
    pub pattern_count: usize,

    /// Phase being processed
    pub phase: Phase,

    /// 0-based index of the current file
    pub file_index: usize,

    /// Files per phase
    pub file_count: usize,

    /// Time spent across all sessions
    pub elapsed: Duration,
}

impl Progress {
    /// Fraction complete in `[0.0, 1.0]`
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            1.0
        } else {
            (self.bytes_done as f64 / self.bytes_total as f64).min(1.0)
        }
    }

    /// Completion percentage (0.0 to 100.0)
    pub fn percentage(&self) -> f64 {
        self.fraction() * 100.0
    }

    /// Format speed for display (e.g., "45.2 MB/s")
    pub fn speed_display(&self) -> String {
        format_speed(self.speed_bps)
    }

    /// Estimated seconds remaining
    pub fn eta_seconds(&self) -> Option<u64> {
        if self.speed_bps == 0 || self.bytes_done >= self.bytes_total {
            return None;
        }
        Some((self.bytes_total - self.bytes_done) / self.speed_bps)
    }

    /// Format ETA for display (e.g., "2m 30s")
    pub fn eta_display(&self) -> String {
        match self.eta_seconds() {
            Some(secs) if secs > 0 => format_duration(secs),
            _ => "calculating...".to_string(),
        }
    }
}

/// Speed tracking with smoothing over the last samples
#[derive(Debug)]
pub(crate) struct SpeedTracker {
    samples: Vec<(Instant, u64)>,
    max_samples: usize,
}

impl SpeedTracker {
    pub(crate) fn new() -> Self {
        Self {
            samples: Vec::with_capacity(10),
            max_samples: 10,
        }
    }

    pub(crate) fn update(&mut self, bytes_processed: u64) {
        self.update_at(Instant::now(), bytes_processed);
    }

    fn update_at(&mut self, now: Instant, bytes_processed: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push((now, bytes_processed));
    }

    pub(crate) fn current_speed(&self) -> u64 {
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            return 0;
        };

        let duration = last.0.duration_since(first.0);
        let bytes = last.1.saturating_sub(first.1);

        if duration.as_millis() > 0 {
            (bytes as f64 / duration.as_secs_f64()) as u64
        } else {
            0
        }
    }
}

/// Format speed for display
pub fn format_speed(bytes_per_second: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes_per_second >= GB {
        format!("{:.1} GB/s", bytes_per_second as f64 / GB as f64)
    } else if bytes_per_second >= MB {
        format!("{:.1} MB/s", bytes_per_second as f64 / MB as f64)
    } else if bytes_per_second >= KB {
        format!("{:.1} KB/s", bytes_per_second as f64 / KB as f64)
    } else {
        format!("{} B/s", bytes_per_second)
    }
}

/// Format duration for display
pub fn format_duration(seconds: u64) -> String {
    if seconds >= 3600 {
        let hours = seconds / 3600;
        let mins = (seconds % 3600) / 60;
        format!("{}h {}m", hours, mins)
    } else if seconds >= 60 {
        let mins = seconds / 60;
        let secs = seconds % 60;
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn model(patterns: usize) -> WorkModel {
        WorkModel {
            pattern_count: patterns,
            file_count: 3,
            file_size: 1000,
            chunk_size: 100,
        }
    }

    // -------------------------------------------------------------------------
    // WorkModel tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_total_scales_with_selection() {
        assert_eq!(model(2).total_bytes(), 2 * 2 * 3 * 1000);
        assert_eq!(model(5).total_bytes(), 5 * 2 * 3 * 1000);
        assert_eq!(model(2).total_units(), 2 * 2 * 3 * 10);
    }

    #[test]
    fn test_bytes_done_positions() {
        let m = model(2);
        assert_eq!(m.bytes_done(0, Phase::Write, 0, 0), 0);
        assert_eq!(m.bytes_done(0, Phase::Write, 1, 500), 1500);
        assert_eq!(m.bytes_done(0, Phase::Verify, 0, 0), 3000);
        assert_eq!(m.bytes_done(1, Phase::Write, 0, 0), 6000);
        assert_eq!(m.bytes_done(2, Phase::Write, 0, 0), m.total_bytes());
        assert_eq!(m.fraction(m.bytes_done(1, Phase::Write, 0, 0)), 0.5);
    }

    #[test]
    fn test_fraction_is_capped() {
        let m = model(1);
        assert_eq!(m.fraction(m.total_bytes() * 2), 1.0);
        assert_eq!(m.bytes_done(3, Phase::Verify, 2, 1000), m.total_bytes());
    }

    #[test]
    fn test_progress_display() {
        let progress = Progress {
            bytes_done: 250,
            bytes_total: 1000,
            speed_bps: 50,
            pattern: PatternKind::Zero,
            pattern_index: 0,
            pattern_count: 1,
            phase: Phase::Write,
            file_index: 0,
            file_count: 1,
            elapsed: Duration::from_secs(5),
        };
        assert_eq!(progress.percentage(), 25.0);
        assert_eq!(progress.eta_seconds(), Some(15));
        assert_eq!(progress.eta_display(), "15s");
        assert_eq!(progress.speed_display(), "50 B/s");
    }

    // -------------------------------------------------------------------------
    // Formatting and speed tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(500), "500 B/s");
        assert_eq!(format_speed(2048), "2.0 KB/s");
        assert_eq!(format_speed(45 * 1024 * 1024), "45.0 MB/s");
        assert_eq!(format_speed(3 * 1024 * 1024 * 1024), "3.0 GB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(150), "2m 30s");
        assert_eq!(format_duration(7322), "2h 2m");
    }

    #[test]
    fn test_speed_tracker_window() {
        let mut tracker = SpeedTracker::new();
        assert_eq!(tracker.current_speed(), 0);

        let start = Instant::now();
        for i in 0..15u64 {
            tracker.update_at(start + Duration::from_secs(i), i * 1000);
        }
        assert_eq!(tracker.samples.len(), 10);
        assert_eq!(tracker.current_speed(), 1000);
    }

    proptest! {
        #[test]
        fn prop_progress_monotonic(patterns in 1usize..6, files in 1usize..8, size in 1u64..10_000) {
            let m = WorkModel { pattern_count: patterns, file_count: files, file_size: size, chunk_size: 4096 };
            let mut last = 0.0f64;
            for p in 0..patterns {
                for phase in [Phase::Write, Phase::Verify] {
                    for f in 0..files {
                        for into in [0, size / 2, size] {
                            let fraction = m.fraction(m.bytes_done(p, phase, f, into));
                            prop_assert!(fraction >= last);
                            prop_assert!(fraction <= 1.0);
                            last = fraction;
                        }
                    }
                }
            }
        }
    }
}
