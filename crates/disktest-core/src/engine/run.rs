//! The run loop
//!
//! Patterns run in canonical order. Each pattern writes every file, then
//! verifies every file. Control requests are observed between chunks only,
//! so the saved position always names a chunk that has not been started.

use super::chunk::{
    cache_warning, chunk_len, compare, read_alignment, seed_inconsistent, spot_check_indices,
};
use super::control::{Directive, EngineState, StopMode};
use super::{ResumePoint, TestEngine};
use crate::config::PROGRESS_INTERVAL_CHUNKS;
use crate::error::{classify_read_error, classify_write_error};
use crate::events::{EngineEvent, LogEntry, LogLevel, RunOutcome, RunReport};
use crate::files::file_name;
use crate::pattern::{PatternGenerator, PatternKind};
use crate::progress::{format_duration, Progress, SpeedTracker};
use crate::session::{ErrorEntry, Phase};
use crate::size::format_size;
use crate::Error;
use disktest_platform::{CacheStrategy, OpenOptions as ReadOptions, PlatformError, ReadBackFile};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::time::{Duration, Instant};

/// Why the loop left early
enum Halt {
    Stop(StopMode),
    Fatal(Error),
}

type Step = std::result::Result<(), Halt>;

/// Bookkeeping that lives only as long as one `run` call
struct RunState {
    base_elapsed: f64,
    active: Duration,
    active_since: Option<Instant>,
    last_checkpoint: Instant,
    bytes_processed: u64,
    last_bytes_done: u64,
    speed: SpeedTracker,
    read_alignment: usize,
}

impl RunState {
    fn new(base_elapsed: f64) -> Self {
        Self {
            base_elapsed,
            active: Duration::ZERO,
            active_since: Some(Instant::now()),
            last_checkpoint: Instant::now(),
            bytes_processed: 0,
            last_bytes_done: 0,
            speed: SpeedTracker::new(),
            read_alignment: disktest_platform::DEFAULT_BLOCK_SIZE,
        }
    }

    fn pause_clock(&mut self) {
        if let Some(since) = self.active_since.take() {
            self.active += since.elapsed();
        }
    }

    fn resume_clock(&mut self) {
        self.active_since.get_or_insert_with(Instant::now);
    }

    fn elapsed(&self) -> Duration {
        let running = self.active_since.map_or(Duration::ZERO, |s| s.elapsed());
        Duration::from_secs_f64(self.base_elapsed) + self.active + running
    }
}

impl TestEngine {
    /// Run on the calling thread until completion, stop or fatal error
    pub fn run(mut self) -> RunReport {
        let mut rs = RunState::new(self.session.elapsed_seconds);
        self.set_state(EngineState::Running);

        if let Err(e) = std::fs::create_dir_all(&self.config.target_dir) {
            return self.finish(&mut rs, Halt::Fatal(Error::Io(e)));
        }
        let reported = disktest_platform::block_size(&self.config.target_dir)
            .map_err(|e| tracing::debug!("Block size query failed: {}", e))
            .ok();
        rs.read_alignment = read_alignment(reported, self.session.chunk_size);
        tracing::debug!("Uncached reads aligned to {} bytes", rs.read_alignment);
        self.announce();
        self.persist(&mut rs);

        let patterns = self.session.selected_patterns.clone();
        for (index, &pattern) in patterns.iter().enumerate() {
            if self.session.completed_patterns.contains(&pattern) {
                tracing::debug!("Skipping completed pattern {}", pattern.short_name());
                continue;
            }
            // Only the first pattern that runs continues from the saved position.
            let point = self.snapshot.take();
            self.session.current_pattern = pattern;
            self.emit(EngineEvent::PatternChanged {
                pattern,
                index,
                total: patterns.len(),
            });
            self.log(
                LogLevel::Info,
                format!(
                    "Pattern {}/{}: {}",
                    index + 1,
                    patterns.len(),
                    pattern.display_name()
                ),
            );

            if let Err(halt) = self.run_pattern(&mut rs, pattern, point) {
                return self.finish(&mut rs, halt);
            }
        }

        self.complete(&mut rs)
    }

    fn announce(&mut self) {
        let s = &self.session;
        let names: Vec<_> = s.selected_patterns.iter().map(|p| p.short_name()).collect();
        let message = if self.resumed {
            format!(
                "Resuming test in {}: pattern {}, {} phase, file {}/{}, chunk {}",
                self.config.target_dir.display(),
                s.current_pattern.display_name(),
                s.current_phase,
                s.current_file_index + 1,
                s.file_count,
                s.current_chunk
            )
        } else {
            format!(
                "Starting test in {}: {} files x {}, patterns [{}]",
                self.config.target_dir.display(),
                s.file_count,
                format_size(s.file_size),
                names.join(",")
            )
        };
        self.log(LogLevel::Info, message);
        for warning in std::mem::take(&mut self.warnings) {
            self.log(LogLevel::Warning, warning);
        }
    }

    fn run_pattern(
        &mut self,
        rs: &mut RunState,
        pattern: PatternKind,
        point: Option<ResumePoint>,
    ) -> Step {
        let file_count = self.session.file_count;
        let write_from = point.map_or(Some((0, 0)), |p| p.write_start(pattern));

        if let Some((first_file, first_chunk)) = write_from {
            self.enter_phase(pattern, Phase::Write);
            for index in first_file..file_count {
                let start = if index == first_file { first_chunk } else { 0 };
                self.write_file(rs, pattern, index, start)?;
                if index + 1 < file_count {
                    self.set_position(Phase::Write, index + 1, 0);
                } else {
                    self.set_position(Phase::Verify, 0, 0);
                }
                self.file_boundary(rs)?;
            }
        } else {
            tracing::debug!(
                "Write phase of {} already done before resume",
                pattern.short_name()
            );
        }

        let (first_file, first_chunk) = point.map_or((0, 0), |p| p.verify_start(pattern));
        self.enter_phase(pattern, Phase::Verify);
        self.set_position(Phase::Verify, first_file, first_chunk);

        if pattern.is_random() && self.seed_check_fails(pattern, first_file) {
            let entry = ErrorEntry::new(
                "*",
                first_file,
                pattern,
                Phase::Verify,
                "Random pattern does not match its seed in any sampled file; verification of this pattern was skipped",
            );
            self.record(entry);
            self.advance_past(pattern);
            self.persist(rs);
            return Ok(());
        }

        for index in first_file..file_count {
            let start = if index == first_file { first_chunk } else { 0 };
            self.verify_file(rs, pattern, index, start)?;
            if index + 1 < file_count {
                self.set_position(Phase::Verify, index + 1, 0);
            } else {
                self.session.completed_patterns.insert(pattern);
                self.advance_past(pattern);
            }
            self.file_boundary(rs)?;
        }

        let errors = self
            .session
            .errors
            .iter()
            .filter(|e| e.pattern == pattern)
            .count();
        if errors == 0 {
            self.log(
                LogLevel::Success,
                format!("Pattern {} verified without errors", pattern.display_name()),
            );
        } else {
            self.log(
                LogLevel::Warning,
                format!(
                    "Pattern {} finished with {} recorded errors",
                    pattern.display_name(),
                    errors
                ),
            );
        }
        Ok(())
    }

    /// Move the saved position to the next pending pattern
    fn advance_past(&mut self, pattern: PatternKind) {
        let next = self
            .session
            .selected_patterns
            .iter()
            .copied()
            .find(|p| *p > pattern && !self.session.completed_patterns.contains(p));
        if let Some(next) = next {
            self.session.current_pattern = next;
        }
        self.set_position(Phase::Write, 0, 0);
    }

    fn seed_check_fails(&self, pattern: PatternKind, first_file: usize) -> bool {
        let samples: Vec<_> = spot_check_indices(first_file, self.session.file_count)
            .into_iter()
            .filter_map(|i| self.files.path_for(i).ok().map(|p| (i, p)))
            .collect();
        seed_inconsistent(&samples, pattern, self.session.seed)
    }

    fn enter_phase(&mut self, pattern: PatternKind, phase: Phase) {
        tracing::info!("{} phase of {}", phase, pattern.display_name());
        self.emit(EngineEvent::PhaseChanged { pattern, phase });
    }

    fn set_position(&mut self, phase: Phase, file_index: usize, chunk: u64) {
        self.session.current_phase = phase;
        self.session.current_file_index = file_index;
        self.session.current_chunk = chunk;
    }

    // ------------------------------------------------------------------------
    // Write phase
    // ------------------------------------------------------------------------

    fn write_file(
        &mut self,
        rs: &mut RunState,
        pattern: PatternKind,
        index: usize,
        start_chunk: u64,
    ) -> Step {
        let path = self.files.path_for(index).map_err(Halt::Fatal)?;
        let name = file_name(index);
        let file_size = self.session.file_size;
        let chunk_size = self.session.chunk_size;
        let chunks = self.session.chunks_per_file();

        self.begin_file(index, Phase::Write, start_chunk);

        let opened = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(start_chunk == 0)
            .open(&path)
            .and_then(|mut f| {
                f.seek(SeekFrom::Start(start_chunk * chunk_size as u64))?;
                Ok(f)
            });
        let mut file = match opened {
            Ok(file) => file,
            Err(e) => {
                let err = classify_write_error(&path, 0, e);
                let entry = ErrorEntry::new(&name, index, pattern, Phase::Write, err.to_string())
                    .at(start_chunk * chunk_size as u64, 0);
                return self.fail_file(entry, err);
            }
        };

        let mut generator = PatternGenerator::for_file(pattern, self.session.seed, index);
        generator.skip(start_chunk * chunk_size as u64);
        let mut buf = vec![0u8; chunk_size];

        for chunk in start_chunk..chunks {
            self.set_position(Phase::Write, index, chunk);
            self.chunk_boundary(rs)?;

            let offset = chunk * chunk_size as u64;
            let len = chunk_len(file_size, chunk_size, chunk);
            generator.fill(&mut buf[..len]);

            let started = Instant::now();
            if let Err(e) = file.write_all(&buf[..len]) {
                let err = classify_write_error(&path, offset, e);
                let entry = ErrorEntry::new(&name, index, pattern, Phase::Write, err.to_string())
                    .at(offset, 0);
                return self.fail_file(entry, err);
            }
            self.check_slow(&name, Phase::Write, chunk, started.elapsed());
            self.chunk_done(rs, len, chunk, offset + len as u64);
        }

        if let Err(e) = file.sync_all() {
            let err = classify_write_error(&path, file_size, e);
            let entry = ErrorEntry::new(&name, index, pattern, Phase::Write, err.to_string());
            return self.fail_file(entry, err);
        }
        tracing::debug!("Wrote {}", path.display());
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Verify phase
    // ------------------------------------------------------------------------

    fn verify_file(
        &mut self,
        rs: &mut RunState,
        pattern: PatternKind,
        index: usize,
        start_chunk: u64,
    ) -> Step {
        let path = self.files.path_for(index).map_err(Halt::Fatal)?;
        let name = file_name(index);
        let file_size = self.session.file_size;
        let chunk_size = self.session.chunk_size;
        let chunks = self.session.chunks_per_file();

        self.begin_file(index, Phase::Verify, start_chunk);

        let options = ReadOptions::new()
            .direct_io(self.config.direct_io)
            .block_size(rs.read_alignment)
            .buffer_size(chunk_size);
        let mut reader = match ReadBackFile::open(&path, &options) {
            Ok(reader) => reader,
            Err(PlatformError::NotFound(_)) => {
                let entry = ErrorEntry::new(&name, index, pattern, Phase::Verify, "File is missing");
                self.record(entry);
                return Ok(());
            }
            Err(PlatformError::Io(e)) => {
                let err = classify_read_error(&path, 0, e);
                let entry = ErrorEntry::new(&name, index, pattern, Phase::Verify, err.to_string());
                return self.fail_file(entry, err);
            }
            Err(e) => {
                let entry = ErrorEntry::new(&name, index, pattern, Phase::Verify, e.to_string());
                self.record(entry);
                return Ok(());
            }
        };
        self.report_strategy(&name, reader.strategy());

        let mut generator = PatternGenerator::for_file(pattern, self.session.seed, index);
        generator.skip(start_chunk * chunk_size as u64);
        let mut expected = vec![0u8; chunk_size];

        for chunk in start_chunk..chunks {
            self.set_position(Phase::Verify, index, chunk);
            self.chunk_boundary(rs)?;

            let offset = chunk * chunk_size as u64;
            let len = chunk_len(file_size, chunk_size, chunk);
            generator.fill(&mut expected[..len]);

            let started = Instant::now();
            let outcome = match reader.read_chunk(offset, len) {
                Err(e) => Err(classify_read_error(&path, offset, e)),
                Ok(actual) if actual.len() < len => Err(Error::ShortRead {
                    path: path.clone(),
                    offset,
                    expected: len,
                    actual: actual.len(),
                }),
                Ok(actual) => Ok(compare(&expected[..len], actual)),
            };
            self.check_slow(&name, Phase::Verify, chunk, started.elapsed());

            match outcome {
                Ok(None) => {}
                Ok(Some(mismatch)) => {
                    let at = offset + mismatch.index as u64;
                    let err = Error::VerificationMismatch {
                        path: path.clone(),
                        offset: at,
                        expected: mismatch.expected,
                        actual: mismatch.actual,
                    };
                    let entry = ErrorEntry::new(&name, index, pattern, Phase::Verify, err.to_string())
                        .at(at, mismatch.index as u64)
                        .bytes(mismatch.expected, mismatch.actual)
                        .mismatched(mismatch.count);
                    self.record(entry);
                }
                Err(err) => {
                    let entry = ErrorEntry::new(&name, index, pattern, Phase::Verify, err.to_string())
                        .at(offset, 0);
                    // The rest of the file cannot be compared after a failed read.
                    return self.fail_file(entry, err);
                }
            }
            self.chunk_done(rs, len, chunk, offset + len as u64);
        }
        tracing::debug!("Verified {}", path.display());
        Ok(())
    }

    fn report_strategy(&mut self, name: &str, strategy: CacheStrategy) {
        tracing::info!("Verifying {} with {}", name, strategy);
        if let Some(warning) = cache_warning(name, strategy) {
            self.log(LogLevel::Warning, warning);
        }
    }

    // ------------------------------------------------------------------------
    // Shared chunk and file plumbing
    // ------------------------------------------------------------------------

    fn begin_file(&mut self, index: usize, phase: Phase, start_chunk: u64) {
        let total = self.session.file_count;
        let verb = match phase {
            Phase::Write => "Writing",
            Phase::Verify => "Verifying",
        };
        let status = if start_chunk > 0 {
            format!(
                "{} {} (file {}/{}) from chunk {}",
                verb,
                file_name(index),
                index + 1,
                total,
                start_chunk
            )
        } else {
            format!("{} {} (file {}/{})", verb, file_name(index), index + 1, total)
        };
        self.emit(EngineEvent::FileChanged { index, total, phase });
        self.emit(EngineEvent::Status(status));
    }

    /// Record a per-file failure. Fatal errors end the run; others skip the file.
    fn fail_file(&mut self, entry: ErrorEntry, err: Error) -> Step {
        if err.is_fatal() {
            self.record(entry.fatal());
            return Err(Halt::Fatal(err));
        }
        self.record(entry);
        Ok(())
    }

    fn record(&mut self, entry: ErrorEntry) {
        tracing::warn!("{}", entry);
        self.session.errors.push(entry.clone());
        self.emit(EngineEvent::Log(LogEntry::new(LogLevel::Error, entry.to_string())));
        self.emit(EngineEvent::Error(entry));
    }

    fn check_slow(&mut self, name: &str, phase: Phase, chunk: u64, took: Duration) {
        if took > self.config.slow_io_threshold {
            self.log(
                LogLevel::Warning,
                format!(
                    "Slow I/O: {} of {} chunk {} took {:.1}s",
                    phase,
                    name,
                    chunk,
                    took.as_secs_f64()
                ),
            );
        }
    }

    /// Observe control requests and take periodic checkpoints
    fn chunk_boundary(&mut self, rs: &mut RunState) -> Step {
        match self.control.directive() {
            Directive::Continue => {}
            Directive::Stop(mode) => return Err(Halt::Stop(mode)),
            Directive::Pause => {
                rs.pause_clock();
                self.persist(rs);
                self.set_state(EngineState::Paused);
                self.log(LogLevel::Info, "Paused".to_string());
                if let Some(mode) = self.control.wait_while_paused() {
                    return Err(Halt::Stop(mode));
                }
                rs.resume_clock();
                self.set_state(EngineState::Running);
                self.log(LogLevel::Info, "Resumed".to_string());
            }
        }
        if rs.last_checkpoint.elapsed() >= self.config.checkpoint_interval {
            self.persist(rs);
        }
        Ok(())
    }

    /// Checkpoint after a file and honour a stop-after-file request
    fn file_boundary(&mut self, rs: &mut RunState) -> Step {
        self.persist(rs);
        self.emit_progress(rs, 0);
        if self.control.take_stop_after_file() {
            self.log(LogLevel::Info, "Stopping after the current file".to_string());
            return Err(Halt::Stop(StopMode::Keep));
        }
        Ok(())
    }

    fn chunk_done(&mut self, rs: &mut RunState, len: usize, chunk: u64, into_file: u64) {
        rs.bytes_processed += len as u64;
        rs.speed.update(rs.bytes_processed);
        if (chunk + 1) % PROGRESS_INTERVAL_CHUNKS == 0 {
            self.emit_progress(rs, into_file);
        }
    }

    fn emit_progress(&mut self, rs: &mut RunState, into_file: u64) {
        let s = &self.session;
        let model = s.work_model();
        let done = model.bytes_done(
            s.completed_selected(),
            s.current_phase,
            s.current_file_index,
            into_file,
        );
        rs.last_bytes_done = rs.last_bytes_done.max(done);
        let pattern_index = s
            .selected_patterns
            .iter()
            .position(|p| *p == s.current_pattern)
            .unwrap_or(0);
        let progress = Progress {
            bytes_done: rs.last_bytes_done,
            bytes_total: model.total_bytes(),
            speed_bps: rs.speed.current_speed(),
            pattern: s.current_pattern,
            pattern_index,
            pattern_count: s.selected_patterns.len(),
            phase: s.current_phase,
            file_index: s.current_file_index,
            file_count: s.file_count,
            elapsed: rs.elapsed(),
        };
        self.emit(EngineEvent::Progress(progress));
    }

    /// Save the session. Failure is logged, not fatal.
    fn persist(&mut self, rs: &mut RunState) -> bool {
        self.session.touch(rs.elapsed().as_secs_f64());
        rs.last_checkpoint = Instant::now();
        match self.store.save(&self.session) {
            Ok(()) => true,
            Err(e) => {
                self.log(LogLevel::Warning, format!("Could not save session: {}", e));
                false
            }
        }
    }

    // ------------------------------------------------------------------------
    // Endings
    // ------------------------------------------------------------------------

    fn complete(mut self, rs: &mut RunState) -> RunReport {
        rs.pause_clock();
        self.emit_progress(rs, 0);
        if let Err(e) = self.store.delete() {
            self.log(LogLevel::Warning, format!("Could not remove session: {}", e));
        }
        let errors = self.session.errors.len();
        let level = if errors == 0 {
            LogLevel::Success
        } else {
            LogLevel::Warning
        };
        self.log(
            level,
            format!(
                "Test completed in {} with {} recorded errors",
                format_duration(rs.elapsed().as_secs()),
                errors
            ),
        );
        self.set_state(EngineState::Completed);
        self.report(rs, RunOutcome::Completed, false)
    }

    fn finish(mut self, rs: &mut RunState, halt: Halt) -> RunReport {
        rs.pause_clock();
        match halt {
            Halt::Stop(mode) => {
                self.set_state(EngineState::Stopping);
                let retained = match mode {
                    StopMode::Keep => {
                        let saved = self.persist(rs);
                        self.log(
                            LogLevel::Info,
                            "Test stopped; session kept for resume".to_string(),
                        );
                        saved
                    }
                    StopMode::Abandon => {
                        if let Err(e) = self.store.delete() {
                            self.log(LogLevel::Warning, format!("Could not remove session: {}", e));
                        }
                        self.log(LogLevel::Info, "Test stopped".to_string());
                        false
                    }
                };
                self.set_state(EngineState::Stopped);
                self.report(rs, RunOutcome::Stopped, retained)
            }
            Halt::Fatal(err) => {
                tracing::error!("Run aborted: {}", err);
                let retained = self.persist(rs);
                self.log(LogLevel::Error, format!("Test aborted: {}", err));
                self.set_state(EngineState::Error);
                self.report(rs, RunOutcome::Aborted(err.to_string()), retained)
            }
        }
    }

    fn report(&mut self, rs: &RunState, outcome: RunOutcome, session_retained: bool) -> RunReport {
        let report = RunReport {
            outcome,
            errors: self.session.errors.clone(),
            completed_patterns: self.session.completed_patterns.clone(),
            bytes_processed: rs.bytes_processed,
            elapsed: rs.elapsed(),
            session_retained,
        };
        self.emit(EngineEvent::Completed(report.clone()));
        report
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    fn set_state(&mut self, state: EngineState) {
        self.control.set_state(state);
        self.emit(EngineEvent::StateChanged(self.control.state()));
    }

    fn log(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Error => tracing::error!("{}", message),
            LogLevel::Warning => tracing::warn!("{}", message),
            LogLevel::Info | LogLevel::Success => tracing::info!("{}", message),
        }
        self.emit(EngineEvent::Log(LogEntry::new(level, message)));
    }

    fn emit(&mut self, event: EngineEvent) {
        self.sink.emit(event);
    }
}
