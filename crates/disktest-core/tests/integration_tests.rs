//! Integration tests for disktest-core
//!
//! These tests drive complete runs against temporary directories.

use disktest_core::{
    CallbackSink, EngineEvent, EngineState, Error, FileAnalyzer, FileManager, FileStatus,
    FreeSpace, Phase, PatternGenerator, PatternKind, RunOutcome, SessionState, SessionStore,
    TestConfig, TestEngine,
};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const KIB: u64 = 1024;
const FILE_SIZE: u64 = 16 * KIB;
const CHUNK: usize = 4 * KIB as usize;

struct Plenty;

impl FreeSpace for Plenty {
    fn free_bytes(&self, _path: &Path) -> disktest_core::Result<u64> {
        Ok(u64::MAX / 2)
    }
}

struct Fixed(u64);

impl FreeSpace for Fixed {
    fn free_bytes(&self, _path: &Path) -> disktest_core::Result<u64> {
        Ok(self.0)
    }
}

fn config(dir: &Path, files: u64, patterns: &[PatternKind]) -> TestConfig {
    TestConfig::new(dir)
        .file_size(FILE_SIZE)
        .total_size(files * FILE_SIZE)
        .chunk_size(CHUNK)
        .patterns(patterns)
        .seed(7)
        .direct_io(false)
}

fn engine(config: TestConfig) -> TestEngine {
    TestEngine::with_space_source(config, Plenty).unwrap()
}

fn file_path(dir: &Path, index: usize) -> std::path::PathBuf {
    FileManager::new(dir, FILE_SIZE).unwrap().path_for(index).unwrap()
}

fn assert_file_holds(dir: &Path, index: usize, pattern: PatternKind, seed: u64) {
    let expected =
        PatternGenerator::for_file(pattern, seed, index).generate_chunk(FILE_SIZE as usize);
    let actual = std::fs::read(file_path(dir, index)).unwrap();
    assert!(actual == expected, "file {} does not hold {}", index, pattern);
}

fn write_pattern_file(dir: &Path, index: usize, pattern: PatternKind) {
    let data = PatternGenerator::for_file(pattern, 7, index).generate_chunk(FILE_SIZE as usize);
    std::fs::write(file_path(dir, index), data).unwrap();
}

fn wait_for_state(handle: &disktest_core::EngineHandle, state: EngineState) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while handle.state() != state {
        assert!(Instant::now() < deadline, "timed out waiting for {}", state);
        std::thread::sleep(Duration::from_millis(5));
    }
}

// ============================================================================
// Full runs
// ============================================================================

#[test]
fn test_full_run_three_files_two_patterns() {
    let dir = TempDir::new().unwrap();
    let report = engine(config(
        dir.path(),
        3,
        &[PatternKind::Random, PatternKind::Zero],
    ))
    .run();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(report.is_clean(), "errors: {:?}", report.errors);
    assert!(!report.session_retained);
    assert_eq!(report.completed_patterns.len(), 2);
    // 2 patterns x (write + verify) x 3 files
    assert_eq!(report.bytes_processed, 2 * 2 * 3 * FILE_SIZE);

    // Random runs last in canonical order
    for index in 0..3 {
        assert_file_holds(dir.path(), index, PatternKind::Random, 7);
    }
    assert!(!SessionStore::for_dir(dir.path()).exists());
}

#[test]
fn test_unaligned_file_size() {
    let dir = TempDir::new().unwrap();
    let cfg = TestConfig::new(dir.path())
        .file_size(10_000)
        .total_size(20_000)
        .chunk_size(CHUNK)
        .patterns(&[PatternKind::AltAA])
        .direct_io(false);
    let report = engine(cfg).run();

    assert!(report.is_clean(), "errors: {:?}", report.errors);
    let data = std::fs::read(file_path(dir.path(), 1)).unwrap();
    assert_eq!(data, vec![0xAA; 10_000]);
}

#[test]
fn test_progress_is_monotonic_and_reaches_total() {
    let dir = TempDir::new().unwrap();
    let (tx, rx) = crossbeam_channel::unbounded();
    let report = engine(config(dir.path(), 2, &[PatternKind::One, PatternKind::Random]))
        .with_sink(tx)
        .run();
    assert!(report.is_clean());

    let progress: Vec<_> = rx
        .try_iter()
        .filter_map(|event| match event {
            EngineEvent::Progress(p) => Some(p),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    for pair in progress.windows(2) {
        assert!(pair[1].bytes_done >= pair[0].bytes_done);
    }
    let last = progress.last().unwrap();
    assert_eq!(last.bytes_done, last.bytes_total);
    assert_eq!(last.bytes_total, 2 * 2 * 2 * FILE_SIZE);
}

// ============================================================================
// Error recording
// ============================================================================

#[test]
fn test_mismatch_is_recorded_and_run_continues() {
    let dir = TempDir::new().unwrap();
    let target = file_path(dir.path(), 1);
    let report = engine(config(dir.path(), 3, &[PatternKind::Zero]))
        .with_sink(CallbackSink(move |event| {
            if let EngineEvent::PhaseChanged {
                phase: Phase::Verify,
                ..
            } = event
            {
                let mut f = OpenOptions::new().write(true).open(&target).unwrap();
                f.seek(SeekFrom::Start(5000)).unwrap();
                f.write_all(&[0x2A]).unwrap();
            }
        }))
        .run();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.errors.len(), 1);
    let entry = &report.errors[0];
    assert_eq!(entry.file, "disktest_002.dat");
    assert_eq!(entry.file_index, 1);
    assert_eq!(entry.phase, Phase::Verify);
    assert_eq!(entry.offset, Some(5000));
    assert_eq!(entry.chunk_offset, Some(5000 - CHUNK as u64));
    assert_eq!(entry.expected, Some(0x00));
    assert_eq!(entry.actual, Some(0x2A));
    assert_eq!(entry.mismatched_bytes, Some(1));
    assert!(!entry.fatal);
}

#[test]
fn test_truncated_file_reports_short_read() {
    let dir = TempDir::new().unwrap();
    let target = file_path(dir.path(), 0);
    let report = engine(config(dir.path(), 2, &[PatternKind::One]))
        .with_sink(CallbackSink(move |event| {
            if let EngineEvent::PhaseChanged {
                phase: Phase::Verify,
                ..
            } = event
            {
                let f = OpenOptions::new().write(true).open(&target).unwrap();
                f.set_len(6000).unwrap();
            }
        }))
        .run();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.errors.len(), 1);
    let entry = &report.errors[0];
    assert_eq!(entry.file_index, 0);
    assert!(entry.cause.contains("Short read"), "cause: {}", entry.cause);
    assert_eq!(entry.expected, None);
    assert_eq!(entry.mismatched_bytes, None);
}

#[test]
fn test_missing_file_is_recorded() {
    let dir = TempDir::new().unwrap();
    let target = file_path(dir.path(), 2);
    let report = engine(config(dir.path(), 3, &[PatternKind::Alt55]))
        .with_sink(CallbackSink(move |event| {
            if let EngineEvent::PhaseChanged {
                phase: Phase::Verify,
                ..
            } = event
            {
                std::fs::remove_file(&target).unwrap();
            }
        }))
        .run();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].file_index, 2);
    assert!(report.errors[0].cause.contains("missing"));
}

// ============================================================================
// Stop, interrupt and resume
// ============================================================================

#[test]
fn test_interrupt_then_resume_completes() {
    let dir = TempDir::new().unwrap();
    let cfg = config(dir.path(), 3, &[PatternKind::Zero, PatternKind::Random]);
    let first = engine(cfg.clone());
    let control = first.control();
    let report = first
        .with_sink(CallbackSink(move |event| {
            if let EngineEvent::FileChanged {
                index: 1,
                phase: Phase::Write,
                ..
            } = event
            {
                control.interrupt();
            }
        }))
        .run();

    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert!(report.session_retained);

    let saved = SessionStore::for_dir(dir.path()).load().unwrap().unwrap();
    assert_eq!(saved.current_pattern, PatternKind::Zero);
    assert_eq!(saved.current_phase, Phase::Write);
    assert_eq!(saved.current_file_index, 1);
    assert_eq!(saved.current_chunk, 0);
    assert!(saved.completed_patterns.is_empty());

    let second = engine(cfg.resume(true));
    assert!(second.is_resumed());
    assert_eq!(second.session().resume_count, 1);
    let report = second.run();

    assert!(report.is_clean(), "errors: {:?}", report.errors);
    assert_eq!(report.completed_patterns.len(), 2);
    for index in 0..3 {
        assert_file_holds(dir.path(), index, PatternKind::Random, 7);
    }
    assert!(!SessionStore::for_dir(dir.path()).exists());
}

#[test]
fn test_stop_discards_session() {
    let dir = TempDir::new().unwrap();
    let first = engine(config(dir.path(), 2, &[PatternKind::One]));
    let control = first.control();
    let report = first
        .with_sink(CallbackSink(move |event| {
            if let EngineEvent::FileChanged { .. } = event {
                control.stop();
            }
        }))
        .run();

    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert!(!report.session_retained);
    assert!(!SessionStore::for_dir(dir.path()).exists());
}

#[test]
fn test_stop_after_current_file() {
    let dir = TempDir::new().unwrap();
    let first = engine(config(dir.path(), 3, &[PatternKind::AltAA]));
    let control = first.control();
    let report = first
        .with_sink(CallbackSink(move |event| {
            if let EngineEvent::FileChanged {
                index: 0,
                phase: Phase::Write,
                ..
            } = event
            {
                control.request_stop_after_file();
            }
        }))
        .run();

    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert!(report.session_retained);
    // File 0 was finished in full
    assert_eq!(report.bytes_processed, FILE_SIZE);
    let saved = SessionStore::for_dir(dir.path()).load().unwrap().unwrap();
    assert_eq!(saved.current_phase, Phase::Write);
    assert_eq!(saved.current_file_index, 1);
}

#[test]
fn test_pause_during_verify_persists_position() {
    let dir = TempDir::new().unwrap();
    let eng = engine(config(dir.path(), 2, &[PatternKind::Zero]));
    let control = eng.control();
    let handle = eng
        .with_sink(CallbackSink(move |event| {
            if let EngineEvent::PhaseChanged {
                phase: Phase::Verify,
                ..
            } = event
            {
                control.pause();
            }
        }))
        .start()
        .unwrap();

    wait_for_state(&handle, EngineState::Paused);
    let saved = SessionStore::for_dir(dir.path()).load().unwrap().unwrap();
    assert_eq!(saved.current_phase, Phase::Verify);
    assert_eq!(saved.current_file_index, 0);

    handle.resume();
    let report = handle.join().unwrap();
    assert!(report.is_clean());
}

#[test]
fn test_stop_while_paused() {
    let dir = TempDir::new().unwrap();
    let eng = engine(config(dir.path(), 2, &[PatternKind::Zero]));
    eng.control().pause();
    let handle = eng.start().unwrap();

    wait_for_state(&handle, EngineState::Paused);
    handle.interrupt();
    let report = handle.join().unwrap();
    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert!(report.session_retained);
    assert_eq!(report.bytes_processed, 0);
}

#[test]
fn test_resume_with_different_pattern_selection() {
    let dir = TempDir::new().unwrap();
    let cfg = config(dir.path(), 2, &[PatternKind::Zero, PatternKind::One]);
    let first = engine(cfg.clone());
    let control = first.control();
    first
        .with_sink(CallbackSink(move |event| {
            if let EngineEvent::PatternChanged {
                pattern: PatternKind::One,
                ..
            } = event
            {
                control.interrupt();
            }
        }))
        .run();

    let saved = SessionStore::for_dir(dir.path()).load().unwrap().unwrap();
    assert!(saved.completed_patterns.contains(&PatternKind::Zero));

    // Drop One and add Alt55; Zero stays completed
    let report = engine(
        cfg.patterns(&[PatternKind::Zero, PatternKind::Alt55])
            .resume(true),
    )
    .run();
    assert!(report.is_clean());
    assert!(report.completed_patterns.contains(&PatternKind::Alt55));
    assert_eq!(report.bytes_processed, 2 * 2 * FILE_SIZE);
}

#[test]
fn test_resume_with_added_earlier_pattern() {
    let dir = TempDir::new().unwrap();
    for index in 0..3 {
        write_pattern_file(dir.path(), index, PatternKind::One);
    }
    let mut session = SessionState::new(&config(dir.path(), 3, &[PatternKind::One]), 7).unwrap();
    session.current_phase = Phase::Verify;
    session.current_file_index = 1;
    session.current_chunk = 1;

    // Zero sorts before One, so it runs first and rewrites every file
    let report = engine(
        config(dir.path(), 3, &[PatternKind::Zero, PatternKind::One]).session(session),
    )
    .run();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
    assert!(report.completed_patterns.contains(&PatternKind::Zero));
    assert!(report.completed_patterns.contains(&PatternKind::One));
    assert_eq!(report.bytes_processed, 2 * 2 * 3 * FILE_SIZE);
    for index in 0..3 {
        assert_file_holds(dir.path(), index, PatternKind::One, 0);
    }
}

#[test]
fn test_resume_mid_verify_still_verifies_later_files() {
    let dir = TempDir::new().unwrap();
    for index in 0..3 {
        write_pattern_file(dir.path(), index, PatternKind::Zero);
        let mut f = OpenOptions::new()
            .write(true)
            .open(file_path(dir.path(), index))
            .unwrap();
        f.write_all(&[0x2A]).unwrap();
    }
    let cfg = config(dir.path(), 3, &[PatternKind::Zero]);
    let mut session = SessionState::new(&cfg, 7).unwrap();
    session.current_phase = Phase::Verify;
    session.current_file_index = 1;
    session.current_chunk = 2;

    let report = engine(cfg.session(session)).run();

    // File 0 was verified before the stop; file 1 resumes past its bad chunk
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.errors.len(), 1, "errors: {:?}", report.errors);
    let entry = &report.errors[0];
    assert_eq!(entry.file, "disktest_003.dat");
    assert_eq!(entry.file_index, 2);
    assert_eq!(entry.offset, Some(0));
    assert_eq!(entry.actual, Some(0x2A));
    assert!(report.completed_patterns.contains(&PatternKind::Zero));
    assert_eq!(report.bytes_processed, 2 * CHUNK as u64 + FILE_SIZE);
}

// ============================================================================
// Preflight checks
// ============================================================================

#[test]
fn test_insufficient_space_rejects_run() {
    let dir = TempDir::new().unwrap();
    let result =
        TestEngine::with_space_source(config(dir.path(), 4, &[PatternKind::Zero]), Fixed(1000));
    assert!(matches!(result, Err(Error::InsufficientSpace { .. })));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_existing_files_count_as_reusable_space() {
    let dir = TempDir::new().unwrap();
    for index in 0..2 {
        std::fs::write(file_path(dir.path(), index), vec![0u8; FILE_SIZE as usize]).unwrap();
    }
    let cfg = config(dir.path(), 2, &[PatternKind::Zero]);
    assert!(TestEngine::with_space_source(cfg.clone(), Fixed(0)).is_ok());
    assert!(TestEngine::with_space_source(cfg.total_size(3 * FILE_SIZE), Fixed(0)).is_err());
}

// ============================================================================
// Session persistence
// ============================================================================

#[test]
fn test_session_save_is_atomic() {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::for_dir(dir.path());
    let cfg = config(dir.path(), 2, &[PatternKind::Zero]);
    let mut state = SessionState::new(&cfg, 9).unwrap();

    store.save(&state).unwrap();
    state.current_file_index = 1;
    store.save(&state).unwrap();

    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["disktest_session.json".to_string()]);
    assert_eq!(store.load().unwrap().unwrap(), state);
}

#[test]
fn test_stale_temp_file_does_not_affect_load() {
    let dir = TempDir::new().unwrap();
    let store = SessionStore::for_dir(dir.path());
    let state = SessionState::new(&config(dir.path(), 1, &[PatternKind::One]), 1).unwrap();
    store.save(&state).unwrap();
    std::fs::write(dir.path().join("disktest_session.json.tmp"), "{ half").unwrap();

    assert_eq!(store.load().unwrap().unwrap(), state);
    store.delete().unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_corrupt_session_is_reported() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("disktest_session.json"), "not json").unwrap();
    let result = TestEngine::with_space_source(
        config(dir.path(), 1, &[PatternKind::Zero]).resume(true),
        Plenty,
    );
    assert!(matches!(result, Err(Error::SessionCorrupt { .. })));
}

// ============================================================================
// Orphan recovery
// ============================================================================

#[test]
fn test_orphans_reconstruct_and_finish() {
    let dir = TempDir::new().unwrap();
    let cfg = config(dir.path(), 4, &[PatternKind::Zero, PatternKind::One]);

    let current = Arc::new(Mutex::new(None));
    let first = engine(cfg.clone());
    let control = first.control();
    let seen = Arc::clone(&current);
    first
        .with_sink(CallbackSink(move |event| match event {
            EngineEvent::PatternChanged { pattern, .. } => *seen.lock().unwrap() = Some(pattern),
            EngineEvent::FileChanged {
                index: 2,
                phase: Phase::Write,
                ..
            } if *seen.lock().unwrap() == Some(PatternKind::One) => control.interrupt(),
            _ => {}
        }))
        .run();

    // Lose the session, keep the files
    let store = SessionStore::for_dir(dir.path());
    store.delete().unwrap();

    let files = FileManager::new(dir.path(), FILE_SIZE).unwrap();
    let analyzer = FileAnalyzer::new(files);
    assert!(analyzer.has_orphans(&store));

    let analyses = analyzer.analyze_all();
    assert_eq!(analyses[0].status, FileStatus::Complete);
    assert_eq!(analyses[0].pattern, Some(PatternKind::One));
    assert_eq!(analyses[2].status, FileStatus::CorruptOrIncomplete);
    assert_eq!(analyses[3].pattern, Some(PatternKind::Zero));

    let session = analyzer.reconstruct_session(&analyses, &cfg).unwrap();
    assert_eq!(session.current_pattern, PatternKind::One);
    assert_eq!(session.current_phase, Phase::Write);
    assert_eq!(session.current_file_index, 2);
    assert!(session.completed_patterns.contains(&PatternKind::Zero));

    let report = engine(cfg.session(session)).run();
    assert!(report.is_clean(), "errors: {:?}", report.errors);
    for index in 0..4 {
        assert_file_holds(dir.path(), index, PatternKind::One, 0);
    }
}

#[test]
fn test_recover_then_verify_random_files() {
    let dir = TempDir::new().unwrap();
    let files = FileManager::new(dir.path(), FILE_SIZE).unwrap();
    for index in [0usize, 2] {
        let data = PatternGenerator::for_file(PatternKind::Random, 7, index).generate_chunk(5000);
        std::fs::write(files.path_for(index).unwrap(), data).unwrap();
    }

    let report = FileAnalyzer::new(files).recover(Some(PatternKind::Random), Some(7));
    assert_eq!(report.expanded, vec![0, 2]);
    assert_eq!(report.gaps.created, vec![1]);
    for index in 0..3 {
        assert_file_holds(dir.path(), index, PatternKind::Random, 7);
    }
}

#[test]
fn test_reconstructed_session_keeps_observed_file_count() {
    let dir = TempDir::new().unwrap();
    for index in 0..3 {
        write_pattern_file(dir.path(), index, PatternKind::One);
    }
    write_pattern_file(dir.path(), 3, PatternKind::Zero);

    // Configured for two files, four found on disk
    let cfg = config(dir.path(), 2, &[PatternKind::Zero, PatternKind::One]);
    let analyzer = FileAnalyzer::new(FileManager::new(dir.path(), FILE_SIZE).unwrap());
    let session = analyzer
        .reconstruct_session(&analyzer.analyze_all(), &cfg)
        .unwrap();
    assert_eq!(session.file_count, 4);
    assert_eq!(session.current_pattern, PatternKind::One);
    assert_eq!(session.current_file_index, 3);

    let eng = TestEngine::with_space_source(cfg.recovered_session(session), Plenty).unwrap();
    assert_eq!(eng.session().file_count, 4);
    assert_eq!(eng.session().current_file_index, 3);

    let report = eng.run();
    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(report.is_clean(), "errors: {:?}", report.errors);
    assert_eq!(report.bytes_processed, FILE_SIZE + 4 * FILE_SIZE);
    for index in 0..4 {
        assert_file_holds(dir.path(), index, PatternKind::One, 0);
    }
}
