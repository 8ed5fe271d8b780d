//! The test execution engine
//!
//! A [`TestEngine`] is built from a [`TestConfig`], which either starts a
//! fresh session or continues a saved one. Building performs every check that
//! can reject a run (configuration, session compatibility, disk space) before
//! anything on disk changes. [`TestEngine::run`] then drives the
//! pattern × phase × file loop on the calling thread, and
//! [`TestEngine::start`] runs the same loop on a dedicated worker thread.
//!
//! # Example
//!
//! ```ignore
//! use disktest_core::{TestConfig, TestEngine, PatternKind};
//!
//! let config = TestConfig::new("/mnt/usb")
//!     .file_size(1 << 30)
//!     .total_size(8 << 30)
//!     .patterns(&[PatternKind::Zero, PatternKind::Random]);
//!
//! let (tx, rx) = crossbeam_channel::unbounded();
//! let handle = TestEngine::new(config)?.with_sink(tx).start()?;
//! for event in rx {
//!     println!("{:?}", event);
//! }
//! let report = handle.join()?;
//! ```

mod chunk;
mod control;
mod run;

pub use control::{EngineControl, EngineState, StopMode};

use crate::config::TestConfig;
use crate::events::{EventSink, NullSink, RunReport};
use crate::files::FileManager;
use crate::pattern::{generate_seed, PatternKind};
use crate::session::{validate_session, Phase, SessionState, SessionStore};
use crate::space::{FreeSpace, SpaceAccountant, SystemFreeSpace};
use crate::{Error, Result};
use std::thread::{self, JoinHandle};

/// Position a run was at when the engine was built.
///
/// Skip decisions for already-done work are made against this snapshot,
/// never against the live session, which moves on as soon as work starts.
/// The run loop hands it to the first pattern it runs and to no other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResumePoint {
    pattern: PatternKind,
    phase: Phase,
    file_index: usize,
    chunk: u64,
}

impl ResumePoint {
    fn capture(session: &SessionState) -> Self {
        Self {
            pattern: session.current_pattern,
            phase: session.current_phase,
            file_index: session.current_file_index,
            chunk: session.current_chunk,
        }
    }

    /// Where the write phase of `pattern` starts; `None` if it is already done
    pub(crate) fn write_start(&self, pattern: PatternKind) -> Option<(usize, u64)> {
        if pattern != self.pattern {
            return Some((0, 0));
        }
        match self.phase {
            Phase::Write => Some((self.file_index, self.chunk)),
            Phase::Verify => None,
        }
    }

    /// Where the verify phase of `pattern` starts
    pub(crate) fn verify_start(&self, pattern: PatternKind) -> (usize, u64) {
        if pattern == self.pattern && self.phase == Phase::Verify {
            (self.file_index, self.chunk)
        } else {
            (0, 0)
        }
    }
}

/// Runs one write/verify test over a target directory
pub struct TestEngine {
    config: TestConfig,
    files: FileManager,
    store: SessionStore,
    session: SessionState,
    snapshot: Option<ResumePoint>,
    resumed: bool,
    warnings: Vec<String>,
    control: EngineControl,
    sink: Box<dyn EventSink>,
}

impl TestEngine {
    /// Build an engine, checking free space with the OS
    pub fn new(config: TestConfig) -> Result<Self> {
        Self::with_space_source(config, SystemFreeSpace)
    }

    /// Build an engine with a custom free-space source
    pub fn with_space_source<F: FreeSpace>(config: TestConfig, space: F) -> Result<Self> {
        config.validate()?;
        let file_count = config.file_count()?;
        let files = FileManager::new(&config.target_dir, config.file_size)?;
        let store = SessionStore::for_dir(&config.target_dir);
        let mut warnings = Vec::new();

        let prior = match &config.session {
            Some(session) => Some(session.clone()),
            None if config.resume => Some(store.load()?.ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "no session to resume in {}",
                    config.target_dir.display()
                ))
            })?),
            None => None,
        };

        let resumed = prior.is_some();
        let session = match prior {
            Some(mut session) => {
                let validation = validate_session(&session, &config);
                if !validation.is_valid {
                    return Err(Error::InvalidConfig(validation.errors.join("; ")));
                }
                for warning in &validation.warnings {
                    tracing::warn!("{}", warning);
                }
                warnings.extend(validation.warnings);
                apply_config(&mut session, &config, file_count, &mut warnings);
                session
            }
            None => {
                if store.exists() {
                    return Err(Error::SessionActive {
                        path: store.path().to_path_buf(),
                    });
                }
                SessionState::new(&config, config.seed.unwrap_or_else(generate_seed))?
            }
        };

        // Fresh starts and resumes go through the same check.
        let requested = file_count as u64 * config.file_size;
        let reusable = files.relevant_files_size(file_count)?;
        SpaceAccountant::with_source(space).ensure(&config.target_dir, reusable, requested)?;

        let snapshot = ResumePoint::capture(&session);
        tracing::debug!("Engine prepared at {:?} (resumed: {})", snapshot, resumed);

        Ok(Self {
            config,
            files,
            store,
            session,
            snapshot: Some(snapshot),
            resumed,
            warnings,
            control: EngineControl::new(),
            sink: Box::new(NullSink),
        })
    }

    /// Send events to `sink`
    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Control handle; clone it before calling [`run`](Self::run)
    pub fn control(&self) -> EngineControl {
        self.control.clone()
    }

    /// Session the run starts from
    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Configuration of the run
    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Whether the run continues a saved session
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// Run on a dedicated worker thread
    pub fn start(self) -> Result<EngineHandle> {
        let control = self.control.clone();
        let worker = thread::Builder::new()
            .name("disktest-engine".to_string())
            .spawn(move || self.run())?;
        Ok(EngineHandle { control, worker })
    }
}

/// Fold a changed configuration into a resumed session
fn apply_config(
    session: &mut SessionState,
    config: &TestConfig,
    file_count: usize,
    warnings: &mut Vec<String>,
) {
    let previous_count = session.file_count;
    session.total_size = config.total_size;
    session.file_count = file_count;
    session.selected_patterns = config.patterns.clone();
    session.resume_count += 1;

    let current_kept = session.selected_patterns.contains(&session.current_pattern)
        && !session.completed_patterns.contains(&session.current_pattern);
    let earlier_pending = session
        .first_pending_pattern()
        .filter(|p| *p < session.current_pattern);

    if !current_kept {
        if let Some(next) = session.first_pending_pattern() {
            session.current_pattern = next;
        } else if let Some(&first) = session.selected_patterns.first() {
            session.current_pattern = first;
        }
        session.current_phase = Phase::Write;
        session.current_file_index = 0;
        session.current_chunk = 0;
    } else if let Some(earlier) = earlier_pending {
        // The added pattern overwrites every file before the saved one runs again.
        let message = format!(
            "Pattern {} was added and runs before {}; {} starts over after it",
            earlier.display_name(),
            session.current_pattern.display_name(),
            session.current_pattern.display_name()
        );
        tracing::warn!("{}", message);
        warnings.push(message);
        session.current_pattern = earlier;
        session.current_phase = Phase::Write;
        session.current_file_index = 0;
        session.current_chunk = 0;
    } else if file_count > previous_count && session.current_phase == Phase::Verify {
        // Files added mid-verify have not been written for this pattern yet.
        let message = format!(
            "File count grew from {} to {} during verification; writing the new files before verifying again",
            previous_count, file_count
        );
        tracing::warn!("{}", message);
        warnings.push(message);
        session.current_phase = Phase::Write;
        session.current_file_index = previous_count;
        session.current_chunk = 0;
    }
}

/// Handle to an engine running on its worker thread
pub struct EngineHandle {
    control: EngineControl,
    worker: JoinHandle<RunReport>,
}

impl EngineHandle {
    /// Control handle
    pub fn control(&self) -> EngineControl {
        self.control.clone()
    }

    /// Pause after the in-flight chunk
    pub fn pause(&self) {
        self.control.pause();
    }

    /// Continue a paused run
    pub fn resume(&self) {
        self.control.resume();
    }

    /// Stop and discard the session
    pub fn stop(&self) {
        self.control.stop();
    }

    /// Stop and keep the session
    pub fn interrupt(&self) {
        self.control.interrupt();
    }

    /// Finish the current file, then stop and keep the session
    pub fn request_stop_after_file(&self) {
        self.control.request_stop_after_file();
    }

    /// Current state
    pub fn state(&self) -> EngineState {
        self.control.state()
    }

    /// Whether the worker has exited
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker and return its report
    pub fn join(self) -> Result<RunReport> {
        self.worker
            .join()
            .map_err(|_| Error::Io(std::io::Error::other("engine worker panicked")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    const KIB: u64 = 1024;

    struct Plenty;

    impl FreeSpace for Plenty {
        fn free_bytes(&self, _path: &Path) -> Result<u64> {
            Ok(u64::MAX / 2)
        }
    }

    fn config(dir: &Path) -> TestConfig {
        TestConfig::new(dir)
            .file_size(16 * KIB)
            .total_size(48 * KIB)
            .chunk_size(4 * KIB as usize)
            .patterns(&[PatternKind::Zero, PatternKind::Random])
            .direct_io(false)
    }

    // -------------------------------------------------------------------------
    // ResumePoint tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_resume_point_write() {
        let point = ResumePoint {
            pattern: PatternKind::One,
            phase: Phase::Write,
            file_index: 1,
            chunk: 2,
        };
        assert_eq!(point.write_start(PatternKind::One), Some((1, 2)));
        assert_eq!(point.verify_start(PatternKind::One), (0, 0));
        // Later patterns start from the beginning
        assert_eq!(point.write_start(PatternKind::Random), Some((0, 0)));
    }

    #[test]
    fn test_resume_point_verify() {
        let point = ResumePoint {
            pattern: PatternKind::Zero,
            phase: Phase::Verify,
            file_index: 1,
            chunk: 5,
        };
        assert_eq!(point.write_start(PatternKind::Zero), None);
        assert_eq!(point.verify_start(PatternKind::Zero), (1, 5));
        assert_eq!(point.verify_start(PatternKind::Random), (0, 0));
    }

    // -------------------------------------------------------------------------
    // Preparation tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_fresh_engine() {
        let dir = TempDir::new().unwrap();
        let engine = TestEngine::with_space_source(config(dir.path()).seed(3), Plenty).unwrap();
        assert!(!engine.is_resumed());
        assert_eq!(engine.session().file_count, 3);
        assert_eq!(engine.session().seed, 3);
        assert_eq!(engine.control().state(), EngineState::Idle);
        // Nothing written before the run starts
        assert!(!SessionStore::for_dir(dir.path()).exists());
    }

    #[test]
    fn test_fresh_engine_refuses_existing_session() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        SessionStore::for_dir(dir.path())
            .save(&SessionState::new(&cfg, 1).unwrap())
            .unwrap();
        assert!(matches!(
            TestEngine::with_space_source(cfg, Plenty),
            Err(Error::SessionActive { .. })
        ));
    }

    #[test]
    fn test_resume_without_session() {
        let dir = TempDir::new().unwrap();
        let result = TestEngine::with_space_source(config(dir.path()).resume(true), Plenty);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_resume_incompatible_session() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let session = SessionState::new(&cfg, 1).unwrap();
        let result =
            TestEngine::with_space_source(cfg.chunk_size(8 * KIB as usize).session(session), Plenty);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_apply_config_drops_unselected_pattern() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let mut session = SessionState::new(&cfg, 1).unwrap();
        session.current_pattern = PatternKind::Zero;
        session.current_phase = Phase::Verify;
        session.current_file_index = 2;

        let engine = TestEngine::with_space_source(
            cfg.patterns(&[PatternKind::Random]).session(session),
            Plenty,
        )
        .unwrap();
        let resumed = engine.session();
        assert_eq!(resumed.current_pattern, PatternKind::Random);
        assert_eq!(resumed.current_phase, Phase::Write);
        assert_eq!(resumed.current_file_index, 0);
        assert_eq!(resumed.resume_count, 1);
    }

    #[test]
    fn test_apply_config_added_earlier_pattern() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path()).patterns(&[PatternKind::One]);
        let mut session = SessionState::new(&cfg, 1).unwrap();
        session.current_phase = Phase::Verify;
        session.current_file_index = 1;
        session.current_chunk = 1;

        let engine = TestEngine::with_space_source(
            cfg.patterns(&[PatternKind::Zero, PatternKind::One]).session(session),
            Plenty,
        )
        .unwrap();
        let resumed = engine.session();
        assert_eq!(resumed.current_pattern, PatternKind::Zero);
        assert_eq!(resumed.current_phase, Phase::Write);
        assert_eq!(resumed.current_file_index, 0);
        assert_eq!(resumed.current_chunk, 0);
        assert!(engine.warnings.iter().any(|w| w.contains("starts over")));
    }

    #[test]
    fn test_apply_config_grown_during_verify() {
        let dir = TempDir::new().unwrap();
        let cfg = config(dir.path());
        let mut session = SessionState::new(&cfg, 1).unwrap();
        session.current_phase = Phase::Verify;
        session.current_file_index = 1;

        let engine =
            TestEngine::with_space_source(cfg.total_size(80 * KIB).session(session), Plenty)
                .unwrap();
        let resumed = engine.session();
        assert_eq!(resumed.file_count, 5);
        assert_eq!(resumed.current_phase, Phase::Write);
        assert_eq!(resumed.current_file_index, 3);
        assert_eq!(engine.warnings.len(), 2);
    }

    #[test]
    fn test_insufficient_space_blocks_fresh_start() {
        struct Tiny;
        impl FreeSpace for Tiny {
            fn free_bytes(&self, _path: &Path) -> Result<u64> {
                Ok(KIB)
            }
        }
        let dir = TempDir::new().unwrap();
        let result = TestEngine::with_space_source(config(dir.path()), Tiny);
        assert!(matches!(result, Err(Error::InsufficientSpace { .. })));
    }
}
