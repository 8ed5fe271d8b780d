//! # Disktest Core
//!
//! Core library for disktest, a filesystem-level storage tester. It fills a
//! target directory with numbered test files, writes each selected pattern
//! across them, reads everything back and records every mismatch.
//!
//! ## Modules
//!
//! - `engine`: Pattern × phase × file state machine with pause, stop and resume
//! - `session`: Crash-safe session persistence and compatibility checks
//! - `analyzer`: Orphan file detection, expansion, gap filling and session reconstruction
//! - `pattern`: Test patterns and the deterministic per-file stream generator
//! - `files`: Test file naming and enumeration
//! - `space`: Free-space accounting
//! - `progress`: Progress, speed and ETA calculations
//! - `events`: Events emitted by the engine
//! - `config`: Per-run configuration
//! - `settings`: Persistent user settings from configuration file
//! - `size`: Human-readable size parsing and formatting
//! - `error`: Error types and result aliases
//!
//! ## Example
//!
//! ```ignore
//! use disktest_core::{CallbackSink, EngineEvent, PatternKind, TestConfig, TestEngine};
//!
//! let config = TestConfig::new("/mnt/usb")
//!     .file_size(256 * 1024 * 1024)
//!     .total_size(4 * 1024 * 1024 * 1024)
//!     .patterns(&[PatternKind::AltAA, PatternKind::Random]);
//!
//! let engine = TestEngine::new(config)?.with_sink(CallbackSink(|event| {
//!     if let EngineEvent::Progress(p) = event {
//!         println!("{:.1}% - {}", p.percentage(), p.speed_display());
//!     }
//! }));
//!
//! let report = engine.run();
//! println!("{} ({} errors)", report.outcome, report.errors.len());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analyzer;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod files;
pub mod pattern;
pub mod progress;
pub mod session;
pub mod settings;
pub mod size;
pub mod space;

pub use analyzer::{
    Categorized, FileAnalysis, FileAnalyzer, FileStatus, GapFillReport, PatternSummary,
    RecoveryReport,
};
pub use config::{TestConfig, DEFAULT_CHUNK_SIZE, DEFAULT_FILE_SIZE};
pub use engine::{EngineControl, EngineHandle, EngineState, StopMode, TestEngine};
pub use error::{Error, Result};
pub use events::{
    CallbackSink, EngineEvent, EventSink, LogEntry, LogLevel, NullSink, RunOutcome, RunReport,
};
pub use files::{FileManager, TestFileEntry};
pub use pattern::{parse_pattern_list, PatternGenerator, PatternKind};
pub use progress::{format_duration, format_speed, Progress};
pub use session::{
    validate_session, ErrorEntry, Phase, SessionInfo, SessionState, SessionStore,
    SessionValidation,
};
pub use settings::{BehaviorSettings, LoggingSettings, Settings, SettingsError, TestSettings};
pub use size::{format_size, parse_size};
pub use space::{FreeSpace, SpaceAccountant, SpaceReport, SystemFreeSpace};
