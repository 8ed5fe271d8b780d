//! Notifications from the engine worker to its caller
//!
//! The engine is the only producer. Callers pick a sink: a crossbeam
//! [`Sender`] for a consumer on another thread, a closure, or [`NullSink`].

use crate::engine::EngineState;
use crate::pattern::PatternKind;
use crate::progress::Progress;
use crate::session::{ErrorEntry, Phase};
use chrono::{DateTime, Local};
use crossbeam_channel::Sender;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    /// Routine information
    Info,
    /// A milestone reached without problems
    Success,
    /// Something degraded but the run continues
    Warning,
    /// A recorded error
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// A timestamped log line
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Severity
    pub level: LogLevel,
    /// Message text
    pub message: String,
    /// When the entry was produced
    pub timestamp: DateTime<Local>,
}

impl LogEntry {
    /// Entry stamped with the current local time
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Local::now(),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every selected pattern was written and verified
    Completed,
    /// The caller stopped the run
    Stopped,
    /// A fatal error ended the run
    Aborted(String),
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::Stopped => f.write_str("stopped"),
            RunOutcome::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// Summary returned when the worker finishes
#[derive(Debug, Clone)]
pub struct RunReport {
    /// How the run ended
    pub outcome: RunOutcome,
    /// Every error recorded over the whole run
    pub errors: Vec<ErrorEntry>,
    /// Patterns fully written and verified
    pub completed_patterns: BTreeSet<PatternKind>,
    /// Bytes written or verified by this process
    pub bytes_processed: u64,
    /// Time spent across all sessions
    pub elapsed: Duration,
    /// Whether the session file was kept for a later resume
    pub session_retained: bool,
}

impl RunReport {
    /// Completed with no recorded errors
    pub fn is_clean(&self) -> bool {
        self.outcome == RunOutcome::Completed && self.errors.is_empty()
    }
}

/// Event emitted by the engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Periodic progress
    Progress(Progress),
    /// Short status text
    Status(String),
    /// Log line
    Log(LogEntry),
    /// A recorded error
    Error(ErrorEntry),
    /// Engine state transition
    StateChanged(EngineState),
    /// A new pattern started
    PatternChanged {
        /// The pattern
        pattern: PatternKind,
        /// 0-based position in the selection
        index: usize,
        /// Selected pattern count
        total: usize,
    },
    /// A new phase started
    PhaseChanged {
        /// Pattern in effect
        pattern: PatternKind,
        /// The phase
        phase: Phase,
    },
    /// A new file started
    FileChanged {
        /// 0-based file index
        index: usize,
        /// Files per phase
        total: usize,
        /// Phase in effect
        phase: Phase,
    },
    /// The run finished
    Completed(RunReport),
}

/// Receiver side of the engine's notifications
pub trait EventSink: Send {
    /// Deliver one event. Must not block for long.
    fn emit(&mut self, event: EngineEvent);
}

impl EventSink for Sender<EngineEvent> {
    fn emit(&mut self, event: EngineEvent) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.send(event);
    }
}

/// Sink calling a closure for each event
pub struct CallbackSink<F>(pub F);

impl<F> EventSink for CallbackSink<F>
where
    F: FnMut(EngineEvent) + Send,
{
    fn emit(&mut self, event: EngineEvent) {
        (self.0)(event)
    }
}

/// Sink discarding every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: EngineEvent) {}
}
