//! Caller-to-worker control signals
//!
//! Requests are recorded under a mutex and observed by the worker only at
//! chunk boundaries. Pausing parks the worker on a condition variable until
//! the caller resumes or stops it.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;

/// Lifecycle state of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Built but not started
    Idle,
    /// Processing chunks
    Running,
    /// Parked at a chunk boundary
    Paused,
    /// A stop was requested and is being carried out
    Stopping,
    /// Every selected pattern finished
    Completed,
    /// Stopped by the caller
    Stopped,
    /// Ended by a fatal error
    Error,
}

impl EngineState {
    /// Whether the worker has finished
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EngineState::Completed | EngineState::Stopped | EngineState::Error
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Running => "running",
            EngineState::Paused => "paused",
            EngineState::Stopping => "stopping",
            EngineState::Completed => "completed",
            EngineState::Stopped => "stopped",
            EngineState::Error => "error",
        };
        f.write_str(name)
    }
}

/// What happens to the session file when a stop takes effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Delete the session; the run cannot be resumed
    Abandon,
    /// Persist the session so the run can be resumed later
    Keep,
}

/// What the worker should do at a chunk boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Directive {
    Continue,
    Pause,
    Stop(StopMode),
}

#[derive(Debug)]
struct Signals {
    state: EngineState,
    pause_requested: bool,
    stop: Option<StopMode>,
    stop_after_file: bool,
}

/// Cloneable handle for steering a running engine
#[derive(Debug, Clone)]
pub struct EngineControl {
    inner: Arc<(Mutex<Signals>, Condvar)>,
}

impl Default for EngineControl {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineControl {
    /// Fresh control in the `Idle` state
    pub fn new() -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(Signals {
                    state: EngineState::Idle,
                    pause_requested: false,
                    stop: None,
                    stop_after_file: false,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Current state
    pub fn state(&self) -> EngineState {
        self.inner.0.lock().state
    }

    /// Pause after the in-flight chunk
    pub fn pause(&self) {
        let mut signals = self.inner.0.lock();
        if !signals.state.is_terminal() && signals.stop.is_none() {
            signals.pause_requested = true;
        }
    }

    /// Continue a paused run
    pub fn resume(&self) {
        let (lock, cvar) = &*self.inner;
        lock.lock().pause_requested = false;
        cvar.notify_all();
    }

    /// Stop after the in-flight chunk and discard the session
    pub fn stop(&self) {
        self.request_stop(StopMode::Abandon);
    }

    /// Stop after the in-flight chunk and keep the session for a later resume
    pub fn interrupt(&self) {
        self.request_stop(StopMode::Keep);
    }

    /// Finish the current file, then stop and keep the session
    pub fn request_stop_after_file(&self) {
        let mut signals = self.inner.0.lock();
        if !signals.state.is_terminal() {
            signals.stop_after_file = true;
        }
    }

    fn request_stop(&self, mode: StopMode) {
        let (lock, cvar) = &*self.inner;
        let mut signals = lock.lock();
        if signals.state.is_terminal() {
            return;
        }
        // The first stop request decides the mode.
        signals.stop.get_or_insert(mode);
        signals.pause_requested = false;
        if matches!(signals.state, EngineState::Running | EngineState::Paused) {
            signals.state = EngineState::Stopping;
        }
        cvar.notify_all();
    }

    pub(crate) fn set_state(&self, state: EngineState) {
        let mut signals = self.inner.0.lock();
        // A pending stop keeps the state at Stopping until the worker finishes.
        if signals.stop.is_some() && state == EngineState::Running {
            signals.state = EngineState::Stopping;
        } else {
            signals.state = state;
        }
    }

    pub(crate) fn directive(&self) -> Directive {
        let signals = self.inner.0.lock();
        if let Some(mode) = signals.stop {
            Directive::Stop(mode)
        } else if signals.pause_requested {
            Directive::Pause
        } else {
            Directive::Continue
        }
    }

    /// Consume a pending stop-after-file request
    pub(crate) fn take_stop_after_file(&self) -> bool {
        let mut signals = self.inner.0.lock();
        std::mem::take(&mut signals.stop_after_file)
    }

    /// Block until resumed or stopped. Returns the stop mode if stopped.
    pub(crate) fn wait_while_paused(&self) -> Option<StopMode> {
        let (lock, cvar) = &*self.inner;
        let mut signals = lock.lock();
        while signals.pause_requested && signals.stop.is_none() {
            cvar.wait(&mut signals);
        }
        signals.stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_initial_state() {
        let control = EngineControl::new();
        assert_eq!(control.state(), EngineState::Idle);
        assert_eq!(control.directive(), Directive::Continue);
    }

    #[test]
    fn test_pause_and_resume() {
        let control = EngineControl::new();
        control.set_state(EngineState::Running);
        control.pause();
        assert_eq!(control.directive(), Directive::Pause);
        control.resume();
        assert_eq!(control.directive(), Directive::Continue);
    }

    #[test]
    fn test_first_stop_mode_wins() {
        let control = EngineControl::new();
        control.set_state(EngineState::Running);
        control.interrupt();
        control.stop();
        assert_eq!(control.directive(), Directive::Stop(StopMode::Keep));
        assert_eq!(control.state(), EngineState::Stopping);

        // The worker cannot flip back to Running while a stop is pending
        control.set_state(EngineState::Running);
        assert_eq!(control.state(), EngineState::Stopping);
    }

    #[test]
    fn test_requests_ignored_after_finish() {
        let control = EngineControl::new();
        control.set_state(EngineState::Completed);
        control.stop();
        control.pause();
        assert_eq!(control.state(), EngineState::Completed);
        assert_eq!(control.directive(), Directive::Continue);
    }

    #[test]
    fn test_stop_after_file_is_consumed() {
        let control = EngineControl::new();
        control.request_stop_after_file();
        assert!(control.take_stop_after_file());
        assert!(!control.take_stop_after_file());
    }

    #[test]
    fn test_wait_while_paused_wakes_on_resume() {
        let control = EngineControl::new();
        control.set_state(EngineState::Running);
        control.pause();

        let worker = control.clone();
        let handle = thread::spawn(move || worker.wait_while_paused());
        thread::sleep(Duration::from_millis(50));
        control.resume();
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn test_wait_while_paused_wakes_on_stop() {
        let control = EngineControl::new();
        control.set_state(EngineState::Paused);
        control.pause();

        let worker = control.clone();
        let handle = thread::spawn(move || worker.wait_while_paused());
        thread::sleep(Duration::from_millis(50));
        control.stop();
        assert_eq!(handle.join().unwrap(), Some(StopMode::Abandon));
    }
}
