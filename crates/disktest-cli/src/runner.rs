//! Drives a prepared engine on its worker thread and renders its events

use anyhow::{Context, Result};
use console::style;
use crossbeam_channel::RecvTimeoutError;
use disktest_core::{
    format_size, EngineEvent, LogLevel, RunOutcome, RunReport, TestEngine,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::logfile::LogFile;
use crate::progress::RunDisplay;

/// How often the event loop checks the Ctrl+C flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Options shared by `run` and `resume`
pub struct RunnerOptions {
    /// Fallback directory for the log file
    pub log_dir: Option<PathBuf>,
    /// Cleared by the Ctrl+C handler
    pub cancel_flag: Arc<AtomicBool>,
    /// Suppress all output
    pub silent: bool,
}

/// Start `engine`, render its events until it finishes, and return its report
pub fn drive(engine: TestEngine, options: &RunnerOptions) -> Result<RunReport> {
    let silent = options.silent;
    let target = engine.config().target_dir.clone();

    let mut log = match LogFile::open(&target, options.log_dir.as_deref()) {
        Ok(log) => {
            tracing::debug!("Logging to {}", log.path().display());
            Some(log)
        }
        Err(e) => {
            tracing::warn!("Running without a log file: {:#}", e);
            None
        }
    };

    let (tx, rx) = crossbeam_channel::unbounded();
    let handle = engine
        .with_sink(tx)
        .start()
        .context("Failed to start the test worker")?;

    let display = RunDisplay::new(silent);
    let mut interrupted = false;

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => match event {
                EngineEvent::Progress(progress) => display.update(&progress),
                EngineEvent::Log(entry) => {
                    if let Some(log) = log.as_mut() {
                        log.append(&entry);
                    }
                    if entry.level == LogLevel::Error && !silent {
                        display.println(format!("  {} {}", style("✗").red(), entry.message));
                    }
                }
                _ => {}
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if !interrupted && !options.cancel_flag.load(Ordering::SeqCst) {
            interrupted = true;
            handle.interrupt();
            if !silent {
                display.println(format!(
                    "  {} Stopping at the next chunk; the session will be kept",
                    style("ℹ").blue()
                ));
            }
        }
    }

    display.finish();
    handle.join().context("Test worker failed")
}

/// Print the end-of-run summary. Fails when the run aborted or found errors.
pub fn print_report(report: &RunReport, target: &std::path::Path, silent: bool) -> Result<()> {
    println_if!(silent);
    match &report.outcome {
        RunOutcome::Completed if report.errors.is_empty() => {
            println_if!(
                silent,
                "{}",
                style("✓ Test complete: no errors found").green().bold()
            );
        }
        RunOutcome::Completed => {
            println_if!(
                silent,
                "{}",
                style(format!(
                    "✗ Test complete: {} errors found",
                    report.errors.len()
                ))
                .red()
                .bold()
            );
        }
        RunOutcome::Stopped => {
            println_if!(silent, "{}", style("Test stopped.").yellow());
            if report.session_retained {
                println_if!(
                    silent,
                    "  Run 'disktest resume {}' to continue",
                    target.display()
                );
            }
        }
        RunOutcome::Aborted(reason) => {
            eprintln!("{} {}", style("Test aborted:").red().bold(), reason);
        }
    }

    println_if!(
        silent,
        "  Processed {} in {}",
        format_size(report.bytes_processed),
        disktest_core::format_duration(report.elapsed.as_secs())
    );

    for entry in report.errors.iter().take(20) {
        println_if!(silent, "  {} {}", style("•").red(), entry);
    }
    if report.errors.len() > 20 {
        println_if!(
            silent,
            "  ... and {} more (see {})",
            report.errors.len() - 20,
            crate::logfile::LOG_FILE_NAME
        );
    }

    match &report.outcome {
        RunOutcome::Aborted(reason) => anyhow::bail!("Test aborted: {}", reason),
        RunOutcome::Completed if !report.errors.is_empty() => {
            anyhow::bail!("{} errors found", report.errors.len())
        }
        _ => Ok(()),
    }
}
