//! Resume command - continues a saved session

use anyhow::{bail, Context, Result};
use console::style;
use dialoguer::Confirm;
use disktest_core::{
    format_size, parse_pattern_list, parse_size, validate_session, Error, SessionState,
    SessionStore, Settings, TestConfig, TestEngine,
};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::runner::{self, RunnerOptions};

/// Arguments for the resume command
pub struct ResumeArgs {
    pub dir: PathBuf,
    pub size: Option<String>,
    pub patterns: Option<String>,
    pub no_direct_io: bool,
    pub skip_confirm: bool,
    pub log_dir: Option<PathBuf>,
    pub cancel_flag: Arc<AtomicBool>,
    pub silent: bool,
}

/// Execute the resume command
pub fn execute(args: ResumeArgs) -> Result<()> {
    let silent = args.silent;
    let store = SessionStore::for_dir(&args.dir);

    let session = match store.load() {
        Ok(Some(session)) => session,
        Ok(None) => bail!(
            "No session found in {}.\nRun 'disktest run {} --size <SIZE>' to start a test.",
            args.dir.display(),
            args.dir.display()
        ),
        Err(Error::SessionCorrupt { path, reason }) => {
            return discard_corrupt(&store, &args.dir, &path, &reason, args.skip_confirm, silent);
        }
        Err(e) => return Err(e).context("Failed to load session"),
    };

    let info = session.info();
    println_if!(silent, "{}", style("Found session:").bold().cyan());
    println_if!(
        silent,
        "  Pattern {} ({} phase), file {}",
        info.pattern,
        info.phase,
        info.file
    );
    println_if!(
        silent,
        "  {:.1}% done, {} of {} patterns complete, {} errors so far",
        info.percentage,
        info.completed_patterns,
        info.total_patterns,
        info.error_count
    );
    println_if!(
        silent,
        "  Started {}, {} elapsed, resumed {} times",
        info.started,
        info.elapsed,
        info.resume_count
    );

    let config = build_config(&args, &session)?;
    let validation = validate_session(&session, &config);
    for warning in &validation.warnings {
        println_if!(silent, "  {} {}", style("Warning:").yellow(), warning);
    }
    if !validation.is_valid {
        bail!(
            "The session cannot be resumed with these settings:\n  {}",
            validation.errors.join("\n  ")
        );
    }

    if !args.skip_confirm {
        let proceed = Confirm::new()
            .with_prompt("Resume this test?")
            .default(true)
            .interact()?;
        if !proceed {
            println!("{}", style("Aborted.").yellow());
            return Ok(());
        }
    }

    let engine = TestEngine::new(config.session(session)).context("Cannot resume the test")?;
    println_if!(silent, "\n{}", style("Resuming...").bold());

    let log_dir = args
        .log_dir
        .clone()
        .or_else(|| Settings::load().logging.log_dir);
    let report = runner::drive(
        engine,
        &RunnerOptions {
            log_dir,
            cancel_flag: args.cancel_flag,
            silent,
        },
    )?;
    runner::print_report(&report, &args.dir, silent)
}

/// Configuration for continuing `session`, with optional size and pattern changes
fn build_config(args: &ResumeArgs, session: &SessionState) -> Result<TestConfig> {
    let total = match &args.size {
        Some(s) => parse_size(s).with_context(|| format!("Invalid size: {}", s))?,
        None => session.total_size,
    };
    let patterns = match &args.patterns {
        Some(s) => parse_pattern_list(s)?,
        None => session.selected_patterns.clone(),
    };
    if total != session.total_size {
        tracing::info!(
            "Total size changes from {} to {}",
            format_size(session.total_size),
            format_size(total)
        );
    }

    Ok(TestConfig::new(&args.dir)
        .file_size(session.file_size)
        .total_size(total)
        .chunk_size(session.chunk_size)
        .patterns(&patterns)
        .direct_io(!args.no_direct_io))
}

/// Offer to remove an unreadable session file
fn discard_corrupt(
    store: &SessionStore,
    dir: &std::path::Path,
    path: &std::path::Path,
    reason: &str,
    skip_confirm: bool,
    silent: bool,
) -> Result<()> {
    eprintln!(
        "{} Session file {} is unreadable: {}",
        style("Warning:").yellow().bold(),
        path.display(),
        reason
    );

    let discard = skip_confirm
        || Confirm::new()
            .with_prompt("Discard it so a fresh test can be started?")
            .default(false)
            .interact()?;
    if !discard {
        bail!("Session is corrupt; nothing was changed");
    }

    store.delete().context("Failed to delete session file")?;
    println_if!(
        silent,
        "  {} Session discarded. Test files were kept; run 'disktest run {} --size <SIZE>' to start over.",
        style("✓").green(),
        dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use disktest_core::PatternKind;
    use tempfile::TempDir;

    fn args(dir: &std::path::Path) -> ResumeArgs {
        ResumeArgs {
            dir: dir.to_path_buf(),
            size: None,
            patterns: None,
            no_direct_io: true,
            skip_confirm: true,
            log_dir: None,
            cancel_flag: Arc::new(AtomicBool::new(true)),
            silent: true,
        }
    }

    fn session(dir: &std::path::Path) -> SessionState {
        let config = TestConfig::new(dir)
            .file_size(16 * 1024)
            .total_size(32 * 1024)
            .chunk_size(4096)
            .patterns(&[PatternKind::One]);
        SessionState::new(&config, 1).unwrap()
    }

    #[test]
    fn test_build_config_keeps_session_shape() {
        let dir = TempDir::new().unwrap();
        let s = session(dir.path());
        let config = build_config(&args(dir.path()), &s).unwrap();
        assert_eq!(config.file_size, s.file_size);
        assert_eq!(config.total_size, s.total_size);
        assert_eq!(config.chunk_size, s.chunk_size);
        assert_eq!(config.patterns, s.selected_patterns);
    }

    #[test]
    fn test_build_config_with_overrides() {
        let dir = TempDir::new().unwrap();
        let s = session(dir.path());
        let mut a = args(dir.path());
        a.size = Some("64K".to_string());
        a.patterns = Some("FF,RND".to_string());
        let config = build_config(&a, &s).unwrap();
        assert_eq!(config.total_size, 64 * 1024);
        assert_eq!(config.patterns, vec![PatternKind::One, PatternKind::Random]);
    }

    #[test]
    fn test_missing_session() {
        let dir = TempDir::new().unwrap();
        let err = execute(args(dir.path())).unwrap_err();
        assert!(err.to_string().contains("No session found"));
    }

    #[test]
    fn test_corrupt_session_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("disktest_session.json");
        std::fs::write(&path, "garbage").unwrap();
        execute(args(dir.path())).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_resume_completes_session() {
        let dir = TempDir::new().unwrap();
        SessionStore::for_dir(dir.path())
            .save(&session(dir.path()))
            .unwrap();
        execute(args(dir.path())).unwrap();
        assert!(!SessionStore::for_dir(dir.path()).exists());
        let data = std::fs::read(dir.path().join("disktest_002.dat")).unwrap();
        assert_eq!(data, vec![0xFF; 16 * 1024]);
    }
}
