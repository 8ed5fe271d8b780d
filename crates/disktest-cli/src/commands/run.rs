//! Run command - starts a new test
//!
//! Handles:
//! - Merging command-line options with persistent settings
//! - Refusing to overwrite an existing session
//! - Offering to rebuild a session from orphaned test files
//! - Confirmation and the run itself

use anyhow::{bail, Context, Result};
use console::style;
use dialoguer::Confirm;
use disktest_core::{
    format_size, parse_pattern_list, parse_size, FileAnalyzer, FileManager, SessionStore,
    Settings, TestConfig, TestEngine,
};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::runner::{self, RunnerOptions};

/// Arguments for the run command
pub struct RunArgs {
    pub dir: PathBuf,
    pub size: String,
    pub file_size: Option<String>,
    pub patterns: Option<String>,
    pub chunk_size: Option<String>,
    pub seed: Option<u64>,
    pub no_direct_io: bool,
    pub skip_confirm: bool,
    pub log_dir: Option<PathBuf>,
    pub cancel_flag: Arc<AtomicBool>,
    pub silent: bool,
}

/// Execute the run command
pub fn execute(args: RunArgs) -> Result<()> {
    let silent = args.silent;
    let settings = Settings::load();
    let config = build_config(&args, &settings)?;

    let store = SessionStore::for_dir(&args.dir);
    if store.exists() {
        bail!(
            "A test session already exists in {}.\n\
             Run 'disktest resume {}' to continue it, or 'disktest purge {}' to discard it.",
            args.dir.display(),
            args.dir.display(),
            args.dir.display()
        );
    }

    let mut config = config;
    let analyzer = FileAnalyzer::new(FileManager::new(&args.dir, config.file_size)?);
    if analyzer.has_orphans(&store) {
        config = offer_recovery(&analyzer, config, args.skip_confirm, silent)?;
    }

    let file_count = config.file_count()?;
    let names: Vec<_> = config.patterns.iter().map(|p| p.short_name()).collect();
    println_if!(
        silent,
        "{} {}",
        style("Target:").bold(),
        style(args.dir.display()).cyan()
    );
    println_if!(
        silent,
        "  {} files x {} = {}",
        file_count,
        format_size(config.file_size),
        format_size(file_count as u64 * config.file_size)
    );
    println_if!(silent, "  Patterns: {}", names.join(", "));
    println_if!(silent, "  Chunk size: {}", format_size(config.chunk_size as u64));

    if !args.skip_confirm {
        println!();
        let proceed = Confirm::new()
            .with_prompt("Start the test? Existing test files will be overwritten")
            .default(true)
            .interact()?;
        if !proceed {
            println!("{}", style("Aborted.").yellow());
            return Ok(());
        }
    }

    let engine = TestEngine::new(config).context("Cannot start the test")?;
    println_if!(silent, "\n{}", style("Running...").bold());

    let log_dir = args.log_dir.clone().or(settings.logging.log_dir.clone());
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

/// Merge arguments over persistent settings
fn build_config(args: &RunArgs, settings: &Settings) -> Result<TestConfig> {
    let total = parse_size(&args.size).with_context(|| format!("Invalid size: {}", args.size))?;

    let file_size = match &args.file_size {
        Some(s) => parse_size(s).with_context(|| format!("Invalid file size: {}", s))?,
        None => settings
            .test
            .file_size_bytes()
            .context("Invalid file_size in settings")?,
    };
    // Small runs use a single file of the requested size.
    let file_size = file_size.min(total);

    let chunk_size = match &args.chunk_size {
        Some(s) => {
            let size = parse_size(s).with_context(|| format!("Invalid chunk size: {}", s))?;
            usize::try_from(size).with_context(|| format!("Chunk size too large: {}", s))?
        }
        None => settings
            .test
            .chunk_size_bytes()
            .context("Invalid chunk_size in settings")?,
    };

    let patterns = match &args.patterns {
        Some(s) => parse_pattern_list(s)?,
        None => settings
            .test
            .pattern_list()
            .context("Invalid patterns in settings")?,
    };

    let mut config = TestConfig::new(&args.dir)
        .file_size(file_size)
        .total_size(total)
        .chunk_size(chunk_size)
        .patterns(&patterns)
        .direct_io(!args.no_direct_io);
    if let Some(seed) = args.seed {
        config = config.seed(seed);
    }
    config.validate()?;
    Ok(config)
}

/// Describe orphaned files and offer to continue from them
fn offer_recovery(
    analyzer: &FileAnalyzer,
    config: TestConfig,
    skip_confirm: bool,
    silent: bool,
) -> Result<TestConfig> {
    let analyses = analyzer.analyze_all();
    let summary = FileAnalyzer::pattern_summary(&analyses);

    println_if!(
        silent,
        "{} Found {} test files without a session",
        style("ℹ").blue(),
        analyses.len()
    );
    for (pattern, count) in &summary.counts {
        println_if!(silent, "    {}: {} files", pattern.display_name(), count);
    }
    if summary.undetectable > 0 {
        println_if!(silent, "    unrecognised: {} files", summary.undetectable);
    }

    let Some(session) = analyzer.reconstruct_session(&analyses, &config) else {
        println_if!(
            silent,
            "  {} No resumable state found; the files will be overwritten",
            style("ℹ").blue()
        );
        return Ok(config);
    };

    println_if!(
        silent,
        "  Continuing is possible from {} file {}/{}",
        session.current_pattern.display_name(),
        session.current_file_index + 1,
        session.file_count
    );

    let resume = if skip_confirm {
        false
    } else {
        Confirm::new()
            .with_prompt("Continue from the existing files instead of starting over?")
            .default(true)
            .interact()?
    };

    Ok(if resume {
        config.recovered_session(session)
    } else {
        config
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use disktest_core::PatternKind;
    use tempfile::TempDir;

    fn args(dir: &std::path::Path) -> RunArgs {
        RunArgs {
            dir: dir.to_path_buf(),
            size: "64K".to_string(),
            file_size: Some("16K".to_string()),
            patterns: Some("rnd,00".to_string()),
            chunk_size: Some("4K".to_string()),
            seed: Some(5),
            no_direct_io: true,
            skip_confirm: true,
            log_dir: None,
            cancel_flag: Arc::new(AtomicBool::new(true)),
            silent: true,
        }
    }

    #[test]
    fn test_build_config_from_args() {
        let dir = TempDir::new().unwrap();
        let config = build_config(&args(dir.path()), &Settings::default()).unwrap();
        assert_eq!(config.file_size, 16 * 1024);
        assert_eq!(config.total_size, 64 * 1024);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.patterns, vec![PatternKind::Zero, PatternKind::Random]);
        assert_eq!(config.seed, Some(5));
        assert!(!config.direct_io);
    }

    #[test]
    fn test_build_config_uses_settings() {
        let dir = TempDir::new().unwrap();
        let mut a = args(dir.path());
        a.file_size = None;
        a.patterns = None;
        a.chunk_size = None;
        a.size = "4G".to_string();
        let config = build_config(&a, &Settings::default()).unwrap();
        assert_eq!(config.file_size, 1024 * 1024 * 1024);
        assert_eq!(config.chunk_size, 32 * 1024 * 1024);
        assert_eq!(config.patterns.len(), 5);
    }

    #[test]
    fn test_small_size_uses_one_file() {
        let dir = TempDir::new().unwrap();
        let mut a = args(dir.path());
        a.size = "8K".to_string();
        let config = build_config(&a, &Settings::default()).unwrap();
        assert_eq!(config.file_size, 8 * 1024);
        assert_eq!(config.file_count().unwrap(), 1);
    }

    #[test]
    fn test_build_config_rejects_bad_chunk() {
        let dir = TempDir::new().unwrap();
        let mut a = args(dir.path());
        a.chunk_size = Some("3K".to_string());
        assert!(build_config(&a, &Settings::default()).is_err());
    }

    #[test]
    fn test_refuses_existing_session() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("disktest_session.json"), "{}").unwrap();
        let err = execute(args(dir.path())).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
