//! Recover command - repairs orphaned test files
//!
//! Files that are shorter than the file size but carry one consistent pattern
//! are extended with the same stream a run would write, and missing indices
//! between existing files are created. Existing data is never overwritten.

use anyhow::{bail, Context, Result};
use console::style;
use disktest_core::{
    format_size, parse_size, FileAnalysis, FileAnalyzer, FileManager, FileStatus, PatternKind,
    RecoveryReport,
};
use std::path::PathBuf;

/// Arguments for the recover command
pub struct RecoverArgs {
    pub dir: PathBuf,
    pub file_size: String,
    pub pattern: Option<String>,
    pub seed: Option<u64>,
    pub silent: bool,
}

/// Execute the recover command
pub fn execute(args: RecoverArgs) -> Result<()> {
    let silent = args.silent;
    let file_size = parse_size(&args.file_size)
        .with_context(|| format!("Invalid file size: {}", args.file_size))?;
    let pattern: Option<PatternKind> = args.pattern.as_deref().map(str::parse).transpose()?;

    let files = FileManager::new(&args.dir, file_size)?;
    if !files.has_files() {
        bail!("No test files found in {}", args.dir.display());
    }

    println_if!(
        silent,
        "{} {}",
        style("Recovering:").bold(),
        style(args.dir.display()).cyan()
    );

    let report = FileAnalyzer::new(files).recover(pattern, args.seed);
    print_report(&report, silent);

    let failures = report.expand_failed.len() + report.gaps.failed.len();
    if report.pattern.is_none() {
        bail!("No recognisable pattern; nothing was repaired");
    }
    if failures > 0 {
        bail!("{} files could not be repaired", failures);
    }
    Ok(())
}

fn print_report(report: &RecoveryReport, silent: bool) {
    if let Some(pattern) = report.pattern {
        println_if!(silent, "  Pattern: {}", pattern.display_name());
    }
    for index in &report.expanded {
        println_if!(silent, "  {} Expanded file {}", style("✓").green(), index + 1);
    }
    for index in &report.gaps.created {
        println_if!(silent, "  {} Created file {}", style("✓").green(), index + 1);
    }
    for (index, reason) in report.expand_failed.iter().chain(&report.gaps.failed) {
        println_if!(silent, "  {} File {}: {}", style("✗").red(), index + 1, reason);
    }

    println_if!(silent);
    for analysis in &report.analyses {
        println_if!(silent, "  {}", describe(analysis));
    }
}

/// One line per analysed file
fn describe(analysis: &FileAnalysis) -> String {
    let name = analysis
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let pattern = analysis.pattern.map_or("?", |p| p.short_name());
    let status = match analysis.status {
        FileStatus::Complete => "complete",
        FileStatus::TooSmallButConsistent => "too small",
        FileStatus::CorruptOrIncomplete => "corrupt or incomplete",
    };
    format!(
        "{:<18} {:>10}  {:<4} {}",
        name,
        format_size(analysis.size),
        pattern,
        status
    )
}
