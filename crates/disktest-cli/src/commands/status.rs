//! Status command - shows the saved session and the files on disk

use anyhow::{Context, Result};
use console::style;
use disktest_core::{
    format_size, FileManager, SessionStore, SpaceAccountant, DEFAULT_FILE_SIZE,
};
use serde_json::json;
use std::path::Path;

/// Execute the status command
pub fn execute(dir: &Path, json: bool, silent: bool) -> Result<()> {
    let store = SessionStore::for_dir(dir);
    let session = match store.load() {
        Ok(session) => session,
        Err(e) => {
            if !silent {
                eprintln!("{} {}", style("Warning:").yellow().bold(), e);
            }
            None
        }
    };

    let file_size = session.as_ref().map_or(DEFAULT_FILE_SIZE, |s| s.file_size);
    let files = FileManager::new(dir, file_size)?
        .list_files()
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    let on_disk: u64 = files.iter().map(|f| f.size).sum();
    let free = SpaceAccountant::new().available(dir, 0).ok().map(|r| r.free);

    if silent {
        return Ok(());
    }

    if json {
        let output = json!({
            "target": dir,
            "session": session.as_ref().map(|s| s.info()),
            "files": files.len(),
            "bytes_on_disk": on_disk,
            "free_bytes": free,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{} {}", style("Target:").bold(), style(dir.display()).cyan());
    println!(
        "  Test files: {} ({})",
        files.len(),
        format_size(on_disk)
    );
    if let Some(free) = free {
        println!("  Free space: {}", format_size(free));
    }
    println!();

    let Some(session) = session else {
        println!("{}", style("No active session.").dim());
        if !files.is_empty() {
            println!(
                "  {} Test files exist without a session. 'disktest run' can continue from them, \
                 'disktest recover' can repair them, 'disktest purge' removes them.",
                style("ℹ").blue()
            );
        }
        return Ok(());
    };

    let info = session.info();
    println!("{}", style("Session").bold());
    println!("  Progress:  {:.1}%", info.percentage);
    println!("  Pattern:   {} ({} phase)", info.pattern, info.phase);
    println!("  File:      {}", info.file);
    println!(
        "  Patterns:  {}/{} complete",
        info.completed_patterns, info.total_patterns
    );
    println!("  Errors:    {}", info.error_count);
    println!("  Started:   {}", info.started);
    println!("  Elapsed:   {}", info.elapsed);
    println!("  Resumed:   {} times", info.resume_count);

    for entry in session.errors.iter().take(10) {
        println!("    {} {}", style("•").red(), entry);
    }
    if session.errors.len() > 10 {
        println!("    ... and {} more", session.errors.len() - 10);
    }

    Ok(())
}
