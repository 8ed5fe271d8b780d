//! Purge command - deletes test files and the session

use anyhow::{bail, Context, Result};
use console::style;
use dialoguer::Confirm;
use disktest_core::{format_size, FileManager, SessionStore, DEFAULT_FILE_SIZE};
use std::path::Path;

/// Execute the purge command
pub fn execute(dir: &Path, skip_confirm: bool, silent: bool) -> Result<()> {
    let store = SessionStore::for_dir(dir);
    let files = FileManager::new(dir, DEFAULT_FILE_SIZE)?;
    let entries = files
        .list_files()
        .with_context(|| format!("Failed to list {}", dir.display()))?;

    if entries.is_empty() && !store.exists() {
        println_if!(silent, "Nothing to purge in {}", dir.display());
        return Ok(());
    }

    let total: u64 = entries.iter().map(|f| f.size).sum();
    println_if!(
        silent,
        "{} {} test files ({}){}",
        style("Purge:").bold(),
        entries.len(),
        format_size(total),
        if store.exists() { " and the session" } else { "" }
    );

    if !skip_confirm {
        let proceed = Confirm::new()
            .with_prompt(format!("Delete them from {}?", dir.display()))
            .default(false)
            .interact()?;
        if !proceed {
            println!("{}", style("Aborted.").yellow());
            return Ok(());
        }
    }

    let (deleted, failed) = files.delete_all();
    store.delete().context("Failed to delete session file")?;

    println_if!(
        silent,
        "  {} Deleted {} files",
        style("✓").green(),
        deleted
    );
    if failed > 0 {
        bail!("{} files could not be deleted", failed);
    }
    Ok(())
}
