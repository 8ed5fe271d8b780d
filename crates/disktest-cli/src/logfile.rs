//! Plain-text run log
//!
//! Every engine log event is appended as `[YYYY-MM-DD HH:MM:SS] [LEVEL] message`
//! to `disktest_log.txt` in the target directory. When the target cannot be
//! written, the fallback directory is used instead.

use anyhow::{Context, Result};
use disktest_core::LogEntry;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Log file name
pub const LOG_FILE_NAME: &str = "disktest_log.txt";

/// An open run log
pub struct LogFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl LogFile {
    /// Open the log in `target`, or in `fallback` if that fails
    pub fn open(target: &Path, fallback: Option<&Path>) -> Result<Self> {
        match Self::open_in(target) {
            Ok(log) => Ok(log),
            Err(e) => {
                let fallback = fallback.with_context(|| {
                    format!(
                        "Cannot write log in {} and no fallback log directory is set",
                        target.display()
                    )
                })?;
                tracing::warn!(
                    "Cannot write log in {} ({:#}); using {}",
                    target.display(),
                    e,
                    fallback.display()
                );
                Self::open_in(fallback)
            }
        }
    }

    fn open_in(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Where the log is written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry. Failures are reported once through tracing.
    pub fn append(&mut self, entry: &LogEntry) {
        let line = format_line(entry);
        if let Err(e) = writeln!(self.writer, "{}", line).and_then(|_| self.writer.flush()) {
            tracing::debug!("Log write to {} failed: {}", self.path.display(), e);
        }
    }
}

/// Render one entry as a log line
pub fn format_line(entry: &LogEntry) -> String {
    format!(
        "[{}] [{}] {}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.level,
        entry.message
    )
}
