//! Progress bar for a running test

use console::style;
use disktest_core::{Phase, Progress};
use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str =
    "  {spinner:.green} [{bar:40.cyan/blue}] {percent:>3}% {bytes}/{total_bytes} {msg}";

/// Renders engine progress events on one indicatif bar
pub struct RunDisplay {
    bar: ProgressBar,
}

impl RunDisplay {
    /// A visible bar, or a hidden one when `silent`
    pub fn new(silent: bool) -> Self {
        if silent {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template(TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓░");
        bar.set_style(style);
        Self { bar }
    }

    /// Show one progress snapshot
    pub fn update(&self, progress: &Progress) {
        if self.bar.length() != Some(progress.bytes_total) {
            self.bar.set_length(progress.bytes_total);
        }
        self.bar.set_position(progress.bytes_done);
        self.bar.set_message(status_line(progress));
    }

    /// Print a line above the bar
    pub fn println(&self, message: impl AsRef<str>) {
        self.bar.println(message);
    }

    /// Remove the bar
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

/// `RND Verify 3/10 | 1/5 | 45.20 MB/s | ETA 2m 10s`
pub fn status_line(progress: &Progress) -> String {
    let phase = match progress.phase {
        Phase::Write => style("Write").yellow(),
        Phase::Verify => style("Verify").cyan(),
    };
    format!(
        "{} {} {}/{} | {}/{} | {} | ETA {}",
        style(progress.pattern.short_name()).bold(),
        phase,
        (progress.file_index + 1).min(progress.file_count),
        progress.file_count,
        progress.pattern_index + 1,
        progress.pattern_count,
        progress.speed_display(),
        progress.eta_display()
    )
}
