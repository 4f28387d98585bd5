use bitarr_core::{ProgressEvent, ProgressReporter, ScanStatus};
use colored::*;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// One indicatif bar per scan root.
///
/// Starts as a spinner; becomes a bar once the counting pass reports a total.
pub struct CliReporter {
    label: String,
    bar: ProgressBar,
}

impl CliReporter {
    pub fn new(multi: &MultiProgress, label: impl Into<String>) -> Self {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.enable_steady_tick(Duration::from_millis(80));
        let label = label.into();
        bar.set_message(format!("{} starting...", label));
        Self { label, bar }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(TICKS)
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.cyan} [{bar:30.cyan/dim}] {pos}/{len} files ({eta} remaining) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("━╸─")
    .tick_chars(TICKS)
}

impl ProgressReporter for CliReporter {
    fn on_progress(&self, event: &ProgressEvent) {
        match event.status {
            ScanStatus::Pending => {}
            ScanStatus::Counting => {
                self.bar.set_message(format!("{} counting files...", self.label));
            }
            ScanStatus::Running => {
                if let Some(total) = event.total_files {
                    if self.bar.length() != Some(total) {
                        self.bar.set_style(bar_style());
                        self.bar.set_length(total);
                    }
                    self.bar.set_position(event.files_processed);
                    self.bar.set_message(self.label.clone());
                } else {
                    self.bar.set_message(format!(
                        "{} {} files checked",
                        self.label, event.files_processed
                    ));
                }
            }
            ScanStatus::Completed | ScanStatus::Stopped | ScanStatus::Failed => {
                self.bar.finish_and_clear();
            }
        }
    }

    fn on_warning(&self, _scan_id: i64, message: &str) {
        self.bar
            .println(format!("  {} {}", "!".yellow().bold(), message.yellow()));
    }
}
