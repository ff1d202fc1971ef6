//! Progress bar utilities for CLI transfers

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use uptred_types::{TransferEvent, UploadStatus};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";

fn bar(total: u64, message: String) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let bar_style = ProgressStyle::default_bar()
        .template(BAR_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░  ");
    pb.set_style(bar_style);
    pb.set_message(message);
    pb
}

/// Progress bar for one upload, fed from core events
pub struct UploadProgress {
    pb: ProgressBar,
}

impl UploadProgress {
    pub fn new(name: String, visible: bool) -> Self {
        let pb = if visible { bar(0, name) } else { ProgressBar::hidden() };
        Self { pb }
    }

    /// Update the bar from an event
    pub fn handle_event(&self, event: &TransferEvent) {
        match event {
            TransferEvent::UploadProgress { uploaded, total, .. } => {
                self.pb.set_length((*total).max(0) as u64);
                self.pb.set_position((*uploaded).max(0) as u64);
            }

            TransferEvent::ChunkRetrying { index, attempt, error, .. } => {
                self.pb.println(format!(
                    "{} chunk {} attempt {} failed: {}",
                    style("!").yellow().bold(),
                    index,
                    attempt,
                    error
                ));
            }

            TransferEvent::UploadStatusChanged { status, error, .. } => match status {
                UploadStatus::Completed => {
                    self.pb.finish_with_message(format!("{} Upload complete", style("✓").green().bold()));
                }
                UploadStatus::Failed => {
                    self.pb.abandon_with_message(format!(
                        "{} Failed: {}",
                        style("✗").red().bold(),
                        error.as_deref().unwrap_or("Unknown error")
                    ));
                }
                UploadStatus::Cancelled => {
                    self.pb.abandon_with_message(format!("{} Cancelled", style("○").dim()));
                }
                _ => {}
            },

            TransferEvent::ChunkCompleted { .. } => {}
        }
    }

    pub fn clear(&self) {
        if !self.pb.is_finished() {
            self.pb.finish_and_clear();
        }
    }
}

/// Progress bar for a single request body, fed from the progress sink
pub fn request_bar(url: &str, visible: bool) -> ProgressBar {
    if visible {
        bar(0, url.to_string())
    } else {
        ProgressBar::hidden()
    }
}
