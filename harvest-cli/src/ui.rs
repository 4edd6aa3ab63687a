use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

use harvest_core::Stage;

/// Create a progress bar for a pipeline stage.
pub fn progress_bar(len: u64, label: &str) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("{msg:>26} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    bar.set_message(label.to_string());
    bar
}

/// Print a success message with green checkmark
pub fn success(message: &str) {
    println!("{} {}", "✓".bright_green().bold(), message);
}

/// Print a warning message with yellow warning icon
pub fn warning(message: &str) {
    println!("{} {}", "⚠".bright_yellow().bold(), message.yellow());
}

/// Print an error message with red X
pub fn error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message with blue info icon
pub fn info(message: &str) {
    println!("{} {}", "ℹ".bright_blue().bold(), message);
}

/// One progress bar at a time, switched as the pipeline moves through its
/// stages.
#[derive(Default)]
pub struct StageProgress {
    current: Option<(Stage, ProgressBar)>,
}

impl StageProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, stage: Stage, done: u64, total: u64) {
        let needs_new = match &self.current {
            Some((active, _)) => *active != stage,
            None => true,
        };

        if needs_new {
            if let Some((_, bar)) = self.current.take() {
                bar.finish();
            }
            let label = match stage {
                Stage::Catalog => "Storing plugin metadata",
                Stage::Fetch => "Downloading plugins",
                Stage::Audit => "Auditing plugins",
            };
            self.current = Some((stage, progress_bar(total, label)));
        }

        if let Some((_, bar)) = &self.current {
            bar.set_length(total);
            bar.set_position(done);
            if done >= total {
                bar.finish();
            }
        }
    }

    pub fn finish(&mut self) {
        if let Some((_, bar)) = self.current.take() {
            bar.finish();
        }
    }
}
