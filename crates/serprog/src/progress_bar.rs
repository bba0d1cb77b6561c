use std::io::Stdout;

use log::{max_level, LevelFilter};
use pbr::{ProgressBar, Units};
use serprog_core::ProgressReporter;

/// Renders a step-based progress bar, suppressed when the active log
/// filter is above `Info` so it doesn't interleave with debug output.
pub struct ProgressBarReporter {
    pb: Option<ProgressBar<Stdout>>,
}

impl ProgressReporter for ProgressBarReporter {
    fn start(&mut self, total_steps: usize) {
        if let Some(pb) = self.pb.as_mut() {
            pb.total = total_steps as u64;
            pb.set_units(Units::Default);
        }
    }

    fn advance(&mut self, steps: usize) {
        if let Some(pb) = self.pb.as_mut() {
            pb.add(steps as u64);
        }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.pb.as_mut() {
            pb.finish();
        }
    }
}

impl ProgressBarReporter {
    pub fn new() -> Self {
        let should_show = max_level() >= LevelFilter::Info;

        if should_show {
            Self {
                pb: Some(ProgressBar::new(0)),
            }
        } else {
            Self { pb: None }
        }
    }
}

impl Default for ProgressBarReporter {
    fn default() -> Self {
        Self::new()
    }
}
