//! Progress reporting for batch runs.
//!
//! The dispatcher calls a [`ProgressObserver`] after every completed job.
//! [`ProgressReporter`] draws an indicatif bar; [`NoProgress`] ignores
//! everything.

use crate::job::JobResult;
use crate::tracker::{BatchSummary, Progress};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Receives batch progress events from the dispatch loop.
pub trait ProgressObserver: Send {
    /// Called once before the first job is admitted.
    fn on_start(&mut self, _total: usize) {}

    /// Called after each job completes.
    fn on_progress(&mut self, progress: Progress, result: &JobResult);

    /// Called once when the batch has finished or aborted.
    fn on_finish(&mut self, _summary: &BatchSummary) {}
}

/// Observer that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&mut self, _progress: Progress, _result: &JobResult) {}
}

/// Terminal progress bar.
#[derive(Default)]
pub struct ProgressReporter {
    bar: Option<ProgressBar>,
    success: usize,
    failed: usize,
}

impl ProgressReporter {
    /// Create a reporter; the bar is drawn once the batch starts.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressObserver for ProgressReporter {
    fn on_start(&mut self, total: usize) {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(100));
        self.bar = Some(bar);
    }

    fn on_progress(&mut self, progress: Progress, result: &JobResult) {
        if result.is_success() {
            self.success += 1;
        } else {
            self.failed += 1;
        }

        if let Some(bar) = &self.bar {
            bar.set_message(format!(
                "Success: {} | Failed: {} | Last: {:.0}ms",
                self.success,
                self.failed,
                result.duration().as_secs_f64() * 1000.0
            ));
            bar.set_position(progress.completed as u64);
        }
    }

    fn on_finish(&mut self, summary: &BatchSummary) {
        if let Some(bar) = self.bar.take() {
            if summary.attempted < summary.total {
                bar.abandon_with_message("Aborted");
            } else {
                bar.finish_with_message("Complete!");
            }
        }
    }
}

/// Observer that remembers every progress event, for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    /// Total announced by `on_start`.
    pub total: Option<usize>,
    /// Every progress value, in call order.
    pub events: Vec<Progress>,
    /// Whether `on_finish` was called.
    pub finished: bool,
}

impl ProgressObserver for RecordingObserver {
    fn on_start(&mut self, total: usize) {
        self.total = Some(total);
    }

    fn on_progress(&mut self, progress: Progress, _result: &JobResult) {
        self.events.push(progress);
    }

    fn on_finish(&mut self, _summary: &BatchSummary) {
        self.finished = true;
    }
}
