//! Statistics tracking for a batch run.
//!
//! The tracker is owned by the dispatch loop and updated once per completed
//! job, so it needs no synchronization.

use crate::job::JobResult;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Running counters for one batch.
#[derive(Debug)]
pub struct BatchTracker {
    /// Start time of the batch.
    start_time: Instant,
    /// Number of prompts in the batch.
    total: usize,
    /// Jobs that produced a result.
    completed: usize,
    /// Successful jobs.
    success_count: usize,
    /// Failed jobs.
    failure_count: usize,
    /// Summed latency of successful jobs.
    total_latency: Duration,
}

impl BatchTracker {
    /// Start tracking a batch of `total` prompts.
    pub fn new(total: usize) -> Self {
        Self {
            start_time: Instant::now(),
            total,
            completed: 0,
            success_count: 0,
            failure_count: 0,
            total_latency: Duration::ZERO,
        }
    }

    /// Record a finished job and return the new progress.
    pub fn record(&mut self, result: &JobResult) -> Progress {
        self.completed += 1;
        if result.is_success() {
            self.success_count += 1;
            self.total_latency += result.duration();
        } else {
            self.failure_count += 1;
        }
        self.progress()
    }

    /// Current progress.
    pub fn progress(&self) -> Progress {
        Progress::new(self.completed, self.total)
    }

    /// Summary of the batch so far.
    pub fn summary(&self) -> BatchSummary {
        let avg_latency_ms = if self.success_count > 0 {
            self.total_latency.as_secs_f64() * 1000.0 / self.success_count as f64
        } else {
            0.0
        };

        BatchSummary {
            total: self.total,
            attempted: self.completed,
            success_count: self.success_count,
            failure_count: self.failure_count,
            elapsed: self.start_time.elapsed(),
            avg_latency_ms,
        }
    }
}

/// How far a batch has come.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Jobs with a result.
    pub completed: usize,
    /// Prompts in the batch.
    pub total: usize,
    /// Completion percentage, clamped to 100.
    pub percent: f64,
}

impl Progress {
    /// Progress for `completed` out of `total` jobs.
    pub fn new(completed: usize, total: usize) -> Self {
        let percent = if total > 0 {
            (completed as f64 / total as f64 * 100.0).min(100.0)
        } else {
            100.0
        };
        Self {
            completed,
            total,
            percent,
        }
    }
}

/// Aggregate statistics of a finished (or aborted) batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    /// Prompts in the batch.
    pub total: usize,
    /// Jobs that produced a result.
    pub attempted: usize,
    /// Successful jobs.
    pub success_count: usize,
    /// Failed jobs.
    pub failure_count: usize,
    /// Wall-clock time of the whole batch.
    #[serde(rename = "elapsed_seconds", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// Average latency of successful jobs in milliseconds.
    pub avg_latency_ms: f64,
}

fn serialize_secs<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

impl BatchSummary {
    /// Summary of a batch with no prompts.
    pub fn empty() -> Self {
        BatchTracker::new(0).summary()
    }

    /// Success rate as a percentage of attempted jobs.
    pub fn success_rate(&self) -> f64 {
        if self.attempted > 0 {
            (self.success_count as f64 / self.attempted as f64) * 100.0
        } else {
            100.0
        }
    }

    /// One-line summary.
    pub fn summary_line(&self) -> String {
        format!(
            "Attempted: {}/{} | Success: {} | Failed: {} | Elapsed: {:.2}s",
            self.attempted,
            self.total,
            self.success_count,
            self.failure_count,
            self.elapsed.as_secs_f64()
        )
    }

    /// Print a summary block to stderr.
    pub fn print_summary(&self) {
        eprintln!("\n{}", "═".repeat(60));
        eprintln!("                      BATCH COMPLETE");
        eprintln!("{}", "═".repeat(60));
        eprintln!("  Prompts:          {}", self.total);
        eprintln!("  Attempted:        {}", self.attempted);
        eprintln!(
            "  Successful:       {} ({:.1}%)",
            self.success_count,
            self.success_rate()
        );
        eprintln!("  Failed:           {}", self.failure_count);
        eprintln!("  Elapsed Time:     {:.2}s", self.elapsed.as_secs_f64());
        eprintln!("  Avg Latency:      {:.1}ms", self.avg_latency_ms);
        eprintln!("{}", "═".repeat(60));
    }
}
