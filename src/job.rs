//! Units of batch work and their outcomes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

/// One prompt admitted to a worker.
#[derive(Debug, Clone)]
pub struct PromptJob {
    /// Position of the prompt in the input.
    pub index: usize,
    /// Prompt text.
    pub prompt: String,
    /// Wall-clock time the job was dispatched.
    pub start_time: DateTime<Utc>,
    started: Instant,
}

impl PromptJob {
    /// Create a job, stamping the dispatch time.
    pub fn new(index: usize, prompt: impl Into<String>) -> Self {
        Self {
            index,
            prompt: prompt.into(),
            start_time: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Time since dispatch.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Outcome of one [`PromptJob`].
///
/// Exactly one of `response` and `error` is set; the constructors are the
/// only way to build one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobResult {
    index: usize,
    prompt: String,
    success: bool,
    response: Option<String>,
    error: Option<String>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    duration: Duration,
    #[serde(
        rename = "server_duration_ms",
        serialize_with = "serialize_opt_millis",
        skip_serializing_if = "Option::is_none"
    )]
    server_duration: Option<Duration>,
}

impl JobResult {
    /// A successful job.
    pub fn succeeded(job: PromptJob, response: String, server_duration: Option<Duration>) -> Self {
        let duration = job.elapsed();
        Self {
            index: job.index,
            prompt: job.prompt,
            success: true,
            response: Some(response),
            error: None,
            start_time: job.start_time,
            end_time: Utc::now(),
            duration,
            server_duration,
        }
    }

    /// A failed job.
    pub fn failed(job: PromptJob, error: impl Into<String>) -> Self {
        let duration = job.elapsed();
        Self {
            index: job.index,
            prompt: job.prompt,
            success: false,
            response: None,
            error: Some(error.into()),
            start_time: job.start_time,
            end_time: Utc::now(),
            duration,
            server_duration: None,
        }
    }

    /// Position of the prompt in the input.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The prompt that was sent.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Whether the request succeeded.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Generated text, for successful jobs.
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Failure message, for failed jobs.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Wall-clock time the job was dispatched.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Wall-clock time the job finished.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    /// Client-side latency.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Server-reported processing time.
    pub fn server_duration(&self) -> Option<Duration> {
        self.server_duration
    }
}

fn serialize_millis<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

fn serialize_opt_millis<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match duration {
        Some(d) => serialize_millis(d, serializer),
        None => serializer.serialize_none(),
    }
}
