//! Error types for relay.
//!
//! Configuration and model-validation errors are raised before any request is
//! dispatched. Per-request errors are folded into [`JobResult`](crate::job::JobResult)
//! values by the dispatcher and only surface as [`RelayError::BatchAborted`]
//! when a batch stops on its first failure.

use crate::dispatcher::BatchOutcome;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the chat API or running a batch.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Missing or invalid settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The requested model is not served by the API.
    #[error("model '{model}' is not available (found: {available})")]
    ModelValidation {
        /// Model that was requested.
        model: String,
        /// Comma-separated list of models the server reported.
        available: String,
    },

    /// The server could not be reached or returned no models.
    #[error("cannot reach chat API: {0}")]
    Connectivity(String),

    /// The server answered with a non-success status.
    #[error("API returned status {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        message: String,
    },

    /// Transport-level HTTP failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A single request ran past its deadline.
    #[error("request timed out after {}s", .after.as_secs())]
    Timeout {
        /// The configured per-request timeout.
        after: Duration,
    },

    /// The response body did not have the expected shape.
    #[error("invalid API response: {message}")]
    InvalidResponse {
        /// Description of what was invalid.
        message: String,
    },

    /// A batch stopped on its first failed job.
    #[error("batch aborted at prompt #{index}: {message}")]
    BatchAborted {
        /// Input index of the job that failed.
        index: usize,
        /// Error message of the failed job.
        message: String,
        /// Results collected before the abort, sorted by index.
        partial: Box<BatchOutcome>,
    },

    /// Failed to read a prompt file.
    #[error("failed to read input '{path}': {source}")]
    InputRead {
        /// Path that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A prompt file was not a JSON array of strings.
    #[error("failed to parse prompts from '{path}': {source}")]
    InputParse {
        /// Path that could not be parsed.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to load a saved conversation.
    #[error("failed to read conversation '{path}': {source}")]
    ConversationRead {
        /// Conversation file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to persist a conversation.
    #[error("failed to write conversation '{path}': {source}")]
    ConversationWrite {
        /// Conversation file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Terminal I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelayError {
    /// Whether the error happened before anything was sent to the server.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::ModelValidation { .. } | Self::Connectivity(_)
        )
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = RelayError::Api {
            status: 503,
            message: "overloaded".to_string(),
        };
        assert_eq!(err.to_string(), "API returned status 503: overloaded");
    }

    #[test]
    fn test_timeout_display() {
        let err = RelayError::Timeout {
            after: Duration::from_secs(300),
        };
        assert_eq!(err.to_string(), "request timed out after 300s");
    }

    #[test]
    fn test_preflight_classification() {
        assert!(RelayError::Configuration("x".into()).is_preflight());
        assert!(
            RelayError::ModelValidation {
                model: "m".into(),
                available: String::new(),
            }
            .is_preflight()
        );
        assert!(
            !RelayError::InvalidResponse {
                message: "boom".into(),
            }
            .is_preflight()
        );
    }
}
