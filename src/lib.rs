//! # relay
//!
//! Command-line client and library for chat-completion APIs speaking the
//! Ollama wire format.
//!
//! ## Features
//!
//! - **Model listing**: see which models the server can run
//! - **Single-shot generation**: one prompt, one answer
//! - **Interactive chat**: multi-turn conversations, optionally saved to disk
//! - **Batch prompting**: many prompts in parallel with a concurrency cap,
//!   results returned in input order
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay::{BatchConfig, Dispatcher, OllamaClient, Settings};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings {
//!         base_url: "http://localhost:11434".to_string(),
//!         model: Some("llama3".to_string()),
//!         ..Default::default()
//!     };
//!     let config = BatchConfig::new("llama3")
//!         .with_max_concurrency(4)
//!         .with_continue_on_error(true);
//!
//!     let client = Arc::new(OllamaClient::new(&settings, config.timeout)?);
//!     let dispatcher = Dispatcher::new(client, config)?;
//!
//!     let prompts = vec!["Why is the sky blue?".to_string(), "What is 2 + 2?".to_string()];
//!     let outcome = dispatcher.run(&prompts).await?;
//!
//!     for result in &outcome.results {
//!         println!("{}: {:?}", result.index(), result.response());
//!     }
//!     outcome.summary.print_summary();
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! The CLI reads settings from:
//! - Command-line arguments
//! - Environment variables (prefixed with `RELAY_`, `.env` files are honored)
//! - JSON configuration files
//!
//! See [`Settings`] and [`BatchConfig`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod chat;
pub mod client;
pub mod config;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod output;
pub mod progress;
pub mod request;
pub mod tracker;

// Re-exports for convenience
pub use chat::{ChatCommand, ChatSession};
pub use client::{ChatClient, OllamaClient};
pub use config::{Args, BatchConfig, Command, Settings};
pub use conversation::Conversation;
pub use dispatcher::{BatchOutcome, Dispatcher};
pub use error::{RelayError, Result};
pub use job::{JobResult, PromptJob};
pub use output::OutputFormat;
pub use progress::{NoProgress, ProgressObserver, ProgressReporter, RecordingObserver};
pub use request::{ChatMessage, ChatReply, Completion, GenerateOptions, ModelInfo, Role};
pub use tracker::{BatchSummary, BatchTracker, Progress};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
