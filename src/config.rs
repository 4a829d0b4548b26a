//! Configuration management for relay.
//!
//! Settings come from CLI arguments, `RELAY_*` environment variables and an
//! optional JSON configuration file. The dispatcher never reads the
//! environment itself: everything it needs is carried by [`BatchConfig`].

use crate::error::{RelayError, Result};
use crate::output::OutputFormat;
use crate::request::GenerateOptions;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::warn;

/// Lowest accepted batch concurrency.
pub const MIN_CONCURRENCY: usize = 1;
/// Highest accepted batch concurrency.
pub const MAX_CONCURRENCY: usize = 10;
/// Batch concurrency when none is configured.
pub const DEFAULT_CONCURRENCY: usize = 3;
/// Per-request timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// CLI arguments for relay.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "relay",
    version,
    about = "Talk to a chat-completion API from the command line",
    long_about = "relay lists models, generates single completions, runs interactive chats\n\
                  and fans batches of prompts out to a chat-completion API with bounded\n\
                  concurrency.",
    after_help = "EXAMPLES:\n    \
        relay --base-url http://localhost:11434 models\n    \
        relay -m llama3 generate \"Why is the sky blue?\"\n    \
        relay -m llama3 chat --conversation chat.json\n    \
        relay -m llama3 batch --input prompts.json --concurrency 5 --progress"
)]
pub struct Args {
    /// Base URL of the chat API
    #[arg(long, env = "RELAY_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, env = "RELAY_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Model to use
    #[arg(short, long, env = "RELAY_MODEL", global = true)]
    pub model: Option<String>,

    /// Path to a JSON configuration file
    #[arg(short, long, env = "RELAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Per-request timeout in seconds
    #[arg(short, long, env = "RELAY_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, env = "RELAY_VERBOSE", global = true)]
    pub verbose: bool,

    /// Output logs as JSON
    #[arg(long, env = "RELAY_JSON_LOGS", global = true)]
    pub json_logs: bool,

    /// Operation to run
    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the models the server can run
    Models(ModelsArgs),
    /// Generate a single completion
    Generate(GenerateArgs),
    /// Start an interactive chat
    Chat(ChatArgs),
    /// Run many prompts in parallel
    Batch(BatchArgs),
}

/// Arguments for `relay models`.
#[derive(clap::Args, Debug, Clone)]
pub struct ModelsArgs {
    /// Print the list as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `relay generate`.
#[derive(clap::Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Prompt text
    pub prompt: String,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Maximum number of tokens to generate
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Print the full response object instead of the text
    #[arg(long)]
    pub full: bool,
}

/// Arguments for `relay chat`.
#[derive(clap::Args, Debug, Clone)]
pub struct ChatArgs {
    /// System prompt for a new conversation
    #[arg(short, long)]
    pub system: Option<String>,

    /// File to load the conversation from and save it to
    #[arg(long)]
    pub conversation: Option<PathBuf>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,
}

/// Arguments for `relay batch`.
#[derive(clap::Args, Debug, Clone)]
pub struct BatchArgs {
    /// Prompts to run
    pub prompts: Vec<String>,

    /// JSON file holding an array of prompt strings (`-` for stdin)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// System prompt sent with every request
    #[arg(short, long)]
    pub system: Option<String>,

    /// Maximum number of requests in flight (1-10)
    #[arg(short = 'p', long)]
    pub concurrency: Option<usize>,

    /// Keep going after a failed prompt
    #[arg(long)]
    pub continue_on_error: bool,

    /// Show a progress bar
    #[arg(long)]
    pub progress: bool,

    /// Output shape
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Full)]
    pub format: OutputFormat,
}

impl BatchArgs {
    /// Prompts from the command line followed by those in `--input`.
    pub async fn collect_prompts(&self) -> Result<Vec<String>> {
        let mut prompts = self.prompts.clone();

        if let Some(path) = &self.input {
            let content = if path.as_os_str() == "-" {
                let mut buf = String::new();
                tokio::io::stdin().read_to_string(&mut buf).await.map(|_| buf)
            } else {
                tokio::fs::read_to_string(path).await
            }
            .map_err(|e| RelayError::InputRead {
                path: path.clone(),
                source: e,
            })?;

            let from_file: Vec<String> =
                serde_json::from_str(&content).map_err(|e| RelayError::InputParse {
                    path: path.clone(),
                    source: e,
                })?;
            prompts.extend(from_file);
        }

        Ok(prompts)
    }
}

/// Connection and default settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the chat API.
    #[serde(default)]
    pub base_url: String,

    /// Bearer token.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Default model.
    #[serde(default)]
    pub model: Option<String>,

    /// Batch defaults.
    #[serde(default)]
    pub batch: BatchDefaults,
}

/// Batch settings that can be stored in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDefaults {
    /// Maximum number of requests in flight.
    #[serde(default = "default_concurrency")]
    pub max_concurrency: usize,

    /// Per-request timeout.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// Keep going after a failed prompt.
    #[serde(default)]
    pub continue_on_error: bool,
}

impl Default for BatchDefaults {
    fn default() -> Self {
        Self {
            max_concurrency: default_concurrency(),
            timeout: default_timeout(),
            continue_on_error: false,
        }
    }
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl Settings {
    /// Load settings from a JSON file.
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RelayError::InputRead {
            path: path.clone(),
            source: e,
        })?;

        serde_json::from_str(&content).map_err(|e| RelayError::InputParse {
            path: path.clone(),
            source: e,
        })
    }

    /// Build settings from CLI arguments, layered over the configuration file.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut settings = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(base_url) = &args.base_url {
            settings.base_url = base_url.clone();
        }
        if args.api_key.is_some() {
            settings.api_key = args.api_key.clone();
        }
        if args.model.is_some() {
            settings.model = args.model.clone();
        }
        if let Some(secs) = args.timeout {
            settings.batch.timeout = Duration::from_secs(secs);
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(RelayError::Configuration(
                "base URL is required (--base-url or RELAY_BASE_URL)".to_string(),
            ));
        }

        let url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            RelayError::Configuration(format!("invalid base URL '{}': {}", self.base_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RelayError::Configuration(format!(
                "base URL must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            return Err(RelayError::Configuration("API key is empty".to_string()));
        }

        if self.batch.timeout.is_zero() {
            return Err(RelayError::Configuration(
                "timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// The configured model, or a configuration error.
    pub fn require_model(&self) -> Result<&str> {
        self.model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| {
                RelayError::Configuration("model is required (--model or RELAY_MODEL)".to_string())
            })
    }
}

/// Everything one batch run needs.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Model to query.
    pub model: String,
    /// System prompt sent with every request.
    pub system_prompt: Option<String>,
    /// Maximum number of requests in flight, within `[1, 10]`.
    pub max_concurrency: usize,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Keep going after a failed prompt.
    pub continue_on_error: bool,
    /// Show a progress bar while running.
    pub show_progress: bool,
}

impl BatchConfig {
    /// Defaults for the given model.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            max_concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            continue_on_error: false,
            show_progress: false,
        }
    }

    /// Build a batch configuration from settings and `relay batch` flags.
    pub fn from_args(settings: &Settings, args: &BatchArgs) -> Result<Self> {
        let config = Self::new(settings.require_model()?)
            .with_system_prompt(args.system.clone())
            .with_max_concurrency(args.concurrency.unwrap_or(settings.batch.max_concurrency))
            .with_timeout(settings.batch.timeout)
            .with_continue_on_error(args.continue_on_error || settings.batch.continue_on_error)
            .with_progress(args.progress);

        config.validate()?;
        Ok(config)
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    /// Set the concurrency limit, clamped to `[1, 10]`.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        let clamped = max_concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);
        if clamped != max_concurrency {
            warn!(
                requested = max_concurrency,
                using = clamped,
                "Concurrency out of range, clamping"
            );
        }
        self.max_concurrency = clamped;
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set whether to keep going after a failed prompt.
    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Set whether to show a progress bar.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(RelayError::Configuration(
                "model must not be empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(RelayError::Configuration(
                "timeout must be greater than 0".to_string(),
            ));
        }
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.max_concurrency) {
            return Err(RelayError::Configuration(format!(
                "concurrency must be between {} and {}",
                MIN_CONCURRENCY, MAX_CONCURRENCY
            )));
        }
        Ok(())
    }

    /// Generation options handed to every worker.
    pub fn generate_options(&self) -> GenerateOptions {
        GenerateOptions::new(self.model.clone()).with_system_prompt(self.system_prompt.clone())
    }
}

/// Serde helpers for durations written as `"300s"`, `"500ms"` or plain seconds.
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_url: &str) -> Settings {
        Settings {
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_concurrency_is_clamped() {
        assert_eq!(BatchConfig::new("m").with_max_concurrency(0).max_concurrency, 1);
        assert_eq!(BatchConfig::new("m").with_max_concurrency(50).max_concurrency, 10);
        assert_eq!(BatchConfig::new("m").with_max_concurrency(4).max_concurrency, 4);
    }

    #[test]
    fn test_batch_defaults() {
        let config = BatchConfig::new("llama3");
        assert_eq!(config.max_concurrency, 3);
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert!(!config.continue_on_error);
        assert!(!config.show_progress);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_batch_config_rejects_empty_model() {
        let err = BatchConfig::new("  ").validate().unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
    }

    #[test]
    fn test_settings_require_base_url() {
        let err = settings("").validate().unwrap_err();
        assert!(err.to_string().contains("base URL is required"));
    }

    #[test]
    fn test_settings_reject_bad_urls() {
        assert!(settings("not a url").validate().is_err());
        assert!(settings("ftp://example.com").validate().is_err());
        assert!(settings("http://localhost:11434").validate().is_ok());
        assert!(settings("https://llm.example.com/").validate().is_ok());
    }

    #[test]
    fn test_require_model() {
        let mut s = settings("http://localhost:11434");
        assert!(s.require_model().is_err());
        s.model = Some("llama3".to_string());
        assert_eq!(s.require_model().unwrap(), "llama3");
    }

    #[test]
    fn test_settings_file_parsing() {
        let json = r#"{
            "base_url": "http://localhost:11434",
            "model": "llama3",
            "batch": {"max_concurrency": 5, "timeout": "90s", "continue_on_error": true}
        }"#;
        let s: Settings = serde_json::from_str(json).unwrap();

        assert_eq!(s.batch.max_concurrency, 5);
        assert_eq!(s.batch.timeout, Duration::from_secs(90));
        assert!(s.batch.continue_on_error);
    }

    #[test]
    fn test_duration_formats() {
        let s: BatchDefaults = serde_json::from_str(r#"{"timeout": "250ms"}"#).unwrap();
        assert_eq!(s.timeout, Duration::from_millis(250));

        let s: BatchDefaults = serde_json::from_str(r#"{"timeout": "12"}"#).unwrap();
        assert_eq!(s.timeout, Duration::from_secs(12));
        assert_eq!(s.max_concurrency, DEFAULT_CONCURRENCY);
    }

    #[test]
    fn test_batch_config_from_args() {
        let mut s = settings("http://localhost:11434");
        s.model = Some("llama3".to_string());
        s.batch.max_concurrency = 8;

        let args = BatchArgs {
            prompts: vec!["hi".to_string()],
            input: None,
            system: Some("terse".to_string()),
            concurrency: None,
            continue_on_error: true,
            progress: false,
            format: OutputFormat::Answers,
        };
        let config = BatchConfig::from_args(&s, &args).unwrap();

        assert_eq!(config.max_concurrency, 8);
        assert!(config.continue_on_error);
        assert_eq!(config.generate_options().system_prompt.as_deref(), Some("terse"));
    }

    #[tokio::test]
    async fn test_collect_prompts_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.json");
        std::fs::write(&path, r#"["B", "C"]"#).unwrap();

        let args = BatchArgs {
            prompts: vec!["A".to_string()],
            input: Some(path.clone()),
            system: None,
            concurrency: None,
            continue_on_error: false,
            progress: false,
            format: OutputFormat::Full,
        };
        assert_eq!(args.collect_prompts().await.unwrap(), vec!["A", "B", "C"]);

        std::fs::write(&path, r#"{"not": "an array"}"#).unwrap();
        assert!(matches!(
            args.collect_prompts().await.unwrap_err(),
            RelayError::InputParse { .. }
        ));

        let missing = BatchArgs {
            input: Some(dir.path().join("missing.json")),
            ..args
        };
        assert!(matches!(
            missing.collect_prompts().await.unwrap_err(),
            RelayError::InputRead { .. }
        ));
    }

    #[test]
    fn test_cli_parses_batch() {
        let args = Args::try_parse_from([
            "relay",
            "--base-url",
            "http://localhost:11434",
            "-m",
            "llama3",
            "batch",
            "A",
            "B",
            "-p",
            "2",
            "--format",
            "pairs",
        ])
        .unwrap();

        match args.command {
            Command::Batch(batch) => {
                assert_eq!(batch.prompts, vec!["A", "B"]);
                assert_eq!(batch.concurrency, Some(2));
                assert_eq!(batch.format, OutputFormat::Pairs);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
