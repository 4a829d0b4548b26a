//! Wire types for the chat API.
//!
//! Request bodies for `/api/generate` and `/api/chat`, the response shapes we
//! read back, and the model listing returned by `/api/tags`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Per-call generation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Model identifier.
    pub model: String,

    /// Optional system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Maximum number of tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl GenerateOptions {
    /// Options for the given model with no system prompt.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    /// Set the token limit.
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sampling options in the server's `options` object, if any are set.
    fn sampling(&self) -> Option<Value> {
        if self.max_tokens.is_none() && self.temperature.is_none() {
            return None;
        }

        let mut options = serde_json::Map::new();
        if let Some(max_tokens) = self.max_tokens {
            options.insert("num_predict".to_string(), Value::from(max_tokens));
        }
        if let Some(temperature) = self.temperature {
            options.insert("temperature".to_string(), Value::from(temperature));
        }
        Some(Value::Object(options))
    }

    /// Build the body for a single-shot generation request.
    pub fn generate_body(&self, prompt: &str) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        if let Some(system) = &self.system_prompt {
            body["system"] = Value::String(system.clone());
        }
        if let Some(options) = self.sampling() {
            body["options"] = options;
        }

        body
    }

    /// Build the body for a multi-turn chat request.
    pub fn chat_body(&self, messages: &[ChatMessage]) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });

        if let Some(options) = self.sampling() {
            body["options"] = options;
        }

        body
    }
}

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// The human side.
    User,
    /// The model.
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A model served by the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model name, e.g. `llama3:latest`.
    pub name: String,

    /// Size on disk in bytes.
    #[serde(default)]
    pub size: u64,

    /// Last modification time.
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

impl ModelInfo {
    /// Whether this entry answers to `model`. A bare name matches its `:latest` tag.
    pub fn matches(&self, model: &str) -> bool {
        self.name == model
            || (!model.contains(':') && self.name.strip_suffix(":latest") == Some(model))
    }

    /// Size formatted for display.
    pub fn display_size(&self) -> String {
        const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
        let mut size = self.size as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            format!("{} B", self.size)
        } else {
            format!("{:.1} {}", size, UNITS[unit])
        }
    }
}

/// Body of the `/api/tags` response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ModelList {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

/// Result of a single-shot generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    /// Generated text.
    pub response: String,

    /// Model that answered.
    pub model: String,

    /// Server-reported total duration in nanoseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,

    /// The full response object as returned by the server.
    pub raw: Value,
}

impl Completion {
    /// Parse a `/api/generate` response body.
    pub fn from_value(raw: Value) -> Option<Self> {
        let response = raw.get("response")?.as_str()?.to_string();
        let model = raw
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let total_duration = raw.get("total_duration").and_then(Value::as_u64);

        Some(Self {
            response,
            model,
            total_duration,
            raw,
        })
    }

    /// Server-reported duration, if present.
    pub fn server_duration(&self) -> Option<Duration> {
        self.total_duration.map(Duration::from_nanos)
    }
}

/// Result of one chat turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    /// The assistant message.
    pub message: ChatMessage,

    /// Server-reported total duration in nanoseconds.
    pub total_duration: Option<u64>,
}

#[derive(Deserialize)]
pub(crate) struct ChatResponseBody {
    pub message: ChatMessage,
    #[serde(default)]
    pub total_duration: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_body() {
        let options = GenerateOptions::new("llama3").with_system_prompt(Some("be brief".into()));
        let body = options.generate_body("Hello");

        assert_eq!(body["model"], "llama3");
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["prompt"], "Hello");
        assert_eq!(body["stream"], false);
        assert!(body.get("options").is_none());
    }

    #[test]
    fn test_generate_body_sampling_options() {
        let options = GenerateOptions::new("llama3")
            .with_max_tokens(Some(64))
            .with_temperature(Some(0.5));
        let body = options.generate_body("Hi");

        assert!(body.get("system").is_none());
        assert_eq!(body["options"]["num_predict"], 64);
        assert_eq!(body["options"]["temperature"], 0.5);
    }

    #[test]
    fn test_chat_body() {
        let options = GenerateOptions::new("llama3");
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let body = options.chat_body(&messages);

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_completion_from_value() {
        let raw = serde_json::json!({
            "model": "llama3",
            "response": "42",
            "total_duration": 1_500_000_000u64,
        });
        let completion = Completion::from_value(raw).unwrap();

        assert_eq!(completion.response, "42");
        assert_eq!(completion.server_duration(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_completion_requires_response() {
        assert!(Completion::from_value(serde_json::json!({"model": "x"})).is_none());
    }

    #[test]
    fn test_model_matching() {
        let model = ModelInfo {
            name: "llama3:latest".to_string(),
            size: 0,
            modified_at: None,
        };
        assert!(model.matches("llama3"));
        assert!(model.matches("llama3:latest"));
        assert!(!model.matches("llama3:8b"));
        assert!(!model.matches("llama"));
    }

    #[test]
    fn test_model_list_parsing() {
        let body = r#"{"models":[{"name":"mistral:7b","size":4109865159,"modified_at":"2024-05-01T12:00:00.123456789-07:00","digest":"abc"}]}"#;
        let list: ModelList = serde_json::from_str(body).unwrap();

        assert_eq!(list.models.len(), 1);
        assert_eq!(list.models[0].name, "mistral:7b");
        assert!(list.models[0].modified_at.is_some());
        assert_eq!(list.models[0].display_size(), "3.8 GB");
    }
}
