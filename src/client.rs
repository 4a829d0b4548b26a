//! Chat API client.
//!
//! [`ChatClient`] is the seam the dispatcher and the chat session work
//! against; [`OllamaClient`] is the HTTP implementation.

use crate::config::Settings;
use crate::error::{RelayError, Result};
use crate::request::{
    ChatMessage, ChatReply, ChatResponseBody, Completion, GenerateOptions, ModelInfo, ModelList,
};
use async_trait::async_trait;
use reqwest::{header, Client, Response};
use std::time::Duration;
use tracing::{debug, trace};

/// Longest error body kept in an [`RelayError::Api`] message.
const MAX_ERROR_BODY: usize = 500;

/// Operations offered by a chat-completion backend.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// List the models the server can run.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Generate a completion for a single prompt.
    async fn complete(&self, prompt: &str, options: &GenerateOptions) -> Result<Completion>;

    /// Continue a conversation.
    async fn chat(&self, messages: &[ChatMessage], options: &GenerateOptions) -> Result<ChatReply>;
}

/// HTTP client for an Ollama-compatible API.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OllamaClient {
    /// Create a client for the configured server.
    ///
    /// `request_timeout` bounds every request; the dispatcher applies its own
    /// per-job deadline on top of it.
    pub fn new(settings: &Settings, request_timeout: Duration) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .default_headers(headers)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(RelayError::Http)?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        })
    }

    /// The server base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header(header::AUTHORIZATION, format!("Bearer {}", key)),
            None => request,
        }
    }

    async fn post_json(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let url = self.url(path);
        trace!(url = %url, "Sending request");

        let response = self
            .authorize(self.client.post(&url).json(body))
            .send()
            .await?;

        let response = check_status(response).await?;
        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| RelayError::InvalidResponse {
                message: format!("failed to parse response: {}", e),
            })
    }
}

/// Turn a non-success response into [`RelayError::Api`].
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = if body.chars().count() > MAX_ERROR_BODY {
        let truncated: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{}...", truncated)
    } else {
        body
    };

    Err(RelayError::Api {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.url("/api/tags");
        trace!(url = %url, "Listing models");

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| RelayError::Connectivity(e.to_string()))?;

        let response = check_status(response)
            .await
            .map_err(|e| RelayError::Connectivity(e.to_string()))?;

        let list: ModelList = response
            .json()
            .await
            .map_err(|e| RelayError::Connectivity(format!("unexpected model list: {}", e)))?;

        debug!(count = list.models.len(), "Fetched model list");
        Ok(list.models)
    }

    async fn complete(&self, prompt: &str, options: &GenerateOptions) -> Result<Completion> {
        let body = options.generate_body(prompt);
        let raw = self.post_json("/api/generate", &body).await?;

        Completion::from_value(raw).ok_or_else(|| RelayError::InvalidResponse {
            message: "missing 'response' field".to_string(),
        })
    }

    async fn chat(&self, messages: &[ChatMessage], options: &GenerateOptions) -> Result<ChatReply> {
        let body = options.chat_body(messages);
        let raw = self.post_json("/api/chat", &body).await?;

        let parsed: ChatResponseBody =
            serde_json::from_value(raw).map_err(|e| RelayError::InvalidResponse {
                message: format!("missing 'message' field: {}", e),
            })?;

        Ok(ChatReply {
            message: parsed.message,
            total_duration: parsed.total_duration,
        })
    }
}
