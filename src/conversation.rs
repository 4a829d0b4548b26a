//! Saved chat conversations.

use crate::error::{RelayError, Result};
use crate::request::{ChatMessage, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// A multi-turn conversation that can be written to and read from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Model the conversation is held with.
    pub model: String,

    /// System prompt sent ahead of every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// User and assistant turns, oldest first.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,

    /// When the conversation was started.
    pub created_at: DateTime<Utc>,

    /// When the conversation last changed.
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Start an empty conversation.
    pub fn new(model: impl Into<String>, system_prompt: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            model: model.into(),
            system_prompt,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Load a conversation from a JSON file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RelayError::ConversationRead {
                path: path.to_path_buf(),
                source: e,
            })?;

        let conversation: Self = serde_json::from_str(&content)?;
        debug!(
            path = %path.display(),
            messages = conversation.messages.len(),
            "Loaded conversation"
        );
        Ok(conversation)
    }

    /// Load the conversation at `path`, or start a new one if the file does not exist.
    pub async fn load_or_new(
        path: &Path,
        model: &str,
        system_prompt: Option<String>,
    ) -> Result<Self> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            Self::load(path).await
        } else {
            Ok(Self::new(model, system_prompt))
        }
    }

    /// Write the conversation as pretty JSON.
    ///
    /// The file is written next to its destination first and then renamed
    /// over it, so a crash never leaves a truncated conversation behind.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let write_err = |e| RelayError::ConversationWrite {
            path: path.to_path_buf(),
            source: e,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(write_err)?;
        tokio::fs::rename(&tmp, path).await.map_err(write_err)?;

        debug!(path = %path.display(), messages = self.messages.len(), "Saved conversation");
        Ok(())
    }

    /// Append a user turn.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::user(content));
    }

    /// Append an assistant turn.
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::assistant(content));
    }

    /// Append a message.
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Remove and return the most recent message.
    pub fn pop_last(&mut self) -> Option<ChatMessage> {
        let message = self.messages.pop();
        if message.is_some() {
            self.updated_at = Utc::now();
        }
        message
    }

    /// Forget every turn, keeping the system prompt.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.updated_at = Utc::now();
    }

    /// Number of completed user/assistant exchanges.
    pub fn turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count()
    }

    /// Messages to send to the server, system prompt first.
    pub fn messages_for_request(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.extend(self.messages.iter().cloned());
        messages
    }

    /// Settings given for this session that a stored conversation overrides.
    ///
    /// Returns the names of the ignored settings: `"model"` when `model`
    /// differs from the stored one, `"system prompt"` when a different
    /// `system_prompt` was given.
    pub fn ignored_overrides(&self, model: &str, system_prompt: Option<&str>) -> Vec<&'static str> {
        let mut ignored = Vec::new();
        if self.model != model {
            ignored.push("model");
        }
        if system_prompt.is_some() && system_prompt != self.system_prompt.as_deref() {
            ignored.push("system prompt");
        }
        ignored
    }
}
