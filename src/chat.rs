//! Interactive multi-turn chat.
//!
//! [`ChatSession`] keeps a [`Conversation`], sends it to the server on every
//! user turn and optionally saves it after each reply. [`ChatSession::run`]
//! drives the session from any async line reader, which is how the CLI wires
//! it to stdin/stdout.

use crate::client::ChatClient;
use crate::conversation::Conversation;
use crate::error::Result;
use crate::request::{ChatReply, GenerateOptions, Role};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// A line typed at the chat prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Leave the session.
    Exit,
    /// Drop all turns.
    Clear,
    /// Save the conversation, optionally to a new path.
    Save(Option<PathBuf>),
    /// Print the conversation so far.
    History,
    /// Show the available commands.
    Help,
    /// A message for the model.
    Message(String),
    /// Blank input.
    Empty,
    /// A slash command we do not know.
    Unknown(String),
}

impl ChatCommand {
    /// Interpret one input line.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Message(line.to_string());
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, Some(arg.trim()).filter(|a| !a.is_empty())),
            None => (command, None),
        };

        match name {
            "exit" | "quit" | "bye" => Self::Exit,
            "clear" => Self::Clear,
            "save" => Self::Save(arg.map(PathBuf::from)),
            "history" => Self::History,
            "help" | "?" => Self::Help,
            other => Self::Unknown(other.to_string()),
        }
    }
}

const HELP: &str = "Commands: /exit, /clear, /save [path], /history, /help";

/// A running chat.
pub struct ChatSession {
    client: Arc<dyn ChatClient>,
    options: GenerateOptions,
    conversation: Conversation,
    save_path: Option<PathBuf>,
}

impl ChatSession {
    /// Create a session over an existing (possibly empty) conversation.
    pub fn new(
        client: Arc<dyn ChatClient>,
        options: GenerateOptions,
        conversation: Conversation,
        save_path: Option<PathBuf>,
    ) -> Self {
        Self {
            client,
            options,
            conversation,
            save_path,
        }
    }

    /// The conversation so far.
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Send one user message and record the reply.
    ///
    /// On failure the user message is taken back out so the conversation
    /// never ends with an unanswered turn. Saving is left to the caller.
    pub async fn send(&mut self, input: &str) -> Result<ChatReply> {
        self.conversation.push_user(input);
        let messages = self.conversation.messages_for_request();

        match self.client.chat(&messages, &self.options).await {
            Ok(reply) => {
                self.conversation.push(reply.message.clone());
                Ok(reply)
            }
            Err(e) => {
                self.conversation.pop_last();
                Err(e)
            }
        }
    }

    /// Save to the configured path, if any.
    async fn autosave(&self) -> Result<()> {
        if let Some(path) = &self.save_path {
            self.conversation.save(path).await?;
        }
        Ok(())
    }

    /// Save to the configured path, printing a failure instead of returning it.
    async fn autosave_or_report<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if let Err(e) = self.autosave().await {
            warn!(error = %e, "Failed to save conversation");
            writer.write_all(format!("Error: {}\n", e).as_bytes()).await?;
        }
        Ok(())
    }

    /// Read lines from `reader` until `/exit` or end of input, writing replies to `writer`.
    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        writer
            .write_all(format!("Chatting with {}. {}\n", self.options.model, HELP).as_bytes())
            .await?;

        loop {
            writer.write_all(b"> ").await?;
            writer.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };

            match ChatCommand::parse(&line) {
                ChatCommand::Exit => break,
                ChatCommand::Empty => {}
                ChatCommand::Help => {
                    writer.write_all(format!("{}\n", HELP).as_bytes()).await?;
                }
                ChatCommand::Clear => {
                    self.conversation.clear();
                    writer.write_all(b"Conversation cleared.\n").await?;
                    self.autosave_or_report(&mut writer).await?;
                }
                ChatCommand::Save(path) => match path.or_else(|| self.save_path.clone()) {
                    Some(path) => match self.conversation.save(&path).await {
                        Ok(()) => {
                            writer
                                .write_all(format!("Saved to {}\n", path.display()).as_bytes())
                                .await?;
                            self.save_path = Some(path);
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to save conversation");
                            writer.write_all(format!("Error: {}\n", e).as_bytes()).await?;
                        }
                    },
                    None => writer.write_all(b"Usage: /save <path>\n").await?,
                },
                ChatCommand::History => {
                    for message in &self.conversation.messages {
                        let who = match message.role {
                            Role::System => "system",
                            Role::User => "you",
                            Role::Assistant => "assistant",
                        };
                        writer
                            .write_all(format!("[{}] {}\n", who, message.content).as_bytes())
                            .await?;
                    }
                }
                ChatCommand::Unknown(name) => {
                    writer
                        .write_all(format!("Unknown command '/{}'. {}\n", name, HELP).as_bytes())
                        .await?;
                }
                ChatCommand::Message(text) => match self.send(&text).await {
                    Ok(reply) => {
                        debug!(turns = self.conversation.turns(), "Chat turn complete");
                        writer
                            .write_all(format!("{}\n", reply.message.content).as_bytes())
                            .await?;
                        self.autosave_or_report(&mut writer).await?;
                    }
                    Err(e) => {
                        warn!(error = %e, "Chat request failed");
                        writer.write_all(format!("Error: {}\n", e).as_bytes()).await?;
                    }
                },
            }
        }

        writer.flush().await?;
        Ok(())
    }
}
