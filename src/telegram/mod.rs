//! # Telegram Chat Module
//!
//! The bridge sees the chat side through [`ChatInterface`] and receives user
//! activity as [`ChatEvent`] values. [`TelegramClient`] implements both
//! against the Bot API; tests plug in a recording implementation instead.

pub mod api;

use async_trait::async_trait;

pub use api::TelegramClient;

/// Telegram account that triggered an event.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatUser {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub is_bot: bool,
    pub language_code: Option<String>,
}

impl ChatUser {
    /// Username when set, otherwise the first name.
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(u) if !u.is_empty() => u.clone(),
            _ => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandEvent {
    /// Command name without the leading slash or `@bot` suffix, lowercased.
    pub name: String,
    pub args: Vec<String>,
    pub user: ChatUser,
    pub message_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextEvent {
    pub text: String,
    pub sender: String,
    pub message_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationEvent {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub sender: String,
    pub message_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReactionEvent {
    pub emoji: String,
    /// Chat message the reaction was placed on.
    pub target_message_id: i64,
    pub user_id: i64,
}

/// Structured user activity from the chat.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Command(CommandEvent),
    Text(TextEvent),
    Location(LocationEvent),
    Reaction(ReactionEvent),
}

impl ChatEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::Command(_) => "command",
            ChatEvent::Text(_) => "text",
            ChatEvent::Location(_) => "location",
            ChatEvent::Reaction(_) => "reaction",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SendOptions {
    pub reply_to: Option<i64>,
    pub disable_notification: bool,
}

impl SendOptions {
    pub fn reply_to(message_id: i64) -> Self {
        SendOptions {
            reply_to: Some(message_id),
            disable_notification: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("http error: {0}")]
    Http(reqwest::Error),

    #[error("{method} failed ({code}): {description}")]
    Api {
        method: String,
        code: i64,
        description: String,
    },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("chat client is closed")]
    Closed,
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        // the request URL embeds the bot token
        ChatError::Http(e.without_url())
    }
}

/// Operations the bridge needs from the chat side.
#[async_trait]
pub trait ChatInterface: Send + Sync {
    /// Post `text` to the bridged chat; returns the chat message id.
    async fn send_message(&self, text: &str, opts: SendOptions) -> Result<i64, ChatError>;

    /// Replace the text of an earlier message. `Ok(false)` when the platform
    /// refused the edit.
    async fn edit_message(&self, message_id: i64, text: &str) -> Result<bool, ChatError>;

    async fn add_reaction(&self, message_id: i64, emoji: &str) -> Result<(), ChatError>;

    async fn send_location(&self, latitude: f64, longitude: f64) -> Result<i64, ChatError>;

    fn is_authorized(&self, user_id: i64) -> bool;

    async fn close(&self) -> Result<(), ChatError>;
}
