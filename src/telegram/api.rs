//! Telegram Bot API client and long-poll receiver.

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use super::{
    ChatError, ChatEvent, ChatInterface, ChatUser, CommandEvent, LocationEvent, ReactionEvent,
    SendOptions, TextEvent,
};
use crate::bridge::RateLimiter;
use crate::config::TelegramConfig;
use crate::logutil::{escape_log, truncate_for_log};

const API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<i64>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub message_reaction: Option<MessageReaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl From<User> for ChatUser {
    fn from(u: User) -> Self {
        ChatUser {
            id: u.id,
            username: u.username,
            first_name: u.first_name,
            last_name: u.last_name,
            is_bot: u.is_bot,
            language_code: u.language_code,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageReaction {
    pub chat: Chat,
    pub message_id: i64,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub new_reaction: Vec<ReactionType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionType {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub emoji: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

/// Bot API client bound to one chat.
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    chat_id: i64,
    authorized_users: Vec<i64>,
    poll_timeout: Duration,
    limiter: RateLimiter,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT + config.poll_timeout())
            .build()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(TelegramClient {
            http,
            base_url: format!("{}/bot{}", API_BASE, config.bot_token),
            chat_id: config.chat_id,
            authorized_users: config.authorized_users.clone(),
            poll_timeout: config.poll_timeout(),
            limiter: RateLimiter::new(config.rate_limit_calls(), config.rate_limit_period()),
            closed: AtomicBool::new(false),
            shutdown_tx,
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<T, ChatError> {
        let resp = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        let envelope: ApiResponse<T> = resp.json().await?;
        if envelope.ok {
            envelope
                .result
                .ok_or_else(|| ChatError::Decode(format!("{} returned no result", method)))
        } else {
            Err(ChatError::Api {
                method: method.to_string(),
                code: envelope.error_code.unwrap_or(0),
                description: envelope.description.unwrap_or_default(),
            })
        }
    }

    /// Rate-limited outbound call.
    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T, ChatError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChatError::Closed);
        }
        self.limiter.acquire().await;
        self.request(method, &body, REQUEST_TIMEOUT).await
    }

    /// Verify the token; returns the bot account.
    pub async fn get_me(&self) -> Result<ChatUser, ChatError> {
        let me: User = self.call("getMe", json!({})).await?;
        Ok(me.into())
    }

    /// Publish the command menu shown by Telegram clients.
    pub async fn set_my_commands(&self, commands: &[(&str, &str)]) -> Result<(), ChatError> {
        let list: Vec<Value> = commands
            .iter()
            .map(|(name, description)| json!({ "command": name, "description": description }))
            .collect();
        let _: bool = self.call("setMyCommands", json!({ "commands": list })).await?;
        Ok(())
    }

    async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>, ChatError> {
        let body = json!({
            "offset": offset,
            "timeout": timeout.as_secs(),
            "allowed_updates": ["message", "message_reaction"],
        });
        self.request("getUpdates", &body, timeout + REQUEST_TIMEOUT)
            .await
    }

    /// Long-poll until [`close`](ChatInterface::close), forwarding events from
    /// the configured chat. Updates queued before startup are skipped.
    pub async fn poll_updates(self: Arc<Self>, tx: mpsc::Sender<ChatEvent>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut offset = match self.get_updates(-1, Duration::ZERO).await {
            Ok(backlog) => backlog.last().map(|u| u.update_id + 1).unwrap_or(0),
            Err(e) => {
                warn!("Could not skip pending updates: {}", e);
                0
            }
        };
        info!("Telegram receiver started (offset {})", offset);

        while !self.closed.load(Ordering::SeqCst) {
            let result = tokio::select! {
                r = self.get_updates(offset, self.poll_timeout) => r,
                _ = shutdown.changed() => break,
            };
            match result {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        if let Some(event) = parse_update(update, self.chat_id) {
                            debug!("chat event: {}", event.kind());
                            if tx.send(event).await.is_err() {
                                debug!("chat event queue closed; receiver exiting");
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("getUpdates failed: {}", e);
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }
        info!("Telegram receiver stopped");
    }
}

/// Turn an update into a bridge event. Updates from other chats, service
/// messages and removed reactions yield `None`.
pub fn parse_update(update: Update, chat_id: i64) -> Option<ChatEvent> {
    if let Some(reaction) = update.message_reaction {
        if reaction.chat.id != chat_id {
            return None;
        }
        let emoji = reaction
            .new_reaction
            .into_iter()
            .find(|r| r.kind == "emoji")
            .and_then(|r| r.emoji)?;
        return Some(ChatEvent::Reaction(ReactionEvent {
            emoji,
            target_message_id: reaction.message_id,
            user_id: reaction.user.map(|u| u.id).unwrap_or(0),
        }));
    }

    let message = update.message?;
    if message.chat.id != chat_id {
        debug!("ignoring message from chat {}", message.chat.id);
        return None;
    }
    let user: ChatUser = message.from.map(ChatUser::from).unwrap_or_default();
    let sender = user.display_name();

    if let Some(loc) = message.location {
        return Some(ChatEvent::Location(LocationEvent {
            latitude: loc.latitude,
            longitude: loc.longitude,
            altitude: None,
            sender,
            message_id: message.message_id,
            user_id: user.id,
        }));
    }

    let text = message.text?;
    if let Some(rest) = text.strip_prefix('/') {
        let mut parts = rest.split_whitespace();
        let head = parts.next().unwrap_or("");
        let name = head.split('@').next().unwrap_or("").to_lowercase();
        if !name.is_empty() {
            return Some(ChatEvent::Command(CommandEvent {
                name,
                args: parts.map(str::to_string).collect(),
                user,
                message_id: message.message_id,
            }));
        }
    }
    debug!(
        "text from {}: {}",
        sender,
        escape_log(&truncate_for_log(&text, 80))
    );
    Some(ChatEvent::Text(TextEvent {
        text,
        sender,
        message_id: message.message_id,
        user_id: user.id,
    }))
}

#[async_trait]
impl ChatInterface for TelegramClient {
    async fn send_message(&self, text: &str, opts: SendOptions) -> Result<i64, ChatError> {
        let mut body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if let Some(reply_to) = opts.reply_to {
            body["reply_to_message_id"] = json!(reply_to);
            body["allow_sending_without_reply"] = json!(true);
        }
        if opts.disable_notification {
            body["disable_notification"] = json!(true);
        }
        let sent: SentMessage = self.call("sendMessage", body).await?;
        Ok(sent.message_id)
    }

    async fn edit_message(&self, message_id: i64, text: &str) -> Result<bool, ChatError> {
        let body = json!({
            "chat_id": self.chat_id,
            "message_id": message_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        match self.call::<Value>("editMessageText", body).await {
            Ok(_) => Ok(true),
            Err(ChatError::Api { description, .. }) => {
                debug!("edit of message {} refused: {}", message_id, description);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn add_reaction(&self, message_id: i64, emoji: &str) -> Result<(), ChatError> {
        let body = json!({
            "chat_id": self.chat_id,
            "message_id": message_id,
            "reaction": [{ "type": "emoji", "emoji": emoji }],
        });
        let _: bool = self.call("setMessageReaction", body).await?;
        Ok(())
    }

    async fn send_location(&self, latitude: f64, longitude: f64) -> Result<i64, ChatError> {
        let body = json!({
            "chat_id": self.chat_id,
            "latitude": latitude,
            "longitude": longitude,
        });
        let sent: SentMessage = self.call("sendLocation", body).await?;
        Ok(sent.message_id)
    }

    fn is_authorized(&self, user_id: i64) -> bool {
        self.authorized_users.is_empty() || self.authorized_users.contains(&user_id)
    }

    async fn close(&self) -> Result<(), ChatError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(true);
            info!("Telegram client closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(value: Value) -> Update {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn command_with_bot_suffix() {
        let u = update(json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "from": {"id": 42, "is_bot": false, "first_name": "Alice"},
                "chat": {"id": -100},
                "text": "/Bell@meshgram_bot !aaaa1111"
            }
        }));
        match parse_update(u, -100) {
            Some(ChatEvent::Command(cmd)) => {
                assert_eq!(cmd.name, "bell");
                assert_eq!(cmd.args, vec!["!aaaa1111".to_string()]);
                assert_eq!(cmd.user.id, 42);
            }
            other => panic!("Expected command, got {:?}", other),
        }
    }

    #[test]
    fn other_chat_is_ignored() {
        let u = update(json!({
            "update_id": 11,
            "message": {"message_id": 1, "chat": {"id": 999}, "text": "hi"}
        }));
        assert!(parse_update(u, -100).is_none());
    }

    #[test]
    fn reaction_update() {
        let u = update(json!({
            "update_id": 12,
            "message_reaction": {
                "chat": {"id": -100},
                "message_id": 77,
                "user": {"id": 3, "first_name": "Bob"},
                "date": 0,
                "old_reaction": [],
                "new_reaction": [{"type": "emoji", "emoji": "👍"}]
            }
        }));
        assert_eq!(
            parse_update(u, -100),
            Some(ChatEvent::Reaction(ReactionEvent {
                emoji: "👍".to_string(),
                target_message_id: 77,
                user_id: 3,
            }))
        );
    }

    #[test]
    fn location_message() {
        let u = update(json!({
            "update_id": 13,
            "message": {
                "message_id": 8,
                "from": {"id": 5, "first_name": "Carol", "username": "carol"},
                "chat": {"id": -100},
                "location": {"latitude": 45.5, "longitude": -122.6}
            }
        }));
        match parse_update(u, -100) {
            Some(ChatEvent::Location(loc)) => {
                assert_eq!(loc.sender, "carol");
                assert_eq!(loc.latitude, 45.5);
                assert!(loc.altitude.is_none());
            }
            other => panic!("Expected location, got {:?}", other),
        }
    }
}
