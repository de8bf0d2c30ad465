//! # Configuration Management Module
//!
//! Meshgram reads a single TOML file split into four sections:
//!
//! - [`TelegramConfig`] - bot token, target chat, allow-list and API pacing
//! - [`MeshtasticConfig`] - how to reach the radio and where chat text goes
//! - [`BridgeConfig`] - delivery, retry and sweep timings
//! - [`LoggingConfig`] - log level and optional log files
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshgram::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     println!("Radio device: {}", config.meshtastic.device);
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Integration
//!
//! Secrets usually come from the environment. Any `${VAR}` in the file is
//! replaced with the value of `VAR` before parsing; `${VAR:-fallback}` uses
//! `fallback` when `VAR` is unset. A reference to an unset variable with no
//! fallback fails the load.
//!
//! ```toml
//! [telegram]
//! bot_token = "${TELEGRAM_BOT_TOKEN}"
//! chat_id = -1001234567890
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

use crate::meshtastic::NodeId;
use crate::validation::parse_node_id;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: i64,
    /// Telegram user ids allowed to run restricted commands. Empty means everyone.
    #[serde(default)]
    pub authorized_users: Vec<i64>,
    /// Long-poll timeout for getUpdates (seconds)
    #[serde(default)]
    pub poll_timeout_secs: Option<u64>,
    /// Outbound API calls allowed per rate limit window
    #[serde(default)]
    pub rate_limit_calls: Option<usize>,
    /// Rate limit window length (seconds)
    #[serde(default)]
    pub rate_limit_period_secs: Option<u64>,
}

impl TelegramConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs.unwrap_or(30))
    }
    pub fn rate_limit_calls(&self) -> usize {
        self.rate_limit_calls.unwrap_or(20)
    }
    pub fn rate_limit_period(&self) -> Duration {
        Duration::from_secs(self.rate_limit_period_secs.unwrap_or(60))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Serial,
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshtasticConfig {
    pub connection_type: ConnectionType,
    /// Serial device path, or `host:port` for TCP
    pub device: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Destination for chat-originated text. Broadcast when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_node_id: Option<String>,
    /// Nodes whose updates are posted to chat. Empty means all nodes.
    #[serde(default)]
    pub local_nodes: Vec<String>,
    /// Channel index used for outbound text and reactions (0 = primary)
    #[serde(default)]
    pub channel: u32,
}

fn default_baud_rate() -> u32 {
    115200
}

impl MeshtasticConfig {
    pub fn default_node(&self) -> Result<Option<NodeId>> {
        match self.default_node_id.as_deref() {
            None | Some("") => Ok(None),
            Some(raw) => parse_node_id(raw)
                .map(Some)
                .map_err(|e| anyhow!("meshtastic.default_node_id: {}", e)),
        }
    }

    pub fn local_node_ids(&self) -> Result<Vec<NodeId>> {
        self.local_nodes
            .iter()
            .map(|raw| parse_node_id(raw).map_err(|e| anyhow!("meshtastic.local_nodes: {}", e)))
            .collect()
    }
}

/// Delivery and sweep timings. All fields are optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub ack_timeout_secs: Option<u64>,
    #[serde(default)]
    pub ack_check_interval_secs: Option<u64>,
    #[serde(default)]
    pub retry_interval_secs: Option<u64>,
    /// Total send attempts for a failed message, including the first one
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub heartbeat_interval_secs: Option<u64>,
    #[serde(default)]
    pub inactivity_timeout_secs: Option<u64>,
    /// Post a chat notice when a node goes quiet
    #[serde(default)]
    pub notify_inactive: bool,
    #[serde(default)]
    pub health_check_interval_secs: Option<u64>,
    /// Maximum chat/radio message id pairs kept for reaction routing
    #[serde(default)]
    pub message_id_map_capacity: Option<usize>,
    /// Pause after each handled event (ms)
    #[serde(default)]
    pub event_pause_ms: Option<u64>,
    /// Reaction placed on a chat message once the mesh acknowledges it.
    /// Must be one of the emoji the Bot API accepts as a reaction.
    #[serde(default)]
    pub ack_reaction: Option<String>,
    #[serde(default)]
    pub nak_reaction: Option<String>,
}

impl BridgeConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs.unwrap_or(60))
    }
    pub fn ack_check_interval(&self) -> Duration {
        Duration::from_secs(self.ack_check_interval_secs.unwrap_or(10))
    }
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.unwrap_or(60))
    }
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(3)
    }
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.unwrap_or(60))
    }
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs.unwrap_or(300))
    }
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs.unwrap_or(60))
    }
    pub fn message_id_map_capacity(&self) -> usize {
        self.message_id_map_capacity.unwrap_or(1000)
    }
    pub fn event_pause(&self) -> Duration {
        Duration::from_millis(self.event_pause_ms.unwrap_or(100))
    }
    pub fn ack_reaction(&self) -> String {
        self.ack_reaction.clone().unwrap_or_else(|| "👌".to_string())
    }
    pub fn nak_reaction(&self) -> String {
        self.nak_reaction.clone().unwrap_or_else(|| "👎".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    #[serde(default)]
    pub security_file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            security_file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file, expanding `${VAR}` references first.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;
        Self::parse_str(&content).map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))
    }

    pub fn parse_str(content: &str) -> Result<Self> {
        let expanded = expand_env(content, |name| std::env::var(name).ok())?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject configurations the bridge cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(anyhow!("Missing required configuration: telegram.bot_token"));
        }
        if self.telegram.chat_id == 0 {
            return Err(anyhow!("Missing required configuration: telegram.chat_id"));
        }
        if self.telegram.rate_limit_calls() == 0 {
            return Err(anyhow!("telegram.rate_limit_calls must be at least 1"));
        }
        if self.meshtastic.device.trim().is_empty() {
            return Err(anyhow!("Missing required configuration: meshtastic.device"));
        }
        if self.meshtastic.connection_type == ConnectionType::Tcp {
            let valid = self
                .meshtastic
                .device
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(anyhow!(
                    "meshtastic.device must be host:port for tcp connections (got '{}')",
                    self.meshtastic.device
                ));
            }
        }
        self.meshtastic.default_node()?;
        self.meshtastic.local_node_ids()?;

        let b = &self.bridge;
        let durations = [
            ("bridge.ack_timeout_secs", b.ack_timeout()),
            ("bridge.ack_check_interval_secs", b.ack_check_interval()),
            ("bridge.retry_interval_secs", b.retry_interval()),
            ("bridge.heartbeat_interval_secs", b.heartbeat_interval()),
            ("bridge.inactivity_timeout_secs", b.inactivity_timeout()),
            ("bridge.health_check_interval_secs", b.health_check_interval()),
            ("telegram.rate_limit_period_secs", self.telegram.rate_limit_period()),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        if b.max_attempts() == 0 {
            return Err(anyhow!("bridge.max_attempts must be at least 1"));
        }
        if b.message_id_map_capacity() == 0 {
            return Err(anyhow!("bridge.message_id_map_capacity must be at least 1"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            telegram: TelegramConfig {
                bot_token: "${TELEGRAM_BOT_TOKEN}".to_string(),
                chat_id: 0,
                authorized_users: Vec::new(),
                poll_timeout_secs: Some(30),
                rate_limit_calls: Some(20),
                rate_limit_period_secs: Some(60),
            },
            meshtastic: MeshtasticConfig {
                connection_type: ConnectionType::Serial,
                device: "/dev/ttyUSB0".to_string(),
                baud_rate: 115200,
                default_node_id: None,
                local_nodes: Vec::new(),
                channel: 0,
            },
            bridge: BridgeConfig {
                ack_timeout_secs: Some(60),
                ack_check_interval_secs: Some(10),
                retry_interval_secs: Some(60),
                max_attempts: Some(3),
                heartbeat_interval_secs: Some(60),
                inactivity_timeout_secs: Some(300),
                notify_inactive: false,
                health_check_interval_secs: Some(60),
                message_id_map_capacity: Some(1000),
                event_pause_ms: Some(100),
                ack_reaction: Some("👌".to_string()),
                nak_reaction: Some("👎".to_string()),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("meshgram.log".to_string()),
                security_file: Some("meshgram-security.log".to_string()),
            },
        }
    }
}

/// Replace `${VAR}` / `${VAR:-fallback}` with values from `lookup`.
pub fn expand_env<F>(input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| anyhow!("unterminated ${{...}} reference"))?;
        let reference = &after[..end];
        let (name, fallback) = match reference.split_once(":-") {
            Some((n, f)) => (n, Some(f)),
            None => (reference, None),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(anyhow!("invalid environment reference '${{{}}}'", reference));
        }
        match (lookup(name), fallback) {
            (Some(value), _) => out.push_str(&value),
            (None, Some(f)) => out.push_str(f),
            (None, None) => return Err(anyhow!("environment variable {} is not set", name)),
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
