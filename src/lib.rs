//! # Meshgram - Meshtastic ⇄ Telegram bridge
//!
//! Meshgram relays traffic between a Meshtastic LoRa mesh and a single
//! Telegram chat. Mesh text, node info, positions, telemetry and traceroutes
//! are posted to the chat; chat text, locations and reactions are sent back
//! over the radio with delivery tracking, bounded retries and acknowledgement
//! reactions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshgram::bridge::BridgeServer;
//! use meshgram::config::Config;
//! use meshgram::meshtastic::MeshtasticRadio;
//! use meshgram::telegram::TelegramClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!
//!     let (radio, radio_rx) = MeshtasticRadio::connect(&config.meshtastic).await?;
//!     let chat = Arc::new(TelegramClient::new(&config.telegram)?);
//!     let (chat_tx, chat_rx) = tokio::sync::mpsc::channel(256);
//!     let poller = tokio::spawn(chat.clone().poll_updates(chat_tx));
//!
//!     let mut server = BridgeServer::new(&config, Arc::new(radio), radio_rx, chat, chat_rx)?;
//!     server.add_task(poller);
//!     server.run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bridge`] - routing, delivery tracking, node store and the server loop
//! - [`meshtastic`] - radio framing, protobuf decoding and the device link
//! - [`telegram`] - Bot API client and update parsing
//! - [`config`] - configuration loading and validation
//! - [`validation`] - node id, coordinate and outbound text checks
//! - [`metrics`] - process-wide delivery counters
//! - [`logutil`] - log escaping and token redaction

pub mod bridge;
pub mod config;
pub mod logutil;
pub mod meshtastic;
pub mod metrics;
pub mod telegram;
pub mod validation;
