//! Event dispatch between the radio and the chat.
//!
//! [`MessageRouter`] owns the node store and all delivery state. It is driven
//! by a single task (see [`BridgeServer`](super::BridgeServer)), so nothing
//! here needs locking.

use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::commands::{help_text, Command};
use super::delivery::{DeliveryTracker, RequestKind, RetryOutcome};
use super::errors::BridgeError;
use super::format::{format_battery, format_percentage, format_route, format_uptime};
use super::nodes::{NodeStore, NodeUpdate, Section};
use crate::config::Config;
use crate::logutil::truncate_for_log;
use crate::meshtastic::{
    AdminReport, NodeId, PacketPayload, RadioInterface, RadioPacket, RoutingReport,
    TelemetryReport,
};
use crate::metrics;
use crate::telegram::{
    ChatEvent, ChatInterface, CommandEvent, LocationEvent, ReactionEvent, SendOptions, TextEvent,
};
use crate::validation::{parse_node_id, truncate_chars, validate_coordinates, validate_outbound_text};

/// Sender names are cut to this many characters in radio text.
const SENDER_TAG_CHARS: usize = 10;
/// Nodes silent for this many inactivity timeouts are forgotten.
const PRUNE_FACTOR: u32 = 24;

const WELCOME: &str = "Welcome to Meshgram! 🌐📱\n\n\
    This bot bridges your Telegram chat with a Meshtastic mesh network.\n\
    Use /help to see available commands.";

/// Router settings resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub default_node: Option<NodeId>,
    pub local_nodes: Vec<NodeId>,
    pub ack_reaction: String,
    pub nak_reaction: String,
    pub inactivity_timeout: Duration,
    pub notify_inactive: bool,
    pub max_attempts: u32,
    pub retry_interval: Duration,
    pub ack_timeout: Duration,
    pub id_map_capacity: usize,
}

impl RouterSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let b = &config.bridge;
        Ok(RouterSettings {
            default_node: config.meshtastic.default_node()?,
            local_nodes: config.meshtastic.local_node_ids()?,
            ack_reaction: b.ack_reaction(),
            nak_reaction: b.nak_reaction(),
            inactivity_timeout: b.inactivity_timeout(),
            notify_inactive: b.notify_inactive,
            max_attempts: b.max_attempts(),
            retry_interval: b.retry_interval(),
            ack_timeout: b.ack_timeout(),
            id_map_capacity: b.message_id_map_capacity(),
        })
    }
}

pub struct MessageRouter {
    radio: Arc<dyn RadioInterface>,
    chat: Arc<dyn ChatInterface>,
    nodes: NodeStore,
    delivery: DeliveryTracker,
    settings: RouterSettings,
    started: Instant,
    closed: bool,
}

impl MessageRouter {
    pub fn new(
        settings: RouterSettings,
        radio: Arc<dyn RadioInterface>,
        chat: Arc<dyn ChatInterface>,
    ) -> Self {
        let delivery = DeliveryTracker::new(
            settings.max_attempts,
            settings.retry_interval,
            settings.ack_timeout,
            settings.id_map_capacity,
        );
        MessageRouter {
            radio,
            chat,
            nodes: NodeStore::new(),
            delivery,
            settings,
            started: Instant::now(),
            closed: false,
        }
    }

    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }

    pub fn delivery(&self) -> &DeliveryTracker {
        &self.delivery
    }

    pub fn radio(&self) -> &Arc<dyn RadioInterface> {
        &self.radio
    }

    fn posts_for(&self, node: NodeId) -> bool {
        self.settings.local_nodes.is_empty() || self.settings.local_nodes.contains(&node)
    }

    // ---- radio → chat ----

    pub async fn handle_radio_packet(&mut self, packet: RadioPacket) -> Result<(), BridgeError> {
        let from = packet.from;
        match packet.payload {
            PacketPayload::Routing(report) => self.handle_routing(packet.id, report).await,
            PacketPayload::Text(text) => {
                self.nodes.update(from, NodeUpdate::default());
                let line = format!("📡 Meshtastic: {} → {}\n💬 {}", from, packet.to, text);
                info!(
                    "Forwarding mesh text from {}: {}",
                    from,
                    truncate_for_log(&text, 120)
                );
                let chat_id = self.chat.send_message(&line, SendOptions::default()).await?;
                self.delivery.ids.insert(chat_id, packet.id);
                metrics::inc_chat_forwarded();
                Ok(())
            }
            PacketPayload::NodeInfo(user) => {
                self.nodes.update(from, NodeUpdate::from_user(&user));
                self.post_node_info(from).await
            }
            PacketPayload::Position(position) => {
                if !self.nodes.update_position(from, &position) {
                    debug!("position from {} without coordinates", from);
                    return Ok(());
                }
                if !self.posts_for(from) {
                    return Ok(());
                }
                let text = self.nodes.format_position(from);
                self.send_or_edit(RequestKind::Location, from, text).await?;
                if let (Some(lat), Some(lon)) = (position.latitude_i, position.longitude_i) {
                    if lat != 0 && lon != 0 {
                        self.chat
                            .send_location(lat as f64 / 1e7, lon as f64 / 1e7)
                            .await?;
                    }
                }
                Ok(())
            }
            PacketPayload::Telemetry(TelemetryReport::Device(m)) => {
                self.nodes.update(from, NodeUpdate::from_device_metrics(&m));
                if self.posts_for(from) {
                    let text = self.nodes.format_telemetry(from);
                    self.send_or_edit(RequestKind::Telemetry, from, text).await?;
                }
                Ok(())
            }
            PacketPayload::Telemetry(TelemetryReport::Environment(m)) => {
                self.nodes.update(from, NodeUpdate::from_environment(&m));
                if self.posts_for(from) {
                    let text = self.nodes.format_environment(from);
                    self.send_or_edit(RequestKind::Sensor, from, text).await?;
                }
                Ok(())
            }
            PacketPayload::Telemetry(TelemetryReport::Other) => {
                debug!("unsupported telemetry variant from {}", from);
                Ok(())
            }
            PacketPayload::Admin(AdminReport::Owner(user)) => {
                self.nodes.update(from, NodeUpdate::from_user(&user));
                self.post_node_info(from).await
            }
            PacketPayload::Admin(AdminReport::Other) => {
                warn!("Received unexpected admin message from {}", from);
                Ok(())
            }
            PacketPayload::Traceroute(report) => {
                let mut section = Section::new();
                section.insert("route".to_string(), format_route(&report.route));
                section.insert("hops".to_string(), report.route.len().to_string());
                self.nodes.update(
                    from,
                    NodeUpdate {
                        routing: Some(section),
                        ..Default::default()
                    },
                );
                if !self.posts_for(from) {
                    return Ok(());
                }
                let text = if report.route.is_empty() {
                    format!("🔍 Traceroute to {}: No route found", from)
                } else {
                    format!("🔍 Traceroute to {}:\n{}", from, format_route(&report.route))
                };
                self.send_or_edit(RequestKind::Traceroute, from, text).await
            }
            PacketPayload::Neighbors(report) => {
                let section: Section = report
                    .neighbors
                    .iter()
                    .map(|(id, snr)| (id.to_string(), format!("SNR {:.2}", snr)))
                    .collect();
                self.nodes.update(
                    from,
                    NodeUpdate {
                        neighbors: Some(section),
                        ..Default::default()
                    },
                );
                Ok(())
            }
            PacketPayload::Unknown { portnum } => {
                warn!("Unhandled Meshtastic message type {} from {}", portnum, from);
                Ok(())
            }
        }
    }

    async fn post_node_info(&mut self, node: NodeId) -> Result<(), BridgeError> {
        if !self.posts_for(node) {
            return Ok(());
        }
        let text = self.nodes.format_info(node);
        self.send_or_edit(RequestKind::NodeInfo, node, text).await
    }

    async fn handle_routing(&mut self, packet_id: u32, report: RoutingReport) -> Result<(), BridgeError> {
        let id = if report.request_id != 0 {
            report.request_id
        } else {
            packet_id
        };
        let Some(pending) = self.delivery.resolve_ack(id) else {
            if report.is_ack() {
                warn!("Received ACK for unknown message id 0x{:08x}", id);
                metrics::inc_acks_unknown();
            } else {
                debug!(
                    "routing error {} for untracked id 0x{:08x}",
                    report.error_reason, id
                );
            }
            return Ok(());
        };
        metrics::observe_ack(pending.registered_at.elapsed());
        if report.is_ack() {
            info!(
                "ACK for message 0x{:08x} (chat message {})",
                id, pending.chat_message_id
            );
            self.chat
                .add_reaction(pending.chat_message_id, &self.settings.ack_reaction)
                .await?;
        } else {
            warn!(
                "Delivery of message 0x{:08x} failed with routing error {}",
                id, report.error_reason
            );
            metrics::inc_naks();
            self.chat
                .add_reaction(pending.chat_message_id, &self.settings.nak_reaction)
                .await?;
        }
        Ok(())
    }

    /// Edit the chat message previously posted for `(kind, node)`, or post a
    /// new one when there is none or the edit is refused.
    pub async fn send_or_edit(
        &mut self,
        kind: RequestKind,
        node: NodeId,
        text: String,
    ) -> Result<(), BridgeError> {
        if let Some(message_id) = self.delivery.requests.get(kind, node) {
            match self.chat.edit_message(message_id, &text).await {
                Ok(true) => return Ok(()),
                Ok(false) => debug!("edit of {} refused; sending new message", message_id),
                Err(e) => warn!("edit of {} failed: {}; sending new message", message_id, e),
            }
        }
        let message_id = self.chat.send_message(&text, SendOptions::default()).await?;
        self.delivery.requests.insert(kind, node, message_id);
        Ok(())
    }

    // ---- chat → radio ----

    pub async fn handle_chat_event(&mut self, event: ChatEvent) -> Result<(), BridgeError> {
        match event {
            ChatEvent::Text(e) => self.handle_text(e).await,
            ChatEvent::Location(e) => self.handle_location(e).await,
            ChatEvent::Reaction(e) => self.handle_reaction(e).await,
            ChatEvent::Command(e) => self.handle_command(e).await,
        }
    }

    fn recipient(&self) -> NodeId {
        self.settings.default_node.unwrap_or(NodeId::BROADCAST)
    }

    async fn reply(&self, message_id: i64, text: &str) -> Result<i64, BridgeError> {
        Ok(self
            .chat
            .send_message(text, SendOptions::reply_to(message_id))
            .await?)
    }

    async fn handle_text(&mut self, event: TextEvent) -> Result<(), BridgeError> {
        let sender = truncate_chars(&event.sender, SENDER_TAG_CHARS);
        let text = format!("[TG:{}] {}", sender, event.text);
        if let Err(e) = validate_outbound_text(&text) {
            info!("Rejecting chat text from {}: {}", sender, e);
            self.reply(event.message_id, &format!("Message not sent: {}", e))
                .await?;
            return Ok(());
        }
        let recipient = self.recipient();
        match self.radio.send_text(&text, recipient).await {
            Ok(radio_id) => {
                metrics::inc_radio_sent();
                metrics::inc_acks_registered();
                self.delivery
                    .register_ack(radio_id, event.message_id, Instant::now());
                info!(
                    "Sent chat message {} to {} as 0x{:08x}",
                    event.message_id, recipient, radio_id
                );
                Ok(())
            }
            Err(e) => {
                metrics::inc_radio_send_failed();
                error!("Failed to send message to Meshtastic: {}", e);
                self.delivery.enqueue_retry(
                    text,
                    recipient,
                    Some(event.message_id),
                    Instant::now(),
                );
                self.reply(
                    event.message_id,
                    "Failed to send message to Meshtastic. It will be retried.",
                )
                .await?;
                Ok(())
            }
        }
    }

    async fn handle_location(&mut self, event: LocationEvent) -> Result<(), BridgeError> {
        let (lat, lon) = (event.latitude, event.longitude);
        let alt = event.altitude.unwrap_or(0.0);
        if let Err(e) = validate_coordinates(lat, lon, alt) {
            warn!("Invalid location data from {}: {}", event.sender, e);
            self.reply(
                event.message_id,
                &format!("Failed to send location to Meshtastic. Invalid data: {}", e),
            )
            .await?;
            return Ok(());
        }
        let coords = format!("lat={:.6}, lon={:.6}, alt={:.1}m", lat, lon, alt);
        let sender = truncate_chars(&event.sender, SENDER_TAG_CHARS);
        let text = format!("[TG:{}] location {}", sender, coords);
        match self.radio.send_text(&text, self.recipient()).await {
            Ok(_) => {
                metrics::inc_radio_sent();
                self.chat
                    .send_message(
                        &format!("📍 Location sent to Meshtastic network: {}", coords),
                        SendOptions::default(),
                    )
                    .await?;
            }
            Err(e) => {
                metrics::inc_radio_send_failed();
                error!("Failed to send location to Meshtastic: {}", e);
                self.reply(
                    event.message_id,
                    "Failed to send location to Meshtastic. Please try again.",
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn handle_reaction(&mut self, event: ReactionEvent) -> Result<(), BridgeError> {
        match self.delivery.ids.radio_for_chat(event.target_message_id) {
            Some(radio_id) => {
                self.radio.send_reaction(&event.emoji, radio_id).await?;
                info!(
                    "Reaction {} relayed to mesh message 0x{:08x}",
                    event.emoji, radio_id
                );
            }
            None => warn!(
                "No mesh message known for chat message {}; reaction ignored",
                event.target_message_id
            ),
        }
        Ok(())
    }

    async fn handle_command(&mut self, event: CommandEvent) -> Result<(), BridgeError> {
        let command = Command::parse(&event.name);
        let open = command.map(Command::always_allowed).unwrap_or(false);
        if !open && !self.chat.is_authorized(event.user.id) {
            sec_log!(
                "Refused /{} from user {} ({})",
                event.name,
                event.user.id,
                event.user.display_name()
            );
            self.reply(event.message_id, "You are not authorized to use this command.")
                .await?;
            return Ok(());
        }
        let Some(command) = command else {
            self.reply(event.message_id, &format!("Unknown command: {}", event.name))
                .await?;
            return Ok(());
        };
        debug!("command /{} from {}", command.name(), event.user.id);
        match self.run_command(command, &event).await {
            Ok(()) => Ok(()),
            Err(BridgeError::NoNode) => {
                self.reply(event.message_id, &BridgeError::NoNode.to_string())
                    .await?;
                Ok(())
            }
            Err(e) => {
                error!("Error handling /{}: {}", command.name(), e);
                self.reply(event.message_id, &format!("Error executing command: {}", e))
                    .await?;
                Ok(())
            }
        }
    }

    fn target_node(&self, args: &[String]) -> Result<NodeId, BridgeError> {
        match args.first() {
            Some(raw) => Ok(parse_node_id(raw)?),
            None => self.settings.default_node.ok_or(BridgeError::NoNode),
        }
    }

    async fn run_command(&mut self, command: Command, event: &CommandEvent) -> Result<(), BridgeError> {
        let reply_to = event.message_id;
        match command {
            Command::Start => {
                self.reply(reply_to, WELCOME).await?;
            }
            Command::Help => {
                self.reply(reply_to, &help_text()).await?;
            }
            Command::Status => {
                let status = self.status_text().await;
                self.reply(reply_to, &status).await?;
            }
            Command::Bell => {
                let node = self.target_node(&event.args)?;
                info!("Sending bell to node {}", node);
                match self.radio.send_text("🔔", node).await {
                    Ok(_) => {
                        metrics::inc_radio_sent();
                        self.chat
                            .send_message(
                                &format!("🔔 Bell sent to node {}.", node),
                                SendOptions {
                                    reply_to: Some(reply_to),
                                    disable_notification: true,
                                },
                            )
                            .await?;
                    }
                    Err(e) => {
                        metrics::inc_radio_send_failed();
                        self.reply(
                            reply_to,
                            &format!("Failed to send bell to node {}. Error: {}", node, e),
                        )
                        .await?;
                    }
                }
            }
            Command::Node => {
                let node = self.target_node(&event.args)?;
                let text = self.nodes.format_node(node);
                self.reply(reply_to, &text).await?;
            }
            Command::User => {
                let u = &event.user;
                let yes_no = |b: bool| if b { "Yes" } else { "No" };
                let text = format!(
                    "User Information:\n\
                     ID: {}\n\
                     Username: @{}\n\
                     First Name: {}\n\
                     Last Name: {}\n\
                     Is Bot: {}\n\
                     Language Code: {}\n\
                     Is Authorized: {}",
                    u.id,
                    u.username.as_deref().unwrap_or("N/A"),
                    u.first_name,
                    u.last_name.as_deref().unwrap_or("N/A"),
                    yes_no(u.is_bot),
                    u.language_code.as_deref().unwrap_or("N/A"),
                    yes_no(self.chat.is_authorized(u.id)),
                );
                self.reply(reply_to, &text).await?;
            }
        }
        Ok(())
    }

    pub async fn status_text(&self) -> String {
        let m = metrics::snapshot();
        let mut lines = vec![
            "📊 Meshgram Status:".to_string(),
            format!("⏱️ Uptime: {}", format_uptime(self.started.elapsed().as_secs())),
            format!("🔢 Connected Nodes: {}", self.nodes.len()),
            format!("⏳ Pending ACKs: {}", self.delivery.pending_acks()),
            format!("🔁 Queued retries: {}", self.delivery.queued_retries()),
            format!(
                "📨 Sent: {} (failed {}, retried {}, abandoned {})",
                m.radio_sent, m.radio_send_failed, m.retries, m.retries_abandoned
            ),
            format!(
                "✅ ACKs: {} resolved, {} expired, {} unknown, {} NAK",
                m.acks_resolved, m.acks_expired, m.acks_unknown, m.naks
            ),
        ];
        if let Some(avg) = m.ack_latency_avg_ms {
            lines.push(format!("⌛ Avg ACK latency: {} ms", avg));
        }
        lines.push(String::new());
        lines.push("📡 Meshtastic Status:".to_string());
        match self.radio.my_node_info().await {
            Ok(info) => {
                let node = info
                    .node_id
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "N/A".to_string());
                lines.push(format!(
                    "Node: {} {}",
                    info.long_name.as_deref().unwrap_or("N/A"),
                    node
                ));
                lines.push(format!("Battery: {}", format_battery(info.battery_level)));
                lines.push(format!(
                    "Air Utilization TX: {}",
                    format_percentage(info.air_util_tx)
                ));
            }
            Err(e) => lines.push(format!("Radio unavailable: {}", e)),
        }
        lines.join("\n")
    }

    // ---- periodic work ----

    /// Re-send queued texts that are due.
    pub async fn retry_pending(&mut self, now: Instant) {
        for message in self.delivery.take_due_retries(now) {
            metrics::inc_retries();
            match self.radio.send_text(&message.text, message.recipient).await {
                Ok(radio_id) => {
                    metrics::inc_radio_sent();
                    info!(
                        "Retry {} succeeded for message to {} (0x{:08x})",
                        message.attempts + 1,
                        message.recipient,
                        radio_id
                    );
                    if let Some(chat_id) = message.chat_message_id {
                        metrics::inc_acks_registered();
                        self.delivery.register_ack(radio_id, chat_id, now);
                    }
                }
                Err(e) => {
                    metrics::inc_radio_send_failed();
                    let recipient = message.recipient;
                    match self.delivery.retry_failed(message, now) {
                        RetryOutcome::Requeued(attempts) => warn!(
                            "Retry to {} failed (attempt {}): {}",
                            recipient, attempts, e
                        ),
                        RetryOutcome::Abandoned(m) => {
                            metrics::inc_retries_abandoned();
                            warn!(
                                "Giving up on message to {} after {} attempts: {}",
                                recipient,
                                m.attempts,
                                truncate_for_log(&m.text, 80)
                            );
                        }
                    }
                }
            }
        }
    }

    pub fn expire_acks(&mut self, now: Instant) -> usize {
        let expired = self.delivery.expire_acks(now);
        for (id, ack) in &expired {
            metrics::inc_acks_expired();
            warn!(
                "ACK timeout for message 0x{:08x} (chat message {})",
                id, ack.chat_message_id
            );
        }
        expired.len()
    }

    /// Mark quiet nodes inactive and forget long-silent ones.
    pub async fn sweep_inactive(&mut self) -> Result<(), BridgeError> {
        self.sweep_inactive_at(Utc::now()).await
    }

    pub async fn sweep_inactive_at(
        &mut self,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), BridgeError> {
        let timeout = self.settings.inactivity_timeout;
        // no pruning when the prune horizon does not fit in a Duration
        if let Some(horizon) = timeout.checked_mul(PRUNE_FACTOR) {
            for id in self.nodes.get_inactive_at(horizon, now) {
                info!("Removing node {} after prolonged silence", id);
                self.nodes.remove_node(id);
                self.delivery.requests.remove_node(id);
            }
        }
        for id in self.nodes.get_inactive_at(timeout, now) {
            if !self.nodes.mark_inactive(id) {
                continue;
            }
            info!("Node {} is inactive", id);
            if self.settings.notify_inactive && self.posts_for(id) {
                let minutes = timeout.as_secs() / 60;
                self.chat
                    .send_message(
                        &format!("💤 Node {} has been silent for over {} minutes", id, minutes),
                        SendOptions {
                            reply_to: None,
                            disable_notification: true,
                        },
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Probe the radio and reconnect when it does not answer.
    pub async fn check_radio(&self) -> Result<(), BridgeError> {
        if let Err(e) = self.radio.health_check().await {
            warn!("Radio health check failed: {}; reconnecting", e);
            self.radio.reconnect().await?;
            info!("Radio reconnected");
        }
        Ok(())
    }

    /// Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let (acks, retries) = (self.delivery.pending_acks(), self.delivery.queued_retries());
        if acks > 0 || retries > 0 {
            info!(
                "Dropping {} pending ACKs and {} queued retries on shutdown",
                acks, retries
            );
        }
        info!("Message router closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
