//! Delivery bookkeeping: failed sends awaiting retry, sent messages awaiting
//! a mesh acknowledgement, the chat/radio message id map and chat messages
//! waiting to be edited in place.
//!
//! All methods take `now` explicitly so the policy can be driven by tests
//! with synthetic time. Removal is idempotent everywhere: resolving or
//! expiring an id that is already gone is a no-op.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::meshtastic::NodeId;

/// Text that could not be handed to the radio yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOutboundMessage {
    pub text: String,
    pub recipient: NodeId,
    /// Chat message the text came from, for ack reactions after a retry.
    pub chat_message_id: Option<i64>,
    /// Send attempts made so far, including the first.
    pub attempts: u32,
    pub last_attempt: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingAck {
    pub chat_message_id: i64,
    pub registered_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// Back in the queue with this many attempts.
    Requeued(u32),
    /// Attempt budget spent; the message is dropped.
    Abandoned(PendingOutboundMessage),
}

/// Chat id ↔ radio id pairs, bounded FIFO.
#[derive(Debug)]
pub struct MessageIdMap {
    capacity: usize,
    chat_to_radio: HashMap<i64, u32>,
    radio_to_chat: HashMap<u32, i64>,
    order: VecDeque<(i64, u32)>,
}

impl MessageIdMap {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            chat_to_radio: HashMap::new(),
            radio_to_chat: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record a pair, replacing any pair that shares either id.
    pub fn insert(&mut self, chat_id: i64, radio_id: u32) {
        if let Some(old_radio) = self.chat_to_radio.remove(&chat_id) {
            self.radio_to_chat.remove(&old_radio);
            self.order.retain(|&p| p != (chat_id, old_radio));
        }
        if let Some(old_chat) = self.radio_to_chat.remove(&radio_id) {
            self.chat_to_radio.remove(&old_chat);
            self.order.retain(|&p| p != (old_chat, radio_id));
        }
        self.chat_to_radio.insert(chat_id, radio_id);
        self.radio_to_chat.insert(radio_id, chat_id);
        self.order.push_back((chat_id, radio_id));
        while self.order.len() > self.capacity {
            if let Some((c, r)) = self.order.pop_front() {
                self.chat_to_radio.remove(&c);
                self.radio_to_chat.remove(&r);
            }
        }
    }

    pub fn radio_for_chat(&self, chat_id: i64) -> Option<u32> {
        self.chat_to_radio.get(&chat_id).copied()
    }

    pub fn chat_for_radio(&self, radio_id: u32) -> Option<i64> {
        self.radio_to_chat.get(&radio_id).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Kinds of chat message that are edited in place as fresh data arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    NodeInfo,
    Telemetry,
    Location,
    Sensor,
    Traceroute,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::NodeInfo => "nodeinfo",
            RequestKind::Telemetry => "telemetry",
            RequestKind::Location => "location",
            RequestKind::Sensor => "sensor",
            RequestKind::Traceroute => "traceroute",
        }
    }
}

/// `"{kind}:{node}"` → chat message id.
#[derive(Debug, Default)]
pub struct PendingRequests {
    messages: HashMap<String, i64>,
}

impl PendingRequests {
    pub fn key(kind: RequestKind, node: NodeId) -> String {
        format!("{}:{}", kind.as_str(), node)
    }

    pub fn get(&self, kind: RequestKind, node: NodeId) -> Option<i64> {
        self.messages.get(&Self::key(kind, node)).copied()
    }

    pub fn insert(&mut self, kind: RequestKind, node: NodeId, chat_message_id: i64) {
        self.messages.insert(Self::key(kind, node), chat_message_id);
    }

    /// Forget every entry for `node`.
    pub fn remove_node(&mut self, node: NodeId) {
        let suffix = format!(":{}", node);
        self.messages.retain(|k, _| !k.ends_with(&suffix));
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug)]
pub struct DeliveryTracker {
    max_attempts: u32,
    retry_interval: Duration,
    ack_timeout: Duration,
    outbound: VecDeque<PendingOutboundMessage>,
    acks: HashMap<u32, PendingAck>,
    pub ids: MessageIdMap,
    pub requests: PendingRequests,
}

impl DeliveryTracker {
    pub fn new(
        max_attempts: u32,
        retry_interval: Duration,
        ack_timeout: Duration,
        id_map_capacity: usize,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_interval,
            ack_timeout,
            outbound: VecDeque::new(),
            acks: HashMap::new(),
            ids: MessageIdMap::new(id_map_capacity),
            requests: PendingRequests::default(),
        }
    }

    /// Track `radio_id` until acknowledged. Returns false if the id was
    /// already pending (the old entry is replaced).
    pub fn register_ack(&mut self, radio_id: u32, chat_message_id: i64, now: Instant) -> bool {
        self.ids.insert(chat_message_id, radio_id);
        self.acks
            .insert(
                radio_id,
                PendingAck {
                    chat_message_id,
                    registered_at: now,
                },
            )
            .is_none()
    }

    pub fn resolve_ack(&mut self, radio_id: u32) -> Option<PendingAck> {
        self.acks.remove(&radio_id)
    }

    /// Drop acks older than the timeout.
    pub fn expire_acks(&mut self, now: Instant) -> Vec<(u32, PendingAck)> {
        let timeout = self.ack_timeout;
        let expired: Vec<u32> = self
            .acks
            .iter()
            .filter(|(_, a)| now.saturating_duration_since(a.registered_at) > timeout)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.acks.remove(&id).map(|a| (id, a)))
            .collect()
    }

    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    pub fn is_ack_pending(&self, radio_id: u32) -> bool {
        self.acks.contains_key(&radio_id)
    }

    /// Queue a text whose first send just failed.
    pub fn enqueue_retry(
        &mut self,
        text: String,
        recipient: NodeId,
        chat_message_id: Option<i64>,
        now: Instant,
    ) {
        self.outbound.push_back(PendingOutboundMessage {
            text,
            recipient,
            chat_message_id,
            attempts: 1,
            last_attempt: now,
        });
    }

    /// Remove and return messages whose last attempt is at least one retry
    /// interval old. The caller sends them and reports failures back through
    /// [`retry_failed`](Self::retry_failed).
    pub fn take_due_retries(&mut self, now: Instant) -> Vec<PendingOutboundMessage> {
        let interval = self.retry_interval;
        let (due, waiting): (Vec<_>, Vec<_>) = self
            .outbound
            .drain(..)
            .partition(|m| now.saturating_duration_since(m.last_attempt) >= interval);
        self.outbound = waiting.into();
        due
    }

    pub fn retry_failed(&mut self, mut message: PendingOutboundMessage, now: Instant) -> RetryOutcome {
        message.attempts += 1;
        message.last_attempt = now;
        if message.attempts >= self.max_attempts {
            RetryOutcome::Abandoned(message)
        } else {
            let attempts = message.attempts;
            self.outbound.push_back(message);
            RetryOutcome::Requeued(attempts)
        }
    }

    pub fn queued_retries(&self) -> usize {
        self.outbound.len()
    }
}
