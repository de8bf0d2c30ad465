//! Recording radio and chat doubles shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshgram::bridge::{MessageRouter, RouterSettings};
use meshgram::meshtastic::{LocalNodeInfo, NodeId, RadioError, RadioInterface};
use meshgram::telegram::{ChatError, ChatInterface, SendOptions};

pub const AUTHORIZED_USER: i64 = 1001;
pub const STRANGER: i64 = 2002;

/// Radio that records every call. `fail_next` makes that many upcoming
/// sends fail; `always_fail` fails all of them.
#[derive(Default)]
pub struct MockRadio {
    pub sent: Mutex<Vec<(String, NodeId)>>,
    pub attempts: AtomicUsize,
    pub reactions: Mutex<Vec<(String, u32)>>,
    pub fail_next: AtomicUsize,
    pub always_fail: AtomicBool,
    pub unhealthy: AtomicBool,
    pub reconnects: AtomicUsize,
    pub closes: AtomicUsize,
    next_id: AtomicU32,
}

impl MockRadio {
    pub fn new() -> Arc<Self> {
        let radio = MockRadio::default();
        radio.next_id.store(0x1000, Ordering::SeqCst);
        Arc::new(radio)
    }

    pub fn failing() -> Arc<Self> {
        let radio = Self::new();
        radio.always_fail.store(true, Ordering::SeqCst);
        radio
    }

    pub fn sent(&self) -> Vec<(String, NodeId)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn reactions(&self) -> Vec<(String, u32)> {
        self.reactions.lock().unwrap().clone()
    }

    fn should_fail(&self) -> bool {
        if self.always_fail.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RadioInterface for MockRadio {
    async fn send_text(&self, text: &str, destination: NodeId) -> Result<u32, RadioError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            return Err(RadioError::NotConnected);
        }
        self.sent.lock().unwrap().push((text.to_string(), destination));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn send_reaction(&self, emoji: &str, message_id: u32) -> Result<(), RadioError> {
        self.reactions
            .lock()
            .unwrap()
            .push((emoji.to_string(), message_id));
        Ok(())
    }

    async fn my_node_info(&self) -> Result<LocalNodeInfo, RadioError> {
        Ok(LocalNodeInfo {
            node_id: Some(NodeId(0x0bad_cafe)),
            long_name: Some("Base Station".to_string()),
            short_name: Some("BASE".to_string()),
            battery_level: Some(101),
            air_util_tx: Some(0.5),
        })
    }

    async fn health_check(&self) -> Result<(), RadioError> {
        if self.unhealthy.load(Ordering::SeqCst) {
            Err(RadioError::NotConnected)
        } else {
            Ok(())
        }
    }

    async fn reconnect(&self) -> Result<(), RadioError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.unhealthy.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), RadioError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub id: i64,
    pub text: String,
    pub opts: SendOptions,
}

/// Chat that records every call and hands out increasing message ids.
#[derive(Default)]
pub struct MockChat {
    pub messages: Mutex<Vec<SentMessage>>,
    pub edits: Mutex<Vec<(i64, String)>>,
    pub reactions: Mutex<Vec<(i64, String)>>,
    pub locations: Mutex<Vec<(f64, f64)>>,
    pub refuse_edits: AtomicBool,
    pub closes: AtomicUsize,
    authorized: Vec<i64>,
    next_id: AtomicI64,
}

impl MockChat {
    pub fn new() -> Arc<Self> {
        Arc::new(MockChat {
            authorized: vec![AUTHORIZED_USER],
            next_id: AtomicI64::new(500),
            ..Default::default()
        })
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.text).collect()
    }

    pub fn edits(&self) -> Vec<(i64, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn reactions(&self) -> Vec<(i64, String)> {
        self.reactions.lock().unwrap().clone()
    }

    pub fn locations(&self) -> Vec<(f64, f64)> {
        self.locations.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatInterface for MockChat {
    async fn send_message(&self, text: &str, opts: SendOptions) -> Result<i64, ChatError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().push(SentMessage {
            id,
            text: text.to_string(),
            opts,
        });
        Ok(id)
    }

    async fn edit_message(&self, message_id: i64, text: &str) -> Result<bool, ChatError> {
        if self.refuse_edits.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.edits
            .lock()
            .unwrap()
            .push((message_id, text.to_string()));
        Ok(true)
    }

    async fn add_reaction(&self, message_id: i64, emoji: &str) -> Result<(), ChatError> {
        self.reactions
            .lock()
            .unwrap()
            .push((message_id, emoji.to_string()));
        Ok(())
    }

    async fn send_location(&self, latitude: f64, longitude: f64) -> Result<i64, ChatError> {
        self.locations.lock().unwrap().push((latitude, longitude));
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn is_authorized(&self, user_id: i64) -> bool {
        self.authorized.contains(&user_id)
    }

    async fn close(&self) -> Result<(), ChatError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn settings() -> RouterSettings {
    RouterSettings {
        default_node: None,
        local_nodes: Vec::new(),
        ack_reaction: "👌".to_string(),
        nak_reaction: "👎".to_string(),
        inactivity_timeout: Duration::from_secs(300),
        notify_inactive: false,
        max_attempts: 3,
        retry_interval: Duration::from_secs(60),
        ack_timeout: Duration::from_secs(60),
        id_map_capacity: 1000,
    }
}

pub fn router(radio: &Arc<MockRadio>, chat: &Arc<MockChat>) -> MessageRouter {
    router_with(settings(), radio, chat)
}

pub fn router_with(
    settings: RouterSettings,
    radio: &Arc<MockRadio>,
    chat: &Arc<MockChat>,
) -> MessageRouter {
    MessageRouter::new(settings, radio.clone(), chat.clone())
}
