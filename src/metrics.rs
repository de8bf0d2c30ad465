//! Process-wide delivery counters.
//!
//! Counters are plain atomics so any task can bump them without touching the
//! router's state. `snapshot()` is what the `/status` command prints.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

static RADIO_SENT: AtomicU64 = AtomicU64::new(0);
static RADIO_SEND_FAILED: AtomicU64 = AtomicU64::new(0);
static RETRIES: AtomicU64 = AtomicU64::new(0);
static RETRIES_ABANDONED: AtomicU64 = AtomicU64::new(0);
static ACKS_REGISTERED: AtomicU64 = AtomicU64::new(0);
static ACKS_RESOLVED: AtomicU64 = AtomicU64::new(0);
static ACKS_EXPIRED: AtomicU64 = AtomicU64::new(0);
static ACKS_UNKNOWN: AtomicU64 = AtomicU64::new(0);
static NAKS: AtomicU64 = AtomicU64::new(0);
static CHAT_FORWARDED: AtomicU64 = AtomicU64::new(0);
static ACK_LATENCY_SUM_MS: AtomicU64 = AtomicU64::new(0);
static ACK_LATENCY_COUNT: AtomicU64 = AtomicU64::new(0);

pub fn inc_radio_sent() {
    RADIO_SENT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_radio_send_failed() {
    RADIO_SEND_FAILED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_retries() {
    RETRIES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_retries_abandoned() {
    RETRIES_ABANDONED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_acks_registered() {
    ACKS_REGISTERED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_acks_expired() {
    ACKS_EXPIRED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_acks_unknown() {
    ACKS_UNKNOWN.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_naks() {
    NAKS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_chat_forwarded() {
    CHAT_FORWARDED.fetch_add(1, Ordering::Relaxed);
}

/// Count a resolved ack together with how long it was outstanding.
pub fn observe_ack(latency: Duration) {
    ACKS_RESOLVED.fetch_add(1, Ordering::Relaxed);
    ACK_LATENCY_SUM_MS.fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    ACK_LATENCY_COUNT.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub radio_sent: u64,
    pub radio_send_failed: u64,
    pub retries: u64,
    pub retries_abandoned: u64,
    pub acks_registered: u64,
    pub acks_resolved: u64,
    pub acks_expired: u64,
    pub acks_unknown: u64,
    pub naks: u64,
    pub chat_forwarded: u64,
    pub ack_latency_avg_ms: Option<u64>,
}

pub fn snapshot() -> Snapshot {
    let sum = ACK_LATENCY_SUM_MS.load(Ordering::Relaxed);
    let count = ACK_LATENCY_COUNT.load(Ordering::Relaxed);
    Snapshot {
        radio_sent: RADIO_SENT.load(Ordering::Relaxed),
        radio_send_failed: RADIO_SEND_FAILED.load(Ordering::Relaxed),
        retries: RETRIES.load(Ordering::Relaxed),
        retries_abandoned: RETRIES_ABANDONED.load(Ordering::Relaxed),
        acks_registered: ACKS_REGISTERED.load(Ordering::Relaxed),
        acks_resolved: ACKS_RESOLVED.load(Ordering::Relaxed),
        acks_expired: ACKS_EXPIRED.load(Ordering::Relaxed),
        acks_unknown: ACKS_UNKNOWN.load(Ordering::Relaxed),
        naks: NAKS.load(Ordering::Relaxed),
        chat_forwarded: CHAT_FORWARDED.load(Ordering::Relaxed),
        ack_latency_avg_ms: if count > 0 { Some(sum / count) } else { None },
    }
}
