//! # Bridge Engine
//!
//! Moves messages between the mesh and the chat and keeps the promises made
//! along the way:
//!
//! - [`NodeStore`] - per-node telemetry, position and metadata with history
//! - [`DeliveryTracker`] - retry queue for failed radio sends, pending mesh
//!   acknowledgements, chat/radio message id correlation and edit-in-place
//!   bookkeeping
//! - [`RateLimiter`] - sliding-window bound on outbound chat API calls
//! - [`MessageRouter`] - dispatch of radio packets and chat events
//! - [`BridgeServer`] - the task loop, periodic sweeps and shutdown
//!
//! ## Data flow
//!
//! ```text
//! radio ──RadioPacket──▶ BridgeServer ──▶ MessageRouter ──▶ chat
//! chat  ──ChatEvent────▶ BridgeServer ──▶ MessageRouter ──▶ radio
//! ```
//!
//! Nothing is persisted. Node records, pending acks, queued retries and id
//! maps live only as long as the process.

macro_rules! sec_log {
    ($($arg:tt)*) => { log::info!(target: "security", $($arg)*); };
}

pub mod commands;
pub mod delivery;
pub mod errors;
pub mod format;
pub mod nodes;
pub mod rate_limit;
pub mod router;
pub mod server;

pub use commands::Command;
pub use delivery::{DeliveryTracker, MessageIdMap, PendingRequests, RequestKind, RetryOutcome};
pub use errors::BridgeError;
pub use nodes::{NodeRecord, NodeStore, NodeUpdate};
pub use rate_limit::RateLimiter;
pub use router::{MessageRouter, RouterSettings};
pub use server::{BridgeServer, Timings};
