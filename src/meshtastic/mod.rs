//! # Meshtastic Radio Module
//!
//! The bridge talks to the mesh through the [`RadioInterface`] trait and
//! receives traffic as canonical [`RadioPacket`] values on an mpsc channel.
//! [`MeshtasticRadio`] is the concrete device implementation (serial or TCP);
//! tests substitute their own recording implementation.
//!
//! ## Packet model
//!
//! Every decoded packet carries a [`PacketPayload`], a closed enumeration of
//! the application ports the bridge understands. Anything else arrives as
//! [`PacketPayload::Unknown`] so the router can log it and move on.
//!
//! ## Wire format
//!
//! Devices speak length-prefixed protobuf (`0x94 0xC3 <len_hi> <len_lo>`),
//! handled by [`framer`] and decoded by [`decode`]. The message subset lives
//! in [`proto`].

pub mod decode;
pub mod device;
pub mod framer;
pub mod proto;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::validation::{parse_node_id, ValidationError};

pub use device::MeshtasticRadio;

/// Mesh node number, displayed as `!aaaa1111`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const BROADCAST: NodeId = NodeId(0xffff_ffff);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            write!(f, "^all")
        } else {
            write!(f, "!{:08x}", self.0)
        }
    }
}

impl FromStr for NodeId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_node_id(s)
    }
}

/// Decoded unit of radio traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioPacket {
    pub id: u32,
    pub from: NodeId,
    pub to: NodeId,
    pub channel: u32,
    pub payload: PacketPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PacketPayload {
    Text(String),
    NodeInfo(UserInfo),
    Position(PositionReport),
    Telemetry(TelemetryReport),
    Admin(AdminReport),
    /// Delivery report for the packet with id `request_id`.
    Routing(RoutingReport),
    Traceroute(RouteReport),
    Neighbors(NeighborReport),
    Unknown { portnum: i32 },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserInfo {
    pub short_name: String,
    pub long_name: String,
    pub hw_model: String,
}

/// Position as sent on the wire: degrees scaled by 1e7.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PositionReport {
    pub latitude_i: Option<i32>,
    pub longitude_i: Option<i32>,
    pub altitude: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceMetrics {
    pub battery_level: Option<u32>,
    pub voltage: Option<f32>,
    pub channel_utilization: Option<f32>,
    pub air_util_tx: Option<f32>,
    pub uptime_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvironmentMetrics {
    pub temperature: Option<f32>,
    pub relative_humidity: Option<f32>,
    pub barometric_pressure: Option<f32>,
    pub gas_resistance: Option<f32>,
    pub voltage: Option<f32>,
    pub current: Option<f32>,
    pub iaq: Option<u32>,
    pub lux: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryReport {
    Device(DeviceMetrics),
    Environment(EnvironmentMetrics),
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdminReport {
    /// Reply to a get-owner request.
    Owner(UserInfo),
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutingReport {
    pub request_id: u32,
    /// Non-zero values are firmware routing error codes.
    pub error_reason: i32,
}

impl RoutingReport {
    pub fn is_ack(&self) -> bool {
        self.error_reason == 0
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RouteReport {
    pub route: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NeighborReport {
    pub neighbors: Vec<(NodeId, f32)>,
}

/// What the connected device knows about itself.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LocalNodeInfo {
    pub node_id: Option<NodeId>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub battery_level: Option<u32>,
    pub air_util_tx: Option<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(String),

    #[error("protobuf encode error: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("radio is not connected")]
    NotConnected,

    #[error("device has not reported its node info yet")]
    NotReady,

    #[error("invalid message: {0}")]
    Invalid(#[from] ValidationError),

    #[error("background task failed: {0}")]
    Task(String),
}

/// Operations the bridge needs from the radio side.
#[async_trait]
pub trait RadioInterface: Send + Sync {
    /// Queue `text` for `destination`; returns the mesh packet id.
    async fn send_text(&self, text: &str, destination: NodeId) -> Result<u32, RadioError>;

    /// React to mesh packet `message_id` with `emoji`.
    async fn send_reaction(&self, emoji: &str, message_id: u32) -> Result<(), RadioError>;

    async fn my_node_info(&self) -> Result<LocalNodeInfo, RadioError>;

    async fn health_check(&self) -> Result<(), RadioError> {
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), RadioError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), RadioError>;
}

/// Hardware model names for the common boards; others print as a number.
pub fn hardware_model_name(model: i32) -> String {
    let name = match model {
        0 => "UNSET",
        1 => "TLORA_V2",
        2 => "TLORA_V1",
        3 => "TLORA_V2_1_1P6",
        4 => "TBEAM",
        5 => "HELTEC_V2_0",
        6 => "TBEAM_V0P7",
        7 => "T_ECHO",
        8 => "TLORA_V1_1P3",
        9 => "RAK4631",
        10 => "HELTEC_V2_1",
        11 => "HELTEC_V1",
        43 => "HELTEC_V3",
        44 => "HELTEC_WSL_V3",
        255 => "PRIVATE_HW",
        other => return format!("HW_{}", other),
    };
    name.to_string()
}
