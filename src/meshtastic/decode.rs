//! Turn raw `FromRadio` frames into canonical bridge types.

use bytes::Bytes;
use log::{debug, trace};
use prost::Message;

use super::proto::{self, from_radio, mesh_packet, port};
use super::{
    hardware_model_name, AdminReport, DeviceMetrics, EnvironmentMetrics, NeighborReport, NodeId,
    PacketPayload, PositionReport, RadioError, RadioPacket, RouteReport, RoutingReport,
    TelemetryReport, UserInfo,
};

/// Result of decoding one device frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Packet(RadioPacket),
    MyInfo { node_num: u32 },
    /// Node DB entry delivered during config sync.
    NodeInfo {
        num: u32,
        user: Option<UserInfo>,
        metrics: Option<DeviceMetrics>,
    },
    ConfigComplete(u32),
    Rebooted,
    /// Frames the bridge has no use for (config, channels, log records...).
    Ignored,
}

pub fn decode_from_radio(frame: &[u8]) -> Result<DeviceEvent, RadioError> {
    let msg = proto::FromRadio::decode(Bytes::copy_from_slice(frame))?;
    let event = match msg.payload_variant {
        Some(from_radio::PayloadVariant::Packet(pkt)) => match decode_packet(pkt)? {
            Some(packet) => DeviceEvent::Packet(packet),
            None => DeviceEvent::Ignored,
        },
        Some(from_radio::PayloadVariant::MyInfo(info)) => DeviceEvent::MyInfo {
            node_num: info.my_node_num,
        },
        Some(from_radio::PayloadVariant::NodeInfo(info)) => DeviceEvent::NodeInfo {
            num: info.num,
            user: info.user.map(user_info),
            metrics: info.device_metrics.map(device_metrics),
        },
        Some(from_radio::PayloadVariant::ConfigCompleteId(id)) => DeviceEvent::ConfigComplete(id),
        Some(from_radio::PayloadVariant::Rebooted(_)) => DeviceEvent::Rebooted,
        None => DeviceEvent::Ignored,
    };
    Ok(event)
}

/// Decode a mesh packet. Encrypted packets (no channel key on the device)
/// yield `None`.
pub fn decode_packet(pkt: proto::MeshPacket) -> Result<Option<RadioPacket>, RadioError> {
    let data = match pkt.payload_variant {
        Some(mesh_packet::PayloadVariant::Decoded(data)) => data,
        Some(mesh_packet::PayloadVariant::Encrypted(_)) | None => {
            trace!("skipping undecoded packet id={} from=0x{:08x}", pkt.id, pkt.from);
            return Ok(None);
        }
    };
    let payload = decode_payload(&data)?;
    Ok(Some(RadioPacket {
        id: pkt.id,
        from: NodeId(pkt.from),
        to: NodeId(pkt.to),
        channel: pkt.channel,
        payload,
    }))
}

fn decode_payload(data: &proto::Data) -> Result<PacketPayload, RadioError> {
    let bytes = Bytes::copy_from_slice(&data.payload);
    let payload = match data.portnum {
        port::TEXT_MESSAGE_APP => {
            PacketPayload::Text(String::from_utf8_lossy(&data.payload).into_owned())
        }
        port::NODEINFO_APP => PacketPayload::NodeInfo(user_info(proto::User::decode(bytes)?)),
        port::POSITION_APP => PacketPayload::Position(position(proto::Position::decode(bytes)?)),
        port::TELEMETRY_APP => {
            let t = proto::Telemetry::decode(bytes)?;
            PacketPayload::Telemetry(match t.variant {
                Some(proto::telemetry::Variant::DeviceMetrics(m)) => {
                    TelemetryReport::Device(device_metrics(m))
                }
                Some(proto::telemetry::Variant::EnvironmentMetrics(m)) => {
                    TelemetryReport::Environment(environment_metrics(m))
                }
                None => TelemetryReport::Other,
            })
        }
        port::ROUTING_APP => {
            let routing = proto::Routing::decode(bytes)?;
            let error_reason = match routing.variant {
                Some(proto::routing::Variant::ErrorReason(e)) => e,
                _ => 0,
            };
            // request_id names the packet being acknowledged
            let request_id = if data.request_id != 0 {
                data.request_id
            } else {
                data.reply_id
            };
            PacketPayload::Routing(RoutingReport {
                request_id,
                error_reason,
            })
        }
        port::ADMIN_APP => {
            let admin = proto::AdminMessage::decode(bytes)?;
            PacketPayload::Admin(match admin.payload_variant {
                Some(proto::admin_message::PayloadVariant::GetOwnerResponse(u)) => {
                    AdminReport::Owner(user_info(u))
                }
                None => AdminReport::Other,
            })
        }
        port::TRACEROUTE_APP => {
            let route = proto::RouteDiscovery::decode(bytes)?;
            PacketPayload::Traceroute(RouteReport {
                route: route.route.into_iter().map(NodeId).collect(),
            })
        }
        port::NEIGHBORINFO_APP => {
            let info = proto::NeighborInfo::decode(bytes)?;
            PacketPayload::Neighbors(NeighborReport {
                neighbors: info
                    .neighbors
                    .into_iter()
                    .map(|n| (NodeId(n.node_id), n.snr))
                    .collect(),
            })
        }
        other => {
            debug!("no decoder for portnum {}", other);
            PacketPayload::Unknown { portnum: other }
        }
    };
    Ok(payload)
}

fn user_info(u: proto::User) -> UserInfo {
    UserInfo {
        short_name: u.short_name.trim().to_string(),
        long_name: u.long_name.trim().to_string(),
        hw_model: hardware_model_name(u.hw_model),
    }
}

fn position(p: proto::Position) -> PositionReport {
    PositionReport {
        latitude_i: p.latitude_i,
        longitude_i: p.longitude_i,
        altitude: p.altitude,
    }
}

pub(crate) fn device_metrics(m: proto::DeviceMetrics) -> DeviceMetrics {
    DeviceMetrics {
        battery_level: m.battery_level,
        voltage: m.voltage,
        channel_utilization: m.channel_utilization,
        air_util_tx: m.air_util_tx,
        uptime_seconds: m.uptime_seconds,
    }
}

fn environment_metrics(m: proto::EnvironmentMetrics) -> EnvironmentMetrics {
    EnvironmentMetrics {
        temperature: m.temperature,
        relative_humidity: m.relative_humidity,
        barometric_pressure: m.barometric_pressure,
        gas_resistance: m.gas_resistance,
        voltage: m.voltage,
        current: m.current,
        iaq: m.iaq,
        lux: m.lux,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(data: proto::Data, from: u32, id: u32) -> Vec<u8> {
        let msg = proto::FromRadio {
            id: 1,
            payload_variant: Some(from_radio::PayloadVariant::Packet(proto::MeshPacket {
                from,
                to: 0xffff_ffff,
                id,
                payload_variant: Some(mesh_packet::PayloadVariant::Decoded(data)),
                ..Default::default()
            })),
        };
        msg.encode_to_vec()
    }

    #[test]
    fn telemetry_frame_becomes_device_metrics() {
        let telemetry = proto::Telemetry {
            time: 0,
            variant: Some(proto::telemetry::Variant::DeviceMetrics(proto::DeviceMetrics {
                battery_level: Some(80),
                voltage: Some(4.1),
                ..Default::default()
            })),
        };
        let frame = wrap(
            proto::Data {
                portnum: port::TELEMETRY_APP,
                payload: telemetry.encode_to_vec(),
                ..Default::default()
            },
            0xaaaa_1111,
            99,
        );
        match decode_from_radio(&frame).unwrap() {
            DeviceEvent::Packet(p) => {
                assert_eq!(p.from, NodeId(0xaaaa_1111));
                match p.payload {
                    PacketPayload::Telemetry(TelemetryReport::Device(m)) => {
                        assert_eq!(m.battery_level, Some(80));
                        assert_eq!(m.air_util_tx, None);
                    }
                    other => panic!("Expected device telemetry, got {:?}", other),
                }
            }
            other => panic!("Expected packet, got {:?}", other),
        }
    }

    #[test]
    fn routing_ack_uses_request_id() {
        let routing = proto::Routing {
            variant: Some(proto::routing::Variant::ErrorReason(0)),
        };
        let frame = wrap(
            proto::Data {
                portnum: port::ROUTING_APP,
                payload: routing.encode_to_vec(),
                request_id: 0xdead_beef,
                ..Default::default()
            },
            0x1234_5678,
            5,
        );
        match decode_from_radio(&frame).unwrap() {
            DeviceEvent::Packet(RadioPacket {
                payload: PacketPayload::Routing(r),
                ..
            }) => {
                assert_eq!(r.request_id, 0xdead_beef);
                assert!(r.is_ack());
            }
            other => panic!("Expected routing packet, got {:?}", other),
        }
    }

    #[test]
    fn encrypted_packet_is_ignored() {
        let msg = proto::FromRadio {
            id: 2,
            payload_variant: Some(from_radio::PayloadVariant::Packet(proto::MeshPacket {
                from: 1,
                payload_variant: Some(mesh_packet::PayloadVariant::Encrypted(vec![1, 2, 3])),
                ..Default::default()
            })),
        };
        assert_eq!(
            decode_from_radio(&msg.encode_to_vec()).unwrap(),
            DeviceEvent::Ignored
        );
    }

    #[test]
    fn my_info_frame() {
        let msg = proto::FromRadio {
            id: 3,
            payload_variant: Some(from_radio::PayloadVariant::MyInfo(proto::MyNodeInfo {
                my_node_num: 0x0bad_cafe,
            })),
        };
        assert_eq!(
            decode_from_radio(&msg.encode_to_vec()).unwrap(),
            DeviceEvent::MyInfo {
                node_num: 0x0bad_cafe
            }
        );
    }
}
