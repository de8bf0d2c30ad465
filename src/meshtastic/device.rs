//! Concrete radio backed by a Meshtastic device on a serial port or TCP socket.
//!
//! One reader runs per open link: a blocking worker thread for serial ports
//! (the `serialport` API is synchronous) or a tokio task for TCP. Either way
//! decoded packets are pushed onto the same mpsc channel handed out by
//! [`MeshtasticRadio::connect`], so a reconnect is invisible to the consumer.

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use prost::Message;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

#[cfg(feature = "serial")]
use serialport::SerialPort;
#[cfg(feature = "serial")]
use std::io::{Read, Write};

use super::decode::{decode_from_radio, DeviceEvent};
use super::framer::{encode_frame, FrameDecoder};
use super::proto::{self, mesh_packet, port, priority, to_radio};
use super::{
    LocalNodeInfo, NodeId, PacketPayload, RadioError, RadioInterface, RadioPacket, TelemetryReport,
};
use crate::config::{ConnectionType, MeshtasticConfig};
use crate::logutil::escape_log;
use crate::validation::validate_outbound_text;

/// Device API port used when a TCP address has none.
pub const DEFAULT_TCP_PORT: u16 = 4403;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PACKET_QUEUE: usize = 256;

type LocalInfo = Arc<std::sync::Mutex<LocalNodeInfo>>;

enum Link {
    #[cfg(feature = "serial")]
    Serial(Arc<std::sync::Mutex<Box<dyn SerialPort>>>),
    Tcp(OwnedWriteHalf),
}

struct Reader {
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Reader {
    fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        self.task.abort();
    }
}

struct Connection {
    link: Link,
    reader: Reader,
}

pub struct MeshtasticRadio {
    config: MeshtasticConfig,
    conn: Mutex<Option<Connection>>,
    packet_tx: mpsc::Sender<RadioPacket>,
    local: LocalInfo,
    closed: AtomicBool,
}

impl MeshtasticRadio {
    /// Open the link described by `config`, request the device config and
    /// start reading. Returns the radio and its inbound packet queue.
    pub async fn connect(
        config: &MeshtasticConfig,
    ) -> Result<(Self, mpsc::Receiver<RadioPacket>), RadioError> {
        let (packet_tx, packet_rx) = mpsc::channel(PACKET_QUEUE);
        let radio = MeshtasticRadio {
            config: config.clone(),
            conn: Mutex::new(None),
            packet_tx,
            local: Arc::new(std::sync::Mutex::new(LocalNodeInfo::default())),
            closed: AtomicBool::new(false),
        };
        radio.open().await?;
        Ok((radio, packet_rx))
    }

    async fn open(&self) -> Result<(), RadioError> {
        let connection = match self.config.connection_type {
            ConnectionType::Serial => self.open_serial().await?,
            ConnectionType::Tcp => self.open_tcp().await?,
        };
        if let Some(old) = self.conn.lock().await.replace(connection) {
            old.reader.stop();
        }
        let mut id: u32 = rand::random();
        if id == 0 {
            id = 1;
        }
        info!(
            "Requesting config from radio (want_config_id=0x{:08x})",
            id
        );
        self.write(proto::ToRadio {
            payload_variant: Some(to_radio::PayloadVariant::WantConfigId(id)),
        })
        .await
    }

    #[cfg(feature = "serial")]
    async fn open_serial(&self) -> Result<Connection, RadioError> {
        let path = self.config.device.clone();
        let baud = self.config.baud_rate;
        info!("Opening Meshtastic device on {} at {} baud", path, baud);
        let port = tokio::task::spawn_blocking(move || -> Result<Box<dyn SerialPort>, RadioError> {
            let mut builder = serialport::new(&path, baud).timeout(Duration::from_millis(500));
            #[cfg(unix)]
            {
                builder = builder
                    .data_bits(serialport::DataBits::Eight)
                    .stop_bits(serialport::StopBits::One)
                    .parity(serialport::Parity::None);
            }
            let mut port = builder
                .open()
                .map_err(|e| RadioError::Serial(format!("failed to open {}: {}", path, e)))?;
            // ESP32 boards want DTR/RTS raised before they talk
            let _ = port.write_data_terminal_ready(true);
            let _ = port.write_request_to_send(true);
            std::thread::sleep(Duration::from_millis(150));
            let _ = port.clear(serialport::ClearBuffer::Input);
            Ok(port)
        })
        .await
        .map_err(|e| RadioError::Task(e.to_string()))??;

        let read_port = port
            .try_clone()
            .map_err(|e| RadioError::Serial(format!("failed to clone port: {}", e)))?;
        let stop = Arc::new(AtomicBool::new(false));
        let task = {
            let stop = stop.clone();
            let tx = self.packet_tx.clone();
            let local = self.local.clone();
            tokio::task::spawn_blocking(move || serial_reader(read_port, stop, tx, local))
        };
        Ok(Connection {
            link: Link::Serial(Arc::new(std::sync::Mutex::new(port))),
            reader: Reader { stop, task },
        })
    }

    #[cfg(not(feature = "serial"))]
    async fn open_serial(&self) -> Result<Connection, RadioError> {
        Err(RadioError::Serial(
            "built without the `serial` feature".to_string(),
        ))
    }

    async fn open_tcp(&self) -> Result<Connection, RadioError> {
        let addr = tcp_address(&self.config.device);
        info!("Connecting to Meshtastic device at {}", addr);
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                RadioError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                ))
            })??;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let stop = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(tcp_reader(
            read_half,
            stop.clone(),
            self.packet_tx.clone(),
            self.local.clone(),
        ));
        Ok(Connection {
            link: Link::Tcp(write_half),
            reader: Reader { stop, task },
        })
    }

    async fn write(&self, msg: proto::ToRadio) -> Result<(), RadioError> {
        let frame = encode_frame(&msg.encode_to_vec());
        let frame_len = frame.len();
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(RadioError::NotConnected)?;
        match &mut conn.link {
            #[cfg(feature = "serial")]
            Link::Serial(port) => {
                let port = Arc::clone(port);
                tokio::task::spawn_blocking(move || -> Result<(), RadioError> {
                    let mut port = port
                        .lock()
                        .map_err(|_| RadioError::Serial("serial port lock poisoned".to_string()))?;
                    port.write_all(&frame)?;
                    port.flush()?;
                    Ok(())
                })
                .await
                .map_err(|e| RadioError::Task(e.to_string()))??;
            }
            Link::Tcp(writer) => {
                writer.write_all(&frame).await?;
                writer.flush().await?;
            }
        }
        trace!("Sent ToRadio frame ({} bytes)", frame_len);
        Ok(())
    }

    async fn send_packet(&self, packet: proto::MeshPacket) -> Result<(), RadioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RadioError::NotConnected);
        }
        self.write(proto::ToRadio {
            payload_variant: Some(to_radio::PayloadVariant::Packet(packet)),
        })
        .await
    }
}

#[async_trait]
impl RadioInterface for MeshtasticRadio {
    async fn send_text(&self, text: &str, destination: NodeId) -> Result<u32, RadioError> {
        validate_outbound_text(text)?;
        let id = packet_id();
        let packet = proto::MeshPacket {
            to: destination.0,
            channel: self.config.channel,
            id,
            hop_limit: 3,
            want_ack: true,
            priority: priority::RELIABLE,
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(proto::Data {
                portnum: port::TEXT_MESSAGE_APP,
                payload: text.as_bytes().to_vec(),
                ..Default::default()
            })),
            ..Default::default()
        };
        self.send_packet(packet).await?;
        debug!(
            "Sent text id=0x{:08x} to {}: {}",
            id,
            destination,
            escape_log(text)
        );
        Ok(id)
    }

    async fn send_reaction(&self, emoji: &str, message_id: u32) -> Result<(), RadioError> {
        let packet = proto::MeshPacket {
            to: NodeId::BROADCAST.0,
            channel: self.config.channel,
            id: packet_id(),
            hop_limit: 3,
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(proto::Data {
                portnum: port::TEXT_MESSAGE_APP,
                payload: emoji.as_bytes().to_vec(),
                reply_id: message_id,
                emoji: 1,
                ..Default::default()
            })),
            ..Default::default()
        };
        self.send_packet(packet).await?;
        debug!("Sent reaction {} to 0x{:08x}", emoji, message_id);
        Ok(())
    }

    async fn my_node_info(&self) -> Result<LocalNodeInfo, RadioError> {
        let local = self
            .local
            .lock()
            .map_err(|_| RadioError::Task("local node info lock poisoned".to_string()))?;
        if local.node_id.is_none() {
            return Err(RadioError::NotReady);
        }
        Ok(local.clone())
    }

    async fn health_check(&self) -> Result<(), RadioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RadioError::NotConnected);
        }
        self.write(proto::ToRadio {
            payload_variant: Some(to_radio::PayloadVariant::Heartbeat(proto::Heartbeat {
                nonce: rand::random(),
            })),
        })
        .await
    }

    async fn reconnect(&self) -> Result<(), RadioError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RadioError::NotConnected);
        }
        warn!("Reconnecting to Meshtastic device {}", self.config.device);
        if let Some(old) = self.conn.lock().await.take() {
            old.reader.stop();
        }
        self.open().await
    }

    async fn close(&self) -> Result<(), RadioError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self
            .write(proto::ToRadio {
                payload_variant: Some(to_radio::PayloadVariant::Disconnect(true)),
            })
            .await;
        if let Some(conn) = self.conn.lock().await.take() {
            conn.reader.stop();
            if let Link::Tcp(mut writer) = conn.link {
                let _ = writer.shutdown().await;
            }
        }
        info!("Meshtastic device closed");
        Ok(())
    }
}

/// Random non-zero packet id.
fn packet_id() -> u32 {
    loop {
        let id: u32 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

fn tcp_address(device: &str) -> String {
    match device.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => device.to_string(),
        _ => format!("{}:{}", device, DEFAULT_TCP_PORT),
    }
}

/// Decode one frame, keep the local node record current and return any
/// packet worth forwarding.
fn handle_frame(frame: &[u8], local: &LocalInfo) -> Option<RadioPacket> {
    let event = match decode_from_radio(frame) {
        Ok(event) => event,
        Err(e) => {
            debug!("Dropping undecodable frame ({} bytes): {}", frame.len(), e);
            return None;
        }
    };
    let mut local = local.lock().ok()?;
    match event {
        DeviceEvent::Packet(packet) => {
            if local.node_id == Some(packet.from) {
                match &packet.payload {
                    PacketPayload::NodeInfo(user) => {
                        local.long_name = Some(user.long_name.clone());
                        local.short_name = Some(user.short_name.clone());
                    }
                    PacketPayload::Telemetry(TelemetryReport::Device(m)) => {
                        local.battery_level = m.battery_level.or(local.battery_level);
                        local.air_util_tx = m.air_util_tx.or(local.air_util_tx);
                    }
                    _ => {}
                }
            }
            Some(packet)
        }
        DeviceEvent::MyInfo { node_num } => {
            info!("Connected radio is node {}", NodeId(node_num));
            local.node_id = Some(NodeId(node_num));
            None
        }
        DeviceEvent::NodeInfo { num, user, metrics } => {
            if local.node_id == Some(NodeId(num)) {
                if let Some(user) = user {
                    local.long_name = Some(user.long_name);
                    local.short_name = Some(user.short_name);
                }
                if let Some(m) = metrics {
                    local.battery_level = m.battery_level;
                    local.air_util_tx = m.air_util_tx;
                }
            }
            None
        }
        DeviceEvent::ConfigComplete(id) => {
            info!("Radio config sync complete (id=0x{:08x})", id);
            None
        }
        DeviceEvent::Rebooted => {
            warn!("Radio reports it rebooted");
            None
        }
        DeviceEvent::Ignored => None,
    }
}

#[cfg(feature = "serial")]
fn serial_reader(
    mut port: Box<dyn SerialPort>,
    stop: Arc<AtomicBool>,
    tx: mpsc::Sender<RadioPacket>,
    local: LocalInfo,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 1024];
    while !stop.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                decoder.push(&buf[..n]);
                while let Some(frame) = decoder.next_frame() {
                    if let Some(packet) = handle_frame(&frame, &local) {
                        if tx.blocking_send(packet).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!("Serial read failed: {}", e);
                break;
            }
        }
    }
    debug!("Serial reader stopped");
}

async fn tcp_reader(
    mut stream: OwnedReadHalf,
    stop: Arc<AtomicBool>,
    tx: mpsc::Sender<RadioPacket>,
    local: LocalInfo,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 1024];
    while !stop.load(Ordering::Relaxed) {
        match stream.read(&mut buf).await {
            Ok(0) => {
                warn!("Meshtastic TCP connection closed by peer");
                break;
            }
            Ok(n) => {
                decoder.push(&buf[..n]);
                while let Some(frame) = decoder.next_frame() {
                    if let Some(packet) = handle_frame(&frame, &local) {
                        if tx.send(packet).await.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("TCP read failed: {}", e);
                break;
            }
        }
    }
    debug!("TCP reader stopped");
}
