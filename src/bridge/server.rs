use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::router::{MessageRouter, RouterSettings};
use crate::config::Config;
use crate::meshtastic::{RadioInterface, RadioPacket};
use crate::telegram::{ChatEvent, ChatInterface};

/// Periods for the server's sweeps.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub retry_interval: Duration,
    pub ack_check_interval: Duration,
    pub heartbeat_interval: Duration,
    pub health_check_interval: Duration,
    pub event_pause: Duration,
}

impl Timings {
    pub fn from_config(config: &Config) -> Self {
        let b = &config.bridge;
        Timings {
            retry_interval: b.retry_interval(),
            ack_check_interval: b.ack_check_interval(),
            heartbeat_interval: b.heartbeat_interval(),
            health_check_interval: b.health_check_interval(),
            event_pause: b.event_pause(),
        }
    }
}

/// # Bridge Server
///
/// Runs the bridge: one loop that pulls from the radio and chat queues,
/// hands each event to the [`MessageRouter`], and drives the periodic retry,
/// ack-expiry, inactivity and health sweeps. Because every one of those runs
/// inside the same loop, the router's state has a single writer.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use meshgram::bridge::BridgeServer;
/// # async fn demo(server: BridgeServer) -> anyhow::Result<()> {
/// let mut server = server;
/// let shutdown = server.shutdown_handle();
/// tokio::spawn(async move {
///     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
///     let _ = shutdown.send(true);
/// });
/// server.run().await?;
/// # Ok(())
/// # }
/// ```
///
/// Per-event failures are logged and the loop moves on. [`close`](Self::close)
/// stops helper tasks and releases the router, the chat client and the radio
/// in that order; it is safe to call more than once and never fails.
pub struct BridgeServer {
    router: MessageRouter,
    radio: Arc<dyn RadioInterface>,
    chat: Arc<dyn ChatInterface>,
    radio_rx: mpsc::Receiver<RadioPacket>,
    chat_rx: mpsc::Receiver<ChatEvent>,
    timings: Timings,
    tasks: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    closed: bool,
}

impl BridgeServer {
    pub fn new(
        config: &Config,
        radio: Arc<dyn RadioInterface>,
        radio_rx: mpsc::Receiver<RadioPacket>,
        chat: Arc<dyn ChatInterface>,
        chat_rx: mpsc::Receiver<ChatEvent>,
    ) -> anyhow::Result<Self> {
        let settings = RouterSettings::from_config(config)?;
        Ok(Self::with_settings(
            settings,
            Timings::from_config(config),
            radio,
            radio_rx,
            chat,
            chat_rx,
        ))
    }

    pub fn with_settings(
        settings: RouterSettings,
        timings: Timings,
        radio: Arc<dyn RadioInterface>,
        radio_rx: mpsc::Receiver<RadioPacket>,
        chat: Arc<dyn ChatInterface>,
        chat_rx: mpsc::Receiver<ChatEvent>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        BridgeServer {
            router: MessageRouter::new(settings, radio.clone(), chat.clone()),
            radio,
            chat,
            radio_rx,
            chat_rx,
            timings,
            tasks: Vec::new(),
            shutdown_tx,
            shutdown_rx,
            closed: false,
        }
    }

    /// Register a helper task (e.g. the chat long-poll receiver) to be
    /// stopped on shutdown.
    pub fn add_task(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Sending `true` makes [`run`](Self::run) return.
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Run until Ctrl-C, a shutdown request, or both queues closing. Always
    /// finishes with [`close`](Self::close).
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let t = self.timings;
        let start = Instant::now();
        let mut retry_tick = interval_at(start + t.retry_interval, t.retry_interval);
        let mut ack_tick = interval_at(start + t.ack_check_interval, t.ack_check_interval);
        let mut heartbeat_tick = interval_at(start + t.heartbeat_interval, t.heartbeat_interval);
        let mut health_tick =
            interval_at(start + t.health_check_interval, t.health_check_interval);
        for tick in [
            &mut retry_tick,
            &mut ack_tick,
            &mut heartbeat_tick,
            &mut health_tick,
        ] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        let mut radio_open = true;
        let mut chat_open = true;
        let mut shutdown_rx = self.shutdown_rx.clone();
        info!("Bridge running");

        while radio_open || chat_open {
            tokio::select! {
                packet = self.radio_rx.recv(), if radio_open => {
                    match packet {
                        Some(packet) => {
                            let id = packet.id;
                            if let Err(e) = self.router.handle_radio_packet(packet).await {
                                warn!("Error processing Meshtastic packet 0x{:08x}: {}", id, e);
                            }
                            self.pause().await;
                        }
                        None => {
                            warn!("Radio packet channel closed");
                            radio_open = false;
                        }
                    }
                }

                event = self.chat_rx.recv(), if chat_open => {
                    match event {
                        Some(event) => {
                            let kind = event.kind();
                            if let Err(e) = self.router.handle_chat_event(event).await {
                                warn!("Error processing chat {} event: {}", kind, e);
                            }
                            self.pause().await;
                        }
                        None => {
                            warn!("Chat event channel closed");
                            chat_open = false;
                        }
                    }
                }

                _ = retry_tick.tick() => {
                    self.router.retry_pending(Instant::now()).await;
                }

                _ = ack_tick.tick() => {
                    let expired = self.router.expire_acks(Instant::now());
                    if expired > 0 {
                        debug!("{} pending ACKs expired", expired);
                    }
                }

                _ = heartbeat_tick.tick() => {
                    if let Err(e) = self.router.sweep_inactive().await {
                        warn!("Inactivity sweep failed: {}", e);
                    }
                }

                _ = health_tick.tick() => {
                    if let Err(e) = self.router.check_radio().await {
                        warn!("Radio reconnect failed: {}", e);
                    }
                }

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown requested");
                        break;
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        self.close().await;
        Ok(())
    }

    async fn pause(&self) {
        if !self.timings.event_pause.is_zero() {
            tokio::time::sleep(self.timings.event_pause).await;
        }
    }

    /// Stop helper tasks, then release router, chat and radio. Each step is
    /// attempted even if an earlier one failed.
    pub async fn close(&mut self) {
        if self.closed {
            debug!("Bridge already closed");
            return;
        }
        self.closed = true;
        info!("Shutting down bridge...");

        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks.drain(..) {
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!("Background task ended with error: {}", e),
            }
        }

        self.router.close();
        if let Err(e) = self.chat.close().await {
            warn!("Error closing chat client: {}", e);
        }
        if let Err(e) = self.radio.close().await {
            warn!("Error closing radio: {}", e);
        }
        info!("Bridge shutdown complete");
    }
}
