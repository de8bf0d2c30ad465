//! Server loop lifecycle: event processing, periodic work and shutdown.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use common::{settings, MockChat, MockRadio};
use meshgram::bridge::{BridgeServer, Timings};
use meshgram::meshtastic::{RadioPacket, RadioInterface};
use meshgram::telegram::{ChatEvent, ChatInterface, TextEvent};

fn timings() -> Timings {
    Timings {
        retry_interval: Duration::from_secs(60),
        ack_check_interval: Duration::from_secs(10),
        heartbeat_interval: Duration::from_secs(60),
        health_check_interval: Duration::from_secs(60),
        event_pause: Duration::ZERO,
    }
}

struct Harness {
    server: BridgeServer,
    radio: Arc<MockRadio>,
    chat: Arc<MockChat>,
    radio_tx: mpsc::Sender<RadioPacket>,
    chat_tx: mpsc::Sender<ChatEvent>,
}

fn harness(radio: Arc<MockRadio>) -> Harness {
    let chat = MockChat::new();
    let (radio_tx, radio_rx) = mpsc::channel(16);
    let (chat_tx, chat_rx) = mpsc::channel(16);
    let radio_dyn: Arc<dyn RadioInterface> = radio.clone();
    let chat_dyn: Arc<dyn ChatInterface> = chat.clone();
    let server = BridgeServer::with_settings(
        settings(),
        timings(),
        radio_dyn,
        radio_rx,
        chat_dyn,
        chat_rx,
    );
    Harness {
        server,
        radio,
        chat,
        radio_tx,
        chat_tx,
    }
}

fn hello() -> ChatEvent {
    ChatEvent::Text(TextEvent {
        text: "hello".to_string(),
        sender: "alice".to_string(),
        message_id: 10,
        user_id: common::AUTHORIZED_USER,
    })
}

#[tokio::test(start_paused = true)]
async fn shutdown_handle_stops_the_loop_and_closes_once() {
    let Harness {
        mut server,
        radio,
        chat,
        radio_tx: _radio_tx,
        chat_tx,
    } = harness(MockRadio::new());
    let shutdown = server.shutdown_handle();
    let helper = tokio::spawn(std::future::pending::<()>());
    server.add_task(helper);

    let handle = tokio::spawn(async move {
        server.run().await.unwrap();
        server
    });
    chat_tx.send(hello()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown.send(true).unwrap();
    let mut server = handle.await.unwrap();

    assert_eq!(radio.sent().len(), 1);
    assert!(server.router().is_closed());
    assert_eq!(radio.closes.load(Ordering::SeqCst), 1);
    assert_eq!(chat.closes.load(Ordering::SeqCst), 1);

    server.close().await;
    assert_eq!(radio.closes.load(Ordering::SeqCst), 1);
    assert_eq!(chat.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn loop_ends_when_both_queues_close() {
    let Harness {
        mut server,
        radio,
        radio_tx,
        chat_tx,
        ..
    } = harness(MockRadio::new());
    drop(radio_tx);
    drop(chat_tx);

    tokio::time::timeout(Duration::from_secs(5), server.run())
        .await
        .expect("run should return")
        .unwrap();
    assert_eq!(radio.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn retries_run_on_their_own_schedule() {
    let Harness {
        mut server,
        radio,
        chat,
        radio_tx: _radio_tx,
        chat_tx,
    } = harness(MockRadio::failing());
    let shutdown = server.shutdown_handle();
    let handle = tokio::spawn(async move { server.run().await });

    chat_tx.send(hello()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;
    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(radio.attempts(), 3);
    assert_eq!(
        chat.texts(),
        vec!["Failed to send message to Meshtastic. It will be retried.".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn unhealthy_radio_is_reconnected() {
    let radio = MockRadio::new();
    radio.unhealthy.store(true, Ordering::SeqCst);
    let Harness {
        mut server,
        radio,
        radio_tx: _radio_tx,
        chat_tx: _chat_tx,
        ..
    } = harness(radio);
    let shutdown = server.shutdown_handle();
    let handle = tokio::spawn(async move { server.run().await });

    tokio::time::sleep(Duration::from_secs(61)).await;
    shutdown.send(true).unwrap();
    handle.await.unwrap().unwrap();

    assert_eq!(radio.reconnects.load(Ordering::SeqCst), 1);
}
