//! Chat command handling: authorization, unknown commands and replies.

mod common;

use common::{router, router_with, settings, MockChat, MockRadio, AUTHORIZED_USER, STRANGER};
use meshgram::bridge::MessageRouter;
use meshgram::meshtastic::NodeId;
use meshgram::telegram::{ChatEvent, ChatUser, CommandEvent};

fn user(id: i64) -> ChatUser {
    ChatUser {
        id,
        username: Some("alice".to_string()),
        first_name: "Alice".to_string(),
        ..Default::default()
    }
}

async fn run(router: &mut MessageRouter, from: i64, name: &str, args: &[&str]) {
    router
        .handle_chat_event(ChatEvent::Command(CommandEvent {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            user: user(from),
            message_id: 77,
        }))
        .await
        .unwrap();
}

#[tokio::test]
async fn stranger_is_refused_restricted_commands() {
    let radio = MockRadio::new();
    let chat = MockChat::new();
    let mut router = router(&radio, &chat);

    run(&mut router, STRANGER, "status", &[]).await;
    run(&mut router, STRANGER, "bell", &["!aaaa1111"]).await;

    assert_eq!(
        chat.texts(),
        vec!["You are not authorized to use this command.".to_string(); 2]
    );
    assert_eq!(radio.attempts(), 0);
}

#[tokio::test]
async fn open_commands_work_for_anyone() {
    let radio = MockRadio::new();
    let chat = MockChat::new();
    let mut router = router(&radio, &chat);

    run(&mut router, STRANGER, "start", &[]).await;
    run(&mut router, STRANGER, "help", &[]).await;
    run(&mut router, STRANGER, "user", &[]).await;

    let replies = chat.messages();
    assert_eq!(replies.len(), 3);
    assert!(replies[0].text.starts_with("Welcome to Meshgram!"));
    assert!(replies[1].text.contains("/bell [node_id]"));
    assert!(replies[2].text.contains("ID: 2002"));
    assert!(replies[2].text.contains("Is Authorized: No"));
    assert!(replies.iter().all(|m| m.opts.reply_to == Some(77)));
}

#[tokio::test]
async fn unknown_command_checks_authorization_first() {
    let radio = MockRadio::new();
    let chat = MockChat::new();
    let mut router = router(&radio, &chat);

    run(&mut router, STRANGER, "frobnicate", &[]).await;
    run(&mut router, AUTHORIZED_USER, "frobnicate", &[]).await;

    assert_eq!(
        chat.texts(),
        vec![
            "You are not authorized to use this command.".to_string(),
            "Unknown command: frobnicate".to_string(),
        ]
    );
}

#[tokio::test]
async fn bell_without_target_or_default_node() {
    let radio = MockRadio::new();
    let chat = MockChat::new();
    let mut router = router(&radio, &chat);

    run(&mut router, AUTHORIZED_USER, "bell", &[]).await;

    assert_eq!(
        chat.texts(),
        vec!["No node ID provided and no default node ID set.".to_string()]
    );
    assert_eq!(radio.attempts(), 0);
}

#[tokio::test]
async fn bell_rings_the_named_node() {
    let radio = MockRadio::new();
    let chat = MockChat::new();
    let mut router = router(&radio, &chat);

    run(&mut router, AUTHORIZED_USER, "bell", &["!aaaa1111"]).await;

    assert_eq!(radio.sent(), vec![("🔔".to_string(), NodeId(0xaaaa_1111))]);
    let replies = chat.messages();
    assert_eq!(replies[0].text, "🔔 Bell sent to node !aaaa1111.");
    assert!(replies[0].opts.disable_notification);
}

#[tokio::test]
async fn bell_falls_back_to_default_node() {
    let radio = MockRadio::new();
    let chat = MockChat::new();
    let mut s = settings();
    s.default_node = Some(NodeId(0x1234_5678));
    let mut router = router_with(s, &radio, &chat);

    run(&mut router, AUTHORIZED_USER, "bell", &[]).await;
    assert_eq!(radio.sent()[0].1, NodeId(0x1234_5678));
}

#[tokio::test]
async fn bad_node_id_is_reported() {
    let radio = MockRadio::new();
    let chat = MockChat::new();
    let mut router = router(&radio, &chat);

    run(&mut router, AUTHORIZED_USER, "node", &["not-a-node"]).await;

    let replies = chat.texts();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].starts_with("Error executing command:"), "{}", replies[0]);
}

#[tokio::test]
async fn node_report_lists_all_sections() {
    let radio = MockRadio::new();
    let chat = MockChat::new();
    let mut router = router(&radio, &chat);

    run(&mut router, AUTHORIZED_USER, "node", &["!aaaa1111"]).await;

    let reply = &chat.texts()[0];
    assert!(reply.starts_with("ℹ️ No information available for node !aaaa1111"));
    assert!(reply.contains("🔬 No sensor information available"));
}

#[tokio::test]
async fn status_reports_bridge_and_radio() {
    let radio = MockRadio::new();
    let chat = MockChat::new();
    let mut router = router(&radio, &chat);

    run(&mut router, AUTHORIZED_USER, "status", &[]).await;

    let reply = &chat.texts()[0];
    assert!(reply.starts_with("📊 Meshgram Status:"));
    assert!(reply.contains("⏳ Pending ACKs: 0"));
    assert!(reply.contains("Node: Base Station !0badcafe"));
    assert!(reply.contains("Battery: PWR"));
}
