//! Node liveness: inactivity marking, notices and pruning.

mod common;

use chrono::{Duration as ChronoDuration, Utc};

use common::{router_with, settings, MockChat, MockRadio};
use meshgram::bridge::nodes::HISTORY_LIMIT;
use meshgram::bridge::{NodeStore, NodeUpdate};
use meshgram::meshtastic::{NodeId, PacketPayload, RadioPacket};

const NODE: NodeId = NodeId(0xaaaa_1111);

fn mesh_text(from: NodeId) -> RadioPacket {
    RadioPacket {
        id: 5,
        from,
        to: NodeId::BROADCAST,
        channel: 0,
        payload: PacketPayload::Text("alive".to_string()),
    }
}

#[tokio::test]
async fn quiet_node_is_flagged_once_and_announced() {
    let radio = MockRadio::new();
    let chat = MockChat::new();
    let mut s = settings();
    s.notify_inactive = true;
    let mut router = router_with(s, &radio, &chat);

    router.handle_radio_packet(mesh_text(NODE)).await.unwrap();
    let later = Utc::now() + ChronoDuration::minutes(10);
    router.sweep_inactive_at(later).await.unwrap();
    router.sweep_inactive_at(later).await.unwrap();

    assert!(router.nodes().get(NODE).unwrap().inactive);
    let notices: Vec<String> = chat
        .texts()
        .into_iter()
        .filter(|t| t.starts_with("💤"))
        .collect();
    assert_eq!(
        notices,
        vec!["💤 Node !aaaa1111 has been silent for over 5 minutes".to_string()]
    );
}

#[tokio::test]
async fn traffic_clears_the_inactive_flag() {
    let radio = MockRadio::new();
    let chat = MockChat::new();
    let mut router = router_with(settings(), &radio, &chat);

    router.handle_radio_packet(mesh_text(NODE)).await.unwrap();
    router
        .sweep_inactive_at(Utc::now() + ChronoDuration::minutes(10))
        .await
        .unwrap();
    assert!(router.nodes().get(NODE).unwrap().inactive);

    router.handle_radio_packet(mesh_text(NODE)).await.unwrap();
    assert!(!router.nodes().get(NODE).unwrap().inactive);
    // notices are off by default
    assert!(chat.texts().iter().all(|t| !t.starts_with("💤")));
}

#[tokio::test]
async fn long_silent_nodes_are_forgotten() {
    let radio = MockRadio::new();
    let chat = MockChat::new();
    let mut router = router_with(settings(), &radio, &chat);

    router.handle_radio_packet(mesh_text(NODE)).await.unwrap();
    router
        .sweep_inactive_at(Utc::now() + ChronoDuration::hours(3))
        .await
        .unwrap();
    assert!(router.nodes().get(NODE).is_none());
    assert!(router.nodes().history(NODE).is_none());
}

#[tokio::test]
async fn huge_inactivity_timeout_never_prunes() {
    let radio = MockRadio::new();
    let chat = MockChat::new();
    let mut s = settings();
    s.inactivity_timeout = std::time::Duration::from_secs(u64::MAX / 10);
    let mut router = router_with(s, &radio, &chat);

    router.handle_radio_packet(mesh_text(NODE)).await.unwrap();
    router
        .sweep_inactive_at(Utc::now() + ChronoDuration::days(365))
        .await
        .unwrap();
    let node = router.nodes().get(NODE).unwrap();
    assert!(!node.inactive);
}

#[test]
fn history_is_capped() {
    let mut store = NodeStore::new();
    for level in 0..(HISTORY_LIMIT as u32 + 20) {
        store.update(
            NODE,
            NodeUpdate {
                battery_level: Some(level),
                ..Default::default()
            },
        );
    }
    let history = store.history(NODE).unwrap();
    assert_eq!(history.len(), HISTORY_LIMIT);
    // oldest snapshots go first
    assert_eq!(history.front().unwrap().battery_level, Some(20));
    assert_eq!(
        history.back().unwrap().battery_level,
        Some(HISTORY_LIMIT as u32 + 19)
    );
    assert_eq!(store.len(), 1);
}
