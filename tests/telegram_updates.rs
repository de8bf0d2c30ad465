//! Bot API updates parsed into events and fed through the router.

mod common;

use serde_json::json;

use common::{router, MockChat, MockRadio};
use meshgram::meshtastic::NodeId;
use meshgram::telegram::api::{parse_update, Update};
use meshgram::telegram::ChatEvent;

const CHAT: i64 = -100_123;

fn update(value: serde_json::Value) -> Update {
    serde_json::from_value(value).unwrap()
}

#[tokio::test(start_paused = true)]
async fn text_update_reaches_the_radio_once() {
    let radio = MockRadio::new();
    let chat = MockChat::new();
    let mut router = router(&radio, &chat);

    let event = parse_update(
        update(json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "from": {"id": 1001, "is_bot": false, "first_name": "Alice", "username": "alice"},
                "chat": {"id": CHAT, "type": "group"},
                "date": 0,
                "text": "hello"
            }
        })),
        CHAT,
    )
    .expect("text event");
    router.handle_chat_event(event).await.unwrap();

    assert_eq!(
        radio.sent(),
        vec![("[TG:alice] hello".to_string(), NodeId::BROADCAST)]
    );
    assert_eq!(router.delivery().pending_acks(), 1);
}

#[test]
fn sender_falls_back_to_first_name() {
    let event = parse_update(
        update(json!({
            "update_id": 2,
            "message": {
                "message_id": 11,
                "from": {"id": 5, "first_name": "Bob"},
                "chat": {"id": CHAT},
                "text": "hi"
            }
        })),
        CHAT,
    );
    match event {
        Some(ChatEvent::Text(t)) => assert_eq!(t.sender, "Bob"),
        other => panic!("Expected text, got {:?}", other),
    }
}

#[test]
fn location_update() {
    let event = parse_update(
        update(json!({
            "update_id": 3,
            "message": {
                "message_id": 12,
                "from": {"id": 5, "first_name": "Bob"},
                "chat": {"id": CHAT},
                "location": {"latitude": 50.1, "longitude": 14.4}
            }
        })),
        CHAT,
    );
    match event {
        Some(ChatEvent::Location(l)) => {
            assert_eq!(l.message_id, 12);
            assert!((l.latitude - 50.1).abs() < 1e-9);
            assert_eq!(l.altitude, None);
        }
        other => panic!("Expected location, got {:?}", other),
    }
}

#[test]
fn updates_without_content_are_skipped() {
    // sticker-only message
    let sticker = update(json!({
        "update_id": 4,
        "message": {"message_id": 13, "chat": {"id": CHAT}, "sticker": {"file_id": "x"}}
    }));
    assert!(parse_update(sticker, CHAT).is_none());

    // reaction removed
    let cleared = update(json!({
        "update_id": 5,
        "message_reaction": {
            "chat": {"id": CHAT},
            "message_id": 13,
            "old_reaction": [{"type": "emoji", "emoji": "👍"}],
            "new_reaction": []
        }
    }));
    assert!(parse_update(cleared, CHAT).is_none());

    let bare = update(json!({"update_id": 6}));
    assert!(parse_update(bare, CHAT).is_none());
}
