use shared::{
    domain::MessageId,
    protocol::{
        ButtonsResponseMessage, ExtendedTextMessage, ListResponseMessage, LocationMessage,
        MediaMessage, MessageKey, MessageUpdateBody, PollOption, ProtocolMessage,
    },
};
use storage::SessionCache;

use super::*;

const SENDER: &str = "34600111222@s.whatsapp.net";

fn envelope(remote: &str, content: MessageContent) -> WebMessageInfo {
    WebMessageInfo {
        key: MessageKey {
            remote_jid: Jid::new(remote),
            id: MessageId::new("MSG-1"),
            ..MessageKey::default()
        },
        push_name: Some("Ana".into()),
        message: Some(content),
        message_timestamp: 1_700_000_000,
        ..WebMessageInfo::default()
    }
}

fn text(body: &str) -> MessageContent {
    MessageContent {
        conversation: Some(body.into()),
        ..MessageContent::default()
    }
}

fn notify(messages: Vec<WebMessageInfo>) -> MessagesUpsert {
    MessagesUpsert {
        messages,
        kind: UpsertType::Notify,
    }
}

fn media() -> Option<MediaMessage> {
    Some(MediaMessage {
        mimetype: Some("application/octet-stream".into()),
        ..MediaMessage::default()
    })
}

#[test]
fn live_text_message_is_normalized() {
    let out = EventNormalizer::default().normalize_upsert(&notify(vec![envelope(SENDER, text("hola"))]));

    assert_eq!(out.len(), 1);
    let message = &out[0];
    assert_eq!(message.body, "hola");
    assert_eq!(message.remote_id, "34600111222");
    assert_eq!(message.sender_name, "Ana");
    assert_eq!(message.media_class, MediaClass::None);
    assert_eq!(message.direction, Direction::Inbound);
    assert_eq!(message.timestamp, 1_700_000_000);
}

#[test]
fn extended_text_is_used_when_no_plain_text() {
    let content = MessageContent {
        extended_text_message: Some(ExtendedTextMessage {
            text: Some("with link https://example.org".into()),
        }),
        ..MessageContent::default()
    };
    let out = EventNormalizer::default().normalize_upsert(&notify(vec![envelope(SENDER, content)]));
    assert_eq!(out[0].body, "with link https://example.org");
}

#[test]
fn history_batches_produce_nothing() {
    let batch = MessagesUpsert {
        messages: vec![envelope(SENDER, text("old"))],
        kind: UpsertType::Append,
    };
    assert!(EventNormalizer::default().normalize_upsert(&batch).is_empty());
}

#[test]
fn status_self_and_invalid_senders_are_dropped() {
    let mut own = envelope(SENDER, text("echo"));
    own.key.from_me = true;
    let batch = notify(vec![
        envelope(STATUS_BROADCAST, text("story")),
        own,
        envelope("120363040000000000@g.us", text("group")),
        envelope("not-a-number@s.whatsapp.net", text("junk")),
    ]);
    assert!(EventNormalizer::default().normalize_upsert(&batch).is_empty());
}

#[test]
fn ephemeral_setting_control_messages_are_dropped() {
    let content = MessageContent {
        protocol_message: Some(ProtocolMessage {
            kind: Some(EPHEMERAL_SETTING.into()),
        }),
        ..MessageContent::default()
    };
    let out = EventNormalizer::default().normalize_upsert(&notify(vec![envelope(SENDER, content)]));
    assert!(out.is_empty());
}

#[test]
fn media_only_messages_get_class_placeholders() {
    let location = MessageContent {
        location_message: Some(LocationMessage {
            degrees_latitude: 40.4,
            degrees_longitude: -3.7,
            ..LocationMessage::default()
        }),
        ..MessageContent::default()
    };
    let image = MessageContent {
        image_message: media(),
        ..MessageContent::default()
    };
    let out = EventNormalizer::default()
        .normalize_upsert(&notify(vec![envelope(SENDER, location), envelope(SENDER, image)]));

    assert_eq!(out.len(), 2);
    assert_eq!(out[0].media_class, MediaClass::Location);
    assert_eq!(MediaClass::from_placeholder(&out[0].body), Some(MediaClass::Location));
    assert_eq!(out[1].media_class, MediaClass::Image);
    assert_eq!(MediaClass::from_placeholder(&out[1].body), Some(MediaClass::Image));
}

#[test]
fn classification_precedence_is_image_video_sticker_document_audio() {
    let mut content = MessageContent {
        image_message: media(),
        video_message: media(),
        sticker_message: media(),
        document_message: media(),
        audio_message: media(),
        ..MessageContent::default()
    };
    let expected = [
        MediaClass::Image,
        MediaClass::Video,
        MediaClass::Sticker,
        MediaClass::Document,
        MediaClass::Audio,
    ];
    for class in expected {
        assert_eq!(classify(&content), class);
        match class {
            MediaClass::Image => content.image_message = None,
            MediaClass::Video => content.video_message = None,
            MediaClass::Sticker => content.sticker_message = None,
            MediaClass::Document => content.document_message = None,
            _ => content.audio_message = None,
        }
    }
    assert_eq!(classify(&content), MediaClass::None);
}

#[test]
fn button_and_list_replies_take_the_selected_text() {
    let button = MessageContent {
        buttons_response_message: Some(ButtonsResponseMessage {
            selected_button_id: Some("b1".into()),
            selected_display_text: Some("Yes please".into()),
        }),
        ..MessageContent::default()
    };
    let list = MessageContent {
        list_response_message: Some(ListResponseMessage {
            title: Some("Option A".into()),
        }),
        ..MessageContent::default()
    };
    let out = EventNormalizer::default()
        .normalize_upsert(&notify(vec![envelope(SENDER, button), envelope(SENDER, list)]));
    assert_eq!(out[0].body, "Yes please");
    assert_eq!(out[1].body, "Option A");
}

fn poll_envelope() -> WebMessageInfo {
    let mut poll = envelope(
        SENDER,
        MessageContent {
            poll_creation_message: Some(PollCreationMessage {
                name: "Coffee?".into(),
                options: vec![
                    PollOption {
                        option_name: "No".into(),
                    },
                    PollOption {
                        option_name: "Yes".into(),
                    },
                ],
                selectable_options_count: 1,
            }),
            ..MessageContent::default()
        },
    );
    poll.key.id = MessageId::new("POLL-1");
    poll.broadcast = false;
    poll
}

fn poll_vote_update(voters: &[&str], option: &str) -> Vec<MessageUpdate> {
    vec![MessageUpdate {
        key: poll_envelope().key,
        update: MessageUpdateBody {
            poll_updates: voters
                .iter()
                .map(|voter| PollUpdate {
                    voter: Jid::new(*voter),
                    selected_options: vec![option_digest(option)],
                    sender_timestamp_ms: 10,
                })
                .collect(),
        },
    }]
}

#[tokio::test]
async fn poll_votes_resolve_against_cached_poll() {
    let cache = Arc::new(SessionCache::default());
    cache
        .ingest(&TransportEvent::MessagesUpsert(notify(vec![poll_envelope()])))
        .await;
    let normalizer = EventNormalizer::new(Some(cache.clone()));

    let out = normalizer
        .normalize_poll_updates(&poll_vote_update(&["a@s.whatsapp.net", "b@s.whatsapp.net"], "Yes"))
        .await;

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].body, "Yes");
    assert_eq!(out[0].media_class, MediaClass::Poll);
    assert_eq!(out[0].sender_name, "Ana");
    assert_eq!(out[0].timestamp, 1_700_000_000);
    assert_eq!(out[0].raw.poll_updates.len(), 2);
}

#[tokio::test]
async fn poll_without_cache_degrades_to_empty_snapshot() {
    let out = EventNormalizer::default()
        .normalize_poll_updates(&poll_vote_update(&["a@s.whatsapp.net"], "Yes"))
        .await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].body, "");
    assert_eq!(out[0].media_class, MediaClass::Poll);

    let empty_cache = Arc::new(SessionCache::default());
    let out = EventNormalizer::new(Some(empty_cache))
        .normalize_poll_updates(&poll_vote_update(&["a@s.whatsapp.net"], "Yes"))
        .await;
    assert_eq!(out[0].body, "");
}

#[test]
fn tally_follows_declared_option_order() {
    let Some(poll) = poll_envelope().message.and_then(|m| m.poll_creation_message) else {
        panic!("poll fixture");
    };
    let votes = vec![
        PollUpdate {
            voter: Jid::new("a"),
            selected_options: vec![option_digest("Yes")],
            sender_timestamp_ms: 1,
        },
        PollUpdate {
            voter: Jid::new("b"),
            selected_options: vec![],
            sender_timestamp_ms: 1,
        },
    ];
    let tally = aggregate_votes(&poll, &votes);
    assert_eq!(tally[0].name, "No");
    assert!(tally[0].voters.is_empty());
    assert_eq!(tally[1].voters, vec![Jid::new("a")]);
}
