use std::sync::Arc;

use anyhow::Result;
use axum::{http::header, routing::get, Router};
use shared::message::OutboundKind;
use tokio::net::TcpListener;

use super::*;
use crate::{
    test_support::{open_slot, FakeTransport},
    transcode::PassthroughTranscoder,
};

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake";

async fn spawn_media_server() -> Result<String> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route(
            "/files/logo",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], PNG_BYTES) }),
        )
        .route(
            "/files/greeting.mp3",
            get(|| async { ([(header::CONTENT_TYPE, "application/octet-stream")], b"ID3".as_slice()) }),
        );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

async fn dispatcher_with(transport: Arc<FakeTransport>) -> (MessageDispatcher, broadcast::Receiver<ProviderEvent>) {
    let (events, rx) = broadcast::channel(16);
    let dispatcher = MessageDispatcher::new(open_slot(transport).await, events, true)
        .with_transcoder(Arc::new(PassthroughTranscoder));
    (dispatcher, rx)
}

#[tokio::test]
async fn text_is_sent_to_normalized_recipient() {
    let transport = Arc::new(FakeTransport::default());
    let (dispatcher, _) = dispatcher_with(transport.clone()).await;

    let receipt = dispatcher
        .send_message("+34 600 111 222", "hola", SendOptions::default())
        .await
        .expect("send");

    assert_eq!(receipt.message_id.map(|id| id.0), Some("SENT-1".to_string()));
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient.as_str(), "34600111222@s.whatsapp.net");
    assert_eq!(
        sent[0].content,
        OutboundContent::Text {
            text: "hola".into()
        }
    );
}

#[tokio::test]
async fn dispatch_fails_when_not_connected() {
    let (events, _) = broadcast::channel(4);
    let dispatcher = MessageDispatcher::new(SocketSlot::default(), events, false);
    let err = dispatcher
        .send_text("34600111222", "hola", None)
        .await
        .expect_err("not connected");
    assert!(matches!(err, DispatchError::NotConnected));
}

#[tokio::test]
async fn poll_with_fewer_than_two_options_is_not_sent() {
    let transport = Arc::new(FakeTransport::default());
    let (dispatcher, _) = dispatcher_with(transport.clone()).await;

    let outcome = dispatcher
        .send_poll("34600111222", "Lunch?", &["Pizza".to_string()], 1)
        .await
        .expect("no error");
    assert!(outcome.is_none());
    assert!(transport.sent().is_empty());

    let outcome = dispatcher
        .send_poll("34600111222", "Lunch?", &["Pizza".into(), "Sushi".into()], 1)
        .await
        .expect("sent");
    assert!(outcome.is_some());
    assert_eq!(transport.sent()[0].kind(), OutboundKind::Poll);
}

#[tokio::test]
async fn buttons_publish_deprecation_notice_and_still_send() {
    let transport = Arc::new(FakeTransport::default());
    let (dispatcher, mut events) = dispatcher_with(transport.clone()).await;

    dispatcher
        .send_message(
            "34600111222",
            "Pick one",
            SendOptions {
                buttons: vec![Button {
                    id: None,
                    body: "A".into(),
                }],
                ..SendOptions::default()
            },
        )
        .await
        .expect("send");

    let ProviderEvent::Notice { title, instructions } = events.recv().await.expect("notice") else {
        panic!("expected notice");
    };
    assert_eq!(title, "DEPRECATED");
    assert_eq!(instructions.len(), 2);
    assert_eq!(transport.sent()[0].kind(), OutboundKind::Buttons);
}

#[tokio::test]
async fn remote_media_is_downloaded_typed_and_sent_as_image() {
    let base = spawn_media_server().await.expect("media server");
    let scratch = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(FakeTransport::default());
    let (dispatcher, _) = dispatcher_with(transport.clone()).await;
    let dispatcher = dispatcher.with_scratch_dir(scratch.path());

    dispatcher
        .send_message(
            "34600111222",
            "our logo",
            SendOptions {
                media: Some(format!("{base}/files/logo")),
                ..SendOptions::default()
            },
        )
        .await
        .expect("send media");

    let sent = transport.sent();
    let OutboundContent::Image { media, caption } = &sent[0].content else {
        panic!("expected image, got {:?}", sent[0].content);
    };
    assert_eq!(media.mimetype, "image/png");
    assert_eq!(caption.as_deref(), Some("our logo"));
    assert_eq!(
        media.source,
        MediaSource::Inline {
            data_b64: STANDARD.encode(PNG_BYTES)
        }
    );
    let leftovers = std::fs::read_dir(scratch.path()).expect("scratch").count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn remote_audio_without_declared_type_becomes_voice_note() {
    let base = spawn_media_server().await.expect("media server");
    let scratch = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(FakeTransport::default());
    let (dispatcher, _) = dispatcher_with(transport.clone()).await;
    let dispatcher = dispatcher.with_scratch_dir(scratch.path());

    dispatcher
        .send_media("34600111222", &format!("{base}/files/greeting.mp3"), "")
        .await
        .expect("send audio");

    let sent = transport.sent();
    let OutboundContent::Audio { media, ptt } = &sent[0].content else {
        panic!("expected audio, got {:?}", sent[0].content);
    };
    assert!(*ptt);
    assert_eq!(media.mimetype, "audio/mpeg");
}

#[tokio::test]
async fn local_video_honours_gif_playback() {
    let dir = tempfile::tempdir().expect("tempdir");
    let clip = dir.path().join("clip.mp4");
    std::fs::write(&clip, b"mp4").expect("write clip");
    let transport = Arc::new(FakeTransport::default());
    let (dispatcher, _) = dispatcher_with(transport.clone()).await;

    dispatcher
        .send_video("34600111222", &clip, "")
        .await
        .expect("send video");

    let OutboundContent::Video {
        gif_playback,
        caption,
        ..
    } = &transport.sent()[0].content
    else {
        panic!("expected video");
    };
    assert!(*gif_playback);
    assert!(caption.is_none());
    assert!(clip.exists());
}

#[tokio::test]
async fn missing_local_media_is_rejected_before_sending() {
    let transport = Arc::new(FakeTransport::default());
    let (dispatcher, _) = dispatcher_with(transport.clone()).await;
    let err = dispatcher
        .send_media("34600111222", "/nonexistent/photo.jpg", "")
        .await
        .expect_err("missing file");
    assert!(matches!(err, DispatchError::Media(_)));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn stickers_must_already_be_webp() {
    let dir = tempfile::tempdir().expect("tempdir");
    let png = dir.path().join("smile.png");
    std::fs::write(&png, PNG_BYTES).expect("write png");
    let webp = dir.path().join("smile.webp");
    std::fs::write(&webp, b"RIFF\0\0\0\0WEBP").expect("write webp");
    let transport = Arc::new(FakeTransport::default());
    let (dispatcher, _) = dispatcher_with(transport.clone()).await;

    let err = dispatcher
        .send_sticker("34600111222", &png.to_string_lossy(), None, None)
        .await
        .expect_err("png sticker");
    assert!(matches!(err, DispatchError::Media(_)));
    assert!(transport.sent().is_empty());
    assert!(png.exists());

    dispatcher
        .send_sticker("34600111222", &webp.to_string_lossy(), Some("pack"), None)
        .await
        .expect("webp sticker");
    let OutboundContent::Sticker { media, pack, .. } = &transport.sent()[0].content else {
        panic!("expected sticker");
    };
    assert_eq!(media.mimetype, "image/webp");
    assert_eq!(pack.as_deref(), Some("pack"));
}

#[tokio::test]
async fn transport_errors_propagate() {
    let transport = Arc::new(FakeTransport {
        fail_send: Some("socket write failed".into()),
        ..FakeTransport::default()
    });
    let (dispatcher, _) = dispatcher_with(transport).await;
    let err = dispatcher
        .send_location("34600111222", 40.4, -3.7)
        .await
        .expect_err("transport error");
    assert!(matches!(err, DispatchError::Transport(_)));
}

#[test]
fn vcard_escapes_text_and_strips_number() {
    let vcard = build_vcard("Doe, John; Jr", Some("Acme\nSales"), "+34 600-111-222");
    assert_eq!(
        vcard,
        "BEGIN:VCARD\nVERSION:3.0\nFN:Doe\\, John\\; Jr\nORG:Acme\\nSales;\nTEL;type=CELL;type=VOICE;waid=34600111222:+34600111222\nEND:VCARD"
    );
}

#[test]
fn recipients_must_reduce_to_numbers() {
    assert!(matches!(
        recipient_jid("sales team"),
        Err(DispatchError::InvalidRecipient(_))
    ));
    assert_eq!(
        recipient_jid("120363040000000000@g.us").expect("group").as_str(),
        "120363040000000000@g.us"
    );
}
