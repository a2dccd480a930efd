//! Tests for `bridge::outbound` per-sink translation.

use std::sync::Arc;

use serde_json::Value;

use mmbridge::bridge::{AvatarCache, BridgeError, OutboundSettings, OutboundTranslator, Sink};
use mmbridge::mattermost::MattermostApi;
use mmbridge::types::{CanonicalMessage, EventKind, Extra, FileAttachment, OversizeFile};
use mmbridge::webhook::WebhookSink;

use crate::support::{Call, FakeApi, FakeHook};

fn session_translator(api: FakeApi, settings: OutboundSettings) -> (OutboundTranslator, Arc<FakeApi>, Arc<AvatarCache>) {
    let api = Arc::new(api);
    let avatars = Arc::new(AvatarCache::new());
    let sink: Arc<dyn MattermostApi> = api.clone();
    let translator = OutboundTranslator::new(Sink::Session(sink), Arc::clone(&avatars), settings);
    (translator, api, avatars)
}

fn webhook_translator(settings: OutboundSettings) -> (OutboundTranslator, Arc<FakeHook>) {
    let hook = Arc::new(FakeHook::default());
    let sink: Arc<dyn WebhookSink> = hook.clone();
    let translator = OutboundTranslator::new(Sink::Webhook(sink), Arc::new(AvatarCache::new()), settings);
    (translator, hook)
}

fn message(text: &str) -> CanonicalMessage {
    CanonicalMessage::new("town-square", "bob", "irc-bob", text)
}

fn file(name: &str, comment: Option<&str>) -> Extra {
    Extra::File(FileAttachment {
        name: name.to_string(),
        data: b"payload".to_vec(),
        size: 7,
        url: Some(format!("https://media.example.com/{name}")),
        comment: comment.map(str::to_string),
        content_hash: None,
        is_avatar: false,
    })
}

#[tokio::test]
async fn session_with_id_edits_instead_of_posting() {
    let (translator, api, _) = session_translator(FakeApi::new(), OutboundSettings::default());
    let mut msg = message("corrected");
    msg.id = "p1".to_string();

    let id = translator.send(msg).await.expect("send");
    assert_eq!(id, "p1");
    assert_eq!(
        api.calls(),
        vec![Call::Edit {
            post_id: "p1".to_string(),
            text: "corrected".to_string()
        }]
    );
}

#[tokio::test]
async fn session_without_id_resolves_channel_and_posts() {
    let (translator, api, _) = session_translator(FakeApi::new(), OutboundSettings::default());
    let id = translator.send(message("hello")).await.expect("send");
    assert_eq!(id, "post-1");
    assert_eq!(
        api.calls(),
        vec![Call::Post {
            channel_id: "ch-1".to_string(),
            text: "hello".to_string()
        }]
    );
}

#[tokio::test]
async fn session_post_to_unknown_channel_fails() {
    let (translator, _, _) = session_translator(FakeApi::new(), OutboundSettings::default());
    let mut msg = message("hello");
    msg.channel = "no-such-channel".to_string();
    assert!(matches!(translator.send(msg).await, Err(BridgeError::Api(_))));
}

#[tokio::test]
async fn webhook_with_id_posts_as_new_message() {
    let (translator, hook) = webhook_translator(OutboundSettings::default());
    let mut msg = message("corrected");
    msg.id = "p1".to_string();

    let id = translator.send(msg).await.expect("send");
    assert!(id.is_empty());
    let payloads = hook.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].text, "corrected");
    assert_eq!(payloads[0].channel, "town-square");
    assert_eq!(payloads[0].username, "bob");
}

#[tokio::test]
async fn webhook_delete_is_a_successful_no_op() {
    let (translator, hook) = webhook_translator(OutboundSettings::default());
    let id = translator
        .send(CanonicalMessage::delete("town-square", "p1"))
        .await
        .expect("send");
    assert!(id.is_empty());
    assert!(hook.payloads().is_empty());
}

#[tokio::test]
async fn webhook_payload_carries_bridge_marker_and_icon() {
    let (translator, hook) = webhook_translator(OutboundSettings {
        icon_url: Some("https://example.com/default.png".to_string()),
        ..Default::default()
    });

    translator.send(message("no avatar")).await.expect("send");
    let mut with_avatar = message("with avatar");
    with_avatar.avatar = Some("https://media.example.com/abc/irc-bob.png".to_string());
    translator.send(with_avatar).await.expect("send");

    let payloads = hook.payloads();
    assert_eq!(payloads[0].props.get("matterbridge"), Some(&Value::Bool(true)));
    assert_eq!(
        payloads[0].icon_url.as_deref(),
        Some("https://example.com/default.png")
    );
    assert_eq!(
        payloads[1].icon_url.as_deref(),
        Some("https://media.example.com/abc/irc-bob.png")
    );
}

#[tokio::test]
async fn webhook_flattens_files_to_urls() {
    let (translator, hook) = webhook_translator(OutboundSettings::default());
    let mut msg = message("look");
    msg.extra.push(file("cat.png", Some("look")));

    translator.send(msg).await.expect("send");
    assert_eq!(
        hook.payloads()[0].text,
        "look https://media.example.com/cat.png"
    );
}

#[tokio::test]
async fn empty_webhook_message_is_not_posted() {
    let (translator, hook) = webhook_translator(OutboundSettings::default());
    translator.send(message("")).await.expect("send");
    assert!(hook.payloads().is_empty());
}

#[tokio::test]
async fn session_delete_requires_id() {
    let (translator, api, _) = session_translator(FakeApi::new(), OutboundSettings::default());

    let id = translator
        .send(CanonicalMessage::delete("town-square", ""))
        .await
        .expect("send");
    assert!(id.is_empty());
    assert!(api.calls().is_empty());

    let id = translator
        .send(CanonicalMessage::delete("town-square", "p1"))
        .await
        .expect("send");
    assert_eq!(id, "p1");
    assert_eq!(
        api.calls(),
        vec![Call::Delete {
            post_id: "p1".to_string()
        }]
    );
}

#[tokio::test]
async fn upload_precedes_caption_post() {
    let (translator, api, _) = session_translator(FakeApi::new(), OutboundSettings::default());
    let mut msg = message("look at this");
    msg.extra.push(file("cat.png", Some("look at this")));

    let id = translator.send(msg).await.expect("send");
    assert_eq!(id, "post-2");
    assert_eq!(
        api.calls(),
        vec![
            Call::Upload {
                channel_id: "ch-1".to_string(),
                name: "cat.png".to_string()
            },
            Call::PostWithFiles {
                channel_id: "ch-1".to_string(),
                text: "look at this".to_string(),
                file_ids: vec!["file-cat.png".to_string()]
            },
        ]
    );
}

#[tokio::test]
async fn upload_failure_aborts_without_posting() {
    let (translator, api, _) =
        session_translator(FakeApi::new().failing_uploads(), OutboundSettings::default());
    let mut msg = message("look at this");
    msg.extra.push(file("cat.png", Some("look at this")));

    assert!(matches!(translator.send(msg).await, Err(BridgeError::Api(_))));
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn avatar_confirmation_posts_nothing() {
    let (translator, api, avatars) =
        session_translator(FakeApi::new(), OutboundSettings::default());
    let mut msg = CanonicalMessage::new("town-square", "system", "u-alice", "avatar");
    msg.kind = EventKind::AvatarDownload;
    msg.extra.push(Extra::File(FileAttachment {
        name: "u-alice.png".to_string(),
        data: vec![1, 2, 3],
        size: 3,
        url: Some("https://media.example.com/abc/u-alice.png".to_string()),
        comment: None,
        content_hash: Some("abc".to_string()),
        is_avatar: true,
    }));

    assert_eq!(translator.send(msg.clone()).await.expect("send"), "");
    assert_eq!(translator.send(msg).await.expect("send"), "");
    assert_eq!(avatars.get("u-alice").as_deref(), Some("abc"));
    assert_eq!(avatars.len(), 1);
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn avatar_without_hash_is_not_cached() {
    let (translator, _, avatars) = session_translator(FakeApi::new(), OutboundSettings::default());
    let mut msg = CanonicalMessage::new("town-square", "system", "u-alice", "avatar");
    msg.kind = EventKind::AvatarDownload;
    translator.send(msg).await.expect("send");
    assert!(avatars.should_fetch("u-alice"));
}

#[tokio::test]
async fn user_action_is_wrapped_and_nick_prefixed() {
    let (translator, api, _) = session_translator(
        FakeApi::new(),
        OutboundSettings {
            prefix_messages_with_nick: true,
            ..Default::default()
        },
    );
    let mut msg = message("waves");
    msg.kind = EventKind::UserAction;
    msg.username = "[irc] bob: ".to_string();

    translator.send(msg).await.expect("send");
    assert_eq!(
        api.calls(),
        vec![Call::Post {
            channel_id: "ch-1".to_string(),
            text: "[irc] bob: *waves*".to_string()
        }]
    );
}

#[tokio::test]
async fn oversize_notice_posted_before_message() {
    let (translator, api, _) = session_translator(
        FakeApi::new(),
        OutboundSettings {
            media_download_size: 10,
            ..Default::default()
        },
    );
    let mut msg = message("");
    msg.kind = EventKind::FileTooLarge;
    msg.extra.push(Extra::FileTooLarge(OversizeFile {
        name: "big.bin".to_string(),
        size: 11,
        comment: "too big".to_string(),
    }));

    translator.send(msg).await.expect("send");
    assert_eq!(
        api.calls(),
        vec![Call::Post {
            channel_id: "ch-1".to_string(),
            text: "<system> file big.bin too big to download (11 > allowed size: 10)".to_string()
        }]
    );
}

#[tokio::test]
async fn oversize_notice_over_webhook_uses_system_name() {
    let (translator, hook) = webhook_translator(OutboundSettings {
        media_download_size: 10,
        ..Default::default()
    });
    let mut msg = message("");
    msg.extra.push(Extra::FileTooLarge(OversizeFile {
        name: "big.bin".to_string(),
        size: 11,
        comment: String::new(),
    }));

    translator.send(msg).await.expect("send");
    let payloads = hook.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].username, "system");
    assert_eq!(
        payloads[0].text,
        "file big.bin too big to download (11 > allowed size: 10)"
    );
}

fn oversize_only(name: &str, size: u64) -> CanonicalMessage {
    let mut msg = message("");
    msg.username = "<bob> ".to_string();
    msg.kind = EventKind::FileTooLarge;
    msg.extra.push(Extra::FileTooLarge(OversizeFile {
        name: name.to_string(),
        size,
        comment: String::new(),
    }));
    msg
}

#[tokio::test]
async fn nick_prefix_does_not_post_empty_text_over_webhook() {
    let (translator, hook) = webhook_translator(OutboundSettings {
        prefix_messages_with_nick: true,
        media_download_size: 10,
        ..Default::default()
    });

    translator.send(oversize_only("big.bin", 11)).await.expect("send");
    let texts: Vec<String> = hook.payloads().into_iter().map(|p| p.text).collect();
    assert_eq!(
        texts,
        vec!["file big.bin too big to download (11 > allowed size: 10)".to_string()]
    );
}

#[tokio::test]
async fn nick_prefix_does_not_post_empty_text_over_session() {
    let (translator, api, _) = session_translator(
        FakeApi::new(),
        OutboundSettings {
            prefix_messages_with_nick: true,
            media_download_size: 10,
            ..Default::default()
        },
    );

    translator.send(oversize_only("big.bin", 11)).await.expect("send");
    assert_eq!(
        api.calls(),
        vec![Call::Post {
            channel_id: "ch-1".to_string(),
            text: "<system> file big.bin too big to download (11 > allowed size: 10)".to_string()
        }]
    );
}

#[tokio::test]
async fn receive_only_plan_cannot_send() {
    let translator = OutboundTranslator::new(
        Sink::None,
        Arc::new(AvatarCache::new()),
        OutboundSettings::default(),
    );
    assert!(matches!(
        translator.send(message("hello")).await,
        Err(BridgeError::ReceiveOnly)
    ));
}
