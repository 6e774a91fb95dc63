use std::borrow::Cow;

use chatroom_client::{
    ChatSession,
    attachment::{ClipboardItem, PendingImage, encode_rgba_png},
    composer::{NOT_CONNECTED_MESSAGE, SPAM_REJECTION_MESSAGE, UPLOAD_FAILED_MESSAGE},
    effect::{Effect, UploadOrigin},
    state::{ChatMessage, LinkState, RosterEntry},
    upload::UploadError,
};
use chatroom_core::{
    ClientEvent, ERROR_DISPLAY, IncomingMessage, OutgoingMessage, ServerEvent, UserEntry,
};

const T0: u64 = 1_700_000_000_000;

fn logged_in(name: &str) -> ChatSession {
    let mut session = ChatSession::new();
    session.link_changed(LinkState::Connected);
    let effects = session.submit_login(name, T0 - 60_000);
    assert_eq!(effects.len(), 1);
    session
}

fn png(name: &str) -> PendingImage {
    let bytes = encode_rgba_png(1, 1, Cow::Borrowed(&[10, 20, 30, 255])).expect("encode png");
    PendingImage::from_bytes(name, bytes).expect("png is an image")
}

fn emitted(effects: &[Effect]) -> Vec<&OutgoingMessage> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Emit(ClientEvent::ChatMessage(message)) => Some(message),
            _ => None,
        })
        .collect()
}

fn upload_ticket(effects: &[Effect]) -> (u64, UploadOrigin) {
    effects
        .iter()
        .find_map(|effect| match effect {
            Effect::Upload { ticket, .. } => Some((ticket.id, ticket.origin)),
            _ => None,
        })
        .expect("an upload was requested")
}

fn banner(session: &ChatSession) -> Option<&str> {
    session
        .state()
        .banner
        .as_ref()
        .map(|banner| banner.message.as_str())
}

fn message(user: &str, text: &str, timestamp: u64) -> ServerEvent {
    ServerEvent::Message(IncomingMessage {
        user: user.to_owned(),
        text: text.to_owned(),
        image: None,
        timestamp,
    })
}

#[test]
fn plain_text_is_sent_as_text_without_image() {
    let mut session = logged_in("alice");
    session.edit_text("hello");
    let effects = session.submit_send(T0);
    assert_eq!(emitted(&effects), vec![&OutgoingMessage::text("hello")]);
    assert_eq!(session.state().draft.text, "");
    assert_eq!(session.state().draft.last_send_unix_ms, Some(T0));
}

#[test]
fn image_url_text_is_sent_as_image() {
    let mut session = logged_in("alice");
    session.edit_text("  http://x.com/a.png ");
    let effects = session.submit_send(T0);
    assert_eq!(
        emitted(&effects),
        vec![&OutgoingMessage::image("http://x.com/a.png")]
    );
}

#[test]
fn non_image_url_is_sent_as_text() {
    let mut session = logged_in("alice");
    session.edit_text("https://x.com/page.html");
    let effects = session.submit_send(T0);
    assert_eq!(
        emitted(&effects),
        vec![&OutgoingMessage::text("https://x.com/page.html")]
    );
}

#[test]
fn second_send_within_a_second_is_throttled() {
    let mut session = logged_in("alice");
    session.edit_text("one");
    assert_eq!(emitted(&session.submit_send(T0)).len(), 1);

    session.edit_text("two");
    let effects = session.submit_send(T0 + 999);
    assert!(emitted(&effects).is_empty());
    assert_eq!(effects, vec![Effect::ClearBannerAfter(ERROR_DISPLAY)]);
    assert_eq!(banner(&session), Some(SPAM_REJECTION_MESSAGE));
    assert_eq!(session.state().draft.text, "two");

    let effects = session.submit_send(T0 + 1000);
    assert_eq!(emitted(&effects), vec![&OutgoingMessage::text("two")]);
}

#[test]
fn spam_gate_applies_before_emptiness_check() {
    let mut session = logged_in("alice");
    session.edit_text("one");
    session.submit_send(T0);

    let effects = session.submit_send(T0 + 10);
    assert_eq!(effects, vec![Effect::ClearBannerAfter(ERROR_DISPLAY)]);
    assert_eq!(banner(&session), Some(SPAM_REJECTION_MESSAGE));
}

#[test]
fn blank_draft_is_ignored_silently() {
    let mut session = logged_in("alice");
    session.edit_text("   \n ");
    assert!(session.submit_send(T0).is_empty());
    assert!(session.state().banner.is_none());
    assert_eq!(session.state().draft.last_send_unix_ms, None);
}

#[test]
fn sends_before_login_do_nothing() {
    let mut session = ChatSession::new();
    session.link_changed(LinkState::Connected);
    session.edit_text("hello");
    assert!(session.submit_send(T0).is_empty());
}

#[test]
fn attached_image_is_uploaded_then_sent_alone() {
    let mut session = logged_in("alice");
    session.edit_text("caption is dropped");
    session.select_image(png("cat.png"));

    let effects = session.submit_send(T0);
    assert!(emitted(&effects).is_empty());
    let (ticket, origin) = upload_ticket(&effects);
    assert_eq!(
        origin,
        UploadOrigin::Draft {
            requested_at_unix_ms: T0
        }
    );
    assert!(session.state().draft.uploading);

    // Input is frozen while the upload runs.
    session.edit_text("ignored");
    assert!(session.submit_send(T0 + 5_000).is_empty());

    let effects = session.upload_finished(ticket, Ok("https://i.host/cat.png".to_owned()), T0 + 400);
    assert_eq!(
        emitted(&effects),
        vec![&OutgoingMessage::image("https://i.host/cat.png")]
    );
    let draft = &session.state().draft;
    assert!(!draft.uploading);
    assert!(draft.pending_image.is_none());
    assert_eq!(draft.text, "");
    assert_eq!(draft.last_send_unix_ms, Some(T0));
}

#[test]
fn failed_upload_keeps_draft_and_emits_nothing() {
    let mut session = logged_in("alice");
    session.select_image(png("cat.png"));
    let (ticket, _) = upload_ticket(&session.submit_send(T0));

    let effects = session.upload_finished(ticket, Err(UploadError::Rejected), T0 + 100);
    assert!(emitted(&effects).is_empty());
    assert_eq!(effects, vec![Effect::ClearBannerAfter(ERROR_DISPLAY)]);
    assert_eq!(banner(&session), Some(UPLOAD_FAILED_MESSAGE));

    let draft = &session.state().draft;
    assert!(!draft.uploading);
    assert!(draft.pending_image.is_some());
    assert_eq!(draft.last_send_unix_ms, None);
}

#[test]
fn pasted_image_bypasses_draft_and_throttle() {
    let mut session = logged_in("alice");
    session.edit_text("first");
    session.submit_send(T0);
    session.edit_text("draft stays");

    let effects = session.paste(vec![ClipboardItem::Image(png("clipboard.png"))], T0 + 10);
    let (ticket, origin) = upload_ticket(&effects);
    assert_eq!(origin, UploadOrigin::Paste);

    let effects = session.upload_finished(ticket, Ok("https://i.host/p.png".to_owned()), T0 + 50);
    let sent = emitted(&effects);
    assert_eq!(sent, vec![&OutgoingMessage::image("https://i.host/p.png")]);
    assert_eq!(sent[0].text, "");

    assert_eq!(session.state().draft.text, "draft stays");
    assert_eq!(session.state().draft.last_send_unix_ms, Some(T0));
    assert!(session.state().banner.is_none());
}

#[test]
fn multiple_pasted_images_upload_in_order() {
    let mut session = logged_in("alice");
    let effects = session.paste(vec![
        ClipboardItem::Image(png("one.png")),
        ClipboardItem::Text("ignored text".to_owned()),
        ClipboardItem::Image(png("two.png")),
    ], T0);
    let (first, _) = upload_ticket(&effects);
    let Some(Effect::Upload { image, .. }) = effects.first() else {
        panic!("expected upload");
    };
    assert_eq!(image.file_name(), "one.png");

    let effects = session.upload_finished(first, Ok("https://i/1.png".to_owned()), T0);
    assert_eq!(emitted(&effects), vec![&OutgoingMessage::image("https://i/1.png")]);
    let (second, _) = upload_ticket(&effects);
    assert_ne!(first, second);

    let effects = session.upload_finished(second, Ok("https://i/2.png".to_owned()), T0);
    assert_eq!(emitted(&effects), vec![&OutgoingMessage::image("https://i/2.png")]);
    assert!(!session.state().draft.uploading);
    assert!(session.state().draft.text.is_empty());
}

#[test]
fn text_only_paste_appends_to_draft() {
    let mut session = logged_in("alice");
    session.edit_text("hello ");
    let effects = session.paste(vec![ClipboardItem::Text("world".to_owned())], T0);
    assert!(effects.is_empty());
    assert_eq!(session.state().draft.text, "hello world");
}

#[test]
fn user_list_replaces_roster() {
    let mut session = logged_in("alice");
    session.apply_server_event(
        ServerEvent::UserList(vec![
            UserEntry {
                id: "a".to_owned(),
                name: "alice".to_owned(),
            },
            UserEntry {
                id: "b".to_owned(),
                name: "bob".to_owned(),
            },
        ]),
        T0,
    );
    session.apply_server_event(
        ServerEvent::UserList(vec![UserEntry {
            id: "c".to_owned(),
            name: "carol".to_owned(),
        }]),
        T0,
    );
    assert_eq!(
        session.state().roster,
        vec![RosterEntry {
            id: "c".to_owned(),
            display_name: "carol".to_owned(),
        }]
    );
}

#[test]
fn message_log_keeps_arrival_order() {
    let mut session = logged_in("alice");
    let events = [
        message("bob", "first", 30),
        message("carol", "second", 10),
        message("bob", "third", 20),
    ];
    for event in events.iter().cloned() {
        session.apply_server_event(event, T0);
    }
    let texts: Vec<_> = session
        .state()
        .messages
        .iter()
        .map(|message| message.text.as_str())
        .collect();
    assert_eq!(texts, vec!["first", "second", "third"]);
    assert_eq!(
        session.state().messages[1],
        ChatMessage {
            author: "carol".to_owned(),
            text: "second".to_owned(),
            image_url: None,
            timestamp_unix_ms: 10,
        }
    );
}

#[test]
fn server_errors_share_one_banner() {
    let mut session = logged_in("alice");
    let first = session.apply_server_event(ServerEvent::Error("first".to_owned()), T0);
    let second = session.apply_server_event(ServerEvent::Error("second".to_owned()), T0 + 10);
    assert_eq!(first, vec![Effect::ClearBannerAfter(ERROR_DISPLAY)]);
    assert_eq!(second, vec![Effect::ClearBannerAfter(ERROR_DISPLAY)]);
    assert_eq!(banner(&session), Some("second"));
    let shown = session.state().banner.as_ref().expect("banner visible");
    assert_eq!(shown.expires_at_unix_ms, T0 + 10 + 3_000);

    // The first error's timer clears whatever is showing.
    session.expire_banner();
    assert_eq!(banner(&session), None);
}

#[test]
fn unmount_during_upload_discards_result() {
    let mut session = logged_in("alice");
    session.select_image(png("cat.png"));
    let (ticket, _) = upload_ticket(&session.submit_send(T0));
    let before = session.state().clone();

    session.unmount();
    let effects = session.upload_finished(ticket, Ok("https://i/late.png".to_owned()), T0 + 10);
    assert!(effects.is_empty());
    assert!(session.apply_server_event(ServerEvent::Error("late".to_owned()), T0).is_empty());
    session.expire_banner();
    assert_eq!(session.state(), &before);
}

#[test]
fn display_name_is_fixed_after_login() {
    let mut session = logged_in("  alice ");
    assert!(session.submit_login("mallory", T0).is_empty());
    assert_eq!(session.state().display_name(), Some("alice"));
}

#[test]
fn accepted_sends_populate_exactly_one_field() {
    let mut session = logged_in("alice");
    let mut now = T0;
    for text in ["hi", "https://a.b/c.GIF", "not an image: x.png", "ftp://a.b/c.png"] {
        session.edit_text(text);
        let effects = session.submit_send(now);
        let sent = emitted(&effects);
        assert_eq!(sent.len(), 1, "send of {text:?} was not accepted");
        let has_text = !sent[0].text.is_empty();
        let has_image = sent[0].image.as_deref().is_some_and(|url| !url.is_empty());
        assert!(has_text ^ has_image, "payload for {text:?}: {:?}", sent[0]);
        now += 1_000;
    }
}

#[test]
fn send_after_link_closes_keeps_draft_and_shows_banner() {
    let mut session = logged_in("alice");
    session.link_changed(LinkState::Closed);
    session.edit_text("are you there?");

    let effects = session.submit_send(T0);
    assert!(emitted(&effects).is_empty());
    assert_eq!(effects, vec![Effect::ClearBannerAfter(ERROR_DISPLAY)]);
    assert_eq!(banner(&session), Some(NOT_CONNECTED_MESSAGE));
    assert_eq!(session.state().draft.text, "are you there?");
    assert_eq!(session.state().draft.last_send_unix_ms, None);
}

#[test]
fn paste_after_link_closes_uploads_nothing() {
    let mut session = logged_in("alice");
    session.link_changed(LinkState::Closed);

    let effects = session.paste(vec![ClipboardItem::Image(png("clipboard.png"))], T0);
    assert_eq!(effects, vec![Effect::ClearBannerAfter(ERROR_DISPLAY)]);
    assert!(!session.state().draft.uploading);
    assert_eq!(banner(&session), Some(NOT_CONNECTED_MESSAGE));
}

#[test]
fn upload_finishing_after_link_closes_keeps_draft() {
    let mut session = logged_in("alice");
    session.select_image(png("cat.png"));
    let (ticket, _) = upload_ticket(&session.submit_send(T0));

    session.link_changed(LinkState::Closed);
    let effects = session.upload_finished(ticket, Ok("https://i/cat.png".to_owned()), T0 + 100);
    assert!(emitted(&effects).is_empty());
    assert_eq!(banner(&session), Some(NOT_CONNECTED_MESSAGE));

    let draft = &session.state().draft;
    assert!(!draft.uploading);
    assert!(draft.pending_image.is_some());
    assert_eq!(draft.last_send_unix_ms, None);
}
