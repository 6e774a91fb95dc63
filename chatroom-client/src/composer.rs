//! User-input side of [`ChatSession`]: login, draft editing and sending.
//!
//! A send walks through these gates in order:
//! 1. nothing happens while an upload is in flight (the send control is disabled);
//! 2. the spam gate rejects sends closer than [`chatroom_core::SPAM_DELAY`] to
//!    the previous one, whether or not the draft is empty;
//! 3. an empty draft (blank text, no image) is silently ignored;
//! 4. a send on a closed connection is refused with a banner and the draft kept;
//! 5. the image is resolved: an attached file is uploaded first, a bare image
//!    URL is sent as the image, anything else goes out as text.
//!
//! Pasting a clipboard image skips the draft entirely: each image is uploaded
//! and sent on its own, without the spam gate.

use chatroom_core::{
    ClientEvent, MAX_MESSAGE_CHARS, OutgoingMessage, is_image_url, is_within_spam_delay,
    normalize_display_name, truncate_chars,
};
use tracing::{debug, info, warn};

use crate::{
    attachment::{ClipboardItem, PendingImage},
    effect::{Effect, UploadOrigin},
    session::ChatSession,
    state::{LinkState, Session, input_rows_for},
    upload::UploadError,
};

pub const SPAM_REJECTION_MESSAGE: &str = "Please wait before sending the next message";
pub const UPLOAD_FAILED_MESSAGE: &str = "Failed to upload image";
pub const NOT_CONNECTED_MESSAGE: &str = "Not connected to the chat server";

impl ChatSession {
    /// Joins the chat under `name`. Ignored when the trimmed name is empty,
    /// when there is no connection yet, or when already logged in. Refused
    /// with a banner once the connection has closed.
    pub fn submit_login(&mut self, name: &str, now_unix_ms: u64) -> Vec<Effect> {
        if !self.mounted || self.state.is_logged_in() {
            return Vec::new();
        }
        let Some(display_name) = normalize_display_name(name) else {
            debug!("login ignored: empty display name");
            return Vec::new();
        };
        if !self.state.has_connection() {
            debug!("login ignored: no connection");
            return Vec::new();
        }
        if self.link_closed() {
            return self.raise_error(NOT_CONNECTED_MESSAGE, now_unix_ms);
        }

        info!(display_name = %display_name, "joining chat");
        self.state.session = Some(Session {
            display_name: display_name.clone(),
            connected: self.state.link == LinkState::Connected,
        });
        vec![Effect::Emit(ClientEvent::Join(display_name))]
    }

    /// Replaces the draft text, keeping at most [`MAX_MESSAGE_CHARS`] characters.
    pub fn edit_text(&mut self, text: &str) {
        if !self.input_enabled() {
            return;
        }
        let text = truncate_chars(text, MAX_MESSAGE_CHARS);
        self.state.draft.input_rows = input_rows_for(text);
        self.state.draft.text = text.to_owned();
    }

    pub fn select_image(&mut self, image: PendingImage) {
        if !self.input_enabled() {
            return;
        }
        debug!(file_name = image.file_name(), bytes = image.len(), "image selected");
        self.state.draft.pending_image = Some(image);
    }

    pub fn clear_image(&mut self) {
        if !self.input_enabled() {
            return;
        }
        self.state.draft.pending_image = None;
    }

    /// Enter sends; Shift+Enter inserts a line break.
    pub fn press_enter(&mut self, shift: bool, now_unix_ms: u64) -> Vec<Effect> {
        if shift {
            let mut text = self.state.draft.text.clone();
            text.push('\n');
            self.edit_text(&text);
            return Vec::new();
        }
        self.submit_send(now_unix_ms)
    }

    pub fn submit_send(&mut self, now_unix_ms: u64) -> Vec<Effect> {
        if !self.mounted || !self.state.is_logged_in() || self.state.draft.uploading {
            return Vec::new();
        }

        if is_within_spam_delay(now_unix_ms, self.state.draft.last_send_unix_ms) {
            debug!("send rejected by spam gate");
            return self.raise_error(SPAM_REJECTION_MESSAGE, now_unix_ms);
        }

        let trimmed = self.state.draft.text.trim().to_owned();
        if trimmed.is_empty() && self.state.draft.pending_image.is_none() {
            return Vec::new();
        }
        if !self.state.has_connection() {
            return Vec::new();
        }
        if self.link_closed() {
            debug!("send refused: connection closed");
            return self.raise_error(NOT_CONNECTED_MESSAGE, now_unix_ms);
        }

        if let Some(image) = self.state.draft.pending_image.clone() {
            let ticket = self.issue_ticket(UploadOrigin::Draft {
                requested_at_unix_ms: now_unix_ms,
            });
            info!(ticket = ticket.id, bytes = image.len(), "uploading attached image");
            return vec![Effect::Upload { ticket, image }];
        }

        let payload = if is_image_url(&trimmed) {
            OutgoingMessage::image(trimmed)
        } else {
            OutgoingMessage::text(self.state.draft.text.clone())
        };
        self.reset_draft(now_unix_ms);
        vec![Effect::Emit(ClientEvent::ChatMessage(payload))]
    }

    /// Handles a clipboard paste into the composer.
    ///
    /// Image items are uploaded one after another and each is sent as its own
    /// message. Without image items the text is appended to the draft.
    pub fn paste(&mut self, items: Vec<ClipboardItem>, now_unix_ms: u64) -> Vec<Effect> {
        if !self.input_enabled() {
            return Vec::new();
        }

        let (images, texts): (Vec<_>, Vec<_>) = items.into_iter().partition(ClipboardItem::is_image);
        if images.is_empty() {
            let mut text = self.state.draft.text.clone();
            for item in texts {
                if let ClipboardItem::Text(pasted) = item {
                    text.push_str(&pasted);
                }
            }
            self.edit_text(&text);
            return Vec::new();
        }

        if !self.state.has_connection() {
            return Vec::new();
        }
        if self.link_closed() {
            debug!("paste refused: connection closed");
            return self.raise_error(NOT_CONNECTED_MESSAGE, now_unix_ms);
        }

        self.paste_queue
            .extend(images.into_iter().filter_map(|item| match item {
                ClipboardItem::Image(image) => Some(image),
                ClipboardItem::Text(_) => None,
            }));
        self.start_next_paste_upload()
    }

    /// Completes the upload identified by `ticket_id`.
    ///
    /// Results for unknown tickets, and any result arriving after unmount,
    /// are dropped without touching state.
    pub fn upload_finished(
        &mut self,
        ticket_id: u64,
        result: Result<String, UploadError>,
        now_unix_ms: u64,
    ) -> Vec<Effect> {
        if !self.mounted {
            debug!(ticket = ticket_id, "upload result discarded after unmount");
            return Vec::new();
        }
        let Some(ticket) = self.in_flight.filter(|ticket| ticket.id == ticket_id) else {
            warn!(ticket = ticket_id, "upload result for unknown ticket");
            return Vec::new();
        };
        self.in_flight = None;
        self.state.draft.uploading = false;

        let mut effects = Vec::new();
        match (ticket.origin, result) {
            (_, Ok(_)) if self.link_closed() => {
                warn!(ticket = ticket.id, "image uploaded but connection closed; not sent");
                self.paste_queue.clear();
                effects.extend(self.raise_error(NOT_CONNECTED_MESSAGE, now_unix_ms));
            }
            (UploadOrigin::Draft { requested_at_unix_ms }, Ok(url)) => {
                info!(ticket = ticket.id, url = %url, "image uploaded");
                effects.push(Effect::Emit(ClientEvent::ChatMessage(OutgoingMessage::image(
                    url,
                ))));
                self.reset_draft(requested_at_unix_ms);
            }
            (UploadOrigin::Paste, Ok(url)) => {
                info!(ticket = ticket.id, url = %url, "pasted image uploaded");
                effects.push(Effect::Emit(ClientEvent::ChatMessage(OutgoingMessage::image(
                    url,
                ))));
            }
            (_, Err(err)) => {
                warn!(ticket = ticket.id, "image upload failed: {}", err);
                effects.extend(self.raise_error(UPLOAD_FAILED_MESSAGE, now_unix_ms));
            }
        }

        if ticket.origin == UploadOrigin::Paste {
            effects.extend(self.start_next_paste_upload());
        }
        effects
    }

    fn link_closed(&self) -> bool {
        self.state.link == LinkState::Closed
    }

    fn input_enabled(&self) -> bool {
        self.mounted && !self.state.draft.uploading
    }

    fn start_next_paste_upload(&mut self) -> Vec<Effect> {
        let Some(image) = self.paste_queue.pop_front() else {
            return Vec::new();
        };
        let ticket = self.issue_ticket(UploadOrigin::Paste);
        info!(ticket = ticket.id, bytes = image.len(), "uploading pasted image");
        vec![Effect::Upload { ticket, image }]
    }

    fn reset_draft(&mut self, sent_at_unix_ms: u64) {
        let draft = &mut self.state.draft;
        draft.text.clear();
        draft.pending_image = None;
        draft.input_rows = 1;
        draft.last_send_unix_ms = Some(sent_at_unix_ms);
        draft.uploading = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LinkState;

    fn logged_in() -> ChatSession {
        let mut session = ChatSession::new();
        session.link_changed(LinkState::Connected);
        session.submit_login("alice", 0);
        session
    }

    #[test]
    fn login_emits_trimmed_join_once() {
        let mut session = ChatSession::new();
        session.link_changed(LinkState::Connecting);
        let effects = session.submit_login("  alice  ", 0);
        assert_eq!(
            effects,
            vec![Effect::Emit(ClientEvent::Join("alice".to_owned()))]
        );
        assert!(session.submit_login("bob", 0).is_empty());
        assert_eq!(session.state().display_name(), Some("alice"));
    }

    #[test]
    fn login_without_connection_or_name_is_ignored() {
        let mut session = ChatSession::new();
        assert!(session.submit_login("alice", 0).is_empty());
        session.link_changed(LinkState::Connecting);
        assert!(session.submit_login("   ", 0).is_empty());
        assert!(!session.state().is_logged_in());
    }

    #[test]
    fn edit_text_caps_length() {
        let mut session = logged_in();
        session.edit_text(&"x".repeat(MAX_MESSAGE_CHARS + 50));
        assert_eq!(session.state().draft.text.chars().count(), MAX_MESSAGE_CHARS);
    }

    #[test]
    fn shift_enter_inserts_newline() {
        let mut session = logged_in();
        session.edit_text("line one");
        assert!(session.press_enter(true, 10_000).is_empty());
        assert_eq!(session.state().draft.text, "line one\n");
        assert_eq!(session.state().draft.input_rows, 2);
    }

    #[test]
    fn text_is_sent_untrimmed() {
        let mut session = logged_in();
        session.edit_text("  hi there ");
        let effects = session.press_enter(false, 10_000);
        assert_eq!(
            effects,
            vec![Effect::Emit(ClientEvent::ChatMessage(OutgoingMessage::text(
                "  hi there "
            )))]
        );
        assert_eq!(session.state().draft.input_rows, 1);
    }

    #[test]
    fn closed_link_refuses_send_and_keeps_draft() {
        let mut session = logged_in();
        session.link_changed(LinkState::Closed);
        session.edit_text("are you there?");

        let effects = session.submit_send(10_000);
        assert_eq!(effects, vec![Effect::ClearBannerAfter(chatroom_core::ERROR_DISPLAY)]);
        let state = session.state();
        assert_eq!(state.draft.text, "are you there?");
        assert_eq!(state.draft.last_send_unix_ms, None);
        assert_eq!(
            state.banner.as_ref().map(|b| b.message.as_str()),
            Some(NOT_CONNECTED_MESSAGE)
        );
    }

    #[test]
    fn login_after_close_is_refused() {
        let mut session = ChatSession::new();
        session.link_changed(LinkState::Closed);
        let effects = session.submit_login("alice", 0);
        assert!(!effects.iter().any(|effect| matches!(effect, Effect::Emit(_))));
        assert!(!session.state().is_logged_in());
    }

    #[test]
    fn unknown_ticket_is_ignored() {
        let mut session = logged_in();
        assert!(
            session
                .upload_finished(99, Ok("https://img/x.png".to_owned()), 1)
                .is_empty()
        );
    }
}
