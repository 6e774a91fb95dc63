//! The chat client state machine.
//!
//! [`ChatSession`] owns the [`ChatState`] and is driven by three kinds of
//! input: user actions (see [`crate::composer`]), server events (see
//! [`crate::reconciler`]) and completions of effects it asked for earlier
//! (uploads, banner timers). Every operation returns the [`Effect`]s the
//! runtime must carry out; the session itself never touches the network.
//!
//! After [`ChatSession::unmount`] every operation is a no-op, so late upload
//! results or timers cannot change state that no view is showing anymore.

use std::collections::VecDeque;

use chatroom_core::ERROR_DISPLAY;
use tracing::debug;

use crate::{
    attachment::PendingImage,
    effect::{Effect, UploadOrigin, UploadTicket},
    state::{ChatState, LinkState, TransientError},
};

#[derive(Debug)]
pub struct ChatSession {
    pub(crate) state: ChatState,
    pub(crate) mounted: bool,
    pub(crate) in_flight: Option<UploadTicket>,
    pub(crate) paste_queue: VecDeque<PendingImage>,
    next_ticket: u64,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            state: ChatState::default(),
            mounted: true,
            in_flight: None,
            paste_queue: VecDeque::new(),
            next_ticket: 1,
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn link_changed(&mut self, link: LinkState) {
        if !self.mounted {
            return;
        }
        self.state.link = link;
        if let Some(session) = self.state.session.as_mut() {
            session.connected = link == LinkState::Connected;
        }
    }

    /// Shows `message` in the banner and asks for it to be cleared later.
    pub fn raise_error(&mut self, message: impl Into<String>, now_unix_ms: u64) -> Vec<Effect> {
        if !self.mounted {
            return Vec::new();
        }
        self.state.banner = Some(TransientError::new(message, now_unix_ms));
        vec![Effect::ClearBannerAfter(ERROR_DISPLAY)]
    }

    /// A banner timer fired. Clears whatever banner is showing.
    pub fn expire_banner(&mut self) {
        if !self.mounted {
            return;
        }
        self.state.banner = None;
    }

    /// Returns and resets the pending scroll-to-bottom request.
    pub fn take_scroll_request(&mut self) -> bool {
        if !self.mounted {
            return false;
        }
        std::mem::take(&mut self.state.scroll_to_bottom)
    }

    pub fn unmount(&mut self) {
        if self.mounted {
            debug!(
                upload_in_flight = self.in_flight.is_some(),
                queued_pastes = self.paste_queue.len(),
                "session unmounted"
            );
        }
        self.mounted = false;
    }

    pub(crate) fn issue_ticket(&mut self, origin: UploadOrigin) -> UploadTicket {
        let ticket = UploadTicket {
            id: self.next_ticket,
            origin,
        };
        self.next_ticket = self.next_ticket.saturating_add(1);
        self.in_flight = Some(ticket);
        self.state.draft.uploading = true;
        ticket
    }
}
