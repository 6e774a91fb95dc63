//! Observable chat state.
//!
//! [`ChatState`] is everything a front end needs to draw the login form, the
//! roster, the message feed and the composer. It is owned by
//! [`crate::ChatSession`] and only changes through the session's operations;
//! rendering is a projection of it (see [`crate::view`]).

use chatroom_core::{ERROR_DISPLAY, IncomingMessage, UserEntry};

use crate::{attachment::PendingImage, connection::ConnectionStatus};

/// Upper bound for the auto-grown composer height.
pub const MAX_INPUT_ROWS: u16 = 10;

/// The logged-in user. The display name never changes once set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub display_name: String,
    pub connected: bool,
}

/// A message as received from the server. Never mutated after arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub author: String,
    pub text: String,
    pub image_url: Option<String>,
    pub timestamp_unix_ms: u64,
}

impl From<IncomingMessage> for ChatMessage {
    fn from(message: IncomingMessage) -> Self {
        Self {
            author: message.user,
            text: message.text,
            image_url: message.image.filter(|url| !url.is_empty()),
            timestamp_unix_ms: message.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: String,
    pub display_name: String,
}

impl From<UserEntry> for RosterEntry {
    fn from(entry: UserEntry) -> Self {
        Self {
            id: entry.id,
            display_name: entry.name,
        }
    }
}

/// Unsent composer input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposerDraft {
    pub text: String,
    pub pending_image: Option<PendingImage>,
    pub uploading: bool,
    /// `None` until the first accepted send.
    pub last_send_unix_ms: Option<u64>,
    pub input_rows: u16,
}

impl Default for ComposerDraft {
    fn default() -> Self {
        Self {
            text: String::new(),
            pending_image: None,
            uploading: false,
            last_send_unix_ms: None,
            input_rows: 1,
        }
    }
}

/// The single user-visible error slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientError {
    pub message: String,
    /// When the banner is due to disappear. Informational for front ends;
    /// the runtime clears it from the `Effect::ClearBannerAfter` timer.
    pub expires_at_unix_ms: u64,
}

impl TransientError {
    pub fn new(message: impl Into<String>, now_unix_ms: u64) -> Self {
        Self {
            message: message.into(),
            expires_at_unix_ms: now_unix_ms.saturating_add(ERROR_DISPLAY.as_millis() as u64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No connection handle exists yet.
    #[default]
    Detached,
    Connecting,
    Connected,
    Closed,
}

impl From<&ConnectionStatus> for LinkState {
    fn from(status: &ConnectionStatus) -> Self {
        match status {
            ConnectionStatus::Connecting => LinkState::Connecting,
            ConnectionStatus::Connected => LinkState::Connected,
            ConnectionStatus::Closed { .. } => LinkState::Closed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    pub session: Option<Session>,
    pub link: LinkState,
    pub messages: Vec<ChatMessage>,
    pub roster: Vec<RosterEntry>,
    pub draft: ComposerDraft,
    pub banner: Option<TransientError>,
    pub scroll_to_bottom: bool,
}

impl ChatState {
    pub fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.session
            .as_ref()
            .map(|session| session.display_name.as_str())
    }

    pub fn has_connection(&self) -> bool {
        self.link != LinkState::Detached
    }
}

pub fn input_rows_for(text: &str) -> u16 {
    let lines = text.split('\n').count();
    u16::try_from(lines)
        .unwrap_or(MAX_INPUT_ROWS)
        .clamp(1, MAX_INPUT_ROWS)
}
