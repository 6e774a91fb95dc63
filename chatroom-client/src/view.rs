//! Render-ready projection of [`ChatState`].

use chatroom_core::SYSTEM_AUTHOR;
use chrono::{DateTime, Local, Utc};

use crate::state::{ChatState, LinkState};

pub const SELF_MARKER: &str = "(you)";
pub const SEND_LABEL: &str = "Send";
pub const UPLOADING_LABEL: &str = "Uploading...";
/// Shown in place of a clock time the server sent out of range.
pub const UNKNOWN_TIME: &str = "--:--";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Screen {
    #[default]
    Login,
    Chat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterLine {
    pub id: String,
    pub name: String,
    pub is_self: bool,
}

impl RosterLine {
    pub fn label(&self) -> String {
        if self.is_self {
            format!("{} {SELF_MARKER}", self.name)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLine {
    pub author: String,
    /// `HH:MM` in the viewer's local time zone.
    pub time: String,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub is_system: bool,
    pub is_own: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ComposerView {
    pub text: String,
    pub attachment_name: Option<String>,
    pub input_rows: u16,
    pub input_enabled: bool,
    pub send_enabled: bool,
    pub send_label: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatView {
    pub screen: Screen,
    pub link: LinkState,
    pub display_name: Option<String>,
    pub roster: Vec<RosterLine>,
    pub messages: Vec<MessageLine>,
    pub banner: Option<String>,
    pub composer: ComposerView,
    pub scroll_to_bottom: bool,
}

impl ChatView {
    pub fn project(state: &ChatState) -> Self {
        let display_name = state.display_name();
        let screen = if state.is_logged_in() {
            Screen::Chat
        } else {
            Screen::Login
        };

        let roster = state
            .roster
            .iter()
            .map(|entry| RosterLine {
                id: entry.id.clone(),
                name: entry.display_name.clone(),
                is_self: Some(entry.display_name.as_str()) == display_name,
            })
            .collect();

        let messages = state
            .messages
            .iter()
            .map(|message| MessageLine {
                author: message.author.clone(),
                time: format_timestamp(message.timestamp_unix_ms),
                text: Some(message.text.clone()).filter(|text| !text.is_empty()),
                image_url: message.image_url.clone(),
                is_system: message.author == SYSTEM_AUTHOR,
                is_own: Some(message.author.as_str()) == display_name,
            })
            .collect();

        let draft = &state.draft;
        let composer = ComposerView {
            text: draft.text.clone(),
            attachment_name: draft
                .pending_image
                .as_ref()
                .map(|image| image.file_name().to_owned()),
            input_rows: draft.input_rows,
            input_enabled: !draft.uploading,
            send_enabled: !draft.uploading
                && (!draft.text.trim().is_empty() || draft.pending_image.is_some()),
            send_label: if draft.uploading {
                UPLOADING_LABEL
            } else {
                SEND_LABEL
            },
        };

        Self {
            screen,
            link: state.link,
            display_name: display_name.map(str::to_owned),
            roster,
            messages,
            banner: state.banner.as_ref().map(|banner| banner.message.clone()),
            composer,
            scroll_to_bottom: state.scroll_to_bottom,
        }
    }
}

impl MessageLine {
    /// Terminal lines for this message: the text, then the image link.
    pub fn display_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.is_system {
            if let Some(text) = &self.text {
                lines.push(format!("[{}] * {}", self.time, text));
            }
            if let Some(url) = &self.image_url {
                lines.push(format!("[{}] * [image] {}", self.time, url));
            }
            return lines;
        }
        if let Some(text) = &self.text {
            lines.push(format!("[{}] {}: {}", self.time, self.author, text));
        }
        if let Some(url) = &self.image_url {
            lines.push(format!("[{}] {}: [image] {}", self.time, self.author, url));
        }
        lines
    }
}

pub fn format_timestamp(unix_ms: u64) -> String {
    i64::try_from(unix_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|utc| utc.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| UNKNOWN_TIME.to_owned())
}
