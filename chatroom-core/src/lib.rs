use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use url::Url;

pub const MAX_MESSAGE_CHARS: usize = 2000;
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;
pub const SPAM_DELAY: Duration = Duration::from_millis(1000);
pub const ERROR_DISPLAY: Duration = Duration::from_millis(3000);
pub const SYSTEM_AUTHOR: &str = "System";
pub const IMAGE_URL_EXTENSIONS: [&str; 5] = ["jpeg", "jpg", "gif", "png", "webp"];

pub type UserId = String;

/// Payload of an outgoing `chatMessage`.
///
/// At most one of `text` / `image` carries content for any accepted send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub image: Option<String>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn image(url: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            image: Some(url.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncomingMessage {
    pub user: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserEntry {
    pub id: UserId,
    pub name: String,
}

/// Events the client emits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    Join(String),
    ChatMessage(OutgoingMessage),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "join",
            ClientEvent::ChatMessage(_) => "chatMessage",
        }
    }
}

/// Events pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Message(IncomingMessage),
    UserList(Vec<UserEntry>),
    Error(String),
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::Message(_) => EventKind::Message,
            ServerEvent::UserList(_) => EventKind::UserList,
            ServerEvent::Error(_) => EventKind::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    UserList,
    Error,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::Message, EventKind::UserList, EventKind::Error];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::UserList => "userList",
            EventKind::Error => "error",
        }
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("frame exceeds {max} bytes (got {size})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("serialization error: {0}")]
    Serialization(String),
}

pub fn encode_event<T: Serialize>(event: &T) -> Result<String, CoreError> {
    let frame =
        serde_json::to_string(event).map_err(|err| CoreError::Serialization(err.to_string()))?;
    if frame.len() > MAX_FRAME_BYTES {
        return Err(CoreError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    Ok(frame)
}

pub fn decode_event<T: DeserializeOwned>(frame: &str) -> Result<T, CoreError> {
    if frame.len() > MAX_FRAME_BYTES {
        return Err(CoreError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    serde_json::from_str(frame).map_err(|err| CoreError::Serialization(err.to_string()))
}

/// Trimmed display name, or `None` when nothing is left after trimming.
pub fn normalize_display_name(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// True when `text` is an http(s) URL ending in a known image extension.
pub fn is_image_url(text: &str) -> bool {
    let Ok(url) = Url::parse(text) else {
        return false;
    };
    if url.scheme() != "http" && url.scheme() != "https" {
        return false;
    }

    let lower = text.to_ascii_lowercase();
    IMAGE_URL_EXTENSIONS.iter().any(|ext| {
        lower
            .strip_suffix(ext)
            .is_some_and(|rest| rest.ends_with('.'))
    })
}

/// Cuts `text` to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

pub fn is_within_spam_delay(now_unix_ms: u64, last_send_unix_ms: Option<u64>) -> bool {
    last_send_unix_ms
        .is_some_and(|last| now_unix_ms.saturating_sub(last) < SPAM_DELAY.as_millis() as u64)
}
