use std::time::Duration;

use chatroom_core::ClientEvent;

use crate::attachment::PendingImage;

/// Side effects requested by [`crate::ChatSession`]; the runtime performs them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send an event on the connection.
    Emit(ClientEvent),
    /// Upload an image; the result comes back through
    /// [`crate::ChatSession::upload_finished`] with the ticket id.
    Upload {
        ticket: UploadTicket,
        image: PendingImage,
    },
    /// Clear the error banner once the delay has passed.
    ClearBannerAfter(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadTicket {
    pub id: u64,
    pub origin: UploadOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOrigin {
    /// Image attached to the draft; `requested_at_unix_ms` becomes the send time.
    Draft { requested_at_unix_ms: u64 },
    /// Image pasted from the clipboard, sent on its own.
    Paste,
}
