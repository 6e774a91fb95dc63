//! Folding server-pushed events into [`ChatState`](crate::state::ChatState).
//!
//! [`EventReconciler`] keeps exactly one [`Subscription`] to the current
//! connection. Binding to a different connection drops the old subscription
//! before registering the new one; binding to the same connection again is a
//! no-op.

use chatroom_core::{EventKind, ServerEvent};
use tracing::{debug, info, warn};

use crate::{
    connection::{ConnectionHandle, ConnectionId, Subscription},
    effect::Effect,
    session::ChatSession,
    state::ChatMessage,
};

impl ChatSession {
    pub fn apply_server_event(&mut self, event: ServerEvent, now_unix_ms: u64) -> Vec<Effect> {
        if !self.mounted {
            return Vec::new();
        }
        match event {
            ServerEvent::Message(message) => {
                debug!(author = %message.user, "message received");
                self.state.messages.push(ChatMessage::from(message));
                self.state.scroll_to_bottom = true;
                Vec::new()
            }
            ServerEvent::UserList(users) => {
                debug!(count = users.len(), "roster replaced");
                self.state.roster = users.into_iter().map(Into::into).collect();
                Vec::new()
            }
            ServerEvent::Error(message) => {
                warn!("server error: {}", message);
                self.raise_error(message, now_unix_ms)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct EventReconciler {
    subscription: Option<Subscription>,
}

impl EventReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, connection: &ConnectionHandle) {
        if self.bound_to() == Some(connection.id()) {
            return;
        }
        // Release the previous listener before attaching a new one.
        self.subscription = None;
        info!(connection_id = %connection.id(), "attaching event listeners");
        self.subscription = Some(connection.subscribe(&EventKind::ALL));
    }

    pub fn unbind(&mut self) {
        self.subscription = None;
    }

    pub fn bound_to(&self) -> Option<ConnectionId> {
        self.subscription.as_ref().map(Subscription::connection_id)
    }

    /// Next event from the bound connection. Never resolves while unbound.
    pub async fn next_event(&mut self) -> ServerEvent {
        loop {
            let Some(subscription) = self.subscription.as_mut() else {
                return std::future::pending().await;
            };
            match subscription.recv().await {
                Some(event) => return event,
                None => self.subscription = None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chatroom_core::IncomingMessage;

    use super::*;
    use crate::connection::ConnectOptions;

    fn options() -> ConnectOptions {
        ConnectOptions {
            connect_timeout: Duration::from_millis(200),
            max_connect_attempts: 1,
            backoff_base: Duration::from_millis(10),
        }
    }

    #[test]
    fn message_sets_scroll_request() {
        let mut session = ChatSession::new();
        session.apply_server_event(
            ServerEvent::Message(IncomingMessage {
                user: "bob".to_owned(),
                text: "hi".to_owned(),
                image: None,
                timestamp: 5,
            }),
            0,
        );
        assert!(session.take_scroll_request());
        assert!(!session.take_scroll_request());
    }

    #[tokio::test]
    async fn rebinding_follows_connection_identity() {
        let first = ConnectionHandle::open("ws://127.0.0.1:1/ws", options()).expect("open first");
        let second =
            ConnectionHandle::open("ws://127.0.0.1:1/ws", options()).expect("open second");

        let mut reconciler = EventReconciler::new();
        reconciler.bind(&first);
        reconciler.bind(&first);
        assert_eq!(first.listener_count(), 1);
        assert_eq!(reconciler.bound_to(), Some(first.id()));

        reconciler.bind(&second);
        assert_eq!(first.listener_count(), 0);
        assert_eq!(second.listener_count(), 1);

        reconciler.unbind();
        assert_eq!(second.listener_count(), 0);
        assert_eq!(reconciler.bound_to(), None);

        first.close();
        second.close();
    }
}
