//! One real-time connection per chat session.
//!
//! [`ConnectionHandle::open`] spawns a driver task that dials the server
//! (retrying only the initial connect), then pumps outgoing [`ClientEvent`]s
//! and incoming [`ServerEvent`]s until the handle is closed or the server
//! goes away. A dropped connection is not re-established.
//!
//! Incoming events reach interested code through [`Subscription`]s. A
//! subscription is registered by [`ConnectionHandle::subscribe`] and removed
//! when it is dropped, so listeners cannot outlive their owner or pile up.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chatroom_core::{ClientEvent, EventKind, ServerEvent, decode_event, encode_event};
use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    time::timeout,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub connect_timeout: Duration,
    pub max_connect_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_connect_attempts: 3,
            backoff_base: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Closed { reason: Option<String> },
}

#[derive(Debug)]
struct Listener {
    kinds: Vec<EventKind>,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Debug, Default)]
struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<u64, Listener>>,
}

impl ListenerRegistry {
    fn register(&self, kinds: &[EventKind]) -> (u64, mpsc::UnboundedReceiver<ServerEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.insert(
                id,
                Listener {
                    kinds: kinds.to_vec(),
                    tx,
                },
            );
        }
        (id, rx)
    }

    fn unregister(&self, id: u64) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.remove(&id);
        }
    }

    /// Delivers `event` to every listener for its kind; returns how many got it.
    fn dispatch(&self, event: &ServerEvent) -> usize {
        let kind = event.kind();
        let Ok(listeners) = self.listeners.lock() else {
            return 0;
        };
        listeners
            .values()
            .filter(|listener| listener.kinds.contains(&kind))
            .filter(|listener| listener.tx.send(event.clone()).is_ok())
            .count()
    }

    fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

/// Receives server events of the kinds it was registered for, in arrival order.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    connection_id: ConnectionId,
    registry: Arc<ListenerRegistry>,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Subscription {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
        debug!(connection_id = %self.connection_id, listener = self.id, "listener detached");
    }
}

#[derive(Debug)]
struct ConnectionShared {
    id: ConnectionId,
    server_url: String,
    outgoing_tx: mpsc::UnboundedSender<ClientEvent>,
    registry: Arc<ListenerRegistry>,
    status_rx: watch::Receiver<ConnectionStatus>,
    close_tx: watch::Sender<bool>,
}

impl Drop for ConnectionShared {
    fn drop(&mut self) {
        self.close_tx.send_replace(true);
    }
}

/// Cheap to clone; the connection closes on [`ConnectionHandle::close`] or
/// when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    shared: Arc<ConnectionShared>,
}

impl ConnectionHandle {
    pub fn open(server_url: &str, options: ConnectOptions) -> Result<Self, ClientError> {
        validate_server_url(server_url)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| ClientError::NoRuntime(err.to_string()))?;

        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let (close_tx, close_rx) = watch::channel(false);
        let registry = Arc::new(ListenerRegistry::default());

        runtime.spawn(run_connection(
            id,
            server_url.to_owned(),
            options,
            outgoing_rx,
            Arc::clone(&registry),
            status_tx,
            close_rx,
        ));

        Ok(Self {
            shared: Arc::new(ConnectionShared {
                id,
                server_url: server_url.to_owned(),
                outgoing_tx,
                registry,
                status_rx,
                close_tx,
            }),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    pub fn server_url(&self) -> &str {
        &self.shared.server_url
    }

    /// Queues `event` for sending. Events emitted while still connecting are
    /// sent once the connection is up. Returns `false` if the connection is gone.
    pub fn emit(&self, event: ClientEvent) -> bool {
        if self.is_closed() {
            warn!(connection_id = %self.id(), event = event.name(), "emit on closed connection dropped");
            return false;
        }
        let name = event.name();
        if self.shared.outgoing_tx.send(event).is_err() {
            warn!(connection_id = %self.id(), event = name, "connection task gone; emit dropped");
            return false;
        }
        true
    }

    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let (id, rx) = self.shared.registry.register(kinds);
        debug!(connection_id = %self.id(), listener = id, ?kinds, "listener attached");
        Subscription {
            id,
            connection_id: self.id(),
            registry: Arc::clone(&self.shared.registry),
            rx,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status_rx.borrow().clone()
    }

    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status_rx.clone()
    }

    /// Closes the connection, whether or not it was ever established.
    pub fn close(&self) {
        if !self.shared.close_tx.send_replace(true) {
            info!(connection_id = %self.id(), "closing connection");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.close_tx.borrow()
            || matches!(*self.shared.status_rx.borrow(), ConnectionStatus::Closed { .. })
    }
}

/// Owns the session's connection and refuses to open a second one.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    options: ConnectOptions,
    active: Option<ConnectionHandle>,
}

impl ConnectionManager {
    pub fn new(options: ConnectOptions) -> Self {
        Self {
            options,
            active: None,
        }
    }

    /// Opens the connection on first call; later calls return the same handle
    /// until it is stopped.
    pub fn start(&mut self, server_url: &str) -> Result<ConnectionHandle, ClientError> {
        if let Some(active) = &self.active {
            return Ok(active.clone());
        }
        let handle = ConnectionHandle::open(server_url, self.options.clone())?;
        info!(connection_id = %handle.id(), server_url, "connection opened");
        self.active = Some(handle.clone());
        Ok(handle)
    }

    pub fn active(&self) -> Option<&ConnectionHandle> {
        self.active.as_ref()
    }

    pub fn stop(&mut self, handle: &ConnectionHandle) {
        handle.close();
        if self
            .active
            .as_ref()
            .is_some_and(|active| active.id() == handle.id())
        {
            self.active = None;
        }
    }
}

pub fn validate_server_url(server_url: &str) -> Result<(), ClientError> {
    let url = Url::parse(server_url).map_err(|err| ClientError::InvalidServerUrl {
        url: server_url.to_owned(),
        reason: err.to_string(),
    })?;
    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(ClientError::InvalidServerUrl {
            url: server_url.to_owned(),
            reason: "scheme must be ws or wss".to_owned(),
        });
    }
    Ok(())
}

async fn run_connection(
    id: ConnectionId,
    server_url: String,
    options: ConnectOptions,
    mut outgoing_rx: mpsc::UnboundedReceiver<ClientEvent>,
    registry: Arc<ListenerRegistry>,
    status_tx: watch::Sender<ConnectionStatus>,
    mut close_rx: watch::Receiver<bool>,
) {
    info!(connection_id = %id, server_url = %server_url, "connection starting");

    let ws_stream = tokio::select! {
        result = connect_with_retry(&server_url, &options) => match result {
            Ok(stream) => stream,
            Err(reason) => {
                status_tx.send_replace(ConnectionStatus::Closed { reason: Some(reason) });
                return;
            }
        },
        _ = wait_for_close(&mut close_rx) => {
            info!(connection_id = %id, "closed before connecting");
            status_tx.send_replace(ConnectionStatus::Closed { reason: None });
            return;
        }
    };

    info!(connection_id = %id, "connected");
    status_tx.send_replace(ConnectionStatus::Connected);

    let (mut ws_write, mut ws_read) = ws_stream.split();
    let reason = loop {
        tokio::select! {
            _ = wait_for_close(&mut close_rx) => {
                while let Ok(event) = outgoing_rx.try_recv() {
                    if send_event(&mut ws_write, &event).await.is_err() {
                        break;
                    }
                }
                let _ = ws_write.send(Message::Close(None)).await;
                break None;
            }
            outgoing = outgoing_rx.recv() => match outgoing {
                Some(event) => {
                    if let Err(err) = send_event(&mut ws_write, &event).await {
                        break Some(format!("write failed: {err}"));
                    }
                }
                None => {
                    let _ = ws_write.send(Message::Close(None)).await;
                    break None;
                }
            },
            incoming = ws_read.next() => match incoming {
                Some(Ok(Message::Text(text))) => dispatch_frame(id, &registry, text.as_str()),
                Some(Ok(Message::Close(_))) | None => {
                    break Some("server closed the connection".to_owned());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => break Some(format!("read failed: {err}")),
            },
        }
    };

    match &reason {
        Some(reason) => warn!(connection_id = %id, "connection ended: {}", reason),
        None => info!(connection_id = %id, "connection closed"),
    }
    status_tx.send_replace(ConnectionStatus::Closed { reason });
}

async fn connect_with_retry(server_url: &str, options: &ConnectOptions) -> Result<WsStream, String> {
    let max_attempts = options.max_connect_attempts.max(1);
    let mut attempt: u32 = 1;
    loop {
        info!(attempt, max_attempts, server_url, "connecting");

        let msg = match timeout(options.connect_timeout, connect_async(server_url)).await {
            Ok(Ok((stream, _))) => return Ok(stream),
            Ok(Err(err)) => format!("connect failed: {err}"),
            Err(_) => format!("connect timed out after {:?}", options.connect_timeout),
        };
        error!(attempt, server_url, "{msg}");
        if attempt >= max_attempts {
            return Err(msg);
        }

        let backoff = options
            .backoff_base
            .saturating_mul(1_u32 << (attempt - 1).min(16));
        tokio::time::sleep(backoff).await;
        attempt += 1;
    }
}

async fn wait_for_close(close_rx: &mut watch::Receiver<bool>) {
    // An Err means every sender is gone, which also counts as closed.
    let _ = close_rx.wait_for(|closed| *closed).await;
}

async fn send_event<S>(ws_write: &mut S, event: &ClientEvent) -> Result<(), String>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let frame = match encode_event(event) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(event = event.name(), "failed to encode outgoing event: {}", err);
            return Ok(());
        }
    };
    debug!(event = event.name(), "sending");
    ws_write
        .send(Message::Text(frame.into()))
        .await
        .map_err(|err| err.to_string())
}

fn dispatch_frame(id: ConnectionId, registry: &ListenerRegistry, frame: &str) {
    let event: ServerEvent = match decode_event(frame) {
        Ok(event) => event,
        Err(err) => {
            warn!(connection_id = %id, "decode frame failed: {}", err);
            return;
        }
    };
    let kind = event.kind();
    if registry.dispatch(&event) == 0 {
        debug!(connection_id = %id, event = kind.name(), "no listener for event");
    }
}
