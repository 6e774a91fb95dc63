//! Tokio driver around [`ChatSession`].
//!
//! The driver task owns the session, the connection and the reconciler. It
//! turns front-end commands, server events, upload results and timers into
//! session inputs, carries out the returned [`Effect`]s, and publishes a fresh
//! [`ChatView`] after each step. Shutdown unmounts the session first, so
//! anything still in flight lands on a session that ignores it.

use std::{path::PathBuf, sync::Arc};

use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    ClientError, now_unix_ms,
    attachment::{AttachmentError, ClipboardItem, PendingImage, load_image_file, read_system_clipboard},
    config::ClientConfig,
    connection::{ConnectionHandle, ConnectionManager},
    effect::Effect,
    reconciler::EventReconciler,
    session::ChatSession,
    state::LinkState,
    upload::{ImageHost, UploadError},
    view::ChatView,
};

/// Input from the front end.
#[derive(Debug)]
pub enum UiCommand {
    Login(String),
    EditText(String),
    PressEnter { shift: bool },
    Submit,
    SelectImage(PathBuf),
    AttachImage(PendingImage),
    ClearImage,
    Paste(Vec<ClipboardItem>),
    PasteFromClipboard,
    AcknowledgeScroll,
    Shutdown,
}

#[derive(Debug)]
enum Internal {
    UploadFinished {
        ticket_id: u64,
        result: Result<String, UploadError>,
    },
    BannerExpired,
    ImageLoaded(Result<PendingImage, AttachmentError>),
    ClipboardRead(Result<Vec<ClipboardItem>, AttachmentError>),
}

pub struct ChatRuntime {
    command_tx: mpsc::UnboundedSender<UiCommand>,
    view_rx: watch::Receiver<ChatView>,
    task: JoinHandle<()>,
}

impl ChatRuntime {
    /// Opens the connection and spawns the driver on the current tokio runtime.
    /// Logs in right away when the config carries a display name.
    pub fn start(config: &ClientConfig, host: Arc<dyn ImageHost>) -> Result<Self, ClientError> {
        let mut manager = ConnectionManager::new(config.connect.clone());
        let connection = manager.start(&config.server_url)?;

        let mut session = ChatSession::new();
        session.link_changed(LinkState::from(&connection.status()));

        let mut reconciler = EventReconciler::new();
        reconciler.bind(&connection);

        let initial = match &config.display_name {
            Some(name) => session.submit_login(name, now_unix_ms()),
            None => Vec::new(),
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(ChatView::project(session.state()));

        let driver = Driver {
            session,
            manager,
            connection,
            reconciler,
            host,
            internal_tx,
            view_tx,
        };
        let task = tokio::spawn(driver.run(command_rx, internal_rx, initial));

        Ok(Self {
            command_tx,
            view_rx,
            task,
        })
    }

    pub fn send(&self, command: UiCommand) -> Result<(), ClientError> {
        self.command_tx
            .send(command)
            .map_err(|_| ClientError::RuntimeStopped)
    }

    pub fn view(&self) -> watch::Receiver<ChatView> {
        self.view_rx.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.command_tx.send(UiCommand::Shutdown);
        if let Err(err) = self.task.await {
            warn!("chat runtime task failed: {}", err);
        }
    }
}

struct Driver {
    session: ChatSession,
    manager: ConnectionManager,
    connection: ConnectionHandle,
    reconciler: EventReconciler,
    host: Arc<dyn ImageHost>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    view_tx: watch::Sender<ChatView>,
}

impl Driver {
    async fn run(
        mut self,
        mut command_rx: mpsc::UnboundedReceiver<UiCommand>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
        initial: Vec<Effect>,
    ) {
        info!(
            connection_id = %self.connection.id(),
            server_url = self.connection.server_url(),
            "chat runtime started"
        );
        self.execute(initial);
        self.publish();

        let mut status_rx = self.connection.status_watch();
        let mut status_open = true;

        loop {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(UiCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                event = self.reconciler.next_event() => {
                    let effects = self.session.apply_server_event(event, now_unix_ms());
                    self.execute(effects);
                }
                Some(internal) = internal_rx.recv() => self.handle_internal(internal),
                changed = status_rx.changed(), if status_open => match changed {
                    Ok(()) => {
                        let link = LinkState::from(&*status_rx.borrow_and_update());
                        debug!(?link, "link state changed");
                        self.session.link_changed(link);
                    }
                    Err(_) => status_open = false,
                },
            }
            self.publish();
        }

        self.teardown();
    }

    fn handle_command(&mut self, command: UiCommand) {
        let now = now_unix_ms();
        let effects = match command {
            UiCommand::Login(name) => self.session.submit_login(&name, now),
            UiCommand::EditText(text) => {
                self.session.edit_text(&text);
                Vec::new()
            }
            UiCommand::PressEnter { shift } => self.session.press_enter(shift, now),
            UiCommand::Submit => self.session.submit_send(now),
            UiCommand::SelectImage(path) => {
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(Internal::ImageLoaded(load_image_file(path).await));
                });
                Vec::new()
            }
            UiCommand::AttachImage(image) => {
                self.session.select_image(image);
                Vec::new()
            }
            UiCommand::ClearImage => {
                self.session.clear_image();
                Vec::new()
            }
            UiCommand::Paste(items) => self.session.paste(items, now),
            UiCommand::PasteFromClipboard => {
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let items = tokio::task::spawn_blocking(read_system_clipboard)
                        .await
                        .map_err(|err| AttachmentError::Task(err.to_string()))
                        .and_then(|result| result);
                    let _ = tx.send(Internal::ClipboardRead(items));
                });
                Vec::new()
            }
            UiCommand::AcknowledgeScroll => {
                self.session.take_scroll_request();
                Vec::new()
            }
            UiCommand::Shutdown => Vec::new(),
        };
        self.execute(effects);
    }

    fn handle_internal(&mut self, internal: Internal) {
        let now = now_unix_ms();
        let effects = match internal {
            Internal::UploadFinished { ticket_id, result } => {
                self.session.upload_finished(ticket_id, result, now)
            }
            Internal::BannerExpired => {
                self.session.expire_banner();
                Vec::new()
            }
            Internal::ImageLoaded(Ok(image)) => {
                self.session.select_image(image);
                Vec::new()
            }
            Internal::ImageLoaded(Err(err)) => {
                warn!("image attach failed: {}", err);
                self.session
                    .raise_error(format!("Could not attach image: {err}"), now)
            }
            Internal::ClipboardRead(Ok(items)) => self.session.paste(items, now),
            Internal::ClipboardRead(Err(err)) => {
                warn!("clipboard read failed: {}", err);
                self.session.raise_error("Clipboard unavailable", now)
            }
        };
        self.execute(effects);
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(event) => {
                    self.connection.emit(event);
                }
                Effect::Upload { ticket, image } => {
                    let host = Arc::clone(&self.host);
                    let tx = self.internal_tx.clone();
                    tokio::spawn(async move {
                        let result = host.upload(&image).await;
                        // The driver may be gone by now; nothing to report to.
                        let _ = tx.send(Internal::UploadFinished {
                            ticket_id: ticket.id,
                            result,
                        });
                    });
                }
                Effect::ClearBannerAfter(delay) => {
                    let tx = self.internal_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Internal::BannerExpired);
                    });
                }
            }
        }
    }

    fn publish(&self) {
        let next = ChatView::project(self.session.state());
        self.view_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn teardown(&mut self) {
        self.session.unmount();
        self.reconciler.unbind();
        self.manager.stop(&self.connection);
        info!(connection_id = %self.connection.id(), "chat runtime stopped");
    }
}
