use std::{io::BufRead, path::PathBuf, sync::Arc};

use chatroom_client::{
    ChatRuntime, ChatView, ClientArgs, UiCommand,
    config::resolve_config,
    logging::init_logging,
    state::LinkState,
    upload::ImgbbHost,
    view::{RosterLine, Screen},
};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const HELP: &str = "Commands: /image <path>, /clear-image, /paste, /quit. An empty line sends the attached image.";

enum LineAction {
    Commands(Vec<UiCommand>),
    Quit,
}

#[tokio::main]
async fn main() {
    init_logging();

    let args = ClientArgs::parse();
    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(err) => {
            error!("invalid configuration: {}", err);
            eprintln!("{err}");
            std::process::exit(2);
        }
    };
    let host = match ImgbbHost::from_config(&config) {
        Ok(host) => host,
        Err(err) => {
            error!("invalid image host configuration: {}", err);
            eprintln!("{err}");
            std::process::exit(2);
        }
    };
    if config.image_host_api_key.is_none() {
        warn!("no image host API key configured; image uploads will fail");
    }

    let runtime = match ChatRuntime::start(&config, Arc::new(host)) {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("failed to start chat runtime: {}", err);
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    info!(server_url = %config.server_url, "client started");
    println!("Connecting to {}", config.server_url);

    let mut lines = spawn_stdin_reader();
    let mut view_rx = runtime.view();
    let mut renderer = Renderer::default();
    let initial = view_rx.borrow_and_update().clone();
    renderer.render(&initial);

    'ui: loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break 'ui };
                let screen = view_rx.borrow().screen;
                match parse_line(&line, screen) {
                    LineAction::Quit => break 'ui,
                    LineAction::Commands(commands) => {
                        for command in commands {
                            if runtime.send(command).is_err() {
                                break 'ui;
                            }
                        }
                    }
                }
            }
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break 'ui;
                }
                let view = view_rx.borrow_and_update().clone();
                if renderer.render(&view) {
                    let _ = runtime.send(UiCommand::AcknowledgeScroll);
                }
            }
        }
    }

    runtime.shutdown().await;
    info!("client exiting");
    // The stdin reader thread may still be parked on a read.
    std::process::exit(0);
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("stdin read failed: {}", err);
                    break;
                }
            }
        }
    });
    rx
}

fn parse_line(line: &str, screen: Screen) -> LineAction {
    let trimmed = line.trim();
    if trimmed == "/quit" {
        return LineAction::Quit;
    }
    if screen == Screen::Login {
        return LineAction::Commands(vec![UiCommand::Login(line.to_owned())]);
    }

    let commands = if let Some(path) = trimmed.strip_prefix("/image ") {
        vec![UiCommand::SelectImage(PathBuf::from(path.trim()))]
    } else if trimmed == "/clear-image" {
        vec![UiCommand::ClearImage]
    } else if trimmed == "/paste" {
        vec![UiCommand::PasteFromClipboard]
    } else if trimmed == "/help" {
        println!("{HELP}");
        Vec::new()
    } else {
        vec![UiCommand::EditText(line.to_owned()), UiCommand::Submit]
    };
    LineAction::Commands(commands)
}

/// Prints what changed between successive views.
#[derive(Default)]
struct Renderer {
    last: Option<ChatView>,
    printed_messages: usize,
}

impl Renderer {
    /// Returns `true` when the view asks to be scrolled to the newest message.
    fn render(&mut self, view: &ChatView) -> bool {
        let previous = self.last.take();
        let previous = previous.as_ref();

        if previous.map(|p| p.link) != Some(view.link) {
            match view.link {
                LinkState::Connected => println!("[connected]"),
                LinkState::Closed => println!("[connection closed]"),
                LinkState::Connecting | LinkState::Detached => {}
            }
        }

        if previous.map(|p| p.screen) != Some(view.screen) {
            match view.screen {
                Screen::Login => println!("Enter a display name to join:"),
                Screen::Chat => {
                    let name = view.display_name.as_deref().unwrap_or_default();
                    println!("Joined as {name}. {HELP}");
                }
            }
        }

        if previous.map(|p| &p.roster) != Some(&view.roster) && view.screen == Screen::Chat {
            let names: Vec<_> = view.roster.iter().map(RosterLine::label).collect();
            println!("Online ({}): {}", names.len(), names.join(", "));
        }

        for message in view.messages.iter().skip(self.printed_messages) {
            for line in message.display_lines() {
                println!("{line}");
            }
        }
        self.printed_messages = view.messages.len();

        if previous.map(|p| &p.banner) != Some(&view.banner)
            && let Some(banner) = &view.banner
        {
            println!("! {banner}");
        }

        let was_uploading = previous.is_some_and(|p| !p.composer.input_enabled);
        if !view.composer.input_enabled && !was_uploading {
            println!("{}", view.composer.send_label);
        }
        if previous.map(|p| &p.composer.attachment_name) != Some(&view.composer.attachment_name) {
            match &view.composer.attachment_name {
                Some(name) => println!("Attached {name}. Send an empty line to post it."),
                None if previous.is_some_and(|p| p.composer.attachment_name.is_some()) => {
                    println!("Attachment cleared.")
                }
                None => {}
            }
        }

        self.last = Some(view.clone());
        view.scroll_to_bottom
    }
}
