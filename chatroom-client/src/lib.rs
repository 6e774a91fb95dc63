pub mod attachment;
pub mod composer;
pub mod config;
pub mod connection;
pub mod effect;
pub mod logging;
pub mod reconciler;
pub mod runtime;
pub mod session;
pub mod state;
pub mod upload;
pub mod view;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

pub use config::{ClientArgs, ClientConfig};
pub use runtime::{ChatRuntime, UiCommand};
pub use session::ChatSession;
pub use view::ChatView;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Please fix the following:\n\n- {}", .0.join("\n- "))]
    InvalidConfig(Vec<String>),
    #[error("failed to load config file {path}: {source}")]
    ConfigFile {
        path: String,
        #[source]
        source: config::ConfigLoadError,
    },
    #[error("invalid server URL {url}: {reason}")]
    InvalidServerUrl { url: String, reason: String },
    #[error("no async runtime available: {0}")]
    NoRuntime(String),
    #[error("chat runtime has stopped")]
    RuntimeStopped,
}

pub fn now_unix_ms() -> u64 {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    duration.as_millis() as u64
}
