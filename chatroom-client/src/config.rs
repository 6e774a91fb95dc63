use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
    ClientError,
    connection::{ConnectOptions, validate_server_url},
};

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:3000/ws";
pub const DEFAULT_IMAGE_HOST_URL: &str = "https://api.imgbb.com/1/upload";
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Config files are expected to be tiny.
pub const MAX_CONFIG_BYTES: u64 = 64 * 1024;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "chatroom", about = "Terminal client for a single-room chat server")]
pub struct ClientArgs {
    /// WebSocket endpoint of the chat server.
    #[arg(long, env = "CHATROOM_SERVER_URL")]
    pub server_url: Option<String>,

    /// Image host upload endpoint.
    #[arg(long, env = "CHATROOM_IMAGE_HOST_URL")]
    pub image_host_url: Option<String>,

    #[arg(long, env = "CHATROOM_IMAGE_HOST_API_KEY", hide_env_values = true)]
    pub image_host_api_key: Option<String>,

    /// Join immediately under this display name.
    #[arg(long)]
    pub name: Option<String>,

    /// JSON file with any of `server_url`, `image_host_url`,
    /// `image_host_api_key`, `display_name`.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct FileConfig {
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub image_host_url: Option<String>,
    #[serde(default)]
    pub image_host_api_key: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("metadata read failed: {0}")]
    Metadata(#[source] io::Error),
    #[error("file too large: {size} bytes (max {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("parse failed: {0}")]
    Parse(#[source] serde_json::Error),
}

/// Everything the runtime needs, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_url: String,
    pub image_host_url: String,
    pub image_host_api_key: Option<String>,
    pub display_name: Option<String>,
    pub connect: ConnectOptions,
    pub upload_timeout: Duration,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            image_host_url: DEFAULT_IMAGE_HOST_URL.to_owned(),
            image_host_api_key: None,
            display_name: None,
            connect: ConnectOptions::default(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

pub fn parse_config_json(data: &str) -> Result<FileConfig, serde_json::Error> {
    serde_json::from_str::<FileConfig>(data)
}

pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let meta = fs::metadata(path).map_err(ConfigLoadError::Metadata)?;
    if meta.len() > MAX_CONFIG_BYTES {
        return Err(ConfigLoadError::TooLarge {
            size: meta.len(),
            max: MAX_CONFIG_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(ConfigLoadError::Read)?;
    parse_config_json(&data).map_err(ConfigLoadError::Parse)
}

/// Merges flags/env, the optional config file and defaults, in that order of
/// precedence, then validates the result. All problems are reported together.
pub fn resolve_config(args: &ClientArgs) -> Result<ClientConfig, ClientError> {
    let file = match &args.config {
        Some(path) => load_file_config(path).map_err(|source| ClientError::ConfigFile {
            path: path.display().to_string(),
            source,
        })?,
        None => FileConfig::default(),
    };

    let server_url = non_blank(args.server_url.clone())
        .or(non_blank(file.server_url))
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_owned());
    let image_host_url = non_blank(args.image_host_url.clone())
        .or(non_blank(file.image_host_url))
        .unwrap_or_else(|| DEFAULT_IMAGE_HOST_URL.to_owned());
    let image_host_api_key =
        non_blank(args.image_host_api_key.clone()).or(non_blank(file.image_host_api_key));
    let display_name = non_blank(args.name.clone()).or(non_blank(file.display_name));

    let mut errors = Vec::new();
    if let Err(err) = validate_server_url(&server_url) {
        errors.push(err.to_string());
    }
    if let Err(reason) = validate_image_host_url(&image_host_url) {
        errors.push(format!("Image host URL {image_host_url} is invalid: {reason}"));
    }
    if let Some(name) = &display_name
        && name.chars().count() > chatroom_core::MAX_MESSAGE_CHARS
    {
        errors.push("Display name is too long.".to_owned());
    }
    if !errors.is_empty() {
        return Err(ClientError::InvalidConfig(errors));
    }

    Ok(ClientConfig {
        server_url,
        image_host_url,
        image_host_api_key,
        display_name: display_name.map(|name| name.trim().to_owned()),
        connect: ConnectOptions::default(),
        upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
    })
}

fn validate_image_host_url(value: &str) -> Result<(), String> {
    let url = Url::parse(value).map_err(|err| err.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("unsupported scheme {other}")),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_inputs() {
        let config = resolve_config(&ClientArgs::default()).unwrap();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.image_host_url, DEFAULT_IMAGE_HOST_URL);
        assert_eq!(config.image_host_api_key, None);
        assert_eq!(config.connect, ConnectOptions::default());
    }

    #[test]
    fn blank_values_fall_through() {
        let args = ClientArgs {
            image_host_api_key: Some("  ".to_owned()),
            name: Some("".to_owned()),
            ..ClientArgs::default()
        };
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.image_host_api_key, None);
        assert_eq!(config.display_name, None);
    }

    #[test]
    fn validation_collects_every_problem() {
        let args = ClientArgs {
            server_url: Some("http://chat.example.com".to_owned()),
            image_host_url: Some("ftp://images".to_owned()),
            ..ClientArgs::default()
        };
        let Err(ClientError::InvalidConfig(errors)) = resolve_config(&args) else {
            panic!("expected invalid config");
        };
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn unknown_json_fields_are_ignored() {
        let parsed = parse_config_json(r#"{"server_url":"ws://x/ws","theme":"dark"}"#).unwrap();
        assert_eq!(parsed.server_url.as_deref(), Some("ws://x/ws"));
    }
}
