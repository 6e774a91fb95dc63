use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{ClientError, attachment::PendingImage, config::ClientConfig};

/// Multipart field the image host expects the file under.
pub const IMAGE_FIELD: &str = "image";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no image host API key configured")]
    MissingApiKey,
    #[error("upload request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("image host answered with HTTP {status}")]
    Status { status: u16 },
    #[error("image host rejected the upload")]
    Rejected,
    #[error("image host response carried no URL")]
    MissingUrl,
}

/// Turns image bytes into a publicly reachable URL.
pub trait ImageHost: Send + Sync {
    fn upload<'a>(&'a self, image: &'a PendingImage) -> BoxFuture<'a, Result<String, UploadError>>;
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<UploadedImage>,
}

#[derive(Debug, Deserialize)]
struct UploadedImage {
    #[serde(default)]
    url: Option<String>,
}

/// Reads an imgbb-style reply: `{"success": true, "data": {"url": "..."}}`.
///
/// The JSON body decides the outcome; the status code only matters when the
/// body is not the expected JSON.
pub fn interpret_upload_response(status: u16, body: &str) -> Result<String, UploadError> {
    let response: UploadResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(err) => {
            debug!("upload response is not JSON: {}", err);
            return Err(if (200..300).contains(&status) {
                UploadError::Rejected
            } else {
                UploadError::Status { status }
            });
        }
    };
    if !response.success {
        return Err(UploadError::Rejected);
    }
    response
        .data
        .and_then(|data| data.url)
        .filter(|url| !url.is_empty())
        .ok_or(UploadError::MissingUrl)
}

/// imgbb upload API client.
#[derive(Debug, Clone)]
pub struct ImgbbHost {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
}

impl ImgbbHost {
    pub fn new(endpoint: Url, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let endpoint = Url::parse(&config.image_host_url).map_err(|err| {
            ClientError::InvalidConfig(vec![format!(
                "Image host URL {} is invalid: {err}",
                config.image_host_url
            )])
        })?;
        Ok(Self::new(
            endpoint,
            config.image_host_api_key.clone(),
            config.upload_timeout,
        ))
    }

    async fn post(&self, image: &PendingImage) -> Result<String, UploadError> {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!("image upload attempted without an API key");
            return Err(UploadError::MissingApiKey);
        };

        let part = Part::bytes(image.bytes().to_vec())
            .file_name(image.file_name().to_owned())
            .mime_str(image.mime())?;
        let form = Form::new().part(IMAGE_FIELD, part);

        debug!(endpoint = %self.endpoint, bytes = image.len(), "posting image");
        let response = self
            .client
            .post(self.endpoint.clone())
            .query(&[("key", api_key)])
            .multipart(form)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        interpret_upload_response(status, &body)
    }
}

impl ImageHost for ImgbbHost {
    fn upload<'a>(&'a self, image: &'a PendingImage) -> BoxFuture<'a, Result<String, UploadError>> {
        Box::pin(self.post(image))
    }
}
