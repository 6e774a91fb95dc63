use std::{borrow::Cow, fmt, io::Cursor, path::PathBuf};

use arboard::Clipboard;
use bytes::Bytes;
use image::{ImageFormat, RgbaImage};
use thiserror::Error;
use tracing::{debug, warn};

/// Largest image the image host accepts.
pub const MAX_IMAGE_BYTES: u64 = 32 * 1024 * 1024;
pub const CLIPBOARD_IMAGE_NAME: &str = "clipboard.png";
pub const MIME_TEXT_PLAIN: &str = "text/plain";

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("file is empty")]
    Empty,
    #[error("file too large ({size} bytes); limit is {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("file is not a recognised image")]
    NotAnImage,
    #[error("clipboard unavailable: {0}")]
    Clipboard(String),
    #[error("failed to encode clipboard image: {0}")]
    Encode(String),
    #[error("background task failed: {0}")]
    Task(String),
}

/// An image picked by the user and waiting to be uploaded.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingImage {
    file_name: String,
    mime: String,
    bytes: Bytes,
}

impl PendingImage {
    /// Sniffs the format from the leading bytes; the file extension is not trusted.
    pub fn from_bytes(
        file_name: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Result<Self, AttachmentError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(AttachmentError::Empty);
        }
        let size = bytes.len() as u64;
        if size > MAX_IMAGE_BYTES {
            return Err(AttachmentError::TooLarge {
                size,
                max: MAX_IMAGE_BYTES,
            });
        }

        let format = image::guess_format(&bytes).map_err(|_| AttachmentError::NotAnImage)?;
        Ok(Self {
            file_name: file_name.into(),
            mime: format.to_mime_type().to_owned(),
            bytes,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for PendingImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingImage")
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// One entry of a clipboard paste.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipboardItem {
    Text(String),
    Image(PendingImage),
}

impl ClipboardItem {
    pub fn mime_type(&self) -> &str {
        match self {
            ClipboardItem::Text(_) => MIME_TEXT_PLAIN,
            ClipboardItem::Image(image) => image.mime(),
        }
    }

    pub fn is_image(&self) -> bool {
        self.mime_type().starts_with("image")
    }
}

pub async fn load_image_file(path: PathBuf) -> Result<PendingImage, AttachmentError> {
    tokio::task::spawn_blocking(move || {
        let display = path.display().to_string();
        let meta = std::fs::metadata(&path).map_err(|source| AttachmentError::Read {
            path: display.clone(),
            source,
        })?;
        if meta.len() == 0 {
            return Err(AttachmentError::Empty);
        }
        if meta.len() > MAX_IMAGE_BYTES {
            return Err(AttachmentError::TooLarge {
                size: meta.len(),
                max: MAX_IMAGE_BYTES,
            });
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_owned());
        let data = std::fs::read(&path).map_err(|source| AttachmentError::Read {
            path: display,
            source,
        })?;
        PendingImage::from_bytes(name, data)
    })
    .await
    .map_err(|err| AttachmentError::Task(err.to_string()))?
}

/// Reads the system clipboard. Blocking; call from `spawn_blocking`.
///
/// A bitmap on the clipboard comes back as a PNG [`ClipboardItem::Image`];
/// non-empty text comes back as [`ClipboardItem::Text`].
pub fn read_system_clipboard() -> Result<Vec<ClipboardItem>, AttachmentError> {
    let mut clipboard = Clipboard::new().map_err(|err| AttachmentError::Clipboard(err.to_string()))?;
    let mut items = Vec::new();

    match clipboard.get_image() {
        Ok(data) => {
            let png = encode_rgba_png(data.width, data.height, data.bytes)?;
            items.push(ClipboardItem::Image(PendingImage::from_bytes(
                CLIPBOARD_IMAGE_NAME,
                png,
            )?));
        }
        Err(err) => debug!("no image on clipboard: {}", err),
    }

    match clipboard.get_text() {
        Ok(text) if !text.is_empty() => items.push(ClipboardItem::Text(text)),
        Ok(_) => {}
        Err(err) => debug!("no text on clipboard: {}", err),
    }

    if items.is_empty() {
        warn!("clipboard read returned nothing usable");
    }
    Ok(items)
}

pub fn encode_rgba_png(
    width: usize,
    height: usize,
    rgba: Cow<'_, [u8]>,
) -> Result<Bytes, AttachmentError> {
    let width = u32::try_from(width).map_err(|_| AttachmentError::Encode("width overflow".into()))?;
    let height =
        u32::try_from(height).map_err(|_| AttachmentError::Encode("height overflow".into()))?;
    let buffer = RgbaImage::from_raw(width, height, rgba.into_owned()).ok_or_else(|| {
        AttachmentError::Encode("pixel buffer does not match dimensions".to_owned())
    })?;

    let mut out = Cursor::new(Vec::new());
    buffer
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|err| AttachmentError::Encode(err.to_string()))?;
    Ok(Bytes::from(out.into_inner()))
}
