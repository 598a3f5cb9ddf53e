//! Delivery of encoded exports to the clipboard or a download location.

use crate::error::{Notice, NoticeKind};
use crate::utils::{sanitize_filename, truncate_chars};
use crate::ExportError;
use arboard::{Clipboard, ImageData};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use dashmap::DashMap;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbaImage};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

/// A composed export encoded as PNG.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

pub fn encode_png(image: &RgbaImage) -> Result<EncodedImage, ExportError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgba8,
    )?;

    if bytes.is_empty() {
        return Err(ExportError::EncodeError("encoder produced no data".to_string()));
    }

    Ok(EncodedImage {
        bytes: Arc::new(bytes),
        width: image.width(),
        height: image.height(),
    })
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClipboardSink: Send + Sync {
    /// Whether the platform can hold image data at all.
    fn supports_images(&self) -> bool;

    async fn write_image(&self, image: &EncodedImage) -> Result<(), ExportError>;
}

/// The desktop clipboard, through arboard.
pub struct SystemClipboard {
    available: bool,
}

impl SystemClipboard {
    pub fn new() -> Self {
        let available = match Clipboard::new() {
            Ok(_) => true,
            Err(e) => {
                debug!("System clipboard unavailable: {}", e);
                false
            }
        };
        Self { available }
    }
}

impl Default for SystemClipboard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClipboardSink for SystemClipboard {
    fn supports_images(&self) -> bool {
        self.available
    }

    async fn write_image(&self, image: &EncodedImage) -> Result<(), ExportError> {
        // arboard takes raw RGBA, so the PNG is decoded back once here
        let rgba = image::load_from_memory(&image.bytes)
            .map_err(|e| ExportError::ClipboardWriteError(e.to_string()))?
            .to_rgba8();
        let (width, height) = rgba.dimensions();

        tokio::task::spawn_blocking(move || {
            let mut clipboard =
                Clipboard::new().map_err(|e| ExportError::ClipboardWriteError(e.to_string()))?;
            clipboard
                .set_image(ImageData {
                    width: width as usize,
                    height: height as usize,
                    bytes: Cow::Owned(rgba.into_raw()),
                })
                .map_err(|e| ExportError::ClipboardWriteError(e.to_string()))
        })
        .await
        .map_err(|e| ExportError::ClipboardWriteError(e.to_string()))?
    }
}

/// A file save request pointing at a registered object URL.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub filename: String,
    pub url: String,
    pub data: Arc<Vec<u8>>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DownloadSink: Send + Sync {
    /// Save the request, returning where the file landed.
    async fn save(&self, request: &DownloadRequest) -> Result<PathBuf, ExportError>;
}

/// Saves downloads into one directory. An existing file is never
/// overwritten; a ` (n)` suffix is added instead.
pub struct DirectoryDownloads {
    directory: PathBuf,
}

impl DirectoryDownloads {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    async fn free_path(&self, filename: &str) -> PathBuf {
        let candidate = self.directory.join(filename);
        if tokio::fs::metadata(&candidate).await.is_err() {
            return candidate;
        }

        let (stem, extension) = match filename.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{}", ext)),
            None => (filename, String::new()),
        };
        let mut n = 1;
        loop {
            let candidate = self.directory.join(format!("{} ({}){}", stem, n, extension));
            if tokio::fs::metadata(&candidate).await.is_err() {
                return candidate;
            }
            n += 1;
        }
    }
}

#[async_trait]
impl DownloadSink for DirectoryDownloads {
    async fn save(&self, request: &DownloadRequest) -> Result<PathBuf, ExportError> {
        tokio::fs::create_dir_all(&self.directory).await?;
        let path = self.free_path(&request.filename).await;
        tokio::fs::write(&path, request.data.as_slice()).await?;
        info!("Saved {} ({} bytes) to {}", request.url, request.data.len(), path.display());
        Ok(path)
    }
}

/// Temporary `blob:` URLs for encoded exports.
#[derive(Clone, Default)]
pub struct ObjectUrls {
    entries: Arc<DashMap<String, Arc<Vec<u8>>>>,
}

impl ObjectUrls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, data: Arc<Vec<u8>>) -> String {
        let url = format!("blob:{}", Uuid::new_v4());
        self.entries.insert(url.clone(), data);
        url
    }

    pub fn resolve(&self, url: &str) -> Option<Arc<Vec<u8>>> {
        self.entries.get(url).map(|entry| entry.value().clone())
    }

    pub fn revoke(&self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    /// Revoke `url` once `grace` has passed.
    pub fn revoke_after(&self, url: String, grace: Duration) -> JoinHandle<()> {
        let urls = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if urls.revoke(&url) {
                debug!("Revoked {}", url);
            }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Download filename without extension:
/// `"{prefix} {page_title} {title} {YYYYMMDD_HHMMSS}"`, sanitized and cut to
/// `max_len` characters.
pub fn export_filename(
    prefix: &str,
    page_title: &str,
    title: &str,
    timestamp: NaiveDateTime,
    max_len: usize,
) -> String {
    let raw = format!(
        "{} {} {} {}",
        prefix,
        page_title,
        title,
        timestamp.format("%Y%m%d_%H%M%S")
    );
    truncate_chars(&sanitize_filename(&raw), max_len).trim().to_string()
}

/// Receives the user-facing outcome of an export.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: &Notice);
}

/// Writes notices to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: &Notice) {
        match notice.kind {
            NoticeKind::Info => info!("{}", notice.message),
            NoticeKind::Error => error!("{}", notice.message),
        }
    }
}
