use crate::compose::CanvasComposer;
use crate::config::ExportConfig;
use crate::delivery::{encode_png, export_filename, ClipboardSink, DownloadRequest, DownloadSink, ObjectUrls};
use crate::dom::{self, Document, NodeId, Selector, SharedDocument};
use crate::rasterizer::{RasterizeOptions, Rasterizer, WorkingCopy};
use crate::utils::{format_bytes, format_duration, normalize_whitespace};
use crate::zoom::{DisplayScale, ZoomManager};
use crate::{ExportError, Metrics, Notice};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const DEFAULT_BACKGROUND: &str = "#ffffff";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    Copy,
    Download,
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportMode::Copy => write!(f, "copy"),
            ExportMode::Download => write!(f, "download"),
        }
    }
}

impl FromStr for ExportMode {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "copy" => Ok(ExportMode::Copy),
            "download" => Ok(ExportMode::Download),
            other => Err(ExportError::ExportFailed(format!("Unknown export mode: {}", other))),
        }
    }
}

/// How a finished export was delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Copied { width: u32, height: u32 },
    Downloaded { path: PathBuf, filename: String },
    /// Copy requested on a platform without image clipboard support.
    ClipboardUnsupported,
}

impl ExportOutcome {
    /// Notice shown to the user, if any.
    pub fn notice(&self) -> Option<Notice> {
        match self {
            ExportOutcome::Copied { .. } => Some(Notice::info("Image copied to clipboard!")),
            ExportOutcome::Downloaded { .. } => None,
            ExportOutcome::ClipboardUnsupported => Some(Notice::info(
                "Copying images is not supported here. Use download instead.",
            )),
        }
    }
}

/// Page metadata read at export time.
#[derive(Debug, Clone, PartialEq)]
pub struct HostPage {
    pub dark_theme: bool,
    pub background_color: String,
    pub display_title: String,
}

impl HostPage {
    pub fn read(document: &Document, config: &ExportConfig, display_title: Option<&str>) -> Self {
        let root = document.root_element();

        let dark_theme = root
            .map(|root| document.has_class(root, &config.dark_theme_class))
            .unwrap_or(false);
        let background_color = root
            .and_then(|root| document.inline_style(root, &config.background_property))
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BACKGROUND.to_string());
        let display_title = match display_title {
            Some(title) => title.to_string(),
            None => document
                .title()
                .map(|title| normalize_whitespace(&title))
                .unwrap_or_default(),
        };

        Self {
            dark_theme,
            background_color,
            display_title,
        }
    }
}

/// Single-flight token for exports. Holds at most one id.
#[derive(Debug, Default)]
pub struct ExportGuard {
    active: Mutex<Option<Uuid>>,
}

impl ExportGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(self: &Arc<Self>) -> Result<ExportPermit, ExportError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            return Err(ExportError::ExportInProgress);
        }
        let id = Uuid::new_v4();
        *active = Some(id);
        Ok(ExportPermit {
            guard: self.clone(),
            id,
        })
    }

    pub fn active_count(&self) -> usize {
        usize::from(self.active.lock().unwrap_or_else(PoisonError::into_inner).is_some())
    }

    /// Drop any held token. A permit outstanding at this point releases
    /// nothing when it is dropped.
    pub fn clear(&self) {
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn release(&self, id: Uuid) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if *active == Some(id) {
            *active = None;
        }
    }
}

/// Held for the duration of one export; releases the guard on drop.
#[derive(Debug)]
pub struct ExportPermit {
    guard: Arc<ExportGuard>,
    id: Uuid,
}

impl ExportPermit {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for ExportPermit {
    fn drop(&mut self) {
        self.guard.release(self.id);
    }
}

/// Temporary background on a live element. Only the `background` property
/// is put back on [`restore`](Self::restore) or drop, whichever is first, so
/// other inline style changes made during capture survive.
pub struct BackgroundOverride {
    document: SharedDocument,
    element: NodeId,
    previous: Option<String>,
    had_style: bool,
    restored: bool,
}

impl BackgroundOverride {
    pub fn apply(document: &SharedDocument, element: NodeId, color: &str) -> Self {
        let mut doc = dom::write(document);
        let previous = doc.inline_style(element, "background");
        let had_style = doc.attr(element, "style").is_some();
        doc.set_inline_style(element, "background", Some(color));
        Self {
            document: document.clone(),
            element,
            previous,
            had_style,
            restored: false,
        }
    }

    pub fn restore(&mut self) {
        if self.restored {
            return;
        }
        self.restored = true;

        let mut doc = dom::write(&self.document);
        doc.set_inline_style(self.element, "background", self.previous.as_deref());
        // An element that had no style attribute gets none back once empty
        if !self.had_style && doc.attr(self.element, "style").is_some_and(|s| s.trim().is_empty()) {
            doc.remove_attr(self.element, "style");
        }
    }
}

impl Drop for BackgroundOverride {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Collaborators an [`Exporter`] drives.
pub struct ExporterParts {
    pub rasterizer: Arc<dyn Rasterizer>,
    pub composer: Arc<CanvasComposer>,
    pub zoom: Arc<ZoomManager>,
    pub scale: Arc<dyn DisplayScale>,
    pub guard: Arc<ExportGuard>,
    pub clipboard: Arc<dyn ClipboardSink>,
    pub downloads: Arc<dyn DownloadSink>,
    pub metrics: Arc<Metrics>,
}

/// Runs capture, composition, encoding and delivery for one region at a
/// time.
pub struct Exporter {
    config: ExportConfig,
    document: SharedDocument,
    hidden_in_capture: Arc<Vec<Selector>>,
    page_title: Option<String>,
    object_urls: ObjectUrls,
    rasterizer: Arc<dyn Rasterizer>,
    composer: Arc<CanvasComposer>,
    zoom: Arc<ZoomManager>,
    scale: Arc<dyn DisplayScale>,
    guard: Arc<ExportGuard>,
    clipboard: Arc<dyn ClipboardSink>,
    downloads: Arc<dyn DownloadSink>,
    metrics: Arc<Metrics>,
}

impl Exporter {
    pub fn new(config: &ExportConfig, document: SharedDocument, parts: ExporterParts) -> Result<Self, ExportError> {
        let hidden_in_capture = config
            .capture_hidden_selectors
            .iter()
            .map(|s| Selector::parse(s))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config: config.clone(),
            document,
            hidden_in_capture: Arc::new(hidden_in_capture),
            page_title: None,
            object_urls: ObjectUrls::new(),
            rasterizer: parts.rasterizer,
            composer: parts.composer,
            zoom: parts.zoom,
            scale: parts.scale,
            guard: parts.guard,
            clipboard: parts.clipboard,
            downloads: parts.downloads,
            metrics: parts.metrics,
        })
    }

    /// Localized page title. Without one the document `<title>` is used.
    pub fn with_page_title(mut self, title: impl Into<String>) -> Self {
        self.page_title = Some(title.into());
        self
    }

    pub fn is_exporting(&self) -> bool {
        self.guard.active_count() > 0
    }

    pub fn zoom_invalidated(&self) -> bool {
        self.zoom.has_changed()
    }

    pub fn object_urls(&self) -> &ObjectUrls {
        &self.object_urls
    }

    pub fn document(&self) -> &SharedDocument {
        &self.document
    }

    /// Export `element` under `title`. Fails fast with
    /// [`ExportError::ExportInProgress`] while another export runs.
    pub async fn export(&self, element: NodeId, title: &str, mode: ExportMode) -> Result<ExportOutcome, ExportError> {
        let permit = match self.guard.try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                self.metrics.record_rejected();
                warn!("Rejected {} export of \"{}\": {}", mode, title, e);
                return Err(e);
            }
        };

        if self.zoom.has_changed() {
            return Err(ExportError::ReloadRequired);
        }

        self.metrics.record_started();
        let start = Instant::now();
        info!("Starting {} export {} of \"{}\"", mode, permit.id(), title);

        let result = self.run(element, title, mode).await;
        let elapsed = start.elapsed();
        self.metrics.record_export(elapsed, result.is_ok());

        match &result {
            Ok(outcome) => info!(
                "Export {} finished in {}: {:?}",
                permit.id(),
                format_duration(elapsed),
                outcome
            ),
            Err(e) => error!("Export {} failed after {}: {}", permit.id(), format_duration(elapsed), e),
        }

        drop(permit);
        result
    }

    async fn run(&self, element: NodeId, title: &str, mode: ExportMode) -> Result<ExportOutcome, ExportError> {
        // Step 1: Make sure the rasterizer is ready
        self.rasterizer.ensure_loaded().await?;

        // Step 2: Read page state; the element may be gone by now
        let page = {
            let document = dom::read(&self.document);
            if !document.is_connected(element) || !document.is_element(element) {
                return Err(ExportError::ExportFailed(
                    "export target is no longer in the document".to_string(),
                ));
            }
            HostPage::read(&document, &self.config, self.page_title.as_deref())
        };

        // Step 3: Capture with the theme background applied
        let scale = self.scale.current();
        let mut background = BackgroundOverride::apply(&self.document, element, &page.background_color);
        let copy = WorkingCopy::new(dom::read(&self.document).clone(), element);

        let hidden = self.hidden_in_capture.clone();
        let options = RasterizeOptions {
            scale,
            viewport_width: self.config.viewport_width,
            viewport_height: None,
            background_color: page.background_color.clone(),
            on_before_capture: Some(Box::new(move |copy: &mut WorkingCopy| {
                let count = copy.hide_within(&hidden);
                debug!("Hid {} overlay elements in working copy", count);
            })),
        };

        let captured = self.rasterizer.rasterize(copy, options).await;
        background.restore();
        let captured = captured?;

        if captured.width() == 0 || captured.height() == 0 {
            return Err(ExportError::EmptyCapture {
                width: captured.width(),
                height: captured.height(),
            });
        }
        debug!("Captured {}x{} at scale {}", captured.width(), captured.height(), scale);

        // Step 4: Compose and encode
        let composed = self
            .composer
            .compose(&captured, &page.display_title, title, page.dark_theme, scale as f32)
            .await?;
        let encoded = encode_png(&composed)?;
        debug!("Encoded {}x{} export ({})", encoded.width, encoded.height, format_bytes(encoded.len()));

        // Step 5: Deliver
        match mode {
            ExportMode::Copy => {
                if !self.clipboard.supports_images() {
                    warn!("Clipboard image support unavailable, export not copied");
                    return Ok(ExportOutcome::ClipboardUnsupported);
                }
                self.clipboard.write_image(&encoded).await?;
                Ok(ExportOutcome::Copied {
                    width: encoded.width,
                    height: encoded.height,
                })
            }
            ExportMode::Download => {
                let filename = format!(
                    "{}.png",
                    export_filename(
                        &self.config.filename_prefix,
                        &page.display_title,
                        title,
                        Local::now().naive_local(),
                        self.config.download.max_filename_len,
                    )
                );
                let url = self.object_urls.create(encoded.bytes.clone());
                let request = DownloadRequest {
                    filename: filename.clone(),
                    url: url.clone(),
                    data: encoded.bytes.clone(),
                };

                let saved = self.downloads.save(&request).await;
                self.object_urls.revoke_after(url, self.revoke_grace());
                let path = saved?;
                Ok(ExportOutcome::Downloaded { path, filename })
            }
        }
    }

    fn revoke_grace(&self) -> Duration {
        self.config.download.revoke_grace
    }
}
