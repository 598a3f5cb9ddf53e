//! DOM-to-bitmap rasterization capability.
//!
//! The exporter never renders pixels itself. It hands a [`WorkingCopy`] of the
//! document to a [`Rasterizer`], which may mutate that copy freely before
//! sampling. The live document is never touched by the rasterizer.

use crate::dom::{Document, NodeId, Selector};
use crate::ExportError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::Page;
use futures::StreamExt;
use image::RgbaImage;
use std::fmt;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const TARGET_MARKER: &str = "data-snapshot-target";

/// Disposable copy of the document with the capture target marked.
#[derive(Debug, Clone)]
pub struct WorkingCopy {
    pub document: Document,
    pub target: NodeId,
}

impl WorkingCopy {
    pub fn new(document: Document, target: NodeId) -> Self {
        Self { document, target }
    }

    /// Hide every element under the target that matches one of `selectors`.
    pub fn hide_within(&mut self, selectors: &[Selector]) -> usize {
        let mut hidden = 0;
        for selector in selectors {
            for node in self.document.select_compiled(self.target, selector) {
                self.document.set_inline_style(node, "display", Some("none"));
                hidden += 1;
            }
        }
        hidden
    }
}

/// Hook run on the working copy right before pixels are sampled.
pub type BeforeCapture = Box<dyn FnOnce(&mut WorkingCopy) + Send + Sync>;

pub struct RasterizeOptions {
    /// Device pixel ratio.
    pub scale: f64,
    pub viewport_width: u32,
    /// `None` means the full scroll height of the page.
    pub viewport_height: Option<u32>,
    pub background_color: String,
    pub on_before_capture: Option<BeforeCapture>,
}

impl fmt::Debug for RasterizeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterizeOptions")
            .field("scale", &self.scale)
            .field("viewport_width", &self.viewport_width)
            .field("viewport_height", &self.viewport_height)
            .field("background_color", &self.background_color)
            .field("on_before_capture", &self.on_before_capture.is_some())
            .finish()
    }
}

#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Prepare the capability. Idempotent.
    async fn ensure_loaded(&self) -> Result<(), ExportError>;

    /// Render the copy's target element. A target with no box yields a 0x0
    /// image.
    async fn rasterize(
        &self,
        copy: WorkingCopy,
        options: RasterizeOptions,
    ) -> Result<RgbaImage, ExportError>;
}

/// Settings for the headless Chrome rasterizer.
#[derive(Debug, Clone)]
pub struct ChromeSettings {
    pub chrome_path: Option<String>,
    pub timeout: Duration,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for ChromeSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            timeout: Duration::from_secs(30),
            window_width: 1280,
            window_height: 720,
        }
    }
}

struct ChromeSession {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Renders working copies in one lazily launched headless Chrome.
pub struct ChromeRasterizer {
    settings: ChromeSettings,
    session: OnceCell<ChromeSession>,
}

impl ChromeRasterizer {
    pub fn new(settings: ChromeSettings) -> Self {
        Self {
            settings,
            session: OnceCell::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.session.initialized()
    }

    fn browser_config(&self) -> Result<BrowserConfig, ExportError> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.settings.window_width, self.settings.window_height)
            .args(vec![
                "--no-sandbox",
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--hide-scrollbars",
                "--no-first-run",
            ]);

        if let Some(chrome_path) = &self.settings.chrome_path {
            builder = builder.chrome_executable(chrome_path);
        }

        builder
            .build()
            .map_err(|e| ExportError::ExportFailed(format!("invalid browser config: {}", e)))
    }

    async fn launch(&self) -> Result<ChromeSession, ExportError> {
        let config = self.browser_config()?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ExportError::ExportFailed(format!("browser launch failed: {}", e)))?;

        // The handler is a stream that must be polled for the browser to make progress
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::error!("Browser handler error: {}", e);
                    break;
                }
            }
            debug!("Browser handler stream ended");
        });

        info!("Headless browser launched for rasterization");
        Ok(ChromeSession {
            browser: Mutex::new(browser),
            handler,
        })
    }

    async fn session(&self) -> Result<&ChromeSession, ExportError> {
        self.session.get_or_try_init(|| self.launch()).await
    }

    async fn capture(&self, page: &Page, options: &RasterizeOptions) -> Result<RgbaImage, ExportError> {
        let page_error = |e: chromiumoxide::error::CdpError| ExportError::ExportFailed(e.to_string());

        let height = match options.viewport_height {
            Some(height) => height,
            None => page
                .evaluate("document.documentElement.scrollHeight")
                .await
                .map_err(page_error)?
                .into_value::<f64>()
                .map_err(|e| ExportError::ExportFailed(e.to_string()))?
                .ceil() as u32,
        };

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(options.viewport_width)
            .height(height.max(1))
            .device_scale_factor(options.scale)
            .mobile(false)
            .build()
            .map_err(ExportError::ExportFailed)?;
        page.execute(metrics).await.map_err(page_error)?;

        let element = page
            .find_element(format!("[{}]", TARGET_MARKER))
            .await
            .map_err(page_error)?;
        // Chrome reports no box model at all for undisplayed elements
        let has_box = match element.bounding_box().await {
            Ok(bounds) => bounds.width > 0.0 && bounds.height > 0.0,
            Err(e) => {
                debug!("No box model for capture target: {}", e);
                false
            }
        };
        if !has_box {
            return Ok(RgbaImage::new(0, 0));
        }

        let png = element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(page_error)?;
        let decoded = image::load_from_memory(&png)
            .map_err(|e| ExportError::ExportFailed(format!("unreadable capture: {}", e)))?;
        Ok(decoded.to_rgba8())
    }
}

#[async_trait]
impl Rasterizer for ChromeRasterizer {
    async fn ensure_loaded(&self) -> Result<(), ExportError> {
        self.session().await.map(|_| ())
    }

    async fn rasterize(
        &self,
        mut copy: WorkingCopy,
        mut options: RasterizeOptions,
    ) -> Result<RgbaImage, ExportError> {
        if let Some(hook) = options.on_before_capture.take() {
            hook(&mut copy);
        }
        copy.document.set_attr(copy.target, TARGET_MARKER, "");
        copy.document
            .set_inline_style(copy.target, "background", Some(&options.background_color));
        let html = copy.document.to_html();

        let session = self.session().await?;
        let browser = session.browser.lock().await;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ExportError::ExportFailed(e.to_string()))?;

        let result = match timeout(self.settings.timeout, async {
            page.set_content(html)
                .await
                .map_err(|e| ExportError::ExportFailed(e.to_string()))?;
            self.capture(&page, &options).await
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExportError::ExportFailed(format!(
                "rasterization timeout after {:?}",
                self.settings.timeout
            ))),
        };

        if let Err(e) = page.close().await {
            warn!("Failed to close capture page: {}", e);
        }
        result
    }
}
