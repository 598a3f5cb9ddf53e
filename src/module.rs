use crate::compose::{CanvasComposer, GlyphRenderer, TextRenderer};
use crate::config::ExportConfig;
use crate::delivery::{ClipboardSink, DirectoryDownloads, DownloadSink, Notifier, SystemClipboard, TracingNotifier};
use crate::discovery::{HeadingGroup, RegionDiscovery};
use crate::dom::{self, NodeId, SharedDocument};
use crate::export_service::{ExportGuard, Exporter, ExporterParts};
use crate::image_cache::{AssetFetcher, HttpFetcher, ImageCache};
use crate::menu::ExportMenu;
use crate::rasterizer::{ChromeRasterizer, ChromeSettings, Rasterizer};
use crate::zoom::{DisplayScale, FixedScale, ZoomManager};
use crate::{ExportError, Metrics};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

const WIDGET_CLASS: &str = "dropdown-widget";

/// Capabilities the module is assembled from.
pub struct ModuleParts {
    pub rasterizer: Arc<dyn Rasterizer>,
    pub text: Arc<dyn TextRenderer>,
    pub fetcher: Arc<dyn AssetFetcher>,
    pub scale: Arc<dyn DisplayScale>,
    pub clipboard: Arc<dyn ClipboardSink>,
    pub downloads: Arc<dyn DownloadSink>,
    pub notifier: Arc<dyn Notifier>,
    pub page_title: Option<String>,
}

impl ModuleParts {
    /// Headless Chrome, system fonts, the desktop clipboard and a downloads
    /// directory.
    pub fn desktop(config: &ExportConfig, timeout: Duration) -> Result<Self, ExportError> {
        let rasterizer = ChromeRasterizer::new(ChromeSettings {
            chrome_path: config.chrome_path.clone(),
            timeout,
            window_width: config.viewport_width,
            ..ChromeSettings::default()
        });

        Ok(Self {
            rasterizer: Arc::new(rasterizer),
            text: Arc::new(GlyphRenderer::from_settings(&config.fonts)?),
            fetcher: Arc::new(HttpFetcher::new()?),
            scale: Arc::new(FixedScale(config.device_scale_factor)),
            clipboard: Arc::new(SystemClipboard::new()),
            downloads: Arc::new(DirectoryDownloads::new(config.download.directory.clone())),
            notifier: Arc::new(TracingNotifier),
            page_title: None,
        })
    }
}

/// Owns every piece of exporter state for one page session.
pub struct SnapshotModule {
    document: SharedDocument,
    discovery: Arc<RegionDiscovery>,
    images: Arc<ImageCache>,
    guard: Arc<ExportGuard>,
    zoom: Arc<ZoomManager>,
    exporter: Arc<Exporter>,
    menu: ExportMenu,
    metrics: Arc<Metrics>,
    mounted: Mutex<Vec<NodeId>>,
}

impl SnapshotModule {
    /// Must be called from within a tokio runtime.
    pub fn new(config: &ExportConfig, document: SharedDocument, parts: ModuleParts) -> Result<Self, ExportError> {
        config.validate()?;

        let metrics = Arc::new(Metrics::new());
        let discovery = Arc::new(RegionDiscovery::new(config)?);
        let images = Arc::new(ImageCache::new(parts.fetcher, metrics.clone()));
        let composer = Arc::new(CanvasComposer::new(config, parts.text, images.clone(), metrics.clone())?);
        let zoom = Arc::new(ZoomManager::new(parts.scale.clone(), &config.zoom));
        let guard = Arc::new(ExportGuard::new());

        let mut exporter = Exporter::new(
            config,
            document.clone(),
            ExporterParts {
                rasterizer: parts.rasterizer,
                composer,
                zoom: zoom.clone(),
                scale: parts.scale,
                guard: guard.clone(),
                clipboard: parts.clipboard,
                downloads: parts.downloads,
                metrics: metrics.clone(),
            },
        )?;
        if let Some(title) = parts.page_title {
            exporter = exporter.with_page_title(title);
        }
        let exporter = Arc::new(exporter);
        let menu = ExportMenu::new(exporter.clone(), discovery.clone(), parts.notifier);

        Ok(Self {
            document,
            discovery,
            images,
            guard,
            zoom,
            exporter,
            menu,
            metrics,
            mounted: Mutex::new(Vec::new()),
        })
    }

    /// Discover regions and mount a menu placeholder on each group's anchor.
    /// Anchors that already carry a menu are left alone.
    pub fn init(&self) -> Vec<HeadingGroup> {
        let groups = {
            let document = dom::read(&self.document);
            self.discovery.find_exportable_elements(&document).into_vec()
        };

        let mut document = dom::write(&self.document);
        let mut mounted = self.mounted.lock().unwrap_or_else(PoisonError::into_inner);
        for group in &groups {
            let has_widget = document
                .descendants(group.anchor)
                .into_iter()
                .any(|node| document.has_class(node, WIDGET_CLASS));
            if has_widget {
                debug!("Menu already mounted for \"{}\"", group.heading_text);
                continue;
            }

            let widget = document.create_element(
                "div",
                vec![
                    ("class".to_string(), WIDGET_CLASS.to_string()),
                    ("data-heading".to_string(), group.heading_text.clone()),
                ],
            );
            document.append_child(group.anchor, widget);
            mounted.push(widget);
        }

        info!(
            "Snapshot export ready: {} headings, {} regions",
            groups.len(),
            groups.iter().map(|g| g.regions.len()).sum::<usize>()
        );
        groups
    }

    pub fn menu(&self) -> &ExportMenu {
        &self.menu
    }

    pub fn exporter(&self) -> &Arc<Exporter> {
        &self.exporter
    }

    pub fn discovery(&self) -> &RegionDiscovery {
        &self.discovery
    }

    pub fn image_cache(&self) -> &ImageCache {
        &self.images
    }

    pub fn zoom(&self) -> &ZoomManager {
        &self.zoom
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Number of menu placeholders this module added to the document.
    pub fn mounted_count(&self) -> usize {
        self.mounted.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Release session state: cached images, the export token, the zoom
    /// watcher and mounted menus.
    pub fn teardown(&self) {
        self.images.clear();
        self.guard.clear();
        self.zoom.stop();

        let widgets: Vec<NodeId> = self
            .mounted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let mut document = dom::write(&self.document);
        for widget in &widgets {
            document.detach(*widget);
        }
        info!("Snapshot export torn down, {} menus removed", widgets.len());
    }
}
