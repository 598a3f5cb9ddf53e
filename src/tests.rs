#[cfg(test)]
mod integration_tests {
    use crate::compose::{FontSpec, TextAlign, TextRenderer};
    use crate::delivery::{MockClipboardSink, Notifier};
    use crate::dom::{self, Document, NodeId, SharedDocument};
    use crate::rasterizer::{RasterizeOptions, Rasterizer, WorkingCopy};
    use crate::{
        notice_for, Activation, AssetFetcher, DirectoryDownloads, ExportConfig, ExportError,
        ExportMode, ExportOutcome, MenuState, ModuleParts, Notice, NoticeKind, RegionDiscovery,
        SharedScale, SnapshotModule,
    };
    use async_trait::async_trait;
    use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tiny_skia::{Color, Pixmap};
    use tokio::sync::Notify;

    const PAGE: &str = r#"<html class="theme--dark" style="--clr-background: #181818">
<head><title>Main Event</title></head>
<body>
<div class="mw-heading"><h2><span class="mw-headline">Playoffs</span><span class="mw-editsection">[edit]</span></h2></div>
<div class="brkts-bracket-wrapper"><div class="brkts-bracket" style="color: red;"><span class="brkts-match-info-icon">i</span>Final</div></div>
<h3>Groups</h3>
<div class="group-table"><div class="group-table-title">Group A</div></div>
<div style="display: none"><div class="group-table"><div class="group-table-title">Group B</div></div></div>
<h3>Hidden</h3>
<div class="collapsed"><div class="crosstable"><table><tbody><tr><td>x</td></tr></tbody></table></div></div>
</body>
</html>"#;

    /// Renders visible targets as a solid 200x100 block.
    struct FakeRasterizer {
        live: SharedDocument,
        visibility: RegionDiscovery,
        fail: bool,
        gate: Option<Arc<Notify>>,
        entered: Arc<Notify>,
        live_backgrounds: Mutex<Vec<Option<String>>>,
        overlays_hidden: Mutex<Vec<bool>>,
        loads: AtomicUsize,
        host_edit: Option<(&'static str, &'static str)>,
    }

    impl FakeRasterizer {
        fn new(live: SharedDocument) -> Self {
            Self {
                live,
                visibility: RegionDiscovery::new(&ExportConfig::default()).unwrap(),
                fail: false,
                gate: None,
                entered: Arc::new(Notify::new()),
                live_backgrounds: Mutex::new(Vec::new()),
                overlays_hidden: Mutex::new(Vec::new()),
                loads: AtomicUsize::new(0),
                host_edit: None,
            }
        }
    }

    #[async_trait]
    impl Rasterizer for FakeRasterizer {
        async fn ensure_loaded(&self) -> Result<(), ExportError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rasterize(
            &self,
            mut copy: WorkingCopy,
            mut options: RasterizeOptions,
        ) -> Result<RgbaImage, ExportError> {
            self.entered.notify_one();
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            // The host page keeps running while the capture is in flight
            if let Some((property, value)) = self.host_edit {
                dom::write(&self.live).set_inline_style(copy.target, property, Some(value));
            }

            if let Some(hook) = options.on_before_capture.take() {
                hook(&mut copy);
            }
            let icons = copy.document.select_within(copy.target, ".brkts-match-info-icon").unwrap();
            self.overlays_hidden
                .lock()
                .unwrap()
                .push(icons.iter().all(|&icon| copy.document.display(icon) == "none"));
            self.live_backgrounds
                .lock()
                .unwrap()
                .push(dom::read(&self.live).inline_style(copy.target, "background"));

            if self.fail {
                return Err(ExportError::ExportFailed("renderer crashed".to_string()));
            }
            if !self.visibility.is_visible(&copy.document, copy.target) {
                return Ok(RgbaImage::new(0, 0));
            }
            Ok(RgbaImage::from_pixel(200, 100, Rgba([40, 40, 40, 255])))
        }
    }

    struct PerChar(f32);

    impl TextRenderer for PerChar {
        fn measure(&self, text: &str, _font: &FontSpec) -> f32 {
            text.chars().count() as f32 * self.0
        }

        fn fill_text(&self, _: &mut Pixmap, _: &str, _: &FontSpec, _: f32, _: f32, _: TextAlign, _: Color) {}
    }

    struct StaticLogo;

    #[async_trait]
    impl AssetFetcher for StaticLogo {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, ExportError> {
            let mut bytes = Vec::new();
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 255])))
                .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
                .map_err(|e| ExportError::LoadError(e.to_string()))?;
            Ok(bytes)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<Notice>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notice: &Notice) {
            self.notices.lock().unwrap().push(notice.clone());
        }
    }

    struct Harness {
        module: SnapshotModule,
        document: SharedDocument,
        rasterizer: Arc<FakeRasterizer>,
        notifier: Arc<RecordingNotifier>,
        scale: SharedScale,
        _downloads: tempfile::TempDir,
    }

    impl Harness {
        fn node(&self, selector: &str) -> NodeId {
            dom::read(&self.document).select(selector).unwrap()[0]
        }

        fn style(&self, node: NodeId) -> Option<String> {
            dom::read(&self.document).attr(node, "style").map(str::to_string)
        }
    }

    fn clipboard_accepting() -> MockClipboardSink {
        let mut clipboard = MockClipboardSink::new();
        clipboard.expect_supports_images().return_const(true);
        clipboard.expect_write_image().returning(|_| Ok(()));
        clipboard
    }

    fn harness_with(
        clipboard: MockClipboardSink,
        configure: impl FnOnce(&mut FakeRasterizer),
    ) -> Harness {
        let document = dom::share(Document::parse(PAGE));
        let mut rasterizer = FakeRasterizer::new(document.clone());
        configure(&mut rasterizer);
        let rasterizer = Arc::new(rasterizer);

        let downloads = tempfile::tempdir().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let scale = SharedScale::new(1.0);
        let parts = ModuleParts {
            rasterizer: rasterizer.clone(),
            text: Arc::new(PerChar(5.0)),
            fetcher: Arc::new(StaticLogo),
            scale: Arc::new(scale.clone()),
            clipboard: Arc::new(clipboard),
            downloads: Arc::new(DirectoryDownloads::new(downloads.path())),
            notifier: notifier.clone(),
            page_title: None,
        };

        let module = SnapshotModule::new(&ExportConfig::default(), document.clone(), parts).unwrap();
        Harness {
            module,
            document,
            rasterizer,
            notifier,
            scale,
            _downloads: downloads,
        }
    }

    fn harness() -> Harness {
        harness_with(clipboard_accepting(), |_| {})
    }

    #[tokio::test]
    async fn test_init_groups_regions_and_mounts_menus_once() {
        let h = harness();
        let groups = h.module.init();

        let headings: Vec<&str> = groups.iter().map(|g| g.heading_text.as_str()).collect();
        assert_eq!(headings, vec!["Playoffs", "Groups", "Hidden"]);
        assert_eq!(groups[1].regions.len(), 2);
        assert_eq!(groups[1].regions[0].title.as_deref(), Some("Group A"));
        assert!(!groups[1].regions[1].visible);

        // The Playoffs menu sits on the .mw-heading wrapper
        let wrapper = h.node(".mw-heading");
        assert_eq!(groups[0].anchor, wrapper);
        assert_eq!(h.module.mounted_count(), 3);

        h.module.init();
        assert_eq!(h.module.mounted_count(), 3);
        assert_eq!(dom::read(&h.document).select(".dropdown-widget").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_copy_restores_background_and_hides_overlays_in_copy_only() {
        let mut clipboard = MockClipboardSink::new();
        clipboard.expect_supports_images().return_const(true);
        clipboard
            .expect_write_image()
            .withf(|image| image.width == 300 && image.height == 224)
            .times(1)
            .returning(|_| Ok(()));
        let h = harness_with(clipboard, |_| {});
        let groups = h.module.init();
        let bracket = h.node(".brkts-bracket");

        let state = h.module.menu().populate(&groups[0]);
        let actions = state.actions();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].label, "Copy image to clipboard");
        assert_eq!(actions[1].label, "Download as image");
        assert_eq!(actions[0].title, "Playoffs");

        let activation = h.module.menu().activate(&actions[0]).await;
        assert_eq!(
            activation,
            Activation::Completed(ExportOutcome::Copied { width: 300, height: 224 })
        );

        // Theme background was live only while capturing
        assert_eq!(
            h.rasterizer.live_backgrounds.lock().unwrap().as_slice(),
            &[Some("#181818".to_string())]
        );
        assert_eq!(h.style(bracket).as_deref(), Some("color: red;"));

        assert_eq!(h.rasterizer.overlays_hidden.lock().unwrap().as_slice(), &[true]);
        let icon = h.node(".brkts-match-info-icon");
        assert_ne!(dom::read(&h.document).display(icon), "none");

        let notices = h.notifier.notices.lock().unwrap();
        assert_eq!(notices.as_slice(), &[Notice::info("Image copied to clipboard!")]);
        assert_eq!(h.module.metrics().snapshot().exports_succeeded, 1);
        assert!(!h.module.exporter().is_exporting());
    }

    #[tokio::test]
    async fn test_hidden_region_is_not_exportable() {
        let h = harness();
        let groups = h.module.init();
        let hidden = &groups[2];

        assert_eq!(h.module.menu().populate(hidden), MenuState::ContentNotVisible);

        let crosstable = hidden.regions[0].element;
        let err = h
            .module
            .exporter()
            .export(crosstable, "Hidden", ExportMode::Copy)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::EmptyCapture { width: 0, height: 0 }));
        assert!(notice_for(&err).message.starts_with("The content is not visible"));
        assert_eq!(h.style(crosstable), None);
    }

    #[tokio::test]
    async fn test_partially_visible_group_lists_only_visible_regions() {
        let h = harness();
        let groups = h.module.init();

        let state = h.module.menu().populate(&groups[1]);
        let actions = state.actions();
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].label, "Copy image to clipboard");
        assert_eq!(actions[0].title, "Group A");

        // Expanding the hidden table is picked up on the next open
        let hidden_wrapper = dom::read(&h.document).parent(groups[1].regions[1].element).unwrap();
        dom::write(&h.document).set_inline_style(hidden_wrapper, "display", None);
        let state = h.module.menu().populate(&groups[1]);
        let labels: Vec<&str> = state.actions().iter().map(|a| a.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "Copy Group A image to clipboard",
                "Download Group A as image",
                "Copy Group B image to clipboard",
                "Download Group B as image",
            ]
        );
    }

    #[tokio::test]
    async fn test_second_export_rejected_while_first_in_flight() {
        let gate = Arc::new(Notify::new());
        let gate_for_rasterizer = gate.clone();
        let h = harness_with(clipboard_accepting(), move |r| r.gate = Some(gate_for_rasterizer));
        let groups = h.module.init();
        let bracket = groups[0].regions[0].element;

        let exporter = h.module.exporter().clone();
        let first = tokio::spawn(async move { exporter.export(bracket, "Playoffs", ExportMode::Copy).await });

        h.rasterizer.entered.notified().await;
        assert!(h.module.exporter().is_exporting());

        let second = h
            .module
            .exporter()
            .export(bracket, "Playoffs", ExportMode::Copy)
            .await;
        assert!(matches!(second, Err(ExportError::ExportInProgress)));

        let action = &h.module.menu().populate(&groups[0]).actions()[0].clone();
        assert_eq!(h.module.menu().activate(action).await, Activation::Ignored);

        gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, ExportOutcome::Copied { .. }));
        assert!(!h.module.exporter().is_exporting());

        let snapshot = h.module.metrics().snapshot();
        assert_eq!(snapshot.exports_started, 1);
        assert_eq!(snapshot.exports_rejected, 1);
        assert_eq!(h.rasterizer.live_backgrounds.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_host_style_edits_during_capture_survive_restore() {
        let h = harness_with(clipboard_accepting(), |r| r.host_edit = Some(("width", "640px")));
        let groups = h.module.init();
        let bracket = groups[0].regions[0].element;
        let action = h.module.menu().populate(&groups[0]).actions()[0].clone();

        let activation = h.module.menu().activate(&action).await;
        assert!(matches!(activation, Activation::Completed(ExportOutcome::Copied { .. })));

        let doc = dom::read(&h.document);
        assert_eq!(doc.inline_style(bracket, "width").as_deref(), Some("640px"));
        assert_eq!(doc.inline_style(bracket, "color").as_deref(), Some("red"));
        assert!(doc.inline_style(bracket, "background").is_none());
    }

    #[tokio::test]
    async fn test_rasterizer_failure_restores_background_and_releases_guard() {
        let h = harness_with(clipboard_accepting(), |r| r.fail = true);
        let groups = h.module.init();
        let bracket = groups[0].regions[0].element;
        let action = h.module.menu().populate(&groups[0]).actions()[0].clone();

        let activation = h.module.menu().activate(&action).await;
        assert_eq!(
            activation,
            Activation::Failed(Notice::error(crate::GENERIC_FAILURE_NOTICE))
        );
        assert_eq!(h.style(bracket).as_deref(), Some("color: red;"));
        assert!(!h.module.exporter().is_exporting());
        assert_eq!(h.module.metrics().snapshot().exports_failed, 1);

        let notices = h.notifier.notices.lock().unwrap();
        assert_eq!(notices[0].kind, NoticeKind::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zoom_change_requires_reload() {
        let mut clipboard = MockClipboardSink::new();
        clipboard.expect_supports_images().return_const(true);
        clipboard.expect_write_image().never();
        let h = harness_with(clipboard, |_| {});
        let groups = h.module.init();

        h.scale.set(1.25);
        h.module.zoom().notify_resize();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(h.module.zoom().has_changed());

        assert_eq!(h.module.menu().populate(&groups[0]), MenuState::ReloadRequired);

        let err = h
            .module
            .exporter()
            .export(groups[0].regions[0].element, "Playoffs", ExportMode::Copy)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::ReloadRequired));
        assert!(notice_for(&err).message.contains("reload"));
        assert_eq!(h.rasterizer.loads.load(Ordering::SeqCst), 0);
        assert!(!h.module.exporter().is_exporting());
    }

    #[tokio::test]
    async fn test_download_writes_timestamped_png_and_revokes_url() {
        let h = harness();
        let groups = h.module.init();
        let action = h.module.menu().populate(&groups[1]).actions()[1].clone();
        assert_eq!(action.mode, ExportMode::Download);

        let activation = h.module.menu().activate(&action).await;
        let Activation::Completed(ExportOutcome::Downloaded { path, filename }) = activation else {
            panic!("expected a download, got {:?}", activation);
        };

        assert!(filename.starts_with("Liquipedia Main Event Group A "));
        assert!(filename.ends_with(".png"));
        let stem = filename.trim_end_matches(".png");
        let timestamp = stem.rsplit(' ').next().unwrap();
        assert_eq!(timestamp.len(), "YYYYMMDD_HHMMSS".len());
        assert_eq!(&timestamp[8..9], "_");

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
        assert!(h.notifier.notices.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(h.module.exporter().object_urls().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_clipboard_is_a_notice_not_a_failure() {
        let mut clipboard = MockClipboardSink::new();
        clipboard.expect_supports_images().return_const(false);
        clipboard.expect_write_image().never();
        let h = harness_with(clipboard, |_| {});
        let groups = h.module.init();
        let action = h.module.menu().populate(&groups[0]).actions()[0].clone();

        let activation = h.module.menu().activate(&action).await;
        assert_eq!(activation, Activation::Completed(ExportOutcome::ClipboardUnsupported));

        let notices = h.notifier.notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::Info);
        assert_eq!(h.module.metrics().snapshot().exports_succeeded, 1);
    }

    #[tokio::test]
    async fn test_clipboard_write_error_maps_to_permission_notice() {
        let mut clipboard = MockClipboardSink::new();
        clipboard.expect_supports_images().return_const(true);
        clipboard
            .expect_write_image()
            .returning(|_| Err(ExportError::ClipboardWriteError("denied".to_string())));
        let h = harness_with(clipboard, |_| {});
        let groups = h.module.init();
        let action = h.module.menu().populate(&groups[0]).actions()[0].clone();

        let activation = h.module.menu().activate(&action).await;
        assert_eq!(
            activation,
            Activation::Failed(Notice::error(
                "Clipboard access denied. Please check your browser permissions."
            ))
        );
    }

    #[tokio::test]
    async fn test_detached_region_fails_without_touching_document() {
        let h = harness();
        let groups = h.module.init();
        let bracket = groups[0].regions[0].element;
        let wrapper = h.node(".brkts-bracket-wrapper");
        dom::write(&h.document).detach(wrapper);

        let err = h
            .module
            .exporter()
            .export(bracket, "Playoffs", ExportMode::Copy)
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::ExportFailed(_)));
        assert_eq!(h.style(bracket).as_deref(), Some("color: red;"));
        assert!(h.rasterizer.live_backgrounds.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_teardown_releases_session_state() {
        let h = harness();
        let groups = h.module.init();
        let action = h.module.menu().populate(&groups[0]).actions()[0].clone();
        h.module.menu().activate(&action).await;
        assert_eq!(h.module.image_cache().len(), 1);

        h.module.teardown();
        assert!(h.module.image_cache().is_empty());
        assert_eq!(h.module.mounted_count(), 0);
        assert!(dom::read(&h.document).select(".dropdown-widget").unwrap().is_empty());
        assert!(!h.module.exporter().is_exporting());
    }
}
