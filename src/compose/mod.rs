//! Branded image composition.
//!
//! A captured region is framed by a gradient header carrying the page and
//! section titles and a footer carrying the branding line and logo. All
//! lengths and font sizes are multiplied by the capture scale so the frame
//! matches the device pixel density of the content.

mod layout;
mod paint;
mod text;

pub use layout::{
    calculate_header_layout, canvas_height, canvas_width, stacked_start_y, wrap_text, HeaderLayout,
};
pub use paint::{parse_color, pixmap_to_rgba, rgba_to_pixmap, rounded_rect_path};
pub use text::{FontSpec, GlyphRenderer, TextAlign, TextRenderer};

use crate::config::{Branding, Dimensions, ExportConfig, LogoSettings, Palette};
use crate::{ExportError, ImageCache, Metrics};
use image::RgbaImage;
use paint::{draw_image, fill_horizontal_gradient};
use std::sync::Arc;
use std::time::Duration;
use tiny_skia::{Color, Pixmap};
use tracing::{debug, warn};

struct Fonts {
    header: FontSpec,
    subheader: FontSpec,
    footer: FontSpec,
}

/// Dimensions, fonts and spacing at one capture scale.
struct Frame {
    dims: Dimensions,
    fonts: Fonts,
    letter_spacing: f32,
}

struct ThemePaint {
    background: Color,
    header_start: Color,
    header_end: Color,
    footer_start: Color,
    footer_end: Color,
    text: Color,
    header_text: Color,
}

impl ThemePaint {
    fn resolve(palette: &Palette, dark: bool) -> Result<Self, ExportError> {
        let theme = palette.for_theme(dark);
        Ok(Self {
            background: parse_color(&theme.background)?,
            header_start: parse_color(&theme.header_start)?,
            header_end: parse_color(&theme.header_end)?,
            footer_start: parse_color(&theme.footer_start)?,
            footer_end: parse_color(&theme.footer_end)?,
            text: parse_color(&theme.text)?,
            header_text: parse_color(&palette.header_text)?,
        })
    }
}

/// Composes the final export image around a captured bitmap.
pub struct CanvasComposer {
    dimensions: Dimensions,
    fonts: Fonts,
    palette: Palette,
    logos: LogoSettings,
    branding: Branding,
    logo_timeout: Duration,
    text: Arc<dyn TextRenderer>,
    images: Arc<ImageCache>,
    metrics: Arc<Metrics>,
}

impl CanvasComposer {
    pub fn new(
        config: &ExportConfig,
        text: Arc<dyn TextRenderer>,
        images: Arc<ImageCache>,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ExportError> {
        // Fail on bad colors at construction instead of mid-export
        ThemePaint::resolve(&config.palette, true)?;
        ThemePaint::resolve(&config.palette, false)?;

        Ok(Self {
            dimensions: config.dimensions.clone(),
            fonts: Fonts {
                header: FontSpec::parse(&config.fonts.header)?,
                subheader: FontSpec::parse(&config.fonts.subheader)?,
                footer: FontSpec::parse(&config.fonts.footer)?,
            },
            palette: config.palette.clone(),
            logos: config.logos.clone(),
            branding: config.branding.clone(),
            logo_timeout: config.image_load_timeout,
            text,
            images,
            metrics,
        })
    }

    fn frame(&self, scale: f32) -> Frame {
        Frame {
            dims: self.dimensions.scaled(scale),
            fonts: Fonts {
                header: self.fonts.header.scaled(scale),
                subheader: self.fonts.subheader.scaled(scale),
                footer: self.fonts.footer.scaled(scale),
            },
            letter_spacing: self.branding.letter_spacing * scale,
        }
    }

    /// Header layout the composer would use for these inputs.
    pub fn header_layout(
        &self,
        source_width: u32,
        main_title: &str,
        section_title: &str,
        scale: f32,
    ) -> HeaderLayout {
        let frame = self.frame(scale);
        calculate_header_layout(
            self.text.as_ref(),
            &frame.dims,
            &frame.fonts.header,
            &frame.fonts.subheader,
            canvas_width(&frame.dims, source_width as f32),
            main_title,
            section_title,
        )
    }

    pub async fn compose(
        &self,
        source: &RgbaImage,
        main_title: &str,
        section_title: &str,
        dark: bool,
        scale: f32,
    ) -> Result<RgbaImage, ExportError> {
        if source.width() == 0 || source.height() == 0 {
            return Err(ExportError::EmptyCapture {
                width: source.width(),
                height: source.height(),
            });
        }

        let frame = self.frame(scale);
        let dims = &frame.dims;
        let theme = ThemePaint::resolve(&self.palette, dark)?;

        let width = canvas_width(dims, source.width() as f32);
        let layout = calculate_header_layout(
            self.text.as_ref(),
            dims,
            &frame.fonts.header,
            &frame.fonts.subheader,
            width,
            main_title,
            section_title,
        );
        let height = canvas_height(dims, source.height() as f32, layout.height);

        let mut canvas = Pixmap::new(width.ceil() as u32, height.ceil() as u32).ok_or_else(|| {
            ExportError::ExportFailed(format!("cannot allocate {}x{} canvas", width, height))
        })?;
        debug!(
            "Composing {}x{} canvas ({} header)",
            canvas.width(),
            canvas.height(),
            if layout.is_stacked { "stacked" } else { "side-by-side" }
        );

        canvas.fill(theme.background);
        self.draw_header(&mut canvas, &frame, &theme, &layout, width);
        draw_image(
            &mut canvas,
            source,
            dims.padding,
            dims.padding + layout.height + dims.padding,
            None,
        )?;

        let footer_y = dims.padding + layout.height + dims.padding + source.height() as f32 + dims.padding;
        self.draw_footer(&mut canvas, &frame, &theme, width, footer_y);

        if let Err(e) = self.draw_logo(&mut canvas, dims, footer_y, dark).await {
            warn!("Logo rendering failed: {}", e);
            self.metrics.record_logo_failure();
        }

        Ok(pixmap_to_rgba(&canvas))
    }

    fn draw_header(
        &self,
        canvas: &mut Pixmap,
        frame: &Frame,
        theme: &ThemePaint,
        layout: &HeaderLayout,
        width: f32,
    ) {
        let (dims, fonts) = (&frame.dims, &frame.fonts);
        if let Some(path) = rounded_rect_path(
            dims.padding,
            dims.padding,
            width - dims.padding * 2.0,
            layout.height,
            dims.border_radius,
        ) {
            fill_horizontal_gradient(
                canvas,
                &path,
                dims.padding,
                width - dims.padding,
                theme.header_start,
                theme.header_end,
            );
        }

        let text_x = dims.padding + dims.header_text_offset;
        if layout.is_stacked {
            let mut y = stacked_start_y(dims, layout);
            let lines = layout
                .main_title_lines
                .iter()
                .map(|line| (line, &fonts.header))
                .chain(layout.section_title_lines.iter().map(|line| (line, &fonts.subheader)));
            for (line, font) in lines {
                self.text
                    .fill_text(canvas, line, font, text_x, y, TextAlign::Left, theme.header_text);
                y += dims.line_height;
            }
        } else {
            let middle = dims.padding + layout.height / 2.0;
            if let Some(main) = layout.main_title_lines.first() {
                self.text
                    .fill_text(canvas, main, &fonts.header, text_x, middle, TextAlign::Left, theme.header_text);
            }
            if let Some(section) = layout.section_title_lines.first() {
                self.text.fill_text(
                    canvas,
                    section,
                    &fonts.subheader,
                    width - dims.padding - dims.header_text_offset,
                    middle,
                    TextAlign::Right,
                    theme.header_text,
                );
            }
        }
    }

    fn draw_footer(
        &self,
        canvas: &mut Pixmap,
        frame: &Frame,
        theme: &ThemePaint,
        width: f32,
        footer_y: f32,
    ) {
        let (dims, fonts) = (&frame.dims, &frame.fonts);
        if let Some(path) = rounded_rect_path(
            dims.padding,
            footer_y,
            width - dims.padding * 2.0,
            dims.footer_height,
            dims.border_radius,
        ) {
            fill_horizontal_gradient(
                canvas,
                &path,
                dims.padding,
                width - dims.padding,
                theme.footer_start,
                theme.footer_end,
            );
        }

        // Letter spacing is applied by hand, one glyph at a time
        let y = footer_y + dims.footer_height / 2.0;
        let mut cursor = dims.padding + dims.text_offset_x;
        let mut buf = [0u8; 4];
        for c in self.branding.text.chars() {
            let glyph = c.encode_utf8(&mut buf);
            self.text
                .fill_text(canvas, glyph, &fonts.footer, cursor, y, TextAlign::Left, theme.text);
            cursor += self.text.measure(glyph, &fonts.footer) + frame.letter_spacing;
        }
    }

    async fn draw_logo(
        &self,
        canvas: &mut Pixmap,
        dims: &Dimensions,
        footer_y: f32,
        dark: bool,
    ) -> Result<(), ExportError> {
        let (url, key) = self.logos.for_theme(dark);
        let logo = self.images.load(url, key, self.logo_timeout).await?;
        let size = (
            dims.logo_width.round() as u32,
            dims.logo_height.round() as u32,
        );
        draw_image(
            canvas,
            &logo,
            dims.padding + dims.logo_offset_x,
            footer_y + (dims.footer_height - dims.logo_height) / 2.0,
            Some(size),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_cache::AssetFetcher;
    use async_trait::async_trait;
    use image::Rgba;

    struct PerChar(f32);

    impl TextRenderer for PerChar {
        fn measure(&self, text: &str, _font: &FontSpec) -> f32 {
            text.chars().count() as f32 * self.0
        }

        fn fill_text(&self, _: &mut Pixmap, _: &str, _: &FontSpec, _: f32, _: f32, _: TextAlign, _: Color) {}
    }

    struct Unreachable;

    #[async_trait]
    impl AssetFetcher for Unreachable {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>, ExportError> {
            Err(ExportError::LoadError(url.to_string()))
        }
    }

    fn composer(per_char: f32) -> (CanvasComposer, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let cache = Arc::new(ImageCache::new(Arc::new(Unreachable), metrics.clone()));
        let composer = CanvasComposer::new(
            &ExportConfig::default(),
            Arc::new(PerChar(per_char)),
            cache,
            metrics.clone(),
        )
        .unwrap();
        (composer, metrics)
    }

    #[tokio::test]
    async fn test_compose_dimensions_side_by_side() {
        let (composer, metrics) = composer(1.0);
        let source = RgbaImage::from_pixel(400, 200, Rgba([1, 2, 3, 255]));

        let output = composer.compose(&source, "Page", "Section", true, 1.0).await.unwrap();
        assert_eq!(output.width(), 424);
        assert_eq!(output.height(), 12 * 4 + 43 + 200 + 33);
        // Content is inset below the header
        assert_eq!(output.get_pixel(12, 12 + 43 + 12), &Rgba([1, 2, 3, 255]));
        // Logo failure does not fail the export
        assert_eq!(metrics.snapshot().logo_failures, 1);
    }

    #[tokio::test]
    async fn test_compose_dimensions_stacked() {
        let (composer, _) = composer(10.0);
        let source = RgbaImage::from_pixel(100, 50, Rgba([9, 9, 9, 255]));

        let layout = composer.header_layout(100, "Long Page Title", "Long Section Title", 1.0);
        assert!(layout.is_stacked);
        let output = composer
            .compose(&source, "Long Page Title", "Long Section Title", false, 1.0)
            .await
            .unwrap();
        assert_eq!(output.width(), 300);
        assert_eq!(output.height() as f32, 12.0 * 4.0 + layout.height + 50.0 + 33.0);
    }

    #[tokio::test]
    async fn test_compose_scales_frame() {
        let (composer, _) = composer(1.0);
        let source = RgbaImage::from_pixel(1000, 100, Rgba([5, 5, 5, 255]));
        let output = composer.compose(&source, "P", "S", true, 2.0).await.unwrap();
        assert_eq!(output.width(), 1048);
        assert_eq!(output.height(), 24 * 4 + 86 + 100 + 66);
    }

    #[tokio::test]
    async fn test_compose_rejects_empty_source() {
        let (composer, _) = composer(1.0);
        let source = RgbaImage::new(0, 10);
        let result = composer.compose(&source, "P", "S", true, 1.0).await;
        assert!(matches!(result, Err(ExportError::EmptyCapture { width: 0, height: 10 })));
    }
}
