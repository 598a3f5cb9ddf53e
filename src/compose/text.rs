use super::paint::blend_pixel;
use crate::config::FontSettings;
use crate::ExportError;
use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use std::path::{Path, PathBuf};
use tiny_skia::{Color, Pixmap};

const SYSTEM_FONT_DIRS: &[&str] = &[
    "/usr/share/fonts/truetype/open-sans",
    "/usr/share/fonts/opentype/open-sans",
    "/usr/share/fonts/truetype/dejavu",
    "/usr/share/fonts/truetype/liberation",
    "/usr/share/fonts/TTF",
    "/Library/Fonts",
    "C:\\Windows\\Fonts",
];

const REGULAR_FILES: &[&str] = &[
    "OpenSans-Regular.ttf",
    "DejaVuSans.ttf",
    "LiberationSans-Regular.ttf",
    "Arial.ttf",
    "arial.ttf",
];

const BOLD_FILES: &[&str] = &[
    "OpenSans-Bold.ttf",
    "DejaVuSans-Bold.ttf",
    "LiberationSans-Bold.ttf",
    "Arial Bold.ttf",
    "arialbd.ttf",
];

/// A CSS font shorthand such as `bold 14px Open Sans, sans-serif`.
///
/// Only the pixel size is interpreted for scaling; everything before it
/// (style, weight) and after it (family list) is carried through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct FontSpec {
    prefix: Vec<String>,
    size_px: f32,
    family: String,
}

impl FontSpec {
    pub fn parse(spec: &str) -> Result<Self, ExportError> {
        let tokens: Vec<&str> = spec.split_whitespace().collect();
        let position = tokens
            .iter()
            .position(|t| t.strip_suffix("px").and_then(|n| n.parse::<f32>().ok()).is_some())
            .ok_or_else(|| ExportError::ConfigurationError(format!("font has no px size: {}", spec)))?;

        let size_px = tokens[position]
            .trim_end_matches("px")
            .parse::<f32>()
            .map_err(|e| ExportError::ConfigurationError(e.to_string()))?;

        Ok(Self {
            prefix: tokens[..position].iter().map(|t| t.to_string()).collect(),
            size_px,
            family: tokens[position + 1..].join(" "),
        })
    }

    pub fn size_px(&self) -> f32 {
        self.size_px
    }

    /// Numeric weight: `bold` is 700, a number is taken as is, default 400.
    pub fn weight(&self) -> u16 {
        self.prefix
            .iter()
            .find_map(|t| match t.as_str() {
                "bold" | "bolder" => Some(700),
                "normal" => Some(400),
                other => other.parse::<u16>().ok(),
            })
            .unwrap_or(400)
    }

    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            size_px: self.size_px * factor,
            ..self.clone()
        }
    }

    pub fn to_css(&self) -> String {
        let mut parts = self.prefix.clone();
        parts.push(format!("{}px", self.size_px));
        if !self.family.is_empty() {
            parts.push(self.family.clone());
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlign {
    Left,
    Right,
}

/// Measures and draws single-line text with a middle baseline.
pub trait TextRenderer: Send + Sync {
    fn measure(&self, text: &str, font: &FontSpec) -> f32;

    /// Draw `text` so that its anchor edge sits at `x` and its vertical middle
    /// at `y`.
    fn fill_text(
        &self,
        canvas: &mut Pixmap,
        text: &str,
        font: &FontSpec,
        x: f32,
        y: f32,
        align: TextAlign,
        color: Color,
    );
}

/// [`TextRenderer`] backed by TrueType/OpenType fonts through ab_glyph.
pub struct GlyphRenderer {
    regular: FontVec,
    bold: Option<FontVec>,
}

impl GlyphRenderer {
    pub fn new(regular: FontVec, bold: Option<FontVec>) -> Self {
        Self { regular, bold }
    }

    /// Load the configured font files, falling back to well-known system
    /// font locations.
    pub fn from_settings(settings: &FontSettings) -> Result<Self, ExportError> {
        let regular_path = settings
            .regular_path
            .clone()
            .or_else(|| find_system_font(REGULAR_FILES))
            .ok_or_else(|| {
                ExportError::ConfigurationError(
                    "no regular font configured and none found on the system".to_string(),
                )
            })?;
        let bold_path = settings
            .bold_path
            .clone()
            .or_else(|| find_system_font(BOLD_FILES));

        let regular = load_font(&regular_path)?;
        let bold = bold_path.as_deref().map(load_font).transpose()?;
        Ok(Self::new(regular, bold))
    }

    fn face(&self, font: &FontSpec) -> &FontVec {
        match &self.bold {
            Some(bold) if font.weight() >= 600 => bold,
            _ => &self.regular,
        }
    }
}

fn find_system_font(names: &[&str]) -> Option<PathBuf> {
    SYSTEM_FONT_DIRS
        .iter()
        .flat_map(|dir| names.iter().map(move |name| Path::new(dir).join(name)))
        .find(|path| path.is_file())
}

fn load_font(path: &Path) -> Result<FontVec, ExportError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ExportError::ConfigurationError(format!("{}: {}", path.display(), e)))?;
    FontVec::try_from_vec(bytes)
        .map_err(|e| ExportError::ConfigurationError(format!("{}: {}", path.display(), e)))
}

/// CSS sizes are em sizes; ab_glyph scales by ascent-to-descent height.
fn px_scale(face: &FontVec, size_px: f32) -> PxScale {
    let units_per_em = face.units_per_em().unwrap_or(1000.0);
    PxScale::from(size_px * face.height_unscaled() / units_per_em)
}

impl TextRenderer for GlyphRenderer {
    fn measure(&self, text: &str, font: &FontSpec) -> f32 {
        let face = self.face(font);
        let scaled = face.as_scaled(px_scale(face, font.size_px()));
        let mut width = 0.0;
        let mut previous = None;
        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = previous {
                width += scaled.kern(prev, id);
            }
            width += scaled.h_advance(id);
            previous = Some(id);
        }
        width
    }

    fn fill_text(
        &self,
        canvas: &mut Pixmap,
        text: &str,
        font: &FontSpec,
        x: f32,
        y: f32,
        align: TextAlign,
        color: Color,
    ) {
        let face = self.face(font);
        let scale = px_scale(face, font.size_px());
        let scaled = face.as_scaled(scale);
        let baseline = y + (scaled.ascent() + scaled.descent()) / 2.0;
        let mut cursor = match align {
            TextAlign::Left => x,
            TextAlign::Right => x - self.measure(text, font),
        };

        let mut previous = None;
        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = previous {
                cursor += scaled.kern(prev, id);
            }
            let glyph = id.with_scale_and_position(scale, ab_glyph::point(cursor, baseline));
            if let Some(outlined) = face.outline_glyph(glyph) {
                let bounds = outlined.px_bounds();
                outlined.draw(|gx, gy, coverage| {
                    blend_pixel(
                        canvas,
                        bounds.min.x as i32 + gx as i32,
                        bounds.min.y as i32 + gy as i32,
                        color,
                        coverage,
                    );
                });
            }
            cursor += scaled.h_advance(id);
            previous = Some(id);
        }
    }
}
