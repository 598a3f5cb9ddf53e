use super::text::{FontSpec, TextRenderer};
use crate::config::Dimensions;

/// Header arrangement for one export. Derived per call, never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderLayout {
    pub height: f32,
    pub is_stacked: bool,
    pub main_title_lines: Vec<String>,
    pub section_title_lines: Vec<String>,
}

impl HeaderLayout {
    pub fn line_count(&self) -> usize {
        self.main_title_lines.len() + self.section_title_lines.len()
    }
}

impl Dimensions {
    /// Every length multiplied by `factor`.
    pub fn scaled(&self, factor: f32) -> Dimensions {
        Dimensions {
            header_height: self.header_height * factor,
            footer_height: self.footer_height * factor,
            padding: self.padding * factor,
            border_radius: self.border_radius * factor,
            logo_width: self.logo_width * factor,
            logo_height: self.logo_height * factor,
            logo_offset_x: self.logo_offset_x * factor,
            text_offset_x: self.text_offset_x * factor,
            header_text_offset: self.header_text_offset * factor,
            min_width: self.min_width * factor,
            line_height: self.line_height * factor,
            stacked_padding: self.stacked_padding * factor,
        }
    }
}

/// Width of the composed canvas for a source of `source_width` pixels.
pub fn canvas_width(dims: &Dimensions, source_width: f32) -> f32 {
    (source_width + dims.padding * 2.0).max(dims.min_width)
}

/// Height of the composed canvas: four paddings around header, content and
/// footer.
pub fn canvas_height(dims: &Dimensions, source_height: f32, header_height: f32) -> f32 {
    dims.padding + header_height + dims.padding + source_height + dims.padding + dims.footer_height
        + dims.padding
}

/// Choose between side-by-side and stacked titles.
pub fn calculate_header_layout(
    text: &dyn TextRenderer,
    dims: &Dimensions,
    header_font: &FontSpec,
    subheader_font: &FontSpec,
    canvas_width: f32,
    main_title: &str,
    section_title: &str,
) -> HeaderLayout {
    let main_width = text.measure(main_title, header_font);
    let section_width = text.measure(section_title, subheader_font);

    let total_text_width = main_width + section_width + dims.header_text_offset * 2.0;
    let side_by_side_width = canvas_width - dims.padding * 2.0 - dims.text_offset_x;

    if total_text_width <= side_by_side_width {
        return HeaderLayout {
            height: dims.header_height,
            is_stacked: false,
            main_title_lines: vec![main_title.to_string()],
            section_title_lines: vec![section_title.to_string()],
        };
    }

    let wrap_width = canvas_width - dims.padding * 2.0 - dims.header_text_offset * 2.0;
    let main_title_lines = wrap_text(text, header_font, main_title, wrap_width);
    let section_title_lines = wrap_text(text, subheader_font, section_title, wrap_width);

    let lines = (main_title_lines.len() + section_title_lines.len()) as f32;
    let height = dims
        .header_height
        .max(lines * dims.line_height + dims.stacked_padding);

    HeaderLayout {
        height,
        is_stacked: true,
        main_title_lines,
        section_title_lines,
    }
}

/// Greedy word wrap on single spaces. A word wider than `max_width` gets a
/// line of its own rather than being split.
pub fn wrap_text(text: &dyn TextRenderer, font: &FontSpec, content: &str, max_width: f32) -> Vec<String> {
    let mut words = content.split(' ');
    let Some(first) = words.next() else {
        return Vec::new();
    };

    let mut lines = Vec::new();
    let mut current = first.to_string();
    for word in words {
        let candidate = format!("{} {}", current, word);
        if text.measure(&candidate, font) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    lines.push(current);
    lines
}

/// Vertical middle of the first stacked line.
pub fn stacked_start_y(dims: &Dimensions, layout: &HeaderLayout) -> f32 {
    let total = layout.line_count().max(1) as f32;
    dims.padding + (layout.height - (total - 1.0) * dims.line_height) / 2.0
}
