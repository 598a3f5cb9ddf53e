//! Drawing primitives over a tiny-skia pixmap.

use crate::ExportError;
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use tiny_skia::{
    Color, ColorU8, FillRule, GradientStop, LinearGradient, Paint, Path, PathBuilder, Pixmap,
    PixmapPaint, Point, PremultipliedColorU8, SpreadMode, Transform,
};

/// Parse `#rgb`, `#rrggbb`, `#rrggbbaa`, `rgb()`, `rgba()` or `transparent`.
pub fn parse_color(value: &str) -> Result<Color, ExportError> {
    let value = value.trim();
    let invalid = || ExportError::ConfigurationError(format!("invalid color: {}", value));

    if value.eq_ignore_ascii_case("transparent") {
        return Ok(Color::TRANSPARENT);
    }

    if let Some(hex) = value.strip_prefix('#') {
        let digits: Vec<u8> = hex
            .chars()
            .map(|c| c.to_digit(16).map(|d| d as u8))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(invalid)?;
        let [r, g, b, a] = match digits.as_slice() {
            [r, g, b] => [r * 17, g * 17, b * 17, 255],
            [r, g, b, a] => [r * 17, g * 17, b * 17, a * 17],
            [r1, r2, g1, g2, b1, b2] => [r1 * 16 + r2, g1 * 16 + g2, b1 * 16 + b2, 255],
            [r1, r2, g1, g2, b1, b2, a1, a2] => {
                [r1 * 16 + r2, g1 * 16 + g2, b1 * 16 + b2, a1 * 16 + a2]
            }
            _ => return Err(invalid()),
        };
        return Ok(Color::from_rgba8(r, g, b, a));
    }

    let inner = value
        .strip_prefix("rgba(")
        .or_else(|| value.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(invalid)?;
    let parts: Vec<&str> = inner
        .split(|c| c == ',' || c == '/' || c == ' ')
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() != 3 && parts.len() != 4 {
        return Err(invalid());
    }
    let channel = |p: &str| p.parse::<f32>().map(|v| v.clamp(0.0, 255.0) as u8).map_err(|_| invalid());
    let alpha = match parts.get(3) {
        Some(a) => a.parse::<f32>().map_err(|_| invalid())?.clamp(0.0, 1.0),
        None => 1.0,
    };
    Ok(Color::from_rgba8(
        channel(parts[0])?,
        channel(parts[1])?,
        channel(parts[2])?,
        (alpha * 255.0).round() as u8,
    ))
}

/// Rounded rectangle built from line and quadratic segments.
pub fn rounded_rect_path(x: f32, y: f32, width: f32, height: f32, radius: f32) -> Option<Path> {
    let radius = radius.min(width / 2.0).min(height / 2.0).max(0.0);
    let mut pb = PathBuilder::new();
    pb.move_to(x + radius, y);
    pb.line_to(x + width - radius, y);
    pb.quad_to(x + width, y, x + width, y + radius);
    pb.line_to(x + width, y + height - radius);
    pb.quad_to(x + width, y + height, x + width - radius, y + height);
    pb.line_to(x + radius, y + height);
    pb.quad_to(x, y + height, x, y + height - radius);
    pb.line_to(x, y + radius);
    pb.quad_to(x, y, x + radius, y);
    pb.close();
    pb.finish()
}

/// Fill a path with a horizontal gradient running from `x0` to `x1`.
pub fn fill_horizontal_gradient(
    canvas: &mut Pixmap,
    path: &Path,
    x0: f32,
    x1: f32,
    start: Color,
    end: Color,
) {
    let mut paint = Paint::default();
    paint.anti_alias = true;
    match LinearGradient::new(
        Point::from_xy(x0, 0.0),
        Point::from_xy(x1, 0.0),
        vec![GradientStop::new(0.0, start), GradientStop::new(1.0, end)],
        SpreadMode::Pad,
        Transform::identity(),
    ) {
        Some(shader) => paint.shader = shader,
        // Degenerate gradient (x0 == x1) paints the start color
        None => paint.set_color(start),
    }
    canvas.fill_path(path, &paint, FillRule::Winding, Transform::identity(), None);
}

/// Source-over blend of one pixel with coverage in `0.0..=1.0`.
pub fn blend_pixel(canvas: &mut Pixmap, x: i32, y: i32, color: Color, coverage: f32) {
    if x < 0 || y < 0 || x as u32 >= canvas.width() || y as u32 >= canvas.height() {
        return;
    }
    let index = y as usize * canvas.width() as usize + x as usize;
    let pixels = canvas.pixels_mut();
    let dst = pixels[index];

    let sa = color.alpha() * coverage.clamp(0.0, 1.0);
    let inv = 1.0 - sa;
    let a = (sa * 255.0 + dst.alpha() as f32 * inv).round().clamp(0.0, 255.0);
    let channel = |src: f32, dst: u8| (src * sa * 255.0 + dst as f32 * inv).round().clamp(0.0, a);

    if let Some(blended) = PremultipliedColorU8::from_rgba(
        channel(color.red(), dst.red()) as u8,
        channel(color.green(), dst.green()) as u8,
        channel(color.blue(), dst.blue()) as u8,
        a as u8,
    ) {
        pixels[index] = blended;
    }
}

pub fn rgba_to_pixmap(image: &RgbaImage) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(image.width(), image.height())?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(image.pixels()) {
        let Rgba([r, g, b, a]) = *src;
        *dst = ColorU8::from_rgba(r, g, b, a).premultiply();
    }
    Some(pixmap)
}

pub fn pixmap_to_rgba(pixmap: &Pixmap) -> RgbaImage {
    let mut image = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in image.pixels_mut().zip(pixmap.pixels()) {
        let color = src.demultiply();
        *dst = Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
    }
    image
}

/// Draw an image with its top-left corner at `(x, y)`, optionally resized.
pub fn draw_image(
    canvas: &mut Pixmap,
    image: &RgbaImage,
    x: f32,
    y: f32,
    size: Option<(u32, u32)>,
) -> Result<(), ExportError> {
    let resized;
    let source = match size {
        Some((w, h)) if (w, h) != image.dimensions() => {
            resized = image::imageops::resize(image, w.max(1), h.max(1), FilterType::Triangle);
            &resized
        }
        _ => image,
    };
    let pixmap = rgba_to_pixmap(source).ok_or_else(|| {
        ExportError::ExportFailed(format!(
            "cannot draw empty image ({}x{})",
            source.width(),
            source.height()
        ))
    })?;
    canvas.draw_pixmap(
        x.round() as i32,
        y.round() as i32,
        pixmap.as_ref(),
        &PixmapPaint::default(),
        Transform::identity(),
        None,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color_forms() {
        let c = parse_color("#181818").unwrap().to_color_u8();
        assert_eq!((c.red(), c.green(), c.blue(), c.alpha()), (0x18, 0x18, 0x18, 255));

        let c = parse_color("#fff").unwrap().to_color_u8();
        assert_eq!((c.red(), c.green(), c.blue()), (255, 255, 255));

        let c = parse_color("rgba(10, 20, 30, 0.5)").unwrap().to_color_u8();
        assert_eq!((c.red(), c.green(), c.blue(), c.alpha()), (10, 20, 30, 128));

        assert!(parse_color("#12345").is_err());
        assert!(parse_color("blue-ish").is_err());
    }

    #[test]
    fn test_rounded_rect_fill_leaves_corners() {
        let mut canvas = Pixmap::new(40, 20).unwrap();
        let path = rounded_rect_path(0.0, 0.0, 40.0, 20.0, 6.0).unwrap();
        let red = Color::from_rgba8(255, 0, 0, 255);
        fill_horizontal_gradient(&mut canvas, &path, 0.0, 40.0, red, red);

        let rgba = pixmap_to_rgba(&canvas);
        assert_eq!(rgba.get_pixel(0, 0)[3], 0);
        assert_eq!(rgba.get_pixel(20, 10), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_draw_image_offsets() {
        let mut canvas = Pixmap::new(10, 10).unwrap();
        let image = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 255, 255]));
        draw_image(&mut canvas, &image, 3.0, 4.0, None).unwrap();

        let rgba = pixmap_to_rgba(&canvas);
        assert_eq!(rgba.get_pixel(3, 4), &Rgba([0, 0, 255, 255]));
        assert_eq!(rgba.get_pixel(2, 4)[3], 0);
    }

    #[test]
    fn test_blend_pixel_clips() {
        let mut canvas = Pixmap::new(2, 2).unwrap();
        blend_pixel(&mut canvas, -1, 0, Color::BLACK, 1.0);
        blend_pixel(&mut canvas, 1, 1, Color::WHITE, 1.0);
        assert_eq!(pixmap_to_rgba(&canvas).get_pixel(1, 1), &Rgba([255, 255, 255, 255]));
    }
}
