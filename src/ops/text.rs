use ab_glyph::{point, Font, FontArc, GlyphId, ScaleFont};

use crate::error::{EditorError, Result};
use crate::ops::brush::PaintTarget;
use crate::ops::compositor::{BlendMode, blend_pixel};

/// Points per inch; font sizes are given in points.
const POINTS_PER_INCH: f32 = 72.0;

/// Pixel size of a `pt`-point font rendered at `dpi`.
pub fn point_size_to_px(pt: f32, dpi: f32) -> f32 {
    (pt * dpi / POINTS_PER_INCH).max(1.0)
}

/// Lay out a single line of text starting at x = 0, baseline at `ascent`.
/// Returns `(glyphs, total_width)`.
pub fn layout_line(font: &FontArc, text: &str, px_size: f32) -> (Vec<(GlyphId, f32, f32)>, f32) {
    let scaled = font.as_scaled(px_size);
    let ascent = scaled.ascent();

    let mut glyphs = Vec::new();
    let mut cursor_x = 0.0f32;
    let mut last_glyph: Option<GlyphId> = None;

    for ch in text.chars() {
        let glyph_id = font.glyph_id(ch);
        if let Some(prev) = last_glyph {
            cursor_x += scaled.kern(prev, glyph_id);
        }
        glyphs.push((glyph_id, cursor_x, ascent));
        cursor_x += scaled.h_advance(glyph_id);
        last_glyph = Some(glyph_id);
    }

    (glyphs, cursor_x)
}

/// Coverage-tinted RGBA pixels for a block of text, clipped to the canvas.
pub struct RasterizedText {
    pub buf: Vec<u8>,
    pub buf_w: u32,
    pub buf_h: u32,
    pub off_x: i32,
    pub off_y: i32,
}

impl RasterizedText {
    fn empty() -> Self {
        Self { buf: Vec::new(), buf_w: 0, buf_h: 0, off_x: 0, off_y: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.buf_w == 0 || self.buf_h == 0
    }
}

/// Rasterize `text` with its top-left at `(origin_x, origin_y)` in canvas
/// coordinates. Lines are separated by `'\n'`.
pub fn rasterize_text(
    font: &FontArc,
    text: &str,
    px_size: f32,
    origin_x: f32,
    origin_y: f32,
    color: [u8; 4],
    anti_alias: bool,
    canvas_w: u32,
    canvas_h: u32,
) -> RasterizedText {
    let line_height = font.as_scaled(px_size).height();

    let mut all_glyphs: Vec<(GlyphId, f32, f32)> = Vec::new();
    for (line_idx, line) in text.split('\n').enumerate() {
        let (glyphs, _) = layout_line(font, line, px_size);
        let y_offset = line_idx as f32 * line_height;
        all_glyphs.extend(glyphs.into_iter().map(|(id, x, y)| (id, x, y + y_offset)));
    }
    if all_glyphs.is_empty() {
        return RasterizedText::empty();
    }

    let x0 = (origin_x.floor() as i32).max(0);
    let y0 = (origin_y.floor() as i32).max(0);
    let mut x1 = x0;
    let mut y1 = y0;
    let mut outlined = Vec::with_capacity(all_glyphs.len());
    for &(glyph_id, gx, gy) in &all_glyphs {
        let glyph = glyph_id.with_scale_and_position(px_size, point(origin_x + gx, origin_y + gy));
        if let Some(og) = font.outline_glyph(glyph) {
            let b = og.px_bounds();
            x1 = x1.max(b.max.x.ceil() as i32);
            y1 = y1.max(b.max.y.ceil() as i32);
            outlined.push(og);
        }
    }
    let x1 = x1.min(canvas_w as i32);
    let y1 = y1.min(canvas_h as i32);
    let buf_w = (x1 - x0).max(0) as u32;
    let buf_h = (y1 - y0).max(0) as u32;
    if buf_w == 0 || buf_h == 0 {
        return RasterizedText::empty();
    }

    let mut coverage = vec![0.0f32; buf_w as usize * buf_h as usize];
    for og in &outlined {
        let b = og.px_bounds();
        og.draw(|px, py, cov| {
            let ix = b.min.x as i32 + px as i32 - x0;
            let iy = b.min.y as i32 + py as i32 - y0;
            if ix >= 0 && iy >= 0 && (ix as u32) < buf_w && (iy as u32) < buf_h {
                let idx = iy as usize * buf_w as usize + ix as usize;
                let v = if anti_alias { cov } else if cov > 0.5 { 1.0 } else { 0.0 };
                coverage[idx] = coverage[idx].max(v);
            }
        });
    }

    let mut buf = vec![0u8; coverage.len() * 4];
    for (i, &cov) in coverage.iter().enumerate() {
        if cov > 0.001 {
            let idx = i * 4;
            buf[idx] = color[0];
            buf[idx + 1] = color[1];
            buf[idx + 2] = color[2];
            buf[idx + 3] = (color[3] as f32 * cov).round().min(255.0) as u8;
        }
    }

    RasterizedText { buf, buf_w, buf_h, off_x: x0, off_y: y0 }
}

/// Blend rasterized text onto the target layer.
pub fn draw_text(target: &mut PaintTarget, text: &RasterizedText, opacity: f32) {
    for row in 0..text.buf_h as usize {
        for col in 0..text.buf_w as usize {
            let i = (row * text.buf_w as usize + col) * 4;
            if text.buf[i + 3] == 0 {
                continue;
            }
            let x = text.off_x as i64 + col as i64;
            let y = text.off_y as i64 + row as i64;
            if !target.writable(x, y) {
                continue;
            }
            let top = image::Rgba([text.buf[i], text.buf[i + 1], text.buf[i + 2], text.buf[i + 3]]);
            let existing = target.read(x, y);
            target.write(x, y, blend_pixel(existing, top, BlendMode::Normal, opacity));
        }
    }
}

/// Load a font by family name, weight, and style from the system.
/// `weight` is a CSS-style weight value (100=Thin, 400=Regular, 700=Bold, etc.)
pub fn load_system_font(family: &str, weight: u16, italic: bool) -> Result<FontArc> {
    use font_kit::family_name::FamilyName;
    use font_kit::properties::{Properties, Style, Weight};
    use font_kit::source::SystemSource;

    let mut props = Properties::new();
    props.weight = Weight(weight as f32);
    if italic {
        props.style = Style::Italic;
    }

    let handle = SystemSource::new()
        .select_best_match(
            &[FamilyName::Title(family.to_string()), FamilyName::SansSerif],
            &props,
        )
        .map_err(|e| EditorError::Font(format!("no match for '{}': {}", family, e)))?;
    let font = handle
        .load()
        .map_err(|e| EditorError::Font(format!("could not load '{}': {}", family, e)))?;
    let data = font
        .copy_font_data()
        .ok_or_else(|| EditorError::Font(format!("'{}' has no readable font data", family)))?;
    font_from_bytes((*data).clone())
}

/// Parse a TrueType/OpenType font from raw bytes.
pub fn font_from_bytes(bytes: Vec<u8>) -> Result<FontArc> {
    FontArc::try_from_vec(bytes).map_err(|e| EditorError::Font(e.to_string()))
}
