use image::Rgba;
use rayon::prelude::*;

use crate::ops::brush::PaintTarget;
use crate::ops::compositor::{BlendMode, blend_pixel};

/// Available shape primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    Rectangle,
    Ellipse,
}

/// How a shape is painted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ShapeFillMode {
    Outline,
    #[default]
    Filled,
    /// Primary fill with a secondary-colored outline on top.
    Both,
}

/// A shape spanning the box between two drag points.
#[derive(Clone, Debug)]
pub struct PlacedShape {
    /// Center x in canvas coords
    pub cx: f32,
    /// Center y in canvas coords
    pub cy: f32,
    /// Half-width
    pub hw: f32,
    /// Half-height
    pub hh: f32,
    pub kind: ShapeKind,
    pub fill_mode: ShapeFillMode,
    pub outline_width: f32,
    pub fill_color: Rgba<u8>,
    pub outline_color: Rgba<u8>,
    pub anti_alias: bool,
}

impl PlacedShape {
    /// Shape filling the box spanned by `a` and `b` (any corner order).
    pub fn from_drag(kind: ShapeKind, a: (f32, f32), b: (f32, f32)) -> Self {
        let (x0, x1) = (a.0.min(b.0), a.0.max(b.0));
        let (y0, y1) = (a.1.min(b.1), a.1.max(b.1));
        Self {
            cx: (x0 + x1) / 2.0,
            cy: (y0 + y1) / 2.0,
            hw: (x1 - x0) / 2.0,
            hh: (y1 - y0) / 2.0,
            kind,
            fill_mode: ShapeFillMode::Filled,
            outline_width: 2.0,
            fill_color: Rgba([0, 0, 0, 255]),
            outline_color: Rgba([0, 0, 0, 255]),
            anti_alias: false,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        self.hw < 0.5 || self.hh < 0.5
    }
}

// ============================================================================
// SDF functions — return signed distance (negative = inside)
// ============================================================================

/// SDF for a box centred at origin with half-extents (hx, hy).
#[inline]
fn sdf_box(px: f32, py: f32, hx: f32, hy: f32) -> f32 {
    let dx = px.abs() - hx;
    let dy = py.abs() - hy;
    let outside = (dx.max(0.0) * dx.max(0.0) + dy.max(0.0) * dy.max(0.0)).sqrt();
    let inside = dx.max(dy).min(0.0);
    outside + inside
}

/// SDF for an ellipse (approximation).
#[inline]
fn sdf_ellipse(px: f32, py: f32, rx: f32, ry: f32) -> f32 {
    let nx = px / rx;
    let ny = py / ry;
    let len = (nx * nx + ny * ny).sqrt();
    if len < 1e-8 {
        return -rx.min(ry);
    }
    let scale = (rx * rx * ny * ny + ry * ry * nx * nx).sqrt() / (rx * ry * len);
    (len - 1.0) / scale
}

pub fn shape_sdf(kind: ShapeKind, px: f32, py: f32, hx: f32, hy: f32) -> f32 {
    match kind {
        ShapeKind::Rectangle => sdf_box(px, py, hx, hy),
        ShapeKind::Ellipse => sdf_ellipse(px, py, hx, hy),
    }
}

#[inline]
fn coverage(d: f32, aa: bool) -> f32 {
    if aa {
        smoothstep(0.5, -0.5, d)
    } else if d < 0.0 {
        1.0
    } else {
        0.0
    }
}

/// Rasterize a shape into an RGBA buffer covering its bounding box.
///
/// Returns `(buf, buf_w, buf_h, offset_x, offset_y)` where offset is the
/// top-left corner of the buffer in canvas coordinates.
pub fn rasterize_shape(placed: &PlacedShape, canvas_w: u32, canvas_h: u32) -> (Vec<u8>, u32, u32, i32, i32) {
    let pad = placed.outline_width + 2.0;
    let x0 = ((placed.cx - placed.hw - pad).floor() as i32).max(0);
    let y0 = ((placed.cy - placed.hh - pad).floor() as i32).max(0);
    let x1 = ((placed.cx + placed.hw + pad).ceil() as i32).min(canvas_w as i32);
    let y1 = ((placed.cy + placed.hh + pad).ceil() as i32).min(canvas_h as i32);
    let buf_w = (x1 - x0).max(0) as u32;
    let buf_h = (y1 - y0).max(0) as u32;

    if buf_w == 0 || buf_h == 0 {
        return (Vec::new(), 0, 0, 0, 0);
    }

    let row_bytes = buf_w as usize * 4;
    let mut buf = vec![0u8; row_bytes * buf_h as usize];

    let fill = placed.fill_color.0;
    let stroke = placed.outline_color.0;
    let outline_half = placed.outline_width * 0.5;
    let aa = placed.anti_alias;
    let fill_mode = placed.fill_mode;

    buf.par_chunks_mut(row_bytes).enumerate().for_each(|(row, row_buf)| {
        let py = (y0 + row as i32) as f32 + 0.5 - placed.cy;
        for col in 0..buf_w as usize {
            let px = (x0 + col as i32) as f32 + 0.5 - placed.cx;
            let d = shape_sdf(placed.kind, px, py, placed.hw, placed.hh);

            let (color, cov) = match fill_mode {
                ShapeFillMode::Filled => (fill, coverage(d, aa)),
                ShapeFillMode::Outline => (fill, coverage(d.abs() - outline_half, aa)),
                ShapeFillMode::Both => {
                    let fill_cov = coverage(d, aa);
                    let outline_cov = coverage(d.abs() - outline_half, aa);
                    if outline_cov > 0.001 {
                        // Outline on top
                        let oa = outline_cov;
                        let fa = fill_cov * (1.0 - oa);
                        let total = oa + fa;
                        let mix = |i: usize| ((stroke[i] as f32 * oa + fill[i] as f32 * fa) / total) as u8;
                        ([mix(0), mix(1), mix(2), mix(3)], total)
                    } else {
                        (fill, fill_cov)
                    }
                }
            };

            if cov > 0.001 {
                let idx = col * 4;
                row_buf[idx] = color[0];
                row_buf[idx + 1] = color[1];
                row_buf[idx + 2] = color[2];
                row_buf[idx + 3] = (color[3] as f32 * cov).round().min(255.0) as u8;
            }
        }
    });

    (buf, buf_w, buf_h, x0, y0)
}

/// Rasterize and blend onto the target layer at `opacity`.
pub fn draw_shape(target: &mut PaintTarget, placed: &PlacedShape, opacity: f32) {
    let (buf, w, h, ox, oy) = rasterize_shape(placed, target.canvas_w, target.canvas_h);
    for row in 0..h as usize {
        for col in 0..w as usize {
            let i = (row * w as usize + col) * 4;
            if buf[i + 3] == 0 {
                continue;
            }
            let x = ox as i64 + col as i64;
            let y = oy as i64 + row as i64;
            if !target.writable(x, y) {
                continue;
            }
            let top = Rgba([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
            let existing = target.read(x, y);
            target.write(x, y, blend_pixel(existing, top, BlendMode::Normal, opacity));
        }
    }
}

/// Smoothstep between edge0 and edge1.
#[inline]
fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}
