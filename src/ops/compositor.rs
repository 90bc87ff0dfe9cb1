// ============================================================================
// COMPOSITOR — flattens the layer stack and draws the selection outline
// ============================================================================

use std::fmt;
use std::str::FromStr;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::Document;
use crate::components::selection::SelectionOutline;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl BlendMode {
    /// All blend modes in menu order.
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::ColorDodge,
            BlendMode::ColorBurn,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Difference,
            BlendMode::Exclusion,
            BlendMode::Hue,
            BlendMode::Saturation,
            BlendMode::Color,
            BlendMode::Luminosity,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
            BlendMode::Hue => "Hue",
            BlendMode::Saturation => "Saturation",
            BlendMode::Color => "Color",
            BlendMode::Luminosity => "Luminosity",
        }
    }

    /// Stable u8 for binary serialization.
    pub fn to_u8(&self) -> u8 {
        Self::all().iter().position(|m| m == self).unwrap_or(0) as u8
    }

    /// Reconstruct from a u8 (defaults to Normal for unknown values).
    pub fn from_u8(v: u8) -> Self {
        Self::all().get(v as usize).copied().unwrap_or_default()
    }

    /// Separable modes apply the same function to each channel independently.
    fn is_separable(&self) -> bool {
        !matches!(
            self,
            BlendMode::Hue | BlendMode::Saturation | BlendMode::Color | BlendMode::Luminosity
        )
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BlendMode {
    type Err = String;

    /// Accepts display names and kebab/snake forms: "Color Dodge", "color-dodge", "color_dodge".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .flat_map(char::to_lowercase)
            .collect();
        Self::all()
            .iter()
            .copied()
            .find(|m| m.name().replace(' ', "").to_lowercase() == key)
            .ok_or_else(|| format!("unknown blend mode '{}'", s))
    }
}

// ============================================================================
// PIXEL BLENDING
// ============================================================================

/// Blend `top` onto `base` with `mode`, scaling the top alpha by `opacity`.
///
/// The blended color is weighted by the top alpha and mixed with the base the
/// way plain alpha-over would (W3C compositing with source-over).
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }
    if mode == BlendMode::Normal && opacity >= 1.0 && (top[3] == 255 || base[3] == 0) {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);

    let b = [base[0] as f32 / 255.0, base[1] as f32 / 255.0, base[2] as f32 / 255.0];
    let base_a = base[3] as f32 / 255.0;
    let t = [top[0] as f32 / 255.0, top[1] as f32 / 255.0, top[2] as f32 / 255.0];
    let top_a = (top[3] as f32 / 255.0) * opacity;

    let mixed = if base_a <= 0.0 {
        t
    } else if mode.is_separable() {
        let f: fn(f32, f32) -> f32 = match mode {
            BlendMode::Normal => |_, s| s,
            BlendMode::Multiply => |b, s| b * s,
            BlendMode::Screen => |b, s| b + s - b * s,
            BlendMode::Overlay => |b, s| hard_light_channel(s, b),
            BlendMode::Darken => |b, s| b.min(s),
            BlendMode::Lighten => |b, s| b.max(s),
            BlendMode::ColorDodge => color_dodge_channel,
            BlendMode::ColorBurn => color_burn_channel,
            BlendMode::HardLight => hard_light_channel,
            BlendMode::SoftLight => soft_light_channel,
            BlendMode::Difference => |b, s| (b - s).abs(),
            BlendMode::Exclusion => |b, s| b + s - 2.0 * b * s,
            BlendMode::Hue | BlendMode::Saturation | BlendMode::Color | BlendMode::Luminosity => {
                |_, s| s
            }
        };
        [f(b[0], t[0]), f(b[1], t[1]), f(b[2], t[2])]
    } else {
        match mode {
            BlendMode::Hue => set_lum(set_sat(t, sat(b)), lum(b)),
            BlendMode::Saturation => set_lum(set_sat(b, sat(t)), lum(b)),
            BlendMode::Color => set_lum(t, lum(b)),
            _ => set_lum(b, lum(t)),
        }
    };

    // Where the backdrop is transparent the source color shows through unmixed.
    let c = [
        (1.0 - base_a) * t[0] + base_a * mixed[0],
        (1.0 - base_a) * t[1] + base_a * mixed[1],
        (1.0 - base_a) * t[2] + base_a * mixed[2],
    ];

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |i: usize| {
        let v = (c[i] * top_a + b[i] * base_a * (1.0 - top_a)) / out_a;
        (v * 255.0).round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

fn hard_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base * 2.0 * top
    } else {
        let s = 2.0 * top - 1.0;
        base + s - base * s
    }
}

fn color_dodge_channel(base: f32, top: f32) -> f32 {
    if base <= 0.0 {
        0.0
    } else if top >= 1.0 {
        1.0
    } else {
        (base / (1.0 - top)).min(1.0)
    }
}

fn color_burn_channel(base: f32, top: f32) -> f32 {
    if base >= 1.0 {
        1.0
    } else if top <= 0.0 {
        0.0
    } else {
        1.0 - ((1.0 - base) / top).min(1.0)
    }
}

/// W3C Soft Light formula.
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

// Non-separable helpers (W3C Compositing and Blending Level 1, section 10.2).

fn lum(c: [f32; 3]) -> f32 {
    0.3 * c[0] + 0.59 * c[1] + 0.11 * c[2]
}

fn clip_color(c: [f32; 3]) -> [f32; 3] {
    let l = lum(c);
    let n = c[0].min(c[1]).min(c[2]);
    let x = c[0].max(c[1]).max(c[2]);
    let mut out = c;
    if n < 0.0 {
        for v in &mut out {
            *v = l + (*v - l) * l / (l - n);
        }
    }
    if x > 1.0 {
        for v in &mut out {
            *v = l + (*v - l) * (1.0 - l) / (x - l);
        }
    }
    out
}

fn set_lum(c: [f32; 3], l: f32) -> [f32; 3] {
    let d = l - lum(c);
    clip_color([c[0] + d, c[1] + d, c[2] + d])
}

fn sat(c: [f32; 3]) -> f32 {
    c[0].max(c[1]).max(c[2]) - c[0].min(c[1]).min(c[2])
}

fn set_sat(c: [f32; 3], s: f32) -> [f32; 3] {
    let max = c[0].max(c[1]).max(c[2]);
    let min = c[0].min(c[1]).min(c[2]);
    if max <= min {
        return [0.0; 3];
    }
    let mut out = [0.0; 3];
    for i in 0..3 {
        out[i] = if c[i] == max {
            s
        } else if c[i] == min {
            0.0
        } else {
            (c[i] - min) * s / (max - min)
        };
    }
    out
}

// ============================================================================
// STACK COMPOSITING
// ============================================================================

/// Flatten every visible layer, bottom to top, into a canvas-sized image.
///
/// Each layer is sampled through its offset and clipped to the canvas. Rows
/// are computed in parallel; each output pixel depends only on the layers, so
/// the result is identical to a sequential pass.
pub fn composite(doc: &Document) -> RgbaImage {
    let w = doc.width;
    let h = doc.height;
    let mut out = RgbaImage::new(w, h);
    let visible: Vec<_> = doc
        .layers
        .iter_bottom_up()
        .filter(|l| l.visible && l.opacity > 0.0)
        .collect();
    if visible.is_empty() {
        return out;
    }

    let row_bytes = w as usize * 4;
    let raw: &mut [u8] = out.as_mut();
    raw.par_chunks_mut(row_bytes).enumerate().for_each(|(y, row)| {
        for x in 0..w as usize {
            let mut acc = Rgba([0u8, 0, 0, 0]);
            for layer in &visible {
                let sx = x as i64 - layer.offset_x as i64;
                let sy = y as i64 - layer.offset_y as i64;
                let top = layer.pixels.sample(sx, sy);
                acc = blend_pixel(acc, top, layer.blend_mode, layer.opacity);
            }
            row[x * 4..x * 4 + 4].copy_from_slice(&acc.0);
        }
    });
    out
}

/// Read one composited pixel without flattening the whole canvas.
pub fn composite_pixel(doc: &Document, x: u32, y: u32) -> Rgba<u8> {
    let mut acc = Rgba([0u8, 0, 0, 0]);
    for layer in doc.layers.iter_bottom_up() {
        if !layer.visible || layer.opacity <= 0.0 {
            continue;
        }
        let top = layer
            .pixels
            .sample(x as i64 - layer.offset_x as i64, y as i64 - layer.offset_y as i64);
        acc = blend_pixel(acc, top, layer.blend_mode, layer.opacity);
    }
    acc
}

// ============================================================================
// SELECTION OUTLINE OVERLAY
// ============================================================================

/// Length of each dash of the marching-ants outline, in pixels.
pub const DASH_LENGTH: u32 = 4;

/// Draw the dashed selection outline onto a display image. `phase` advances
/// the dash pattern so successive frames appear to march.
///
/// This only touches `target`; layer buffers are never modified.
pub fn draw_selection_outline(target: &mut RgbaImage, outline: &SelectionOutline, phase: u32) {
    let segments: Vec<((f32, f32), (f32, f32))> = match outline {
        SelectionOutline::Rect { min_x, min_y, max_x, max_y } => {
            // Outline runs along the last pixel inside the rectangle.
            let (x0, y0) = (*min_x as f32, *min_y as f32);
            let x1 = max_x.saturating_sub(1).max(*min_x) as f32;
            let y1 = max_y.saturating_sub(1).max(*min_y) as f32;
            vec![((x0, y0), (x1, y0)), ((x1, y0), (x1, y1)), ((x1, y1), (x0, y1)), ((x0, y1), (x0, y0))]
        }
        SelectionOutline::Polygon(points) => {
            if points.len() < 2 {
                return;
            }
            (0..points.len())
                .map(|i| (points[i], points[(i + 1) % points.len()]))
                .collect()
        }
    };

    let (w, h) = (target.width() as i64, target.height() as i64);
    let mut travelled = phase;
    for ((ax, ay), (bx, by)) in segments {
        let steps = (bx - ax).abs().max((by - ay).abs()).round().max(1.0) as u32;
        for i in 0..steps {
            let t = i as f32 / steps as f32;
            let px = (ax + (bx - ax) * t).round() as i64;
            let py = (ay + (by - ay) * t).round() as i64;
            if px >= 0 && py >= 0 && px < w && py < h {
                let light = (travelled / DASH_LENGTH) % 2 == 0;
                let c = if light { 255 } else { 0 };
                target.put_pixel(px as u32, py as u32, Rgba([c, c, c, 255]));
            }
            travelled = travelled.wrapping_add(1);
        }
    }
}

/// Composite plus selection overlay, for display only.
pub fn composite_with_overlay(doc: &Document, phase: u32) -> RgbaImage {
    let mut img = composite(doc);
    if let Some(sel) = &doc.selection {
        draw_selection_outline(&mut img, &sel.outline, phase);
    }
    img
}
