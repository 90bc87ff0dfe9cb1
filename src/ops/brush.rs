// ============================================================================
// BRUSH OPS — stamp primitives shared by the painting tools
// ============================================================================
//
// Every primitive works in canvas coordinates and writes through a
// `PaintTarget`, which maps to the layer's own buffer coordinates, drops
// pixels outside the canvas and skips pixels the selection excludes.

use image::Rgba;

use crate::canvas::PixelBuffer;
use crate::components::colors::{hsl_to_rgb, rgb_to_hsl};
use crate::components::selection::Selection;
use crate::ops::compositor::{BlendMode, blend_pixel};

/// Brightness/saturation change per dodge, burn or sponge stamp at hardness 1.
pub const TONE_STEP: f32 = 0.1;

/// Mutable view of one layer for the duration of a stamp.
pub struct PaintTarget<'a> {
    pub pixels: &'a mut PixelBuffer,
    /// Layer offset; canvas `(x, y)` is buffer `(x - ox, y - oy)`.
    pub offset: (i32, i32),
    pub canvas_w: u32,
    pub canvas_h: u32,
    pub selection: Option<&'a Selection>,
}

impl PaintTarget<'_> {
    /// Read the layer pixel under canvas `(x, y)`; transparent off the layer.
    #[inline]
    pub fn read(&self, x: i64, y: i64) -> Rgba<u8> {
        self.pixels
            .sample(x - self.offset.0 as i64, y - self.offset.1 as i64)
    }

    /// Whether a tool may write canvas `(x, y)`.
    #[inline]
    pub fn writable(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.canvas_w as i64 || y >= self.canvas_h as i64 {
            return false;
        }
        match self.selection {
            Some(sel) => sel.contains(x as u32, y as u32),
            None => true,
        }
    }

    /// Write canvas `(x, y)` if it is writable.
    #[inline]
    pub fn write(&mut self, x: i64, y: i64, pixel: Rgba<u8>) {
        if !self.writable(x, y) {
            return;
        }
        let bx = x - self.offset.0 as i64;
        let by = y - self.offset.1 as i64;
        if bx < 0 || by < 0 || bx > u32::MAX as i64 || by > u32::MAX as i64 {
            return;
        }
        self.pixels.put_pixel(bx as u32, by as u32, pixel);
    }

    /// Visit every writable pixel of the square `[x0, x0 + side)²`.
    fn each_in_square(&self, x0: i64, y0: i64, side: i64) -> impl Iterator<Item = (i64, i64)> + '_ {
        (y0..y0 + side)
            .flat_map(move |y| (x0..x0 + side).map(move |x| (x, y)))
            .filter(|&(x, y)| self.writable(x, y))
    }
}

/// Points along `from → to`, excluding `from`. There are
/// `max(1, round(distance))` of them, evenly spaced, ending at `to`.
pub fn interpolate(from: (f32, f32), to: (f32, f32)) -> Vec<(f32, f32)> {
    let dx = to.0 - from.0;
    let dy = to.1 - from.1;
    let distance = (dx * dx + dy * dy).sqrt();
    let steps = (distance.round() as usize).max(1);
    (1..=steps)
        .map(|i| {
            let t = i as f32 / steps as f32;
            (from.0 + dx * t, from.1 + dy * t)
        })
        .collect()
}

/// Clip the segment `from → to` to the rectangle `[x0, x1] × [y0, y1]`
/// (Liang–Barsky). `None` when the segment misses the rectangle entirely.
/// Endpoints inside the rectangle come back unchanged.
pub fn clip_segment(
    from: (f32, f32),
    to: (f32, f32),
    (x0, y0, x1, y1): (f32, f32, f32, f32),
) -> Option<((f32, f32), (f32, f32))> {
    // f64 keeps the clipped points exact enough for samples near f32::MAX.
    let (fx, fy) = (from.0 as f64, from.1 as f64);
    let dx = to.0 as f64 - fx;
    let dy = to.1 as f64 - fy;
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    let edges = [
        (-dx, fx - x0 as f64),
        (dx, x1 as f64 - fx),
        (-dy, fy - y0 as f64),
        (dy, y1 as f64 - fy),
    ];
    for (p, q) in edges {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }
    let at = |t: f64| ((fx + dx * t) as f32, (fy + dy * t) as f32);
    let start = if t0 == 0.0 { from } else { at(t0) };
    let end = if t1 == 1.0 { to } else { at(t1) };
    Some((start, end))
}

/// Brush falloff: 1 inside `radius * hardness`, fading linearly to 0 at `radius`.
#[inline]
pub fn brush_alpha(dist: f32, radius: f32, hardness: f32) -> f32 {
    let solid = radius * hardness.clamp(0.0, 1.0);
    if dist <= solid {
        1.0
    } else if dist >= radius {
        0.0
    } else {
        (radius - dist) / (radius - solid)
    }
}

/// Top-left of a `side`-pixel square centered on `(cx, cy)`.
#[inline]
fn square_origin(cx: f32, cy: f32, side: u32) -> (i64, i64) {
    let half = (side / 2) as i64;
    (cx.round() as i64 - half, cy.round() as i64 - half)
}

/// Round brush stamp blended with normal alpha-over at `strength`.
pub fn stamp_brush(
    target: &mut PaintTarget,
    cx: f32,
    cy: f32,
    size: f32,
    hardness: f32,
    color: Rgba<u8>,
    strength: f32,
) {
    let radius = size / 2.0;
    let r = radius.ceil() as i64;
    let (ix, iy) = (cx.round() as i64, cy.round() as i64);
    for y in iy - r..=iy + r {
        for x in ix - r..=ix + r {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let a = brush_alpha((dx * dx + dy * dy).sqrt(), radius, hardness);
            if a <= 0.0 || !target.writable(x, y) {
                continue;
            }
            let existing = target.read(x, y);
            target.write(x, y, blend_pixel(existing, color, BlendMode::Normal, a * strength));
        }
    }
}

/// Brush-shaped alpha subtraction.
pub fn stamp_eraser(target: &mut PaintTarget, cx: f32, cy: f32, size: f32, hardness: f32, strength: f32) {
    let radius = size / 2.0;
    let r = radius.ceil() as i64;
    let (ix, iy) = (cx.round() as i64, cy.round() as i64);
    for y in iy - r..=iy + r {
        for x in ix - r..=ix + r {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let a = brush_alpha((dx * dx + dy * dy).sqrt(), radius, hardness);
            if a <= 0.0 || !target.writable(x, y) {
                continue;
            }
            let mut p = target.read(x, y);
            if p[3] == 0 {
                continue;
            }
            let keep = (1.0 - a * strength).clamp(0.0, 1.0);
            p[3] = (p[3] as f32 * keep).round() as u8;
            target.write(x, y, p);
        }
    }
}

/// Side of the pencil square for a brush size.
pub fn pencil_side(size: f32) -> u32 {
    ((size * 0.3).round() as u32).max(1)
}

/// Hard-edged square at full opacity.
pub fn stamp_pencil(target: &mut PaintTarget, cx: f32, cy: f32, size: f32, color: Rgba<u8>) {
    let side = pencil_side(size);
    let (x0, y0) = square_origin(cx, cy, side);
    let points: Vec<_> = target.each_in_square(x0, y0, side as i64).collect();
    for (x, y) in points {
        let existing = target.read(x, y);
        target.write(x, y, blend_pixel(existing, color, BlendMode::Normal, 1.0));
    }
}

/// Copy a `size × size` block from `source` (the layer as it was when the
/// stroke began) displaced by `delta` canvas pixels, blended at `strength`.
pub fn stamp_clone(
    target: &mut PaintTarget,
    source: &PixelBuffer,
    cx: f32,
    cy: f32,
    size: f32,
    delta: (i64, i64),
    strength: f32,
) {
    let side = (size.round() as u32).max(1);
    let (x0, y0) = square_origin(cx, cy, side);
    let (ox, oy) = (target.offset.0 as i64, target.offset.1 as i64);
    let points: Vec<_> = target.each_in_square(x0, y0, side as i64).collect();
    for (x, y) in points {
        let src = source.sample(x + delta.0 - ox, y + delta.1 - oy);
        if src[3] == 0 {
            continue;
        }
        let existing = target.read(x, y);
        target.write(x, y, blend_pixel(existing, src, BlendMode::Normal, strength));
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToneMode {
    Dodge,
    Burn,
    Sponge,
}

/// Multiplicative brightness up (dodge), down (burn), or a saturation boost
/// (sponge) over a `size × size` neighbourhood. Alpha is untouched.
pub fn stamp_tone(target: &mut PaintTarget, cx: f32, cy: f32, size: f32, hardness: f32, mode: ToneMode) {
    let side = (size.round() as u32).max(1);
    let (x0, y0) = square_origin(cx, cy, side);
    let step = hardness.clamp(0.0, 1.0) * TONE_STEP;
    let points: Vec<_> = target.each_in_square(x0, y0, side as i64).collect();
    for (x, y) in points {
        let p = target.read(x, y);
        if p[3] == 0 {
            continue;
        }
        let out = match mode {
            ToneMode::Dodge | ToneMode::Burn => {
                let factor = if mode == ToneMode::Dodge { 1.0 + step } else { 1.0 - step };
                let scale = |c: u8| (c as f32 * factor).round().clamp(0.0, 255.0) as u8;
                Rgba([scale(p[0]), scale(p[1]), scale(p[2]), p[3]])
            }
            ToneMode::Sponge => {
                let (h, s, l) = rgb_to_hsl(p[0] as f32 / 255.0, p[1] as f32 / 255.0, p[2] as f32 / 255.0);
                let (r, g, b) = hsl_to_rgb(h, (s * (1.0 + step)).min(1.0), l);
                let to8 = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
                Rgba([to8(r), to8(g), to8(b), p[3]])
            }
        };
        target.write(x, y, out);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    Blur,
    Sharpen,
}

/// 3×3 box blur or sharpen over a `size × size` neighbourhood. Reads come
/// from a copy of the block taken before any write, so the result does not
/// depend on visiting order.
pub fn stamp_filter(target: &mut PaintTarget, cx: f32, cy: f32, size: f32, mode: FilterMode) {
    let side = (size.round() as u32).max(1) as i64;
    let (x0, y0) = square_origin(cx, cy, side as u32);

    // Block plus a one-pixel apron for the kernel.
    let span = side + 2;
    let mut block = Vec::with_capacity((span * span) as usize);
    for y in y0 - 1..y0 + side + 1 {
        for x in x0 - 1..x0 + side + 1 {
            block.push(target.read(x, y));
        }
    }
    let at = |x: i64, y: i64| block[((y - y0 + 1) * span + (x - x0 + 1)) as usize];

    let points: Vec<_> = target.each_in_square(x0, y0, side).collect();
    for (x, y) in points {
        let center = at(x, y);
        let out = match mode {
            FilterMode::Blur => {
                let mut acc = [0u32; 4];
                for ny in y - 1..=y + 1 {
                    for nx in x - 1..=x + 1 {
                        let p = at(nx, ny);
                        for c in 0..4 {
                            acc[c] += p[c] as u32;
                        }
                    }
                }
                Rgba(acc.map(|v| ((v as f32) / 9.0).round() as u8))
            }
            FilterMode::Sharpen => {
                if center[3] == 0 {
                    continue;
                }
                let mut px = [0u8; 4];
                for c in 0..3 {
                    let v = 5 * center[c] as i32
                        - at(x - 1, y)[c] as i32
                        - at(x + 1, y)[c] as i32
                        - at(x, y - 1)[c] as i32
                        - at(x, y + 1)[c] as i32;
                    px[c] = v.clamp(0, 255) as u8;
                }
                px[3] = center[3];
                Rgba(px)
            }
        };
        target.write(x, y, out);
    }
}

/// Directional smear: pixels under the brush are pulled toward the carried
/// `pickup` color, and the pickup picks up a little of what it passes over.
pub fn stamp_smudge(target: &mut PaintTarget, cx: f32, cy: f32, size: f32, strength: f32, pickup: &mut [f32; 4]) {
    let radius = (size * 0.5).max(1.0);
    let r = radius.ceil() as i64;
    let (ix, iy) = (cx.round() as i64, cy.round() as i64);

    // Collect writes first so the pickup sees the unmodified neighbourhood.
    let mut writes: Vec<(i64, i64, Rgba<u8>)> = Vec::new();
    for y in iy - r..=iy + r {
        for x in ix - r..=ix + r {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist > radius || !target.writable(x, y) {
                continue;
            }
            let t = 1.0 - (dist / radius).powi(2);
            let alpha = (t * strength).clamp(0.0, 1.0);

            let orig = target.read(x, y);
            let existing = orig.0.map(|c| c as f32);
            let mut out = [0u8; 4];
            for c in 0..4 {
                out[c] = (pickup[c] * alpha + existing[c] * (1.0 - alpha)).round().clamp(0.0, 255.0) as u8;
            }

            let pickup_blend = alpha * 0.2;
            for c in 0..4 {
                pickup[c] = (pickup[c] * (1.0 - pickup_blend) + existing[c] * pickup_blend).clamp(0.0, 255.0);
            }
            writes.push((x, y, Rgba(out)));
        }
    }
    for (x, y, p) in writes {
        target.write(x, y, p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target<'a>(pixels: &'a mut PixelBuffer, selection: Option<&'a Selection>) -> PaintTarget<'a> {
        let (w, h) = (pixels.width(), pixels.height());
        PaintTarget { pixels, offset: (0, 0), canvas_w: w, canvas_h: h, selection }
    }

    #[test]
    fn interpolation_step_count() {
        assert_eq!(interpolate((0.0, 0.0), (0.0, 0.0)).len(), 1);
        assert_eq!(interpolate((0.0, 0.0), (3.0, 4.0)).len(), 5);
        assert_eq!(interpolate((0.0, 0.0), (10.4, 0.0)).len(), 10);
        assert_eq!(*interpolate((0.0, 0.0), (3.0, 4.0)).last().unwrap(), (3.0, 4.0));
    }

    #[test]
    fn segments_clip_to_rect() {
        let rect = (-5.0, -5.0, 37.0, 37.0);
        let (a, b) = clip_segment((5.0, 5.0), (1e15, 5.0), rect).unwrap();
        assert_eq!(a, (5.0, 5.0));
        assert!((b.0 - 37.0).abs() < 1.0 && b.1 == 5.0);
        assert!(interpolate(a, b).len() <= 33);

        assert_eq!(clip_segment((10.0, 10.0), (20.0, 30.0), rect), Some(((10.0, 10.0), (20.0, 30.0))));
        assert_eq!(clip_segment((-100.0, -100.0), (-100.0, 1e9), rect), None);
        assert_eq!(clip_segment((50.0, 0.0), (60.0, 0.0), rect), None);
    }

    #[test]
    fn falloff_profile() {
        assert_eq!(brush_alpha(0.0, 12.0, 0.7), 1.0);
        assert_eq!(brush_alpha(8.4, 12.0, 0.7), 1.0);
        assert!(brush_alpha(11.0, 12.0, 0.7) > 0.0);
        assert_eq!(brush_alpha(12.0, 12.0, 0.7), 0.0);
        assert_eq!(brush_alpha(13.0, 12.0, 0.7), 0.0);
    }

    #[test]
    fn brush_stamp_radius() {
        let mut px = PixelBuffer::new(64, 64);
        let mut t = target(&mut px, None);
        stamp_brush(&mut t, 32.0, 32.0, 24.0, 0.7, Rgba([0, 0, 0, 255]), 1.0);
        assert_eq!(*px.get_pixel(32, 32), Rgba([0, 0, 0, 255]));
        assert!(px.get_pixel(43, 32)[3] > 0);
        assert_eq!(px.get_pixel(44, 32)[3], 0);
        assert_eq!(px.get_pixel(45, 32)[3], 0);
    }

    #[test]
    fn selection_clips_stamps() {
        let mut px = PixelBuffer::new(16, 16);
        let sel = Selection::rectangle(16, 16, 0, 0, 8, 16);
        let mut t = target(&mut px, Some(&sel));
        stamp_pencil(&mut t, 8.0, 8.0, 20.0, Rgba([255, 0, 0, 255]));
        assert_eq!(px.get_pixel(7, 8)[3], 255);
        assert_eq!(px.get_pixel(8, 8)[3], 0);
    }

    #[test]
    fn pencil_square_size() {
        assert_eq!(pencil_side(1.0), 1);
        assert_eq!(pencil_side(10.0), 3);
        let mut px = PixelBuffer::new(16, 16);
        let mut t = target(&mut px, None);
        stamp_pencil(&mut t, 5.0, 5.0, 10.0, Rgba([9, 9, 9, 255]));
        let painted = (0..16).flat_map(|y| (0..16).map(move |x| (x, y)))
            .filter(|&(x, y)| px.get_pixel(x, y)[3] > 0)
            .count();
        assert_eq!(painted, 9);
    }

    #[test]
    fn eraser_reduces_alpha_only() {
        let mut px = PixelBuffer::new_filled(16, 16, Rgba([10, 20, 30, 200]));
        let mut t = target(&mut px, None);
        stamp_eraser(&mut t, 8.0, 8.0, 6.0, 1.0, 0.5);
        assert_eq!(*px.get_pixel(8, 8), Rgba([10, 20, 30, 100]));
        assert_eq!(*px.get_pixel(0, 0), Rgba([10, 20, 30, 200]));
    }

    #[test]
    fn dodge_and_burn_move_brightness() {
        let mut px = PixelBuffer::new_filled(8, 8, Rgba([100, 100, 100, 255]));
        let mut t = target(&mut px, None);
        stamp_tone(&mut t, 4.0, 4.0, 2.0, 1.0, ToneMode::Dodge);
        assert_eq!(*px.get_pixel(4, 4), Rgba([110, 110, 110, 255]));
        let mut t = target(&mut px, None);
        stamp_tone(&mut t, 4.0, 4.0, 2.0, 1.0, ToneMode::Burn);
        assert_eq!(*px.get_pixel(4, 4), Rgba([99, 99, 99, 255]));
    }

    #[test]
    fn blur_softens_an_isolated_pixel() {
        let mut px = PixelBuffer::new_filled(8, 8, Rgba([0, 0, 0, 255]));
        px.put_pixel(4, 4, Rgba([90, 90, 90, 255]));
        let mut t = target(&mut px, None);
        stamp_filter(&mut t, 4.0, 4.0, 3.0, FilterMode::Blur);
        assert_eq!(*px.get_pixel(4, 4), Rgba([10, 10, 10, 255]));
        assert_eq!(*px.get_pixel(3, 3), Rgba([10, 10, 10, 255]));
    }

    #[test]
    fn sharpen_boosts_local_contrast() {
        let mut px = PixelBuffer::new_filled(8, 8, Rgba([50, 50, 50, 255]));
        px.put_pixel(4, 4, Rgba([100, 100, 100, 255]));
        let mut t = target(&mut px, None);
        stamp_filter(&mut t, 4.0, 4.0, 3.0, FilterMode::Sharpen);
        assert_eq!(*px.get_pixel(4, 4), Rgba([255, 255, 255, 255]));
        assert_eq!(*px.get_pixel(3, 4), Rgba([0, 0, 0, 255]));
        // Flat neighbours of flat pixels keep their value.
        assert_eq!(*px.get_pixel(3, 3), Rgba([50, 50, 50, 255]));
        assert_eq!(*px.get_pixel(0, 0), Rgba([50, 50, 50, 255]));
    }

    #[test]
    fn sponge_saturates_and_leaves_grey_alone() {
        let mut px = PixelBuffer::new_filled(8, 8, Rgba([150, 100, 100, 255]));
        px.put_pixel(1, 1, Rgba([80, 80, 80, 255]));
        let mut t = target(&mut px, None);
        stamp_tone(&mut t, 4.0, 4.0, 1.0, 1.0, ToneMode::Sponge);
        let p = *px.get_pixel(4, 4);
        assert!(p[0] > 150 && p[1] < 100, "got {:?}", p);
        assert_eq!(p[1], p[2]);
        assert_eq!(p[3], 255);

        let mut t = target(&mut px, None);
        stamp_tone(&mut t, 1.0, 1.0, 1.0, 1.0, ToneMode::Sponge);
        assert_eq!(*px.get_pixel(1, 1), Rgba([80, 80, 80, 255]));
    }

    #[test]
    fn smudge_drags_pickup_color_along() {
        let mut px = PixelBuffer::new_filled(16, 4, Rgba([0, 0, 255, 255]));
        let mut pickup = [255.0, 0.0, 0.0, 255.0];
        let mut t = target(&mut px, None);
        stamp_smudge(&mut t, 10.0, 2.0, 4.0, 1.0, &mut pickup);
        let center = *px.get_pixel(10, 2);
        assert!(center[0] > 0 && center[2] < 255, "got {:?}", center);
        assert_eq!(*px.get_pixel(15, 2), Rgba([0, 0, 255, 255]));
        assert!(pickup[2] > 0.0 && pickup[0] < 255.0);
    }

    #[test]
    fn clone_copies_from_displaced_source() {
        let mut px = PixelBuffer::new(16, 16);
        px.put_pixel(2, 2, Rgba([0, 255, 0, 255]));
        let source = px.clone();
        let mut t = target(&mut px, None);
        stamp_clone(&mut t, &source, 10.0, 10.0, 1.0, (-8, -8), 1.0);
        assert_eq!(*px.get_pixel(10, 10), Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn writes_follow_layer_offset() {
        let mut px = PixelBuffer::new(8, 8);
        let mut t = PaintTarget { pixels: &mut px, offset: (2, 0), canvas_w: 8, canvas_h: 8, selection: None };
        stamp_pencil(&mut t, 4.0, 1.0, 1.0, Rgba([1, 2, 3, 255]));
        assert_eq!(*px.get_pixel(2, 1), Rgba([1, 2, 3, 255]));
    }
}
