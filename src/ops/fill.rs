use image::{GrayImage, Luma, Rgba};

use crate::canvas::PixelBuffer;
use crate::components::colors::lerp_color;
use crate::ops::brush::PaintTarget;
use crate::ops::compositor::{BlendMode, blend_pixel};

/// Sum of absolute per-channel differences (RGBA), 0..=1020.
#[inline]
pub fn color_distance(a: Rgba<u8>, b: Rgba<u8>) -> u32 {
    a.0.iter()
        .zip(b.0.iter())
        .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs())
        .sum()
}

/// Result of a 4-connected flood over one buffer.
pub struct FloodRegion {
    /// 255 for every reached pixel, buffer-sized.
    pub mask: GrayImage,
    /// Inclusive bounds `(min_x, min_y, max_x, max_y)` of the reached pixels.
    pub bounds: (u32, u32, u32, u32),
    pub count: usize,
}

impl FloodRegion {
    #[inline]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.mask.width() && y < self.mask.height() && self.mask.get_pixel(x, y).0[0] > 0
    }
}

/// Flood outward from `(x, y)` over 4-connected neighbours whose distance to
/// the seed color is at most `tolerance` (inclusive). Tolerance 0 keeps only
/// exact matches. Returns `None` when the seed lies outside the buffer.
pub fn flood_region(buf: &PixelBuffer, x: u32, y: u32, tolerance: u32) -> Option<FloodRegion> {
    let (w, h) = (buf.width(), buf.height());
    if x >= w || y >= h {
        return None;
    }
    let flat = buf.to_rgba_image();
    let raw = flat.as_raw();
    let wu = w as usize;

    #[inline(always)]
    fn pix(flat: &[u8], idx: usize) -> Rgba<u8> {
        let o = idx * 4;
        Rgba([flat[o], flat[o + 1], flat[o + 2], flat[o + 3]])
    }

    let seed_idx = y as usize * wu + x as usize;
    let seed = pix(raw, seed_idx);
    let matches = |idx: usize| color_distance(pix(raw, idx), seed) <= tolerance;

    // mask doubles as the visited array and the output
    let mut mask = vec![0u8; wu * h as usize];
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (x, y, x, y);
    let mut count = 0usize;

    let mut stack: Vec<usize> = Vec::with_capacity(4096);
    mask[seed_idx] = 255;
    stack.push(seed_idx);

    while let Some(idx) = stack.pop() {
        count += 1;
        let px = (idx % wu) as u32;
        let py = (idx / wu) as u32;
        min_x = min_x.min(px);
        max_x = max_x.max(px);
        min_y = min_y.min(py);
        max_y = max_y.max(py);

        let mut visit = |ni: usize, mask: &mut Vec<u8>| {
            if mask[ni] == 0 && matches(ni) {
                mask[ni] = 255;
                stack.push(ni);
            }
        };
        if px > 0 {
            visit(idx - 1, &mut mask);
        }
        if px + 1 < w {
            visit(idx + 1, &mut mask);
        }
        if py > 0 {
            visit(idx - wu, &mut mask);
        }
        if py + 1 < h {
            visit(idx + wu, &mut mask);
        }
    }

    let mask = GrayImage::from_raw(w, h, mask)?;
    Some(FloodRegion {
        mask,
        bounds: (min_x, min_y, max_x, max_y),
        count,
    })
}

/// Paint bucket: flood from `(x, y)` and set every reached pixel for which
/// `allowed` holds to `color` at full opacity. Returns the number of pixels
/// written.
pub fn bucket_fill(
    buf: &mut PixelBuffer,
    x: u32,
    y: u32,
    color: Rgba<u8>,
    tolerance: u32,
    allowed: impl Fn(u32, u32) -> bool,
) -> usize {
    let Some(region) = flood_region(buf, x, y, tolerance) else {
        return 0;
    };
    let (x0, y0, x1, y1) = region.bounds;
    let mut written = 0;
    for py in y0..=y1 {
        for px in x0..=x1 {
            if region.contains(px, py) && allowed(px, py) {
                buf.put_pixel(px, py, color);
                written += 1;
            }
        }
    }
    written
}

/// Shift a buffer-space mask into canvas space (`offset` = layer offset),
/// clipping to the canvas.
pub fn mask_to_canvas(mask: &GrayImage, offset: (i32, i32), canvas_w: u32, canvas_h: u32) -> GrayImage {
    let mut out = GrayImage::new(canvas_w, canvas_h);
    for (x, y, p) in mask.enumerate_pixels() {
        if p.0[0] == 0 {
            continue;
        }
        let cx = x as i64 + offset.0 as i64;
        let cy = y as i64 + offset.1 as i64;
        if cx >= 0 && cy >= 0 && cx < canvas_w as i64 && cy < canvas_h as i64 {
            out.put_pixel(cx as u32, cy as u32, Luma([255]));
        }
    }
    out
}

/// Linear gradient along `start → end` (canvas coordinates) over the whole
/// layer buffer, blended at `opacity`. Buffer pixels that sit off the canvas
/// are filled too, unless a selection is active. Pixels before `start` take
/// `from`, pixels past `end` take `to`. Returns `false` for a zero-length drag.
pub fn fill_gradient(
    target: &mut PaintTarget,
    start: (f32, f32),
    end: (f32, f32),
    from: Rgba<u8>,
    to: Rgba<u8>,
    opacity: f32,
) -> bool {
    let (dx, dy) = (end.0 - start.0, end.1 - start.1);
    let len_sq = dx * dx + dy * dy;
    if len_sq < 1e-6 {
        return false;
    }
    let (ox, oy) = (target.offset.0 as i64, target.offset.1 as i64);
    for by in 0..target.pixels.height() {
        for bx in 0..target.pixels.width() {
            let (x, y) = (bx as i64 + ox, by as i64 + oy);
            if target.selection.is_some() && !target.writable(x, y) {
                continue;
            }
            let px = x as f32 + 0.5 - start.0;
            let py = y as f32 + 0.5 - start.1;
            let t = ((px * dx + py * dy) / len_sq).clamp(0.0, 1.0);
            let color = lerp_color(from, to, t);
            let existing = *target.pixels.get_pixel(bx, by);
            target
                .pixels
                .put_pixel(bx, by, blend_pixel(existing, color, BlendMode::Normal, opacity));
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 6x6 white buffer split by a black vertical wall at x = 3.
    fn walled() -> PixelBuffer {
        let mut buf = PixelBuffer::new_filled(6, 6, Rgba([255, 255, 255, 255]));
        for y in 0..6 {
            buf.put_pixel(3, y, Rgba([0, 0, 0, 255]));
        }
        buf
    }

    #[test]
    fn distance_sums_all_channels() {
        assert_eq!(color_distance(Rgba([10, 20, 30, 40]), Rgba([12, 18, 30, 50])), 14);
        assert_eq!(color_distance(Rgba([0; 4]), Rgba([255; 4])), 1020);
    }

    #[test]
    fn flood_stays_on_its_side_of_the_wall() {
        let buf = walled();
        let region = flood_region(&buf, 0, 0, 0).unwrap();
        assert_eq!(region.count, 18);
        assert_eq!(region.bounds, (0, 0, 2, 5));
        assert!(!region.contains(3, 0));
        assert!(!region.contains(4, 0));
    }

    #[test]
    fn tolerance_is_inclusive() {
        let mut buf = PixelBuffer::new_filled(3, 1, Rgba([100, 100, 100, 255]));
        buf.put_pixel(1, 0, Rgba([110, 100, 100, 255]));
        assert_eq!(flood_region(&buf, 0, 0, 9).unwrap().count, 1);
        assert_eq!(flood_region(&buf, 0, 0, 10).unwrap().count, 3);
    }

    #[test]
    fn transparent_seed_floods_transparency() {
        let mut buf = PixelBuffer::new(4, 4);
        buf.put_pixel(2, 2, Rgba([255, 0, 0, 255]));
        let region = flood_region(&buf, 0, 0, 0).unwrap();
        assert_eq!(region.count, 15);
    }

    #[test]
    fn bucket_fill_respects_allowed_pixels() {
        let mut buf = walled();
        let n = bucket_fill(&mut buf, 5, 5, Rgba([0, 255, 0, 255]), 0, |_, y| y < 3);
        assert_eq!(n, 6);
        assert_eq!(*buf.get_pixel(4, 0), Rgba([0, 255, 0, 255]));
        assert_eq!(*buf.get_pixel(4, 4), Rgba([255, 255, 255, 255]));
        assert_eq!(*buf.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn gradient_runs_primary_to_secondary() {
        let mut buf = PixelBuffer::new(10, 2);
        let mut target = PaintTarget { pixels: &mut buf, offset: (0, 0), canvas_w: 10, canvas_h: 2, selection: None };
        let black = Rgba([0, 0, 0, 255]);
        let white = Rgba([255, 255, 255, 255]);
        assert!(fill_gradient(&mut target, (0.0, 0.0), (10.0, 0.0), black, white, 1.0));
        assert_eq!(*buf.get_pixel(0, 1), Rgba([13, 13, 13, 255]));
        assert_eq!(*buf.get_pixel(9, 0), Rgba([242, 242, 242, 255]));
        assert!(buf.get_pixel(3, 0)[0] < buf.get_pixel(6, 0)[0]);
    }

    #[test]
    fn gradient_covers_offset_layer_beyond_canvas() {
        let mut buf = PixelBuffer::new(8, 4);
        let mut target = PaintTarget { pixels: &mut buf, offset: (4, 0), canvas_w: 8, canvas_h: 4, selection: None };
        let red = Rgba([255, 0, 0, 255]);
        let blue = Rgba([0, 0, 255, 255]);
        assert!(fill_gradient(&mut target, (0.0, 0.0), (8.0, 0.0), red, blue, 1.0));
        // Buffer x = 7 is shown at canvas x = 11, past the right edge.
        assert_eq!(*buf.get_pixel(7, 3), blue);
        assert_eq!(buf.get_pixel(0, 0)[3], 255);
        assert!(buf.get_pixel(0, 0)[0] > 0 && buf.get_pixel(0, 0)[2] > 0);

        // With a selection only selected canvas pixels change.
        let mut buf = PixelBuffer::new(8, 4);
        let sel = crate::components::selection::Selection::rectangle(8, 4, 0, 0, 6, 4);
        let mut target =
            PaintTarget { pixels: &mut buf, offset: (4, 0), canvas_w: 8, canvas_h: 4, selection: Some(&sel) };
        fill_gradient(&mut target, (0.0, 0.0), (8.0, 0.0), red, blue, 1.0);
        assert_eq!(buf.get_pixel(1, 0)[3], 255);
        assert_eq!(buf.get_pixel(2, 0)[3], 0);
        assert_eq!(buf.get_pixel(7, 0)[3], 0);
    }

    #[test]
    fn zero_length_gradient_is_ignored() {
        let mut buf = PixelBuffer::new(4, 4);
        let mut target = PaintTarget { pixels: &mut buf, offset: (0, 0), canvas_w: 4, canvas_h: 4, selection: None };
        let c = Rgba([1, 2, 3, 255]);
        assert!(!fill_gradient(&mut target, (2.0, 2.0), (2.0, 2.0), c, c, 1.0));
        assert_eq!(buf.chunk_count(), 0);
    }

    #[test]
    fn seed_outside_buffer_does_nothing() {
        let mut buf = walled();
        assert!(flood_region(&buf, 6, 0, 0).is_none());
        assert_eq!(bucket_fill(&mut buf, 0, 99, Rgba([1, 1, 1, 255]), 0, |_, _| true), 0);
    }
}
