use image::{GrayImage, Luma};

use crate::canvas::MIN_CANVAS_EDGE;
use crate::components::layers::Layer;
use crate::ops::fill;

// ============================================================================
// SELECTION – canvas-sized mask plus the path drawn as its outline
// ============================================================================

/// Path the overlay draws for a selection.
///
/// Marquee and magic wand selections are outlined by their bounding
/// rectangle; lasso selections keep the exact polygon the user drew.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectionOutline {
    /// Half-open pixel rectangle `[min, max)`.
    Rect { min_x: u32, min_y: u32, max_x: u32, max_y: u32 },
    Polygon(Vec<(f32, f32)>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    /// 255 = selected, 0 = not selected. Always canvas-sized.
    pub mask: GrayImage,
    pub outline: SelectionOutline,
}

impl Selection {
    /// Rectangle between two pixel corners, in either order. The rectangle is
    /// half-open: pixels `min..max` on each axis.
    pub fn rectangle(canvas_w: u32, canvas_h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        let (min_x, max_x) = (x0.min(x1), x0.max(x1));
        let (min_y, max_y) = (y0.min(y1), y0.max(y1));
        let shape = SelectionShape::Rectangle { min_x, min_y, max_x, max_y };
        Self {
            mask: shape.rasterize(canvas_w, canvas_h),
            outline: SelectionOutline::Rect {
                min_x: min_x.min(canvas_w),
                min_y: min_y.min(canvas_h),
                max_x: max_x.min(canvas_w),
                max_y: max_y.min(canvas_h),
            },
        }
    }

    /// Ellipse inscribed in the rectangle between two corners.
    pub fn ellipse(canvas_w: u32, canvas_h: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        let (min_x, max_x) = (x0.min(x1), x0.max(x1));
        let (min_y, max_y) = (y0.min(y1), y0.max(y1));
        let shape = SelectionShape::Ellipse {
            cx: (min_x + max_x) as f32 / 2.0,
            cy: (min_y + max_y) as f32 / 2.0,
            rx: (max_x - min_x) as f32 / 2.0,
            ry: (max_y - min_y) as f32 / 2.0,
        };
        Self {
            mask: shape.rasterize(canvas_w, canvas_h),
            outline: SelectionOutline::Rect {
                min_x: min_x.min(canvas_w),
                min_y: min_y.min(canvas_h),
                max_x: max_x.min(canvas_w),
                max_y: max_y.min(canvas_h),
            },
        }
    }

    /// Closed polygon (lasso). The outline is the polygon itself.
    pub fn polygon(canvas_w: u32, canvas_h: u32, points: Vec<(f32, f32)>) -> Self {
        let mut mask = GrayImage::new(canvas_w, canvas_h);
        fill_polygon(&mut mask, &points);
        Self {
            mask,
            outline: SelectionOutline::Polygon(points),
        }
    }

    /// Wrap an arbitrary mask; the outline is its bounding rectangle.
    /// Returns `None` for an empty mask.
    pub fn from_mask(mask: GrayImage) -> Option<Self> {
        let (min_x, min_y, max_x, max_y) = mask_bounds(&mask)?;
        Some(Self {
            mask,
            outline: SelectionOutline::Rect {
                min_x,
                min_y,
                max_x: max_x + 1,
                max_y: max_y + 1,
            },
        })
    }

    #[inline]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x < self.mask.width() && y < self.mask.height() && self.mask.get_pixel(x, y).0[0] > 0
    }

    /// Inclusive bounds of the selected pixels.
    pub fn bounds(&self) -> Option<(u32, u32, u32, u32)> {
        mask_bounds(&self.mask)
    }

    pub fn is_empty(&self) -> bool {
        self.mask.pixels().all(|p| p.0[0] == 0)
    }

    pub fn selected_count(&self) -> usize {
        self.mask.pixels().filter(|p| p.0[0] > 0).count()
    }
}

fn mask_bounds(mask: &GrayImage) -> Option<(u32, u32, u32, u32)> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, p) in mask.enumerate_pixels() {
        if p.0[0] == 0 {
            continue;
        }
        bounds = Some(match bounds {
            None => (x, y, x, y),
            Some((a, b, c, d)) => (a.min(x), b.min(y), c.max(x), d.max(y)),
        });
    }
    bounds
}

/// Geometry captured by a selection drag, before rasterization.
#[derive(Clone, Debug)]
pub enum SelectionShape {
    /// Half-open `[min, max)`.
    Rectangle { min_x: u32, min_y: u32, max_x: u32, max_y: u32 },
    Ellipse { cx: f32, cy: f32, rx: f32, ry: f32 },
    Polygon(Vec<(f32, f32)>),
}

impl SelectionShape {
    /// Whether the pixel centered at `(x + 0.5, y + 0.5)` is inside.
    /// Polygons are tested by scanline in `rasterize` instead.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        match self {
            SelectionShape::Rectangle { min_x, min_y, max_x, max_y } => {
                x >= *min_x && x < *max_x && y >= *min_y && y < *max_y
            }
            SelectionShape::Ellipse { cx, cy, rx, ry } => {
                if *rx <= 0.0 || *ry <= 0.0 {
                    return false;
                }
                let dx = (x as f32 + 0.5 - cx) / rx;
                let dy = (y as f32 + 0.5 - cy) / ry;
                dx * dx + dy * dy <= 1.0
            }
            SelectionShape::Polygon(_) => false,
        }
    }

    /// Render into a canvas-sized mask.
    pub fn rasterize(&self, canvas_w: u32, canvas_h: u32) -> GrayImage {
        let mut mask = GrayImage::new(canvas_w, canvas_h);
        match self {
            SelectionShape::Polygon(points) => fill_polygon(&mut mask, points),
            _ => {
                let (x0, y0, x1, y1) = self.bounds(canvas_w, canvas_h);
                for y in y0..y1 {
                    for x in x0..x1 {
                        if self.contains(x, y) {
                            mask.put_pixel(x, y, Luma([255]));
                        }
                    }
                }
            }
        }
        mask
    }

    /// Half-open bounding box clamped to the canvas.
    pub fn bounds(&self, canvas_w: u32, canvas_h: u32) -> (u32, u32, u32, u32) {
        match self {
            SelectionShape::Rectangle { min_x, min_y, max_x, max_y } => (
                (*min_x).min(canvas_w),
                (*min_y).min(canvas_h),
                (*max_x).min(canvas_w),
                (*max_y).min(canvas_h),
            ),
            SelectionShape::Ellipse { cx, cy, rx, ry } => (
                (cx - rx).max(0.0).floor() as u32,
                (cy - ry).max(0.0).floor() as u32,
                ((cx + rx).max(0.0).ceil() as u32).min(canvas_w),
                ((cy + ry).max(0.0).ceil() as u32).min(canvas_h),
            ),
            SelectionShape::Polygon(points) => {
                let (mut x0, mut y0, mut x1, mut y1) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
                for &(x, y) in points {
                    x0 = x0.min(x);
                    y0 = y0.min(y);
                    x1 = x1.max(x);
                    y1 = y1.max(y);
                }
                if points.is_empty() {
                    return (0, 0, 0, 0);
                }
                (
                    x0.max(0.0).floor() as u32,
                    y0.max(0.0).floor() as u32,
                    (x1.max(0.0).ceil() as u32).min(canvas_w),
                    (y1.max(0.0).ceil() as u32).min(canvas_h),
                )
            }
        }
    }
}

/// Even-odd scanline fill sampled at pixel centers.
fn fill_polygon(mask: &mut GrayImage, points: &[(f32, f32)]) {
    if points.len() < 3 {
        return;
    }
    let (w, h) = (mask.width(), mask.height());
    let mut crossings: Vec<f32> = Vec::with_capacity(points.len());
    for y in 0..h {
        let sy = y as f32 + 0.5;
        crossings.clear();
        for i in 0..points.len() {
            let (ax, ay) = points[i];
            let (bx, by) = points[(i + 1) % points.len()];
            if (ay <= sy && sy < by) || (by <= sy && sy < ay) {
                crossings.push(ax + (sy - ay) / (by - ay) * (bx - ax));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));
        for pair in crossings.chunks_exact(2) {
            // pixel x is inside when its center x + 0.5 lies in [n0, n1)
            let start = (pair[0] - 0.5).ceil().max(0.0) as u32;
            let end = ((pair[1] - 0.5).ceil().max(0.0) as u32).min(w);
            for x in start..end {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }
}

// ============================================================================
// SELECTION ENGINE – pointer-driven marquee, lasso and crop capture
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionKind {
    Rectangle,
    Ellipse,
    Lasso,
    Crop,
}

/// What a completed drag produced.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectionOutcome {
    Selected(Selection),
    /// A click without area; the selection is removed.
    Cleared,
    /// Crop rectangle in canvas pixels, at least the minimum edge on both axes.
    Crop { x: u32, y: u32, width: u32, height: u32 },
    /// Crop rectangle too small; nothing changes.
    Rejected,
}

#[derive(Clone, Debug)]
struct Drag {
    kind: SelectionKind,
    start: (f32, f32),
    current: (f32, f32),
    points: Vec<(f32, f32)>,
}

/// Tracks one in-progress selection drag at a time.
#[derive(Clone, Debug, Default)]
pub struct SelectionEngine {
    drag: Option<Drag>,
}

impl SelectionEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, kind: SelectionKind, x: f32, y: f32) {
        self.drag = Some(Drag {
            kind,
            start: (x, y),
            current: (x, y),
            points: vec![(x, y)],
        });
    }

    pub fn update(&mut self, x: f32, y: f32) {
        if let Some(drag) = &mut self.drag {
            drag.current = (x, y);
            if drag.kind == SelectionKind::Lasso && drag.points.last() != Some(&(x, y)) {
                drag.points.push((x, y));
            }
        }
    }

    /// Drop an unfinished drag (tool switched mid-gesture).
    pub fn cancel(&mut self) {
        if self.drag.take().is_some() {
            log::debug!("selection drag abandoned");
        }
    }

    pub fn is_active(&self) -> bool {
        self.drag.is_some()
    }

    /// Outline to draw while the drag is still in progress.
    pub fn preview_outline(&self) -> Option<SelectionOutline> {
        let drag = self.drag.as_ref()?;
        Some(match drag.kind {
            SelectionKind::Lasso => SelectionOutline::Polygon(drag.points.clone()),
            _ => {
                let (x0, y0, x1, y1) = drag_corners(drag.start, drag.current);
                SelectionOutline::Rect {
                    min_x: x0.min(x1),
                    min_y: y0.min(y1),
                    max_x: x0.max(x1),
                    max_y: y0.max(y1),
                }
            }
        })
    }

    /// Complete the drag and rasterize it against the canvas.
    pub fn finish(&mut self, canvas_w: u32, canvas_h: u32) -> Option<SelectionOutcome> {
        let drag = self.drag.take()?;
        let (x0, y0, x1, y1) = drag_corners(drag.start, drag.current);
        let clamp = |v: u32, max: u32| v.min(max);
        let (x0, x1) = (clamp(x0, canvas_w), clamp(x1, canvas_w));
        let (y0, y1) = (clamp(y0, canvas_h), clamp(y1, canvas_h));
        let (width, height) = (x0.abs_diff(x1), y0.abs_diff(y1));

        let outcome = match drag.kind {
            SelectionKind::Rectangle | SelectionKind::Ellipse if width == 0 || height == 0 => {
                SelectionOutcome::Cleared
            }
            SelectionKind::Rectangle => {
                SelectionOutcome::Selected(Selection::rectangle(canvas_w, canvas_h, x0, y0, x1, y1))
            }
            SelectionKind::Ellipse => {
                SelectionOutcome::Selected(Selection::ellipse(canvas_w, canvas_h, x0, y0, x1, y1))
            }
            SelectionKind::Lasso => {
                if drag.points.len() < 3 {
                    SelectionOutcome::Cleared
                } else {
                    let sel = Selection::polygon(canvas_w, canvas_h, drag.points);
                    if sel.is_empty() {
                        SelectionOutcome::Cleared
                    } else {
                        SelectionOutcome::Selected(sel)
                    }
                }
            }
            SelectionKind::Crop => {
                if width < MIN_CANVAS_EDGE || height < MIN_CANVAS_EDGE {
                    log::debug!("crop of {}x{} rejected", width, height);
                    SelectionOutcome::Rejected
                } else {
                    SelectionOutcome::Crop {
                        x: x0.min(x1),
                        y: y0.min(y1),
                        width,
                        height,
                    }
                }
            }
        };
        Some(outcome)
    }
}

/// Snap drag endpoints to the nearest pixel boundary.
fn drag_corners(start: (f32, f32), current: (f32, f32)) -> (u32, u32, u32, u32) {
    let snap = |v: f32| if v.is_finite() { v.round().max(0.0) as u32 } else { 0 };
    (snap(start.0), snap(start.1), snap(current.0), snap(current.1))
}

// ============================================================================
// MAGIC WAND
// ============================================================================

/// Color-tolerant flood from canvas pixel `(x, y)` over `layer`.
/// Returns `None` if the click misses the layer's pixels.
pub fn magic_wand(
    layer: &Layer,
    canvas_w: u32,
    canvas_h: u32,
    x: u32,
    y: u32,
    tolerance: u32,
) -> Option<Selection> {
    let bx = x as i64 - layer.offset_x as i64;
    let by = y as i64 - layer.offset_y as i64;
    if bx < 0 || by < 0 {
        return None;
    }
    let region = fill::flood_region(&layer.pixels, bx as u32, by as u32, tolerance)?;
    let mask = fill::mask_to_canvas(&region.mask, (layer.offset_x, layer.offset_y), canvas_w, canvas_h);
    Selection::from_mask(mask)
}
