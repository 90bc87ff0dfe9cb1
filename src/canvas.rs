use std::sync::Arc;

use image::{GrayImage, Rgba, RgbaImage};
use rayon::prelude::*;

use crate::components::layers::{Layer, LayerStack};
use crate::components::selection::Selection;
use crate::error::{EditorError, Result};

// ============================================================================
// PIXEL BUFFER – sparse 64×64 chunk storage (Vec-indexed for speed)
// ============================================================================

pub const CHUNK_SIZE: u32 = 64;

/// Largest canvas edge, in pixels.
pub const MAX_CANVAS_DIM: u32 = 32_768;

/// Largest pixel count a canvas may hold.
pub const MAX_PIXELS: u64 = 256_000_000;

/// A pixel with zero alpha, returned by reference for missing chunks.
static TRANSPARENT_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// RGBA8 pixel storage backed by a flat `Vec<Option<Arc<RgbaImage>>>`.
///
/// Chunk coordinates map to a flat index via `cy * chunks_per_row + cx`.
/// A missing chunk reads as fully transparent.
///
/// Chunks are wrapped in `Arc` for copy-on-write: `clone()` only bumps
/// reference counts, and every mutation goes through `Arc::make_mut`, so a
/// clone taken for history is never affected by later painting.
#[derive(Clone, Debug)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    chunks_per_row: u32,
    chunks: Vec<Option<Arc<RgbaImage>>>,
}

impl PixelBuffer {
    // ---- construction -------------------------------------------------------

    /// Create a fully transparent buffer. Callers validate the size first
    /// (see [`check_canvas_size`]); no pixel memory is allocated here.
    pub fn new(width: u32, height: u32) -> Self {
        let chunks_per_row = width.div_ceil(CHUNK_SIZE);
        let chunks_per_col = height.div_ceil(CHUNK_SIZE);
        Self {
            width,
            height,
            chunks_per_row,
            chunks: vec![None; (chunks_per_row * chunks_per_col) as usize],
        }
    }

    /// Buffer with every pixel set to `color`. A transparent fill allocates nothing.
    pub fn new_filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        let mut buf = Self::new(width, height);
        if color[3] > 0 {
            buf.fill(color);
        }
        buf
    }

    /// Import from a flat `RgbaImage`. Fully transparent chunks are not stored.
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let mut buf = Self::new(src.width(), src.height());
        let cpr = buf.chunks_per_row;
        let (w, h) = (buf.width, buf.height);
        let src_raw = src.as_raw();
        let stride = w as usize * 4;

        buf.chunks
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, slot)| {
                let cx = i as u32 % cpr;
                let cy = i as u32 / cpr;
                let base_x = cx * CHUNK_SIZE;
                let base_y = cy * CHUNK_SIZE;
                let cw = CHUNK_SIZE.min(w - base_x) as usize;
                let ch = CHUNK_SIZE.min(h - base_y) as usize;

                let mut chunk = RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE);
                let mut any = false;
                {
                    let dst = chunk.as_mut();
                    let dst_stride = CHUNK_SIZE as usize * 4;
                    for ly in 0..ch {
                        let s = (base_y as usize + ly) * stride + base_x as usize * 4;
                        let row = &src_raw[s..s + cw * 4];
                        if !any && row.chunks_exact(4).any(|p| p[3] != 0) {
                            any = true;
                        }
                        dst[ly * dst_stride..ly * dst_stride + cw * 4].copy_from_slice(row);
                    }
                }
                if any {
                    *slot = Some(Arc::new(chunk));
                }
            });
        buf
    }

    /// Flatten back to a contiguous `RgbaImage`.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        let out_raw: &mut [u8] = out.as_mut();
        let out_stride = self.width as usize * 4;
        for (cx, cy) in self.chunk_keys() {
            let Some(chunk) = self.get_chunk(cx, cy) else { continue };
            let base_x = cx * CHUNK_SIZE;
            let base_y = cy * CHUNK_SIZE;
            let cw = CHUNK_SIZE.min(self.width - base_x) as usize;
            let ch = CHUNK_SIZE.min(self.height - base_y) as usize;
            let chunk_raw = chunk.as_raw();
            let chunk_stride = CHUNK_SIZE as usize * 4;
            for ly in 0..ch {
                let src = ly * chunk_stride;
                let dst = (base_y as usize + ly) * out_stride + base_x as usize * 4;
                out_raw[dst..dst + cw * 4].copy_from_slice(&chunk_raw[src..src + cw * 4]);
            }
        }
        out
    }

    /// Copy a `width × height` window whose top-left sits at `(x0, y0)` in this
    /// buffer's coordinates. Parts of the window outside the buffer come back
    /// transparent, so this serves both crop (window inside) and canvas growth.
    pub fn region(&self, x0: i64, y0: i64, width: u32, height: u32) -> PixelBuffer {
        // Identity window: share every chunk.
        if x0 == 0 && y0 == 0 && width == self.width && height == self.height {
            return self.clone();
        }
        let mut out = PixelBuffer::new(width, height);
        let mut row = vec![0u8; out.width as usize * 4];
        for y in 0..out.height {
            let sy = y0 + y as i64;
            if sy < 0 || sy >= self.height as i64 {
                continue;
            }
            row.fill(0);
            let mut any = false;
            for x in 0..out.width {
                let sx = x0 + x as i64;
                if sx < 0 || sx >= self.width as i64 {
                    continue;
                }
                let p = self.get_pixel(sx as u32, sy as u32);
                if p.0 != [0, 0, 0, 0] {
                    let o = x as usize * 4;
                    row[o..o + 4].copy_from_slice(&p.0);
                    any = true;
                }
            }
            if any {
                out.write_row(y, &row);
            }
        }
        out
    }

    // ---- pixel access -------------------------------------------------------

    /// Read a pixel (returns `&TRANSPARENT_PIXEL` outside the buffer or in a missing chunk).
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> &Rgba<u8> {
        if x >= self.width || y >= self.height {
            return &TRANSPARENT_PIXEL;
        }
        let idx = self.flat_index(x / CHUNK_SIZE, y / CHUNK_SIZE);
        self.chunks[idx]
            .as_ref()
            .map(|c| c.get_pixel(x % CHUNK_SIZE, y % CHUNK_SIZE))
            .unwrap_or(&TRANSPARENT_PIXEL)
    }

    /// Signed-coordinate read used by the compositor and samplers.
    #[inline]
    pub fn sample(&self, x: i64, y: i64) -> Rgba<u8> {
        if x < 0 || y < 0 {
            return TRANSPARENT_PIXEL;
        }
        *self.get_pixel(x.min(u32::MAX as i64) as u32, y.min(u32::MAX as i64) as u32)
    }

    /// Write a pixel (creates the chunk on demand, COW-clones if shared).
    /// Writes outside the buffer are dropped.
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: Rgba<u8>) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = self.flat_index(x / CHUNK_SIZE, y / CHUNK_SIZE);
        if pixel[3] == 0 && pixel.0 == [0, 0, 0, 0] && self.chunks[idx].is_none() {
            return;
        }
        let arc = self.chunks[idx]
            .get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
        Arc::make_mut(arc).put_pixel(x % CHUNK_SIZE, y % CHUNK_SIZE, pixel);
    }

    /// Overwrite one full row from tightly packed RGBA bytes.
    fn write_row(&mut self, y: u32, data: &[u8]) {
        debug_assert_eq!(data.len(), self.width as usize * 4);
        let cy = y / CHUNK_SIZE;
        let ly = (y % CHUNK_SIZE) as usize;
        for cx in 0..self.chunks_per_row {
            let base_x = (cx * CHUNK_SIZE) as usize;
            let run = (CHUNK_SIZE.min(self.width - cx * CHUNK_SIZE)) as usize;
            let src = &data[base_x * 4..(base_x + run) * 4];
            let idx = self.flat_index(cx, cy);
            if self.chunks[idx].is_none() && src.iter().all(|&b| b == 0) {
                continue;
            }
            let arc = self.chunks[idx]
                .get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
            let chunk = Arc::make_mut(arc);
            let dst = ly * CHUNK_SIZE as usize * 4;
            chunk.as_mut()[dst..dst + run * 4].copy_from_slice(src);
        }
    }

    /// Read-only access to a chunk (if it exists).
    pub fn get_chunk(&self, cx: u32, cy: u32) -> Option<&RgbaImage> {
        let idx = self.flat_index(cx, cy);
        self.chunks.get(idx).and_then(|c| c.as_deref())
    }

    /// Place a fully-built chunk at the given chunk coordinate.
    pub fn set_chunk(&mut self, cx: u32, cy: u32, chunk: RgbaImage) {
        if cx >= self.chunks_per_row {
            return;
        }
        let idx = self.flat_index(cx, cy);
        if idx < self.chunks.len() {
            self.chunks[idx] = Some(Arc::new(chunk));
        }
    }

    /// Iterator over populated chunk coordinates.
    pub fn chunk_keys(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let cpr = self.chunks_per_row;
        self.chunks
            .iter()
            .enumerate()
            .filter_map(move |(i, slot)| slot.as_ref().map(|_| ((i as u32) % cpr, (i as u32) / cpr)))
    }

    /// Number of populated chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Number of chunks whose storage is physically shared with `other`.
    pub fn shared_chunk_count(&self, other: &PixelBuffer) -> usize {
        self.chunks
            .iter()
            .zip(other.chunks.iter())
            .filter(|(a, b)| match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            })
            .count()
    }

    // ---- bulk operations ----------------------------------------------------

    /// Fill every pixel with `color`. Edge chunks keep their padding transparent.
    pub fn fill(&mut self, color: Rgba<u8>) {
        let tile = |w: u32, h: u32| {
            let mut t = RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE);
            for y in 0..h {
                for x in 0..w {
                    t.put_pixel(x, y, color);
                }
            }
            Arc::new(t)
        };
        let full = tile(CHUNK_SIZE, CHUNK_SIZE);
        for i in 0..self.chunks.len() {
            let cx = i as u32 % self.chunks_per_row;
            let cy = i as u32 / self.chunks_per_row;
            let cw = CHUNK_SIZE.min(self.width - cx * CHUNK_SIZE);
            let ch = CHUNK_SIZE.min(self.height - cy * CHUNK_SIZE);
            self.chunks[i] = Some(if cw == CHUNK_SIZE && ch == CHUNK_SIZE {
                Arc::clone(&full)
            } else {
                tile(cw, ch)
            });
        }
    }

    /// Width accessor (matches `RgbaImage::width()`).
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height accessor (matches `RgbaImage::height()`).
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn flat_index(&self, cx: u32, cy: u32) -> usize {
        (cy * self.chunks_per_row + cx) as usize
    }
}

impl PartialEq for PixelBuffer {
    /// Pixel-content equality; a missing chunk equals an all-transparent one.
    /// Padding past the right and bottom edges of edge chunks is ignored.
    fn eq(&self, other: &Self) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        let row_bytes = CHUNK_SIZE as usize * 4;
        self.chunks.iter().zip(other.chunks.iter()).enumerate().all(|(i, (a, b))| {
            let cx = i as u32 % self.chunks_per_row;
            let cy = i as u32 / self.chunks_per_row;
            let cw = CHUNK_SIZE.min(self.width - cx * CHUNK_SIZE) as usize * 4;
            let ch = CHUNK_SIZE.min(self.height - cy * CHUNK_SIZE) as usize;
            fn rows_of(c: &RgbaImage, ch: usize, row_bytes: usize, cw: usize) -> Vec<&[u8]> {
                let raw = c.as_raw();
                (0..ch).map(move |ly| &raw[ly * row_bytes..ly * row_bytes + cw]).collect::<Vec<_>>()
            }
            let rows = |c| rows_of(c, ch, row_bytes, cw);
            match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b) || rows(a) == rows(b),
                (Some(c), None) | (None, Some(c)) => rows(c).iter().all(|r| r.iter().all(|&v| v == 0)),
            }
        })
    }
}

// ============================================================================
// DOCUMENT – canvas dimensions, layer stack, selection
// ============================================================================

/// Smallest width or height accepted by crop and canvas resize.
pub const MIN_CANVAS_EDGE: u32 = 4;

/// Reject canvas sizes that are empty or exceed [`MAX_CANVAS_DIM`] on
/// either axis or [`MAX_PIXELS`] in total.
pub fn check_canvas_size(width: u32, height: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(EditorError::DegenerateRect { width, height, min: 1 });
    }
    if width > MAX_CANVAS_DIM || height > MAX_CANVAS_DIM || width as u64 * height as u64 > MAX_PIXELS {
        return Err(EditorError::CanvasTooLarge { width, height });
    }
    Ok(())
}

/// One open image: every layer buffer matches `width × height`.
#[derive(Clone, Debug)]
pub struct Document {
    pub width: u32,
    pub height: u32,
    pub layers: LayerStack,
    /// `None` means the whole canvas is selected.
    pub selection: Option<Selection>,
}

impl Document {
    /// New document with a single "Background" layer filled with `background`.
    pub fn new(width: u32, height: u32, background: Rgba<u8>) -> Result<Self> {
        check_canvas_size(width, height)?;
        let base = Layer::new("Background".to_string(), width, height, background);
        Ok(Self {
            width,
            height,
            layers: LayerStack::new(base),
            selection: None,
        })
    }

    /// Transparent canvas-sized layer, not yet inserted.
    pub fn blank_layer(&self, name: impl Into<String>) -> Layer {
        Layer::new(name.into(), self.width, self.height, Rgba([0, 0, 0, 0]))
    }

    pub fn active_layer(&self) -> &Layer {
        self.layers.active()
    }

    pub fn active_layer_mut(&mut self) -> &mut Layer {
        self.layers.active_mut()
    }

    /// The selection mask, if a selection is active.
    pub fn selection_mask(&self) -> Option<&GrayImage> {
        self.selection.as_ref().map(|s| &s.mask)
    }

    /// Whether `(x, y)` may be touched by a tool that honors the selection.
    #[inline]
    pub fn is_selected(&self, x: u32, y: u32) -> bool {
        match &self.selection {
            Some(sel) => sel.contains(x, y),
            None => true,
        }
    }

    /// True when every layer buffer has the canvas dimensions.
    pub fn dimensions_consistent(&self) -> bool {
        self.layers
            .iter_bottom_up()
            .all(|l| l.pixels.width() == self.width && l.pixels.height() == self.height)
    }

    /// Pixel under a pointer position, or `None` outside the canvas.
    pub fn pixel_at(&self, x: f32, y: f32) -> Option<(u32, u32)> {
        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return None;
        }
        let (px, py) = (x.floor() as u32, y.floor() as u32);
        (px < self.width && py < self.height).then_some((px, py))
    }
}
