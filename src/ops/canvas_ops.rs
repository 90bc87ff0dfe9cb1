// ============================================================================
// CANVAS-LEVEL OPERATIONS — resize and crop every layer at once
// ============================================================================

use crate::canvas::{Document, MIN_CANVAS_EDGE, check_canvas_size};
use crate::error::{EditorError, Result};

fn check_edges(width: u32, height: u32) -> Result<()> {
    if width < MIN_CANVAS_EDGE || height < MIN_CANVAS_EDGE {
        return Err(EditorError::DegenerateRect {
            width,
            height,
            min: MIN_CANVAS_EDGE,
        });
    }
    check_canvas_size(width, height)
}

/// Change the canvas size, keeping content anchored at the top-left.
/// Growing pads with transparency; shrinking discards the right and bottom.
///
/// Layer offsets are kept. A selection no longer matches the canvas and is
/// dropped.
pub fn resize_canvas(doc: &mut Document, width: u32, height: u32) -> Result<()> {
    check_edges(width, height)?;
    for layer in doc.layers.iter_mut() {
        layer.pixels = layer.pixels.region(0, 0, width, height);
    }
    log::info!("canvas resized {}x{} -> {}x{}", doc.width, doc.height, width, height);
    doc.width = width;
    doc.height = height;
    doc.selection = None;
    Ok(())
}

/// Crop every layer to the canvas rectangle `(x, y, width, height)`.
///
/// Each layer keeps what was visible inside the rectangle: the region is read
/// through the layer's offset, and offsets reset to zero afterwards.
pub fn crop(doc: &mut Document, x: u32, y: u32, width: u32, height: u32) -> Result<()> {
    check_edges(width, height)?;
    for layer in doc.layers.iter_mut() {
        let sx = x as i64 - layer.offset_x as i64;
        let sy = y as i64 - layer.offset_y as i64;
        layer.pixels = layer.pixels.region(sx, sy, width, height);
        layer.offset_x = 0;
        layer.offset_y = 0;
    }
    log::info!("canvas cropped to {}x{} at ({}, {})", width, height, x, y);
    doc.width = width;
    doc.height = height;
    doc.selection = None;
    Ok(())
}
