use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::Path;

use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::error::{LimitError, LimitErrorKind};
use image::{ColorType, ImageEncoder, ImageError, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::canvas::{CHUNK_SIZE, Document, PixelBuffer, check_canvas_size};
use crate::components::layers::{Layer, LayerId, LayerStack};
use crate::error::{EditorError, Result};
use crate::ops::compositor::BlendMode;

// ============================================================================
// RASTER EXPORT / IMPORT
// ============================================================================

/// Lossless, alpha-preserving PNG bytes.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    PngEncoder::new(Cursor::new(&mut bytes))
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)
        .map_err(|e| EditorError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Default export name, e.g. `image_800x600.png`.
pub fn export_file_name(stem: &str, width: u32, height: u32) -> String {
    format!("{}_{}x{}.png", stem, width, height)
}

/// Decode any raster format the `image` crate understands.
pub fn decode_raster(bytes: &[u8]) -> Result<RgbaImage> {
    Ok(image::load_from_memory(bytes)?.to_rgba8())
}

/// Largest size with the source aspect ratio that fits `dst_w × dst_h`.
pub fn fit_within(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> (u32, u32) {
    if src_w == 0 || src_h == 0 {
        return (0, 0);
    }
    if src_w == dst_w && src_h == dst_h {
        return (src_w, src_h);
    }
    let scale = (dst_w as f64 / src_w as f64).min(dst_h as f64 / src_h as f64);
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, dst_w.max(1));
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, dst_h.max(1));
    (w, h)
}

/// Decode `bytes` into a new canvas-sized layer: scaled to fit the canvas
/// with its aspect ratio kept, centered, transparent around it.
pub fn raster_to_layer(bytes: &[u8], name: impl Into<String>, canvas_w: u32, canvas_h: u32) -> Result<Layer> {
    place_on_layer(decode_raster(bytes)?, name.into(), canvas_w, canvas_h)
}

fn place_on_layer(src: RgbaImage, name: String, canvas_w: u32, canvas_h: u32) -> Result<Layer> {
    let (w, h) = fit_within(src.width(), src.height(), canvas_w, canvas_h);
    if w == 0 || h == 0 {
        return Err(EditorError::Decode(ImageError::Limits(LimitError::from_kind(
            LimitErrorKind::DimensionError,
        ))));
    }
    let scaled = if (w, h) == src.dimensions() {
        src
    } else {
        image::imageops::resize(&src, w, h, FilterType::Lanczos3)
    };

    let mut placed = RgbaImage::new(canvas_w, canvas_h);
    let x = (canvas_w as i64 - w as i64) / 2;
    let y = (canvas_h as i64 - h as i64) / 2;
    image::imageops::replace(&mut placed, &scaled, x, y);

    let mut layer = Layer::new(name, canvas_w, canvas_h, image::Rgba([0, 0, 0, 0]));
    layer.pixels = PixelBuffer::from_rgba_image(&placed);
    Ok(layer)
}

// ============================================================================
// PCP PROJECT FILE FORMAT
// ============================================================================

/// Magic header for the tiled sparse format
const PCP_MAGIC_V1: &str = "PCP1";

/// Maximum number of layers in a project file.
const MAX_LAYERS: usize = 256;

#[derive(Serialize, Deserialize)]
struct ProjectFileV1 {
    magic: String,
    width: u32,
    height: u32,
    active_layer_index: usize,
    /// Bottom to top.
    layers: Vec<LayerDataV1>,
}

#[derive(Serialize, Deserialize)]
struct LayerDataV1 {
    name: String,
    visible: bool,
    locked: bool,
    opacity: f32,
    blend_mode: u8,
    offset_x: i32,
    offset_y: i32,
    chunks: Vec<ChunkData>,
}

/// A single serialisable chunk (64×64 × 4 bytes = 16 384 bytes of pixel data)
#[derive(Serialize, Deserialize)]
struct ChunkData {
    cx: u32,
    cy: u32,
    pixels: Vec<u8>,
}

fn build_project(doc: &Document) -> ProjectFileV1 {
    let layers = doc
        .layers
        .iter_bottom_up()
        .map(|layer| LayerDataV1 {
            name: layer.name.clone(),
            visible: layer.visible,
            locked: layer.locked,
            opacity: layer.opacity,
            blend_mode: layer.blend_mode.to_u8(),
            offset_x: layer.offset_x,
            offset_y: layer.offset_y,
            chunks: layer
                .pixels
                .chunk_keys()
                .filter_map(|(cx, cy)| {
                    let chunk = layer.pixels.get_chunk(cx, cy)?;
                    Some(ChunkData { cx, cy, pixels: chunk.as_raw().clone() })
                })
                .collect(),
        })
        .collect();

    ProjectFileV1 {
        magic: PCP_MAGIC_V1.to_string(),
        width: doc.width,
        height: doc.height,
        active_layer_index: doc.layers.active_index(),
        layers,
    }
}

/// Save a document as a .pcp project file.
pub fn save_project(doc: &Document, path: &Path) -> Result<()> {
    let project = build_project(doc);
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, &project)?;
    Ok(())
}

/// Load a .pcp project file.
pub fn load_project(path: &Path) -> Result<Document> {
    let raw = std::fs::read(path)?;
    project_from_bytes(&raw)
}

fn invalid(msg: String) -> EditorError {
    EditorError::Project(msg)
}

fn project_from_bytes(raw: &[u8]) -> Result<Document> {
    // bincode encodes a String as an 8-byte length prefix + UTF-8 data, so
    // bytes 8..12 hold the magic.
    if raw.len() < 12 {
        return Err(invalid("file too small".into()));
    }
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != PCP_MAGIC_V1 {
        return Err(invalid(format!("unknown magic '{}'", magic)));
    }

    let project: ProjectFileV1 = bincode::deserialize(raw)?;

    check_canvas_size(project.width, project.height)
        .map_err(|e| invalid(format!("bad canvas size: {}", e)))?;
    if project.layers.is_empty() {
        return Err(invalid("project contains no layers".into()));
    }
    if project.layers.len() > MAX_LAYERS {
        return Err(invalid(format!(
            "project contains {} layers, which exceeds the maximum of {}",
            project.layers.len(),
            MAX_LAYERS
        )));
    }

    let expected_chunk_bytes = (CHUNK_SIZE * CHUNK_SIZE * 4) as usize;
    let chunks_x = project.width.div_ceil(CHUNK_SIZE);
    let chunks_y = project.height.div_ceil(CHUNK_SIZE);

    let mut layers = Vec::with_capacity(project.layers.len());
    for ld in project.layers {
        let mut pixels = PixelBuffer::new(project.width, project.height);
        for cd in ld.chunks {
            if cd.pixels.len() != expected_chunk_bytes {
                return Err(invalid(format!(
                    "chunk ({},{}) in layer '{}' has {} bytes, expected {}",
                    cd.cx,
                    cd.cy,
                    ld.name,
                    cd.pixels.len(),
                    expected_chunk_bytes
                )));
            }
            if cd.cx >= chunks_x || cd.cy >= chunks_y {
                return Err(invalid(format!(
                    "chunk ({},{}) in layer '{}' lies outside the canvas",
                    cd.cx, cd.cy, ld.name
                )));
            }
            let chunk = RgbaImage::from_raw(CHUNK_SIZE, CHUNK_SIZE, cd.pixels).ok_or_else(|| {
                invalid(format!("failed to reconstruct chunk ({},{}) for layer '{}'", cd.cx, cd.cy, ld.name))
            })?;
            pixels.set_chunk(cd.cx, cd.cy, chunk);
        }

        let mut layer = Layer {
            id: LayerId::new(),
            name: ld.name,
            visible: ld.visible,
            locked: ld.locked,
            opacity: 1.0,
            blend_mode: BlendMode::from_u8(ld.blend_mode),
            pixels,
            offset_x: ld.offset_x,
            offset_y: ld.offset_y,
        };
        layer.set_opacity(ld.opacity);
        layers.push(layer);
    }

    let active = layers[project.active_layer_index.min(layers.len() - 1)].id;
    let stack = LayerStack::from_parts(layers, active).ok_or_else(|| invalid("project contains no layers".into()))?;

    Ok(Document {
        width: project.width,
        height: project.height,
        layers: stack,
        selection: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn png_export_is_lossless() {
        let mut img = RgbaImage::new(7, 5);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgba([x as u8 * 30, y as u8 * 40, 7, (x * y) as u8 * 9]);
        }
        let bytes = encode_png(&img).unwrap();
        assert_eq!(decode_raster(&bytes).unwrap(), img);
    }

    #[test]
    fn export_name_carries_dimensions() {
        assert_eq!(export_file_name("image", 800, 600), "image_800x600.png");
    }

    #[test]
    fn fit_keeps_aspect_ratio() {
        assert_eq!(fit_within(200, 100, 100, 100), (100, 50));
        assert_eq!(fit_within(10, 40, 100, 100), (25, 100));
        assert_eq!(fit_within(64, 64, 64, 64), (64, 64));
    }

    #[test]
    fn imported_raster_is_centered() {
        let src = RgbaImage::from_pixel(20, 10, Rgba([0, 0, 255, 255]));
        let bytes = encode_png(&src).unwrap();
        let layer = raster_to_layer(&bytes, "Imported", 40, 40).unwrap();
        assert_eq!(layer.pixels.get_pixel(20, 20)[3], 255);
        assert_eq!(layer.pixels.get_pixel(20, 5)[3], 0);
        assert_eq!(layer.pixels.get_pixel(20, 35)[3], 0);
        assert_eq!((layer.pixels.width(), layer.pixels.height()), (40, 40));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            raster_to_layer(b"definitely not an image", "x", 8, 8),
            Err(EditorError::Decode(_))
        ));
    }

    #[test]
    fn empty_raster_is_a_decode_error() {
        let result = place_on_layer(RgbaImage::new(0, 0), "Empty".into(), 8, 8);
        assert!(matches!(result, Err(EditorError::Decode(_))));
    }

    #[test]
    fn project_round_trip_keeps_layers() {
        let mut doc = Document::new(70, 40, Rgba([255, 255, 255, 255])).unwrap();
        let mut top = doc.blank_layer("Ink");
        top.pixels.put_pixel(65, 3, Rgba([1, 2, 3, 255]));
        top.blend_mode = BlendMode::Multiply;
        top.offset_x = -4;
        top.locked = true;
        top.set_opacity(0.5);
        doc.layers.push_top(top);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pcp");
        save_project(&doc, &path).unwrap();
        let loaded = load_project(&path).unwrap();

        assert_eq!((loaded.width, loaded.height), (70, 40));
        assert_eq!(loaded.layers.len(), 2);
        assert_eq!(loaded.layers.active_index(), 1);
        let ink = loaded.layers.active();
        assert_eq!(ink.name, "Ink");
        assert_eq!(ink.blend_mode, BlendMode::Multiply);
        assert_eq!((ink.offset_x, ink.locked, ink.opacity), (-4, true, 0.5));
        assert_eq!(*ink.pixels.get_pixel(65, 3), Rgba([1, 2, 3, 255]));
        assert_eq!(loaded.layers.at(0).unwrap().pixels, doc.layers.at(0).unwrap().pixels);
    }

    #[test]
    fn foreign_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pcp");
        std::fs::write(&path, b"0123456789abcdef").unwrap();
        assert!(matches!(load_project(&path), Err(EditorError::Project(_))));
    }
}
