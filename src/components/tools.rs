use std::fmt;
use std::str::FromStr;

use ab_glyph::FontArc;
use image::Rgba;

use crate::canvas::{Document, PixelBuffer};
use crate::components::layers::LayerId;
use crate::ops::brush::{self, FilterMode, PaintTarget, ToneMode};
use crate::ops::compositor::composite_pixel;
use crate::ops::fill;
use crate::ops::shapes::{self, PlacedShape, ShapeFillMode, ShapeKind};
use crate::ops::text;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Tool {
    Move,
    #[default]
    Brush,
    Pencil,
    Eraser,
    Fill,
    Gradient,
    ColorPicker,
    CloneStamp,
    Dodge,
    Burn,
    Sponge,
    Blur,
    Sharpen,
    Smudge,
    RectangleShape,
    EllipseShape,
    Text,
    RectangleSelect,
    EllipseSelect,
    Lasso,
    MagicWand,
    Crop,
    Pan,
    Zoom,
}

impl Tool {
    pub fn all() -> &'static [Tool] {
        use Tool::*;
        &[
            Move, Brush, Pencil, Eraser, Fill, Gradient, ColorPicker, CloneStamp, Dodge, Burn, Sponge, Blur,
            Sharpen, Smudge, RectangleShape, EllipseShape, Text, RectangleSelect, EllipseSelect, Lasso,
            MagicWand, Crop, Pan, Zoom,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tool::Move => "Move",
            Tool::Brush => "Brush",
            Tool::Pencil => "Pencil",
            Tool::Eraser => "Eraser",
            Tool::Fill => "Fill",
            Tool::Gradient => "Gradient",
            Tool::ColorPicker => "Color Picker",
            Tool::CloneStamp => "Clone Stamp",
            Tool::Dodge => "Dodge",
            Tool::Burn => "Burn",
            Tool::Sponge => "Sponge",
            Tool::Blur => "Blur",
            Tool::Sharpen => "Sharpen",
            Tool::Smudge => "Smudge",
            Tool::RectangleShape => "Rectangle",
            Tool::EllipseShape => "Ellipse",
            Tool::Text => "Text",
            Tool::RectangleSelect => "Rectangle Select",
            Tool::EllipseSelect => "Ellipse Select",
            Tool::Lasso => "Lasso",
            Tool::MagicWand => "Magic Wand",
            Tool::Crop => "Crop",
            Tool::Pan => "Pan",
            Tool::Zoom => "Zoom",
        }
    }

    /// Tools that write into the active layer (pixels or offset).
    pub fn edits_layer(&self) -> bool {
        !matches!(
            self,
            Tool::ColorPicker
                | Tool::RectangleSelect
                | Tool::EllipseSelect
                | Tool::Lasso
                | Tool::MagicWand
                | Tool::Crop
                | Tool::Pan
                | Tool::Zoom
        )
    }

    /// View tools never touch the document.
    pub fn is_view_tool(&self) -> bool {
        matches!(self, Tool::Pan | Tool::Zoom)
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Tool {
    type Err = String;

    /// Accepts the label in any case, with spaces, dashes or underscores.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = |v: &str| v.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_lowercase();
        let wanted = norm(s);
        Tool::all()
            .iter()
            .copied()
            .find(|t| norm(t.label()) == wanted || norm(&format!("{:?}", t)) == wanted)
            .ok_or_else(|| format!("unknown tool '{}'", s))
    }
}

#[derive(Clone, Debug)]
pub struct ToolProperties {
    /// Brush diameter in pixels.
    pub size: f32,
    pub hardness: f32,
    /// Per-stamp strength, multiplied with `opacity`.
    pub flow: f32,
    pub opacity: f32,
    pub anti_aliased: bool,
    pub shape_fill: ShapeFillMode,
    pub outline_width: f32,
    /// Text size in points; converted to pixels with the configured DPI.
    pub text_size: f32,
}

pub const MIN_BRUSH_SIZE: f32 = 1.0;
pub const MAX_BRUSH_SIZE: f32 = 1000.0;

impl Default for ToolProperties {
    fn default() -> Self {
        Self {
            size: 10.0,
            hardness: 0.75,
            flow: 1.0,
            opacity: 1.0,
            anti_aliased: true,
            shape_fill: ShapeFillMode::Filled,
            outline_width: 2.0,
            text_size: 24.0,
        }
    }
}

impl ToolProperties {
    pub fn set_size(&mut self, size: f32) {
        self.size = if size.is_finite() { size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE) } else { self.size };
    }

    pub fn set_hardness(&mut self, v: f32) {
        self.hardness = unit(v, self.hardness);
    }

    pub fn set_flow(&mut self, v: f32) {
        self.flow = unit(v, self.flow);
    }

    pub fn set_opacity(&mut self, v: f32) {
        self.opacity = unit(v, self.opacity);
    }

    fn strength(&self) -> f32 {
        self.flow * self.opacity
    }
}

fn unit(v: f32, fallback: f32) -> f32 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { fallback }
}

/// Everything a tool reads from the session besides the document.
pub struct ToolContext<'a> {
    pub tool: Tool,
    pub props: &'a ToolProperties,
    pub primary: Rgba<u8>,
    pub secondary: Rgba<u8>,
    pub fill_tolerance: u32,
    /// Font, string and pixel size for the text tool.
    pub text: Option<(&'a FontArc, &'a str, f32)>,
}

/// What a pointer event did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ToolOutcome {
    /// Nothing happened.
    Ignored,
    /// A gesture is underway.
    InProgress,
    /// The gesture ended; `changed` is false when nothing was written.
    Finished { changed: bool },
    /// Color picker sample.
    Picked(Rgba<u8>),
    /// Clone stamp source set.
    AnchorSet,
}

#[derive(Clone, Debug)]
struct Stroke {
    tool: Tool,
    layer: LayerId,
    start: (f32, f32),
    last: (f32, f32),
    changed: bool,
    /// Layer offset when a move began.
    start_offset: (i32, i32),
    /// Layer pixels when a clone stroke began.
    clone_source: Option<PixelBuffer>,
    clone_delta: (i64, i64),
    smudge_pickup: [f32; 4],
}

/// Pointer-driven layer editing. One gesture at a time, always on the
/// layer that was active when it began.
#[derive(Clone, Debug, Default)]
pub struct ToolEngine {
    stroke: Option<Stroke>,
    clone_anchor: Option<(f32, f32)>,
}

impl ToolEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.stroke.is_some()
    }

    /// Abandon the current gesture. Pixels already written stay.
    pub fn cancel(&mut self) -> bool {
        self.stroke.take().is_some_and(|s| s.changed)
    }

    pub fn press(&mut self, doc: &mut Document, ctx: &ToolContext, x: f32, y: f32, modifier: bool) -> ToolOutcome {
        self.stroke = None;
        match ctx.tool {
            Tool::ColorPicker => match doc.pixel_at(x, y) {
                Some((px, py)) => ToolOutcome::Picked(composite_pixel(doc, px, py)),
                None => ToolOutcome::Ignored,
            },
            Tool::CloneStamp if modifier => {
                self.clone_anchor = Some((x, y));
                ToolOutcome::AnchorSet
            }
            Tool::Fill => {
                let changed = bucket(doc, ctx, x, y);
                ToolOutcome::Finished { changed }
            }
            Tool::Text => {
                let changed = place_text(doc, ctx, x, y);
                ToolOutcome::Finished { changed }
            }
            tool if tool.edits_layer() => {
                if tool == Tool::CloneStamp && self.clone_anchor.is_none() {
                    log::debug!("clone stamp used before a source point was set");
                    return ToolOutcome::Ignored;
                }
                let layer = doc.active_layer();
                let mut stroke = Stroke {
                    tool,
                    layer: layer.id,
                    start: (x, y),
                    last: (x, y),
                    changed: false,
                    start_offset: (layer.offset_x, layer.offset_y),
                    clone_source: None,
                    clone_delta: (0, 0),
                    smudge_pickup: [0.0; 4],
                };
                match tool {
                    Tool::CloneStamp => {
                        if let Some(anchor) = self.clone_anchor {
                            stroke.clone_source = Some(layer.pixels.clone());
                            stroke.clone_delta =
                                ((anchor.0 - x).round() as i64, (anchor.1 - y).round() as i64);
                        }
                    }
                    Tool::Smudge => {
                        let p = layer.pixels.sample(
                            x.floor() as i64 - layer.offset_x as i64,
                            y.floor() as i64 - layer.offset_y as i64,
                        );
                        stroke.smudge_pickup = p.0.map(|c| c as f32);
                    }
                    _ => {}
                }
                if is_stamp_tool(tool) {
                    stamp_at(doc, ctx, &mut stroke, x, y);
                }
                self.stroke = Some(stroke);
                ToolOutcome::InProgress
            }
            _ => ToolOutcome::Ignored,
        }
    }

    pub fn drag(&mut self, doc: &mut Document, ctx: &ToolContext, x: f32, y: f32) -> ToolOutcome {
        let Some(stroke) = self.stroke.as_mut() else {
            return ToolOutcome::Ignored;
        };
        if !x.is_finite() || !y.is_finite() {
            return ToolOutcome::InProgress;
        }
        if is_stamp_tool(stroke.tool) {
            // Stamps centered further out than this cannot reach the canvas.
            let margin = ctx.props.size + 1.0;
            let bounds = (-margin, -margin, doc.width as f32 + margin, doc.height as f32 + margin);
            if let Some((from, to)) = brush::clip_segment(stroke.last, (x, y), bounds) {
                if from != stroke.last {
                    stamp_at(doc, ctx, stroke, from.0, from.1);
                }
                for (px, py) in brush::interpolate(from, to) {
                    stamp_at(doc, ctx, stroke, px, py);
                }
            }
        } else if stroke.tool == Tool::Move {
            let dx = (x - stroke.start.0).round() as i32;
            let dy = (y - stroke.start.1).round() as i32;
            if let Some(layer) = doc.layers.get_mut(stroke.layer) {
                let next = (
                    stroke.start_offset.0.saturating_add(dx),
                    stroke.start_offset.1.saturating_add(dy),
                );
                if (layer.offset_x, layer.offset_y) != next {
                    layer.offset_x = next.0;
                    layer.offset_y = next.1;
                    stroke.changed = next != stroke.start_offset;
                }
            }
        }
        stroke.last = (x, y);
        ToolOutcome::InProgress
    }

    pub fn release(&mut self, doc: &mut Document, ctx: &ToolContext, x: f32, y: f32) -> ToolOutcome {
        if self.stroke.is_none() {
            return ToolOutcome::Ignored;
        }
        self.drag(doc, ctx, x, y);
        let Some(mut stroke) = self.stroke.take() else {
            return ToolOutcome::Ignored;
        };
        let end = stroke.last;
        match stroke.tool {
            Tool::Gradient => {
                stroke.changed = with_target(doc, stroke.layer, |t| {
                    fill::fill_gradient(t, stroke.start, end, ctx.primary, ctx.secondary, ctx.props.opacity)
                })
                .unwrap_or(false);
            }
            Tool::RectangleShape | Tool::EllipseShape => {
                let kind = if stroke.tool == Tool::RectangleShape { ShapeKind::Rectangle } else { ShapeKind::Ellipse };
                let mut placed = PlacedShape::from_drag(kind, stroke.start, end);
                if !placed.is_degenerate() {
                    placed.fill_mode = ctx.props.shape_fill;
                    placed.outline_width = ctx.props.outline_width;
                    placed.anti_alias = ctx.props.anti_aliased;
                    placed.fill_color = ctx.primary;
                    placed.outline_color = match placed.fill_mode {
                        ShapeFillMode::Both => ctx.secondary,
                        _ => ctx.primary,
                    };
                    stroke.changed = with_target(doc, stroke.layer, |t| {
                        shapes::draw_shape(t, &placed, ctx.props.opacity);
                        true
                    })
                    .unwrap_or(false);
                }
            }
            _ => {}
        }
        ToolOutcome::Finished { changed: stroke.changed }
    }
}

fn is_stamp_tool(tool: Tool) -> bool {
    matches!(
        tool,
        Tool::Brush
            | Tool::Pencil
            | Tool::Eraser
            | Tool::CloneStamp
            | Tool::Dodge
            | Tool::Burn
            | Tool::Sponge
            | Tool::Blur
            | Tool::Sharpen
            | Tool::Smudge
    )
}

/// Run `f` on a paint target for layer `id`. `None` if the layer is gone.
fn with_target<R>(doc: &mut Document, id: LayerId, f: impl FnOnce(&mut PaintTarget) -> R) -> Option<R> {
    let Document { width, height, layers, selection } = doc;
    let layer = layers.get_mut(id)?;
    let mut target = PaintTarget {
        pixels: &mut layer.pixels,
        offset: (layer.offset_x, layer.offset_y),
        canvas_w: *width,
        canvas_h: *height,
        selection: selection.as_ref(),
    };
    Some(f(&mut target))
}

fn stamp_at(doc: &mut Document, ctx: &ToolContext, stroke: &mut Stroke, x: f32, y: f32) {
    let props = ctx.props;
    let (size, hardness) = (props.size, props.hardness);
    let tool = stroke.tool;
    let source = stroke.clone_source.as_ref();
    let delta = stroke.clone_delta;
    let pickup = &mut stroke.smudge_pickup;
    let wrote = with_target(doc, stroke.layer, |t| {
        match tool {
            Tool::Brush => brush::stamp_brush(t, x, y, size, hardness, ctx.primary, props.strength()),
            Tool::Pencil => brush::stamp_pencil(t, x, y, size, ctx.primary),
            Tool::Eraser => brush::stamp_eraser(t, x, y, size, hardness, props.strength()),
            Tool::CloneStamp => {
                if let Some(src) = source {
                    brush::stamp_clone(t, src, x, y, size, delta, props.strength());
                }
            }
            Tool::Dodge => brush::stamp_tone(t, x, y, size, hardness, ToneMode::Dodge),
            Tool::Burn => brush::stamp_tone(t, x, y, size, hardness, ToneMode::Burn),
            Tool::Sponge => brush::stamp_tone(t, x, y, size, hardness, ToneMode::Sponge),
            Tool::Blur => brush::stamp_filter(t, x, y, size, FilterMode::Blur),
            Tool::Sharpen => brush::stamp_filter(t, x, y, size, FilterMode::Sharpen),
            Tool::Smudge => brush::stamp_smudge(t, x, y, size, props.flow, pickup),
            _ => return false,
        }
        true
    });
    if wrote == Some(true) {
        stroke.changed = true;
    }
}

fn bucket(doc: &mut Document, ctx: &ToolContext, x: f32, y: f32) -> bool {
    let Some((cx, cy)) = doc.pixel_at(x, y) else {
        return false;
    };
    let Document { width, height, layers, selection } = doc;
    let layer = layers.active_mut();
    let bx = cx as i64 - layer.offset_x as i64;
    let by = cy as i64 - layer.offset_y as i64;
    if bx < 0 || by < 0 || bx >= layer.pixels.width() as i64 || by >= layer.pixels.height() as i64 {
        return false;
    }
    let (ox, oy) = (layer.offset_x as i64, layer.offset_y as i64);
    let (w, h) = (*width as i64, *height as i64);
    let selection = selection.as_ref();
    let written = fill::bucket_fill(
        &mut layer.pixels,
        bx as u32,
        by as u32,
        ctx.primary,
        ctx.fill_tolerance,
        |px, py| {
            let (sx, sy) = (px as i64 + ox, py as i64 + oy);
            sx >= 0 && sy >= 0 && sx < w && sy < h && selection.is_none_or(|s| s.contains(sx as u32, sy as u32))
        },
    );
    written > 0
}

fn place_text(doc: &mut Document, ctx: &ToolContext, x: f32, y: f32) -> bool {
    let Some((font, content, px_size)) = ctx.text else {
        log::debug!("text tool used without a font");
        return false;
    };
    if content.is_empty() || doc.pixel_at(x, y).is_none() {
        return false;
    }
    let color = ctx.primary.0;
    let raster = text::rasterize_text(
        font,
        content,
        px_size,
        x,
        y,
        color,
        ctx.props.anti_aliased,
        doc.width,
        doc.height,
    );
    if raster.is_empty() {
        return false;
    }
    let id = doc.layers.active_id();
    with_target(doc, id, |t| {
        text::draw_text(t, &raster, ctx.props.opacity);
        true
    })
    .unwrap_or(false)
}
