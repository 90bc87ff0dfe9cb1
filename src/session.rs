// ============================================================================
// EDITOR SESSION — the document plus everything the user has picked
// ============================================================================
//
// Every public operation goes through an `EditorSession`. Completed actions
// record a history checkpoint of the state they replaced; refused input
// (locked or hidden layer, pointer off the canvas) changes nothing.

use std::path::Path;

use ab_glyph::FontArc;
use image::{Rgba, RgbaImage};

use crate::canvas::Document;
use crate::components::colors;
use crate::components::history::{DocumentSnapshot, HistoryManager};
use crate::components::layers::{Layer, LayerId};
use crate::components::selection::{self, SelectionEngine, SelectionKind, SelectionOutcome};
use crate::components::tools::{Tool, ToolContext, ToolEngine, ToolOutcome, ToolProperties};
use crate::error::{EditorError, Result};
use crate::io;
use crate::ops::canvas_ops;
use crate::ops::compositor::{self, BlendMode};
use crate::ops::generate::{GenerationRequest, ImageGenerator};
use crate::ops::text;
use crate::settings::{BindableAction, EditorSettings, KeyCombo};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

pub struct EditorSession {
    document: Document,
    history: HistoryManager,
    settings: EditorSettings,
    tool: Tool,
    primary: Rgba<u8>,
    secondary: Rgba<u8>,
    props: ToolProperties,
    selection_engine: SelectionEngine,
    tools: ToolEngine,
    /// Checkpoint taken when the current stroke began.
    pending: Option<DocumentSnapshot>,
    text: String,
    font: Option<FontArc>,
}

impl EditorSession {
    /// Blank white canvas at the configured default size.
    pub fn new(settings: EditorSettings) -> Result<Self> {
        let doc = Document::new(settings.default_width, settings.default_height, WHITE)?;
        Ok(Self::with_document(doc, settings))
    }

    pub fn with_document(document: Document, settings: EditorSettings) -> Self {
        Self {
            document,
            history: HistoryManager::new(settings.history_limit),
            settings,
            tool: Tool::default(),
            primary: Rgba([0, 0, 0, 255]),
            secondary: WHITE,
            props: ToolProperties::default(),
            selection_engine: SelectionEngine::new(),
            tools: ToolEngine::new(),
            pending: None,
            text: String::new(),
            font: None,
        }
    }

    pub fn open_project(path: &Path, settings: EditorSettings) -> Result<Self> {
        let doc = io::load_project(path)?;
        Ok(Self::with_document(doc, settings))
    }

    pub fn save_project(&self, path: &Path) -> Result<()> {
        io::save_project(&self.document, path)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn primary_color(&self) -> Rgba<u8> {
        self.primary
    }

    pub fn secondary_color(&self) -> Rgba<u8> {
        self.secondary
    }

    pub fn tool_properties(&self) -> &ToolProperties {
        &self.props
    }

    pub fn tool_properties_mut(&mut self) -> &mut ToolProperties {
        &mut self.props
    }

    pub fn active_layer_id(&self) -> LayerId {
        self.document.layers.active_id()
    }

    // ------------------------------------------------------------------
    // Layers
    // ------------------------------------------------------------------

    /// New transparent layer on top of the stack; it becomes active.
    pub fn create_layer(&mut self, name: &str) -> LayerId {
        self.finish_gesture();
        self.history.push_history("New Layer", &self.document);
        let layer = self.document.blank_layer(name);
        self.document.layers.push_top(layer)
    }

    /// `create_layer` with the next free default name.
    pub fn add_layer(&mut self) -> LayerId {
        let name = self.document.layers.next_layer_name();
        self.create_layer(&name)
    }

    pub fn remove_layer(&mut self, id: LayerId) -> Result<()> {
        if self.document.layers.get(id).is_none() {
            return Err(EditorError::UnknownLayer(id));
        }
        if self.document.layers.len() == 1 {
            return Err(EditorError::LastLayer);
        }
        self.finish_gesture();
        self.history.push_history("Delete Layer", &self.document);
        self.document.layers.remove(id)?;
        Ok(())
    }

    pub fn duplicate_layer(&mut self, id: LayerId) -> Result<LayerId> {
        if self.document.layers.get(id).is_none() {
            return Err(EditorError::UnknownLayer(id));
        }
        self.finish_gesture();
        self.history.push_history("Duplicate Layer", &self.document);
        self.document.layers.duplicate(id)
    }

    /// Move the layer at paint-order index `from` to `to` (0 = bottom).
    pub fn reorder_layer(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.document.layers.len();
        for index in [from, to] {
            if index >= len {
                return Err(EditorError::LayerIndex { index, len });
            }
        }
        if from == to {
            return Ok(());
        }
        self.finish_gesture();
        self.history.push_history("Reorder Layers", &self.document);
        self.document.layers.reorder(from, to)
    }

    pub fn set_active_layer(&mut self, id: LayerId) -> Result<()> {
        self.finish_gesture();
        self.document.layers.set_active(id)
    }

    pub fn set_layer_visible(&mut self, id: LayerId, visible: bool) -> Result<()> {
        self.edit_layer(id, "Layer Visibility", |l| l.visible = visible)
    }

    pub fn set_layer_locked(&mut self, id: LayerId, locked: bool) -> Result<()> {
        self.edit_layer(id, "Layer Lock", |l| l.locked = locked)
    }

    pub fn set_layer_opacity(&mut self, id: LayerId, opacity: f32) -> Result<()> {
        self.edit_layer(id, "Layer Opacity", |l| l.set_opacity(opacity))
    }

    pub fn set_layer_blend_mode(&mut self, id: LayerId, mode: BlendMode) -> Result<()> {
        self.edit_layer(id, "Layer Blend Mode", |l| l.blend_mode = mode)
    }

    pub fn rename_layer(&mut self, id: LayerId, name: &str) -> Result<()> {
        let name = name.to_string();
        self.edit_layer(id, "Rename Layer", |l| l.name = name)
    }

    fn edit_layer(&mut self, id: LayerId, description: &str, f: impl FnOnce(&mut Layer)) -> Result<()> {
        if self.document.layers.get(id).is_none() {
            return Err(EditorError::UnknownLayer(id));
        }
        self.finish_gesture();
        self.history.push_history(description, &self.document);
        if let Some(layer) = self.document.layers.get_mut(id) {
            f(layer);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tool state
    // ------------------------------------------------------------------

    /// Switch tools. An unfinished marquee, lasso or crop is abandoned; a
    /// stroke in progress ends where it is.
    pub fn set_tool(&mut self, tool: Tool) {
        if tool != self.tool {
            self.finish_gesture();
            self.tool = tool;
        }
    }

    pub fn set_primary_color(&mut self, hex: &str) -> Result<()> {
        self.primary = colors::parse_hex(hex)?;
        Ok(())
    }

    pub fn set_secondary_color(&mut self, hex: &str) -> Result<()> {
        self.secondary = colors::parse_hex(hex)?;
        Ok(())
    }

    pub fn swap_colors(&mut self) {
        std::mem::swap(&mut self.primary, &mut self.secondary);
    }

    pub fn set_brush_size(&mut self, size: f32) {
        self.props.set_size(size);
    }

    pub fn set_brush_hardness(&mut self, hardness: f32) {
        self.props.set_hardness(hardness);
    }

    pub fn set_brush_flow(&mut self, flow: f32) {
        self.props.set_flow(flow);
    }

    pub fn set_brush_opacity(&mut self, opacity: f32) {
        self.props.set_opacity(opacity);
    }

    /// String the text tool places on click.
    pub fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
    }

    pub fn set_font(&mut self, font: FontArc) {
        self.font = Some(font);
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Returns `false` when there was nothing to undo.
    pub fn undo(&mut self) -> bool {
        self.finish_gesture();
        self.history.undo(&mut self.document).is_some()
    }

    pub fn redo(&mut self) -> bool {
        self.finish_gesture();
        self.history.redo(&mut self.document).is_some()
    }

    // ------------------------------------------------------------------
    // Canvas
    // ------------------------------------------------------------------

    /// Resize the canvas, content anchored top-left.
    pub fn resize_canvas(&mut self, width: u32, height: u32) -> Result<()> {
        self.finish_gesture();
        let checkpoint = DocumentSnapshot::capture("Resize Canvas", &self.document);
        canvas_ops::resize_canvas(&mut self.document, width, height)?;
        self.history.push(checkpoint);
        Ok(())
    }

    pub fn crop(&mut self, x: u32, y: u32, width: u32, height: u32) -> Result<()> {
        self.finish_gesture();
        let checkpoint = DocumentSnapshot::capture("Crop", &self.document);
        canvas_ops::crop(&mut self.document, x, y, width, height)?;
        self.history.push(checkpoint);
        Ok(())
    }

    pub fn select_all(&mut self) {
        self.finish_gesture();
        self.history.push_history("Select All", &self.document);
        let (w, h) = (self.document.width, self.document.height);
        self.document.selection = Some(selection::Selection::rectangle(w, h, 0, 0, w, h));
    }

    pub fn deselect(&mut self) {
        self.finish_gesture();
        if self.document.selection.is_some() {
            self.history.push_history("Deselect", &self.document);
            self.document.selection = None;
        }
    }

    // ------------------------------------------------------------------
    // Rendering, import and export
    // ------------------------------------------------------------------

    /// Flattened canvas without any overlay.
    pub fn flatten(&self) -> RgbaImage {
        compositor::composite(&self.document)
    }

    /// Flattened canvas with the selection outline (or the drag in
    /// progress) drawn as marching ants at `phase`.
    pub fn render(&self, phase: u32) -> RgbaImage {
        let mut image = compositor::composite_with_overlay(&self.document, phase);
        if let Some(outline) = self.selection_engine.preview_outline() {
            compositor::draw_selection_outline(&mut image, &outline, phase);
        }
        image
    }

    /// Flattened canvas as PNG bytes.
    pub fn export_to_raster_blob(&self) -> Result<Vec<u8>> {
        io::encode_png(&self.flatten())
    }

    /// Suggested export file name, e.g. `image_800x600.png`.
    pub fn export_file_name(&self) -> String {
        io::export_file_name("image", self.document.width, self.document.height)
    }

    /// Decode an external raster into a new top layer, scaled to fit the
    /// canvas and centered. Nothing changes if decoding fails.
    pub fn import_raster_as_layer(&mut self, bytes: &[u8]) -> Result<LayerId> {
        let name = self.document.layers.next_layer_name();
        let layer = io::raster_to_layer(bytes, name, self.document.width, self.document.height)
            .inspect_err(|e| log::warn!("import failed: {}", e))?;
        self.finish_gesture();
        self.history.push_history("Import Image", &self.document);
        Ok(self.document.layers.push_top(layer))
    }

    /// Ask `generator` for an image and add it as a new top layer. Any
    /// failure leaves the document untouched.
    pub fn generate_layer(&mut self, generator: &dyn ImageGenerator, prompt: &str) -> Result<LayerId> {
        let request = GenerationRequest::new(prompt, self.document.width, self.document.height)?;
        let bytes = generator
            .generate(&request)
            .inspect_err(|e| log::warn!("generation failed: {}", e))?;
        let name: String = format!("Generated: {}", request.prompt).chars().take(48).collect();
        let layer = io::raster_to_layer(&bytes, name, self.document.width, self.document.height)
            .inspect_err(|e| log::warn!("generated image could not be decoded: {}", e))?;
        self.finish_gesture();
        self.history.push_history("Generate Layer", &self.document);
        Ok(self.document.layers.push_top(layer))
    }

    // ------------------------------------------------------------------
    // Keyboard
    // ------------------------------------------------------------------

    /// Run the action bound to `combo`. Returns it, or `None` if unbound.
    pub fn handle_shortcut(&mut self, combo: KeyCombo) -> Option<BindableAction> {
        let action = self.settings.keybindings.action_for(combo)?;
        match action {
            BindableAction::Undo => {
                self.undo();
            }
            BindableAction::Redo => {
                self.redo();
            }
            BindableAction::SwapColors => self.swap_colors(),
            BindableAction::SelectAll => self.select_all(),
            BindableAction::Deselect => self.deselect(),
            other => {
                if let Some(tool) = other.tool() {
                    self.set_tool(tool);
                }
            }
        }
        Some(action)
    }

    // ------------------------------------------------------------------
    // Pointer input (canvas coordinates)
    // ------------------------------------------------------------------

    /// `modifier` is the alt/option key; with the clone stamp it sets the
    /// source point.
    pub fn pointer_down(&mut self, x: f32, y: f32, modifier: bool) {
        self.finish_gesture();
        match self.tool {
            Tool::RectangleSelect => self.selection_engine.begin(SelectionKind::Rectangle, x, y),
            Tool::EllipseSelect => self.selection_engine.begin(SelectionKind::Ellipse, x, y),
            Tool::Lasso => self.selection_engine.begin(SelectionKind::Lasso, x, y),
            Tool::Crop => self.selection_engine.begin(SelectionKind::Crop, x, y),
            Tool::MagicWand => self.magic_wand_at(x, y),
            tool if tool.is_view_tool() => {}
            tool => {
                let mutating = tool.edits_layer() && !(tool == Tool::CloneStamp && modifier);
                if mutating && !self.active_layer_accepts(tool) {
                    return;
                }
                if tool == Tool::Text && !self.text.is_empty() && self.font.is_none() {
                    if let Err(e) = self.ensure_font() {
                        log::warn!("text tool unavailable: {}", e);
                        return;
                    }
                }
                let checkpoint = mutating.then(|| DocumentSnapshot::capture(tool.label(), &self.document));
                let (engine, doc, ctx) = self.split();
                let outcome = engine.press(doc, &ctx, x, y, modifier);
                self.apply(outcome, checkpoint);
            }
        }
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) {
        if self.selection_engine.is_active() {
            self.selection_engine.update(x, y);
        } else if self.tools.is_active() {
            let (engine, doc, ctx) = self.split();
            engine.drag(doc, &ctx, x, y);
        }
    }

    pub fn pointer_up(&mut self, x: f32, y: f32) {
        if self.selection_engine.is_active() {
            self.selection_engine.update(x, y);
            let (w, h) = (self.document.width, self.document.height);
            if let Some(outcome) = self.selection_engine.finish(w, h) {
                self.apply_selection(outcome);
            }
        } else if self.tools.is_active() {
            let (engine, doc, ctx) = self.split();
            let outcome = engine.release(doc, &ctx, x, y);
            let checkpoint = self.pending.take();
            self.apply(outcome, checkpoint);
        }
    }

    /// Place `text` with its top-left at `(x, y)` using the primary color.
    /// Returns `Ok(false)` when nothing was drawn.
    pub fn insert_text(&mut self, x: f32, y: f32, text: &str) -> Result<bool> {
        self.finish_gesture();
        self.text = text.to_string();
        if text.is_empty() || !self.active_layer_accepts(Tool::Text) {
            return Ok(false);
        }
        self.ensure_font()?;
        let checkpoint = DocumentSnapshot::capture(Tool::Text.label(), &self.document);
        let (engine, doc, mut ctx) = self.split();
        ctx.tool = Tool::Text;
        let outcome = engine.press(doc, &ctx, x, y, false);
        let changed = outcome == ToolOutcome::Finished { changed: true };
        self.apply(outcome, Some(checkpoint));
        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn split(&mut self) -> (&mut ToolEngine, &mut Document, ToolContext<'_>) {
        let px = text::point_size_to_px(self.props.text_size, self.settings.text_dpi);
        let ctx = ToolContext {
            tool: self.tool,
            props: &self.props,
            primary: self.primary,
            secondary: self.secondary,
            fill_tolerance: self.settings.fill_tolerance,
            text: self.font.as_ref().map(|f| (f, self.text.as_str(), px)),
        };
        (&mut self.tools, &mut self.document, ctx)
    }

    fn apply(&mut self, outcome: ToolOutcome, checkpoint: Option<DocumentSnapshot>) {
        match outcome {
            ToolOutcome::Picked(color) => self.primary = color,
            ToolOutcome::InProgress => self.pending = checkpoint,
            ToolOutcome::Finished { changed: true } => {
                if let Some(snapshot) = checkpoint {
                    self.history.push(snapshot);
                }
            }
            ToolOutcome::Finished { changed: false } | ToolOutcome::Ignored | ToolOutcome::AnchorSet => {}
        }
    }

    fn apply_selection(&mut self, outcome: SelectionOutcome) {
        match outcome {
            SelectionOutcome::Selected(sel) => {
                self.history.push_history("Select", &self.document);
                self.document.selection = Some(sel);
            }
            SelectionOutcome::Cleared => self.deselect(),
            SelectionOutcome::Crop { x, y, width, height } => {
                if let Err(e) = self.crop(x, y, width, height) {
                    log::warn!("crop failed: {}", e);
                }
            }
            SelectionOutcome::Rejected => {}
        }
    }

    fn magic_wand_at(&mut self, x: f32, y: f32) {
        let Some((px, py)) = self.document.pixel_at(x, y) else {
            return;
        };
        let doc = &self.document;
        let tolerance = self.settings.magic_wand_tolerance;
        match selection::magic_wand(doc.active_layer(), doc.width, doc.height, px, py, tolerance) {
            Some(sel) => {
                self.history.push_history("Magic Wand", &self.document);
                self.document.selection = Some(sel);
            }
            None => log::debug!("magic wand at ({}, {}) selected nothing", px, py),
        }
    }

    /// Locked or hidden layers refuse every editing tool.
    fn active_layer_accepts(&self, tool: Tool) -> bool {
        let layer = self.document.active_layer();
        if !layer.is_editable() {
            log::debug!(
                "{} ignored: layer '{}' is {}",
                tool,
                layer.name,
                if layer.locked { "locked" } else { "hidden" }
            );
            return false;
        }
        true
    }

    fn ensure_font(&mut self) -> Result<()> {
        if self.font.is_none() {
            self.font = Some(text::load_system_font(&self.settings.font_family, 400, false)?);
        }
        Ok(())
    }

    /// End whatever gesture is underway. Drags without a result are dropped;
    /// a stroke that already wrote pixels is committed as it stands.
    fn finish_gesture(&mut self) {
        self.selection_engine.cancel();
        if self.tools.cancel()
            && let Some(snapshot) = self.pending.take()
        {
            self.history.push(snapshot);
        }
        self.pending = None;
    }
}
