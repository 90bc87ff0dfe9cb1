use std::collections::VecDeque;

use crate::canvas::{Document, PixelBuffer};
use crate::components::layers::{Layer, LayerId, LayerStack};
use crate::components::selection::Selection;
use crate::ops::compositor::BlendMode;

/// Default number of undo steps kept.
pub const HISTORY_LIMIT: usize = 30;

// ============================================================================
// DOCUMENT SNAPSHOT – full-fidelity copy of layers, order and selection
// ============================================================================

/// Captured state of one document.
///
/// Layer pixels are `PixelBuffer` clones, which share their tiles with the
/// live buffers until either side writes; restoring is byte-identical.
#[derive(Clone, Debug)]
pub struct DocumentSnapshot {
    pub description: String,
    pub width: u32,
    pub height: u32,
    /// Bottom to top.
    pub layers: Vec<LayerSnapshot>,
    pub active: LayerId,
    pub selection: Option<Selection>,
}

#[derive(Clone, Debug)]
pub struct LayerSnapshot {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    pub locked: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub offset_x: i32,
    pub offset_y: i32,
    pub pixels: PixelBuffer,
}

impl DocumentSnapshot {
    pub fn capture(description: impl Into<String>, doc: &Document) -> Self {
        Self {
            description: description.into(),
            width: doc.width,
            height: doc.height,
            active: doc.layers.active_id(),
            selection: doc.selection.clone(),
            layers: doc
                .layers
                .iter_bottom_up()
                .map(|l| LayerSnapshot {
                    id: l.id,
                    name: l.name.clone(),
                    visible: l.visible,
                    locked: l.locked,
                    opacity: l.opacity,
                    blend_mode: l.blend_mode,
                    offset_x: l.offset_x,
                    offset_y: l.offset_y,
                    pixels: l.pixels.clone(),
                })
                .collect(),
        }
    }

    /// Replace `doc` wholesale with the captured state.
    pub fn restore_into(&self, doc: &mut Document) {
        let layers: Vec<Layer> = self
            .layers
            .iter()
            .map(|snap| Layer {
                id: snap.id,
                name: snap.name.clone(),
                visible: snap.visible,
                locked: snap.locked,
                opacity: snap.opacity,
                blend_mode: snap.blend_mode,
                pixels: snap.pixels.clone(),
                offset_x: snap.offset_x,
                offset_y: snap.offset_y,
            })
            .collect();
        // A snapshot is always taken from a document with at least one layer.
        let Some(stack) = LayerStack::from_parts(layers, self.active) else {
            log::warn!("history snapshot '{}' has no layers, restore skipped", self.description);
            return;
        };
        doc.width = self.width;
        doc.height = self.height;
        doc.layers = stack;
        doc.selection = self.selection.clone();
    }
}

// ============================================================================
// HISTORY MANAGER – bounded undo stack plus redo stack
// ============================================================================

/// Undo/redo stacks of pre-action checkpoints.
///
/// `push` stores the state a document had *before* an action. `undo` trades
/// the current state for the newest checkpoint; `redo` does the reverse.
#[derive(Debug)]
pub struct HistoryManager {
    undo_stack: VecDeque<DocumentSnapshot>,
    redo_stack: VecDeque<DocumentSnapshot>,
    max_history_size: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(HISTORY_LIMIT)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size: max_history_size.max(1),
        }
    }

    /// Record a checkpoint. Clears the redo stack and evicts the oldest
    /// entries beyond the limit.
    pub fn push(&mut self, snapshot: DocumentSnapshot) {
        self.redo_stack.clear();
        self.undo_stack.push_back(snapshot);
        self.prune();
    }

    /// Capture `doc` and record it as a checkpoint.
    pub fn push_history(&mut self, description: impl Into<String>, doc: &Document) {
        self.push(DocumentSnapshot::capture(description, doc));
    }

    /// Restore the newest checkpoint. Returns its description, or `None` when
    /// there is nothing to undo.
    pub fn undo(&mut self, doc: &mut Document) -> Option<String> {
        let snapshot = self.undo_stack.pop_back()?;
        self.redo_stack
            .push_back(DocumentSnapshot::capture(snapshot.description.clone(), doc));
        snapshot.restore_into(doc);
        Some(snapshot.description)
    }

    pub fn redo(&mut self, doc: &mut Document) -> Option<String> {
        let snapshot = self.redo_stack.pop_back()?;
        self.undo_stack
            .push_back(DocumentSnapshot::capture(snapshot.description.clone(), doc));
        snapshot.restore_into(doc);
        self.prune();
        Some(snapshot.description)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// All undo descriptions (most recent first).
    pub fn undo_history(&self) -> Vec<&str> {
        self.undo_stack.iter().rev().map(|s| s.description.as_str()).collect()
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            if let Some(evicted) = self.undo_stack.pop_front() {
                log::debug!("history full, dropped oldest entry '{}'", evicted.description);
            }
        }
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }
}
