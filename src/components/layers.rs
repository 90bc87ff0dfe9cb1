use std::collections::HashMap;
use std::fmt;

use image::Rgba;
use uuid::Uuid;

use crate::canvas::PixelBuffer;
use crate::error::{EditorError, Result};
use crate::ops::compositor::BlendMode;

/// Stable layer identity. Survives reordering, removal of other layers and
/// undo/redo.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub visible: bool,
    /// Locked layers refuse every pixel edit.
    pub locked: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub pixels: PixelBuffer,
    /// Translation applied at composite time; pixel data is not moved.
    pub offset_x: i32,
    pub offset_y: i32,
}

impl Layer {
    pub fn new(name: String, width: u32, height: u32, fill_color: Rgba<u8>) -> Self {
        Self {
            id: LayerId::new(),
            name,
            visible: true,
            locked: false,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            pixels: PixelBuffer::new_filled(width, height, fill_color),
            offset_x: 0,
            offset_y: 0,
        }
    }

    /// Whether painting tools may write into this layer.
    pub fn is_editable(&self) -> bool {
        self.visible && !self.locked
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = if opacity.is_finite() { opacity.clamp(0.0, 1.0) } else { 1.0 };
    }
}

// ============================================================================
// LAYER STACK – arena keyed by id plus a separate paint order
// ============================================================================

/// Layers in paint order. `order[0]` is the bottom of the stack and the last
/// entry is drawn on top. There is always at least one layer and `active`
/// always names a member of `layers`.
#[derive(Clone, Debug)]
pub struct LayerStack {
    layers: HashMap<LayerId, Layer>,
    order: Vec<LayerId>,
    active: LayerId,
}

impl LayerStack {
    pub fn new(base: Layer) -> Self {
        let id = base.id;
        let mut layers = HashMap::new();
        layers.insert(id, base);
        Self {
            layers,
            order: vec![id],
            active: id,
        }
    }

    /// Rebuild a stack from bottom-to-top layers. Used when restoring history
    /// and loading projects.
    pub(crate) fn from_parts(layers: Vec<Layer>, active: LayerId) -> Option<Self> {
        let order: Vec<LayerId> = layers.iter().map(|l| l.id).collect();
        let first = *order.first()?;
        let active = if order.contains(&active) { active } else { first };
        Some(Self {
            layers: layers.into_iter().map(|l| (l.id, l)).collect(),
            order,
            active,
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids bottom to top.
    pub fn order(&self) -> &[LayerId] {
        &self.order
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.order.iter().position(|&o| o == id)
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(&id)
    }

    pub fn at(&self, index: usize) -> Option<&Layer> {
        self.order.get(index).and_then(|id| self.layers.get(id))
    }

    pub fn active_id(&self) -> LayerId {
        self.active
    }

    pub fn active_index(&self) -> usize {
        self.index_of(self.active).unwrap_or(0)
    }

    pub fn active(&self) -> &Layer {
        &self.layers[&self.active]
    }

    pub fn active_mut(&mut self) -> &mut Layer {
        self.layers
            .get_mut(&self.active)
            .expect("active layer id always refers to a live layer")
    }

    pub fn set_active(&mut self, id: LayerId) -> Result<()> {
        if !self.layers.contains_key(&id) {
            return Err(EditorError::UnknownLayer(id));
        }
        self.active = id;
        Ok(())
    }

    /// Bottom-to-top iteration in paint order.
    pub fn iter_bottom_up(&self) -> impl Iterator<Item = &Layer> + '_ {
        self.order.iter().map(move |id| &self.layers[id])
    }

    /// Every layer, in no particular order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Layer> + '_ {
        self.layers.values_mut()
    }

    /// Insert `layer` at the top of the paint order and make it active.
    pub fn push_top(&mut self, layer: Layer) -> LayerId {
        let id = layer.id;
        self.layers.insert(id, layer);
        self.order.push(id);
        self.active = id;
        id
    }

    /// Remove a layer. The last remaining layer cannot be removed.
    /// When the active layer goes, the layer below it (or the new bottom)
    /// becomes active.
    pub fn remove(&mut self, id: LayerId) -> Result<Layer> {
        let index = self.index_of(id).ok_or(EditorError::UnknownLayer(id))?;
        if self.order.len() == 1 {
            return Err(EditorError::LastLayer);
        }
        self.order.remove(index);
        let removed = self.layers.remove(&id).ok_or(EditorError::UnknownLayer(id))?;
        if self.active == id {
            self.active = self.order[index.saturating_sub(1).min(self.order.len() - 1)];
        }
        Ok(removed)
    }

    /// Deep-copy a layer (pixels and metadata) directly above its source.
    /// The copy becomes active.
    pub fn duplicate(&mut self, id: LayerId) -> Result<LayerId> {
        let index = self.index_of(id).ok_or(EditorError::UnknownLayer(id))?;
        let mut dup = self.layers[&id].clone();
        dup.id = LayerId::new();
        dup.name = format!("{} Copy", dup.name);
        let new_id = dup.id;
        self.layers.insert(new_id, dup);
        self.order.insert(index + 1, new_id);
        self.active = new_id;
        Ok(new_id)
    }

    /// Move the entry at `from` to position `to`, keeping the relative order
    /// of every other layer.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.order.len();
        if from >= len {
            return Err(EditorError::LayerIndex { index: from, len });
        }
        if to >= len {
            return Err(EditorError::LayerIndex { index: to, len });
        }
        let id = self.order.remove(from);
        self.order.insert(to, id);
        Ok(())
    }

    /// Unique default name for a new layer.
    pub fn next_layer_name(&self) -> String {
        let mut n = self.order.len() + 1;
        loop {
            let candidate = format!("Layer {}", n);
            if !self.layers.values().any(|l| l.name == candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack_with(names: &[&str]) -> LayerStack {
        let mut layers = names
            .iter()
            .map(|n| Layer::new((*n).to_string(), 8, 8, Rgba([0, 0, 0, 0])));
        let mut stack = LayerStack::new(layers.next().unwrap());
        for l in layers {
            stack.push_top(l);
        }
        stack
    }

    fn names(stack: &LayerStack) -> Vec<String> {
        stack.iter_bottom_up().map(|l| l.name.clone()).collect()
    }

    #[test]
    fn push_top_becomes_active() {
        let stack = stack_with(&["a", "b", "c"]);
        assert_eq!(names(&stack), ["a", "b", "c"]);
        assert_eq!(stack.active().name, "c");
    }

    #[test]
    fn last_layer_cannot_be_removed() {
        let mut stack = stack_with(&["only"]);
        let id = stack.active_id();
        assert!(matches!(stack.remove(id), Err(EditorError::LastLayer)));
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn removing_active_selects_layer_below() {
        let mut stack = stack_with(&["a", "b", "c"]);
        let b = stack.order()[1];
        stack.set_active(b).unwrap();
        stack.remove(b).unwrap();
        assert_eq!(stack.active().name, "a");

        let a = stack.active_id();
        stack.remove(a).unwrap();
        assert_eq!(stack.active().name, "c");
    }

    #[test]
    fn duplicate_inserts_directly_above_source() {
        let mut stack = stack_with(&["a", "b", "c"]);
        let a = stack.order()[0];
        stack.get_mut(a).unwrap().pixels.put_pixel(1, 1, Rgba([1, 2, 3, 4]));
        let dup = stack.duplicate(a).unwrap();
        assert_eq!(names(&stack), ["a", "a Copy", "b", "c"]);
        assert_eq!(stack.active_id(), dup);
        assert_eq!(*stack.get(dup).unwrap().pixels.get_pixel(1, 1), Rgba([1, 2, 3, 4]));

        // Deep copy: painting the duplicate leaves the source alone.
        stack.get_mut(dup).unwrap().pixels.put_pixel(1, 1, Rgba([9, 9, 9, 9]));
        assert_eq!(*stack.get(a).unwrap().pixels.get_pixel(1, 1), Rgba([1, 2, 3, 4]));
    }

    #[test]
    fn reorder_preserves_other_relative_positions() {
        let mut stack = stack_with(&["a", "b", "c", "d"]);
        stack.reorder(0, 2).unwrap();
        assert_eq!(names(&stack), ["b", "c", "a", "d"]);
        stack.reorder(3, 0).unwrap();
        assert_eq!(names(&stack), ["d", "b", "c", "a"]);
        assert!(stack.reorder(4, 0).is_err());
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut stack = stack_with(&["a"]);
        let stranger = LayerId::new();
        assert!(matches!(stack.set_active(stranger), Err(EditorError::UnknownLayer(_))));
        assert!(stack.duplicate(stranger).is_err());
    }
}
