//! Layer registry: the editor's view of the document's elements.
//!
//! Each [`Layer`] carries editor metadata plus the [`NodeKey`] of the scene
//! node it owns. Every metadata change is mirrored onto that node so the
//! renderer and the serialized scene agree with the registry.

use crate::clip;
use crate::scene::{BlendMode, NodeContent, NodeKey, SceneGraph, SceneNode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for layers. Never reused within a document.
pub type LayerId = Uuid;

/// Kind of element a layer wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Text,
    Image,
    Shape,
    Group,
}

impl LayerKind {
    /// Kind for a node's content. Guides never become layers.
    pub fn of(content: &NodeContent) -> Option<Self> {
        match content {
            NodeContent::Text { .. } => Some(LayerKind::Text),
            NodeContent::Image { .. } => Some(LayerKind::Image),
            NodeContent::Shape { .. } => Some(LayerKind::Shape),
            NodeContent::Group { .. } => Some(LayerKind::Group),
            NodeContent::Guide => None,
        }
    }
}

/// Editor-level wrapper around one scene node.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    id: LayerId,
    pub name: String,
    pub kind: LayerKind,
    pub visible: bool,
    pub locked: bool,
    /// Normalized 0.0..=1.0.
    pub opacity: f64,
    pub blend_mode: BlendMode,
    node: NodeKey,
    /// The layer acting as this layer's clip mask.
    pub clip_mask_id: Option<LayerId>,
    /// Whether this layer currently clips at least one other layer.
    pub is_clip_mask: bool,
}

impl Layer {
    fn from_node(id: LayerId, node: &SceneNode, key: NodeKey, kind: LayerKind) -> Self {
        Self {
            id,
            name: node.name.clone(),
            kind,
            visible: node.visible,
            locked: !node.selectable && !node.evented,
            opacity: node.paint.opacity,
            blend_mode: node.blend,
            node: key,
            clip_mask_id: node.clip_mask_id,
            is_clip_mask: node.is_clip_mask,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    /// Handle of the scene node this layer owns.
    pub fn node(&self) -> NodeKey {
        self.node
    }
}

/// Partial update for [`LayerRegistry::update_layer`]. Ids never change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerPatch {
    pub name: Option<String>,
    pub visible: Option<bool>,
    pub locked: Option<bool>,
    pub opacity: Option<f64>,
    pub blend_mode: Option<BlendMode>,
}

impl LayerPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Ordered list of layers, back to front, mirroring the scene's paint order.
#[derive(Debug, Clone, Default)]
pub struct LayerRegistry {
    layers: Vec<Layer>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node into the scene and register a layer for it.
    ///
    /// The node is stamped with the new layer's id and name. Returns `None`
    /// for helper nodes and guides, which are never layers.
    pub fn add_layer(
        &mut self,
        scene: &mut SceneGraph,
        name: impl Into<String>,
        mut node: SceneNode,
    ) -> Option<LayerId> {
        let kind = LayerKind::of(&node.content).filter(|_| !node.helper)?;
        let id = Uuid::new_v4();
        node.layer_id = Some(id);
        node.name = name.into();
        // Bindings are established through the clip module only
        node.clip = None;
        node.clip_mask_id = None;
        node.is_clip_mask = false;
        node.paint.opacity = node.paint.opacity.clamp(0.0, 1.0);
        let key = scene.insert(node);
        let layer = scene
            .get(key)
            .map(|node| Layer::from_node(id, node, key, kind))?;
        log::debug!("Added {:?} layer {} ({})", kind, layer.name, id);
        self.layers.push(layer);
        Some(id)
    }

    /// Apply a partial update and mirror it onto the scene node.
    /// Returns false if the layer does not exist.
    pub fn update_layer(&mut self, scene: &mut SceneGraph, id: LayerId, patch: &LayerPatch) -> bool {
        let Some(layer) = self.layers.iter_mut().find(|l| l.id == id) else {
            log::debug!("update_layer: no layer {}", id);
            return false;
        };
        if let Some(name) = &patch.name {
            layer.name = name.clone();
        }
        if let Some(visible) = patch.visible {
            layer.visible = visible;
        }
        if let Some(locked) = patch.locked {
            layer.locked = locked;
        }
        if let Some(opacity) = patch.opacity {
            layer.opacity = opacity.clamp(0.0, 1.0);
        }
        if let Some(blend_mode) = patch.blend_mode {
            layer.blend_mode = blend_mode;
        }
        if let Some(node) = scene.get_mut(layer.node) {
            node.name = layer.name.clone();
            node.visible = layer.visible;
            node.selectable = !layer.locked;
            node.evented = !layer.locked;
            node.paint.opacity = layer.opacity;
            node.blend = layer.blend_mode;
        }
        true
    }

    /// Remove a layer and its scene node, cascading through clip bindings:
    /// a removed mask releases all of its targets, and a removed target
    /// takes its mask with it.
    ///
    /// Returns the ids of every layer removed.
    pub fn remove_layer(&mut self, scene: &mut SceneGraph, id: LayerId) -> Vec<LayerId> {
        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(layer) = self.get_layer(id).cloned() else {
                continue;
            };
            if layer.is_clip_mask {
                for target in self.masked_by(id) {
                    clip::unbind(self, scene, target);
                }
            }
            if let Some(mask) = layer.clip_mask_id {
                pending.push(mask);
            }
            scene.remove(layer.node);
            self.layers.retain(|l| l.id != id);
            removed.push(id);
        }
        if !removed.is_empty() {
            log::debug!("Removed layers {:?}", removed);
        }
        removed
    }

    pub fn get_layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub(crate) fn get_layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    /// Layers back to front.
    pub fn list_layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.get_layer(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Scene node backing a layer.
    pub fn node_key(&self, id: LayerId) -> Option<NodeKey> {
        self.get_layer(id).map(Layer::node)
    }

    /// Layers whose clip mask is `mask_id`.
    pub fn masked_by(&self, mask_id: LayerId) -> Vec<LayerId> {
        self.layers
            .iter()
            .filter(|l| l.clip_mask_id == Some(mask_id))
            .map(|l| l.id)
            .collect()
    }

    /// Re-sort layers to match the scene's paint order.
    pub fn sort_by_scene(&mut self, scene: &SceneGraph) {
        self.layers
            .sort_by_key(|l| scene.z_index(l.node).unwrap_or(usize::MAX));
    }

    /// Rebuild the whole registry from the scene's non-helper nodes.
    ///
    /// Nodes without a layer back-pointer get a fresh id stamped onto them.
    pub fn sync_from_scene(&mut self, scene: &mut SceneGraph) {
        self.layers.clear();
        for key in scene.document_keys() {
            let Some(node) = scene.get_mut(key) else {
                continue;
            };
            let Some(kind) = LayerKind::of(&node.content) else {
                continue;
            };
            let id = *node.layer_id.get_or_insert_with(Uuid::new_v4);
            self.layers.push(Layer::from_node(id, node, key, kind));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{NodeTransform, ShapeKind};

    fn rect(left: f64, top: f64) -> SceneNode {
        SceneNode::new(
            NodeContent::Shape {
                shape: ShapeKind::Rectangle { corner_radius: 0.0 },
            },
            NodeTransform::new(left, top, 50.0, 50.0),
        )
    }

    #[test]
    fn test_add_layer_stamps_node() {
        let mut scene = SceneGraph::new();
        let mut layers = LayerRegistry::new();
        let id = layers.add_layer(&mut scene, "Box", rect(0.0, 0.0)).unwrap();

        let layer = layers.get_layer(id).unwrap();
        assert_eq!(layer.kind, LayerKind::Shape);
        assert_eq!(layer.name, "Box");
        let node = scene.get(layer.node()).unwrap();
        assert_eq!(node.layer_id, Some(id));
        assert_eq!(node.name, "Box");
    }

    #[test]
    fn test_add_layer_rejects_guides() {
        let mut scene = SceneGraph::new();
        let mut layers = LayerRegistry::new();
        let guide = SceneNode::guide(
            crate::scene::GuideOrientation::Vertical,
            10.0,
            kurbo::Size::new(100.0, 100.0),
        );
        assert!(layers.add_layer(&mut scene, "guide", guide).is_none());
        assert!(scene.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let mut scene = SceneGraph::new();
        let mut layers = LayerRegistry::new();
        let a = layers.add_layer(&mut scene, "A", rect(0.0, 0.0)).unwrap();
        layers.remove_layer(&mut scene, a);
        let b = layers.add_layer(&mut scene, "B", rect(0.0, 0.0)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_update_layer_mirrors_to_node() {
        let mut scene = SceneGraph::new();
        let mut layers = LayerRegistry::new();
        let id = layers.add_layer(&mut scene, "A", rect(0.0, 0.0)).unwrap();

        let patch = LayerPatch {
            visible: Some(false),
            locked: Some(true),
            opacity: Some(1.7),
            blend_mode: Some(BlendMode::Screen),
            ..Default::default()
        };
        assert!(layers.update_layer(&mut scene, id, &patch));

        let layer = layers.get_layer(id).unwrap();
        assert_eq!(layer.id(), id);
        assert_eq!(layer.opacity, 1.0);
        let node = scene.get(layer.node()).unwrap();
        assert!(!node.visible);
        assert!(!node.selectable);
        assert!(!node.evented);
        assert_eq!(node.paint.opacity, 1.0);
        assert_eq!(node.blend, BlendMode::Screen);
    }

    #[test]
    fn test_update_missing_layer_is_noop() {
        let mut scene = SceneGraph::new();
        let mut layers = LayerRegistry::new();
        assert!(!layers.update_layer(&mut scene, Uuid::new_v4(), &LayerPatch::default()));
    }

    #[test]
    fn test_remove_layer() {
        let mut scene = SceneGraph::new();
        let mut layers = LayerRegistry::new();
        let id = layers.add_layer(&mut scene, "A", rect(0.0, 0.0)).unwrap();
        assert_eq!(layers.remove_layer(&mut scene, id), vec![id]);
        assert!(layers.is_empty());
        assert!(scene.is_empty());
        assert!(layers.remove_layer(&mut scene, id).is_empty());
    }

    #[test]
    fn test_sync_from_scene() {
        let mut scene = SceneGraph::new();
        let mut layers = LayerRegistry::new();
        let a = layers.add_layer(&mut scene, "A", rect(0.0, 0.0)).unwrap();
        let b = layers.add_layer(&mut scene, "B", rect(10.0, 0.0)).unwrap();
        // A node added behind the registry's back gets adopted
        scene.insert(rect(20.0, 0.0));

        let mut rebuilt = LayerRegistry::new();
        rebuilt.sync_from_scene(&mut scene);
        let ids: Vec<LayerId> = rebuilt.list_layers().iter().map(Layer::id).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(&ids[..2], &[a, b]);
        let adopted = rebuilt.list_layers()[2].node();
        assert_eq!(scene.get(adopted).unwrap().layer_id, Some(ids[2]));
    }

    #[test]
    fn test_sort_by_scene() {
        let mut scene = SceneGraph::new();
        let mut layers = LayerRegistry::new();
        let a = layers.add_layer(&mut scene, "A", rect(0.0, 0.0)).unwrap();
        let b = layers.add_layer(&mut scene, "B", rect(0.0, 0.0)).unwrap();
        scene.shift(layers.node_key(a).unwrap(), true);
        layers.sort_by_scene(&scene);
        let ids: Vec<LayerId> = layers.list_layers().iter().map(Layer::id).collect();
        assert_eq!(ids, vec![b, a]);
    }
}
