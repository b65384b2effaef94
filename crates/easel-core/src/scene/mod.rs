//! Scene-graph arena.
//!
//! Stands in for the render library: it owns every drawable node, hands out
//! generational [`NodeKey`]s to the layer registry, and serializes the
//! document part of the scene (everything except helper objects) into a
//! round-trippable [`SceneData`] payload.

mod color;
mod node;

pub use color::SerializableColor;
pub use node::{
    BlendMode, ClipPath, ClipShape, GuideOrientation, NodeContent, NodeTransform, Paint,
    SceneNode, ShapeKind,
};

use crate::layer::LayerId;
use kurbo::Rect;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the serialized scene layout.
pub const SCENE_VERSION: u32 = 1;

/// Scene (de)serialization errors.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("Invalid scene JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported scene version: {0}")]
    UnsupportedVersion(u32),
}

/// Serialized document content of a scene, back to front.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneData {
    pub version: u32,
    pub objects: Vec<SceneNode>,
}

impl Default for SceneData {
    fn default() -> Self {
        Self {
            version: SCENE_VERSION,
            objects: Vec::new(),
        }
    }
}

impl SceneData {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse and validate a serialized scene.
    pub fn from_json(json: &str) -> Result<Self, SceneError> {
        let data: SceneData = serde_json::from_str(json)?;
        data.validated()
    }

    /// Reject payloads written by an incompatible scene layout.
    pub fn validated(self) -> Result<Self, SceneError> {
        if self.version != SCENE_VERSION {
            return Err(SceneError::UnsupportedVersion(self.version));
        }
        Ok(self)
    }
}

/// Generational handle to a node in a [`SceneGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeKey {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    node: Option<SceneNode>,
}

/// Arena of scene nodes plus their paint order.
#[derive(Debug, Clone, Default)]
pub struct SceneGraph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Paint order, back to front.
    order: Vec<NodeKey>,
    disposed: bool,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node on top of the paint order.
    pub fn insert(&mut self, node: SceneNode) -> NodeKey {
        let key = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeKey {
                    index: (self.slots.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        self.order.push(key);
        key
    }

    /// Remove a node. Stale keys return `None`.
    pub fn remove(&mut self, key: NodeKey) -> Option<SceneNode> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.order.retain(|&k| k != key);
        Some(node)
    }

    pub fn get(&self, key: NodeKey) -> Option<&SceneNode> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut SceneNode> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.get(key).is_some()
    }

    /// Number of nodes, helpers included.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Nodes in paint order (back to front).
    pub fn iter(&self) -> impl Iterator<Item = (NodeKey, &SceneNode)> {
        self.order
            .iter()
            .filter_map(|&key| self.get(key).map(|node| (key, node)))
    }

    /// Keys of non-helper nodes in paint order.
    pub fn document_keys(&self) -> Vec<NodeKey> {
        self.iter()
            .filter(|(_, node)| !node.helper)
            .map(|(key, _)| key)
            .collect()
    }

    /// Position of a node in the paint order.
    pub fn z_index(&self, key: NodeKey) -> Option<usize> {
        self.order.iter().position(|&k| k == key)
    }

    /// Swap a node with its nearest non-helper neighbour. `forward` moves it
    /// towards the front. Returns false if it is already at that end.
    pub fn shift(&mut self, key: NodeKey, forward: bool) -> bool {
        let Some(pos) = self.z_index(key) else {
            return false;
        };
        let is_document = |i: usize| self.get(self.order[i]).is_some_and(|n| !n.helper);
        let other = if forward {
            (pos + 1..self.order.len()).find(|&i| is_document(i))
        } else {
            (0..pos).rev().find(|&i| is_document(i))
        };
        match other {
            Some(other) => {
                self.order.swap(pos, other);
                true
            }
            None => false,
        }
    }

    /// Find the node that backs a layer.
    pub fn find_by_layer(&self, id: LayerId) -> Option<NodeKey> {
        self.iter()
            .find(|(_, node)| node.layer_id == Some(id))
            .map(|(key, _)| key)
    }

    /// Axis-aligned bounds of a node in canvas space.
    pub fn bounding_rect(&self, key: NodeKey) -> Option<Rect> {
        self.get(key).map(SceneNode::bounding_rect)
    }

    /// Serialize every non-helper node.
    pub fn to_data(&self) -> SceneData {
        SceneData {
            version: SCENE_VERSION,
            objects: self
                .iter()
                .filter(|(_, node)| !node.helper)
                .map(|(_, node)| node.clone())
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        self.to_data().to_json()
    }

    /// Replace every non-helper node with the given objects.
    ///
    /// Helpers survive and stay painted above the document. Returns the keys
    /// of the loaded nodes in paint order.
    pub fn load_data(&mut self, data: SceneData) -> Vec<NodeKey> {
        for key in self.document_keys() {
            self.remove(key);
        }
        let helpers: Vec<NodeKey> = self.order.drain(..).collect();
        let keys: Vec<NodeKey> = data
            .objects
            .into_iter()
            .filter(|node| !node.helper)
            .map(|node| self.insert(node))
            .collect();
        self.order.extend(helpers);
        keys
    }

    /// Remove every helper node. Returns how many were removed.
    pub fn clear_helpers(&mut self) -> usize {
        let helpers: Vec<NodeKey> = self
            .iter()
            .filter(|(_, node)| node.helper)
            .map(|(key, _)| key)
            .collect();
        for &key in &helpers {
            self.remove(key);
        }
        helpers.len()
    }

    /// Tear the scene down, as when the hosting surface unmounts.
    pub fn dispose(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.order.clear();
        self.disposed = true;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}
