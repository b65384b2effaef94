//! Clip-mask bindings between layers.
//!
//! A mask layer crops any number of target layers; a target has at most one
//! mask. The clip stored on the target is expressed in the target's local
//! space, so it keeps cropping correctly under the target's own rotation,
//! scale and flips. Whenever either side of a binding changes geometry the
//! relative clip must be recomputed with [`refresh`].

use crate::layer::{LayerId, LayerRegistry};
use crate::scene::{ClipPath, SceneGraph, SceneNode};

/// Relative clip that reproduces `mask`'s outline when attached to `target`.
///
/// Returns `None` when the target transform is degenerate (zero scale) and
/// cannot be inverted.
pub fn relative_clip(mask: &SceneNode, target: &SceneNode) -> Option<ClipPath> {
    let target_affine = target.transform.affine();
    if target_affine.determinant().abs() < f64::EPSILON {
        return None;
    }
    Some(ClipPath {
        shape: mask.clip_shape(),
        width: mask.transform.width,
        height: mask.transform.height,
        transform: target_affine.inverse() * mask.transform.affine(),
    })
}

/// Bind `mask_id` as the clip mask of `target_id`.
///
/// Binding a layer to itself, binding missing layers, or binding a target
/// that already masks its own mask is ignored. A target that already has a
/// different mask is rebound.
pub fn bind(
    layers: &mut LayerRegistry,
    scene: &mut SceneGraph,
    mask_id: LayerId,
    target_id: LayerId,
) -> bool {
    if mask_id == target_id {
        log::debug!("Ignoring clip bind of layer {} to itself", mask_id);
        return false;
    }
    let (Some(mask), Some(target)) = (layers.get_layer(mask_id), layers.get_layer(target_id)) else {
        log::debug!("Ignoring clip bind {} -> {}: layer missing", mask_id, target_id);
        return false;
    };
    if mask.clip_mask_id == Some(target_id) {
        log::debug!("Ignoring cyclic clip bind {} -> {}", mask_id, target_id);
        return false;
    }
    let previous = target.clip_mask_id;
    let (mask_key, target_key) = (mask.node(), target.node());

    let clip = match (scene.get(mask_key), scene.get(target_key)) {
        (Some(mask_node), Some(target_node)) => relative_clip(mask_node, target_node),
        _ => None,
    };
    let Some(clip) = clip else {
        log::warn!("Cannot compute clip for {} -> {}", mask_id, target_id);
        return false;
    };

    if let Some(previous) = previous.filter(|&p| p != mask_id) {
        unbind(layers, scene, target_id);
        log::debug!("Replaced clip mask {} on {}", previous, target_id);
    }

    if let Some(node) = scene.get_mut(target_key) {
        node.clip = Some(clip);
        node.clip_mask_id = Some(mask_id);
    }
    if let Some(node) = scene.get_mut(mask_key) {
        node.is_clip_mask = true;
    }
    if let Some(target) = layers.get_layer_mut(target_id) {
        target.clip_mask_id = Some(mask_id);
    }
    if let Some(mask) = layers.get_layer_mut(mask_id) {
        mask.is_clip_mask = true;
    }
    true
}

/// Remove the clip from `target_id`. The former mask stops being a mask once
/// it has no targets left. Returns false if nothing was bound.
pub fn unbind(layers: &mut LayerRegistry, scene: &mut SceneGraph, target_id: LayerId) -> bool {
    let Some(target) = layers.get_layer_mut(target_id) else {
        return false;
    };
    let Some(mask_id) = target.clip_mask_id.take() else {
        return false;
    };
    let target_key = target.node();
    if let Some(node) = scene.get_mut(target_key) {
        node.clip = None;
        node.clip_mask_id = None;
    }
    if layers.masked_by(mask_id).is_empty() {
        set_mask_flag(layers, scene, mask_id, false);
    }
    true
}

/// Recompute every clip that involves `layer_id`, either as the mask or as a
/// target. Returns the number of clips recomputed.
pub fn refresh(layers: &LayerRegistry, scene: &mut SceneGraph, layer_id: LayerId) -> usize {
    let Some(layer) = layers.get_layer(layer_id) else {
        return 0;
    };
    let mut pairs: Vec<(LayerId, LayerId)> = layers
        .masked_by(layer_id)
        .into_iter()
        .map(|target| (layer_id, target))
        .collect();
    if let Some(mask) = layer.clip_mask_id {
        pairs.push((mask, layer_id));
    }
    pairs
        .into_iter()
        .filter(|&(mask, target)| recompute(layers, scene, mask, target))
        .count()
}

/// Re-establish bindings after the scene was reloaded (recovery, undo/redo).
///
/// Targets whose mask no longer exists are released; mask flags are derived
/// from the surviving bindings. Returns the number of live bindings.
pub fn rebuild(layers: &mut LayerRegistry, scene: &mut SceneGraph) -> usize {
    let bound: Vec<(LayerId, LayerId)> = layers
        .list_layers()
        .iter()
        .filter_map(|l| l.clip_mask_id.map(|mask| (mask, l.id())))
        .collect();

    let mut live = 0;
    for (mask, target) in bound {
        if mask != target && layers.contains(mask) && recompute(layers, scene, mask, target) {
            live += 1;
            continue;
        }
        log::warn!("Dropping dangling clip binding {} -> {}", mask, target);
        if let Some(layer) = layers.get_layer_mut(target) {
            layer.clip_mask_id = None;
            let key = layer.node();
            if let Some(node) = scene.get_mut(key) {
                node.clip = None;
                node.clip_mask_id = None;
            }
        }
    }

    let ids: Vec<LayerId> = layers.list_layers().iter().map(|l| l.id()).collect();
    for id in ids {
        let is_mask = !layers.masked_by(id).is_empty();
        set_mask_flag(layers, scene, id, is_mask);
    }
    live
}

fn recompute(layers: &LayerRegistry, scene: &mut SceneGraph, mask: LayerId, target: LayerId) -> bool {
    let (Some(mask_key), Some(target_key)) = (layers.node_key(mask), layers.node_key(target)) else {
        return false;
    };
    let clip = match (scene.get(mask_key), scene.get(target_key)) {
        (Some(m), Some(t)) => relative_clip(m, t),
        _ => None,
    };
    match (clip, scene.get_mut(target_key)) {
        (Some(clip), Some(node)) => {
            node.clip = Some(clip);
            node.clip_mask_id = Some(mask);
            true
        }
        _ => false,
    }
}

fn set_mask_flag(layers: &mut LayerRegistry, scene: &mut SceneGraph, id: LayerId, value: bool) {
    if let Some(layer) = layers.get_layer_mut(id) {
        layer.is_clip_mask = value;
        let key = layer.node();
        if let Some(node) = scene.get_mut(key) {
            node.is_clip_mask = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{ClipShape, NodeContent, NodeTransform, ShapeKind};
    use kurbo::{Point, Rect};

    fn shape(kind: ShapeKind, transform: NodeTransform) -> SceneNode {
        SceneNode::new(NodeContent::Shape { shape: kind }, transform)
    }

    fn setup() -> (LayerRegistry, SceneGraph, LayerId, LayerId) {
        let mut scene = SceneGraph::new();
        let mut layers = LayerRegistry::new();
        let target = layers
            .add_layer(
                &mut scene,
                "photo",
                shape(
                    ShapeKind::Rectangle { corner_radius: 0.0 },
                    NodeTransform::new(100.0, 100.0, 200.0, 100.0),
                ),
            )
            .unwrap();
        let mask = layers
            .add_layer(
                &mut scene,
                "circle",
                shape(ShapeKind::Ellipse, NodeTransform::new(150.0, 120.0, 60.0, 60.0)),
            )
            .unwrap();
        (layers, scene, mask, target)
    }

    fn assert_rect_eq(a: Rect, b: Rect) {
        for (x, y) in [(a.x0, b.x0), (a.y0, b.y0), (a.x1, b.x1), (a.y1, b.y1)] {
            assert!((x - y).abs() < 1e-6, "{:?} != {:?}", a, b);
        }
    }

    #[test]
    fn test_bind_sets_both_sides() {
        let (mut layers, mut scene, mask, target) = setup();
        assert!(bind(&mut layers, &mut scene, mask, target));

        assert_eq!(layers.get_layer(target).unwrap().clip_mask_id, Some(mask));
        assert!(layers.get_layer(mask).unwrap().is_clip_mask);
        let node = scene.get(layers.node_key(target).unwrap()).unwrap();
        let clip = node.clip.unwrap();
        assert_eq!(clip.shape, ClipShape::Ellipse);
        assert_eq!(node.clip_mask_id, Some(mask));
        // The clip outline lands exactly where the mask is drawn
        assert_rect_eq(
            clip.canvas_bounds(&node.transform),
            Rect::new(150.0, 120.0, 210.0, 180.0),
        );
    }

    #[test]
    fn test_clip_compensates_rotation_and_scale() {
        let (mut layers, mut scene, mask, target) = setup();
        let key = layers.node_key(target).unwrap();
        {
            let node = scene.get_mut(key).unwrap();
            node.transform.angle = 30.0;
            node.transform.scale_x = 2.0;
            node.transform.scale_y = 0.5;
            node.transform.flip_y = true;
        }
        assert!(bind(&mut layers, &mut scene, mask, target));

        let node = scene.get(key).unwrap();
        let clip = node.clip.unwrap();
        let mask_affine = scene
            .get(layers.node_key(mask).unwrap())
            .unwrap()
            .transform
            .affine();
        let composed = node.transform.affine() * clip.transform;
        for p in [Point::new(0.0, 0.0), Point::new(60.0, 0.0), Point::new(60.0, 60.0)] {
            assert!((composed * p - mask_affine * p).hypot() < 1e-6);
        }
    }

    #[test]
    fn test_bind_guards() {
        let (mut layers, mut scene, mask, target) = setup();
        assert!(!bind(&mut layers, &mut scene, mask, mask));
        assert!(!bind(&mut layers, &mut scene, mask, uuid::Uuid::new_v4()));
        assert!(bind(&mut layers, &mut scene, mask, target));
        // target cannot in turn mask its own mask
        assert!(!bind(&mut layers, &mut scene, target, mask));
    }

    #[test]
    fn test_degenerate_target_is_rejected() {
        let (mut layers, mut scene, mask, target) = setup();
        scene
            .get_mut(layers.node_key(target).unwrap())
            .unwrap()
            .transform
            .scale_x = 0.0;
        assert!(!bind(&mut layers, &mut scene, mask, target));
        assert_eq!(layers.get_layer(target).unwrap().clip_mask_id, None);
    }

    #[test]
    fn test_unbind_clears_clip() {
        let (mut layers, mut scene, mask, target) = setup();
        bind(&mut layers, &mut scene, mask, target);
        assert!(unbind(&mut layers, &mut scene, target));
        assert!(!unbind(&mut layers, &mut scene, target));

        assert_eq!(layers.get_layer(target).unwrap().clip_mask_id, None);
        assert!(!layers.get_layer(mask).unwrap().is_clip_mask);
        let node = scene.get(layers.node_key(target).unwrap()).unwrap();
        assert!(node.clip.is_none());
    }

    #[test]
    fn test_rebind_to_new_mask() {
        let (mut layers, mut scene, mask, target) = setup();
        let other = layers
            .add_layer(
                &mut scene,
                "square",
                shape(
                    ShapeKind::Rectangle { corner_radius: 4.0 },
                    NodeTransform::new(0.0, 0.0, 10.0, 10.0),
                ),
            )
            .unwrap();
        bind(&mut layers, &mut scene, mask, target);
        assert!(bind(&mut layers, &mut scene, other, target));
        assert!(!layers.get_layer(mask).unwrap().is_clip_mask);
        assert!(layers.get_layer(other).unwrap().is_clip_mask);
        assert_eq!(layers.masked_by(other), vec![target]);
    }

    #[test]
    fn test_refresh_after_mask_moves() {
        let (mut layers, mut scene, mask, target) = setup();
        bind(&mut layers, &mut scene, mask, target);
        scene
            .get_mut(layers.node_key(mask).unwrap())
            .unwrap()
            .transform
            .left = 200.0;
        assert_eq!(refresh(&layers, &mut scene, mask), 1);

        let node = scene.get(layers.node_key(target).unwrap()).unwrap();
        assert_rect_eq(
            node.clip.unwrap().canvas_bounds(&node.transform),
            Rect::new(200.0, 120.0, 260.0, 180.0),
        );
    }

    #[test]
    fn test_delete_mask_releases_targets() {
        let (mut layers, mut scene, mask, target) = setup();
        let second = layers
            .add_layer(
                &mut scene,
                "second",
                shape(ShapeKind::Triangle, NodeTransform::new(0.0, 0.0, 80.0, 80.0)),
            )
            .unwrap();
        bind(&mut layers, &mut scene, mask, target);
        bind(&mut layers, &mut scene, mask, second);

        assert_eq!(layers.remove_layer(&mut scene, mask), vec![mask]);
        for id in [target, second] {
            let layer = layers.get_layer(id).unwrap();
            assert_eq!(layer.clip_mask_id, None);
            assert!(scene.get(layer.node()).unwrap().clip.is_none());
        }
    }

    #[test]
    fn test_delete_target_removes_mask() {
        let (mut layers, mut scene, mask, target) = setup();
        bind(&mut layers, &mut scene, mask, target);
        let removed = layers.remove_layer(&mut scene, target);
        assert_eq!(removed, vec![target, mask]);
        assert!(layers.is_empty());
        assert!(scene.is_empty());
    }

    #[test]
    fn test_rebuild_drops_dangling_bindings() {
        let (mut layers, mut scene, mask, target) = setup();
        bind(&mut layers, &mut scene, mask, target);
        // Simulate a snapshot in which the mask node was lost
        let mask_key = layers.node_key(mask).unwrap();
        scene.remove(mask_key);
        layers.sync_from_scene(&mut scene);

        assert_eq!(rebuild(&mut layers, &mut scene), 0);
        assert_eq!(layers.get_layer(target).unwrap().clip_mask_id, None);
    }

    #[test]
    fn test_rebuild_restores_bindings() {
        let (mut layers, mut scene, mask, target) = setup();
        bind(&mut layers, &mut scene, mask, target);
        let data = scene.to_data();

        let mut restored_scene = SceneGraph::new();
        restored_scene.load_data(data);
        let mut restored = LayerRegistry::new();
        restored.sync_from_scene(&mut restored_scene);

        assert_eq!(rebuild(&mut restored, &mut restored_scene), 1);
        assert!(restored.get_layer(mask).unwrap().is_clip_mask);
        assert_eq!(restored.get_layer(target).unwrap().clip_mask_id, Some(mask));
    }
}
