//! Smart alignment: snapping a moving object to the canvas and its siblings.
//!
//! Each object exposes three alignment lines per axis (start, center, end).
//! While dragging, the moving object's lines are compared with the canvas
//! lines `{0, extent / 2, extent}` and with every visible sibling's lines.
//! Per axis the closest candidate under the threshold wins, earliest first on
//! ties (canvas before siblings). The axes are resolved independently.
//!
//! All comparisons use axis-aligned bounding boxes, so rotated or scaled
//! objects align by their bounds rather than their outline.

use crate::layer::{LayerId, LayerRegistry};
use crate::scene::{GuideOrientation, NodeKey, SceneGraph, SceneNode};
use kurbo::{Point, Rect, Size};

/// Snap distance in screen pixels at 100% zoom.
pub const SNAP_THRESHOLD: f64 = 5.0;

/// Which coordinate a candidate adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// One of the three alignment lines of a box along an axis:
/// left/center/right for X, top/middle/bottom for Y.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignEdge {
    Start,
    Center,
    End,
}

impl AlignEdge {
    pub const ALL: [AlignEdge; 3] = [AlignEdge::Start, AlignEdge::Center, AlignEdge::End];

    /// Coordinate of this line for a span starting at `start` of length `extent`.
    pub fn coordinate(self, start: f64, extent: f64) -> f64 {
        match self {
            AlignEdge::Start => start,
            AlignEdge::Center => start + extent / 2.0,
            AlignEdge::End => start + extent,
        }
    }
}

/// What the moving object aligned against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapSource {
    Canvas,
    Layer(LayerId),
}

/// An accepted alignment on one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapCandidate {
    pub axis: Axis,
    pub moving_edge: AlignEdge,
    pub source: SnapSource,
    pub target_edge: AlignEdge,
    /// Coordinate both lines share after snapping.
    pub value: f64,
    /// Offset to add to the moving object's position.
    pub delta: f64,
    pub distance: f64,
}

impl SnapCandidate {
    /// Guide line drawn through the aligned coordinate.
    pub fn guide(&self) -> Guide {
        Guide {
            orientation: match self.axis {
                Axis::X => GuideOrientation::Vertical,
                Axis::Y => GuideOrientation::Horizontal,
            },
            position: self.value,
        }
    }
}

/// A full-canvas guide line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Guide {
    pub orientation: GuideOrientation,
    pub position: f64,
}

impl Guide {
    /// End points of the guide across a canvas.
    pub fn segment(&self, canvas: Size) -> (Point, Point) {
        match self.orientation {
            GuideOrientation::Vertical => (
                Point::new(self.position, 0.0),
                Point::new(self.position, canvas.height),
            ),
            GuideOrientation::Horizontal => (
                Point::new(0.0, self.position),
                Point::new(canvas.width, self.position),
            ),
        }
    }
}

/// Bounds of another object the moving one may align with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sibling {
    pub id: LayerId,
    pub bounds: Rect,
}

/// Result of snapping one frame of a drag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapResult {
    /// Adjusted left of the moving bounds.
    pub left: f64,
    /// Adjusted top of the moving bounds.
    pub top: f64,
    pub x: Option<SnapCandidate>,
    pub y: Option<SnapCandidate>,
}

impl SnapResult {
    /// A result that leaves the bounds where they are.
    pub fn none(bounds: Rect) -> Self {
        Self {
            left: bounds.x0,
            top: bounds.y0,
            x: None,
            y: None,
        }
    }

    pub fn is_snapped(&self) -> bool {
        self.x.is_some() || self.y.is_some()
    }

    /// One guide per snapped axis, X first.
    pub fn guides(&self) -> Vec<Guide> {
        self.x
            .iter()
            .chain(self.y.iter())
            .map(SnapCandidate::guide)
            .collect()
    }
}

/// Find the best candidate on one axis.
fn best_on_axis(
    axis: Axis,
    start: f64,
    extent: f64,
    canvas_extent: f64,
    siblings: &[Sibling],
    threshold: f64,
) -> Option<SnapCandidate> {
    let span = |rect: &Rect| match axis {
        Axis::X => (rect.x0, rect.width()),
        Axis::Y => (rect.y0, rect.height()),
    };
    let targets = std::iter::once((SnapSource::Canvas, 0.0, canvas_extent)).chain(
        siblings.iter().map(|s| {
            let (start, extent) = span(&s.bounds);
            (SnapSource::Layer(s.id), start, extent)
        }),
    );

    let mut best: Option<SnapCandidate> = None;
    for (source, target_start, target_extent) in targets {
        for moving_edge in AlignEdge::ALL {
            let current = moving_edge.coordinate(start, extent);
            for target_edge in AlignEdge::ALL {
                let value = target_edge.coordinate(target_start, target_extent);
                let distance = (value - current).abs();
                if distance >= threshold {
                    continue;
                }
                // Strictly closer only: earlier candidates win ties
                if best.is_some_and(|b| distance >= b.distance) {
                    continue;
                }
                best = Some(SnapCandidate {
                    axis,
                    moving_edge,
                    source,
                    target_edge,
                    value,
                    delta: value - current,
                    distance,
                });
            }
        }
    }
    best
}

/// Snap moving bounds against a canvas and its siblings.
pub fn snap_bounds(moving: Rect, siblings: &[Sibling], canvas: Size, threshold: f64) -> SnapResult {
    let x = best_on_axis(
        Axis::X,
        moving.x0,
        moving.width(),
        canvas.width,
        siblings,
        threshold,
    );
    let y = best_on_axis(
        Axis::Y,
        moving.y0,
        moving.height(),
        canvas.height,
        siblings,
        threshold,
    );
    SnapResult {
        left: moving.x0 + x.map_or(0.0, |c| c.delta),
        top: moving.y0 + y.map_or(0.0, |c| c.delta),
        x,
        y,
    }
}

/// Drag-time snapping state: applies snaps to the scene and owns the guide
/// helpers currently drawn. Nothing carries over between gestures.
#[derive(Debug, Clone)]
pub struct SmartGuides {
    threshold: f64,
    zoom: f64,
    guides: Vec<NodeKey>,
    last: Option<SnapResult>,
}

impl Default for SmartGuides {
    fn default() -> Self {
        Self::new(SNAP_THRESHOLD)
    }
}

impl SmartGuides {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            zoom: 1.0,
            guides: Vec::new(),
            last: None,
        }
    }

    /// Current view zoom; the threshold stays constant in screen pixels.
    pub fn set_zoom(&mut self, zoom: f64) {
        if zoom > 0.0 && zoom.is_finite() {
            self.zoom = zoom;
        }
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    /// Threshold in canvas units.
    pub fn threshold(&self) -> f64 {
        self.threshold / self.zoom
    }

    /// Whether the last frame snapped on any axis.
    pub fn is_snapping(&self) -> bool {
        self.last.is_some_and(|r| r.is_snapped())
    }

    pub fn last_result(&self) -> Option<SnapResult> {
        self.last
    }

    /// Guide helper nodes currently in the scene.
    pub fn guide_nodes(&self) -> &[NodeKey] {
        &self.guides
    }

    /// Snap `moving` against the canvas and visible siblings, move its node
    /// and redraw the guides. Returns `None` if the layer is missing.
    pub fn apply(
        &mut self,
        scene: &mut SceneGraph,
        layers: &LayerRegistry,
        moving: LayerId,
        canvas: Size,
    ) -> Option<SnapResult> {
        let key = layers.node_key(moving)?;
        let bounds = scene.bounding_rect(key)?;
        let siblings: Vec<Sibling> = layers
            .list_layers()
            .iter()
            .filter(|l| l.id() != moving && l.visible)
            .filter_map(|l| {
                let node = scene.get(l.node())?;
                (node.visible && !node.helper).then(|| Sibling {
                    id: l.id(),
                    bounds: node.bounding_rect(),
                })
            })
            .collect();

        let result = snap_bounds(bounds, &siblings, canvas, self.threshold());
        if let Some(node) = scene.get_mut(key) {
            node.transform.left += result.left - bounds.x0;
            node.transform.top += result.top - bounds.y0;
        }

        self.remove_guides(scene);
        for guide in result.guides() {
            self.guides
                .push(scene.insert(SceneNode::guide(guide.orientation, guide.position, canvas)));
        }
        self.last = Some(result);
        Some(result)
    }

    /// End of gesture: drop guides and snapping state.
    pub fn clear(&mut self, scene: &mut SceneGraph) {
        self.remove_guides(scene);
        self.last = None;
    }

    fn remove_guides(&mut self, scene: &mut SceneGraph) {
        for key in self.guides.drain(..) {
            scene.remove(key);
        }
    }
}
