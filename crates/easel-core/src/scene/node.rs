//! Scene nodes: the render-side representation of one drawable element.

use super::SerializableColor;
use crate::image::ImageFormat;
use crate::layer::LayerId;
use kurbo::{Affine, Rect, Size, Vec2};
use serde::{Deserialize, Serialize};

/// Compositing mode of a node, mirrored from its layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl BlendMode {
    /// Every supported mode, in menu order.
    pub const ALL: [BlendMode; 16] = [
        BlendMode::Normal,
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Overlay,
        BlendMode::Darken,
        BlendMode::Lighten,
        BlendMode::ColorDodge,
        BlendMode::ColorBurn,
        BlendMode::HardLight,
        BlendMode::SoftLight,
        BlendMode::Difference,
        BlendMode::Exclusion,
        BlendMode::Hue,
        BlendMode::Saturation,
        BlendMode::Color,
        BlendMode::Luminosity,
    ];

    /// Canvas 2D composite operation name for this mode.
    pub fn composite_operation(self) -> &'static str {
        match self {
            BlendMode::Normal => "source-over",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::ColorDodge => "color-dodge",
            BlendMode::ColorBurn => "color-burn",
            BlendMode::HardLight => "hard-light",
            BlendMode::SoftLight => "soft-light",
            BlendMode::Difference => "difference",
            BlendMode::Exclusion => "exclusion",
            BlendMode::Hue => "hue",
            BlendMode::Saturation => "saturation",
            BlendMode::Color => "color",
            BlendMode::Luminosity => "luminosity",
        }
    }

    /// Inverse of [`BlendMode::composite_operation`].
    pub fn from_composite_operation(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.composite_operation() == name)
    }
}

impl From<BlendMode> for peniko::Mix {
    fn from(mode: BlendMode) -> Self {
        match mode {
            BlendMode::Normal => peniko::Mix::Normal,
            BlendMode::Multiply => peniko::Mix::Multiply,
            BlendMode::Screen => peniko::Mix::Screen,
            BlendMode::Overlay => peniko::Mix::Overlay,
            BlendMode::Darken => peniko::Mix::Darken,
            BlendMode::Lighten => peniko::Mix::Lighten,
            BlendMode::ColorDodge => peniko::Mix::ColorDodge,
            BlendMode::ColorBurn => peniko::Mix::ColorBurn,
            BlendMode::HardLight => peniko::Mix::HardLight,
            BlendMode::SoftLight => peniko::Mix::SoftLight,
            BlendMode::Difference => peniko::Mix::Difference,
            BlendMode::Exclusion => peniko::Mix::Exclusion,
            BlendMode::Hue => peniko::Mix::Hue,
            BlendMode::Saturation => peniko::Mix::Saturation,
            BlendMode::Color => peniko::Mix::Color,
            BlendMode::Luminosity => peniko::Mix::Luminosity,
        }
    }
}

/// Primitive vector shapes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ShapeKind {
    Rectangle { corner_radius: f64 },
    Ellipse,
    Triangle,
    Line,
}

/// What a node draws.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NodeContent {
    Text {
        text: String,
        font_family: String,
        font_size: f64,
    },
    Image {
        format: ImageFormat,
        /// Encoded image bytes, base64 so the scene stays plain JSON.
        data_base64: String,
        natural_width: u32,
        natural_height: u32,
    },
    Shape {
        shape: ShapeKind,
    },
    Group {
        children: Vec<SceneNode>,
    },
    /// Transient alignment guide drawn while snapping.
    Guide,
}

/// Object geometry, fabric-style: an unrotated box of `width` x `height`
/// whose top-left corner sits at (`left`, `top`), then scaled, flipped about
/// its center and rotated about that top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeTransform {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "one")]
    pub scale_x: f64,
    #[serde(default = "one")]
    pub scale_y: f64,
    /// Rotation in degrees, clockwise.
    #[serde(default)]
    pub angle: f64,
    #[serde(default)]
    pub flip_x: bool,
    #[serde(default)]
    pub flip_y: bool,
}

fn one() -> f64 {
    1.0
}

impl NodeTransform {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
            scale_x: 1.0,
            scale_y: 1.0,
            angle: 0.0,
            flip_x: false,
            flip_y: false,
        }
    }

    /// Map from the node's local box `(0, 0)..(width, height)` to canvas space.
    pub fn affine(&self) -> Affine {
        let half = Vec2::new(self.width / 2.0, self.height / 2.0);
        let flip = Affine::translate(half)
            * Affine::scale_non_uniform(
                if self.flip_x { -1.0 } else { 1.0 },
                if self.flip_y { -1.0 } else { 1.0 },
            )
            * Affine::translate(-half);
        Affine::translate((self.left, self.top))
            * Affine::rotate(self.angle.to_radians())
            * Affine::scale_non_uniform(self.scale_x, self.scale_y)
            * flip
    }

    /// Axis-aligned bounding box in canvas space (accounts for rotation and scale).
    pub fn bounding_rect(&self) -> Rect {
        self.affine()
            .transform_rect_bbox(Rect::new(0.0, 0.0, self.width, self.height))
    }

    /// Rendered size before rotation.
    pub fn scaled_size(&self) -> Size {
        Size::new(
            self.width * self.scale_x.abs(),
            self.height * self.scale_y.abs(),
        )
    }
}

/// Paint properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paint {
    pub fill: Option<SerializableColor>,
    pub stroke: Option<SerializableColor>,
    #[serde(default)]
    pub stroke_width: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_dash: Option<Vec<f64>>,
    /// 0.0 = fully transparent, 1.0 = fully opaque.
    #[serde(default = "one")]
    pub opacity: f64,
}

impl Default for Paint {
    fn default() -> Self {
        Self {
            fill: Some(SerializableColor::black()),
            stroke: None,
            stroke_width: 0.0,
            stroke_dash: None,
            opacity: 1.0,
        }
    }
}

/// Outline used to crop a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClipShape {
    Rectangle { corner_radius: f64 },
    Ellipse,
    Triangle,
    /// Text, images and groups clip by their box.
    Bounds,
}

/// A clip applied to a node.
///
/// `transform` maps the clip outline's local box into the clipped node's
/// local box, so the clip travels with the node it is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipPath {
    pub shape: ClipShape,
    pub width: f64,
    pub height: f64,
    pub transform: Affine,
}

impl ClipPath {
    /// Clip outline bounds in canvas space, given the owner's transform.
    pub fn canvas_bounds(&self, owner: &NodeTransform) -> Rect {
        (owner.affine() * self.transform)
            .transform_rect_bbox(Rect::new(0.0, 0.0, self.width, self.height))
    }
}

/// Orientation of a guide line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuideOrientation {
    /// Constant x, spans the canvas height.
    Vertical,
    /// Constant y, spans the canvas width.
    Horizontal,
}

/// One drawable element in the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneNode {
    /// Back-pointer to the owning layer.
    #[serde(default)]
    pub layer_id: Option<LayerId>,
    #[serde(default)]
    pub name: String,
    pub content: NodeContent,
    pub transform: NodeTransform,
    #[serde(default)]
    pub paint: Paint,
    #[serde(default)]
    pub blend: BlendMode,
    #[serde(default = "yes")]
    pub visible: bool,
    #[serde(default = "yes")]
    pub selectable: bool,
    #[serde(default = "yes")]
    pub evented: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip: Option<ClipPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_mask_id: Option<LayerId>,
    #[serde(default)]
    pub is_clip_mask: bool,
    /// Guides and grid overlays; never serialized into documents or history.
    #[serde(default)]
    pub helper: bool,
}

fn yes() -> bool {
    true
}

impl SceneNode {
    pub fn new(content: NodeContent, transform: NodeTransform) -> Self {
        Self {
            layer_id: None,
            name: String::new(),
            content,
            transform,
            paint: Paint::default(),
            blend: BlendMode::Normal,
            visible: true,
            selectable: true,
            evented: true,
            clip: None,
            clip_mask_id: None,
            is_clip_mask: false,
            helper: false,
        }
    }

    /// A dashed, non-interactive guide spanning the whole canvas.
    pub fn guide(orientation: GuideOrientation, position: f64, canvas: Size) -> Self {
        let transform = match orientation {
            GuideOrientation::Vertical => NodeTransform::new(position, 0.0, 0.0, canvas.height),
            GuideOrientation::Horizontal => NodeTransform::new(0.0, position, canvas.width, 0.0),
        };
        Self {
            name: "guide".to_string(),
            paint: Paint {
                fill: None,
                stroke: Some(SerializableColor::new(236, 72, 153, 255)),
                stroke_width: 1.0,
                stroke_dash: Some(vec![5.0, 5.0]),
                opacity: 1.0,
            },
            selectable: false,
            evented: false,
            helper: true,
            ..Self::new(NodeContent::Guide, transform)
        }
    }

    pub fn bounding_rect(&self) -> Rect {
        self.transform.bounding_rect()
    }

    /// Outline this node contributes when used as a clip mask.
    pub fn clip_shape(&self) -> ClipShape {
        match &self.content {
            NodeContent::Shape {
                shape: ShapeKind::Rectangle { corner_radius },
            } => ClipShape::Rectangle {
                corner_radius: *corner_radius,
            },
            NodeContent::Shape {
                shape: ShapeKind::Ellipse,
            } => ClipShape::Ellipse,
            NodeContent::Shape {
                shape: ShapeKind::Triangle,
            } => ClipShape::Triangle,
            _ => ClipShape::Bounds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_bounding_rect_unrotated() {
        let t = NodeTransform::new(10.0, 20.0, 100.0, 50.0);
        let r = t.bounding_rect();
        assert!(approx(r.x0, 10.0) && approx(r.y0, 20.0));
        assert!(approx(r.x1, 110.0) && approx(r.y1, 70.0));
    }

    #[test]
    fn test_bounding_rect_scaled_and_flipped() {
        let mut t = NodeTransform::new(0.0, 0.0, 100.0, 50.0);
        t.scale_x = 2.0;
        t.flip_x = true;
        let r = t.bounding_rect();
        // Flipping happens about the center, so the box does not move
        assert!(approx(r.x0, 0.0) && approx(r.x1, 200.0));
        assert!(approx(r.height(), 50.0));
    }

    #[test]
    fn test_bounding_rect_rotated_quarter_turn() {
        let mut t = NodeTransform::new(100.0, 100.0, 40.0, 20.0);
        t.angle = 90.0;
        let r = t.bounding_rect();
        // Rotating about the top-left corner swings the box to the left
        assert!(approx(r.x0, 80.0) && approx(r.x1, 100.0));
        assert!(approx(r.y0, 100.0) && approx(r.y1, 140.0));
    }

    #[test]
    fn test_blend_mode_names_round_trip() {
        for mode in BlendMode::ALL {
            assert_eq!(
                BlendMode::from_composite_operation(mode.composite_operation()),
                Some(mode)
            );
        }
        assert_eq!(BlendMode::from_composite_operation("xor"), None);
    }

    #[test]
    fn test_guide_is_helper() {
        let guide = SceneNode::guide(GuideOrientation::Vertical, 540.0, Size::new(1080.0, 720.0));
        assert!(guide.helper);
        assert!(!guide.selectable);
        assert_eq!(guide.transform.left, 540.0);
        assert_eq!(guide.transform.height, 720.0);
        assert_eq!(guide.paint.stroke_dash.as_deref(), Some(&[5.0, 5.0][..]));
    }

    #[test]
    fn test_clip_shape_from_content() {
        let ellipse = SceneNode::new(
            NodeContent::Shape {
                shape: ShapeKind::Ellipse,
            },
            NodeTransform::new(0.0, 0.0, 10.0, 10.0),
        );
        assert_eq!(ellipse.clip_shape(), ClipShape::Ellipse);
        let text = SceneNode::new(
            NodeContent::Text {
                text: "hi".into(),
                font_family: "Inter".into(),
                font_size: 12.0,
            },
            NodeTransform::new(0.0, 0.0, 10.0, 10.0),
        );
        assert_eq!(text.clip_shape(), ClipShape::Bounds);
    }
}
