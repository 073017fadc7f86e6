//! Live overlay layout.
//!
//! Turns the latest `DetectionFrame` into one positioned element per tracked
//! entity: box outline, four corner markers, an identity label above the box
//! and a class/confidence label below it. Positions are viewport percentages
//! so the overlay follows the video container at any display size.
//!
//! Every render replaces the previous element set; nothing is carried over
//! from earlier frames.

use serde::Serialize;
use std::fmt;

use crate::frame::{DetectionFrame, FrameSize, TrackedEntity};
use crate::transform::{CanvasRect, CoordinateTransformer, ViewportRect};

/// Appended to the class label once the identity is confirmed upstream.
pub const IDENTIFIED_MARK: &str = "✓";

/// Length of a corner marker arm, as a fraction of the shorter box side.
const CORNER_FRACTION: f64 = 0.2;

// ----------------------------------------------------------------------------
// Colors
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn to_rgba(self, alpha: u8) -> image::Rgba<u8> {
        image::Rgba([self.r, self.g, self.b, alpha])
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Color for classes missing from the table.
pub const DEFAULT_CLASS_COLOR: Color = Color::rgb(0x3b, 0x82, 0xf6);

/// Display color for a class label. Case-insensitive and total.
pub fn class_color(class_name: &str) -> Color {
    match class_name.trim().to_lowercase().as_str() {
        "cow" | "cattle" | "bovine" | "bull" | "calf" => Color::rgb(0x22, 0xc5, 0x5e),
        "sheep" | "lamb" | "ovine" => Color::rgb(0xf5, 0x9e, 0x0b),
        "goat" | "caprine" => Color::rgb(0xa8, 0x55, 0xf7),
        "pig" | "swine" | "hog" => Color::rgb(0xec, 0x48, 0x99),
        "horse" | "equine" | "pony" => Color::rgb(0x8b, 0x5c, 0xf6),
        "chicken" | "hen" | "poultry" => Color::rgb(0xea, 0xb3, 0x08),
        "dog" => Color::rgb(0x06, 0xb6, 0xd4),
        "person" => Color::rgb(0xef, 0x44, 0x44),
        _ => DEFAULT_CLASS_COLOR,
    }
}

// ----------------------------------------------------------------------------
// Elements
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayToggles {
    pub show_boxes: bool,
    pub show_labels: bool,
}

impl Default for OverlayToggles {
    fn default() -> Self {
        Self {
            show_boxes: true,
            show_labels: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelPlacement {
    Above,
    Below,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverlayLabel {
    pub text: String,
    pub placement: LabelPlacement,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

/// L-shaped marker anchored at one corner of the box, in viewport percent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CornerMarker {
    pub corner: Corner,
    pub left: f64,
    pub top: f64,
    pub arm_width: f64,
    pub arm_height: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverlayElement {
    /// Render key.
    pub track_id: u64,
    pub color: Color,
    pub rect: ViewportRect,
    /// Box outline visible.
    pub outline: bool,
    pub corners: Vec<CornerMarker>,
    pub identity_label: Option<OverlayLabel>,
    pub class_label: Option<OverlayLabel>,
}

impl OverlayElement {
    /// Absolute position inside a container (usually the displayed video).
    pub fn pixel_rect(&self, container: FrameSize) -> CanvasRect {
        self.rect.to_pixels(container)
    }
}

pub fn identity_label_text(entity: &TrackedEntity) -> String {
    entity.entity_id.clone()
}

/// `"<class> • <confidence>%"`, plus the identified mark.
pub fn class_label_text(entity: &TrackedEntity) -> String {
    let mut text = format!(
        "{} • {:.0}%",
        entity.class_name,
        (entity.confidence * 100.0).round()
    );
    if entity.is_identified {
        text.push(' ');
        text.push_str(IDENTIFIED_MARK);
    }
    text
}

fn corner_markers(rect: &ViewportRect) -> Vec<CornerMarker> {
    let arm = rect.width.min(rect.height) * CORNER_FRACTION;
    let at = |corner, left, top| CornerMarker {
        corner,
        left,
        top,
        arm_width: arm,
        arm_height: arm,
    };
    vec![
        at(Corner::TopLeft, rect.left, rect.top),
        at(Corner::TopRight, rect.right() - arm, rect.top),
        at(Corner::BottomLeft, rect.left, rect.bottom() - arm),
        at(Corner::BottomRight, rect.right() - arm, rect.bottom() - arm),
    ]
}

// ----------------------------------------------------------------------------
// Renderer
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct OverlayRenderer {
    transformer: CoordinateTransformer,
    toggles: OverlayToggles,
    elements: Vec<OverlayElement>,
    frame_id: Option<u64>,
}

impl OverlayRenderer {
    pub fn new(transformer: CoordinateTransformer, toggles: OverlayToggles) -> Self {
        Self {
            transformer,
            toggles,
            elements: Vec::new(),
            frame_id: None,
        }
    }

    pub fn toggles(&self) -> OverlayToggles {
        self.toggles
    }

    /// Takes effect on the next `render`.
    pub fn set_toggles(&mut self, toggles: OverlayToggles) {
        self.toggles = toggles;
    }

    pub fn elements(&self) -> &[OverlayElement] {
        &self.elements
    }

    /// Frame the current elements were built from.
    pub fn frame_id(&self) -> Option<u64> {
        self.frame_id
    }

    pub fn clear(&mut self) {
        self.elements.clear();
        self.frame_id = None;
    }

    /// Replace the element set with one element per renderable entity of
    /// `frame`. `None` or an empty frame clears the overlay.
    pub fn render(&mut self, frame: Option<&DetectionFrame>) -> &[OverlayElement] {
        self.elements.clear();
        self.frame_id = frame.map(|f| f.frame_id);
        let Some(frame) = frame else {
            return &self.elements;
        };
        if !self.toggles.show_boxes && !self.toggles.show_labels {
            return &self.elements;
        }

        for entity in &frame.entities {
            if !entity.bbox.is_well_formed() {
                log::debug!(
                    "frame {}: skipping track {} with malformed bbox {:?}",
                    frame.frame_id,
                    entity.track_id,
                    entity.bbox
                );
                continue;
            }
            let rect = self
                .transformer
                .to_viewport_percent(&entity.bbox, frame.frame_size);
            let show_labels = self.toggles.show_labels;
            self.elements.push(OverlayElement {
                track_id: entity.track_id,
                color: class_color(&entity.class_name),
                rect,
                outline: self.toggles.show_boxes,
                corners: if self.toggles.show_boxes {
                    corner_markers(&rect)
                } else {
                    Vec::new()
                },
                identity_label: show_labels.then(|| OverlayLabel {
                    text: identity_label_text(entity),
                    placement: LabelPlacement::Above,
                }),
                class_label: show_labels.then(|| OverlayLabel {
                    text: class_label_text(entity),
                    placement: LabelPlacement::Below,
                }),
            });
        }
        &self.elements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::entity;
    use crate::frame::BBox;

    fn frame(id: u64, tracks: &[u64]) -> DetectionFrame {
        let entities = tracks
            .iter()
            .map(|&t| entity(t, "cow", [10.0 * t as f64, 10.0, 10.0 * t as f64 + 50.0, 60.0]))
            .collect();
        DetectionFrame::new(id, 0.0, 10.0, entities, Some(FrameSize::new(1280.0, 720.0)))
    }

    #[test]
    fn colors_are_case_insensitive_and_total() {
        assert_eq!(class_color("COW"), class_color("cow"));
        assert_eq!(class_color("  Sheep "), class_color("sheep"));
        assert_eq!(class_color("yak"), DEFAULT_CLASS_COLOR);
        assert_eq!(class_color(""), DEFAULT_CLASS_COLOR);
        assert_eq!(class_color("cow").to_hex(), "#22c55e");
    }

    #[test]
    fn new_frame_replaces_previous_elements() {
        let mut renderer = OverlayRenderer::default();
        renderer.render(Some(&frame(1, &[1, 2])));
        let keys: Vec<u64> = renderer
            .render(Some(&frame(2, &[2, 3])))
            .iter()
            .map(|e| e.track_id)
            .collect();
        assert_eq!(keys, vec![2, 3]);
        assert_eq!(renderer.frame_id(), Some(2));
    }

    #[test]
    fn empty_frame_renders_nothing() {
        let mut renderer = OverlayRenderer::default();
        assert!(renderer.render(Some(&frame(1, &[]))).is_empty());
        assert!(renderer.render(None).is_empty());
    }

    #[test]
    fn labels_follow_toggle() {
        let mut renderer = OverlayRenderer::default();
        let elements = renderer.render(Some(&frame(1, &[4])));
        let element = &elements[0];
        assert_eq!(element.identity_label.as_ref().unwrap().text, "BOV_0004");
        assert_eq!(
            element.identity_label.as_ref().unwrap().placement,
            LabelPlacement::Above
        );
        assert_eq!(element.class_label.as_ref().unwrap().text, "cow • 90% ✓");
        assert_eq!(element.corners.len(), 4);

        renderer.set_toggles(OverlayToggles {
            show_boxes: true,
            show_labels: false,
        });
        let element = &renderer.render(Some(&frame(2, &[4])))[0];
        assert!(element.identity_label.is_none());
        assert!(element.class_label.is_none());
        assert!(element.outline);
    }

    #[test]
    fn labels_without_boxes_drop_outline() {
        let mut renderer = OverlayRenderer::new(
            CoordinateTransformer::default(),
            OverlayToggles {
                show_boxes: false,
                show_labels: true,
            },
        );
        let element = &renderer.render(Some(&frame(1, &[1])))[0];
        assert!(!element.outline);
        assert!(element.corners.is_empty());
        assert!(element.class_label.is_some());
    }

    #[test]
    fn unidentified_label_has_no_mark() {
        let mut e = entity(9, "Goat", [0.0, 0.0, 10.0, 10.0]);
        e.is_identified = false;
        e.confidence = 0.456;
        assert_eq!(class_label_text(&e), "Goat • 46%");
    }

    #[test]
    fn malformed_boxes_are_skipped() {
        let mut bad = frame(1, &[1, 2]);
        bad.entities[0].bbox = BBox::new(50.0, 50.0, 10.0, 10.0);
        let mut renderer = OverlayRenderer::default();
        let keys: Vec<u64> = renderer
            .render(Some(&bad))
            .iter()
            .map(|e| e.track_id)
            .collect();
        assert_eq!(keys, vec![2]);
    }

    #[test]
    fn corner_markers_sit_inside_box() {
        let mut renderer = OverlayRenderer::default();
        let element = &renderer.render(Some(&frame(1, &[2])))[0];
        for marker in &element.corners {
            assert!(marker.left >= element.rect.left - 1e-9);
            assert!(marker.top >= element.rect.top - 1e-9);
            assert!(marker.left + marker.arm_width <= element.rect.right() + 1e-9);
            assert!(marker.top + marker.arm_height <= element.rect.bottom() + 1e-9);
        }
    }
}
