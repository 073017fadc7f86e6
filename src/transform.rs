//! Detector space to renderer space.
//!
//! Two pure mappings:
//! - viewport percentages, used by the live overlay which is laid out relative
//!   to its container,
//! - canvas pixels, used when burning the overlay into a pixel buffer.
//!
//! Neither mapping knows about letterboxing; fitting the video into its
//! container is the caller's concern.

use serde::Serialize;

use crate::frame::{BBox, FrameSize, DEFAULT_FRAME_SIZE};

/// Box position relative to the rendering container, in percent.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ViewportRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl ViewportRect {
    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Absolute pixel rectangle for a container of the given size.
    pub fn to_pixels(&self, container: FrameSize) -> CanvasRect {
        CanvasRect {
            x: self.left / 100.0 * container.width,
            y: self.top / 100.0 * container.height,
            width: self.width / 100.0 * container.width,
            height: self.height / 100.0 * container.height,
        }
    }
}

/// Box position in pixels of a target buffer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CanvasRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Maps boxes using a default frame size for frames that do not carry one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CoordinateTransformer {
    default_frame_size: FrameSize,
}

impl CoordinateTransformer {
    /// `default_frame_size` must itself be valid; an invalid value is replaced
    /// by the crate default.
    pub fn new(default_frame_size: FrameSize) -> Self {
        Self {
            default_frame_size: default_frame_size.or(DEFAULT_FRAME_SIZE),
        }
    }

    pub fn default_frame_size(&self) -> FrameSize {
        self.default_frame_size
    }

    fn denominator(&self, frame_size: Option<FrameSize>) -> FrameSize {
        frame_size
            .unwrap_or(self.default_frame_size)
            .or(self.default_frame_size)
    }

    pub fn to_viewport_percent(&self, bbox: &BBox, frame_size: Option<FrameSize>) -> ViewportRect {
        let frame = self.denominator(frame_size);
        ViewportRect {
            left: bbox.x1 / frame.width * 100.0,
            top: bbox.y1 / frame.height * 100.0,
            width: (bbox.x2 - bbox.x1) / frame.width * 100.0,
            height: (bbox.y2 - bbox.y1) / frame.height * 100.0,
        }
    }

    /// Scale each axis independently by `canvas / frame`.
    pub fn to_canvas_pixels(
        &self,
        bbox: &BBox,
        frame_size: Option<FrameSize>,
        canvas_size: FrameSize,
    ) -> CanvasRect {
        let frame = self.denominator(frame_size);
        let sx = canvas_size.width / frame.width;
        let sy = canvas_size.height / frame.height;
        CanvasRect {
            x: bbox.x1 * sx,
            y: bbox.y1 * sy,
            width: (bbox.x2 - bbox.x1) * sx,
            height: (bbox.y2 - bbox.y1) * sy,
        }
    }
}

impl Default for CoordinateTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_SIZE)
    }
}

/// `to_viewport_percent` with the crate default frame size.
pub fn to_viewport_percent(bbox: &BBox, frame_size: Option<FrameSize>) -> ViewportRect {
    CoordinateTransformer::default().to_viewport_percent(bbox, frame_size)
}

/// `to_canvas_pixels` with the crate default frame size.
pub fn to_canvas_pixels(
    bbox: &BBox,
    frame_size: Option<FrameSize>,
    canvas_size: FrameSize,
) -> CanvasRect {
    CoordinateTransformer::default().to_canvas_pixels(bbox, frame_size, canvas_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < EPS
    }

    #[test]
    fn viewport_percent_matches_reference_box() {
        let rect = to_viewport_percent(
            &BBox::new(120.0, 150.0, 380.0, 420.0),
            Some(FrameSize::new(1280.0, 720.0)),
        );
        assert!(close(rect.left, 9.375));
        assert!(close(rect.top, 20.833333333333332));
        assert!(close(rect.width, 20.3125));
        assert!(close(rect.height, 37.5));
    }

    #[test]
    fn viewport_percent_follows_formula_over_grid() {
        let sizes = [(640.0, 480.0), (1920.0, 1080.0), (333.0, 77.0)];
        for &(w, h) in &sizes {
            for step in 0..20 {
                let x1 = step as f64 * 7.5;
                let y1 = step as f64 * 3.25;
                let bbox = BBox::new(x1, y1, x1 + 40.0, y1 + 25.0);
                let rect = to_viewport_percent(&bbox, Some(FrameSize::new(w, h)));
                assert!(close(rect.left, x1 / w * 100.0));
                assert!(close(rect.top, y1 / h * 100.0));
                assert!(close(rect.width, 40.0 / w * 100.0));
                assert!(close(rect.height, 25.0 / h * 100.0));
            }
        }
    }

    #[test]
    fn viewport_percent_is_continuous() {
        let size = Some(FrameSize::new(1280.0, 720.0));
        let base = BBox::new(100.0, 100.0, 200.0, 200.0);
        let delta = 1e-6;
        let nudged = BBox::new(
            base.x1 + delta,
            base.y1 + delta,
            base.x2 + delta,
            base.y2 + delta,
        );
        let a = to_viewport_percent(&base, size);
        let b = to_viewport_percent(&nudged, size);
        assert!((a.left - b.left).abs() < 1e-6);
        assert!((a.top - b.top).abs() < 1e-6);
        assert!((a.width - b.width).abs() < 1e-6);
        assert!((a.height - b.height).abs() < 1e-6);
    }

    #[test]
    fn zero_frame_size_falls_back_to_default() {
        let bbox = BBox::new(128.0, 72.0, 256.0, 144.0);
        let rect = to_viewport_percent(&bbox, Some(FrameSize::new(0.0, 0.0)));
        assert!(close(rect.left, 10.0));
        assert!(close(rect.top, 10.0));
        assert!(rect.width.is_finite() && rect.height.is_finite());
    }

    #[test]
    fn canvas_pixels_scale_axes_independently() {
        let rect = to_canvas_pixels(
            &BBox::new(100.0, 100.0, 200.0, 300.0),
            Some(FrameSize::new(1000.0, 1000.0)),
            FrameSize::new(2000.0, 500.0),
        );
        assert!(close(rect.x, 200.0));
        assert!(close(rect.y, 50.0));
        assert!(close(rect.width, 200.0));
        assert!(close(rect.height, 100.0));
    }

    #[test]
    fn same_input_same_output() {
        let t = CoordinateTransformer::new(FrameSize::new(640.0, 480.0));
        let bbox = BBox::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(
            t.to_viewport_percent(&bbox, None),
            t.to_viewport_percent(&bbox, None)
        );
    }

    #[test]
    fn viewport_rect_converts_to_container_pixels() {
        let rect = ViewportRect {
            left: 10.0,
            top: 20.0,
            width: 50.0,
            height: 25.0,
        };
        let px = rect.to_pixels(FrameSize::new(800.0, 400.0));
        assert!(close(px.x, 80.0));
        assert!(close(px.y, 80.0));
        assert!(close(px.width, 400.0));
        assert!(close(px.height, 100.0));
    }
}
