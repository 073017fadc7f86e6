//! Detection frame model.
//!
//! A `DetectionFrame` is one inference result published by the upstream
//! detector: a set of tracked entities with boxes expressed in detector pixel
//! space, plus the frame size those boxes are relative to.
//!
//! Frames are immutable values. The session holds at most one ("the latest")
//! and replaces it wholesale when the next one arrives; entities are never
//! patched in place, so consumers must not assume continuity beyond `track_id`.

use serde::{Deserialize, Serialize};

/// Built-in frame size assumed when a message omits `frame_size` and no
/// other default is configured.
pub const DEFAULT_FRAME_SIZE: FrameSize = FrameSize {
    width: 1280.0,
    height: 720.0,
};

/// Placeholder prefix carried by identities that are not yet confirmed.
pub const PROVISIONAL_ID_PREFIX: &str = "TEMP_";

// ----------------------------------------------------------------------------
// Geometry
// ----------------------------------------------------------------------------

/// Width/height pair in pixels of some coordinate space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: f64,
    pub height: f64,
}

impl FrameSize {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// True when both axes are finite and strictly positive, i.e. usable as a
    /// normalization denominator.
    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    /// Returns `self` when valid, otherwise `fallback`.
    pub fn or(self, fallback: FrameSize) -> FrameSize {
        if self.is_valid() {
            self
        } else {
            fallback
        }
    }
}

impl Default for FrameSize {
    fn default() -> Self {
        DEFAULT_FRAME_SIZE
    }
}

/// Axis-aligned box `[x1, y1, x2, y2]` in detector pixel space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn from_array(raw: [f64; 4]) -> Self {
        Self::new(raw[0], raw[1], raw[2], raw[3])
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Rendering assumes finite coordinates with `x1 < x2` and `y1 < y2`.
    /// The transport does not enforce this, so renderers check it.
    pub fn is_well_formed(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite()) && self.x1 < self.x2 && self.y1 < self.y2
    }

    /// Translate by `(dx, dy)` and keep the box inside `bounds`.
    pub fn shifted_within(&self, dx: f64, dy: f64, bounds: FrameSize) -> Self {
        let dx = clamp_offset(dx, -self.x1, bounds.width - self.x2);
        let dy = clamp_offset(dy, -self.y1, bounds.height - self.y2);
        Self::new(self.x1 + dx, self.y1 + dy, self.x2 + dx, self.y2 + dy)
    }
}

// f64::clamp panics on an empty range, which happens for boxes larger than the bounds.
fn clamp_offset(value: f64, min: f64, max: f64) -> f64 {
    if min > max {
        0.0
    } else {
        value.clamp(min, max)
    }
}

// ----------------------------------------------------------------------------
// Entities and frames
// ----------------------------------------------------------------------------

/// One tracked subject inside a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedEntity {
    /// Stable for the lifetime of a track within a session. Used as render key.
    pub track_id: u64,
    /// Identity label such as `BOV_0001`. May start as `TEMP_...`.
    pub entity_id: String,
    /// Free-text species/category label.
    pub class_name: String,
    pub bbox: BBox,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f64,
    /// Re-identification confidence in `[0, 1]`.
    pub identity_confidence: f64,
    /// Mirrors the upstream flag; the threshold is the detector's business.
    pub is_identified: bool,
    pub velocity: (f64, f64),
    /// Heading in degrees.
    pub direction: f64,
    pub health_score: Option<f64>,
    pub behavior: Option<String>,
}

impl TrackedEntity {
    /// True while the identity is still a placeholder assigned by the tracker.
    pub fn is_provisional(&self) -> bool {
        self.entity_id.starts_with(PROVISIONAL_ID_PREFIX)
    }

    pub fn speed(&self) -> f64 {
        self.velocity.0.hypot(self.velocity.1)
    }
}

/// One inference result.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionFrame {
    pub frame_id: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    /// Upstream throughput estimate.
    pub fps: f64,
    pub entities: Vec<TrackedEntity>,
    /// Detector frame size the boxes are relative to. `None` when the message
    /// omitted it or reported an unusable size; the transformer then applies
    /// its configured default.
    pub frame_size: Option<FrameSize>,
}

impl DetectionFrame {
    /// Build a frame. An unusable `frame_size` is dropped to `None`.
    pub fn new(
        frame_id: u64,
        timestamp: f64,
        fps: f64,
        entities: Vec<TrackedEntity>,
        frame_size: Option<FrameSize>,
    ) -> Self {
        Self {
            frame_id,
            timestamp,
            fps: if fps.is_finite() { fps.max(0.0) } else { 0.0 },
            entities,
            frame_size: frame_size.filter(FrameSize::is_valid),
        }
    }

    /// Frame size to normalize against, `default` when none was reported.
    pub fn frame_size_or(&self, default: FrameSize) -> FrameSize {
        self.frame_size.unwrap_or(default)
    }

    /// Number of animals in this frame. Equal to `entities.len()` by construction.
    pub fn animal_count(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, track_id: u64) -> Option<&TrackedEntity> {
        self.entities.iter().find(|e| e.track_id == track_id)
    }

    pub fn track_ids(&self) -> Vec<u64> {
        self.entities.iter().map(|e| e.track_id).collect()
    }

    pub fn identified_count(&self) -> usize {
        self.entities.iter().filter(|e| e.is_identified).count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn entity(track_id: u64, class_name: &str, bbox: [f64; 4]) -> TrackedEntity {
        TrackedEntity {
            track_id,
            entity_id: format!("BOV_{:04}", track_id),
            class_name: class_name.to_string(),
            bbox: BBox::from_array(bbox),
            confidence: 0.9,
            identity_confidence: 0.8,
            is_identified: true,
            velocity: (0.0, 0.0),
            direction: 0.0,
            health_score: None,
            behavior: None,
        }
    }

    #[test]
    fn missing_frame_size_stays_unresolved() {
        let frame = DetectionFrame::new(1, 0.0, 10.0, vec![], None);
        assert_eq!(frame.frame_size, None);
        assert_eq!(frame.frame_size_or(FrameSize::new(640.0, 480.0)), FrameSize::new(640.0, 480.0));
    }

    #[test]
    fn zero_frame_size_is_dropped() {
        let frame = DetectionFrame::new(1, 0.0, 10.0, vec![], Some(FrameSize::new(0.0, 720.0)));
        assert_eq!(frame.frame_size, None);
        assert_eq!(frame.frame_size_or(DEFAULT_FRAME_SIZE), DEFAULT_FRAME_SIZE);
    }

    #[test]
    fn animal_count_tracks_entities() {
        let frame = DetectionFrame::new(
            7,
            0.0,
            12.0,
            vec![
                entity(1, "cow", [0.0, 0.0, 10.0, 10.0]),
                entity(2, "sheep", [5.0, 5.0, 20.0, 20.0]),
            ],
            Some(FrameSize::new(640.0, 480.0)),
        );
        assert_eq!(frame.animal_count(), 2);
        assert_eq!(frame.track_ids(), vec![1, 2]);
    }

    #[test]
    fn inverted_box_is_not_well_formed() {
        assert!(BBox::new(10.0, 10.0, 20.0, 20.0).is_well_formed());
        assert!(!BBox::new(20.0, 10.0, 10.0, 20.0).is_well_formed());
        assert!(!BBox::new(0.0, f64::NAN, 10.0, 20.0).is_well_formed());
    }

    #[test]
    fn shifted_box_stays_in_bounds() {
        let bounds = FrameSize::new(100.0, 100.0);
        let moved = BBox::new(80.0, 0.0, 95.0, 10.0).shifted_within(20.0, -5.0, bounds);
        assert_eq!(moved, BBox::new(85.0, 0.0, 100.0, 10.0));
    }

    #[test]
    fn provisional_identity_detected() {
        let mut e = entity(3, "goat", [0.0, 0.0, 1.0, 1.0]);
        assert!(!e.is_provisional());
        e.entity_id = "TEMP_0003".to_string();
        assert!(e.is_provisional());
    }
}
