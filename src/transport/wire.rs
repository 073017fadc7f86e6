//! Detection message parsing.
//!
//! The detector publishes one JSON document per inference frame:
//! `{ "frame_id", "timestamp", "fps", "animal_count", "animals": [...], "frame_size" }`.
//!
//! Parsing is strict about the schema: anything that does not describe a
//! coherent frame is rejected with an error so the caller can log and drop it.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use crate::frame::{BBox, DetectionFrame, FrameSize, TrackedEntity};

/// Frame message as published by the detector.
#[derive(Debug, Deserialize, Serialize)]
pub struct WireFrame {
    pub frame_id: u64,
    pub timestamp: f64,
    #[serde(default)]
    pub fps: f64,
    pub animal_count: usize,
    #[serde(default)]
    pub animals: Vec<WireAnimal>,
    /// `[width, height]` in detector pixels. Optional; zero counts as missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_size: Option<[f64; 2]>,
}

/// One entry of `animals`.
#[derive(Debug, Deserialize, Serialize)]
pub struct WireAnimal {
    pub track_id: u64,
    pub animal_id: String,
    pub class_name: String,
    pub bbox: [f64; 4],
    pub confidence: f64,
    #[serde(default)]
    pub re_id_confidence: f64,
    #[serde(default)]
    pub is_identified: bool,
    #[serde(default)]
    pub velocity: [f64; 2],
    #[serde(default)]
    pub direction: f64,
    #[serde(default)]
    pub health_score: Option<f64>,
    #[serde(default)]
    pub behavior: Option<String>,
}

/// Parse a detection message into a frame.
///
/// Returns an error if:
/// - The payload is not JSON or does not match the message shape
/// - `animal_count` disagrees with the number of `animals`
/// - A box coordinate is not finite
/// - A confidence or health score lies outside `[0, 1]`
pub fn parse_detection_message(payload: &[u8]) -> Result<DetectionFrame> {
    let wire: WireFrame =
        serde_json::from_slice(payload).map_err(|e| anyhow!("parse error: {}", e))?;
    wire.into_frame()
}

impl WireFrame {
    pub fn into_frame(self) -> Result<DetectionFrame> {
        if self.animal_count != self.animals.len() {
            bail!(
                "animal_count {} does not match {} animals",
                self.animal_count,
                self.animals.len()
            );
        }
        if !self.timestamp.is_finite() {
            bail!("timestamp is not finite");
        }
        let entities = self
            .animals
            .into_iter()
            .map(WireAnimal::into_entity)
            .collect::<Result<Vec<_>>>()?;
        let frame_size = self.frame_size.map(|[w, h]| FrameSize::new(w, h));
        Ok(DetectionFrame::new(
            self.frame_id,
            self.timestamp,
            self.fps,
            entities,
            frame_size,
        ))
    }

    pub fn from_frame(frame: &DetectionFrame) -> Self {
        Self {
            frame_id: frame.frame_id,
            timestamp: frame.timestamp,
            fps: frame.fps,
            animal_count: frame.animal_count(),
            animals: frame.entities.iter().map(WireAnimal::from_entity).collect(),
            frame_size: frame.frame_size.map(|size| [size.width, size.height]),
        }
    }
}

impl WireAnimal {
    fn into_entity(self) -> Result<TrackedEntity> {
        if self.bbox.iter().any(|v| !v.is_finite()) {
            bail!("track {}: bbox has non-finite coordinates", self.track_id);
        }
        check_unit("confidence", self.track_id, self.confidence)?;
        check_unit("re_id_confidence", self.track_id, self.re_id_confidence)?;
        if let Some(health) = self.health_score {
            check_unit("health_score", self.track_id, health)?;
        }
        Ok(TrackedEntity {
            track_id: self.track_id,
            entity_id: self.animal_id,
            class_name: self.class_name,
            bbox: BBox::from_array(self.bbox),
            confidence: self.confidence,
            identity_confidence: self.re_id_confidence,
            is_identified: self.is_identified,
            velocity: (self.velocity[0], self.velocity[1]),
            direction: self.direction,
            health_score: self.health_score,
            behavior: self.behavior,
        })
    }

    fn from_entity(entity: &TrackedEntity) -> Self {
        Self {
            track_id: entity.track_id,
            animal_id: entity.entity_id.clone(),
            class_name: entity.class_name.clone(),
            bbox: entity.bbox.to_array(),
            confidence: entity.confidence,
            re_id_confidence: entity.identity_confidence,
            is_identified: entity.is_identified,
            velocity: [entity.velocity.0, entity.velocity.1],
            direction: entity.direction,
            health_score: entity.health_score,
            behavior: entity.behavior.clone(),
        }
    }
}

fn check_unit(field: &str, track_id: u64, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        bail!("track {}: {} {} outside [0, 1]", track_id, field, value);
    }
    Ok(())
}

impl DetectionFrame {
    /// Serialise back into the detector's message format.
    pub fn to_wire_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&WireFrame::from_frame(self))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_MESSAGE: &str = r#"{
        "frame_id": 42,
        "timestamp": 1718000000.25,
        "fps": 14.5,
        "animal_count": 2,
        "animals": [
            {
                "track_id": 3,
                "animal_id": "BOV_0001",
                "class_name": "Cow",
                "bbox": [120, 150, 380, 420],
                "confidence": 0.91,
                "re_id_confidence": 0.88,
                "is_identified": true,
                "velocity": [1.5, -0.5],
                "direction": 341.0,
                "health_score": 0.97,
                "behavior": "grazing"
            },
            {
                "track_id": 9,
                "animal_id": "TEMP_0009",
                "class_name": "sheep",
                "bbox": [600.0, 300.0, 700.0, 380.0],
                "confidence": 0.64,
                "re_id_confidence": 0.2,
                "is_identified": false,
                "velocity": [0, 0],
                "direction": 0,
                "health_score": null,
                "behavior": null
            }
        ],
        "frame_size": [1280, 720]
    }"#;

    #[test]
    fn parse_full_message_succeeds() {
        let frame = parse_detection_message(FRAME_MESSAGE.as_bytes()).unwrap();
        assert_eq!(frame.frame_id, 42);
        assert_eq!(frame.animal_count(), 2);
        assert_eq!(frame.frame_size, Some(FrameSize::new(1280.0, 720.0)));

        let cow = frame.entity(3).unwrap();
        assert_eq!(cow.entity_id, "BOV_0001");
        assert_eq!(cow.bbox, BBox::new(120.0, 150.0, 380.0, 420.0));
        assert!((cow.identity_confidence - 0.88).abs() < 1e-9);
        assert_eq!(cow.behavior.as_deref(), Some("grazing"));

        let sheep = frame.entity(9).unwrap();
        assert!(sheep.is_provisional());
        assert!(sheep.health_score.is_none());
    }

    #[test]
    fn non_json_rejected() {
        let err = parse_detection_message(b"not json at all").unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }

    #[test]
    fn count_mismatch_rejected() {
        let payload = r#"{"frame_id": 1, "timestamp": 0.0, "fps": 1.0, "animal_count": 3, "animals": []}"#;
        let err = parse_detection_message(payload.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("animal_count"));
    }

    #[test]
    fn out_of_range_confidence_rejected() {
        let payload = r#"{"frame_id": 1, "timestamp": 0.0, "animal_count": 1, "animals": [
            {"track_id": 1, "animal_id": "A", "class_name": "cow", "bbox": [0,0,1,1], "confidence": 1.5}
        ]}"#;
        assert!(parse_detection_message(payload.as_bytes()).is_err());
    }

    #[test]
    fn missing_frame_size_left_for_transformer() {
        let payload = r#"{"frame_id": 5, "timestamp": 1.0, "fps": 2.0, "animal_count": 0, "animals": []}"#;
        let frame = parse_detection_message(payload.as_bytes()).unwrap();
        assert_eq!(frame.frame_size, None);
        assert!(frame.is_empty());
    }

    #[test]
    fn wrong_bbox_arity_rejected() {
        let payload = r#"{"frame_id": 1, "timestamp": 0.0, "animal_count": 1, "animals": [
            {"track_id": 1, "animal_id": "A", "class_name": "cow", "bbox": [0,0,1], "confidence": 0.5}
        ]}"#;
        assert!(parse_detection_message(payload.as_bytes()).is_err());
    }

    #[test]
    fn wire_json_parses_back() {
        let frame = parse_detection_message(FRAME_MESSAGE.as_bytes()).unwrap();
        let json = frame.to_wire_json().unwrap();
        assert_eq!(parse_detection_message(json.as_bytes()).unwrap(), frame);
    }
}
