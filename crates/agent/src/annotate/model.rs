//! Annotation events — one structured detection per record.

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Events older or newer than this window are rejected at the edge.
pub const TIMESTAMP_WINDOW_MS: i64 = 7 * 24 * 3600 * 1000;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BoundingBox {
    pub height: i32,
    pub width: i32,
    pub left: i32,
    pub top: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// One detection reported by a worker container.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct AnnotationEvent {
    pub device_name: String,
    /// Event type, e.g. `moving`, `person-detected`.
    #[serde(rename = "event_type")]
    pub event_type: String,
    /// Epoch ms.
    pub start_timestamp: i64,
    #[serde(default)]
    pub end_timestamp: i64,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object_mask: Vec<Coordinate>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ml_model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ml_model_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub object_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub object_signature: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub object_tracking_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub object_type: String,
    #[serde(default)]
    pub width: i32,
    #[serde(default)]
    pub height: i32,
    #[serde(default)]
    pub is_keyframe: bool,
    #[serde(default)]
    pub offset_timestamp: i64,
    #[serde(default)]
    pub offset_duration: i64,
    #[serde(default)]
    pub offset_frame_id: i64,
    #[serde(default)]
    pub offset_packet_id: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_stream_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub video_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_meta_1: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_meta_2: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_meta_3: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_meta_4: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_meta_5: String,
}

impl AnnotationEvent {
    /// Edge checks performed before enqueue; failures surface to the
    /// caller synchronously.
    pub fn validate(&self) -> Result<()> {
        if self.device_name.is_empty() || self.event_type.is_empty() {
            return Err(AgentError::Validation(
                "device_name and event_type are required".to_string(),
            ));
        }
        let now = chrono::Utc::now().timestamp_millis();
        if (self.start_timestamp - now).abs() > TIMESTAMP_WINDOW_MS {
            return Err(AgentError::Validation(format!(
                "start_timestamp {} outside the ±7 day window",
                self.start_timestamp
            )));
        }
        Ok(())
    }
}

/// The HTTP batch body.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AnnotationList {
    pub data: Vec<AnnotationEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> AnnotationEvent {
        AnnotationEvent {
            device_name: "cam1".to_string(),
            event_type: "moving".to_string(),
            start_timestamp: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        }
    }

    #[test]
    fn valid_event_passes() {
        assert!(event().validate().is_ok());
    }

    #[test]
    fn missing_device_or_type_rejected() {
        let mut e = event();
        e.device_name.clear();
        assert!(e.validate().is_err());

        let mut e = event();
        e.event_type.clear();
        assert!(e.validate().is_err());
    }

    #[test]
    fn timestamp_window_enforced_both_directions() {
        let now = chrono::Utc::now().timestamp_millis();

        let mut old = event();
        old.start_timestamp = now - TIMESTAMP_WINDOW_MS - 1000;
        assert!(old.validate().is_err());

        let mut future = event();
        future.start_timestamp = now + TIMESTAMP_WINDOW_MS + 1000;
        assert!(future.validate().is_err());

        let mut edge = event();
        edge.start_timestamp = now - TIMESTAMP_WINDOW_MS + 60_000;
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn roundtrip_preserves_optional_blocks() {
        let mut e = event();
        e.object_bounding_box = Some(BoundingBox {
            height: 10,
            width: 20,
            left: 1,
            top: 2,
        });
        e.object_mask = vec![Coordinate { x: 1.0, y: 2.0, z: 0.0 }];
        e.location = Some(Location { lat: 46.0, lon: 14.5 });

        let bytes = serde_json::to_vec(&e).unwrap();
        let back: AnnotationEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, e);
    }
}
