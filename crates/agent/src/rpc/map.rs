//! Pure conversion functions for the RPC surface.
//!
//! Protobuf ↔ internal type mapping, error classification and the RTMP
//! key extraction used by the storage toggle.

use tonic::Status;

use crate::annotate::model::{AnnotationEvent, BoundingBox, Coordinate, Location};
use crate::error::AgentError;
use crate::framebus::FrameRecord;
use crate::process::model::CameraProcess;
use crate::rpc::proto;

/// Map an [`AgentError`] to the appropriate [`tonic::Status`].
///
/// Mapping rules:
/// - `Validation` → `INVALID_ARGUMENT`
/// - `NotFound` / `NotFoundStored` → `NOT_FOUND`
/// - `Conflict` → `ALREADY_EXISTS`
/// - `Permission` → `PERMISSION_DENIED`
/// - Everything else → `INTERNAL`
pub fn map_agent_error(err: AgentError) -> Status {
    match &err {
        AgentError::Validation(reason) => Status::invalid_argument(reason.clone()),
        AgentError::NotFound(name) => Status::not_found(format!("process not found: {}", name)),
        AgentError::NotFoundStored(name) => {
            Status::not_found(format!("process not found in datastore: {}", name))
        }
        AgentError::Conflict(name) => Status::already_exists(format!("conflict: {}", name)),
        AgentError::Permission => Status::permission_denied("permission denied by cloud"),
        _ => Status::internal(format!("{}", err)),
    }
}

/// Convert a stored process row into the stream listing record.
pub fn convert_process(process: &CameraProcess) -> proto::ListStream {
    let state = process.state.clone().unwrap_or_default();
    proto::ListStream {
        name: process.name.clone(),
        status: process.status.as_str().to_string(),
        running: state.running,
        paused: state.paused,
        restarting: state.restarting,
        oomkilled: state.oom_killed,
        dead: state.dead,
        pid: state.pid,
        exit_code: state.exit_code,
        error: state.error.unwrap_or_default(),
        failing_streak: state.failing_streak.unwrap_or(0),
        health_status: state.health_status.unwrap_or_default(),
    }
}

/// Convert a frame record into the wire frame.
pub fn convert_frame(record: FrameRecord) -> proto::VideoFrame {
    let timestamp = record.timestamp_ms().unwrap_or(0);
    proto::VideoFrame {
        id: record.id,
        data: record.payload.to_vec(),
        timestamp,
    }
}

/// Convert the annotation request into the internal event.
pub fn convert_annotation(req: proto::AnnotateRequest) -> AnnotationEvent {
    AnnotationEvent {
        device_name: req.device_name,
        event_type: req.r#type,
        start_timestamp: req.start_timestamp,
        end_timestamp: req.end_timestamp,
        confidence: req.confidence,
        location: req.location.map(|l| Location { lat: l.lat, lon: l.lon }),
        object_bounding_box: req.object_bouding_box.map(|b| BoundingBox {
            height: b.height,
            width: b.width,
            left: b.left,
            top: b.top,
        }),
        object_mask: req
            .mask
            .into_iter()
            .map(|m| Coordinate { x: m.x, y: m.y, z: m.z })
            .collect(),
        ml_model: req.ml_model,
        ml_model_version: req.ml_model_version,
        object_id: req.object_id,
        object_signature: req.object_signature,
        object_tracking_id: req.object_tracking_id,
        object_type: req.object_type,
        width: req.width,
        height: req.height,
        is_keyframe: req.is_keyframe,
        offset_timestamp: req.offset_timestamp,
        offset_duration: req.offset_duration,
        offset_frame_id: req.offset_frame_id,
        offset_packet_id: req.offset_packet_id,
        remote_stream_id: req.remote_stream_id,
        video_type: req.video_type,
        custom_meta_1: req.custom_meta_1,
        custom_meta_2: req.custom_meta_2,
        custom_meta_3: req.custom_meta_3,
        custom_meta_4: req.custom_meta_4,
        custom_meta_5: req.custom_meta_5,
    }
}

/// Extract the streaming key from a full RTMP url.
pub fn parse_rtmp_key(rtmp_url: &str) -> Result<String, AgentError> {
    let url = reqwest::Url::parse(rtmp_url)
        .map_err(|e| AgentError::Validation(format!("bad rtmp url: {}", e)))?;
    if url.scheme() != "rtmp" {
        return Err(AgentError::Validation(format!(
            "expected rtmp scheme, got {}",
            url.scheme()
        )));
    }
    url.path_segments()
        .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
        .filter(|key| !key.is_empty())
        .ok_or_else(|| AgentError::Validation("failed to parse rtmp key".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn error_mapping_codes() {
        assert_eq!(
            map_agent_error(AgentError::Validation("x".to_string())).code(),
            tonic::Code::InvalidArgument
        );
        assert_eq!(
            map_agent_error(AgentError::NotFound("x".to_string())).code(),
            tonic::Code::NotFound
        );
        assert_eq!(
            map_agent_error(AgentError::NotFoundStored("x".to_string())).code(),
            tonic::Code::NotFound
        );
        assert_eq!(
            map_agent_error(AgentError::Conflict("x".to_string())).code(),
            tonic::Code::AlreadyExists
        );
        assert_eq!(
            map_agent_error(AgentError::Permission).code(),
            tonic::Code::PermissionDenied
        );
        assert_eq!(
            map_agent_error(AgentError::Transient("x".to_string())).code(),
            tonic::Code::Internal
        );
    }

    #[test]
    fn frame_conversion_carries_id_and_timestamp() {
        let frame = convert_frame(FrameRecord {
            id: "1700000000123-0".to_string(),
            payload: Bytes::from_static(b"jpeg"),
        });
        assert_eq!(frame.timestamp, 1700000000123);
        assert_eq!(frame.data, b"jpeg");
    }

    #[test]
    fn annotation_conversion_keeps_required_fields() {
        let req = proto::AnnotateRequest {
            device_name: "cam1".to_string(),
            r#type: "moving".to_string(),
            start_timestamp: 42,
            object_bouding_box: Some(proto::BoundingBox {
                top: 1,
                left: 2,
                width: 3,
                height: 4,
            }),
            mask: vec![proto::Coordinate { x: 1.0, y: 2.0, z: 3.0 }],
            ..Default::default()
        };
        let event = convert_annotation(req);
        assert_eq!(event.device_name, "cam1");
        assert_eq!(event.event_type, "moving");
        assert_eq!(event.start_timestamp, 42);
        assert_eq!(event.object_bounding_box.unwrap().width, 3);
        assert_eq!(event.object_mask.len(), 1);
    }

    #[test]
    fn rtmp_key_is_last_path_segment() {
        assert_eq!(
            parse_rtmp_key("rtmp://host/live/streamkey123").unwrap(),
            "streamkey123"
        );
    }

    #[test]
    fn rtmp_key_rejects_other_schemes() {
        assert!(parse_rtmp_key("http://host/live/key").is_err());
        assert!(parse_rtmp_key("not a url").is_err());
    }
}
