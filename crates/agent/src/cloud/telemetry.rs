//! Telemetry envelope — the JSON record shipped cloud-ward and carried on
//! the local event bus.

use serde::{Deserialize, Serialize};

/// Hard cap on a published envelope; the broker rejects larger payloads.
pub const MAX_TELEMETRY_BYTES: usize = 256 * 1024;

/// Which kind of process an envelope talks about.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessType {
    Camera,
    Application,
    Stats,
    Unknown,
}

/// What happened. Operation + type determines the cloud topic routing.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessOperation {
    Add,
    Remove,
    State,
    Stats,
    CheckIn,
    UpgradeAvailable,
    Upgrade,
    Error,
    /// Test-only: triggers a synthetic `restarting` state report.
    InternalTest,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TelemetryEnvelope {
    #[serde(rename = "deviceId", default)]
    pub device_id: String,
    /// Creation time, epoch milliseconds.
    #[serde(default)]
    pub created: i64,
    #[serde(rename = "imageTag", default)]
    pub image_tag: String,
    #[serde(rename = "rtspConnection", default, skip_serializing_if = "Option::is_none")]
    pub rtsp_connection: Option<String>,
    #[serde(rename = "rtmpEndpoint", default, skip_serializing_if = "Option::is_none")]
    pub rtmp_endpoint: Option<String>,
    #[serde(rename = "operation")]
    pub operation: ProcessOperation,
    #[serde(rename = "type")]
    pub process_type: ProcessType,
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Free-form payload (e.g. the stats report). Capped at 256 KiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl TelemetryEnvelope {
    pub fn new(operation: ProcessOperation, process_type: ProcessType) -> Self {
        TelemetryEnvelope {
            device_id: String::new(),
            created: chrono::Utc::now().timestamp_millis(),
            image_tag: String::new(),
            rtsp_connection: None,
            rtmp_endpoint: None,
            operation,
            process_type,
            state: String::new(),
            message: None,
            payload: None,
        }
    }

    pub fn with_device(mut self, device_id: &str) -> Self {
        self.device_id = device_id.to_string();
        self
    }

    pub fn with_state(mut self, state: &str) -> Self {
        self.state = state.to_string();
        self
    }

    /// Serialize, dropping the payload if the envelope would exceed the
    /// 256 KiB broker limit.
    pub fn to_bytes_capped(&self) -> serde_json::Result<Vec<u8>> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() <= MAX_TELEMETRY_BYTES {
            return Ok(bytes);
        }
        tracing::warn!(
            device_id = %self.device_id,
            size = bytes.len(),
            "telemetry envelope over size limit, truncating payload"
        );
        let mut trimmed = self.clone();
        trimmed.payload = None;
        trimmed.message = Some("payload truncated".to_string());
        serde_json::to_vec(&trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_wire_names() {
        assert_eq!(
            serde_json::to_string(&ProcessOperation::CheckIn).unwrap(),
            "\"check-in\""
        );
        assert_eq!(
            serde_json::to_string(&ProcessOperation::UpgradeAvailable).unwrap(),
            "\"upgrade-available\""
        );
        assert_eq!(
            serde_json::to_string(&ProcessOperation::InternalTest).unwrap(),
            "\"internal-test\""
        );
    }

    #[test]
    fn envelope_json_keys() {
        let envelope = TelemetryEnvelope::new(ProcessOperation::Add, ProcessType::Camera)
            .with_device("cam1")
            .with_state("running");
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["deviceId"], "cam1");
        assert_eq!(value["operation"], "add");
        assert_eq!(value["type"], "camera");
        assert_eq!(value["state"], "running");
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn envelope_roundtrip() {
        let envelope = TelemetryEnvelope::new(ProcessOperation::State, ProcessType::Application);
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let back: TelemetryEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn oversized_payload_is_truncated() {
        let mut envelope = TelemetryEnvelope::new(ProcessOperation::Stats, ProcessType::Stats);
        envelope.payload = Some(serde_json::Value::String("x".repeat(MAX_TELEMETRY_BYTES)));
        let bytes = envelope.to_bytes_capped().unwrap();
        assert!(bytes.len() <= MAX_TELEMETRY_BYTES);
        let back: TelemetryEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert!(back.payload.is_none());
    }
}
