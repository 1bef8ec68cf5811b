//! Managed process records — the rows persisted in the durable map.

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

pub const PREFIX_RTSP_PROCESS: &str = "/rtspprocess/";
pub const PREFIX_APP_PROCESS: &str = "/appprocess/";

/// Container runtime used for gpu-enabled applications.
pub const RUNTIME_NVIDIA: &str = "nvidia";

/// Selects the key prefix and default image repo for a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    Camera,
    Application,
}

impl ProcessKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            ProcessKind::Camera => PREFIX_RTSP_PROCESS,
            ProcessKind::Application => PREFIX_APP_PROCESS,
        }
    }
}

/// Observed container status, plus the two synthetic install states.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessStatus {
    #[default]
    Created,
    Running,
    Restarting,
    Removing,
    Paused,
    Exited,
    Dead,
    /// Install failed before the container started.
    Failed,
    /// Install is pulling the image.
    InProgress,
    Unknown,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Created => "created",
            ProcessStatus::Running => "running",
            ProcessStatus::Restarting => "restarting",
            ProcessStatus::Removing => "removing",
            ProcessStatus::Paused => "paused",
            ProcessStatus::Exited => "exited",
            ProcessStatus::Dead => "dead",
            ProcessStatus::Failed => "failed",
            ProcessStatus::InProgress => "in-progress",
            ProcessStatus::Unknown => "unknown",
        }
    }

    /// Map a docker status string onto the process status.
    pub fn from_docker(status: &str) -> Self {
        match status {
            "created" => ProcessStatus::Created,
            "running" => ProcessStatus::Running,
            "restarting" => ProcessStatus::Restarting,
            "removing" => ProcessStatus::Removing,
            "paused" => ProcessStatus::Paused,
            "exited" => ProcessStatus::Exited,
            "dead" => ProcessStatus::Dead,
            _ => ProcessStatus::Unknown,
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last observed lifecycle snapshot, copied from the container inspect.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LifecycleState {
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub restarting: bool,
    #[serde(default)]
    pub oom_killed: bool,
    #[serde(default)]
    pub dead: bool,
    #[serde(default)]
    pub pid: i64,
    #[serde(default)]
    pub exit_code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failing_streak: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_status: Option<String>,
}

impl From<&bollard::models::ContainerState> for LifecycleState {
    fn from(state: &bollard::models::ContainerState) -> Self {
        LifecycleState {
            running: state.running.unwrap_or(false),
            paused: state.paused.unwrap_or(false),
            restarting: state.restarting.unwrap_or(false),
            oom_killed: state.oom_killed.unwrap_or(false),
            dead: state.dead.unwrap_or(false),
            pid: state.pid.unwrap_or(0),
            exit_code: state.exit_code.unwrap_or(0),
            error: state.error.clone().filter(|e| !e.is_empty()),
            failing_streak: state.health.as_ref().and_then(|h| h.failing_streak),
            health_status: state
                .health
                .as_ref()
                .and_then(|h| h.status.as_ref())
                .map(|s| s.to_string()),
        }
    }
}

/// Egress stream flag pair.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamFlags {
    pub streaming: bool,
    pub storing: bool,
}

/// One camera container owned by the agent.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CameraProcess {
    pub name: String,
    #[serde(default)]
    pub image_tag: String,
    pub rtsp_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtmp_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default)]
    pub status: ProcessStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<LifecycleState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtmp_stream_status: Option<StreamFlags>,
    #[serde(default)]
    pub upgrade_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newer_version: Option<String>,
}

impl CameraProcess {
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.name.len() < 3 {
            return Err(AgentError::Validation(
                "name must be at least 3 characters".to_string(),
            ));
        }
        if self.rtsp_endpoint.is_empty() {
            return Err(AgentError::Validation(
                "rtsp_endpoint is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Name/value pair used for env vars, argv entries and mounts.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VarPair {
    pub name: String,
    pub value: String,
}

/// Exposed host port to internal container port.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMap {
    pub exposed: u16,
    pub map_to: u16,
}

/// One application container owned by the agent.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AppProcess {
    pub name: String,
    #[serde(rename = "docker_user")]
    pub docker_hub_user: String,
    #[serde(rename = "docker_repository")]
    pub docker_hub_repository: String,
    #[serde(rename = "docker_version")]
    pub docker_hub_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_vars: Vec<VarPair>,
    #[serde(rename = "arguments", default, skip_serializing_if = "Vec::is_empty")]
    pub args_vars: Vec<VarPair>,
    #[serde(rename = "port_mappings", default, skip_serializing_if = "Vec::is_empty")]
    pub port_mapping: Vec<PortMap>,
    #[serde(rename = "mount", default, skip_serializing_if = "Vec::is_empty")]
    pub mount_folders: Vec<VarPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default)]
    pub status: ProcessStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<LifecycleState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub modified: i64,
    #[serde(default)]
    pub upgrade_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newer_version: Option<String>,
}

impl AppProcess {
    pub fn image_tag(&self) -> String {
        format!(
            "{}/{}:{}",
            self.docker_hub_user, self.docker_hub_repository, self.docker_hub_version
        )
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.docker_hub_user.is_empty()
            || self.docker_hub_repository.is_empty()
            || self.docker_hub_version.is_empty()
        {
            return Err(AgentError::Validation(
                "docker_user, docker_repository and docker_version are required".to_string(),
            ));
        }
        if self.name.len() < 3 {
            return Err(AgentError::Validation(
                "name must be at least 3 characters".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ProcessStatus::InProgress).unwrap(),
            "\"in-progress\""
        );
        assert_eq!(
            serde_json::to_string(&ProcessStatus::Running).unwrap(),
            "\"running\""
        );
    }

    #[test]
    fn status_from_docker_strings() {
        assert_eq!(ProcessStatus::from_docker("running"), ProcessStatus::Running);
        assert_eq!(ProcessStatus::from_docker("exited"), ProcessStatus::Exited);
        assert_eq!(ProcessStatus::from_docker("weird"), ProcessStatus::Unknown);
    }

    #[test]
    fn camera_validation() {
        let mut camera = CameraProcess {
            name: "cam1".to_string(),
            rtsp_endpoint: "rtsp://example/stream".to_string(),
            ..Default::default()
        };
        assert!(camera.validate().is_ok());

        camera.name = "ab".to_string();
        assert!(matches!(
            camera.validate(),
            Err(AgentError::Validation(_))
        ));

        camera.name = "cam1".to_string();
        camera.rtsp_endpoint = String::new();
        assert!(camera.validate().is_err());
    }

    #[test]
    fn app_validation_and_tag() {
        let app = AppProcess {
            name: "detector".to_string(),
            docker_hub_user: "acme".to_string(),
            docker_hub_repository: "detector".to_string(),
            docker_hub_version: "1.2.3".to_string(),
            ..Default::default()
        };
        assert!(app.validate().is_ok());
        assert_eq!(app.image_tag(), "acme/detector:1.2.3");

        let missing = AppProcess {
            name: "detector".to_string(),
            ..Default::default()
        };
        assert!(missing.validate().is_err());
    }

    #[test]
    fn camera_row_roundtrip() {
        let camera = CameraProcess {
            name: "cam1".to_string(),
            image_tag: "chryscloud/chrysedgeproxy:1.0.0".to_string(),
            rtsp_endpoint: "rtsp://example/stream".to_string(),
            rtmp_endpoint: Some("rtmp://cloud/key".to_string()),
            container_id: Some("abc".to_string()),
            status: ProcessStatus::Running,
            created: 1,
            modified: 2,
            ..Default::default()
        };
        let bytes = serde_json::to_vec(&camera).unwrap();
        let back: CameraProcess = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.name, "cam1");
        assert_eq!(back.status, ProcessStatus::Running);
        assert_eq!(back.rtmp_endpoint.as_deref(), Some("rtmp://cloud/key"));
    }
}
