//! Cloud command envelope and the local dispatcher executing it.
//!
//! Commands decoded from the broker are republished on the local event
//! bus (wrapped in a telemetry envelope); the dispatcher here is the sole
//! consumer, so cloud and REST commands traverse identical controller
//! paths.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::cloud::telemetry::{ProcessOperation, ProcessType, TelemetryEnvelope};
use crate::config::parse_pairs;
use crate::error::{AgentError, Result};
use crate::images::ImageResolver;
use crate::process::model::{
    AppProcess, CameraProcess, PortMap, ProcessKind, ProcessStatus, VarPair,
};
use crate::process::{AppManager, ProcessManager};

pub const COMMAND_TYPE_CAMERA: &str = "rtsp";
pub const COMMAND_TYPE_APP: &str = "app";

/// Wire envelope; key names are part of the cloud contract.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CommandEnvelope {
    #[serde(rename = "t")]
    pub command_type: String,
    #[serde(rename = "op")]
    pub operation: String,
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "tag", default, skip_serializing_if = "String::is_empty")]
    pub image_tag: String,
    #[serde(rename = "rtsp", default, skip_serializing_if = "Option::is_none")]
    pub rtsp_endpoint: Option<String>,
    #[serde(rename = "rtmp", default, skip_serializing_if = "Option::is_none")]
    pub rtmp_endpoint: Option<String>,
    #[serde(rename = "rt", default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(rename = "ev", default, skip_serializing_if = "Vec::is_empty")]
    pub env_vars: Vec<String>,
    #[serde(rename = "pm", default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<String>,
    #[serde(rename = "mnt", default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<String>,
    #[serde(rename = "av", default, skip_serializing_if = "Vec::is_empty")]
    pub arg_vars: Vec<String>,
    #[serde(rename = "dht", default, skip_serializing_if = "Option::is_none")]
    pub docker_hub_token: Option<String>,
}

/// Resolved action for a camera-type envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraCommand {
    Start,
    Delete,
}

impl CommandEnvelope {
    /// Short ops map `a` → start, `r` → delete; anything else on camera
    /// type is rejected.
    pub fn camera_command(&self) -> Result<CameraCommand> {
        match self.operation.as_str() {
            "a" => Ok(CameraCommand::Start),
            "r" => Ok(CameraCommand::Delete),
            other => Err(AgentError::Validation(format!(
                "unsupported camera operation: {}",
                other
            ))),
        }
    }

    /// Build the application spec from the envelope arrays.
    pub fn app_process(&self) -> Result<AppProcess> {
        let (user, rest) = self
            .image_tag
            .split_once('/')
            .ok_or_else(|| AgentError::Validation(format!("bad image tag: {}", self.image_tag)))?;
        let (repo, version) = rest
            .split_once(':')
            .ok_or_else(|| AgentError::Validation(format!("bad image tag: {}", self.image_tag)))?;

        let to_pairs = |raw: &[String]| -> Vec<VarPair> {
            parse_pairs(raw)
                .into_iter()
                .map(|(name, value)| VarPair { name, value })
                .collect()
        };

        let port_mapping = self
            .port_mappings
            .iter()
            .filter_map(|pair| {
                let (exposed, map_to) = pair.split_once('=')?;
                Some(PortMap {
                    exposed: exposed.parse().ok()?,
                    map_to: map_to.parse().ok()?,
                })
            })
            .collect();

        Ok(AppProcess {
            name: self.name.clone(),
            docker_hub_user: user.to_string(),
            docker_hub_repository: repo.to_string(),
            docker_hub_version: version.to_string(),
            env_vars: to_pairs(&self.env_vars),
            args_vars: to_pairs(&self.arg_vars),
            port_mapping,
            mount_folders: to_pairs(&self.mounts),
            runtime: self.runtime.clone(),
            ..Default::default()
        })
    }

    /// Wrap the command for the local event bus.
    pub fn into_bus_envelope(self) -> Result<TelemetryEnvelope> {
        let (operation, process_type) = match self.command_type.as_str() {
            COMMAND_TYPE_CAMERA => match self.camera_command()? {
                CameraCommand::Start => (ProcessOperation::Add, ProcessType::Camera),
                CameraCommand::Delete => (ProcessOperation::Remove, ProcessType::Camera),
            },
            COMMAND_TYPE_APP => match self.operation.as_str() {
                "add" => (ProcessOperation::Add, ProcessType::Application),
                "remove" => (ProcessOperation::Remove, ProcessType::Application),
                other => {
                    return Err(AgentError::Validation(format!(
                        "unsupported application operation: {}",
                        other
                    )))
                }
            },
            other => {
                return Err(AgentError::Validation(format!(
                    "unsupported command type: {}",
                    other
                )))
            }
        };

        let mut envelope = TelemetryEnvelope::new(operation, process_type)
            .with_device(&self.name);
        envelope.payload = Some(serde_json::to_value(&self)?);
        Ok(envelope)
    }
}

/// Executes commands and lifecycle events arriving on the local bus.
pub struct CommandDispatcher {
    processes: Arc<ProcessManager>,
    apps: Arc<AppManager>,
    resolver: Arc<ImageResolver>,
    publisher: Arc<dyn super::bridge::TelemetryPublisher>,
}

impl CommandDispatcher {
    pub fn new(
        processes: Arc<ProcessManager>,
        apps: Arc<AppManager>,
        resolver: Arc<ImageResolver>,
        publisher: Arc<dyn super::bridge::TelemetryPublisher>,
    ) -> Self {
        CommandDispatcher {
            processes,
            apps,
            resolver,
            publisher,
        }
    }

    /// One bus envelope: either a wrapped cloud command to execute, or a
    /// plain lifecycle event to translate into attach/detach telemetry.
    pub async fn dispatch(&self, envelope: TelemetryEnvelope) {
        if let Some(payload) = envelope.payload.clone() {
            match serde_json::from_value::<CommandEnvelope>(payload) {
                Ok(command) => self.execute(command).await,
                Err(e) => error!(error = %e, "undecodable command payload on local bus"),
            }
            return;
        }

        match envelope.operation {
            ProcessOperation::Add => self.bind_device(&envelope).await,
            ProcessOperation::Remove => self.unbind_device(&envelope).await,
            ProcessOperation::InternalTest => {
                // Test-only: synthetic restarting report for the device.
                let state = TelemetryEnvelope::new(ProcessOperation::State, envelope.process_type)
                    .with_device(&envelope.device_id)
                    .with_state(ProcessStatus::Restarting.as_str());
                self.publisher.publish(state).await;
            }
            other => {
                info!(operation = ?other, "ignoring local bus operation");
            }
        }
    }

    async fn execute(&self, command: CommandEnvelope) {
        match command.command_type.as_str() {
            COMMAND_TYPE_CAMERA => match command.camera_command() {
                Ok(CameraCommand::Start) => self.start_camera(&command).await,
                Ok(CameraCommand::Delete) => self.delete_camera(&command).await,
                Err(e) => error!(op = %command.operation, error = %e, "rejected camera command"),
            },
            COMMAND_TYPE_APP => match command.operation.as_str() {
                "add" => self.install_app(&command).await,
                "remove" => self.remove_app(&command).await,
                other => error!(op = other, "rejected application command"),
            },
            other => error!(t = other, "rejected command type"),
        }
    }

    /// `t=rtsp, op=a`: pull the requested tag when missing, start, and let
    /// the controller's add event drive the attach telemetry.
    async fn start_camera(&self, command: &CommandEnvelope) {
        if self.processes.info(&command.name).await.is_ok() {
            info!(name = %command.name, "camera already present, re-binding");
            let envelope = TelemetryEnvelope::new(ProcessOperation::Add, ProcessType::Camera)
                .with_device(&command.name);
            self.bind_device(&envelope).await;
            return;
        }

        if let Some((repo, version)) = command.image_tag.split_once(':') {
            match self.resolver.local_record(repo, crate::images::KIND_RTSP).await {
                Ok(record) if !record.has_image => {
                    if let Err(e) = self.resolver.pull(repo, version).await {
                        error!(tag = %command.image_tag, error = %e, "failed to pull camera image");
                        self.operation_failed(&command.name, ProcessType::Camera, &e).await;
                        return;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "failed to inspect local images"),
            }
        }

        let camera = CameraProcess {
            name: command.name.clone(),
            image_tag: command.image_tag.clone(),
            rtsp_endpoint: command.rtsp_endpoint.clone().unwrap_or_default(),
            rtmp_endpoint: command.rtmp_endpoint.clone(),
            rtmp_stream_status: Some(crate::process::model::StreamFlags {
                streaming: true,
                storing: false,
            }),
            ..Default::default()
        };

        if let Err(e) = self.processes.start(camera).await {
            error!(name = %command.name, error = %e, "cloud-commanded start failed");
            self.operation_failed(&command.name, ProcessType::Camera, &e).await;
        }
    }

    /// `t=rtsp, op=r`: stop; detach is emitted even when already absent.
    async fn delete_camera(&self, command: &CommandEnvelope) {
        if let Err(e) = self
            .processes
            .stop(&command.name, ProcessKind::Camera)
            .await
        {
            error!(name = %command.name, error = %e, "cloud-commanded delete failed");
            self.operation_failed(&command.name, ProcessType::Camera, &e).await;
            // Still report the detach: the cloud considers the device gone.
            let envelope = TelemetryEnvelope::new(ProcessOperation::Remove, ProcessType::Camera)
                .with_device(&command.name);
            self.unbind_device(&envelope).await;
        }
    }

    async fn install_app(&self, command: &CommandEnvelope) {
        let progress = TelemetryEnvelope::new(ProcessOperation::State, ProcessType::Application)
            .with_device(&command.name)
            .with_state(ProcessStatus::InProgress.as_str());
        self.publisher.publish(progress).await;

        let app = match command.app_process() {
            Ok(app) => app,
            Err(e) => {
                error!(name = %command.name, error = %e, "bad application command");
                self.operation_failed(&command.name, ProcessType::Application, &e).await;
                return;
            }
        };

        match self.apps.install(app).await {
            Ok(installed) => {
                let mut envelope =
                    TelemetryEnvelope::new(ProcessOperation::State, ProcessType::Application)
                        .with_device(&installed.name)
                        .with_state(installed.status.as_str());
                envelope.image_tag = installed.image_tag();
                self.publisher.publish(envelope).await;
            }
            Err(e) => {
                error!(name = %command.name, error = %e, "cloud-commanded install failed");
                self.operation_failed(&command.name, ProcessType::Application, &e).await;
            }
        }
    }

    async fn remove_app(&self, command: &CommandEnvelope) {
        if let Err(e) = self
            .processes
            .stop(&command.name, ProcessKind::Application)
            .await
        {
            error!(name = %command.name, error = %e, "cloud-commanded remove failed");
            self.operation_failed(&command.name, ProcessType::Application, &e).await;
        }
    }

    /// Attach telemetry for a device joining this gateway.
    pub async fn bind_device(&self, event: &TelemetryEnvelope) {
        let mut envelope = TelemetryEnvelope::new(ProcessOperation::Add, event.process_type)
            .with_device(&event.device_id);

        match event.process_type {
            ProcessType::Application => {
                if let Ok(app) = self.apps.info(&event.device_id).await {
                    envelope.image_tag = app.image_tag();
                    envelope.state = app.status.as_str().to_string();
                }
            }
            _ => {
                if let Ok(device) = self.processes.info(&event.device_id).await {
                    envelope.image_tag = device.image_tag;
                    envelope.rtsp_connection = Some(device.rtsp_endpoint);
                    envelope.rtmp_endpoint = device.rtmp_endpoint;
                    envelope.state = device.status.as_str().to_string();
                }
            }
        }

        self.publisher.publish(envelope).await;
    }

    /// Detach telemetry; emitted even when the process is already gone.
    pub async fn unbind_device(&self, event: &TelemetryEnvelope) {
        let envelope = TelemetryEnvelope::new(ProcessOperation::Remove, event.process_type)
            .with_device(&event.device_id);
        self.publisher.publish(envelope).await;
    }

    async fn operation_failed(
        &self,
        device: &str,
        process_type: ProcessType,
        err: &crate::error::AgentError,
    ) {
        let mut envelope = TelemetryEnvelope::new(ProcessOperation::Error, process_type)
            .with_device(device)
            .with_state(ProcessStatus::Failed.as_str());
        envelope.message = Some(err.to_string());
        self.publisher.publish(envelope).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wire_keys_are_exact() {
        let command = CommandEnvelope {
            command_type: "rtsp".to_string(),
            operation: "a".to_string(),
            name: "cam2".to_string(),
            image_tag: "chryscloud/chrysedgeproxy:1.2.3".to_string(),
            rtsp_endpoint: Some("rtsp://x/y".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["t"], "rtsp");
        assert_eq!(value["op"], "a");
        assert_eq!(value["n"], "cam2");
        assert_eq!(value["tag"], "chryscloud/chrysedgeproxy:1.2.3");
        assert_eq!(value["rtsp"], "rtsp://x/y");
    }

    #[test]
    fn envelope_parses_sparse_json() {
        let raw = r#"{"t":"rtsp","op":"a","n":"cam2","tag":"chryscloud/chrysedgeproxy:1.2.3","rtsp":"rtsp://x/y"}"#;
        let command: CommandEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(command.camera_command().unwrap(), CameraCommand::Start);
        assert!(command.env_vars.is_empty());
    }

    #[test]
    fn camera_short_ops() {
        let mut command = CommandEnvelope {
            command_type: "rtsp".to_string(),
            operation: "a".to_string(),
            name: "cam1".to_string(),
            ..Default::default()
        };
        assert_eq!(command.camera_command().unwrap(), CameraCommand::Start);
        command.operation = "r".to_string();
        assert_eq!(command.camera_command().unwrap(), CameraCommand::Delete);
        command.operation = "u".to_string();
        assert!(command.camera_command().is_err());
    }

    #[test]
    fn app_process_built_from_arrays() {
        let command = CommandEnvelope {
            command_type: "app".to_string(),
            operation: "add".to_string(),
            name: "detector".to_string(),
            image_tag: "acme/detector:2.0.0".to_string(),
            env_vars: vec!["MODE=fast".to_string()],
            port_mappings: vec!["8080=80".to_string()],
            mounts: vec!["/host=/container".to_string()],
            runtime: Some("nvidia".to_string()),
            ..Default::default()
        };
        let app = command.app_process().unwrap();
        assert_eq!(app.docker_hub_user, "acme");
        assert_eq!(app.docker_hub_repository, "detector");
        assert_eq!(app.docker_hub_version, "2.0.0");
        assert_eq!(app.env_vars.len(), 1);
        assert_eq!(app.port_mapping[0].exposed, 8080);
        assert_eq!(app.port_mapping[0].map_to, 80);
        assert_eq!(app.runtime.as_deref(), Some("nvidia"));
    }

    #[test]
    fn bad_app_tag_is_validation_error() {
        let command = CommandEnvelope {
            command_type: "app".to_string(),
            operation: "add".to_string(),
            name: "x".to_string(),
            image_tag: "no-colon".to_string(),
            ..Default::default()
        };
        assert!(command.app_process().is_err());
    }

    #[test]
    fn bus_envelope_carries_command_payload() {
        let command = CommandEnvelope {
            command_type: "rtsp".to_string(),
            operation: "a".to_string(),
            name: "cam2".to_string(),
            ..Default::default()
        };
        let envelope = command.clone().into_bus_envelope().unwrap();
        assert_eq!(envelope.operation, ProcessOperation::Add);
        assert_eq!(envelope.process_type, ProcessType::Camera);
        let back: CommandEnvelope =
            serde_json::from_value(envelope.payload.unwrap()).unwrap();
        assert_eq!(back, command);
    }

    #[test]
    fn unknown_types_and_ops_rejected() {
        let bad_type = CommandEnvelope {
            command_type: "weird".to_string(),
            operation: "a".to_string(),
            ..Default::default()
        };
        assert!(bad_type.into_bus_envelope().is_err());

        let bad_op = CommandEnvelope {
            command_type: "app".to_string(),
            operation: "explode".to_string(),
            ..Default::default()
        };
        assert!(bad_op.into_bus_envelope().is_err());
    }
}
