//! Application lifecycle — install/list/info for free-form app containers
//! under the `/appprocess/` prefix.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use bollard::models::{ContainerCreateBody, DeviceRequest, Mount, MountTypeEnum, PortBinding};

use crate::bus::EventSink;
use crate::client::ContainerOps;
use crate::cloud::telemetry::{ProcessOperation, ProcessType, TelemetryEnvelope};
use crate::error::{AgentError, Result};
use crate::process::manager::{base_host_config, NameLocks};
use crate::process::model::{
    AppProcess, LifecycleState, ProcessStatus, PREFIX_APP_PROCESS, RUNTIME_NVIDIA,
};
use crate::store::{DurableMap, StoreError};

pub struct AppManager {
    docker: Arc<dyn ContainerOps>,
    store: DurableMap,
    events: Arc<dyn EventSink>,
    locks: NameLocks,
}

impl AppManager {
    pub fn new(
        docker: Arc<dyn ContainerOps>,
        store: DurableMap,
        events: Arc<dyn EventSink>,
        locks: NameLocks,
    ) -> Self {
        AppManager {
            docker,
            store,
            events,
            locks,
        }
    }

    /// Install and start an application container, pulling the image when
    /// it is not present locally.
    pub async fn install(&self, mut app: AppProcess) -> Result<AppProcess> {
        app.validate()?;
        app.name = app.name.to_lowercase();

        let lock = self
            .locks
            .entry(app.name.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if self.store.get(PREFIX_APP_PROCESS, &app.name).is_ok() {
            return Err(AgentError::Conflict(format!(
                "application {} already exists",
                app.name
            )));
        }

        let image_tag = app.image_tag();
        let local = self.docker.list_images().await?;
        let present = local
            .iter()
            .any(|image| image.repo_tags.iter().any(|tag| tag == &image_tag));
        if !present {
            info!(image = %image_tag, "pulling application image");
            let repo = format!("{}/{}", app.docker_hub_user, app.docker_hub_repository);
            self.docker
                .pull_image(&repo, &app.docker_hub_version)
                .await?;
        }

        match self.docker.prune_containers().await {
            Ok(report) => info!(
                deleted = report.containers_deleted.map(|d| d.len()).unwrap_or(0),
                "container prune before install"
            ),
            Err(e) => return Err(e.into()),
        }

        let mut host = base_host_config(
            bollard::models::RestartPolicyNameEnum::ON_FAILURE,
            Some(10),
        );

        if app.runtime.as_deref() == Some(RUNTIME_NVIDIA) {
            host.runtime = Some(RUNTIME_NVIDIA.to_string());
            host.device_requests = Some(vec![DeviceRequest {
                driver: Some(RUNTIME_NVIDIA.to_string()),
                count: Some(-1),
                capabilities: Some(vec![vec![
                    "gpu".to_string(),
                    RUNTIME_NVIDIA.to_string(),
                    "compute".to_string(),
                ]]),
                ..Default::default()
            }]);
        }

        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for mapping in &app.port_mapping {
            let internal = format!("{}/tcp", mapping.map_to);
            exposed_ports.insert(internal.clone(), HashMap::new());
            port_bindings.insert(
                internal,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(mapping.exposed.to_string()),
                }]),
            );
        }
        if !port_bindings.is_empty() {
            host.port_bindings = Some(port_bindings);
        }

        if !app.mount_folders.is_empty() {
            host.mounts = Some(
                app.mount_folders
                    .iter()
                    .map(|mnt| Mount {
                        source: Some(mnt.name.clone()),
                        target: Some(mnt.value.clone()),
                        typ: Some(MountTypeEnum::BIND),
                        read_only: Some(false),
                        ..Default::default()
                    })
                    .collect(),
            );
        }

        let mut env: Vec<String> = app
            .env_vars
            .iter()
            .map(|pair| format!("{}={}", pair.name, pair.value))
            .collect();
        env.push("PYTHONUNBUFFERED=0".to_string());

        let body = ContainerCreateBody {
            image: Some(image_tag.clone()),
            env: Some(env),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(host),
            ..Default::default()
        };

        let created = self.docker.create_container(&app.name, body).await?;

        if let Err(e) = self.docker.start_container(&app.name).await {
            error!(name = %app.name, error = %e, "failed to start application, rolling back");
            if let Err(rm) = self.docker.remove_container(&app.name, true).await {
                warn!(name = %app.name, error = %rm, "rollback remove failed");
            }
            return Err(e.into());
        }

        app.container_id = Some(created.id);
        app.status = ProcessStatus::Running;
        app.created = chrono::Utc::now().timestamp_millis();
        app.modified = app.created;

        let row = serde_json::to_vec(&app)?;
        if let Err(e) = self.store.put(PREFIX_APP_PROCESS, &app.name, &row) {
            error!(name = %app.name, error = %e, "failed to persist application row");
        }

        let mut envelope = TelemetryEnvelope::new(ProcessOperation::Add, ProcessType::Application)
            .with_device(&app.name)
            .with_state(app.status.as_str());
        envelope.image_tag = image_tag;
        if let Err(e) = self.events.publish_event(envelope).await {
            warn!(name = %app.name, error = %e, "failed to publish install event");
        }

        Ok(app)
    }

    /// Runtime state merged into the stored row, persisted back.
    pub async fn info(&self, name: &str) -> Result<AppProcess> {
        let inspect = self.docker.inspect_container(name).await?;
        let logs = self.docker.container_logs(name, 100).await?;

        let row = self
            .store
            .get(PREFIX_APP_PROCESS, name)
            .map_err(|e| match e {
                StoreError::KeyNotFound(_) => AgentError::NotFoundStored(name.to_string()),
                other => AgentError::Store(other),
            })?;
        let mut app: AppProcess = serde_json::from_slice(&row)?;

        app.container_id = inspect.id.clone();
        if let Some(state) = inspect.state.as_ref() {
            app.status = state
                .status
                .map(|s| ProcessStatus::from_docker(&s.to_string()))
                .unwrap_or(ProcessStatus::Unknown);
            app.state = Some(LifecycleState::from(state));
        } else {
            app.status = ProcessStatus::Unknown;
        }
        app.logs = Some(logs);
        app.modified = chrono::Utc::now().timestamp_millis();

        let row = serde_json::to_vec(&app)?;
        self.store.put(PREFIX_APP_PROCESS, &app.name, &row)?;

        Ok(app)
    }

    /// Stored applications with live state; vanished rows are removed.
    pub async fn list(&self) -> Result<Vec<AppProcess>> {
        let rows = self.store.list(PREFIX_APP_PROCESS)?;
        let mut clean = Vec::new();
        let mut vanished = Vec::new();

        for row in rows {
            let app: AppProcess = serde_json::from_slice(&row)?;
            match self.info(&app.name).await {
                Ok(merged) => clean.push(merged),
                Err(AgentError::NotFound(_)) => vanished.push(app.name),
                Err(AgentError::NotFoundStored(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        for name in vanished {
            self.store.del(PREFIX_APP_PROCESS, &name)?;
        }

        Ok(clean)
    }
}
