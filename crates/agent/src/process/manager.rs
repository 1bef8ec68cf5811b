//! Process lifecycle controller for camera containers.
//!
//! Owns the `/rtspprocess/` rows: translates declarative intents into
//! container runtime calls and keeps the durable map consistent with
//! observed state. The controller is the sole writer of those rows.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use bollard::models::{
    ContainerCreateBody, HostConfig, HostConfigLogConfig, RestartPolicy, RestartPolicyNameEnum,
};

use crate::bus::EventSink;
use crate::client::ContainerOps;
use crate::cloud::telemetry::{ProcessOperation, ProcessType, TelemetryEnvelope};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::framebus::keys;
use crate::images::ImageResolver;
use crate::process::model::{
    CameraProcess, LifecycleState, ProcessKind, ProcessStatus, StreamFlags, PREFIX_RTSP_PROCESS,
};
use crate::store::{DurableMap, StoreError};

/// All agent containers join this pre-existing bridge network.
pub const EDGE_NETWORK: &str = "chrysnet";

/// Graceful stop deadline before the runtime kills the container.
pub const STOP_KILL_DEADLINE_SECS: u32 = 5;

/// Keyed mutexes serializing operations per process name.
pub type NameLocks = Arc<DashMap<String, Arc<Mutex<()>>>>;

pub struct ProcessManager {
    docker: Arc<dyn ContainerOps>,
    store: DurableMap,
    resolver: Arc<ImageResolver>,
    events: Arc<dyn EventSink>,
    config: AgentConfig,
    redis: Option<ConnectionManager>,
    locks: NameLocks,
}

impl ProcessManager {
    pub fn new(
        docker: Arc<dyn ContainerOps>,
        store: DurableMap,
        resolver: Arc<ImageResolver>,
        events: Arc<dyn EventSink>,
        config: AgentConfig,
        redis: Option<ConnectionManager>,
        locks: NameLocks,
    ) -> Self {
        ProcessManager {
            docker,
            store,
            resolver,
            events,
            config,
            redis,
            locks,
        }
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Start a camera container. Idempotent on `name`: a second start with
    /// the same name returns a Conflict, distinct from validation errors.
    pub async fn start(&self, mut process: CameraProcess) -> Result<CameraProcess> {
        process.validate()?;
        process.name = process.name.to_lowercase();

        let lock = self.lock_for(&process.name);
        let _guard = lock.lock().await;

        if self.store.get(PREFIX_RTSP_PROCESS, &process.name).is_ok() {
            return Err(AgentError::Conflict(format!(
                "camera {} already exists",
                process.name
            )));
        }

        process.image_tag = self.resolver.ensure_camera_image().await?;

        match self.docker.prune_containers().await {
            Ok(report) => info!(
                deleted = report.containers_deleted.map(|d| d.len()).unwrap_or(0),
                "container prune before start"
            ),
            Err(e) => return Err(e.into()),
        }

        let env = self.config.camera_env(
            &process.name,
            &process.rtsp_endpoint,
            process.rtmp_endpoint.as_deref(),
        );
        let body = ContainerCreateBody {
            image: Some(process.image_tag.clone()),
            env: Some(env),
            host_config: Some(camera_host_config(&self.config)),
            ..Default::default()
        };

        let created = self.docker.create_container(&process.name, body).await?;

        if let Err(e) = self.docker.start_container(&process.name).await {
            error!(name = %process.name, error = %e, "failed to start container, rolling back");
            if let Err(rm) = self.docker.remove_container(&process.name, true).await {
                warn!(name = %process.name, error = %rm, "rollback remove failed");
            }
            return Err(e.into());
        }

        process.container_id = Some(created.id);
        process.status = ProcessStatus::Running;
        process.created = chrono::Utc::now().timestamp_millis();
        process.modified = process.created;

        if process.rtmp_endpoint.as_deref().is_some_and(|r| !r.is_empty()) {
            if let Some(conn) = &self.redis {
                if let Err(e) = keys::enable_proxy(conn.clone(), &process.name).await {
                    warn!(name = %process.name, error = %e, "failed to seed proxy flags");
                }
            }
            process.rtmp_stream_status = Some(StreamFlags {
                streaming: true,
                storing: false,
            });
        }

        // A failed row write after a successful create is not rolled back;
        // the next list() observes the container and rewrites the row.
        match serde_json::to_vec(&process) {
            Ok(row) => {
                if let Err(e) = self.store.put(PREFIX_RTSP_PROCESS, &process.name, &row) {
                    error!(name = %process.name, error = %e, "failed to persist camera row");
                }
            }
            Err(e) => error!(name = %process.name, error = %e, "failed to marshal camera row"),
        }

        self.publish_lifecycle(&process, ProcessOperation::Add).await;

        Ok(process)
    }

    /// Stop and remove a managed container. Unknown names succeed; only
    /// true runtime errors fail.
    pub async fn stop(&self, name: &str, kind: ProcessKind) -> Result<()> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        match self.docker.inspect_container(name).await {
            Ok(_) => {
                if let Err(e) = self
                    .docker
                    .stop_container(name, Some(STOP_KILL_DEADLINE_SECS))
                    .await
                {
                    match e {
                        crate::docker::client::DockerError::ContainerNotFound(_) => {
                            info!(name, "container already gone before stop");
                        }
                        other => return Err(other.into()),
                    }
                }
                if let Err(e) = self.docker.remove_container(name, true).await {
                    if !matches!(
                        e,
                        crate::docker::client::DockerError::ContainerNotFound(_)
                    ) {
                        return Err(e.into());
                    }
                }
            }
            Err(crate::docker::client::DockerError::ContainerNotFound(_)) => {
                info!(name, "no container for stop, clearing row only");
            }
            Err(e) => return Err(e.into()),
        }

        self.store.del(kind.prefix(), name)?;

        if let Err(e) = self.docker.prune_containers().await {
            return Err(e.into());
        }

        let envelope = TelemetryEnvelope::new(
            ProcessOperation::Remove,
            match kind {
                ProcessKind::Camera => ProcessType::Camera,
                ProcessKind::Application => ProcessType::Application,
            },
        )
        .with_device(name);
        if let Err(e) = self.events.publish_event(envelope).await {
            warn!(name, error = %e, "failed to publish remove event");
        }

        Ok(())
    }

    /// Current runtime state merged into the stored row; persists the
    /// merged snapshot. `NotFound` when the container is gone,
    /// `NotFoundStored` when the container exists but the row is missing.
    pub async fn info(&self, name: &str) -> Result<CameraProcess> {
        let inspect = self.docker.inspect_container(name).await?;

        let logs = self.docker.container_logs(name, 100).await?;

        let row = self
            .store
            .get(PREFIX_RTSP_PROCESS, name)
            .map_err(|e| match e {
                StoreError::KeyNotFound(_) => AgentError::NotFoundStored(name.to_string()),
                other => AgentError::Store(other),
            })?;
        let mut process: CameraProcess = serde_json::from_slice(&row)?;

        process.container_id = inspect.id.clone();
        if let Some(state) = inspect.state.as_ref() {
            process.status = state
                .status
                .map(|s| ProcessStatus::from_docker(&s.to_string()))
                .unwrap_or(ProcessStatus::Unknown);
            process.state = Some(LifecycleState::from(state));
        } else {
            process.status = ProcessStatus::Unknown;
        }
        process.logs = Some(logs);
        process.modified = chrono::Utc::now().timestamp_millis();

        let row = serde_json::to_vec(&process)?;
        self.store.put(PREFIX_RTSP_PROCESS, &process.name, &row)?;

        Ok(process)
    }

    /// Stored set with live state merged in; rows whose container has
    /// vanished are deleted.
    pub async fn list(&self) -> Result<Vec<CameraProcess>> {
        let rows = self.store.list(PREFIX_RTSP_PROCESS)?;
        let mut clean = Vec::new();
        let mut vanished = Vec::new();

        for row in rows {
            let process: CameraProcess = serde_json::from_slice(&row)?;
            match self.info(&process.name).await {
                Ok(merged) => clean.push(merged),
                Err(AgentError::NotFound(_)) => vanished.push(process.name),
                Err(AgentError::NotFoundStored(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        for name in vanished {
            self.store.del(PREFIX_RTSP_PROCESS, &name)?;
        }

        Ok(clean)
    }

    /// Streaming variant of [`list`]: invokes `found` per row and honors
    /// cancellation between rows.
    pub async fn list_stream<F>(&self, cancel: &CancellationToken, mut found: F) -> Result<()>
    where
        F: FnMut(CameraProcess) -> Result<()>,
    {
        let rows = self.store.list(PREFIX_RTSP_PROCESS)?;
        for row in rows {
            if cancel.is_cancelled() {
                warn!("list stream cancelled");
                return Ok(());
            }
            let process: CameraProcess = serde_json::from_slice(&row)?;
            match self.info(&process.name).await {
                Ok(merged) => found(merged)?,
                Err(AgentError::NotFound(_)) | Err(AgentError::NotFoundStored(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Persist a mutated row without touching the container.
    pub async fn update_process_info(&self, mut process: CameraProcess) -> Result<CameraProcess> {
        process.modified = chrono::Utc::now().timestamp_millis();
        let row = serde_json::to_vec(&process)?;
        self.store.put(PREFIX_RTSP_PROCESS, &process.name, &row)?;
        Ok(process)
    }

    pub(crate) async fn publish_lifecycle(
        &self,
        process: &CameraProcess,
        operation: ProcessOperation,
    ) {
        let mut envelope = TelemetryEnvelope::new(operation, ProcessType::Camera)
            .with_device(&process.name)
            .with_state(process.status.as_str());
        envelope.image_tag = process.image_tag.clone();
        envelope.rtsp_connection = Some(process.rtsp_endpoint.clone());
        envelope.rtmp_endpoint = process.rtmp_endpoint.clone();
        if let Err(e) = self.events.publish_event(envelope).await {
            warn!(name = %process.name, error = %e, "failed to publish lifecycle event");
        }
    }

    pub(crate) fn docker(&self) -> &Arc<dyn ContainerOps> {
        &self.docker
    }

    pub(crate) fn store(&self) -> &DurableMap {
        &self.store
    }
}

/// Fixed host configuration for camera containers.
fn camera_host_config(config: &AgentConfig) -> HostConfig {
    let mut host = base_host_config(RestartPolicyNameEnum::ALWAYS, None);
    if config.buffer.on_disk {
        host.mounts = Some(vec![bollard::models::Mount {
            target: Some(config.buffer.on_disk_folder.clone()),
            source: Some(config.buffer.on_disk_folder.clone()),
            typ: Some(bollard::models::MountTypeEnum::BIND),
            read_only: Some(false),
            ..Default::default()
        }]);
    }
    host
}

/// Shared fixed host configuration: capped json-file logging, equal CPU
/// weight, membership in the edge bridge network.
pub(crate) fn base_host_config(
    restart: RestartPolicyNameEnum,
    max_retries: Option<i64>,
) -> HostConfig {
    let mut log_opts = HashMap::new();
    log_opts.insert("max-file".to_string(), "3".to_string());
    log_opts.insert("max-size".to_string(), "3M".to_string());

    HostConfig {
        log_config: Some(HostConfigLogConfig {
            typ: Some("json-file".to_string()),
            config: Some(log_opts),
        }),
        restart_policy: Some(RestartPolicy {
            name: Some(restart),
            maximum_retry_count: max_retries,
        }),
        cpu_shares: Some(1024),
        network_mode: Some(EDGE_NETWORK.to_string()),
        ..Default::default()
    }
}
