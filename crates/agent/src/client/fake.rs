//! Fake — test double for container runtime operations.
//!
//! Provides a deterministic [`FakeDocker`] that implements [`ContainerOps`]
//! using in-memory state. Useful for unit-testing domain modules without a
//! running Docker daemon.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;

use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;

use crate::client::ops::ContainerOps;
use crate::docker::client::DockerError;

use bollard::models::{
    ContainerConfig, ContainerCreateBody, ContainerCreateResponse, ContainerInspectResponse,
    ContainerPruneResponse, ContainerState, ContainerStateStatusEnum, ContainerStatsResponse,
    ContainerSummary, EventMessage, ImageSummary, SystemDataUsageResponse, SystemInfo,
};

/// A canned container in the fake store.
#[derive(Clone, Debug)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub running: bool,
    pub logs: Vec<String>,
}

/// Mutable inner state protected by a mutex.
#[derive(Default)]
struct Inner {
    containers: HashMap<String, FakeContainer>,
    images: Vec<String>,
    pullable: HashSet<String>,
    next_id: u64,
    fail_start: Option<String>,
    events_rx: Option<mpsc::UnboundedReceiver<EventMessage>>,
}

/// A fake container runtime for deterministic testing.
///
/// All methods operate on in-memory state. The seed methods allow
/// pre-populating containers and images before running test code.
pub struct FakeDocker {
    inner: Mutex<Inner>,
    events_tx: mpsc::UnboundedSender<EventMessage>,
}

impl FakeDocker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(Inner {
                events_rx: Some(rx),
                ..Default::default()
            }),
            events_tx: tx,
        }
    }

    /// Seed a running container.
    pub async fn add_container(&self, name: &str, image: &str, env: Vec<String>) -> String {
        let mut state = self.inner.lock().await;
        state.next_id += 1;
        let id = format!("fake-{:08}", state.next_id);
        state.containers.insert(
            name.to_string(),
            FakeContainer {
                id: id.clone(),
                name: name.to_string(),
                image: image.to_string(),
                env,
                running: true,
                logs: vec!["fake log line".to_string()],
            },
        );
        id
    }

    /// Seed a local image (full `repo:tag` reference).
    pub async fn add_image(&self, reference: &str) {
        self.inner.lock().await.images.push(reference.to_string());
    }

    /// Mark a `repo:tag` as pullable from the remote registry.
    pub async fn add_pullable(&self, reference: &str) {
        self.inner.lock().await.pullable.insert(reference.to_string());
    }

    /// Make the next `start_container` on `name` fail.
    pub async fn fail_start_of(&self, name: &str) {
        self.inner.lock().await.fail_start = Some(name.to_string());
    }

    /// Snapshot of a container for assertions.
    pub async fn container(&self, name: &str) -> Option<FakeContainer> {
        self.inner.lock().await.containers.get(name).cloned()
    }

    pub async fn container_count(&self) -> usize {
        self.inner.lock().await.containers.len()
    }

    /// Push a runtime event to `stream_events` subscribers.
    pub fn emit_event(&self, event: EventMessage) {
        let _ = self.events_tx.send(event);
    }

    fn inspect_of(container: &FakeContainer) -> ContainerInspectResponse {
        let status = if container.running {
            ContainerStateStatusEnum::RUNNING
        } else {
            ContainerStateStatusEnum::EXITED
        };
        ContainerInspectResponse {
            id: Some(container.id.clone()),
            name: Some(format!("/{}", container.name)),
            state: Some(ContainerState {
                status: Some(status),
                running: Some(container.running),
                ..Default::default()
            }),
            config: Some(ContainerConfig {
                image: Some(container.image.clone()),
                env: Some(container.env.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

impl Default for FakeDocker {
    fn default() -> Self {
        Self::new()
    }
}

// ── ContainerOps implementation ─────────────────────────────────

impl ContainerOps for FakeDocker {
    fn list_containers(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<ContainerSummary>, DockerError>> + Send + '_>> {
        Box::pin(async {
            let state = self.inner.lock().await;
            Ok(state
                .containers
                .values()
                .map(|c| ContainerSummary {
                    id: Some(c.id.clone()),
                    names: Some(vec![format!("/{}", c.name)]),
                    image: Some(c.image.clone()),
                    ..Default::default()
                })
                .collect())
        })
    }

    fn inspect_container<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ContainerInspectResponse, DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            state
                .containers
                .get(name)
                .map(Self::inspect_of)
                .ok_or_else(|| DockerError::ContainerNotFound(name.to_string()))
        })
    }

    fn container_logs<'a>(
        &'a self,
        name: &'a str,
        tail: usize,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<String>, DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            let container = state
                .containers
                .get(name)
                .ok_or_else(|| DockerError::ContainerNotFound(name.to_string()))?;
            let lines = container.logs.clone();
            let start = lines.len().saturating_sub(tail);
            Ok(lines[start..].to_vec())
        })
    }

    fn container_stats<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ContainerStatsResponse, DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.inner.lock().await;
            if !state.containers.contains_key(name) {
                return Err(DockerError::ContainerNotFound(name.to_string()));
            }
            Ok(ContainerStatsResponse::default())
        })
    }

    fn create_container<'a>(
        &'a self,
        name: &'a str,
        body: ContainerCreateBody,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ContainerCreateResponse, DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            if state.containers.contains_key(name) {
                return Err(DockerError::Conflict(name.to_string()));
            }
            let image = body.image.clone().unwrap_or_default();
            if !state.images.contains(&image) {
                return Err(DockerError::ImageNotFound(image));
            }
            state.next_id += 1;
            let id = format!("fake-{:08}", state.next_id);
            state.containers.insert(
                name.to_string(),
                FakeContainer {
                    id: id.clone(),
                    name: name.to_string(),
                    image,
                    env: body.env.clone().unwrap_or_default(),
                    running: false,
                    logs: Vec::new(),
                },
            );
            Ok(ContainerCreateResponse {
                id,
                warnings: Vec::new(),
            })
        })
    }

    fn start_container<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            if state.fail_start.as_deref() == Some(name) {
                state.fail_start = None;
                return Err(DockerError::ConnectionFailed("injected start failure".to_string()));
            }
            match state.containers.get_mut(name) {
                Some(container) => {
                    container.running = true;
                    Ok(())
                }
                None => Err(DockerError::ContainerNotFound(name.to_string())),
            }
        })
    }

    fn stop_container<'a>(
        &'a self,
        name: &'a str,
        _timeout_secs: Option<u32>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            match state.containers.get_mut(name) {
                Some(container) => {
                    container.running = false;
                    Ok(())
                }
                None => Err(DockerError::ContainerNotFound(name.to_string())),
            }
        })
    }

    fn remove_container<'a>(
        &'a self,
        name: &'a str,
        _force: bool,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            match state.containers.remove(name) {
                Some(_) => Ok(()),
                None => Err(DockerError::ContainerNotFound(name.to_string())),
            }
        })
    }

    fn prune_containers(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ContainerPruneResponse, DockerError>> + Send + '_>> {
        Box::pin(async {
            let mut state = self.inner.lock().await;
            let stopped: Vec<String> = state
                .containers
                .iter()
                .filter(|(_, c)| !c.running)
                .map(|(name, _)| name.clone())
                .collect();
            let mut deleted = Vec::new();
            for name in stopped {
                if let Some(container) = state.containers.remove(&name) {
                    deleted.push(container.id);
                }
            }
            Ok(ContainerPruneResponse {
                containers_deleted: Some(deleted),
                space_reclaimed: Some(0),
            })
        })
    }

    fn replace_container<'a>(
        &'a self,
        name: &'a str,
        new_image: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            state.next_id += 1;
            let id = format!("fake-{:08}", state.next_id);
            match state.containers.get_mut(name) {
                Some(container) => {
                    container.image = new_image.to_string();
                    container.id = id.clone();
                    container.running = true;
                    Ok(id)
                }
                None => Err(DockerError::ContainerNotFound(name.to_string())),
            }
        })
    }

    fn list_images(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<ImageSummary>, DockerError>> + Send + '_>> {
        Box::pin(async {
            let state = self.inner.lock().await;
            Ok(state
                .images
                .iter()
                .map(|reference| ImageSummary {
                    id: format!("sha256:{}", reference),
                    repo_tags: vec![reference.clone()],
                    ..Default::default()
                })
                .collect())
        })
    }

    fn pull_image<'a>(
        &'a self,
        image: &'a str,
        tag: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.inner.lock().await;
            let reference = format!("{}:{}", image, tag);
            if !state.pullable.contains(&reference) {
                return Err(DockerError::ImageNotFound(reference));
            }
            if !state.images.contains(&reference) {
                state.images.push(reference);
            }
            Ok(())
        })
    }

    fn system_info(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<SystemInfo, DockerError>> + Send + '_>> {
        Box::pin(async {
            let state = self.inner.lock().await;
            let running = state.containers.values().filter(|c| c.running).count() as i64;
            let total = state.containers.len() as i64;
            Ok(SystemInfo {
                containers: Some(total),
                containers_running: Some(running),
                containers_stopped: Some(total - running),
                ..Default::default()
            })
        })
    }

    fn disk_usage(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<SystemDataUsageResponse, DockerError>> + Send + '_>> {
        Box::pin(async { Ok(SystemDataUsageResponse::default()) })
    }

    fn stream_events(
        &self,
        _type_filters: Vec<String>,
    ) -> Pin<Box<dyn tokio_stream::Stream<Item = Result<EventMessage, DockerError>> + Send + '_>> {
        let rx = self
            .inner
            .try_lock()
            .ok()
            .and_then(|mut state| state.events_rx.take());
        match rx {
            Some(rx) => Box::pin(UnboundedReceiverStream::new(rx).map(Ok)),
            None => Box::pin(tokio_stream::empty()),
        }
    }
}
