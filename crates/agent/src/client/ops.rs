//! Container runtime trait — abstract interface over the Docker daemon.
//!
//! `live.rs` provides the real Bollard-backed implementation.
//! `fake.rs` provides a test double.

use std::pin::Pin;

use crate::docker::client::DockerError;

/// Unified async interface over the container runtime.
///
/// Object-safe thanks to `Pin<Box<…>>` returns for streaming methods.
/// Implementations must be `Send + Sync` so they can live inside
/// `Arc<AgentState>`.
pub trait ContainerOps: Send + Sync {
    // ── Container queries ───────────────────────────────────────

    fn list_containers(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<bollard::models::ContainerSummary>, DockerError>> + Send + '_>>;

    fn inspect_container<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bollard::models::ContainerInspectResponse, DockerError>> + Send + 'a>>;

    fn container_logs<'a>(
        &'a self,
        name: &'a str,
        tail: usize,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<String>, DockerError>> + Send + 'a>>;

    fn container_stats<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bollard::models::ContainerStatsResponse, DockerError>> + Send + 'a>>;

    // ── Container lifecycle ─────────────────────────────────────

    fn create_container<'a>(
        &'a self,
        name: &'a str,
        body: bollard::models::ContainerCreateBody,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bollard::models::ContainerCreateResponse, DockerError>> + Send + 'a>>;

    fn start_container<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>>;

    fn stop_container<'a>(
        &'a self,
        name: &'a str,
        timeout_secs: Option<u32>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>>;

    fn remove_container<'a>(
        &'a self,
        name: &'a str,
        force: bool,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>>;

    fn prune_containers(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bollard::models::ContainerPruneResponse, DockerError>> + Send + '_>>;

    /// Recreate a container with a new image, preserving name, env and
    /// host configuration. Returns the new container id.
    fn replace_container<'a>(
        &'a self,
        name: &'a str,
        new_image: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, DockerError>> + Send + 'a>>;

    // ── Images ──────────────────────────────────────────────────

    fn list_images(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<bollard::models::ImageSummary>, DockerError>> + Send + '_>>;

    fn pull_image<'a>(
        &'a self,
        image: &'a str,
        tag: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>>;

    // ── System ──────────────────────────────────────────────────

    fn system_info(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bollard::models::SystemInfo, DockerError>> + Send + '_>>;

    fn disk_usage(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bollard::models::SystemDataUsageResponse, DockerError>> + Send + '_>>;

    // ── Events ──────────────────────────────────────────────────

    fn stream_events(
        &self,
        type_filters: Vec<String>,
    ) -> Pin<Box<dyn tokio_stream::Stream<Item = Result<bollard::models::EventMessage, DockerError>> + Send + '_>>;
}
