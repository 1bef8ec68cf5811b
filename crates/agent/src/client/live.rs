//! Live — implements `ContainerOps` for the real Bollard-backed
//! `DockerClient`.

use std::pin::Pin;

use crate::client::ops::ContainerOps;
use crate::docker::client::{DockerClient, DockerError};

impl ContainerOps for DockerClient {
    // ── Container queries ───────────────────────────────────────

    fn list_containers(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<bollard::models::ContainerSummary>, DockerError>> + Send + '_>> {
        Box::pin(self.list_containers())
    }

    fn inspect_container<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bollard::models::ContainerInspectResponse, DockerError>> + Send + 'a>> {
        Box::pin(self.inspect_container(name))
    }

    fn container_logs<'a>(
        &'a self,
        name: &'a str,
        tail: usize,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<String>, DockerError>> + Send + 'a>> {
        Box::pin(self.container_logs(name, tail))
    }

    fn container_stats<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bollard::models::ContainerStatsResponse, DockerError>> + Send + 'a>> {
        Box::pin(self.container_stats(name))
    }

    // ── Container lifecycle ─────────────────────────────────────

    fn create_container<'a>(
        &'a self,
        name: &'a str,
        body: bollard::models::ContainerCreateBody,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bollard::models::ContainerCreateResponse, DockerError>> + Send + 'a>> {
        Box::pin(self.create_container(name, body))
    }

    fn start_container<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(self.start_container(name))
    }

    fn stop_container<'a>(
        &'a self,
        name: &'a str,
        timeout_secs: Option<u32>,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(self.stop_container(name, timeout_secs))
    }

    fn remove_container<'a>(
        &'a self,
        name: &'a str,
        force: bool,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(self.remove_container(name, force))
    }

    fn prune_containers(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bollard::models::ContainerPruneResponse, DockerError>> + Send + '_>> {
        Box::pin(self.prune_containers())
    }

    fn replace_container<'a>(
        &'a self,
        name: &'a str,
        new_image: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<String, DockerError>> + Send + 'a>> {
        Box::pin(self.replace_container(name, new_image))
    }

    // ── Images ──────────────────────────────────────────────────

    fn list_images(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<bollard::models::ImageSummary>, DockerError>> + Send + '_>> {
        Box::pin(self.list_images())
    }

    fn pull_image<'a>(
        &'a self,
        image: &'a str,
        tag: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<(), DockerError>> + Send + 'a>> {
        Box::pin(self.pull_image(image, tag))
    }

    // ── System ──────────────────────────────────────────────────

    fn system_info(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bollard::models::SystemInfo, DockerError>> + Send + '_>> {
        Box::pin(self.system_info())
    }

    fn disk_usage(
        &self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<bollard::models::SystemDataUsageResponse, DockerError>> + Send + '_>> {
        Box::pin(self.disk_usage())
    }

    // ── Events ──────────────────────────────────────────────────

    fn stream_events(
        &self,
        type_filters: Vec<String>,
    ) -> Pin<Box<dyn tokio_stream::Stream<Item = Result<bollard::models::EventMessage, DockerError>> + Send + '_>> {
        Box::pin(self.stream_events(type_filters))
    }
}
