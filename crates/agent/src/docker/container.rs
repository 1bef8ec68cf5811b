//! Container domain — list, inspect, lifecycle, prune, logs, stats.

use super::client::{not_found_as, DockerClient, DockerError};

use bollard::container::LogOutput;
use bollard::models::{
    ContainerCreateBody, ContainerCreateResponse, ContainerInspectResponse, ContainerPruneResponse,
    ContainerStatsResponse, ContainerSummary,
};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    PruneContainersOptions, RemoveContainerOptions, StartContainerOptions, StatsOptions,
    StopContainerOptions,
};
use futures_util::stream::StreamExt;

impl DockerClient {
    pub async fn list_containers(&self) -> Result<Vec<ContainerSummary>, DockerError> {
        let options = Some(ListContainersOptions {
            all: true,
            ..Default::default()
        });
        self.client
            .list_containers(options)
            .await
            .map_err(DockerError::from)
    }

    /// Inspect a container by name or id. 404 maps to `ContainerNotFound`.
    pub async fn inspect_container(
        &self,
        name: &str,
    ) -> Result<ContainerInspectResponse, DockerError> {
        self.client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| not_found_as(name, e))
    }

    pub async fn create_container(
        &self,
        name: &str,
        body: ContainerCreateBody,
    ) -> Result<ContainerCreateResponse, DockerError> {
        let options = Some(CreateContainerOptions {
            name: Some(name.to_string()),
            ..Default::default()
        });
        self.client
            .create_container(options, body)
            .await
            .map_err(|e| not_found_as(name, e))
    }

    pub async fn start_container(&self, name: &str) -> Result<(), DockerError> {
        self.client
            .start_container(name, None)
            .await
            .map_err(|e| not_found_as(name, e))
    }

    /// Stop a running container with an optional grace period (in seconds).
    pub async fn stop_container(
        &self,
        name: &str,
        timeout_secs: Option<u32>,
    ) -> Result<(), DockerError> {
        let options = timeout_secs.map(|t| StopContainerOptions {
            t: Some(t as i32),
            ..Default::default()
        });
        self.client
            .stop_container(name, options)
            .await
            .map_err(|e| not_found_as(name, e))
    }

    pub async fn remove_container(&self, name: &str, force: bool) -> Result<(), DockerError> {
        let options = Some(RemoveContainerOptions {
            force,
            v: false,
            ..Default::default()
        });
        self.client
            .remove_container(name, options)
            .await
            .map_err(|e| not_found_as(name, e))
    }

    /// Remove all stopped containers.
    pub async fn prune_containers(&self) -> Result<ContainerPruneResponse, DockerError> {
        self.client
            .prune_containers(None)
            .await
            .map_err(DockerError::from)
    }

    /// Last `tail` log lines of the container, stdout and stderr merged.
    pub async fn container_logs(
        &self,
        name: &str,
        tail: usize,
    ) -> Result<Vec<String>, DockerError> {
        let options = Some(LogsOptions {
            follow: false,
            stdout: true,
            stderr: true,
            timestamps: false,
            tail: tail.to_string(),
            ..Default::default()
        });

        let mut stream = self.client.logs(name, options);
        let mut lines = Vec::new();
        while let Some(result) = stream.next().await {
            match result {
                Ok(output) => lines.push(log_output_line(output)),
                Err(e) => return Err(not_found_as(name, e)),
            }
        }
        Ok(lines)
    }

    /// One stats snapshot for the container.
    pub async fn container_stats(
        &self,
        name: &str,
    ) -> Result<ContainerStatsResponse, DockerError> {
        let options = Some(StatsOptions {
            stream: false,
            ..Default::default()
        });
        let mut stream = self.client.stats(name, options);
        match stream.next().await {
            Some(Ok(stats)) => Ok(stats),
            Some(Err(e)) => Err(not_found_as(name, e)),
            None => Err(DockerError::ContainerNotFound(name.to_string())),
        }
    }

    /// Recreate a container with a new image, preserving its name, env and
    /// host configuration. Returns the new container id.
    pub async fn replace_container(
        &self,
        name: &str,
        new_image: &str,
    ) -> Result<String, DockerError> {
        let inspect = self.inspect_container(name).await?;

        let env = inspect.config.as_ref().and_then(|c| c.env.clone());
        let exposed_ports = inspect.config.as_ref().and_then(|c| c.exposed_ports.clone());
        let host_config = inspect.host_config.clone();

        self.stop_container(name, Some(5)).await?;
        self.remove_container(name, true).await?;

        let body = ContainerCreateBody {
            image: Some(new_image.to_string()),
            env,
            exposed_ports,
            host_config,
            ..Default::default()
        };
        let created = self.create_container(name, body).await?;
        self.start_container(name).await?;
        Ok(created.id)
    }
}

/// Flatten a bollard `LogOutput` chunk into one lossy UTF-8 line.
fn log_output_line(output: LogOutput) -> String {
    let bytes = match output {
        LogOutput::StdOut { message } => message,
        LogOutput::StdErr { message } => message,
        LogOutput::StdIn { message } => message,
        LogOutput::Console { message } => message,
    };
    String::from_utf8_lossy(&bytes).trim_end().to_string()
}
