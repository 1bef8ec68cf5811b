//! System domain — host-wide info and disk usage, used by stats reporting
//! and the cloud credentials exchange.

use super::client::{DockerClient, DockerError};

impl DockerClient {
    /// Docker system information (container counts, cpus, memory, versions).
    pub async fn system_info(&self) -> Result<bollard::models::SystemInfo, DockerError> {
        self.client.info().await.map_err(DockerError::from)
    }

    /// Disk usage: image, container and volume space accounting.
    pub async fn disk_usage(
        &self,
    ) -> Result<bollard::models::SystemDataUsageResponse, DockerError> {
        self.client.df(None).await.map_err(DockerError::from)
    }
}
