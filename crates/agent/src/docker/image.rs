//! Image domain — list and pull.

use super::client::{DockerClient, DockerError};
use bollard::query_parameters::{CreateImageOptions, ListImagesOptions};
use futures_util::stream::StreamExt;

impl DockerClient {
    /// List all images on the Docker host.
    pub async fn list_images(&self) -> Result<Vec<bollard::models::ImageSummary>, DockerError> {
        let options = Some(ListImagesOptions {
            all: false,
            ..Default::default()
        });
        self.client
            .list_images(options)
            .await
            .map_err(DockerError::from)
    }

    /// Pull an image from a registry. Returns when the pull is complete.
    pub async fn pull_image(&self, image: &str, tag: &str) -> Result<(), DockerError> {
        let options = Some(CreateImageOptions {
            from_image: Some(image.to_string()),
            tag: Some(tag.to_string()),
            ..Default::default()
        });

        let mut stream = self.client.create_image(options, None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    tracing::debug!(status = ?info.status, "Image pull progress");
                }
                Err(bollard::errors::Error::DockerResponseServerError {
                    status_code: 404, ..
                }) => {
                    return Err(DockerError::ImageNotFound(format!("{}:{}", image, tag)));
                }
                Err(e) => return Err(DockerError::from(e)),
            }
        }

        Ok(())
    }
}
