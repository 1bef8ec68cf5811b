//! Upgrade detection and in-place container replacement for cameras.

use tracing::warn;

use crate::error::{AgentError, Result};
use crate::images::ImageUpgrade;
use crate::process::manager::ProcessManager;
use crate::process::model::{CameraProcess, PREFIX_RTSP_PROCESS};

impl ProcessManager {
    /// Compare every camera's pinned version to the highest local version.
    /// Processes with a greater local version get `upgrade_available` and
    /// `newer_version` set; unparseable tags are skipped, not fatal.
    pub async fn find_upgrades(&self, record: &ImageUpgrade) -> Result<Vec<CameraProcess>> {
        let processes = self.list().await?;

        if record.current_version.is_empty() {
            return Ok(Vec::new());
        }
        let current = semver::Version::parse(&record.current_version).map_err(|e| {
            AgentError::Validation(format!(
                "current version {} is not semver: {}",
                record.current_version, e
            ))
        })?;

        let mut out = Vec::new();
        for mut process in processes {
            let Some((_, version)) = process.image_tag.split_once(':') else {
                out.push(process);
                continue;
            };
            match semver::Version::parse(version) {
                Ok(running) => {
                    if current > running {
                        process.upgrade_available = true;
                        process.newer_version = Some(current.to_string());
                    }
                    out.push(process);
                }
                Err(e) => {
                    warn!(version, error = %e, "skipping unparseable process version");
                    continue;
                }
            }
        }
        Ok(out)
    }

    /// Replace a running camera container with `new_image`, preserving its
    /// name, env and binds. The image must already exist locally.
    pub async fn upgrade(&self, name: &str, new_image: &str) -> Result<CameraProcess> {
        let images = self.docker().list_images().await?;
        let present = images
            .iter()
            .any(|image| image.repo_tags.iter().any(|tag| tag == new_image));
        if !present {
            return Err(AgentError::Validation(format!(
                "new image version does not exist locally: {}",
                new_image
            )));
        }

        let containers = self.docker().list_containers().await?;
        let wanted = format!("/{}", name);
        let found = containers.iter().any(|container| {
            container
                .names
                .as_ref()
                .is_some_and(|names| names.iter().any(|n| n == &wanted))
        });
        if !found {
            return Err(AgentError::NotFound(name.to_string()));
        }

        let row = self
            .store()
            .get(PREFIX_RTSP_PROCESS, name)
            .map_err(|_| AgentError::NotFound(name.to_string()))?;
        let mut process: CameraProcess = serde_json::from_slice(&row)?;

        let new_id = self.docker().replace_container(name, new_image).await?;

        process.image_tag = new_image.to_string();
        process.container_id = Some(new_id);
        process.upgrade_available = false;
        process.newer_version = None;
        process.modified = chrono::Utc::now().timestamp_millis();

        let row = serde_json::to_vec(&process)?;
        self.store().put(PREFIX_RTSP_PROCESS, name, &row)?;

        Ok(process)
    }
}
