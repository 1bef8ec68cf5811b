//! Image resolver — highest local/remote versions per repo and the
//! "currently selected version per kind" pin used by `start`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::ContainerOps;
use crate::error::{AgentError, Result};
use crate::store::{DurableMap, StoreError};

/// Default camera worker repo.
pub const CAMERA_REPO: &str = "chryscloud/chrysedgeproxy";
/// Kind key for the camera pin row.
pub const KIND_RTSP: &str = "rtsp";

pub const PREFIX_DOCKER_TAG_SETTINGS: &str = "/dockertagsettings/";

const DEFAULT_REGISTRY_BASE: &str = "https://hub.docker.com";

/// Derived record describing local/remote image availability for one repo.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ImageUpgrade {
    pub has_upgrade: bool,
    pub has_image: bool,
    /// Repo name, e.g. `chryscloud/chrysedgeproxy`.
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_version: String,
    #[serde(default)]
    pub highest_remote_version: String,
    pub camera_type: String,
}

/// Persisted pin: the version the next `start` uses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SettingDockerTagVersion {
    pub tag: String,
    pub version: String,
    pub camera_type: String,
}

pub struct ImageResolver {
    docker: Arc<dyn ContainerOps>,
    store: DurableMap,
    http: reqwest::Client,
    registry_base: String,
}

impl ImageResolver {
    pub fn new(docker: Arc<dyn ContainerOps>, store: DurableMap) -> Self {
        ImageResolver {
            docker,
            store,
            http: reqwest::Client::new(),
            registry_base: DEFAULT_REGISTRY_BASE.to_string(),
        }
    }

    /// Highest parseable local SemVer under `repo`, if any image exists.
    pub async fn local_record(&self, repo: &str, camera_type: &str) -> Result<ImageUpgrade> {
        let images = self.docker.list_images().await?;
        let versions = images
            .iter()
            .flat_map(|image| image.repo_tags.iter())
            .filter_map(|tag| tag.strip_prefix(&format!("{}:", repo)));
        let highest = highest_semver(versions);

        Ok(ImageUpgrade {
            has_image: highest.is_some(),
            current_version: highest.map(|v| v.to_string()).unwrap_or_default(),
            name: repo.to_string(),
            camera_type: camera_type.to_string(),
            ..Default::default()
        })
    }

    /// Local record plus the remote registry's highest tag. Remote lookup
    /// failures degrade to a local-only record.
    pub async fn describe(&self, repo: &str, camera_type: &str) -> Result<ImageUpgrade> {
        let mut record = self.local_record(repo, camera_type).await?;

        match self.remote_highest(repo).await {
            Ok(Some(remote)) => {
                record.has_upgrade = if record.has_image {
                    match semver::Version::parse(&record.current_version) {
                        Ok(local) => remote > local,
                        Err(_) => false,
                    }
                } else {
                    true
                };
                record.highest_remote_version = remote.to_string();
            }
            Ok(None) => {}
            Err(e) => warn!(repo, error = %e, "remote tag listing failed"),
        }

        Ok(record)
    }

    /// Highest parseable SemVer tag in the remote registry.
    pub async fn remote_highest(&self, repo: &str) -> Result<Option<semver::Version>> {
        #[derive(Deserialize)]
        struct TagPage {
            results: Vec<TagEntry>,
        }
        #[derive(Deserialize)]
        struct TagEntry {
            name: String,
        }

        let url = format!(
            "{}/v2/repositories/{}/tags?page_size=100",
            self.registry_base, repo
        );
        let page: TagPage = self.http.get(&url).send().await?.json().await?;
        Ok(highest_semver(page.results.iter().map(|t| t.name.as_str())))
    }

    /// The image reference the next camera `start` must use, pulling the
    /// image when none exists locally. Rewrites the pin row whenever the
    /// local set disagrees with it.
    pub async fn ensure_camera_image(&self) -> Result<String> {
        let mut record = self.local_record(CAMERA_REPO, KIND_RTSP).await?;

        if !record.has_image {
            let remote = self.remote_highest(CAMERA_REPO).await?.ok_or_else(|| {
                AgentError::Validation(
                    "no camera image found locally or in the registry".to_string(),
                )
            })?;
            info!(version = %remote, "pulling camera image");
            self.docker
                .pull_image(CAMERA_REPO, &remote.to_string())
                .await?;
            record.current_version = remote.to_string();
        }

        let pin = match self.read_pin(KIND_RTSP) {
            Ok(pin) => pin,
            Err(AgentError::Store(StoreError::KeyNotFound(_))) => {
                let pin = SettingDockerTagVersion {
                    tag: CAMERA_REPO.to_string(),
                    version: record.current_version.clone(),
                    camera_type: KIND_RTSP.to_string(),
                };
                self.write_pin(&pin)?;
                pin
            }
            Err(e) => return Err(e),
        };

        // The local image set is the source of truth; a stale pin usually
        // means the operator deleted the newer image manually.
        let pin = if pin.version != record.current_version {
            let updated = SettingDockerTagVersion {
                version: record.current_version.clone(),
                ..pin
            };
            self.write_pin(&updated)?;
            updated
        } else {
            pin
        };

        Ok(format!("{}:{}", pin.tag, pin.version))
    }

    /// Pull `repo:version`, updating the camera pin when it is the camera
    /// repo.
    pub async fn pull(&self, repo: &str, version: &str) -> Result<()> {
        self.docker.pull_image(repo, version).await?;
        if repo == CAMERA_REPO {
            self.write_pin(&SettingDockerTagVersion {
                tag: repo.to_string(),
                version: version.to_string(),
                camera_type: KIND_RTSP.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn read_pin(&self, camera_type: &str) -> Result<SettingDockerTagVersion> {
        let row = self.store.get(PREFIX_DOCKER_TAG_SETTINGS, camera_type)?;
        Ok(serde_json::from_slice(&row)?)
    }

    fn write_pin(&self, pin: &SettingDockerTagVersion) -> Result<()> {
        let row = serde_json::to_vec(pin)?;
        self.store
            .put(PREFIX_DOCKER_TAG_SETTINGS, &pin.camera_type, &row)?;
        Ok(())
    }
}

/// Highest parseable SemVer among `tags`; unparseable tags are skipped.
pub fn highest_semver<'a>(tags: impl Iterator<Item = &'a str>) -> Option<semver::Version> {
    tags.filter_map(|tag| semver::Version::parse(tag).ok())
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeDocker;

    fn temp_store() -> (DurableMap, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (DurableMap::open(dir.path()).unwrap(), dir)
    }

    #[test]
    fn highest_semver_skips_garbage() {
        let tags = ["1.0.0", "latest", "1.2.0", "not-a-version", "0.9.9"];
        let highest = highest_semver(tags.iter().copied()).unwrap();
        assert_eq!(highest.to_string(), "1.2.0");
    }

    #[test]
    fn highest_semver_empty_is_none() {
        assert!(highest_semver(["latest"].iter().copied()).is_none());
    }

    #[tokio::test]
    async fn local_record_reports_highest() {
        let docker = Arc::new(FakeDocker::new());
        docker.add_image("chryscloud/chrysedgeproxy:1.0.0").await;
        docker.add_image("chryscloud/chrysedgeproxy:1.1.0").await;
        docker.add_image("other/repo:9.9.9").await;
        let (store, _dir) = temp_store();

        let resolver = ImageResolver::new(docker, store);
        let record = resolver.local_record(CAMERA_REPO, KIND_RTSP).await.unwrap();
        assert!(record.has_image);
        assert_eq!(record.current_version, "1.1.0");
    }

    #[tokio::test]
    async fn ensure_camera_image_pins_local_highest() {
        let docker = Arc::new(FakeDocker::new());
        docker.add_image("chryscloud/chrysedgeproxy:1.0.0").await;
        let (store, _dir) = temp_store();

        let resolver = ImageResolver::new(docker, store);
        let tag = resolver.ensure_camera_image().await.unwrap();
        assert_eq!(tag, "chryscloud/chrysedgeproxy:1.0.0");

        let pin = resolver.read_pin(KIND_RTSP).unwrap();
        assert_eq!(pin.version, "1.0.0");
        assert_eq!(pin.tag, CAMERA_REPO);
    }

    #[tokio::test]
    async fn stale_pin_rewritten_from_local_set() {
        let docker = Arc::new(FakeDocker::new());
        docker.add_image("chryscloud/chrysedgeproxy:1.2.0").await;
        let (store, _dir) = temp_store();

        let resolver = ImageResolver::new(docker, store.clone());
        store
            .put(
                PREFIX_DOCKER_TAG_SETTINGS,
                KIND_RTSP,
                &serde_json::to_vec(&SettingDockerTagVersion {
                    tag: CAMERA_REPO.to_string(),
                    version: "1.0.0".to_string(),
                    camera_type: KIND_RTSP.to_string(),
                })
                .unwrap(),
            )
            .unwrap();

        let tag = resolver.ensure_camera_image().await.unwrap();
        assert_eq!(tag, "chryscloud/chrysedgeproxy:1.2.0");
        assert_eq!(resolver.read_pin(KIND_RTSP).unwrap().version, "1.2.0");
    }

    #[tokio::test]
    async fn pull_updates_camera_pin() {
        let docker = Arc::new(FakeDocker::new());
        docker.add_pullable("chryscloud/chrysedgeproxy:2.0.0").await;
        let (store, _dir) = temp_store();

        let resolver = ImageResolver::new(docker.clone(), store);
        resolver.pull(CAMERA_REPO, "2.0.0").await.unwrap();
        assert_eq!(resolver.read_pin(KIND_RTSP).unwrap().version, "2.0.0");
    }
}
