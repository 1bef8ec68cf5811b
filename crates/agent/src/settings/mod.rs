//! Settings — edge credentials and cloud-issued identifiers.
//!
//! One durable row plus an in-memory credential cache. Readers never block
//! on the datastore once the cache is warm; writers refresh both.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::client::ContainerOps;
use crate::cloud::api::call_api_with_body;
use crate::error::{AgentError, Result};
use crate::store::{DurableMap, StoreError};

pub const PREFIX_SETTINGS: &str = "/settings/";
pub const SETTINGS_DEFAULT_KEY: &str = "default";

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Settings {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub edge_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub edge_secret: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub registry_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gateway_id: String,
    /// PEM bytes; write-once per rotation, used to mint JWTs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_rsa_key: Option<Vec<u8>>,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub modified: i64,
}

impl Settings {
    /// True when every field the cloud bridge needs is present.
    pub fn has_cloud_identity(&self) -> bool {
        !self.project_id.is_empty()
            && !self.region.is_empty()
            && !self.registry_id.is_empty()
            && !self.gateway_id.is_empty()
            && self.private_rsa_key.is_some()
    }
}

/// Credentials issued by the cloud at `POST /api/v1/edge/credentials`.
#[derive(Deserialize, Debug, Clone)]
pub struct EdgeConnectCredentials {
    #[serde(rename = "keyId", default)]
    pub key_id: String,
    #[serde(rename = "privateKeyPem")]
    pub private_key_pem: Vec<u8>,
    #[serde(rename = "registryId")]
    pub registry_id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "gatewayId")]
    pub gateway_id: String,
    pub region: String,
}

/// Host facts shipped with the credentials exchange.
#[derive(Serialize, Debug, Clone, Default)]
pub struct SystemReport {
    #[serde(rename = "ncpu")]
    pub num_cpus: i64,
    #[serde(rename = "architecture", skip_serializing_if = "String::is_empty")]
    pub architecture: String,
    #[serde(rename = "totalMemory")]
    pub total_memory: i64,
    #[serde(rename = "name", skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "id", skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "kernelVersion", skip_serializing_if = "String::is_empty")]
    pub kernel_version: String,
    #[serde(rename = "osType", skip_serializing_if = "String::is_empty")]
    pub os_type: String,
    #[serde(rename = "os", skip_serializing_if = "String::is_empty")]
    pub os: String,
    #[serde(rename = "dockerVersion", skip_serializing_if = "String::is_empty")]
    pub docker_version: String,
}

pub struct SettingsManager {
    store: DurableMap,
    docker: Arc<dyn ContainerOps>,
    http: reqwest::Client,
    api_endpoint: String,
    cache: RwLock<Option<(String, String)>>,
}

impl SettingsManager {
    pub fn new(store: DurableMap, docker: Arc<dyn ContainerOps>, api_endpoint: String) -> Self {
        SettingsManager {
            store,
            docker,
            http: reqwest::Client::new(),
            api_endpoint,
            cache: RwLock::new(None),
        }
    }

    /// Current settings; an empty default row when none were stored yet.
    pub fn get(&self) -> Result<Settings> {
        match self.store.get(PREFIX_SETTINGS, SETTINGS_DEFAULT_KEY) {
            Ok(row) => Ok(serde_json::from_slice(&row)?),
            Err(StoreError::KeyNotFound(_)) => Ok(Settings {
                name: SETTINGS_DEFAULT_KEY.to_string(),
                ..Default::default()
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the edge credentials and, when the cloud API is
    /// configured, exchange them for cloud-issued identifiers.
    pub async fn overwrite(&self, new: Settings) -> Result<Settings> {
        let mut settings = self.get()?;
        settings.name = SETTINGS_DEFAULT_KEY.to_string();
        settings.edge_key = new.edge_key;
        settings.edge_secret = new.edge_secret;
        if settings.created <= 0 {
            settings.created = chrono::Utc::now().timestamp_millis();
        }
        settings.modified = chrono::Utc::now().timestamp_millis();

        if !self.api_endpoint.is_empty()
            && !settings.edge_key.is_empty()
            && !settings.edge_secret.is_empty()
        {
            let issued = self.connect_to_cloud(&settings).await?;
            settings.project_id = issued.project_id;
            settings.region = issued.region;
            settings.registry_id = issued.registry_id;
            settings.gateway_id = issued.gateway_id;
            settings.private_rsa_key = Some(issued.private_key_pem);
        }

        self.persist(&settings)?;
        Ok(settings)
    }

    /// Persist a settings row and refresh the credential cache.
    pub fn persist(&self, settings: &Settings) -> Result<()> {
        let row = serde_json::to_vec(settings)?;
        self.store.put(PREFIX_SETTINGS, SETTINGS_DEFAULT_KEY, &row)?;
        *self.cache.write() = Some((settings.edge_key.clone(), settings.edge_secret.clone()));
        Ok(())
    }

    /// Edge key and secret, served from the cache when warm. Missing
    /// credentials are a validation error the caller reports synchronously.
    pub fn current_edge_credentials(&self) -> Result<(String, String)> {
        if let Some((key, secret)) = self.cache.read().clone() {
            if !key.is_empty() && !secret.is_empty() {
                return Ok((key, secret));
            }
        }
        let settings = self.get()?;
        if settings.edge_key.is_empty() || settings.edge_secret.is_empty() {
            return Err(AgentError::Validation(
                "edge key and secret are not configured".to_string(),
            ));
        }
        *self.cache.write() = Some((settings.edge_key.clone(), settings.edge_secret.clone()));
        Ok((settings.edge_key, settings.edge_secret))
    }

    /// Exchange edge credentials for the cloud-issued gateway identity.
    async fn connect_to_cloud(&self, settings: &Settings) -> Result<EdgeConnectCredentials> {
        let report = self.system_report().await;
        let url = format!("{}/api/v1/edge/credentials", self.api_endpoint);
        let body = call_api_with_body(
            &self.http,
            reqwest::Method::POST,
            &url,
            &report,
            &settings.edge_key,
            &settings.edge_secret,
        )
        .await?;
        let issued: EdgeConnectCredentials = serde_json::from_slice(&body)?;
        info!(gateway = %issued.gateway_id, "received cloud gateway identity");
        Ok(issued)
    }

    async fn system_report(&self) -> SystemReport {
        match self.docker.system_info().await {
            Ok(info) => SystemReport {
                num_cpus: info.ncpu.unwrap_or(0) as i64,
                architecture: info.architecture.unwrap_or_default(),
                total_memory: info.mem_total.unwrap_or(0),
                name: info.name.unwrap_or_default(),
                id: info.id.unwrap_or_default(),
                kernel_version: info.kernel_version.unwrap_or_default(),
                os_type: info.os_type.unwrap_or_default(),
                os: info.operating_system.unwrap_or_default(),
                docker_version: info.server_version.unwrap_or_default(),
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to gather system info for credentials call");
                SystemReport::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeDocker;

    fn manager() -> (SettingsManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = DurableMap::open(dir.path()).unwrap();
        let docker = Arc::new(FakeDocker::new());
        (
            SettingsManager::new(store, docker, String::new()),
            dir,
        )
    }

    #[test]
    fn get_returns_empty_default_row() {
        let (manager, _dir) = manager();
        let settings = manager.get().unwrap();
        assert_eq!(settings.name, SETTINGS_DEFAULT_KEY);
        assert!(settings.edge_key.is_empty());
        assert!(!settings.has_cloud_identity());
    }

    #[tokio::test]
    async fn overwrite_persists_and_caches_credentials() {
        let (manager, _dir) = manager();
        let written = manager
            .overwrite(Settings {
                edge_key: "key1".to_string(),
                edge_secret: "secret1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(written.created > 0);

        let (key, secret) = manager.current_edge_credentials().unwrap();
        assert_eq!(key, "key1");
        assert_eq!(secret, "secret1");

        let reread = manager.get().unwrap();
        assert_eq!(reread.edge_key, "key1");
    }

    #[test]
    fn missing_credentials_is_validation_error() {
        let (manager, _dir) = manager();
        assert!(matches!(
            manager.current_edge_credentials(),
            Err(AgentError::Validation(_))
        ));
    }

    #[test]
    fn cloud_identity_requires_every_field() {
        let mut settings = Settings {
            project_id: "p".to_string(),
            region: "r".to_string(),
            registry_id: "reg".to_string(),
            gateway_id: "gw".to_string(),
            private_rsa_key: Some(vec![1, 2, 3]),
            ..Default::default()
        };
        assert!(settings.has_cloud_identity());
        settings.gateway_id.clear();
        assert!(!settings.has_cloud_identity());
    }
}
