//! Agent-wide error kinds.
//!
//! Every component surfaces one of these kinds; the REST and gRPC adapters
//! map them onto status codes in one place (`rest::error_map`, `rpc::map`).

use thiserror::Error;

use crate::docker::client::DockerError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AgentError {
    /// Malformed input, missing required field, range violation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No container exists for the given name.
    #[error("process not found: {0}")]
    NotFound(String),

    /// Container exists but the datastore row is gone.
    #[error("process not found in datastore: {0}")]
    NotFoundStored(String),

    /// Name already in use or concurrent operation on the same name.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Cloud rejected the credentials (HTTP 401/403).
    #[error("permission denied by cloud")]
    Permission,

    /// Network/broker/runtime error expected to self-heal.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Local dependency cannot be initialised; the process exits non-zero.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Docker(DockerError),
}

impl From<DockerError> for AgentError {
    fn from(err: DockerError) -> Self {
        match err {
            DockerError::ContainerNotFound(name) => AgentError::NotFound(name),
            DockerError::ImageNotFound(reference) => AgentError::NotFound(reference),
            DockerError::Conflict(name) => AgentError::Conflict(name),
            other => AgentError::Docker(other),
        }
    }
}

impl From<redis::RedisError> for AgentError {
    fn from(err: redis::RedisError) -> Self {
        AgentError::Transient(format!("redis: {}", err))
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Transient(format!("serialization: {}", err))
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Transient(format!("http: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_not_found_becomes_not_found() {
        let err: AgentError = DockerError::ContainerNotFound("cam1".to_string()).into();
        assert!(matches!(err, AgentError::NotFound(name) if name == "cam1"));
    }

    #[test]
    fn docker_connection_stays_docker() {
        let err: AgentError = DockerError::ConnectionFailed("socket gone".to_string()).into();
        assert!(matches!(err, AgentError::Docker(_)));
    }
}
