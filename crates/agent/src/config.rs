//! Agent configuration — yaml file plus environment overrides.
//!
//! The file path comes from `--config`; missing file means defaults. A few
//! critical values can always be overridden from the environment so the
//! container image works without a mounted config.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// REST bind address.
    pub http_bind_address: String,
    /// gRPC bind address.
    pub grpc_bind_address: String,
    /// Docker socket path; empty means the platform default.
    pub docker_socket: String,
    /// Directory for the embedded datastore.
    pub data_dir: PathBuf,
    pub redis: RedisConfig,
    pub buffer: BufferConfig,
    pub annotation: AnnotationConfig,
    pub api: ApiConfig,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// `host:port` of the shared redis instance.
    pub connection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Target in-memory ring length (frames) handed to camera workers.
    pub in_memory: usize,
    /// Optional downscale hint handed to camera workers.
    pub in_memory_scale: Option<String>,
    /// Enable the on-disk segmenter and its janitor.
    pub on_disk: bool,
    pub on_disk_folder: String,
    /// Retention, e.g. `24h`, `30m`, `7d`.
    pub on_disk_cleanup_older_than: String,
    /// Cron expression for the janitor.
    pub on_disk_schedule: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// Cloud annotation endpoint; empty disables shipping.
    pub endpoint: String,
    pub max_batch: usize,
    pub poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Cloud REST API base, e.g. `https://api.example.com`.
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            http_bind_address: "0.0.0.0:8080".to_string(),
            grpc_bind_address: "0.0.0.0:50001".to_string(),
            docker_socket: String::new(),
            data_dir: PathBuf::from("/data/chrysalis"),
            redis: RedisConfig::default(),
            buffer: BufferConfig::default(),
            annotation: AnnotationConfig::default(),
            api: ApiConfig::default(),
            mqtt: MqttConfig::default(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            connection: "redis:6379".to_string(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            in_memory: 100,
            in_memory_scale: None,
            on_disk: false,
            on_disk_folder: "/data/buffer".to_string(),
            on_disk_cleanup_older_than: "24h".to_string(),
            on_disk_schedule: "0 0 * * * *".to_string(),
        }
    }
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            max_batch: 100,
            poll_ms: 100,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "mqtt.googleapis.com".to_string(),
            broker_port: 8883,
        }
    }
}

impl AgentConfig {
    /// Load configuration from an optional yaml file, then apply
    /// environment overrides for critical values.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = match path {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "loading configuration file");
                let contents = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&contents)?
            }
            Some(path) => {
                tracing::info!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        if let Ok(socket) = std::env::var("DOCKER_SOCKET") {
            config.docker_socket = socket;
        }
        if let Ok(redis) = std::env::var("REDIS_CONNECTION") {
            config.redis.connection = redis;
        }
        if let Ok(dir) = std::env::var("AGENT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.http_bind_address.is_empty() {
            return Err("http_bind_address must not be empty".to_string());
        }
        if self.grpc_bind_address.is_empty() {
            return Err("grpc_bind_address must not be empty".to_string());
        }
        if self.redis.connection.split(':').count() != 2 {
            return Err(format!(
                "redis connection must be host:port, got {}",
                self.redis.connection
            ));
        }
        if self.annotation.max_batch == 0 {
            return Err("annotation.max_batch must be > 0".to_string());
        }
        if self.buffer.on_disk {
            if self.buffer.on_disk_folder.is_empty() {
                return Err("buffer.on_disk_folder required when on_disk enabled".to_string());
            }
            parse_retention(&self.buffer.on_disk_cleanup_older_than)?;
        }
        Ok(())
    }

    /// Worker-facing environment variables for a camera container.
    pub fn camera_env(&self, name: &str, rtsp: &str, rtmp: Option<&str>) -> Vec<String> {
        let mut env = vec![
            format!("rtsp_endpoint={}", rtsp),
            format!("device_id={}", name),
            format!("in_memory_buffer={}", self.buffer.in_memory),
        ];
        if let Some(rtmp) = rtmp.filter(|r| !r.is_empty()) {
            env.push(format!("rtmp_endpoint={}", rtmp));
        }
        if self.buffer.on_disk {
            env.push(format!("disk_buffer_path={}", self.buffer.on_disk_folder));
            env.push(format!(
                "disk_cleanup_rate={}",
                self.buffer.on_disk_cleanup_older_than
            ));
        }
        let mut split = self.redis.connection.splitn(2, ':');
        if let (Some(host), Some(port)) = (split.next(), split.next()) {
            env.push(format!("redis_host={}", host));
            env.push(format!("redis_port={}", port));
        }
        if let Some(scale) = &self.buffer.in_memory_scale {
            env.push(format!("memory_scale={}", scale));
        }
        env.push("PYTHONUNBUFFERED=0".to_string());
        env
    }

    /// `HashMap` view of the redis connection for url building.
    pub fn redis_url(&self) -> String {
        format!("redis://{}", self.redis.connection)
    }

    pub fn retention(&self) -> Result<Duration, String> {
        parse_retention(&self.buffer.on_disk_cleanup_older_than)
    }
}

/// Parse a retention spec like `90s`, `30m`, `24h` or `7d`.
pub fn parse_retention(spec: &str) -> Result<Duration, String> {
    let spec = spec.trim();
    if spec.len() < 2 {
        return Err(format!("invalid retention: {}", spec));
    }
    let (number, unit) = spec.split_at(spec.len() - 1);
    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid retention: {}", spec))?;
    let seconds = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        "d" => value * 86400,
        _ => return Err(format!("invalid retention unit: {}", spec)),
    };
    Ok(Duration::from_secs(seconds))
}

/// Parse `"name=value"` pairs (the command envelope array format).
pub fn parse_pairs(pairs: &[String]) -> HashMap<String, String> {
    pairs
        .iter()
        .filter_map(|pair| {
            pair.split_once('=')
                .map(|(name, value)| (name.to_string(), value.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AgentConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.redis_url(), "redis://redis:6379");
    }

    #[test]
    fn bad_redis_connection_rejected() {
        let mut config = AgentConfig::default();
        config.redis.connection = "redis".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn camera_env_contains_required_vars() {
        let config = AgentConfig::default();
        let env = config.camera_env("cam1", "rtsp://u/p", Some("rtmp://c/k"));
        assert!(env.contains(&"rtsp_endpoint=rtsp://u/p".to_string()));
        assert!(env.contains(&"device_id=cam1".to_string()));
        assert!(env.contains(&"in_memory_buffer=100".to_string()));
        assert!(env.contains(&"rtmp_endpoint=rtmp://c/k".to_string()));
        assert!(env.contains(&"redis_host=redis".to_string()));
        assert!(env.contains(&"redis_port=6379".to_string()));
    }

    #[test]
    fn camera_env_skips_optional_vars() {
        let config = AgentConfig::default();
        let env = config.camera_env("cam1", "rtsp://u/p", None);
        assert!(!env.iter().any(|e| e.starts_with("rtmp_endpoint=")));
        assert!(!env.iter().any(|e| e.starts_with("disk_buffer_path=")));
        assert!(!env.iter().any(|e| e.starts_with("memory_scale=")));
    }

    #[test]
    fn retention_parsing() {
        assert_eq!(parse_retention("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_retention("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_retention("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_retention("7d").unwrap(), Duration::from_secs(604800));
        assert!(parse_retention("x").is_err());
        assert!(parse_retention("10w").is_err());
    }

    #[test]
    fn pair_parsing_ignores_malformed() {
        let pairs = vec![
            "a=1".to_string(),
            "broken".to_string(),
            "b=two=three".to_string(),
        ];
        let map = parse_pairs(&pairs);
        assert_eq!(map.get("a").map(String::as_str), Some("1"));
        assert_eq!(map.get("b").map(String::as_str), Some("two=three"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn yaml_roundtrip() {
        let config = AgentConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: AgentConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.http_bind_address, config.http_bind_address);
        assert_eq!(back.buffer.in_memory, config.buffer.in_memory);
    }
}
