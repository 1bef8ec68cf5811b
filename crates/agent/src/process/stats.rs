//! System-wide statistics report published to the cloud every 5 minutes.
//!
//! Keys are deliberately short: the whole report has to fit a 256 KiB
//! telemetry envelope.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::process::manager::ProcessManager;

/// Containers whose name contains one of these run the agent itself and
/// are excluded from the report.
const INFRA_TOKENS: &[&str] = &["chrysedgeportal", "chrysedgeserver", "redis"];

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct AllProcessStats {
    /// Gateway id.
    #[serde(rename = "gw")]
    pub gateway_id: String,
    /// Total containers.
    #[serde(rename = "c")]
    pub containers: i64,
    #[serde(rename = "cr")]
    pub containers_running: i64,
    #[serde(rename = "cs")]
    pub containers_stopped: i64,
    #[serde(rename = "is")]
    pub total_image_size: i64,
    #[serde(rename = "ia")]
    pub active_images: i64,
    #[serde(rename = "va")]
    pub total_active_volumes: i64,
    #[serde(rename = "vs")]
    pub total_volume_size: i64,
    #[serde(rename = "sts")]
    pub container_stats: Vec<ProcessStats>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ProcessStats {
    #[serde(rename = "it")]
    pub image_tag: String,
    #[serde(rename = "n")]
    pub name: String,
    /// CPU usage percent.
    #[serde(rename = "cp")]
    pub cpu: i64,
    #[serde(rename = "nr")]
    pub num_restarts: i64,
    /// Memory usage percent.
    #[serde(rename = "m")]
    pub memory: i64,
    #[serde(rename = "x")]
    pub network_rx: i64,
    #[serde(rename = "t")]
    pub network_tx: i64,
    #[serde(rename = "s")]
    pub status: String,
}

impl ProcessManager {
    /// One report covering host-wide counts and per-container usage.
    pub async fn stats_all(&self, gateway_id: &str) -> Result<AllProcessStats> {
        let info = self.docker().system_info().await?;
        let usage = self.docker().disk_usage().await?;

        let mut stats = AllProcessStats {
            gateway_id: gateway_id.to_string(),
            containers: info.containers.unwrap_or(0),
            containers_running: info.containers_running.unwrap_or(0),
            containers_stopped: info.containers_stopped.unwrap_or(0),
            ..Default::default()
        };

        if let Some(images) = usage.images.as_ref() {
            for image in images {
                stats.active_images += image.containers;
                stats.total_image_size += image.shared_size;
            }
        }
        if let Some(volumes) = usage.volumes.as_ref() {
            for volume in volumes {
                if let Some(data) = volume.usage_data.as_ref() {
                    stats.total_active_volumes += data.ref_count;
                    stats.total_volume_size += data.size;
                }
            }
        }

        for process in self.list().await? {
            if INFRA_TOKENS.iter().any(|t| process.name.contains(t)) {
                continue;
            }

            let inspect = match self.docker().inspect_container(&process.name).await {
                Ok(inspect) => inspect,
                Err(e) => {
                    warn!(name = %process.name, error = %e, "skipping stats for container");
                    continue;
                }
            };
            let raw = match self.docker().container_stats(&process.name).await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(name = %process.name, error = %e, "failed to read container stats");
                    continue;
                }
            };

            let exit_code = inspect
                .state
                .as_ref()
                .and_then(|s| s.exit_code)
                .unwrap_or(0);
            let num_restarts = if exit_code > 0 {
                inspect.restart_count.unwrap_or(0)
            } else {
                0
            };
            let status = inspect
                .state
                .as_ref()
                .and_then(|s| s.status)
                .map(|s| s.to_string())
                .unwrap_or_default();

            let (rx, tx) = network_totals(&raw);
            stats.container_stats.push(ProcessStats {
                image_tag: process.image_tag.clone(),
                name: process.name.clone(),
                cpu: cpu_percent(&raw) as i64,
                num_restarts,
                memory: memory_percent(&raw) as i64,
                network_rx: rx,
                network_tx: tx,
                status,
            });
        }

        Ok(stats)
    }
}

/// CPU percentage from a stats snapshot.
/// Formula: ((total_usage_delta / system_usage_delta) * num_cpus) * 100
pub fn cpu_percent(stats: &bollard::models::ContainerStatsResponse) -> f64 {
    let cpu_stats = match &stats.cpu_stats {
        Some(cpu) => cpu,
        None => return 0.0,
    };
    let precpu_stats = match &stats.precpu_stats {
        Some(precpu) => precpu,
        None => return 0.0,
    };

    let cpu_total = cpu_stats
        .cpu_usage
        .as_ref()
        .and_then(|u| u.total_usage)
        .unwrap_or(0);
    let precpu_total = precpu_stats
        .cpu_usage
        .as_ref()
        .and_then(|u| u.total_usage)
        .unwrap_or(0);

    let cpu_delta = cpu_total.saturating_sub(precpu_total) as f64;

    let sys_current = cpu_stats.system_cpu_usage.unwrap_or(0);
    let sys_previous = precpu_stats.system_cpu_usage.unwrap_or(0);
    let system_delta = sys_current.saturating_sub(sys_previous) as f64;

    if system_delta > 0.0 && cpu_delta > 0.0 {
        let num_cpus = cpu_stats.online_cpus.unwrap_or(1).max(1) as f64;
        let pct = (cpu_delta / system_delta) * num_cpus * 100.0;
        if pct.is_finite() {
            pct
        } else {
            0.0
        }
    } else {
        0.0
    }
}

pub fn memory_percent(stats: &bollard::models::ContainerStatsResponse) -> f64 {
    let mem = match &stats.memory_stats {
        Some(mem) => mem,
        None => return 0.0,
    };
    let usage = mem.usage.unwrap_or(0);
    let limit = mem.limit.unwrap_or(0);
    if limit > 0 {
        (usage as f64 / limit as f64) * 100.0
    } else {
        0.0
    }
}

/// Total bytes received/sent across all interfaces.
pub fn network_totals(stats: &bollard::models::ContainerStatsResponse) -> (i64, i64) {
    let mut rx = 0i64;
    let mut tx = 0i64;
    if let Some(networks) = stats.networks.as_ref() {
        for net in networks.values() {
            rx += net.rx_bytes.unwrap_or(0) as i64;
            tx += net.tx_bytes.unwrap_or(0) as i64;
        }
    }
    (rx, tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{
        ContainerCpuStats, ContainerCpuUsage, ContainerMemoryStats, ContainerNetworkStats,
        ContainerStatsResponse,
    };
    use std::collections::HashMap;

    fn stats_with_cpu(
        cpu_total: u64,
        precpu_total: u64,
        sys_total: u64,
        presys_total: u64,
        online_cpus: u32,
    ) -> ContainerStatsResponse {
        ContainerStatsResponse {
            cpu_stats: Some(ContainerCpuStats {
                cpu_usage: Some(ContainerCpuUsage {
                    total_usage: Some(cpu_total),
                    ..Default::default()
                }),
                system_cpu_usage: Some(sys_total),
                online_cpus: Some(online_cpus),
                ..Default::default()
            }),
            precpu_stats: Some(ContainerCpuStats {
                cpu_usage: Some(ContainerCpuUsage {
                    total_usage: Some(precpu_total),
                    ..Default::default()
                }),
                system_cpu_usage: Some(presys_total),
                online_cpus: Some(online_cpus),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn cpu_percent_normal_case() {
        let stats = stats_with_cpu(200_000_000, 100_000_000, 2_000_000_000, 1_800_000_000, 1);
        let pct = cpu_percent(&stats);
        assert!((pct - 50.0).abs() < 0.01, "expected ~50%, got {}", pct);
    }

    #[test]
    fn cpu_percent_counter_reset_is_zero() {
        let stats = stats_with_cpu(50, 100, 2_000, 1_800, 1);
        assert_eq!(cpu_percent(&stats), 0.0);
    }

    #[test]
    fn cpu_percent_missing_blocks_is_zero() {
        assert_eq!(cpu_percent(&ContainerStatsResponse::default()), 0.0);
    }

    #[test]
    fn memory_percent_zero_limit_is_zero() {
        let stats = ContainerStatsResponse {
            memory_stats: Some(ContainerMemoryStats {
                usage: Some(1024),
                limit: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(memory_percent(&stats), 0.0);
    }

    #[test]
    fn memory_percent_computed() {
        let stats = ContainerStatsResponse {
            memory_stats: Some(ContainerMemoryStats {
                usage: Some(100),
                limit: Some(400),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!((memory_percent(&stats) - 25.0).abs() < 0.001);
    }

    #[test]
    fn network_totals_sum_interfaces() {
        let mut networks = HashMap::new();
        networks.insert(
            "eth0".to_string(),
            ContainerNetworkStats {
                rx_bytes: Some(100),
                tx_bytes: Some(200),
                ..Default::default()
            },
        );
        networks.insert(
            "lo".to_string(),
            ContainerNetworkStats {
                rx_bytes: Some(1),
                tx_bytes: Some(2),
                ..Default::default()
            },
        );
        let stats = ContainerStatsResponse {
            networks: Some(networks),
            ..Default::default()
        };
        assert_eq!(network_totals(&stats), (101, 202));
    }

    #[test]
    fn stats_report_short_keys() {
        let report = AllProcessStats {
            gateway_id: "gw1".to_string(),
            containers: 3,
            ..Default::default()
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["gw"], "gw1");
        assert_eq!(value["c"], 3);
        assert!(value.get("sts").is_some());
    }
}
