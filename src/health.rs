use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{Config, DeviceSelection};
use crate::metrics::{HealthStatus, Metrics, MetricsCollector};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetailedStatus {
    pub health: String,
    pub timestamp: String,
    pub metrics: Metrics,
    pub acceptance_rate: f64,
    pub config_summary: ConfigSummary,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub work_url: String,
    pub intensity: u32,
    pub device_type: DeviceSelection,
    pub work_refresh_ms: u64,
    pub submit_workers: usize,
    pub discard_stale_work: bool,
}

pub struct HealthChecker {
    metrics: Arc<MetricsCollector>,
    config: Config,
}

impl HealthChecker {
    pub fn new(metrics: Arc<MetricsCollector>, config: Config) -> Self {
        Self { metrics, config }
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn get_health(&self) -> HealthResponse {
        HealthResponse {
            status: self.metrics.get_health_status().to_string(),
            uptime_seconds: self.metrics.get_metrics().uptime_seconds,
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.metrics.get_health_status(), HealthStatus::Healthy)
    }

    pub fn get_detailed_status(&self) -> DetailedStatus {
        let metrics = self.metrics.get_metrics();
        let submitted = metrics.submissions_accepted + metrics.submissions_failed;
        let acceptance_rate = if submitted > 0 {
            metrics.submissions_accepted as f64 / submitted as f64
        } else {
            0.0
        };

        DetailedStatus {
            health: self.metrics.get_health_status().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            metrics,
            acceptance_rate,
            config_summary: ConfigSummary {
                work_url: self.config.work_url.clone(),
                intensity: self.config.intensity,
                device_type: self.config.device_type,
                work_refresh_ms: self.config.work_refresh_ms,
                submit_workers: self.config.submit_workers,
                discard_stale_work: self.config.discard_stale_work,
            },
        }
    }
}
