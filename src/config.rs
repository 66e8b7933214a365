use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::miner::MinerConfig;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelection {
    Gpu,
    Cpu,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Work source
    pub work_url: String,
    pub work_user_agent: String,
    pub work_refresh_ms: u64,

    // Devices
    pub intensity: u32,
    pub device_type: DeviceSelection,
    pub opencl_platform: usize,
    pub devices: Option<Vec<usize>>,
    pub cpu_devices: usize,

    // Work flow
    pub fetch_retry_delay_ms: u64,
    pub submit_queue_capacity: usize,
    pub submit_workers: usize,
    pub discard_stale_work: bool,

    // Monitoring and logging
    pub report_interval_ms: u64,
    pub log_level: String,
    pub metrics_enabled: bool,
    pub health_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_url: "http://localhost:9980".to_string(),
            work_user_agent: "Sia-Agent".to_string(),
            work_refresh_ms: 10_000,

            intensity: 28,
            device_type: DeviceSelection::Gpu,
            opencl_platform: 0,
            devices: None,
            cpu_devices: 1,

            fetch_retry_delay_ms: 1000,
            submit_queue_capacity: 64,
            submit_workers: 2,
            discard_stale_work: true,

            report_interval_ms: 10_000,
            log_level: "info".to_string(),
            metrics_enabled: true,
            health_port: 8089,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, val: String) -> Result<T, ConfigError> {
    val.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvVar(key.to_string(), val))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from `lookup`, falling back to defaults for absent keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(val) = lookup("WORK_URL") {
            config.work_url = val;
        }
        if let Some(val) = lookup("WORK_USER_AGENT") {
            config.work_user_agent = val;
        }
        if let Some(val) = lookup("WORK_REFRESH_MS") {
            config.work_refresh_ms = parse("WORK_REFRESH_MS", val)?;
        }

        if let Some(val) = lookup("INTENSITY") {
            config.intensity = parse("INTENSITY", val)?;
        }
        if let Some(val) = lookup("DEVICE_TYPE") {
            config.device_type = match val.trim().to_ascii_lowercase().as_str() {
                "gpu" => DeviceSelection::Gpu,
                "cpu" => DeviceSelection::Cpu,
                "all" => DeviceSelection::All,
                _ => return Err(ConfigError::InvalidEnvVar("DEVICE_TYPE".to_string(), val)),
            };
        }
        if let Some(val) = lookup("OPENCL_PLATFORM") {
            config.opencl_platform = parse("OPENCL_PLATFORM", val)?;
        }
        if let Some(val) = lookup("DEVICES") {
            if !val.trim().is_empty() {
                let indices = val
                    .split(',')
                    .map(|part| parse("DEVICES", part.to_string()))
                    .collect::<Result<Vec<usize>, _>>()
                    .map_err(|_| ConfigError::InvalidEnvVar("DEVICES".to_string(), val.clone()))?;
                config.devices = Some(indices);
            }
        }
        if let Some(val) = lookup("CPU_DEVICES") {
            config.cpu_devices = parse("CPU_DEVICES", val)?;
        }

        if let Some(val) = lookup("FETCH_RETRY_DELAY_MS") {
            config.fetch_retry_delay_ms = parse("FETCH_RETRY_DELAY_MS", val)?;
        }
        if let Some(val) = lookup("SUBMIT_QUEUE_CAPACITY") {
            config.submit_queue_capacity = parse("SUBMIT_QUEUE_CAPACITY", val)?;
        }
        if let Some(val) = lookup("SUBMIT_WORKERS") {
            config.submit_workers = parse("SUBMIT_WORKERS", val)?;
        }
        if let Some(val) = lookup("DISCARD_STALE_WORK") {
            config.discard_stale_work = val == "1";
        }

        if let Some(val) = lookup("REPORT_INTERVAL_MS") {
            config.report_interval_ms = parse("REPORT_INTERVAL_MS", val)?;
        }
        if let Some(val) = lookup("LOG_LEVEL") {
            config.log_level = val;
        }
        if let Some(val) = lookup("METRICS_ENABLED") {
            config.metrics_enabled = val == "1";
        }
        if let Some(val) = lookup("HEALTH_PORT") {
            config.health_port = parse("HEALTH_PORT", val)?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=31).contains(&self.intensity) {
            return Err(ConfigError::ValidationError(
                "INTENSITY must be between 1 and 31".to_string(),
            ));
        }
        if !self.work_url.starts_with("http") {
            return Err(ConfigError::ValidationError(
                "WORK_URL must be a valid HTTP URL".to_string(),
            ));
        }
        if self.work_refresh_ms == 0 {
            return Err(ConfigError::ValidationError(
                "WORK_REFRESH_MS must be greater than 0".to_string(),
            ));
        }
        if self.submit_queue_capacity == 0 || self.submit_workers == 0 {
            return Err(ConfigError::ValidationError(
                "SUBMIT_QUEUE_CAPACITY and SUBMIT_WORKERS must be greater than 0".to_string(),
            ));
        }
        if self.report_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "REPORT_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }
        if matches!(&self.devices, Some(devices) if devices.is_empty()) {
            return Err(ConfigError::ValidationError(
                "DEVICES must list at least one index".to_string(),
            ));
        }
        Ok(())
    }

    pub fn miner_config(&self) -> MinerConfig {
        MinerConfig {
            intensity: self.intensity,
            fetch_retry_delay: Duration::from_millis(self.fetch_retry_delay_ms),
            submit_queue_capacity: self.submit_queue_capacity,
            submit_workers: self.submit_workers,
            discard_stale_work: self.discard_stale_work,
        }
    }

    pub fn get_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.work_refresh_ms)
    }

    pub fn get_report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    /// Keeps the configured indices, or everything when none are configured.
    pub fn select_devices<T>(&self, available: Vec<T>) -> Vec<T> {
        match &self.devices {
            None => available,
            Some(wanted) => available
                .into_iter()
                .enumerate()
                .filter(|(index, _)| wanted.contains(index))
                .map(|(_, device)| device)
                .collect(),
        }
    }
}
