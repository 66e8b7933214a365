use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::HashRateReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    // Work flow
    pub templates_fetched: u64,
    pub items_issued: u64,
    pub items_drained: u64,
    pub stale_items_skipped: u64,
    pub items_completed: u64,

    // Solutions
    pub solutions_found: u64,
    pub submissions_accepted: u64,
    pub submissions_failed: u64,
    pub submissions_dropped: u64,

    // Errors
    pub fetch_errors: u64,
    pub device_errors: u64,
    pub consecutive_fetch_failures: u32,

    // Throughput, MH/s
    pub device_hash_rates: BTreeMap<usize, f64>,
    pub total_hash_rate: f64,

    pub uptime_seconds: u64,
    pub last_solution_seconds: Option<u64>,
}

#[derive(Debug)]
pub struct MetricsCollector {
    templates_fetched: AtomicU64,
    items_issued: AtomicU64,
    items_drained: AtomicU64,
    stale_items_skipped: AtomicU64,
    items_completed: AtomicU64,
    solutions_found: AtomicU64,
    submissions_accepted: AtomicU64,
    submissions_failed: AtomicU64,
    submissions_dropped: AtomicU64,
    fetch_errors: AtomicU64,
    device_errors: AtomicU64,
    consecutive_fetch_failures: AtomicU32,

    start_time: Instant,
    last_solution_time: RwLock<Option<Instant>>,
    hash_rates: RwLock<BTreeMap<usize, f64>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            templates_fetched: AtomicU64::new(0),
            items_issued: AtomicU64::new(0),
            items_drained: AtomicU64::new(0),
            stale_items_skipped: AtomicU64::new(0),
            items_completed: AtomicU64::new(0),
            solutions_found: AtomicU64::new(0),
            submissions_accepted: AtomicU64::new(0),
            submissions_failed: AtomicU64::new(0),
            submissions_dropped: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
            device_errors: AtomicU64::new(0),
            consecutive_fetch_failures: AtomicU32::new(0),
            start_time: Instant::now(),
            last_solution_time: RwLock::new(None),
            hash_rates: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn record_template(&self) {
        self.templates_fetched.fetch_add(1, Ordering::Relaxed);
        self.consecutive_fetch_failures.store(0, Ordering::Relaxed);
    }

    pub fn record_item_issued(&self) {
        self.items_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_drained(&self, count: usize) {
        self.items_drained.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_stale_skipped(&self) {
        self.stale_items_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_solution(&self) {
        self.solutions_found.fetch_add(1, Ordering::Relaxed);
        *self.last_solution_time.write() = Some(Instant::now());
    }

    pub fn record_submission(&self, outcome: SubmissionOutcome) {
        let counter = match outcome {
            SubmissionOutcome::Accepted => &self.submissions_accepted,
            SubmissionOutcome::Failed => &self.submissions_failed,
            SubmissionOutcome::Dropped => &self.submissions_dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, error_type: ErrorType) {
        match error_type {
            ErrorType::Fetch => {
                self.fetch_errors.fetch_add(1, Ordering::Relaxed);
                self.consecutive_fetch_failures.fetch_add(1, Ordering::Relaxed);
            }
            ErrorType::Device => {
                self.device_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_hash_rate(&self, report: &HashRateReport) {
        self.items_completed.fetch_add(1, Ordering::Relaxed);
        self.hash_rates.write().insert(report.device_id, report.hash_rate);
    }

    pub fn get_metrics(&self) -> Metrics {
        let device_hash_rates = self.hash_rates.read().clone();
        let total_hash_rate: f64 = device_hash_rates.values().sum();
        let last_solution_seconds = self
            .last_solution_time
            .read()
            .map(|time| time.duration_since(self.start_time).as_secs());

        Metrics {
            templates_fetched: self.templates_fetched.load(Ordering::Relaxed),
            items_issued: self.items_issued.load(Ordering::Relaxed),
            items_drained: self.items_drained.load(Ordering::Relaxed),
            stale_items_skipped: self.stale_items_skipped.load(Ordering::Relaxed),
            items_completed: self.items_completed.load(Ordering::Relaxed),
            solutions_found: self.solutions_found.load(Ordering::Relaxed),
            submissions_accepted: self.submissions_accepted.load(Ordering::Relaxed),
            submissions_failed: self.submissions_failed.load(Ordering::Relaxed),
            submissions_dropped: self.submissions_dropped.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
            consecutive_fetch_failures: self.consecutive_fetch_failures.load(Ordering::Relaxed),
            device_hash_rates,
            total_hash_rate,
            uptime_seconds: self.start_time.elapsed().as_secs(),
            last_solution_seconds,
        }
    }

    pub fn get_health_status(&self) -> HealthStatus {
        let consecutive_failures = self.consecutive_fetch_failures.load(Ordering::Relaxed);

        if self.device_errors.load(Ordering::Relaxed) > 0 || consecutive_failures >= 30 {
            HealthStatus::Critical
        } else if consecutive_failures >= 10 {
            HealthStatus::Unhealthy
        } else if consecutive_failures >= 2 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Fetch,
    Device,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Accepted,
    Failed,
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_rates_keep_latest_sample_per_device() {
        let metrics = MetricsCollector::new();
        metrics.record_hash_rate(&HashRateReport { device_id: 0, hash_rate: 10.0 });
        metrics.record_hash_rate(&HashRateReport { device_id: 1, hash_rate: 5.0 });
        metrics.record_hash_rate(&HashRateReport { device_id: 0, hash_rate: 12.0 });

        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.items_completed, 3);
        assert_eq!(snapshot.device_hash_rates.get(&0), Some(&12.0));
        assert_eq!(snapshot.total_hash_rate, 17.0);
    }

    #[test]
    fn fetch_failures_degrade_until_next_template() {
        let metrics = MetricsCollector::new();
        assert_eq!(metrics.get_health_status(), HealthStatus::Healthy);

        for _ in 0..10 {
            metrics.record_error(ErrorType::Fetch);
        }
        assert_eq!(metrics.get_health_status(), HealthStatus::Unhealthy);

        metrics.record_template();
        assert_eq!(metrics.get_health_status(), HealthStatus::Healthy);
        assert_eq!(metrics.get_metrics().fetch_errors, 10);
    }

    #[test]
    fn device_error_is_critical() {
        let metrics = MetricsCollector::new();
        metrics.record_error(ErrorType::Device);
        assert_eq!(metrics.get_health_status(), HealthStatus::Critical);
        assert_eq!(HealthStatus::Critical.to_string(), "critical");
    }

    #[test]
    fn submission_outcomes_are_counted_separately() {
        let metrics = MetricsCollector::new();
        metrics.record_solution();
        metrics.record_submission(SubmissionOutcome::Accepted);
        metrics.record_submission(SubmissionOutcome::Failed);
        metrics.record_submission(SubmissionOutcome::Dropped);
        metrics.record_submission(SubmissionOutcome::Dropped);

        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.solutions_found, 1);
        assert_eq!(snapshot.submissions_accepted, 1);
        assert_eq!(snapshot.submissions_failed, 1);
        assert_eq!(snapshot.submissions_dropped, 2);
        assert!(snapshot.last_solution_seconds.is_some());
    }
}
