use std::sync::atomic::AtomicU64;

use prometheus_client::{
    encoding::text::encode,
    metrics::{family::Family, gauge::Gauge},
    registry::Registry,
};

use crate::metrics::Metrics;

type DeviceLabels = Vec<(String, String)>;

/// Mirrors [`Metrics`] snapshots into a Prometheus registry.
pub struct PrometheusMetrics {
    registry: Registry,

    templates_fetched: Gauge,
    items_issued: Gauge,
    items_drained: Gauge,
    stale_items_skipped: Gauge,
    items_completed: Gauge,
    solutions_found: Gauge,
    submissions_accepted: Gauge,
    submissions_failed: Gauge,
    submissions_dropped: Gauge,
    fetch_errors: Gauge,
    device_errors: Gauge,
    consecutive_fetch_failures: Gauge,
    uptime_seconds: Gauge,

    total_hash_rate: Gauge<f64, AtomicU64>,
    device_hash_rate: Family<DeviceLabels, Gauge<f64, AtomicU64>>,
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("grindstone");

        let templates_fetched = Gauge::default();
        let items_issued = Gauge::default();
        let items_drained = Gauge::default();
        let stale_items_skipped = Gauge::default();
        let items_completed = Gauge::default();
        let solutions_found = Gauge::default();
        let submissions_accepted = Gauge::default();
        let submissions_failed = Gauge::default();
        let submissions_dropped = Gauge::default();
        let fetch_errors = Gauge::default();
        let device_errors = Gauge::default();
        let consecutive_fetch_failures = Gauge::default();
        let uptime_seconds = Gauge::default();
        let total_hash_rate = Gauge::<f64, AtomicU64>::default();
        let device_hash_rate = Family::<DeviceLabels, Gauge<f64, AtomicU64>>::default();

        registry.register("templates_fetched", "Work templates fetched", templates_fetched.clone());
        registry.register("items_issued", "Work items pushed to the queue", items_issued.clone());
        registry.register(
            "items_drained",
            "Work items drained on deprecation",
            items_drained.clone(),
        );
        registry.register(
            "stale_items_skipped",
            "Deprecated work items skipped by devices",
            stale_items_skipped.clone(),
        );
        registry.register(
            "items_completed",
            "Work items searched by devices",
            items_completed.clone(),
        );
        registry.register("solutions_found", "Solutions found by devices", solutions_found.clone());
        registry.register(
            "submissions_accepted",
            "Solutions accepted by the work source",
            submissions_accepted.clone(),
        );
        registry.register(
            "submissions_failed",
            "Solution submissions that returned an error",
            submissions_failed.clone(),
        );
        registry.register(
            "submissions_dropped",
            "Solutions dropped because the submission queue was full",
            submissions_dropped.clone(),
        );
        registry.register("fetch_errors", "Failed work fetches", fetch_errors.clone());
        registry.register("device_errors", "Fatal device errors", device_errors.clone());
        registry.register(
            "consecutive_fetch_failures",
            "Work fetch failures since the last template",
            consecutive_fetch_failures.clone(),
        );
        registry.register("uptime_seconds", "Miner uptime in seconds", uptime_seconds.clone());
        registry.register("hash_rate_mhs", "Total hash rate in MH/s", total_hash_rate.clone());
        registry.register(
            "device_hash_rate_mhs",
            "Latest hash rate per device in MH/s",
            device_hash_rate.clone(),
        );

        Self {
            registry,
            templates_fetched,
            items_issued,
            items_drained,
            stale_items_skipped,
            items_completed,
            solutions_found,
            submissions_accepted,
            submissions_failed,
            submissions_dropped,
            fetch_errors,
            device_errors,
            consecutive_fetch_failures,
            uptime_seconds,
            total_hash_rate,
            device_hash_rate,
        }
    }

    pub fn update_from_metrics(&self, metrics: &Metrics) {
        self.templates_fetched.set(metrics.templates_fetched as i64);
        self.items_issued.set(metrics.items_issued as i64);
        self.items_drained.set(metrics.items_drained as i64);
        self.stale_items_skipped.set(metrics.stale_items_skipped as i64);
        self.items_completed.set(metrics.items_completed as i64);
        self.solutions_found.set(metrics.solutions_found as i64);
        self.submissions_accepted.set(metrics.submissions_accepted as i64);
        self.submissions_failed.set(metrics.submissions_failed as i64);
        self.submissions_dropped.set(metrics.submissions_dropped as i64);
        self.fetch_errors.set(metrics.fetch_errors as i64);
        self.device_errors.set(metrics.device_errors as i64);
        self.consecutive_fetch_failures
            .set(metrics.consecutive_fetch_failures as i64);
        self.uptime_seconds.set(metrics.uptime_seconds as i64);

        self.total_hash_rate.set(metrics.total_hash_rate);
        for (device, rate) in &metrics.device_hash_rates {
            self.device_hash_rate
                .get_or_create(&vec![("device".to_string(), device.to_string())])
                .set(*rate);
        }
    }

    pub fn export_metrics(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;
    use crate::types::HashRateReport;

    #[test]
    fn exports_snapshot_values() {
        let collector = MetricsCollector::new();
        collector.record_solution();
        collector.record_hash_rate(&HashRateReport { device_id: 1, hash_rate: 2.5 });

        let prometheus = PrometheusMetrics::new();
        prometheus.update_from_metrics(&collector.get_metrics());
        let text = prometheus.export_metrics().unwrap();

        assert!(text.contains("grindstone_solutions_found 1"));
        assert!(text.contains("grindstone_items_completed 1"));
        assert!(text.contains("grindstone_device_hash_rate_mhs{device=\"1\"} 2.5"));
    }
}
