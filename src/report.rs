//! Consumes hash-rate reports and logs periodic throughput summaries.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::info;

use crate::metrics::MetricsCollector;
use crate::types::HashRateReport;

pub struct HashRateMonitor {
    metrics: Arc<MetricsCollector>,
    interval: Duration,
    rates: BTreeMap<usize, f64>,
}

impl HashRateMonitor {
    pub fn new(metrics: Arc<MetricsCollector>, interval: Duration) -> Self {
        Self {
            metrics,
            interval,
            rates: BTreeMap::new(),
        }
    }

    pub fn spawn(self, reports: Receiver<HashRateReport>) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("hashrate".into())
            .spawn(move || self.run(reports))
    }

    /// Returns once every sender of `reports` is gone.
    pub fn run(mut self, reports: Receiver<HashRateReport>) {
        let mut next_summary = Instant::now() + self.interval;
        loop {
            let wait = next_summary.saturating_duration_since(Instant::now());
            match reports.recv_timeout(wait) {
                Ok(report) => self.record(report),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if Instant::now() >= next_summary {
                self.log_summary();
                next_summary = Instant::now() + self.interval;
            }
        }
    }

    fn record(&mut self, report: HashRateReport) {
        self.metrics.record_hash_rate(&report);
        self.rates.insert(report.device_id, report.hash_rate);
    }

    pub fn total(&self) -> f64 {
        self.rates.values().sum()
    }

    fn log_summary(&self) {
        if self.rates.is_empty() {
            return;
        }
        let per_device = self
            .rates
            .iter()
            .map(|(device, rate)| format!("{device}: {rate:.2}"))
            .collect::<Vec<_>>()
            .join(" ");
        info!("total {:.2} MH/s ({per_device})", self.total());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn records_reports_until_channel_closes() {
        let metrics = Arc::new(MetricsCollector::new());
        let (tx, rx) = unbounded();
        tx.send(HashRateReport { device_id: 0, hash_rate: 2.5 }).unwrap();
        tx.send(HashRateReport { device_id: 1, hash_rate: 1.5 }).unwrap();
        tx.send(HashRateReport { device_id: 0, hash_rate: 3.0 }).unwrap();
        drop(tx);

        let handle = HashRateMonitor::new(metrics.clone(), Duration::from_millis(5))
            .spawn(rx)
            .unwrap();
        handle.join().unwrap();

        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.items_completed, 3);
        assert_eq!(snapshot.total_hash_rate, 4.5);
    }

    #[test]
    fn total_sums_latest_rates() {
        let metrics = Arc::new(MetricsCollector::new());
        let mut monitor = HashRateMonitor::new(metrics, Duration::from_secs(1));
        monitor.record(HashRateReport { device_id: 0, hash_rate: 1.0 });
        monitor.record(HashRateReport { device_id: 0, hash_rate: 4.0 });
        monitor.record(HashRateReport { device_id: 2, hash_rate: 2.0 });
        assert_eq!(monitor.total(), 6.0);
    }
}
