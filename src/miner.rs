//! Coordinator: wires one partitioner, the submission pool and one device
//! worker per device around a shared work queue.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::MinerError;
use crate::metrics::{ErrorType, MetricsCollector};
use crate::partitioner::Partitioner;
use crate::queue::work_queue;
use crate::source::WorkSource;
use crate::submit::spawn_submitters;
use crate::types::HashRateReport;
use crate::worker::{ComputeDevice, DeviceWorker};

#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Item size is `2^intensity` nonces per dispatch.
    pub intensity: u32,
    pub fetch_retry_delay: Duration,
    pub submit_queue_capacity: usize,
    pub submit_workers: usize,
    pub discard_stale_work: bool,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            intensity: 28,
            fetch_retry_delay: Duration::from_millis(1000),
            submit_queue_capacity: 64,
            submit_workers: 2,
            discard_stale_work: true,
        }
    }
}

impl MinerConfig {
    pub fn global_item_size(&self) -> u64 {
        1u64 << self.intensity
    }
}

pub struct Miner<S: WorkSource, D: ComputeDevice> {
    devices: Vec<D>,
    source: Arc<S>,
    hash_rate_reports: Sender<HashRateReport>,
    config: MinerConfig,
    metrics: Arc<MetricsCollector>,
}

impl<S: WorkSource, D: ComputeDevice> Miner<S, D> {
    pub fn new(
        devices: Vec<D>,
        source: Arc<S>,
        hash_rate_reports: Sender<HashRateReport>,
        config: MinerConfig,
    ) -> Self {
        Self {
            devices,
            source,
            hash_rate_reports,
            config,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Starts every background thread and returns immediately.
    pub fn mine(self) -> Result<MiningHandle, MinerError> {
        let item_size = self.config.global_item_size();
        let (producer, consumer) = work_queue(self.devices.len());
        let shutdown = CancellationToken::new();
        let (fatal_tx, fatal_rx) = unbounded();
        let mut threads = Vec::with_capacity(self.devices.len() + 1 + self.config.submit_workers);

        let (submitter, submit_threads) = spawn_submitters(
            self.source.clone(),
            self.config.submit_queue_capacity,
            self.config.submit_workers,
            self.metrics.clone(),
        )?;
        threads.extend(submit_threads);

        let partitioner = Partitioner {
            source: self.source.clone(),
            producer,
            drain: consumer.clone(),
            item_size,
            retry_delay: self.config.fetch_retry_delay,
            shutdown: shutdown.clone(),
            metrics: self.metrics.clone(),
        };
        threads.push(
            thread::Builder::new()
                .name("partitioner".into())
                .spawn(move || partitioner.run())?,
        );

        info!(
            devices = self.devices.len(),
            intensity = self.config.intensity,
            item_size,
            "starting miners"
        );
        for (device_id, device) in self.devices.into_iter().enumerate() {
            let worker = DeviceWorker {
                device_id,
                device,
                queue: consumer.clone(),
                item_size,
                submitter: submitter.clone(),
                reports: self.hash_rate_reports.clone(),
                discard_stale: self.config.discard_stale_work,
                metrics: self.metrics.clone(),
            };
            let fatal_tx = fatal_tx.clone();
            let metrics = self.metrics.clone();
            let handle = thread::Builder::new()
                .name(format!("device-{device_id}"))
                .spawn(move || {
                    if let Err(source) = worker.run() {
                        error!(device = device_id, error = %source, "device failed");
                        metrics.record_error(ErrorType::Device);
                        let _ = fatal_tx.send(MinerError::Device { device_id, source });
                    }
                })?;
            threads.push(handle);
        }

        Ok(MiningHandle {
            shutdown,
            fatal_rx,
            threads,
        })
    }
}

/// Running miner. Dropping it leaves the threads running.
pub struct MiningHandle {
    shutdown: CancellationToken,
    fatal_rx: Receiver<MinerError>,
    threads: Vec<JoinHandle<()>>,
}

impl MiningHandle {
    /// Blocks until a device fails (returned) or every device halted.
    pub fn wait_fatal(&self) -> Option<MinerError> {
        self.fatal_rx.recv().ok()
    }

    /// Stops the partitioner, which closes the queue and halts every worker,
    /// then joins all threads.
    pub fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.threads {
            let _ = handle.join();
        }
    }
}
