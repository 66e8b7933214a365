//! Per-device search loop.

use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Sender;
use tracing::{debug, info};

use crate::error::DeviceError;
use crate::metrics::MetricsCollector;
use crate::queue::{Pulled, WorkConsumer};
use crate::submit::Submitter;
use crate::types::{HashRateReport, OUTPUT_LEN, Solution, WorkItem, found_nonce};

/// An opened device session: context, queue, program, kernel and buffers.
/// Resources are released on drop.
pub trait Accelerator {
    /// Copies the 88 byte work header into the device input buffer.
    fn write_header(&mut self, header: &[u8]) -> Result<(), DeviceError>;
    /// Runs the search kernel over `[offset, offset + global_size)`.
    fn dispatch(&mut self, offset: u32, global_size: usize) -> Result<(), DeviceError>;
    fn read_output(&mut self) -> Result<[u8; OUTPUT_LEN], DeviceError>;
    fn clear_output(&mut self) -> Result<(), DeviceError>;
}

/// A device handle that can be moved to its worker thread and opened there.
pub trait ComputeDevice: Send + 'static {
    type Accelerator: Accelerator;

    fn describe(&self) -> String;
    fn open(self, global_item_size: usize) -> Result<Self::Accelerator, DeviceError>;
}

pub struct DeviceWorker<D: ComputeDevice, J> {
    pub device_id: usize,
    pub device: D,
    pub queue: WorkConsumer<J>,
    pub item_size: u64,
    pub submitter: Submitter<J>,
    pub reports: Sender<HashRateReport>,
    pub discard_stale: bool,
    pub metrics: Arc<MetricsCollector>,
}

impl<D: ComputeDevice, J> DeviceWorker<D, J> {
    /// Runs until the queue closes. Any accelerator error ends the loop.
    pub fn run(self) -> Result<(), DeviceError> {
        let Self {
            device_id,
            device,
            queue,
            item_size,
            submitter,
            reports,
            discard_stale,
            metrics,
        } = self;

        let description = device.describe();
        info!(device = device_id, "initializing {description}");
        let global_size = item_size as usize;
        let mut accelerator = device.open(global_size)?;
        accelerator.clear_output()?;
        info!(device = device_id, global_size, "initialized {description}");

        loop {
            let start = Instant::now();
            let item = match next_item(device_id, &queue) {
                Some(item) => item,
                None => {
                    info!(device = device_id, "halting miner");
                    return Ok(());
                }
            };

            if discard_stale && item.is_stale() {
                debug!(device = device_id, template = item.template_id, "skipping stale work");
                metrics.record_stale_skipped();
                continue;
            }

            accelerator.write_header(&item.header[..])?;
            accelerator.dispatch(item.offset, global_size)?;
            let output = accelerator.read_output()?;

            if let Some(nonce) = found_nonce(&output) {
                info!(device = device_id, template = item.template_id, "solution found");
                metrics.record_solution();
                submitter.submit(Solution::new(device_id, &item, nonce));
                accelerator.clear_output()?;
            }

            let report = HashRateReport::measure(device_id, item_size, start.elapsed());
            if reports.send(report).is_err() {
                debug!(device = device_id, "hash rate channel closed");
            }
        }
    }
}

fn next_item<J>(device_id: usize, queue: &WorkConsumer<J>) -> Option<WorkItem<J>> {
    match queue.try_pull() {
        Pulled::Item(item) => Some(item),
        Pulled::Closed => None,
        Pulled::Empty => {
            info!(device = device_id, "no work ready");
            let item = queue.pull();
            info!(device = device_id, "continuing");
            item
        }
    }
}
