//! Bounded solution submission.
//!
//! Device workers hand solutions over without blocking; a fixed pool of
//! threads performs the outbound calls. A full queue drops the solution.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use num_bigint::BigUint;
use tracing::{debug, info, warn};

use crate::encoding::hash_meets_target;
use crate::error::MinerError;
use crate::metrics::{MetricsCollector, SubmissionOutcome};
use crate::source::WorkSource;
use crate::types::Solution;

pub struct Submitter<J> {
    tx: Sender<Solution<J>>,
    metrics: Arc<MetricsCollector>,
}

impl<J> Clone for Submitter<J> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<J> Submitter<J> {
    /// Returns `false` when the solution could not be queued.
    pub fn submit(&self, solution: Solution<J>) -> bool {
        match self.tx.try_send(solution) {
            Ok(()) => true,
            Err(TrySendError::Full(solution)) => {
                warn!(
                    device = solution.device_id,
                    nonce = solution.nonce(),
                    "submission queue full, dropping solution"
                );
                self.metrics.record_submission(SubmissionOutcome::Dropped);
                false
            }
            Err(TrySendError::Disconnected(solution)) => {
                warn!(
                    device = solution.device_id,
                    "submission pool stopped, dropping solution"
                );
                self.metrics.record_submission(SubmissionOutcome::Dropped);
                false
            }
        }
    }
}

/// Starts `workers` submission threads. They exit once every [`Submitter`]
/// clone is dropped and the queue is empty.
pub fn spawn_submitters<S: WorkSource>(
    source: Arc<S>,
    capacity: usize,
    workers: usize,
    metrics: Arc<MetricsCollector>,
) -> Result<(Submitter<S::Job>, Vec<JoinHandle<()>>), MinerError> {
    let (tx, rx) = bounded(capacity.max(1));
    let mut handles = Vec::with_capacity(workers.max(1));
    for index in 0..workers.max(1) {
        let source = source.clone();
        let rx = rx.clone();
        let metrics = metrics.clone();
        let handle = thread::Builder::new()
            .name(format!("submit-{index}"))
            .spawn(move || submission_loop(source, rx, metrics))?;
        handles.push(handle);
    }
    Ok((Submitter { tx, metrics }, handles))
}

fn submission_loop<S: WorkSource>(
    source: Arc<S>,
    rx: Receiver<Solution<S::Job>>,
    metrics: Arc<MetricsCollector>,
) {
    for solution in rx.iter() {
        let target = BigUint::from_bytes_be(&solution.target);
        debug!(
            device = solution.device_id,
            template = solution.template_id,
            meets_full_target = hash_meets_target(&solution.header, &target),
            "submitting solution"
        );

        match source.submit_header(&solution.header, &solution.job) {
            Ok(()) => {
                info!(device = solution.device_id, nonce = solution.nonce(), "solution accepted");
                metrics.record_submission(SubmissionOutcome::Accepted);
            }
            Err(e) => {
                warn!(device = solution.device_id, error = %e, "error submitting solution");
                metrics.record_submission(SubmissionOutcome::Failed);
            }
        }
    }
}
