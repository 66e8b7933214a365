//! Splits work templates into device-sized nonce ranges and keeps the work
//! queue full.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{ErrorType, MetricsCollector};
use crate::queue::{PushError, WorkConsumer, WorkProducer};
use crate::source::WorkSource;
use crate::types::WorkTemplate;

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Offsets `0, s, 2s, ...` strictly below `u32::MAX - s`. A remainder shorter
/// than one full item is never issued.
pub fn nonce_offsets(item_size: u64) -> impl Iterator<Item = u32> {
    let bound = u64::from(u32::MAX).saturating_sub(item_size);
    (0..bound)
        .step_by(item_size.max(1) as usize)
        .map(|offset| offset as u32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Every offset of the template was queued.
    Exhausted,
    /// The template went stale; remaining offsets were abandoned.
    Deprecated,
    /// The queue closed or shutdown was requested.
    Stopped,
}

/// Queues the items of one template. Its deprecation signal is checked before
/// every push and while a push waits for room.
pub fn feed_template<J>(
    template: &WorkTemplate<J>,
    producer: &WorkProducer<J>,
    item_size: u64,
    shutdown: &CancellationToken,
    metrics: &MetricsCollector,
) -> FeedOutcome {
    for offset in nonce_offsets(item_size) {
        if template.is_deprecated() {
            return FeedOutcome::Deprecated;
        }
        match producer.push(template.item(offset), shutdown) {
            Ok(()) => metrics.record_item_issued(),
            Err(PushError::Deprecated) => return FeedOutcome::Deprecated,
            Err(PushError::Closed) | Err(PushError::Cancelled) => return FeedOutcome::Stopped,
        }
    }
    FeedOutcome::Exhausted
}

pub struct Partitioner<S: WorkSource> {
    pub source: Arc<S>,
    pub producer: WorkProducer<S::Job>,
    pub drain: WorkConsumer<S::Job>,
    pub item_size: u64,
    pub retry_delay: Duration,
    pub shutdown: CancellationToken,
    pub metrics: Arc<MetricsCollector>,
}

impl<S: WorkSource> Partitioner<S> {
    pub fn run(self) {
        let drain = self.drain.clone();
        let drain_metrics = self.metrics.clone();
        let _subscription = self.source.subscribe_deprecation(Arc::new(move || {
            let drained = drain.drain();
            drain_metrics.record_drained(drained);
            debug!(drained, "work deprecated, queue drained");
        }));

        self.source.start();

        let mut next_template_id = 0u64;
        while !self.shutdown.is_cancelled() {
            let work = match self.source.fetch_work() {
                Ok(work) => work,
                Err(e) => {
                    self.backoff(&e);
                    continue;
                }
            };
            let template = match WorkTemplate::new(next_template_id, work) {
                Ok(template) => template,
                Err(e) => {
                    self.backoff(&e);
                    continue;
                }
            };
            next_template_id += 1;
            self.metrics.record_template();
            debug!(template = template.id, "new work template");

            let outcome = feed_template(
                &template,
                &self.producer,
                self.item_size,
                &self.shutdown,
                &self.metrics,
            );
            match outcome {
                FeedOutcome::Exhausted => {
                    debug!(template = template.id, "nonce space exhausted")
                }
                FeedOutcome::Deprecated => {
                    debug!(template = template.id, "template deprecated")
                }
                FeedOutcome::Stopped => break,
            }
        }
        info!("work partitioner stopped");
    }

    fn backoff(&self, error: &dyn std::error::Error) {
        warn!(error = %error, "error fetching work");
        self.metrics.record_error(ErrorType::Fetch);

        let deadline = Instant::now() + self.retry_delay;
        while !self.shutdown.is_cancelled() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            std::thread::sleep(remaining.min(SHUTDOWN_POLL));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::work_queue;
    use crate::source::DeprecationSignal;
    use crate::types::tests::fetched;
    use proptest::prelude::*;
    use std::thread;

    proptest! {
        #[test]
        fn offsets_ascend_in_full_items(intensity in 16u32..=31) {
            let size = 1u64 << intensity;
            let offsets: Vec<u64> = nonce_offsets(size).map(u64::from).collect();

            prop_assert!(!offsets.is_empty());
            for (i, offset) in offsets.iter().enumerate() {
                prop_assert_eq!(*offset, i as u64 * size);
                prop_assert!(*offset < u64::from(u32::MAX) - size);
            }
            let last = *offsets.last().unwrap();
            prop_assert!(last + size <= 1u64 << 32);
            prop_assert!(last + size >= u64::from(u32::MAX) - size);
        }
    }

    #[test]
    fn intensity_28_yields_fifteen_items() {
        let offsets: Vec<u32> = nonce_offsets(1 << 28).collect();
        assert_eq!(offsets.len(), 15);
        assert_eq!(offsets[14], 14 << 28);
    }

    #[test]
    fn oversized_items_yield_nothing() {
        assert_eq!(nonce_offsets(1 << 32).count(), 0);
    }

    #[test]
    fn fired_signal_stops_before_first_push() {
        let (producer, consumer) = work_queue(4);
        let work = fetched(vec![0; 80], vec![0xff; 32]);
        work.deprecation.fire();
        let template = WorkTemplate::new(0, work).unwrap();

        let outcome = feed_template(
            &template,
            &producer,
            1 << 28,
            &CancellationToken::new(),
            &MetricsCollector::new(),
        );
        assert_eq!(outcome, FeedOutcome::Deprecated);
        assert!(consumer.is_empty());
    }

    #[test]
    fn feeds_whole_template_in_order() {
        let (producer, consumer) = work_queue(1);
        let template = WorkTemplate::new(0, fetched(vec![0; 80], vec![0xff; 32])).unwrap();
        let metrics = MetricsCollector::new();

        let collector = thread::spawn(move || {
            let mut offsets = Vec::new();
            while let Some(item) = consumer.pull() {
                offsets.push(item.offset);
            }
            offsets
        });

        let outcome = feed_template(
            &template,
            &producer,
            1 << 28,
            &CancellationToken::new(),
            &metrics,
        );
        drop(producer);

        assert_eq!(outcome, FeedOutcome::Exhausted);
        let offsets = collector.join().unwrap();
        assert_eq!(offsets, nonce_offsets(1 << 28).collect::<Vec<_>>());
        assert_eq!(metrics.get_metrics().items_issued, 15);
    }

    #[test]
    fn deprecation_mid_feed_stops_further_pushes() {
        let capacity = 1;
        let (producer, consumer) = work_queue(capacity);
        let signal = DeprecationSignal::new();
        let mut work = fetched(vec![0; 80], vec![0xff; 32]);
        work.deprecation = signal.clone();
        let template = WorkTemplate::new(0, work).unwrap();

        let collector = thread::spawn(move || {
            let mut received = 0;
            while let Some(_item) = consumer.pull() {
                received += 1;
                if received == 3 {
                    signal.fire();
                }
            }
            received
        });

        let outcome = feed_template(
            &template,
            &producer,
            1 << 20,
            &CancellationToken::new(),
            &MetricsCollector::new(),
        );
        drop(producer);

        assert_eq!(outcome, FeedOutcome::Deprecated);
        let received = collector.join().unwrap();
        // items already queued when the signal fired may still be consumed
        assert!(received <= 3 + capacity, "received {received}");
    }

    #[test]
    fn cancelled_shutdown_stops_feed() {
        let (producer, _consumer) = work_queue(1);
        let template = WorkTemplate::new(0, fetched(vec![0; 80], vec![0xff; 32])).unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let outcome = feed_template(
            &template,
            &producer,
            1 << 28,
            &shutdown,
            &MetricsCollector::new(),
        );
        assert_eq!(outcome, FeedOutcome::Stopped);
    }
}
