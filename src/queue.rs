//! Bounded work queue between the partitioner and the device workers.
//!
//! The queue closes when the producer is dropped; consumers then see
//! [`Pulled::Closed`] once the remaining items are gone.

use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use tokio_util::sync::CancellationToken;

use crate::types::WorkItem;

const PUSH_POLL: Duration = Duration::from_millis(5);

pub fn work_queue<J>(capacity: usize) -> (WorkProducer<J>, WorkConsumer<J>) {
    let (tx, rx) = bounded(capacity.max(1));
    (WorkProducer { tx }, WorkConsumer { rx })
}

#[derive(Debug, PartialEq, Eq)]
pub enum PushError {
    /// Every consumer is gone.
    Closed,
    /// Shutdown was requested while waiting for room.
    Cancelled,
    /// The item's template was deprecated while waiting for room.
    Deprecated,
}

pub struct WorkProducer<J> {
    tx: Sender<WorkItem<J>>,
}

impl<J> WorkProducer<J> {
    /// Blocks while the queue is full, polling so that shutdown or the
    /// item's template going stale abandons the push instead of landing it.
    pub fn push(&self, item: WorkItem<J>, shutdown: &CancellationToken) -> Result<(), PushError> {
        let mut item = item;
        loop {
            if shutdown.is_cancelled() {
                return Err(PushError::Cancelled);
            }
            if item.is_stale() {
                return Err(PushError::Deprecated);
            }
            match self.tx.try_send(item) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(PushError::Closed),
                Err(TrySendError::Full(returned)) => {
                    item = returned;
                    thread::sleep(PUSH_POLL);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

pub enum Pulled<J> {
    Item(WorkItem<J>),
    Empty,
    Closed,
}

pub struct WorkConsumer<J> {
    rx: Receiver<WorkItem<J>>,
}

impl<J> Clone for WorkConsumer<J> {
    fn clone(&self) -> Self {
        Self { rx: self.rx.clone() }
    }
}

impl<J> WorkConsumer<J> {
    pub fn try_pull(&self) -> Pulled<J> {
        match self.rx.try_recv() {
            Ok(item) => Pulled::Item(item),
            Err(TryRecvError::Empty) => Pulled::Empty,
            Err(TryRecvError::Disconnected) => Pulled::Closed,
        }
    }

    /// Blocks until an item arrives. `None` once the queue is closed and empty.
    pub fn pull(&self) -> Option<WorkItem<J>> {
        self.rx.recv().ok()
    }

    /// Removes up to `len + 1` queued items without ever blocking. Over-draining
    /// into the next template's first items is accepted.
    pub fn drain(&self) -> usize {
        let budget = self.rx.len() + 1;
        let mut drained = 0;
        for _ in 0..budget {
            match self.rx.try_recv() {
                Ok(_) => drained += 1,
                Err(_) => break,
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkTemplate;
    use crate::types::tests::fetched;
    use std::collections::HashSet;
    use crate::source::DeprecationSignal;
    use std::sync::{Arc, Mutex};

    fn template() -> WorkTemplate<&'static str> {
        WorkTemplate::new(0, fetched(vec![0; 80], vec![0xff; 32])).unwrap()
    }

    #[test]
    fn capacity_is_at_least_one() {
        let (producer, consumer) = work_queue(0);
        let shutdown = CancellationToken::new();
        producer.push(template().item(0), &shutdown).unwrap();
        assert_eq!(consumer.len(), 1);
    }

    #[test]
    fn drain_stops_on_empty_queue() {
        let (producer, consumer) = work_queue(4);
        let shutdown = CancellationToken::new();
        let template = template();
        for offset in 0..3 {
            producer.push(template.item(offset), &shutdown).unwrap();
        }

        assert_eq!(consumer.drain(), 3);
        assert!(consumer.is_empty());
        assert_eq!(consumer.drain(), 0);
    }

    #[test]
    fn closes_when_producer_dropped() {
        let (producer, consumer) = work_queue(2);
        let shutdown = CancellationToken::new();
        producer.push(template().item(5), &shutdown).unwrap();
        drop(producer);

        assert!(matches!(consumer.try_pull(), Pulled::Item(item) if item.offset == 5));
        assert!(matches!(consumer.try_pull(), Pulled::Closed));
        assert!(consumer.pull().is_none());
    }

    #[test]
    fn full_push_observes_shutdown() {
        let (producer, _consumer) = work_queue(1);
        let shutdown = CancellationToken::new();
        let template = template();
        producer.push(template.item(0), &shutdown).unwrap();

        shutdown.cancel();
        assert_eq!(producer.push(template.item(1), &shutdown), Err(PushError::Cancelled));
    }

    #[test]
    fn blocked_push_abandons_deprecated_item() {
        let (producer, consumer) = work_queue(1);
        let shutdown = CancellationToken::new();
        producer.push(template().item(0), &shutdown).unwrap();

        let signal = DeprecationSignal::new();
        let mut work = fetched(vec![0; 80], vec![0xff; 32]);
        work.deprecation = signal.clone();
        let stale = WorkTemplate::new(7, work).unwrap();

        let pusher = thread::spawn(move || {
            let result = producer.push(stale.item(0), &shutdown);
            (result, producer)
        });
        thread::sleep(Duration::from_millis(30));
        signal.fire();
        assert_eq!(consumer.drain(), 1);

        let (result, _producer) = pusher.join().unwrap();
        assert_eq!(result, Err(PushError::Deprecated));
        assert!(matches!(consumer.try_pull(), Pulled::Empty));
    }

    #[test]
    fn drain_is_bounded_while_producer_refills() {
        let capacity = 8;
        let (producer, consumer) = work_queue(capacity);
        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        let refill = thread::spawn(move || {
            let template = template();
            let mut offset = 0u32;
            while producer.push(template.item(offset), &stop).is_ok() {
                offset = offset.wrapping_add(1);
            }
        });

        while consumer.len() < capacity {
            thread::sleep(Duration::from_millis(1));
        }
        for _ in 0..50 {
            let drained = consumer.drain();
            assert!(drained <= capacity + 1, "drained {drained}");
        }

        shutdown.cancel();
        refill.join().unwrap();
    }

    #[test]
    fn concurrent_consumers_never_share_items() {
        let (producer, consumer) = work_queue(2);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let consumer = consumer.clone();
                let seen = seen.clone();
                thread::spawn(move || {
                    while let Some(item) = consumer.pull() {
                        seen.lock().unwrap().push(item.offset);
                    }
                })
            })
            .collect();

        let shutdown = CancellationToken::new();
        let template = template();
        for offset in 0..500 {
            producer.push(template.item(offset), &shutdown).unwrap();
        }
        drop(producer);
        for handle in handles {
            handle.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        let unique: HashSet<u32> = seen.iter().copied().collect();
        assert_eq!(seen.len(), 500);
        assert_eq!(unique.len(), 500);
    }
}
