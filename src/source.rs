//! The work source seam: where templates come from, how their staleness is
//! announced, and where solutions go.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;

/// One-shot, broadcast staleness flag for a single work template.
///
/// Clones observe the same flag; once fired it stays fired.
#[derive(Debug, Clone, Default)]
pub struct DeprecationSignal(CancellationToken);

impl DeprecationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.0.cancel();
    }

    pub fn is_fired(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Raw work as handed out by a source.
#[derive(Debug)]
pub struct FetchedWork<J> {
    pub target: Vec<u8>,
    pub header: Vec<u8>,
    pub deprecation: DeprecationSignal,
    pub job: J,
}

pub type DeprecationCallback = Arc<dyn Fn() + Send + Sync>;

pub trait WorkSource: Send + Sync + 'static {
    /// Source-defined job reference, returned verbatim on submission.
    type Job: Send + Sync + 'static;

    fn start(&self);

    /// Registers `callback` to run whenever the current template goes stale.
    /// Dropping the returned handle unsubscribes.
    fn subscribe_deprecation(&self, callback: DeprecationCallback) -> DeprecationSubscription;

    /// Blocks until the next template is available.
    fn fetch_work(&self) -> Result<FetchedWork<Self::Job>, SourceError>;

    fn submit_header(&self, header: &[u8], job: &Self::Job) -> Result<(), SourceError>;
}

#[derive(Default)]
struct HubInner {
    next_id: u64,
    callbacks: HashMap<u64, DeprecationCallback>,
}

/// Subscriber registry for work source implementations.
#[derive(Clone, Default)]
pub struct DeprecationHub {
    inner: Arc<Mutex<HubInner>>,
}

impl DeprecationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: DeprecationCallback) -> DeprecationSubscription {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.callbacks.insert(id, callback);
        DeprecationSubscription {
            id,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Runs every registered callback. Callbacks run outside the registry lock
    /// so they may subscribe or unsubscribe.
    pub fn notify(&self) {
        let callbacks: Vec<DeprecationCallback> =
            self.inner.lock().callbacks.values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().callbacks.len()
    }
}

/// Live registration of a deprecation callback.
#[must_use = "dropping the subscription unsubscribes the callback"]
pub struct DeprecationSubscription {
    id: u64,
    hub: Weak<Mutex<HubInner>>,
}

impl DeprecationSubscription {
    pub fn cancel(self) {}
}

impl Drop for DeprecationSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.lock().callbacks.remove(&self.id);
        }
    }
}
