use crate::metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError, Receiver, Sender};
use tracing::debug;
use uuid::Uuid;

pub mod session;

pub use session::{serve, PayloadSink, SessionEnd, SessionError};

/// Opaque change event as emitted by the storage backend. Never parsed here.
pub type NotificationPayload = Arc<str>;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Unique identifier for a live-results subscriber
///
/// Each dashboard connection gets a fresh ID when it subscribes; the ID is the
/// registry key used for cleanup when the connection ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of a single fan-out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers whose queue accepted the payload
    pub delivered: usize,
    /// Subscribers whose queue was full; the payload was dropped for them only
    pub dropped: usize,
    /// Entries whose receiving half had vanished and were removed
    pub pruned: usize,
}

type Registry = HashMap<SubscriberId, Sender<NotificationPayload>>;

/// Registry of live subscribers and their bounded outbound queues
///
/// All registry mutation and the fan-out iteration take the same mutex, and
/// nothing under the lock awaits: a full queue is skipped via `try_send`, so
/// `broadcast` never waits on a consumer.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<Mutex<Registry>>,
    queue_capacity: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl BroadcastHub {
    /// `queue_capacity` is clamped to at least 1
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Register a new subscriber with its own bounded queue
    ///
    /// Only payloads broadcast after this call returns can reach the queue.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = SubscriberId::new();

        let total = {
            let mut guard = self.inner.lock();
            guard.insert(id, tx);
            guard.len()
        };
        metrics::SUBSCRIBERS.inc();

        debug!(subscriber_id = %id, total, "Subscriber registered");

        Subscription {
            id,
            receiver: rx,
            hub: self.clone(),
            registered: true,
        }
    }

    /// Remove a subscriber and close its queue
    ///
    /// Returns false when the ID was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut guard = self.inner.lock();
        let Some(sender) = guard.remove(&id) else {
            return false;
        };
        // Dropping the only sender closes the queue; done before the lock is
        // released so no broadcast can observe a removed-but-open entry.
        drop(sender);
        let remaining = guard.len();
        drop(guard);

        metrics::SUBSCRIBERS.dec();
        debug!(subscriber_id = %id, remaining, "Subscriber removed");
        true
    }

    /// Offer `payload` to every registered queue without waiting
    pub fn broadcast(&self, payload: impl Into<NotificationPayload>) -> BroadcastReport {
        let payload = payload.into();
        let mut report = BroadcastReport::default();

        {
            let mut guard = self.inner.lock();
            guard.retain(|id, sender| match sender.try_send(payload.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    debug!(subscriber_id = %id, "Subscriber queue full, payload dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    report.pruned += 1;
                    false
                }
            });
        }

        metrics::PAYLOADS_TOTAL.inc();
        if report.dropped > 0 {
            metrics::DROPPED_TOTAL.inc_by(report.dropped as u64);
        }
        if report.pruned > 0 {
            metrics::SUBSCRIBERS.sub(report.pruned as i64);
            debug!(pruned = report.pruned, "Removed subscribers with vanished queues");
        }

        report
    }

    /// Current number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.inner.lock().contains_key(&id)
    }
}

/// A registered subscriber: the receiving half of its queue plus its handle
///
/// Owned by exactly one session. Unsubscribes on drop if the owner has not
/// already done so, so a registry entry never outlives its connection.
pub struct Subscription {
    id: SubscriberId,
    receiver: Receiver<NotificationPayload>,
    hub: BroadcastHub,
    registered: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next payload in broadcast order; `None` once the queue is closed and drained
    pub async fn recv(&mut self) -> Option<NotificationPayload> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<NotificationPayload, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Payloads waiting in the queue
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Deregister from the hub and close the queue. Only the first call has
    /// an effect; later calls return false.
    pub fn unsubscribe(&mut self) -> bool {
        if !self.registered {
            return false;
        }
        self.registered = false;
        let removed = self.hub.unsubscribe(self.id);
        self.receiver.close();
        removed
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("registered", &self.registered)
            .finish()
    }
}
